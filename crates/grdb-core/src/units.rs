//! # Unit Converter
//!
//! Stateless, table-driven conversion between a measurement's recorded unit
//! and its quantity's standard unit.
//!
//! Each `UnitTable` maps every accepted unit to a multiplicative factor
//! relative to the standard unit (factor `1.0` for the standard itself).
//! Conversion is purely multiplicative, no offsets:
//!
//! - `to_standard(v, u)   = v * table[u]`
//! - `from_standard(v, u) = v / table[u]`
//!
//! The tables are fixed at compile time and validated once at start-up
//! (see [`validate_tables`]), so a malformed table is a load-time error.

use crate::GrdbError;

/// Conversion table for one physical quantity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitTable {
    /// Quantity name, used in error messages.
    pub quantity: &'static str,
    /// The standard unit every value is reported in.
    pub standard: &'static str,
    /// Accepted units and their factor relative to `standard`.
    pub factors: &'static [(&'static str, f64)],
}

impl UnitTable {
    /// Factor of `unit` relative to the standard unit.
    pub fn factor(&self, unit: &str) -> Result<f64, GrdbError> {
        self.factors
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, factor)| *factor)
            .ok_or_else(|| GrdbError::UnknownUnit {
                field: self.quantity.to_string(),
                unit: unit.to_string(),
            })
    }

    /// Whether `unit` is accepted by this table.
    #[must_use]
    pub fn accepts(&self, unit: &str) -> bool {
        self.factors.iter().any(|(name, _)| *name == unit)
    }

    /// Express `value` (recorded in `unit`) in the standard unit.
    pub fn to_standard(&self, value: f64, unit: &str) -> Result<f64, GrdbError> {
        Ok(value * self.factor(unit)?)
    }

    /// Express a standard-unit `value` in `unit`.
    pub fn from_standard(&self, value: f64, unit: &str) -> Result<f64, GrdbError> {
        Ok(value / self.factor(unit)?)
    }

    /// Check the table's structural invariants.
    pub fn validate(&self) -> Result<(), GrdbError> {
        let invalid = |reason: String| GrdbError::InvalidUnitTable {
            table: self.quantity.to_string(),
            reason,
        };

        match self.factor(self.standard) {
            Ok(f) if f == 1.0 => {}
            Ok(f) => {
                return Err(invalid(format!(
                    "standard unit '{}' has factor {} (expected 1)",
                    self.standard, f
                )));
            }
            Err(_) => {
                return Err(invalid(format!(
                    "standard unit '{}' missing from table",
                    self.standard
                )));
            }
        }

        for (i, (unit, factor)) in self.factors.iter().enumerate() {
            if unit.is_empty() {
                return Err(invalid("empty unit name".to_string()));
            }
            if !factor.is_finite() || *factor <= 0.0 {
                return Err(invalid(format!("unit '{}' has factor {}", unit, factor)));
            }
            if self.factors[..i].iter().any(|(prev, _)| prev == unit) {
                return Err(invalid(format!("unit '{}' listed twice", unit)));
            }
        }
        Ok(())
    }
}

/// Convert `value` from `from_unit` to `to_unit` using `table`.
///
/// Fails with `UnknownUnit` if either unit is absent from the table.
pub fn convert(
    value: f64,
    from_unit: &str,
    to_unit: &str,
    table: &UnitTable,
) -> Result<f64, GrdbError> {
    let from = table.factor(from_unit)?;
    let to = table.factor(to_unit)?;
    Ok(value * from / to)
}

// =============================================================================
// FIXED TABLES
// =============================================================================

/// Furnace temperature. Only multiplicative conversions are allowed, so no
/// Kelvin or Fahrenheit.
pub const TEMPERATURE: UnitTable = UnitTable {
    quantity: "temperature",
    standard: "C",
    factors: &[("C", 1.0)],
};

pub const PRESSURE: UnitTable = UnitTable {
    quantity: "pressure",
    standard: "Torr",
    factors: &[
        ("Torr", 1.0),
        ("Pa", 1.0 / 133.322),
        ("mbar", 1.0 / 1.33322),
        ("mTorr", 1.0e-3),
    ],
};

pub const FLOW_RATE: UnitTable = UnitTable {
    quantity: "flow rate",
    standard: "sccm",
    factors: &[("sccm", 1.0), ("slm", 1000.0)],
};

pub const DURATION: UnitTable = UnitTable {
    quantity: "duration",
    standard: "min",
    factors: &[("min", 1.0), ("s", 1.0 / 60.0), ("h", 60.0)],
};

pub const THICKNESS: UnitTable = UnitTable {
    quantity: "thickness",
    standard: "um",
    factors: &[("um", 1.0), ("nm", 1.0 / 1000.0), ("mm", 1000.0)],
};

pub const LENGTH: UnitTable = UnitTable {
    quantity: "length",
    standard: "mm",
    factors: &[("mm", 1.0), ("um", 1.0 / 1000.0), ("cm", 10.0)],
};

pub const AREA: UnitTable = UnitTable {
    quantity: "area",
    standard: "mm2",
    factors: &[("mm2", 1.0), ("um2", 1.0e-6), ("cm2", 100.0)],
};

pub const WAVELENGTH: UnitTable = UnitTable {
    quantity: "wavelength",
    standard: "nm",
    factors: &[("nm", 1.0)],
};

/// Every table shipped with the engine.
pub const ALL_TABLES: &[&UnitTable] = &[
    &TEMPERATURE,
    &PRESSURE,
    &FLOW_RATE,
    &DURATION,
    &THICKNESS,
    &LENGTH,
    &AREA,
    &WAVELENGTH,
];

/// Validate every shipped table. Called once at start-up.
pub fn validate_tables() -> Result<(), GrdbError> {
    ALL_TABLES.iter().try_for_each(|table| table.validate())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn shipped_tables_are_valid() {
        assert!(validate_tables().is_ok());
    }

    #[test]
    fn pascal_to_torr() {
        let torr = PRESSURE.to_standard(133.322, "Pa").expect("convert");
        assert!(close(torr, 1.0));
    }

    #[test]
    fn convert_between_non_standard_units() {
        // 1 h = 3600 s
        let s = convert(1.0, "h", "s", &DURATION).expect("convert");
        assert!(close(s, 3600.0));
    }

    #[test]
    fn convert_unknown_unit_fails() {
        let err = convert(1.0, "min", "fortnight", &DURATION).expect_err("unknown");
        assert!(matches!(err, GrdbError::UnknownUnit { ref unit, .. } if unit == "fortnight"));

        let err = convert(1.0, "K", "C", &TEMPERATURE).expect_err("unknown");
        assert!(matches!(err, GrdbError::UnknownUnit { ref unit, .. } if unit == "K"));
    }

    #[test]
    fn round_trip_every_unit() {
        for table in ALL_TABLES {
            for (unit, _) in table.factors {
                for v in [0.0, 1.0, 2.5, 1234.5678, 1.0e-7] {
                    let std = table.to_standard(v, unit).expect("to");
                    let back = table.from_standard(std, unit).expect("from");
                    assert!(close(back, v), "{} {}: {} != {}", table.quantity, unit, back, v);
                }
            }
        }
    }

    #[test]
    fn missing_standard_rejected() {
        let table = UnitTable {
            quantity: "broken",
            standard: "x",
            factors: &[("y", 1.0)],
        };
        assert!(matches!(
            table.validate(),
            Err(GrdbError::InvalidUnitTable { .. })
        ));
    }

    #[test]
    fn duplicate_and_non_positive_factors_rejected() {
        let dup = UnitTable {
            quantity: "dup",
            standard: "a",
            factors: &[("a", 1.0), ("b", 2.0), ("b", 3.0)],
        };
        assert!(dup.validate().is_err());

        let zero = UnitTable {
            quantity: "zero",
            standard: "a",
            factors: &[("a", 1.0), ("b", 0.0)],
        };
        assert!(zero.validate().is_err());
    }
}
