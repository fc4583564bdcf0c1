//! # Ingestor Module
//!
//! Load-time validation of incoming recipes and experiments.
//!
//! - Every measurement's unit must be in its field's table; an unknown unit
//!   is rejected here, before it can reach a stored row
//! - Values must be finite
//! - Choice fields (carbon source, catalyst) must be one of the fixed choices
//! - Batches are validated completely before the first write

use crate::fields::StepField;
use crate::primitives::{
    CARBON_SOURCES, CATALYSTS, MAX_FILENAME_LENGTH, MAX_INGEST_BATCH, MAX_RAMAN_FILES,
    MAX_STEP_NAME_LENGTH, MAX_STEPS_PER_RECIPE, MAX_URL_LENGTH,
};
use crate::store::RecipeStore;
use crate::units::{AREA, LENGTH, PRESSURE, THICKNESS, UnitTable, WAVELENGTH};
use crate::{
    ExperimentId, GrdbError, Measurement, NewExperiment, NewRamanFile, NewRecipe,
    PreparationStep, RecipeId, Substrate,
};

/// Validates and stores incoming records.
pub struct Ingestor;

fn check_measurement(
    field: &str,
    measurement: Option<&Measurement>,
    table: &UnitTable,
) -> Result<(), GrdbError> {
    let Some(m) = measurement else {
        return Ok(());
    };
    if !table.accepts(&m.unit) {
        return Err(GrdbError::UnknownUnit {
            field: field.to_string(),
            unit: m.unit.clone(),
        });
    }
    if !m.value.is_finite() {
        return Err(GrdbError::InvalidInput(format!(
            "{} must be a finite number",
            field
        )));
    }
    Ok(())
}

fn check_choice(field: &str, value: Option<&str>, choices: &[&str]) -> Result<(), GrdbError> {
    match value {
        Some(v) if !choices.contains(&v) => Err(GrdbError::InvalidInput(format!(
            "{} must be one of {}, got '{}'",
            field,
            choices.join(", "),
            v
        ))),
        _ => Ok(()),
    }
}

fn check_length(field: &str, value: &str, max: usize) -> Result<(), GrdbError> {
    if value.len() > max {
        return Err(GrdbError::InvalidInput(format!(
            "{} exceeds {} bytes",
            field, max
        )));
    }
    Ok(())
}

impl Ingestor {
    /// Validate one preparation step.
    pub fn validate_step(step: &PreparationStep) -> Result<(), GrdbError> {
        if let Some(name) = &step.name {
            if name.trim().is_empty() {
                return Err(GrdbError::InvalidInput(
                    "step name must not be blank".to_string(),
                ));
            }
            check_length("step name", name, MAX_STEP_NAME_LENGTH)?;
        }
        check_choice("carbon_source", step.carbon_source.as_deref(), CARBON_SOURCES)?;
        for field in StepField::ALL {
            check_measurement(field.name(), field.get(step), field.units())?;
        }
        Ok(())
    }

    /// Validate a recipe and all of its steps.
    pub fn validate_recipe(recipe: &NewRecipe) -> Result<(), GrdbError> {
        if recipe.preparation_steps.len() > MAX_STEPS_PER_RECIPE {
            return Err(GrdbError::InvalidInput(format!(
                "a recipe holds at most {} steps",
                MAX_STEPS_PER_RECIPE
            )));
        }
        check_choice("carbon_source", recipe.carbon_source.as_deref(), CARBON_SOURCES)?;
        check_measurement("base_pressure", recipe.base_pressure.as_ref(), &PRESSURE)?;
        for step in &recipe.preparation_steps {
            Self::validate_step(step)?;
        }
        Ok(())
    }

    pub fn validate_substrate(substrate: &Substrate) -> Result<(), GrdbError> {
        check_choice("catalyst", substrate.catalyst.as_deref(), CATALYSTS)?;
        check_measurement("thickness", substrate.thickness.as_ref(), &THICKNESS)?;
        check_measurement("diameter", substrate.diameter.as_ref(), &LENGTH)?;
        check_measurement("length", substrate.length.as_ref(), &LENGTH)?;
        check_measurement("surface_area", substrate.surface_area.as_ref(), &AREA)?;
        Ok(())
    }

    pub fn validate_raman_file(file: &NewRamanFile) -> Result<(), GrdbError> {
        if file.filename.trim().is_empty() {
            return Err(GrdbError::InvalidInput(
                "filename must not be blank".to_string(),
            ));
        }
        check_length("filename", &file.filename, MAX_FILENAME_LENGTH)?;
        if let Some(url) = &file.url {
            check_length("url", url, MAX_URL_LENGTH)?;
        }
        if let Some(object) = &file.s3_object_name {
            check_length("s3_object_name", object, MAX_URL_LENGTH)?;
        }
        check_measurement("wavelength", file.wavelength.as_ref(), &WAVELENGTH)?;
        Ok(())
    }

    /// Validate an experiment, its substrate and its Raman files.
    pub fn validate_experiment(experiment: &NewExperiment) -> Result<(), GrdbError> {
        if experiment.raman_files.len() > MAX_RAMAN_FILES {
            return Err(GrdbError::InvalidInput(format!(
                "an experiment holds at most {} Raman files",
                MAX_RAMAN_FILES
            )));
        }
        if let Some(substrate) = &experiment.substrate {
            Self::validate_substrate(substrate)?;
        }
        for file in &experiment.raman_files {
            Self::validate_raman_file(file)?;
        }
        Ok(())
    }

    /// Validate and store one recipe.
    pub fn ingest_recipe<S: RecipeStore + ?Sized>(
        store: &mut S,
        recipe: &NewRecipe,
    ) -> Result<RecipeId, GrdbError> {
        Self::validate_recipe(recipe)?;
        store.insert_recipe(recipe)
    }

    /// Validate a whole batch, then store it.
    ///
    /// If any recipe is invalid, nothing is written.
    pub fn ingest_batch<S: RecipeStore + ?Sized>(
        store: &mut S,
        recipes: &[NewRecipe],
    ) -> Result<Vec<RecipeId>, GrdbError> {
        if recipes.len() > MAX_INGEST_BATCH {
            return Err(GrdbError::InvalidInput(format!(
                "a batch holds at most {} recipes",
                MAX_INGEST_BATCH
            )));
        }
        for (i, recipe) in recipes.iter().enumerate() {
            Self::validate_recipe(recipe).map_err(|e| match e {
                GrdbError::InvalidInput(reason) => {
                    GrdbError::InvalidInput(format!("recipe #{}: {}", i, reason))
                }
                other => other,
            })?;
        }

        let mut ids = Vec::with_capacity(recipes.len());
        for recipe in recipes {
            ids.push(store.insert_recipe(recipe)?);
        }
        tracing::debug!(count = ids.len(), "ingested recipe batch");
        Ok(ids)
    }

    /// Validate and store one experiment.
    pub fn ingest_experiment<S: RecipeStore + ?Sized>(
        store: &mut S,
        experiment: &NewExperiment,
    ) -> Result<ExperimentId, GrdbError> {
        Self::validate_experiment(experiment)?;
        store.insert_experiment(experiment)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    fn step_with(field: StepField, value: f64, unit: &str) -> PreparationStep {
        let mut step = PreparationStep::named("Growing");
        *field.slot(&mut step) = Some(Measurement::new(value, unit));
        step
    }

    #[test]
    fn valid_recipe_passes() {
        let recipe = NewRecipe {
            carbon_source: Some("CH4".to_string()),
            base_pressure: Some(Measurement::new(10.0, "mTorr")),
            preparation_steps: vec![step_with(StepField::Duration, 30.0, "min")],
        };
        assert!(Ingestor::validate_recipe(&recipe).is_ok());
    }

    #[test]
    fn unknown_unit_rejected_at_load_time() {
        let recipe = NewRecipe::with_steps(vec![step_with(StepField::ArgonFlowRate, 1.0, "L/min")]);
        assert_eq!(
            Ingestor::validate_recipe(&recipe),
            Err(GrdbError::UnknownUnit {
                field: "argon_flow_rate".to_string(),
                unit: "L/min".to_string()
            })
        );
    }

    #[test]
    fn non_finite_value_rejected() {
        let recipe = NewRecipe::with_steps(vec![step_with(StepField::Duration, f64::NAN, "min")]);
        assert!(matches!(
            Ingestor::validate_recipe(&recipe),
            Err(GrdbError::InvalidInput(_))
        ));
    }

    #[test]
    fn carbon_source_must_be_a_choice() {
        let recipe = NewRecipe {
            carbon_source: Some("Coal".to_string()),
            ..NewRecipe::default()
        };
        assert!(matches!(
            Ingestor::validate_recipe(&recipe),
            Err(GrdbError::InvalidInput(_))
        ));
    }

    #[test]
    fn blank_step_name_rejected() {
        let recipe = NewRecipe::with_steps(vec![PreparationStep::named("  ")]);
        assert!(Ingestor::validate_recipe(&recipe).is_err());
    }

    #[test]
    fn too_many_steps_rejected() {
        let recipe = NewRecipe::with_steps(vec![
            PreparationStep::default();
            MAX_STEPS_PER_RECIPE + 1
        ]);
        assert!(Ingestor::validate_recipe(&recipe).is_err());
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let mut store = MemoryStore::new();
        let good = NewRecipe::with_steps(vec![step_with(StepField::Duration, 1.0, "h")]);
        let bad = NewRecipe::with_steps(vec![step_with(StepField::Duration, 1.0, "days")]);

        let result = Ingestor::ingest_batch(&mut store, &[good.clone(), bad]);
        assert!(matches!(result, Err(GrdbError::UnknownUnit { .. })));
        assert_eq!(store.recipe_count().expect("count"), 0);

        let ids = Ingestor::ingest_batch(&mut store, &[good.clone(), good]).expect("ingest");
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn substrate_units_checked() {
        let substrate = Substrate {
            catalyst: Some("Copper".to_string()),
            thickness: Some(Measurement::new(25.0, "um")),
            diameter: Some(Measurement::new(1.0, "furlong")),
            ..Substrate::default()
        };
        assert!(matches!(
            Ingestor::validate_substrate(&substrate),
            Err(GrdbError::UnknownUnit { ref field, .. }) if field == "diameter"
        ));
    }

    #[test]
    fn raman_file_limits() {
        let file = NewRamanFile {
            filename: "x".repeat(MAX_FILENAME_LENGTH + 1),
            ..NewRamanFile::default()
        };
        assert!(Ingestor::validate_raman_file(&file).is_err());

        let file = NewRamanFile {
            filename: "spectrum.txt".to_string(),
            wavelength: Some(Measurement::new(532.0, "nm")),
            ..NewRamanFile::default()
        };
        assert!(Ingestor::validate_raman_file(&file).is_ok());
    }

    #[test]
    fn experiment_ingestion_validates_first() {
        let mut store = MemoryStore::new();
        let experiment = NewExperiment {
            raman_files: vec![NewRamanFile::default()],
            ..NewExperiment::default()
        };
        assert!(Ingestor::ingest_experiment(&mut store, &experiment).is_err());
        assert_eq!(store.raman_file_count().expect("count"), 0);
    }
}
