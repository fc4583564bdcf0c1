//! # Primitives
//!
//! Fixed constants of the recipe database. Compiled into the binary and
//! immutable at runtime.

/// Step type whose rows count towards growth metrics.
pub const GROWING_STEP: &str = "Growing";

/// Accepted values of `carbon_source` on recipes and steps.
pub const CARBON_SOURCES: &[&str] = &["CH4", "C2H4", "C2H2", "C6H6"];

/// Accepted values of `Substrate::catalyst`.
pub const CATALYSTS: &[&str] = &["Copper", "Palladium", "Palladium leaf", "Platinum", "Other"];

/// Magic bytes for the grdb snapshot format header.
pub const MAGIC_BYTES: &[u8; 4] = b"GRDB";

/// Current snapshot format version.
///
/// Increment this when making breaking changes to the snapshot format.
pub const FORMAT_VERSION: u8 = 1;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum number of preparation steps in one recipe.
pub const MAX_STEPS_PER_RECIPE: usize = 256;

/// Maximum length of a step name.
pub const MAX_STEP_NAME_LENGTH: usize = 64;

/// Maximum length of a Raman filename.
pub const MAX_FILENAME_LENGTH: usize = 64;

/// Maximum length of a stored URL or object name.
pub const MAX_URL_LENGTH: usize = 2048;

/// Maximum number of Raman files attached to one experiment.
pub const MAX_RAMAN_FILES: usize = 64;

/// Maximum number of recipes accepted in a single ingestion batch.
pub const MAX_INGEST_BATCH: usize = 10_000;

/// Maximum number of conditions in one recipe search.
pub const MAX_QUERY_CONDITIONS: usize = 16;
