//! # CLI Command Implementations

use crate::api;
use crate::config::{Backend, Config};
use crate::remote::SpectrumFetcher;
use grdb_core::formats::{MAX_SNAPSHOT_SIZE, store_from_bytes, store_to_bytes};
use grdb_core::{
    Catalog, GrdbError, MetricReport, NewExperiment, NewRecipe, RamanFileId, RecipeId,
    RecipeQuery, RecipeReport, Strategy,
};
use serde::Serialize;
use std::path::{Path, PathBuf};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum file size for ingestion (100 MB).
const MAX_INGEST_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), GrdbError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| GrdbError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(GrdbError::SerializationError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Canonicalize an input path and require a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, GrdbError> {
    let canonical = path.canonicalize().map_err(|e| {
        GrdbError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(GrdbError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), GrdbError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| GrdbError::SerializationError(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(config: &Config) -> Result<(), GrdbError> {
    let catalog = open_catalog(config)?;

    println!("grdb Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Address:  {}", config.server.addr());
    println!("  Backend:  {}", config.storage.backend);
    println!("  Database: {:?}", config.storage.path);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    api::run_server(config, catalog).await
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show store counts.
pub fn cmd_status(config: &Config, json_mode: bool) -> Result<(), GrdbError> {
    let catalog = open_catalog(config)?;
    let stats = catalog.stats()?;

    if json_mode {
        return print_json(&serde_json::json!({
            "database": config.storage.path.to_string_lossy(),
            "backend": config.storage.backend.to_string(),
            "recipes": stats.recipes,
            "steps": stats.steps,
            "raman_files": stats.raman_files,
            "metrics": catalog.registry().len(),
        }));
    }

    println!("grdb Status");
    println!("===========");
    println!("Database: {:?}", config.storage.path);
    println!("Backend:  {}", config.storage.backend);
    println!();
    println!("Recipes:     {}", stats.recipes);
    println!("Steps:       {}", stats.steps);
    println!("Raman files: {}", stats.raman_files);
    println!("Metrics:     {}", catalog.registry().len());

    Ok(())
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize new database.
pub fn cmd_init(config: &Config, force: bool) -> Result<(), GrdbError> {
    let path = &config.storage.path;
    if path.exists() && !force {
        return Err(GrdbError::InvalidInput(
            "Database already exists. Use --force to overwrite.".to_string(),
        ));
    }
    if path.exists() {
        std::fs::remove_file(path)
            .map_err(|e| GrdbError::IoError(format!("Remove old database: {}", e)))?;
    }

    match config.storage.backend {
        Backend::Redb => {
            Catalog::with_redb(path)?;
            println!("Initialized new redb database at {:?}", path);
        }
        Backend::File => {
            save_catalog(&Catalog::new()?, config)?;
            println!("Initialized new file database at {:?}", path);
        }
    }

    Ok(())
}

// =============================================================================
// INGEST COMMAND
// =============================================================================

/// Accept a single object or an array of them.
fn parse_records<T: serde::de::DeserializeOwned>(contents: &[u8]) -> Result<Vec<T>, GrdbError> {
    let value: serde_json::Value = serde_json::from_slice(contents)
        .map_err(|e| GrdbError::SerializationError(format!("Invalid JSON: {}", e)))?;
    let result = if value.is_array() {
        serde_json::from_value(value)
    } else {
        serde_json::from_value(value).map(|one| vec![one])
    };
    result.map_err(|e| GrdbError::InvalidInput(e.to_string()))
}

/// Ingest recipes or experiments from a JSON file.
pub fn cmd_ingest(
    config: &Config,
    json_mode: bool,
    file: &Path,
    experiments: bool,
) -> Result<(), GrdbError> {
    tracing::info!("Ingesting from {:?}", file);

    let validated_path = validate_file_path(file)?;
    validate_file_size(&validated_path, MAX_INGEST_FILE_SIZE)?;
    let contents = std::fs::read(&validated_path)
        .map_err(|e| GrdbError::IoError(format!("Read file: {}", e)))?;

    let mut catalog = open_catalog(config)?;
    let ids: Vec<u64> = if experiments {
        let records: Vec<NewExperiment> = parse_records(&contents)?;
        let mut ids = Vec::with_capacity(records.len());
        for (i, experiment) in records.iter().enumerate() {
            let id = catalog.ingest_experiment(experiment).map_err(|e| match e {
                GrdbError::InvalidInput(msg) => {
                    GrdbError::InvalidInput(format!("experiment #{}: {}", i, msg))
                }
                other => other,
            })?;
            ids.push(id.0);
        }
        ids
    } else {
        let records: Vec<NewRecipe> = parse_records(&contents)?;
        catalog
            .ingest_batch(&records)?
            .into_iter()
            .map(|id| id.0)
            .collect()
    };
    save_catalog(&catalog, config)?;

    if json_mode {
        return print_json(&serde_json::json!({ "ids": ids }));
    }
    let kind = if experiments { "experiments" } else { "recipes" };
    println!("Ingested {} {}", ids.len(), kind);
    if let (Some(first), Some(last)) = (ids.first(), ids.last()) {
        println!("Assigned IDs {}..={}", first, last);
    }
    Ok(())
}

// =============================================================================
// LIST / SHOW / METRIC COMMANDS
// =============================================================================

fn format_metric(report: &MetricReport) -> String {
    match (&report.value, &report.error) {
        (_, Some(error)) => format!("error: {}", error),
        (None, None) => "-".to_string(),
        (Some(value), None) => match &report.unit {
            Some(unit) => format!("{} {}", value, unit),
            None => value.to_string(),
        },
    }
}

fn print_recipe(report: &RecipeReport) {
    println!("Recipe {}", report.id.0);
    if let Some(source) = &report.carbon_source {
        println!("  carbon_source: {}", source);
    }
    if let Some(pressure) = report.base_pressure.value {
        println!("  base_pressure: {} {}", pressure, report.base_pressure.unit);
    }
    for (name, metric) in &report.metrics {
        println!("  {:<26} {}", name, format_metric(metric));
    }
}

/// List recipes with their metrics.
pub fn cmd_list(config: &Config, json_mode: bool, strategy: Strategy) -> Result<(), GrdbError> {
    let catalog = open_catalog(config)?;
    let reports = catalog.list(strategy)?;

    if json_mode {
        return print_json(&reports);
    }
    if reports.is_empty() {
        println!("No recipes");
    }
    for report in &reports {
        print_recipe(report);
    }
    Ok(())
}

/// Show one recipe.
pub fn cmd_show(
    config: &Config,
    json_mode: bool,
    id: u64,
    strategy: Strategy,
) -> Result<(), GrdbError> {
    let catalog = open_catalog(config)?;
    let report = catalog.recipe_report(RecipeId(id), strategy)?;

    if json_mode {
        return print_json(&report);
    }
    print_recipe(&report);
    if let Some(steps) = &report.preparation_steps {
        println!("  steps:");
        for (i, step) in steps.iter().enumerate() {
            println!("    {}. {}", i + 1, step.name.as_deref().unwrap_or("(unnamed)"));
        }
    }
    Ok(())
}

/// Evaluate one metric.
pub fn cmd_metric(
    config: &Config,
    json_mode: bool,
    name: &str,
    id: u64,
    strategy: Strategy,
) -> Result<(), GrdbError> {
    let catalog = open_catalog(config)?;
    let def = catalog.registry().require(name)?;
    let outcome = catalog.evaluate(name, RecipeId(id), strategy)?;
    let report = MetricReport::from_outcome(def, &outcome);

    if json_mode {
        return print_json(&report);
    }
    println!("{} [{}] = {}", name, strategy, format_metric(&report));
    Ok(())
}

// =============================================================================
// EXPLAIN / SEARCH COMMANDS
// =============================================================================

/// Print the compiled pushdown expression.
pub fn cmd_explain(config: &Config, name: &str) -> Result<(), GrdbError> {
    let catalog = open_catalog(config)?;
    println!("{}", catalog.explain(name)?);
    Ok(())
}

/// Filter recipes by metric conditions.
pub fn cmd_search(
    config: &Config,
    json_mode: bool,
    conditions: &[String],
) -> Result<(), GrdbError> {
    let query = RecipeQuery::parse_all(conditions)?;
    let catalog = open_catalog(config)?;
    let ids = catalog.search(&query)?;

    if json_mode {
        let ids: Vec<u64> = ids.iter().map(|id| id.0).collect();
        return print_json(&serde_json::json!({ "count": ids.len(), "ids": ids }));
    }
    println!("{} matching recipes", ids.len());
    for id in ids {
        println!("  {}", id.0);
    }
    Ok(())
}

// =============================================================================
// DELETE / VERIFY COMMANDS
// =============================================================================

/// Delete a recipe.
pub fn cmd_delete(config: &Config, id: u64) -> Result<(), GrdbError> {
    let mut catalog = open_catalog(config)?;
    catalog.delete_recipe(RecipeId(id))?;
    save_catalog(&catalog, config)?;
    println!("Deleted recipe {}", id);
    Ok(())
}

/// Cross-check both evaluators; fails when they diverge.
pub fn cmd_verify(config: &Config, json_mode: bool) -> Result<(), GrdbError> {
    let catalog = open_catalog(config)?;
    let report = catalog.verify()?;

    if json_mode {
        print_json(&report)?;
    } else {
        println!(
            "Checked {} metrics over {} recipes",
            report.metrics_checked, report.recipes_checked
        );
        for d in &report.divergences {
            println!(
                "  recipe {} {}: memory {:?} / pushdown {:?}",
                d.recipe.0, d.metric, d.in_memory, d.pushdown
            );
        }
    }

    if report.is_equivalent() {
        Ok(())
    } else {
        Err(GrdbError::InvalidInput(format!(
            "{} divergences between evaluators",
            report.divergences.len()
        )))
    }
}

// =============================================================================
// SPECTRUM COMMAND
// =============================================================================

/// Retrieve a Raman spectrum, caching a newly signed URL.
pub async fn cmd_spectrum(config: &Config, json_mode: bool, id: u64) -> Result<(), GrdbError> {
    let id = RamanFileId(id);
    let fetcher = SpectrumFetcher::new(&config.remote)?;

    let mut catalog = open_catalog(config)?;
    let file = catalog.raman_file(id)?;
    let resolved = fetcher.resolve(&file).await?;
    if resolved.newly_signed {
        catalog.cache_raman_url(id, &resolved.url)?;
        save_catalog(&catalog, config)?;
    }

    let data = fetcher.fetch(&resolved.url).await?;
    if json_mode {
        return print_json(&serde_json::json!({ "data": data }));
    }
    for point in &data {
        println!("{}\t{}", point.x, point.y);
    }
    Ok(())
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Open the configured store.
pub fn open_catalog(config: &Config) -> Result<Catalog, GrdbError> {
    let path = &config.storage.path;
    match config.storage.backend {
        Backend::Redb => Catalog::with_redb(path),
        Backend::File if path.exists() => {
            validate_file_size(path, MAX_SNAPSHOT_SIZE as u64)?;
            let data = std::fs::read(path)
                .map_err(|e| GrdbError::IoError(format!("Read db: {}", e)))?;
            Catalog::with_store(store_from_bytes(&data)?)
        }
        Backend::File => Catalog::new(),
    }
}

/// Write the store back (file backend; redb commits on every write).
pub fn save_catalog(catalog: &Catalog, config: &Config) -> Result<(), GrdbError> {
    let Some(store) = catalog.memory_store() else {
        return Ok(());
    };
    let data = store_to_bytes(store)?;
    std::fs::write(&config.storage.path, data)
        .map_err(|e| GrdbError::IoError(format!("Write db: {}", e)))
}

// =============================================================================
// TESTS
// =============================================================================
