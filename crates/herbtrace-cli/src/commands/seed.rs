// crates/herbtrace-cli/src/commands/seed.rs

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use herbtrace_core::identity;
use herbtrace_core::store::TraceStore;
use herbtrace_core::types::Species;
use herbtrace_repository::PostgresStore;

#[derive(Debug, Deserialize)]
struct SeedFile {
    species: Vec<SpeciesEntry>,
}

#[derive(Debug, Deserialize)]
struct SpeciesEntry {
    scientific_name: String,
    /// Omitted codes fall back to the same derivation the batch resolver
    /// uses for unseeded species.
    code: Option<String>,
    #[serde(default)]
    vernacular_names: Vec<String>,
    season_months: Option<Vec<u32>>,
}

pub async fn handle_seed_command(store: &PostgresStore, path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading seed file {}", path.display()))?;
    let seed: SeedFile = toml::from_str(&raw)
        .with_context(|| format!("parsing seed file {}", path.display()))?;

    let mut upserted = 0usize;
    for entry in seed.species {
        let code = match entry.code {
            Some(code) => code,
            None => identity::fallback_species_code(&entry.scientific_name),
        };
        identity::validate_species_code(&code)
            .with_context(|| format!("species '{}'", entry.scientific_name))?;

        let species = Species {
            scientific_name: entry.scientific_name,
            code,
            vernacular_names: entry.vernacular_names,
            season_months: entry.season_months,
        };
        store.upsert_species(&species).await?;
        info!(
            scientific_name = %species.scientific_name,
            code = %species.code,
            "seeded species"
        );
        upserted += 1;
    }

    println!("seeded {upserted} species");
    Ok(())
}
