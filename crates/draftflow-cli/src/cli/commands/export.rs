use std::path::Path;

use anyhow::{Context, Result};
use draftflow_core::{Config, HttpBackend};

pub async fn run(config: &Config, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("read {}", file.display()))?;
    if content.trim().is_empty() {
        anyhow::bail!("Nothing to export: {} is empty", file.display());
    }

    let backend = HttpBackend::from_config(config)?;
    let exported = backend.export_text(&content).await?;
    println!("{}", backend.absolute_url(&exported.download_url)?);
    Ok(())
}
