//! Expand command handler.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use draftflow_core::{Config, HttpBackend, SpliceEditor, SpliceOutcome};

use crate::interrupt::{self, InterruptedError};

pub async fn run(
    config: &Config,
    file: &Path,
    start: usize,
    end: usize,
    in_place: bool,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let mut document =
        std::fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;

    let backend = HttpBackend::from_config(config)?;
    let editor = SpliceEditor::new(config.splice_settings());
    let expansion = editor
        .prepare(&mut document, start, end)
        .with_context(|| format!("select {start}..{end} in {}", file.display()))?;
    let watcher = interrupt::cancel_on_interrupt(
        expansion.cancel_handle(),
        timeout_secs.map(Duration::from_secs),
    );

    // Live view on stderr: only ever print what extends the text already shown.
    let mut shown = String::new();
    let outcome = expansion
        .run(&backend, |view| {
            if let Some(delta) = view.strip_prefix(shown.as_str()) {
                eprint!("{delta}");
                shown.push_str(delta);
            }
        })
        .await;
    watcher.abort();
    eprintln!();

    match outcome {
        SpliceOutcome::Completed { inserted } => {
            tracing::debug!(chars = inserted.chars().count(), "expansion inserted");
            if in_place {
                std::fs::write(file, &document)
                    .with_context(|| format!("write {}", file.display()))?;
                eprintln!("Updated {}", file.display());
            } else {
                print!("{document}");
            }
            Ok(())
        }
        SpliceOutcome::Cancelled => {
            eprintln!("Cancelled; {} left unchanged.", file.display());
            Err(InterruptedError.into())
        }
        SpliceOutcome::Failed { error } => Err(anyhow::Error::new(error).context(format!(
            "expansion failed; {} left unchanged",
            file.display()
        ))),
    }
}
