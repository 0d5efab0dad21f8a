//! Generate command handler.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use draftflow_core::backend::AnalyzeResponse;
use draftflow_core::request::{
    GenerationRequest, OptionDescriptor, OptionValue, StreamRequest, default_selection,
};
use draftflow_core::{Config, HttpBackend, SessionOutcome, StreamSession};

use crate::interrupt::{self, InterruptedError};

pub struct GenerateOptions<'a> {
    pub config: &'a Config,
    pub prompt: Option<&'a str>,
    pub prompt_file: Option<&'a Path>,
    pub instructions: Option<&'a str>,
    pub plan: Option<&'a Path>,
    pub options: &'a [String],
    pub out: Option<&'a Path>,
    pub export: bool,
    pub timeout_secs: Option<u64>,
}

pub async fn run(options: GenerateOptions<'_>) -> Result<()> {
    let plan = options.plan.map(load_plan).transpose()?;
    let descriptors = plan
        .as_ref()
        .map(|p| p.writing_options.as_slice())
        .unwrap_or_default();

    let system_prompt = match (options.prompt, options.prompt_file, &plan) {
        (Some(prompt), _, _) => prompt.to_string(),
        (None, Some(path), _) => std::fs::read_to_string(path)
            .with_context(|| format!("read prompt file {}", path.display()))?,
        (None, None, Some(plan)) => plan.system_prompt.clone(),
        (None, None, None) => anyhow::bail!("Provide --prompt, --prompt-file or --plan"),
    };

    let mut selected = default_selection(descriptors);
    for raw in options.options {
        let (id, value) = parse_option(descriptors, raw)?;
        selected.insert(id, value);
    }

    let mut request = GenerationRequest::new(system_prompt).with_options(descriptors, selected);
    if let Some(instructions) = options.instructions {
        request = request.with_instructions(instructions);
    }
    let request = StreamRequest::from(request);

    let backend = HttpBackend::from_config(options.config)?;
    let mut session = StreamSession::new(options.config.stream.max_marker_len);
    let watcher = interrupt::cancel_on_interrupt(
        session.cancel_handle(),
        options.timeout_secs.map(Duration::from_secs),
    );

    let mut echo = DeltaEcho::new(std::io::stdout());
    let result = session
        .start(&backend, &request, |text| echo.show(text))
        .await;
    watcher.abort();
    let outcome = result?;
    echo.finish();

    if let Some(content_id) = session.content_id() {
        eprintln!("Content id: {content_id}");
    }

    match outcome {
        SessionOutcome::Completed { text } => {
            if let Some(path) = options.out {
                std::fs::write(path, &text)
                    .with_context(|| format!("write output to {}", path.display()))?;
            }
            if options.export {
                export(&backend, session.content_id()).await?;
            }
            Ok(())
        }
        SessionOutcome::Cancelled { partial } => {
            if let (Some(path), Some(text)) = (options.out, partial) {
                std::fs::write(path, text)
                    .with_context(|| format!("write output to {}", path.display()))?;
            }
            eprintln!("Cancelled.");
            Err(InterruptedError.into())
        }
        SessionOutcome::Failed { error, partial } => {
            let error = anyhow::Error::new(error);
            Err(match partial {
                Some(text) => error.context(format!(
                    "generation failed after {} characters",
                    text.chars().count()
                )),
                None => error.context("generation failed"),
            })
        }
    }
}

/// Echoes the growing text as deltas. A write failure (closed pipe) stops
/// the echo without aborting the stream.
struct DeltaEcho<W> {
    out: W,
    printed: usize,
    closed: bool,
}

impl<W: Write> DeltaEcho<W> {
    fn new(out: W) -> Self {
        Self {
            out,
            printed: 0,
            closed: false,
        }
    }

    fn show(&mut self, text: &str) {
        let delta = &text.as_bytes()[self.printed..];
        self.printed = text.len();
        self.write(delta);
    }

    fn finish(&mut self) {
        if self.printed > 0 {
            self.write(b"\n");
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        if self.closed {
            return;
        }
        if let Err(err) = self.out.write_all(bytes).and_then(|()| self.out.flush()) {
            tracing::debug!(error = %err, "stdout closed; no longer echoing generated text");
            self.closed = true;
        }
    }
}

async fn export(backend: &HttpBackend, content_id: Option<&str>) -> Result<()> {
    let Some(content_id) = content_id else {
        anyhow::bail!("Cannot export: the backend sent no content id");
    };
    let exported = backend.export_content(content_id).await?;
    println!("Download: {}", backend.absolute_url(&exported.download_url)?);
    Ok(())
}

fn load_plan(path: &Path) -> Result<AnalyzeResponse> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read plan {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse plan {}", path.display()))
}

fn parse_option(descriptors: &[OptionDescriptor], raw: &str) -> Result<(String, OptionValue)> {
    let Some((id, value)) = raw.split_once('=') else {
        anyhow::bail!("Invalid option '{raw}': expected id=value");
    };
    let id = id.trim();
    if id.is_empty() {
        anyhow::bail!("Invalid option '{raw}': empty id");
    }

    let value = match descriptors.iter().find(|d| d.id == id) {
        Some(descriptor) => descriptor
            .parse_value(value)
            .map_err(|msg| anyhow::anyhow!("Invalid option: {msg}"))?,
        None if descriptors.is_empty() => OptionValue::Text(value.trim().to_string()),
        None => {
            let known: Vec<&str> = descriptors.iter().map(|d| d.id.as_str()).collect();
            anyhow::bail!("Unknown option '{id}'. Known options: {}", known.join(", "));
        }
    };
    Ok((id.to_string(), value))
}
