//! Analyze command handler.

use std::path::Path;

use anyhow::{Context, Result};
use draftflow_core::backend::{AnalyzeRequest, AnalyzeResponse};
use draftflow_core::request::{OptionDescriptor, OptionKind};
use draftflow_core::{Config, HttpBackend};

pub async fn run(config: &Config, topic: &str, file: Option<&Path>, json: bool) -> Result<()> {
    let backend = HttpBackend::from_config(config)?;

    let (file_content, filename) = match file {
        Some(path) => {
            let uploaded = backend.upload(path).await?;
            eprintln!("Uploaded {}", uploaded.filename);
            (Some(uploaded.content_preview), Some(uploaded.filename))
        }
        None => (None, None),
    };

    let plan = backend
        .analyze(&AnalyzeRequest {
            topic: topic.to_string(),
            file_content,
            filename,
        })
        .await?;

    if json {
        let rendered = serde_json::to_string_pretty(&plan).context("serialize plan")?;
        println!("{rendered}");
    } else {
        print!("{}", render_plan(&plan));
    }
    Ok(())
}

fn render_plan(plan: &AnalyzeResponse) -> String {
    let mut out = format!("Persona: {}\nType: {}\n", plan.persona, plan.article_type);

    if !plan.content_outline.is_empty() {
        out.push_str("\nOutline:\n");
        for (idx, item) in plan.content_outline.iter().enumerate() {
            out.push_str(&format!("  {}. {item}\n", idx + 1));
        }
    }

    if !plan.writing_options.is_empty() {
        out.push_str("\nOptions:\n");
        for option in &plan.writing_options {
            out.push_str(&format!("  {:<16} {}{}\n", option.id, option.label, describe(option)));
        }
    }

    out.push_str(&format!("\nSystem prompt:\n{}\n", plan.system_prompt));
    out
}

fn describe(option: &OptionDescriptor) -> String {
    let shape = match option.kind {
        OptionKind::Select => option
            .options
            .as_ref()
            .map(|choices| format!(" [{}]", choices.join(" | ")))
            .unwrap_or_default(),
        OptionKind::Toggle => " [yes | no]".to_string(),
        OptionKind::Range => format!(
            " [{}..{}]",
            option.min_val.map(|v| v.to_string()).unwrap_or_default(),
            option.max_val.map(|v| v.to_string()).unwrap_or_default()
        ),
        OptionKind::Unknown => String::new(),
    };
    match option.default_value() {
        Some(value) => format!("{shape} default: {value}"),
        None => shape,
    }
}
