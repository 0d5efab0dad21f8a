//! Streaming request values and prompt composition.
//!
//! The core treats writing options as opaque key/value pairs: it only
//! renders the caller's selections into the system prompt and forwards them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PreconditionError;

/// Heading placed before the selected-options block in the system prompt.
pub const OPTIONS_HEADING: &str = "【用户选择的配置】";

/// Instructions sent with a generation when the caller gives none.
pub const DEFAULT_INSTRUCTIONS: &str = "Write the article.";

const DEFAULT_RANGE_MIN: i64 = 1000;
const DEFAULT_RANGE_MAX: i64 = 10000;
const DEFAULT_RANGE_VALUE: i64 = 3000;

/// Widget kind of a writing option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionKind {
    Select,
    Toggle,
    Range,
    /// Kinds this client does not know; passed through untouched.
    #[serde(other)]
    Unknown,
}

/// A selected (or default) option value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Flag(bool),
    Number(i64),
    Text(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Flag(v) => write!(f, "{v}"),
            OptionValue::Number(v) => write!(f, "{v}"),
            OptionValue::Text(v) => f.write_str(v),
        }
    }
}

/// Option descriptor as returned by the analyze collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionDescriptor {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: OptionKind,
    /// Choices for `select` options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<OptionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_val: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_val: Option<i64>,
}

impl OptionDescriptor {
    /// The value preselected for this option, if any.
    pub fn default_value(&self) -> Option<OptionValue> {
        match self.kind {
            OptionKind::Select => {
                let choices = self.options.as_deref().unwrap_or_default();
                let preferred = match &self.default {
                    Some(OptionValue::Text(text)) => choices.iter().find(|c| *c == text),
                    _ => None,
                };
                preferred
                    .or_else(|| choices.first())
                    .map(|c| OptionValue::Text(c.clone()))
            }
            OptionKind::Toggle => {
                let on = match &self.default {
                    Some(OptionValue::Flag(v)) => *v,
                    Some(OptionValue::Text(text)) => parse_flag(text) == Some(true),
                    _ => false,
                };
                Some(OptionValue::Flag(on))
            }
            OptionKind::Range => {
                let value = match &self.default {
                    Some(OptionValue::Number(n)) => *n,
                    Some(OptionValue::Text(text)) => {
                        text.trim().parse().unwrap_or(DEFAULT_RANGE_VALUE)
                    }
                    _ => DEFAULT_RANGE_VALUE,
                };
                Some(OptionValue::Number(self.clamp(value)))
            }
            OptionKind::Unknown => None,
        }
    }

    /// Parses a user-supplied value according to the option kind.
    ///
    /// # Errors
    /// Returns a message describing why the value does not fit the option.
    pub fn parse_value(&self, raw: &str) -> Result<OptionValue, String> {
        let raw = raw.trim();
        match self.kind {
            OptionKind::Toggle => parse_flag(raw)
                .map(OptionValue::Flag)
                .ok_or_else(|| format!("'{raw}' is not a yes/no value for {}", self.id)),
            OptionKind::Range => raw
                .parse::<i64>()
                .map(|n| OptionValue::Number(self.clamp(n)))
                .map_err(|_| format!("'{raw}' is not a number for {}", self.id)),
            OptionKind::Select => match self.options.as_deref() {
                Some(choices) if !choices.iter().any(|c| c == raw) => Err(format!(
                    "'{raw}' is not one of {} for {}",
                    choices.join(" / "),
                    self.id
                )),
                _ => Ok(OptionValue::Text(raw.to_string())),
            },
            OptionKind::Unknown => Ok(OptionValue::Text(raw.to_string())),
        }
    }

    fn clamp(&self, value: i64) -> i64 {
        let min = self.min_val.unwrap_or(DEFAULT_RANGE_MIN);
        let max = self.max_val.unwrap_or(DEFAULT_RANGE_MAX).max(min);
        value.clamp(min, max)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "是" | "true" | "yes" | "y" | "on" | "1" => Some(true),
        "否" | "false" | "no" | "n" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Caller's final option choices, keyed by option id.
pub type SelectedOptions = BTreeMap<String, OptionValue>;

/// Default selection for every option that has one.
pub fn default_selection(descriptors: &[OptionDescriptor]) -> SelectedOptions {
    descriptors
        .iter()
        .filter_map(|d| d.default_value().map(|v| (d.id.clone(), v)))
        .collect()
}

/// Appends the selected options to `base` as `label: value` lines.
///
/// Options are listed in descriptor order; selections without a descriptor
/// follow, keyed by id.
pub fn compose_system_prompt(
    base: &str,
    descriptors: &[OptionDescriptor],
    selected: &SelectedOptions,
) -> String {
    if selected.is_empty() {
        return base.to_string();
    }

    let mut prompt = format!("{base}\n\n{OPTIONS_HEADING}\n");
    for descriptor in descriptors {
        if let Some(value) = selected.get(&descriptor.id) {
            prompt.push_str(&format!("{}: {value}\n", descriptor.label));
        }
    }
    for (id, value) in selected {
        if !descriptors.iter().any(|d| &d.id == id) {
            prompt.push_str(&format!("{id}: {value}\n"));
        }
    }
    prompt
}

/// Full-document generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_options: Option<SelectedOptions>,
}

impl GenerationRequest {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_instructions: DEFAULT_INSTRUCTIONS.to_string(),
            selected_options: None,
        }
    }

    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.user_instructions = instructions.into();
        self
    }

    /// Renders `selected` into the system prompt and attaches it to the request.
    #[must_use]
    pub fn with_options(
        mut self,
        descriptors: &[OptionDescriptor],
        selected: SelectedOptions,
    ) -> Self {
        self.system_prompt = compose_system_prompt(&self.system_prompt, descriptors, &selected);
        self.selected_options = (!selected.is_empty()).then_some(selected);
        self
    }
}

/// Selection-scoped expansion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandRequest {
    pub selected_text: String,
    #[serde(default)]
    pub context: String,
}

/// Anything a transport can stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRequest {
    Generate(GenerationRequest),
    Expand(ExpandRequest),
}

impl StreamRequest {
    /// Checks the request before any stream is opened.
    ///
    /// # Errors
    /// Returns `PreconditionError::EmptyPrompt` when there is nothing to send.
    pub fn validate(&self) -> Result<(), PreconditionError> {
        let text = match self {
            StreamRequest::Generate(req) => &req.system_prompt,
            StreamRequest::Expand(req) => &req.selected_text,
        };
        if text.trim().is_empty() {
            return Err(PreconditionError::EmptyPrompt);
        }
        Ok(())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamRequest::Generate(_) => "generate",
            StreamRequest::Expand(_) => "expand",
        }
    }
}

impl From<GenerationRequest> for StreamRequest {
    fn from(req: GenerationRequest) -> Self {
        StreamRequest::Generate(req)
    }
}

impl From<ExpandRequest> for StreamRequest {
    fn from(req: ExpandRequest) -> Self {
        StreamRequest::Expand(req)
    }
}
