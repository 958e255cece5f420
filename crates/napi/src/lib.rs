//! Node.js bindings for the SFT serializer.
//!
//! Tokenization stays on the JavaScript side: rendering returns text
//! segments, and truncation and assembly operate on token ids the caller has
//! already produced.

use napi::bindgen_prelude::*;
use napi_derive::napi;

use sft_serializer_core::{
    self as sft, Budget, MaskOptions, PreprocessConfig, Record, Task, TaskKind, TokenSegment,
    TruncationPolicy,
};

/// A role-tagged text segment.
#[napi(object)]
pub struct Segment {
    pub role: String,
    pub text: String,
}

impl From<sft::Segment> for Segment {
    fn from(segment: sft::Segment) -> Self {
        Self {
            role: format!("{:?}", segment.role).to_lowercase(),
            text: segment.text,
        }
    }
}

/// One rendered (prompt, target) pair.
#[napi(object)]
pub struct RenderedPrompt {
    /// Fixed segments before the truncatable body.
    pub header: Vec<Segment>,
    pub body: Vec<Segment>,
    /// Fixed segments after the body.
    pub trailer: Vec<Segment>,
    pub target: Segment,
}

impl From<sft::RenderedPrompt> for RenderedPrompt {
    fn from(prompt: sft::RenderedPrompt) -> Self {
        Self {
            header: prompt.header.into_iter().map(Into::into).collect(),
            body: prompt.body.into_iter().map(Into::into).collect(),
            trailer: prompt.trailer.into_iter().map(Into::into).collect(),
            target: prompt.target.into(),
        }
    }
}

/// Options for the PromptRenderer.
/// All fields are optional; unspecified values use core defaults.
#[napi(object)]
pub struct RendererOptions {
    /// "completion", "chat" or "summarization".
    pub task: Option<String>,
    /// "intel" or "chatml".
    pub chat_template: Option<String>,
    pub system_prompt: Option<String>,
    /// Eos literal closing chat turns in the intel layout.
    pub eos_token: Option<String>,
}

/// A fixed-length training example.
#[napi(object)]
pub struct TrainingExample {
    pub input_ids: Vec<u32>,
    pub labels: Vec<i64>,
    pub attention_mask: Vec<u32>,
}

impl From<sft::TrainingExample> for TrainingExample {
    fn from(example: sft::TrainingExample) -> Self {
        Self {
            input_ids: example.input_ids,
            labels: example.labels,
            attention_mask: example.attention_mask.into_iter().map(u32::from).collect(),
        }
    }
}

/// Options for `assemble`.
#[napi(object)]
pub struct AssembleOptions {
    pub max_source_length: u32,
    pub max_seq_length: u32,
    pub train_on_inputs: Option<bool>,
    pub ignore_index: Option<i64>,
}

fn to_napi_error(err: sft::SerializerError) -> Error {
    Error::from_reason(err.to_string())
}

/// Renders raw records into prompt segments for one task.
#[napi]
pub struct PromptRenderer {
    task: Task,
}

#[napi]
impl PromptRenderer {
    /// Create a renderer.
    ///
    /// @param options - Optional configuration options.
    #[napi(constructor)]
    pub fn new(options: Option<RendererOptions>) -> Result<Self> {
        let mut config = PreprocessConfig::default();
        let mut eos_token = "</s>".to_string();

        if let Some(opts) = options {
            if let Some(task) = opts.task {
                config.task = task.parse::<TaskKind>().map_err(to_napi_error)?;
            }
            if let Some(kind) = opts.chat_template {
                config.chat_template = serde_json::from_value(serde_json::Value::String(kind))
                    .map_err(|e| Error::from_reason(format!("invalid chatTemplate: {}", e)))?;
            }
            config.system_prompt = opts.system_prompt;
            if let Some(eos) = opts.eos_token {
                eos_token = eos;
            }
        }

        Ok(Self {
            task: Task::from_config(&config, &eos_token),
        })
    }

    /// Render a record given as a JSON string.
    ///
    /// @param recordJson - The raw record, e.g. `{"messages": [...]}`.
    #[napi]
    pub fn render(&self, record_json: String) -> Result<Vec<RenderedPrompt>> {
        let value: serde_json::Value = serde_json::from_str(&record_json)
            .map_err(|e| Error::from_reason(format!("invalid record JSON: {}", e)))?;
        let record = Record::try_from(value).map_err(to_napi_error)?;
        let prompts = self.task.render(&record).map_err(to_napi_error)?;
        Ok(prompts.into_iter().map(Into::into).collect())
    }
}

/// Fit tokenized segments into a budget, dropping the oldest first.
///
/// @param segments - Token ids per segment, oldest first.
/// @param budget - Maximum number of tokens.
/// @param tailPreserve - Final tokens kept when a single segment must be cut (default 3).
/// @param keepHead - Keep the head of the concatenation instead of dropping segments.
#[napi]
pub fn fit_to_budget(
    segments: Vec<Vec<u32>>,
    budget: u32,
    tail_preserve: Option<u32>,
    keep_head: Option<bool>,
) -> Vec<u32> {
    let segments: Vec<TokenSegment> = segments
        .into_iter()
        .map(|ids| TokenSegment::new(sft::Role::User, ids))
        .collect();
    let policy = if keep_head.unwrap_or(false) {
        TruncationPolicy::KeepHead
    } else {
        TruncationPolicy::DropOldest {
            tail_preserve: tail_preserve.map_or(sft::DEFAULT_TAIL_PRESERVE, |v| v as usize),
        }
    };
    sft::fit_to_budget(&segments, budget as usize, policy)
}

/// Assemble a padded, loss-masked example from prompt and response ids.
#[napi]
pub fn assemble(
    prompt_ids: Vec<u32>,
    response_ids: Vec<u32>,
    eos_id: u32,
    options: AssembleOptions,
) -> Result<TrainingExample> {
    let budget = Budget::new(options.max_source_length as usize, options.max_seq_length as usize)
        .map_err(to_napi_error)?;
    let mask = MaskOptions {
        train_on_inputs: options.train_on_inputs.unwrap_or(false),
        ignore_index: options.ignore_index.unwrap_or(sft::IGNORE_INDEX),
    };
    sft::assemble(&prompt_ids, &response_ids, eos_id, budget, mask)
        .map(Into::into)
        .map_err(to_napi_error)
}

/// Get the built-in chat system prompt.
#[napi]
pub fn get_default_system_prompt() -> String {
    sft::template::DEFAULT_SYSTEM_PROMPT.to_string()
}

/// Helper function: clean text by normalizing line endings and trimming.
#[napi]
pub fn clean_text(text: String) -> String {
    sft::clean_text(&text)
}
