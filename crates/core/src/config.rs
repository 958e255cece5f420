//! Preprocessing configuration.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::assembler::{Budget, MaskOptions, IGNORE_INDEX};
use crate::error::{Result, SerializerError};
use crate::template::{ChatTemplateKind, CompletionTemplate};
use crate::truncation::DEFAULT_TAIL_PRESERVE;
use crate::{MAX_SEQ_LENGTH, MAX_SOURCE_LENGTH};

/// Fine-tuning task, chosen once per job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    #[default]
    Completion,
    Chat,
    Summarization,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completion => "completion",
            Self::Chat => "chat",
            Self::Summarization => "summarization",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = SerializerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "completion" => Ok(Self::Completion),
            "chat" => Ok(Self::Chat),
            "summarization" => Ok(Self::Summarization),
            other => Err(SerializerError::InvalidConfig(format!(
                "unknown task '{}', expected completion, chat or summarization",
                other
            ))),
        }
    }
}

/// Configuration for a preprocessing job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreprocessConfig {
    pub task: TaskKind,
    pub max_source_length: usize,
    pub max_seq_length: usize,
    pub train_on_inputs: bool,
    /// Label written for positions excluded from the loss.
    pub ignore_index: i64,
    /// Final tokens kept when a single chat/completion segment has to be cut.
    pub tail_preserve: usize,
    pub chat_template: ChatTemplateKind,
    /// Replaces the built-in chat system prompt.
    pub system_prompt: Option<String>,
    /// Replaces the built-in Alpaca prompts.
    pub completion_template: Option<CompletionTemplate>,
    /// Replaces the instruction appended after summarization articles.
    pub summarization_suffix: Option<String>,
    /// Fraction of records carved out of `train` for validation when the
    /// dataset has no validation split.
    pub val_ratio: f64,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            task: TaskKind::default(),
            max_source_length: MAX_SOURCE_LENGTH,
            max_seq_length: MAX_SEQ_LENGTH,
            train_on_inputs: false,
            ignore_index: IGNORE_INDEX,
            tail_preserve: DEFAULT_TAIL_PRESERVE,
            chat_template: ChatTemplateKind::default(),
            system_prompt: None,
            completion_template: None,
            summarization_suffix: None,
            val_ratio: 0.0,
        }
    }
}

impl PreprocessConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.budget().validate()?;
        if !(0.0..1.0).contains(&self.val_ratio) {
            return Err(SerializerError::InvalidConfig(format!(
                "val_ratio must be in [0, 1), got {}",
                self.val_ratio
            )));
        }
        if self.ignore_index >= 0 {
            return Err(SerializerError::InvalidConfig(format!(
                "ignore_index must be negative so it never collides with a token id, got {}",
                self.ignore_index
            )));
        }
        Ok(())
    }

    pub fn budget(&self) -> Budget {
        Budget {
            max_source_length: self.max_source_length,
            max_seq_length: self.max_seq_length,
        }
    }

    pub fn mask_options(&self) -> MaskOptions {
        MaskOptions {
            train_on_inputs: self.train_on_inputs,
            ignore_index: self.ignore_index,
        }
    }
}
