//! Core logic for turning instruction, chat and summarization records into
//! fixed-length supervised fine-tuning examples.
//!
//! A [`pipeline::Preprocessor`] renders each record with the task's template,
//! tokenizes the role-tagged segments, truncates the prompt to
//! `max_source_length` and assembles padded `input_ids` / `labels` /
//! `attention_mask` sequences of exactly `max_seq_length` tokens, with the
//! prompt masked out of the loss.

/// Trait for tokenization operations.
///
/// Implementors wrap a real tokenizer (the CLI uses HuggingFace `tokenizers`).
/// Implementations must be deterministic: the same text always yields the
/// same tokens.
pub trait Tokenizer {
    /// Split text into token strings.
    fn tokenize(&self, text: &str) -> Result<Vec<String>>;

    /// Map token strings to vocabulary ids.
    fn convert_tokens_to_ids(&self, tokens: &[String]) -> Result<Vec<u32>>;

    /// Id of the end-of-sequence token, also used for padding.
    fn eos_token_id(&self) -> u32;

    /// Literal text of the end-of-sequence token.
    fn eos_token(&self) -> &str;

    /// Tokenize and convert in one step.
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let tokens = self.tokenize(text)?;
        self.convert_tokens_to_ids(&tokens)
    }
}

// Blanket implementation for references to Tokenizers
impl<T: Tokenizer + ?Sized> Tokenizer for &T {
    fn tokenize(&self, text: &str) -> Result<Vec<String>> {
        (*self).tokenize(text)
    }

    fn convert_tokens_to_ids(&self, tokens: &[String]) -> Result<Vec<u32>> {
        (*self).convert_tokens_to_ids(tokens)
    }

    fn eos_token_id(&self) -> u32 {
        (*self).eos_token_id()
    }

    fn eos_token(&self) -> &str {
        (*self).eos_token()
    }

    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        (*self).encode(text)
    }
}

pub mod assembler;
pub mod config;
mod error;
mod helpers;
pub mod pipeline;
mod record;
pub mod store;
pub mod template;
pub mod truncation;

#[cfg(test)]
pub(crate) mod testing;

pub use assembler::{assemble, cap_response, Budget, MaskOptions, TrainingExample, IGNORE_INDEX};
pub use config::{PreprocessConfig, TaskKind};
pub use error::{Result, SerializerError};
pub use helpers::{clean_text, placeholder_names, render_placeholders};
pub use pipeline::{Preprocessor, SplitStats, Task};
pub use record::{Message, Record};
pub use store::{
    discover_data_files, read_records, split_train_validation, DatasetStore, DirectoryStore,
    MemoryStore,
};
pub use template::{
    ChatTemplate, ChatTemplateKind, CompletionTemplate, RenderedPrompt, Role, Segment,
    SummarizationTemplate,
};
pub use truncation::{fit_prompt, fit_to_budget, TokenSegment, TruncationPolicy, DEFAULT_TAIL_PRESERVE};

/// Default prompt budget (tokens).
pub const MAX_SOURCE_LENGTH: usize = 512;

/// Default full sequence length (tokens), padding included.
pub const MAX_SEQ_LENGTH: usize = 2048;

/// Name of the split carved out of `train` when `val_ratio > 0`.
pub const VALIDATION_SPLIT: &str = "validation";

/// Name of the split records are read from by default.
pub const TRAIN_SPLIT: &str = "train";
