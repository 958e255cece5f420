//! Pipeline driving records through render, tokenize, truncate and assemble.

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::assembler::{assemble, Budget, MaskOptions, TrainingExample};
use crate::config::{PreprocessConfig, TaskKind};
use crate::error::{Result, SerializerError};
use crate::record::Record;
use crate::store::{split_train_validation, DatasetStore};
use crate::template::{
    ChatTemplate, CompletionTemplate, RenderedPrompt, Segment, SummarizationTemplate,
};
use crate::truncation::{fit_prompt, TokenSegment, TruncationPolicy};
use crate::{Tokenizer, TRAIN_SPLIT, VALIDATION_SPLIT};

/// A fine-tuning task with its template and truncation policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Completion {
        template: CompletionTemplate,
        policy: TruncationPolicy,
    },
    Chat {
        template: ChatTemplate,
        policy: TruncationPolicy,
    },
    Summarization {
        template: SummarizationTemplate,
        policy: TruncationPolicy,
    },
}

impl Task {
    /// Build the task selected by `config`. `eos_token` closes chat turns in
    /// the intel chat layout.
    pub fn from_config(config: &PreprocessConfig, eos_token: &str) -> Self {
        let drop_oldest = TruncationPolicy::DropOldest {
            tail_preserve: config.tail_preserve,
        };
        match config.task {
            TaskKind::Completion => Self::Completion {
                template: config.completion_template.clone().unwrap_or_default(),
                policy: drop_oldest,
            },
            TaskKind::Chat => {
                let mut template = ChatTemplate::from_kind(config.chat_template, eos_token);
                if let Some(system_prompt) = &config.system_prompt {
                    template = template.with_system_prompt(system_prompt.clone());
                }
                Self::Chat {
                    template,
                    policy: drop_oldest,
                }
            }
            TaskKind::Summarization => Self::Summarization {
                template: config
                    .summarization_suffix
                    .clone()
                    .map(|suffix| SummarizationTemplate { suffix })
                    .unwrap_or_default(),
                policy: TruncationPolicy::KeepHead,
            },
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Completion { .. } => TaskKind::Completion,
            Self::Chat { .. } => TaskKind::Chat,
            Self::Summarization { .. } => TaskKind::Summarization,
        }
    }

    pub fn policy(&self) -> TruncationPolicy {
        match self {
            Self::Completion { policy, .. }
            | Self::Chat { policy, .. }
            | Self::Summarization { policy, .. } => *policy,
        }
    }

    /// Prompt parts that do not depend on the record, as (header, trailer).
    pub fn fixed_segments(&self) -> (Vec<Segment>, Vec<Segment>) {
        match self {
            Self::Completion { .. } => (Vec::new(), Vec::new()),
            Self::Chat { template, .. } => (vec![template.header()], vec![template.trailer()]),
            Self::Summarization { template, .. } => (Vec::new(), vec![template.trailer()]),
        }
    }

    /// Render a record into its (prompt, target) pairs: one for completion
    /// and summarization, one per turn pair for chat.
    pub fn render(&self, record: &Record) -> Result<Vec<RenderedPrompt>> {
        match self {
            Self::Completion { template, .. } => Ok(vec![template.render(record)?]),
            Self::Chat { template, .. } => template.render(record),
            Self::Summarization { template, .. } => Ok(vec![template.render(record)?]),
        }
    }
}

/// Counts for one processed split.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SplitStats {
    pub split: String,
    pub records: usize,
    pub examples: usize,
    /// Non-padding tokens over all examples.
    pub real_tokens: usize,
    /// Tokens contributing to the loss over all examples.
    pub supervised_tokens: usize,
}

impl SplitStats {
    pub fn from_examples(
        split: &str,
        records: usize,
        examples: &[TrainingExample],
        ignore_index: i64,
    ) -> Self {
        Self {
            split: split.to_string(),
            records,
            examples: examples.len(),
            real_tokens: examples.iter().map(TrainingExample::real_tokens).sum(),
            supervised_tokens: examples
                .iter()
                .map(|e| e.supervised_tokens(ignore_index))
                .sum(),
        }
    }
}

/// Turns raw records into training examples for one configured task.
///
/// The tokenizer is provided externally and shared read-only; every record is
/// processed independently.
pub struct Preprocessor<T>
where
    T: Tokenizer,
{
    tokenizer: T,
    task: Task,
    budget: Budget,
    mask: MaskOptions,
}

impl<T> Preprocessor<T>
where
    T: Tokenizer,
{
    /// Create a preprocessor for the task described by `config`.
    pub fn new(tokenizer: T, config: &PreprocessConfig) -> Result<Self> {
        config.validate()?;
        let task = Task::from_config(config, tokenizer.eos_token());
        Self::with_task(tokenizer, task, config.budget(), config.mask_options())
    }

    /// Fails with `InvalidConfig` when the task's fixed prompt parts leave no
    /// room for a body under `max_source_length`.
    pub fn with_task(tokenizer: T, task: Task, budget: Budget, mask: MaskOptions) -> Result<Self> {
        budget.validate()?;
        let preprocessor = Self {
            tokenizer,
            task,
            budget,
            mask,
        };
        preprocessor.check_fixed_budget()?;
        Ok(preprocessor)
    }

    fn check_fixed_budget(&self) -> Result<()> {
        let (header, trailer) = self.task.fixed_segments();
        let fixed: usize = self
            .tokenize_segments(&header)?
            .iter()
            .chain(&self.tokenize_segments(&trailer)?)
            .map(TokenSegment::len)
            .sum();
        if fixed >= self.budget.max_source_length {
            return Err(SerializerError::InvalidConfig(format!(
                "{} prompt header and trailer take {} tokens, max_source_length {} leaves no room for the record",
                self.task.kind(),
                fixed,
                self.budget.max_source_length
            )));
        }
        debug!(task = %self.task.kind(), fixed, "fixed prompt tokens");
        Ok(())
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn budget(&self) -> Budget {
        self.budget
    }

    pub fn mask_options(&self) -> MaskOptions {
        self.mask
    }

    fn tokenize_segments(&self, segments: &[Segment]) -> Result<Vec<TokenSegment>> {
        segments
            .iter()
            .map(|s| Ok(TokenSegment::new(s.role, self.tokenizer.encode(&s.text)?)))
            .collect()
    }

    /// Prompt ids (fitted to `max_source_length`) and raw response ids.
    pub fn encode_prompt(&self, prompt: &RenderedPrompt) -> Result<(Vec<u32>, Vec<u32>)> {
        let header = self.tokenize_segments(&prompt.header)?;
        let body = self.tokenize_segments(&prompt.body)?;
        let trailer = self.tokenize_segments(&prompt.trailer)?;

        let prompt_ids = fit_prompt(
            &header,
            &body,
            &trailer,
            self.budget.max_source_length,
            self.task.policy(),
        )?;
        let response_ids = self.tokenizer.encode(&prompt.target.text)?;
        Ok((prompt_ids, response_ids))
    }

    /// All examples for one record, or the first error.
    pub fn process_record(&self, record: &Record) -> Result<Vec<TrainingExample>> {
        let eos_id = self.tokenizer.eos_token_id();
        self.task
            .render(record)?
            .iter()
            .map(|prompt| {
                let (prompt_ids, response_ids) = self.encode_prompt(prompt)?;
                assemble(&prompt_ids, &response_ids, eos_id, self.budget, self.mask)
            })
            .collect()
    }
}

impl<T> Preprocessor<T>
where
    T: Tokenizer + Sync,
{
    /// Process records in parallel.
    ///
    /// Uses rayon; output order follows record order. Any failure fails the
    /// batch, and the error reported is the one of the lowest failing index.
    pub fn process_records(&self, records: &[Record]) -> Result<Vec<TrainingExample>> {
        let per_record: Vec<Result<Vec<TrainingExample>>> = records
            .par_iter()
            .enumerate()
            .map(|(i, record)| {
                let examples = self.process_record(record).map_err(|e| e.at_record(i))?;
                debug!(record = i, examples = examples.len(), "processed record");
                Ok(examples)
            })
            .collect();

        let mut examples = Vec::new();
        for result in per_record {
            examples.extend(result?);
        }
        Ok(examples)
    }

    fn process_and_write<S>(&self, store: &mut S, split: &str, records: &[Record]) -> Result<SplitStats>
    where
        S: DatasetStore,
    {
        let examples = self.process_records(records)?;
        store.write(split, &examples)?;

        let stats = SplitStats::from_examples(split, records.len(), &examples, self.mask.ignore_index);
        info!(
            split,
            task = %self.task.kind(),
            records = stats.records,
            examples = stats.examples,
            "processed split"
        );
        Ok(stats)
    }

    /// Read, process and write back one split.
    pub fn run_split<S>(&self, store: &mut S, split: &str) -> Result<SplitStats>
    where
        S: DatasetStore,
    {
        let records = store.read_all(split)?;
        self.process_and_write(store, split, &records)
    }

    /// Process every split of the store.
    ///
    /// With `val_ratio > 0` and no existing validation split, a validation
    /// set is carved out of `train` at record granularity first.
    pub fn run_all<S>(&self, store: &mut S, val_ratio: f64) -> Result<Vec<SplitStats>>
    where
        S: DatasetStore,
    {
        let splits = store.splits()?;
        let carve_validation = val_ratio > 0.0
            && splits.iter().any(|s| s == TRAIN_SPLIT)
            && !splits.iter().any(|s| s == VALIDATION_SPLIT);

        let mut all_stats = Vec::with_capacity(splits.len() + 1);
        for split in &splits {
            if carve_validation && split == TRAIN_SPLIT {
                let records = store.read_all(TRAIN_SPLIT)?;
                let (train, validation) = split_train_validation(records, val_ratio);
                info!(
                    train = train.len(),
                    validation = validation.len(),
                    "carved validation split out of train"
                );
                all_stats.push(self.process_and_write(store, TRAIN_SPLIT, &train)?);
                all_stats.push(self.process_and_write(store, VALIDATION_SPLIT, &validation)?);
            } else {
                all_stats.push(self.run_split(store, split)?);
            }
        }
        Ok(all_stats)
    }
}
