//! Prompt templates for the completion, chat and summarization tasks.
//!
//! Rendering works directly on the structured record: every role-tagged span
//! is produced as its own [`Segment`], so nothing downstream has to re-split
//! rendered text.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SerializerError};
use crate::helpers::{clean_text, placeholder_names, render_placeholders};
use crate::record::Record;

/// Alpaca prompt used when the record carries a non-empty `input`.
pub const ALPACA_PROMPT_WITH_INPUT: &str = "Below is an instruction that describes a task, \
paired with an input that provides further context. \
Write a response that appropriately completes the request.\n\n\
### Instruction:\n{instruction}\n\n### Input:\n{input}\n\n### Response:";

/// Alpaca prompt used when `input` is absent or empty.
pub const ALPACA_PROMPT_WITHOUT_INPUT: &str = "Below is an instruction that describes a task. \
Write a response that appropriately completes the request.\n\n\
### Instruction:\n{instruction}\n\n### Response:";

pub const DEFAULT_SYSTEM_PROMPT: &str = "- You are a helpful assistant chatbot.\n\
- You answer questions.\n\
- You are excited to be able to help the user, but will refuse to do anything \
that could be considered harmful to the user.\n\
- You are more than just an information source, you are also able to write poetry, \
short stories, and make jokes.";

pub const SUMMARIZATION_SUFFIX: &str = "\nSummarize the highlights of this article.\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    System,
    User,
    Assistant,
    Article,
    Template,
}

/// A role-tagged span of rendered text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub role: Role,
    pub text: String,
}

impl Segment {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

/// One (prompt, target) pair ready for tokenization.
///
/// `header` and `trailer` are fixed and never truncated; `body` is subject
/// to the task's truncation policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedPrompt {
    pub header: Vec<Segment>,
    pub body: Vec<Segment>,
    pub trailer: Vec<Segment>,
    pub target: Segment,
}

impl RenderedPrompt {
    /// Full prompt text, header through trailer.
    pub fn prompt_text(&self) -> String {
        self.header
            .iter()
            .chain(&self.body)
            .chain(&self.trailer)
            .map(|s| s.text.as_str())
            .collect()
    }
}

/// Alpaca-style instruction template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionTemplate {
    pub prompt_with_input: String,
    pub prompt_without_input: String,
}

impl Default for CompletionTemplate {
    fn default() -> Self {
        Self {
            prompt_with_input: ALPACA_PROMPT_WITH_INPUT.to_string(),
            prompt_without_input: ALPACA_PROMPT_WITHOUT_INPUT.to_string(),
        }
    }
}

impl CompletionTemplate {
    pub fn render(&self, record: &Record) -> Result<RenderedPrompt> {
        record.require_str("instruction")?;
        let output = record.require_str("output")?;

        let template = if matches!(record.get_str("input")?, None | Some("")) {
            &self.prompt_without_input
        } else {
            &self.prompt_with_input
        };

        for name in placeholder_names(template) {
            if record.get_str(&name)?.is_none() {
                return Err(SerializerError::malformed(format!(
                    "missing field `{}` required by the prompt template",
                    name
                )));
            }
        }
        let source = render_placeholders(template, |name| record.get_str(name).ok().flatten())?;

        Ok(RenderedPrompt {
            header: Vec::new(),
            body: vec![Segment::new(Role::Template, source)],
            trailer: Vec::new(),
            target: Segment::new(Role::Assistant, output),
        })
    }
}

/// Built-in chat layouts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatTemplateKind {
    /// `### System:` / `### User:` / `### Assistant:` headings; turns end with
    /// the tokenizer's eos literal.
    #[default]
    #[serde(alias = "markdown")]
    Intel,
    /// `<|im_start|>role ... <|im_end|>` blocks.
    ChatMl,
}

/// Multi-turn chat template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTemplate {
    pub system_prefix: String,
    pub system_prompt: String,
    pub user_prefix: String,
    pub assistant_prefix: String,
    /// Marker closing every turn, including the system header.
    pub end: String,
}

impl ChatTemplate {
    pub fn intel(eos_token: &str) -> Self {
        Self {
            system_prefix: "### System:\n".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            user_prefix: "### User:\n".to_string(),
            assistant_prefix: "### Assistant:\n".to_string(),
            end: eos_token.to_string(),
        }
    }

    pub fn chatml() -> Self {
        Self {
            system_prefix: "<|im_start|>system\n".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            user_prefix: "<|im_start|>user\n".to_string(),
            assistant_prefix: "<|im_start|>assistant\n".to_string(),
            end: "<|im_end|>".to_string(),
        }
    }

    pub fn from_kind(kind: ChatTemplateKind, eos_token: &str) -> Self {
        match kind {
            ChatTemplateKind::Intel => Self::intel(eos_token),
            ChatTemplateKind::ChatMl => Self::chatml(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    /// System block opening every prompt.
    pub fn header(&self) -> Segment {
        Segment::new(
            Role::System,
            format!("{}{}{}\n", self.system_prefix, self.system_prompt, self.end),
        )
    }

    /// Assistant prefix closing every prompt.
    pub fn trailer(&self) -> Segment {
        Segment::new(Role::Template, self.assistant_prefix.clone())
    }

    /// Render one prompt per (user, assistant) pair; later prompts carry all
    /// earlier turns as context.
    pub fn render(&self, record: &Record) -> Result<Vec<RenderedPrompt>> {
        let messages = record.messages()?;
        if messages.is_empty() {
            return Err(SerializerError::malformed("`messages` is empty"));
        }
        if messages.len() % 2 != 0 {
            return Err(SerializerError::malformed(format!(
                "`messages` must hold user/assistant pairs, found {} messages",
                messages.len()
            )));
        }

        let header = self.header();
        let mut history: Vec<Segment> = Vec::with_capacity(messages.len());
        let mut prompts = Vec::with_capacity(messages.len() / 2);

        for (turn, pair) in messages.chunks_exact(2).enumerate() {
            let (user, assistant) = (&pair[0], &pair[1]);
            if !user.is_user() || !assistant.is_assistant() {
                return Err(SerializerError::malformed(format!(
                    "turn {} must be (user, assistant), found ({}, {})",
                    turn, user.role, assistant.role
                )));
            }
            let user_text = clean_text(&user.content);
            let assistant_text = clean_text(&assistant.content);
            if user_text.is_empty() || assistant_text.is_empty() {
                return Err(SerializerError::malformed(format!("turn {} has empty content", turn)));
            }

            history.push(Segment::new(
                Role::User,
                format!("{}{}{}\n", self.user_prefix, user_text, self.end),
            ));

            prompts.push(RenderedPrompt {
                header: vec![header.clone()],
                body: history.clone(),
                trailer: vec![self.trailer()],
                target: Segment::new(Role::Assistant, format!("{}{}", assistant_text, self.end)),
            });

            history.push(Segment::new(
                Role::Assistant,
                format!("{}{}{}\n", self.assistant_prefix, assistant_text, self.end),
            ));
        }

        Ok(prompts)
    }
}

/// Article summarization template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarizationTemplate {
    /// Instruction appended after the (truncated) article.
    pub suffix: String,
}

impl Default for SummarizationTemplate {
    fn default() -> Self {
        Self {
            suffix: SUMMARIZATION_SUFFIX.to_string(),
        }
    }
}

impl SummarizationTemplate {
    pub fn trailer(&self) -> Segment {
        Segment::new(Role::Template, self.suffix.clone())
    }

    pub fn render(&self, record: &Record) -> Result<RenderedPrompt> {
        let article = clean_text(record.require_str("article")?);
        let highlights = clean_text(record.require_str("highlights")?);

        Ok(RenderedPrompt {
            header: Vec::new(),
            body: vec![Segment::new(Role::Article, article)],
            trailer: vec![self.trailer()],
            target: Segment::new(Role::Assistant, highlights),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chat_record(pairs: &[(&str, &str)]) -> Record {
        let messages: Vec<_> = pairs
            .iter()
            .flat_map(|(u, a)| {
                [
                    json!({"role": "user", "content": u}),
                    json!({"role": "assistant", "content": a}),
                ]
            })
            .collect();
        Record::new().with("messages", messages)
    }

    #[test]
    fn test_completion_without_input() {
        let record = Record::new()
            .with("instruction", "Summarize X")
            .with("input", "")
            .with("output", "Y");
        let rendered = CompletionTemplate::default().render(&record).unwrap();

        assert_eq!(rendered.body.len(), 1);
        assert_eq!(rendered.body[0].role, Role::Template);
        let prompt = rendered.prompt_text();
        assert!(prompt.starts_with("Below is an instruction that describes a task. Write"));
        assert!(prompt.ends_with("### Instruction:\nSummarize X\n\n### Response:"));
        assert!(!prompt.contains("### Input:"));
        assert_eq!(rendered.target, Segment::new(Role::Assistant, "Y"));
    }

    #[test]
    fn test_completion_with_input() {
        let record = Record::new()
            .with("instruction", "Translate")
            .with("input", "bonjour")
            .with("output", "hello");
        let prompt = CompletionTemplate::default().render(&record).unwrap().prompt_text();
        assert!(prompt.contains("paired with an input"));
        assert!(prompt.contains("### Input:\nbonjour\n\n### Response:"));
    }

    #[test]
    fn test_completion_whitespace_input_counts_as_present() {
        let record = Record::new()
            .with("instruction", "Translate")
            .with("input", " ")
            .with("output", "hello");
        let prompt = CompletionTemplate::default().render(&record).unwrap().prompt_text();
        assert!(prompt.contains("### Input:\n \n\n### Response:"));

        let record = Record::new().with("instruction", "Translate").with("output", "hello");
        let prompt = CompletionTemplate::default().render(&record).unwrap().prompt_text();
        assert!(!prompt.contains("### Input:"));
    }

    #[test]
    fn test_completion_missing_output() {
        let record = Record::new().with("instruction", "Translate");
        let err = CompletionTemplate::default().render(&record).unwrap_err();
        assert!(matches!(err, SerializerError::MalformedRecord { .. }));
    }

    #[test]
    fn test_completion_custom_template_missing_field() {
        let template = CompletionTemplate {
            prompt_with_input: "{instruction} {input}".to_string(),
            prompt_without_input: "{instruction} [{context}]".to_string(),
        };
        let record = Record::new().with("instruction", "a").with("output", "b");
        let err = template.render(&record).unwrap_err();
        assert!(err.to_string().contains("context"));
    }

    #[test]
    fn test_chat_turns_accumulate() {
        let record = chat_record(&[("q1", "a1"), ("q2", "a2"), ("q3", "a3")]);
        let prompts = ChatTemplate::intel("</s>").render(&record).unwrap();

        assert_eq!(prompts.len(), 3);
        for (i, prompt) in prompts.iter().enumerate() {
            assert_eq!(prompt.header.len(), 1);
            assert_eq!(prompt.header[0].role, Role::System);
            // i prior pairs plus the current user turn
            assert_eq!(prompt.body.len(), 2 * i + 1);
            assert_eq!(prompt.body.last().unwrap().role, Role::User);
            assert_eq!(prompt.trailer[0].text, "### Assistant:\n");
        }
        assert_eq!(prompts[0].target.text, "a1</s>");
        assert_eq!(prompts[2].target.text, "a3</s>");
        assert_eq!(prompts[2].body[1].text, "### Assistant:\na1</s>\n");
        assert_eq!(prompts[2].body[4].text, "### User:\nq3</s>\n");
    }

    #[test]
    fn test_chat_header_uses_end_marker() {
        let record = chat_record(&[("q", "a")]);
        let prompts = ChatTemplate::chatml()
            .with_system_prompt("Be brief.")
            .render(&record)
            .unwrap();
        assert_eq!(prompts[0].header[0].text, "<|im_start|>system\nBe brief.<|im_end|>\n");
        assert_eq!(prompts[0].target.text, "a<|im_end|>");
    }

    #[test]
    fn test_chat_odd_messages() {
        let record = Record::new().with(
            "messages",
            json!([{"role": "user", "content": "hi"}]),
        );
        let err = ChatTemplate::intel("</s>").render(&record).unwrap_err();
        assert!(matches!(err, SerializerError::MalformedRecord { .. }));
    }

    #[test]
    fn test_chat_rejects_empty_and_misordered() {
        let template = ChatTemplate::intel("</s>");
        assert!(template.render(&Record::new().with("messages", json!([]))).is_err());
        assert!(template.render(&chat_record(&[("q", "  ")])).is_err());

        let swapped = Record::new().with(
            "messages",
            json!([
                {"role": "assistant", "content": "a"},
                {"role": "user", "content": "q"}
            ]),
        );
        assert!(template.render(&swapped).is_err());
    }

    #[test]
    fn test_summarization() {
        let record = Record::new()
            .with("article", "  Long story.\r\n")
            .with("highlights", "Short.");
        let rendered = SummarizationTemplate::default().render(&record).unwrap();
        assert_eq!(rendered.body, vec![Segment::new(Role::Article, "Long story.")]);
        assert_eq!(rendered.trailer[0].text, SUMMARIZATION_SUFFIX);
        assert_eq!(rendered.target.text, "Short.");
    }

    #[test]
    fn test_summarization_missing_highlights() {
        let record = Record::new().with("article", "text");
        assert!(SummarizationTemplate::default().render(&record).is_err());
    }
}
