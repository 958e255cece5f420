//! Deterministic tokenizer for unit tests.

use crate::error::Result;
use crate::Tokenizer;

pub const EOS_ID: u32 = 0;
pub const EOS: &str = "</s>";

/// One token per character; the id is the code point. `</s>` is a single
/// token with id 0.
pub struct CharTokenizer;

impl Tokenizer for CharTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<String>> {
        let mut tokens = Vec::new();
        for (i, piece) in text.split(EOS).enumerate() {
            if i > 0 {
                tokens.push(EOS.to_string());
            }
            tokens.extend(piece.chars().map(String::from));
        }
        Ok(tokens)
    }

    fn convert_tokens_to_ids(&self, tokens: &[String]) -> Result<Vec<u32>> {
        Ok(tokens
            .iter()
            .map(|t| {
                if t == EOS {
                    EOS_ID
                } else {
                    t.chars().next().map_or(EOS_ID, u32::from)
                }
            })
            .collect())
    }

    fn eos_token_id(&self) -> u32 {
        EOS_ID
    }

    fn eos_token(&self) -> &str {
        EOS
    }
}

/// Ids the [`CharTokenizer`] assigns to `text`.
pub fn ids(text: &str) -> Vec<u32> {
    CharTokenizer.encode(text).unwrap()
}
