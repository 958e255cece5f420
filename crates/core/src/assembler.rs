//! Assembly of fixed-length `(input_ids, labels, attention_mask)` examples.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SerializerError};

/// Label value excluded from the loss by the usual cross-entropy convention.
pub const IGNORE_INDEX: i64 = -100;

/// Length limits for one example.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    /// Upper bound for the prompt region.
    pub max_source_length: usize,
    /// Exact length of every assembled sequence, padding included.
    pub max_seq_length: usize,
}

impl Budget {
    pub fn new(max_source_length: usize, max_seq_length: usize) -> Result<Self> {
        let budget = Self {
            max_source_length,
            max_seq_length,
        };
        budget.validate()?;
        Ok(budget)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_source_length == 0 {
            return Err(SerializerError::InvalidConfig(
                "max_source_length must be greater than 0".to_string(),
            ));
        }
        if self.max_source_length >= self.max_seq_length {
            return Err(SerializerError::InvalidConfig(format!(
                "max_source_length ({}) must be less than max_seq_length ({})",
                self.max_source_length, self.max_seq_length
            )));
        }
        Ok(())
    }
}

/// Loss-masking options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskOptions {
    /// When true the prompt tokens are trained on as well.
    pub train_on_inputs: bool,
    pub ignore_index: i64,
}

impl Default for MaskOptions {
    fn default() -> Self {
        Self {
            train_on_inputs: false,
            ignore_index: IGNORE_INDEX,
        }
    }
}

/// One fixed-length training example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub input_ids: Vec<u32>,
    pub labels: Vec<i64>,
    pub attention_mask: Vec<u8>,
}

impl TrainingExample {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Number of non-padding tokens.
    pub fn real_tokens(&self) -> usize {
        self.attention_mask.iter().filter(|&&m| m == 1).count()
    }

    /// Number of positions contributing to the loss.
    pub fn supervised_tokens(&self, ignore_index: i64) -> usize {
        self.labels.iter().filter(|&&l| l != ignore_index).count()
    }
}

/// Cap a response at `max_resp` tokens, keeping its final token.
pub fn cap_response(response_ids: &[u32], max_resp: usize) -> Vec<u32> {
    if response_ids.len() <= max_resp {
        return response_ids.to_vec();
    }
    if max_resp == 0 {
        return Vec::new();
    }
    let mut capped = Vec::with_capacity(max_resp);
    capped.extend_from_slice(&response_ids[..max_resp - 1]);
    capped.extend_from_slice(&response_ids[response_ids.len() - 1..]);
    capped
}

/// Build a padded example from prompt and response ids.
///
/// `input_ids = prompt ++ response ++ [eos]`, right-padded with `eos`;
/// labels mask the prompt (unless `train_on_inputs`) and the padding.
pub fn assemble(
    prompt_ids: &[u32],
    response_ids: &[u32],
    eos_id: u32,
    budget: Budget,
    options: MaskOptions,
) -> Result<TrainingExample> {
    let seq_len = budget.max_seq_length;
    let prompt_len = prompt_ids.len();

    if prompt_len > budget.max_source_length {
        return Err(SerializerError::LengthInvariant(format!(
            "prompt has {} tokens, max_source_length is {}",
            prompt_len, budget.max_source_length
        )));
    }
    if prompt_len + 1 > seq_len {
        return Err(SerializerError::LengthInvariant(format!(
            "prompt of {} tokens plus eos does not fit max_seq_length {}",
            prompt_len, seq_len
        )));
    }

    let response = cap_response(response_ids, seq_len - prompt_len - 1);

    let mut input_ids = Vec::with_capacity(seq_len);
    input_ids.extend_from_slice(prompt_ids);
    input_ids.extend_from_slice(&response);
    input_ids.push(eos_id);

    let mut labels: Vec<i64> = Vec::with_capacity(seq_len);
    if options.train_on_inputs {
        labels.extend(prompt_ids.iter().map(|&id| i64::from(id)));
    } else {
        labels.resize(prompt_len, options.ignore_index);
    }
    labels.extend(response.iter().map(|&id| i64::from(id)));
    labels.push(i64::from(eos_id));

    let real_len = input_ids.len();
    let mut attention_mask = vec![1u8; real_len];

    input_ids.resize(seq_len, eos_id);
    labels.resize(seq_len, options.ignore_index);
    attention_mask.resize(seq_len, 0);

    if input_ids.len() != seq_len || labels.len() != seq_len || attention_mask.len() != seq_len {
        return Err(SerializerError::LengthInvariant(format!(
            "assembled lengths input_ids={} labels={} attention_mask={}, expected {}",
            input_ids.len(),
            labels.len(),
            attention_mask.len(),
            seq_len
        )));
    }

    Ok(TrainingExample {
        input_ids,
        labels,
        attention_mask,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const EOS: u32 = 2;

    fn budget(src: usize, seq: usize) -> Budget {
        Budget::new(src, seq).unwrap()
    }

    #[test]
    fn test_budget_validation() {
        assert!(Budget::new(0, 10).is_err());
        assert!(Budget::new(10, 10).is_err());
        assert!(Budget::new(11, 10).is_err());
        assert!(Budget::new(9, 10).is_ok());
    }

    #[test]
    fn test_masks_prompt_and_pads() {
        let example = assemble(&[10, 11, 12], &[20, 21], EOS, budget(4, 8), MaskOptions::default())
            .unwrap();

        assert_eq!(example.input_ids, vec![10, 11, 12, 20, 21, EOS, EOS, EOS]);
        assert_eq!(example.labels, vec![-100, -100, -100, 20, 21, 2, -100, -100]);
        assert_eq!(example.attention_mask, vec![1, 1, 1, 1, 1, 1, 0, 0]);
        assert_eq!(example.real_tokens(), 6);
        assert_eq!(example.supervised_tokens(IGNORE_INDEX), 3);
    }

    #[test]
    fn test_train_on_inputs() {
        let options = MaskOptions {
            train_on_inputs: true,
            ..MaskOptions::default()
        };
        let example = assemble(&[10, 11], &[20], EOS, budget(4, 6), options).unwrap();
        assert_eq!(example.labels, vec![10, 11, 20, 2, -100, -100]);
        assert_eq!(&example.input_ids[..4], &[10, 11, 20, 2]);
    }

    #[test]
    fn test_custom_ignore_index() {
        let options = MaskOptions {
            train_on_inputs: false,
            ignore_index: -1,
        };
        let example = assemble(&[10], &[20], EOS, budget(2, 4), options).unwrap();
        assert_eq!(example.labels, vec![-1, 20, 2, -1]);
    }

    #[test]
    fn test_long_response_keeps_last_token() {
        let response: Vec<u32> = (30..40).collect();
        let example = assemble(&[10, 11, 12], &response, EOS, budget(4, 8), MaskOptions::default())
            .unwrap();

        // max_resp = 8 - 3 - 1 = 4: three head tokens and the final one
        assert_eq!(example.input_ids, vec![10, 11, 12, 30, 31, 32, 39, EOS]);
        assert_eq!(example.labels, vec![-100, -100, -100, 30, 31, 32, 39, 2]);
        assert!(example.attention_mask.iter().all(|&m| m == 1));
    }

    #[test]
    fn test_prompt_over_source_budget_fails() {
        let err = assemble(&[1, 2, 3, 4, 5], &[6], EOS, budget(4, 8), MaskOptions::default())
            .unwrap_err();
        assert!(matches!(err, SerializerError::LengthInvariant(_)));
    }

    #[test]
    fn test_prompt_filling_sequence_drops_response() {
        // prompt + eos exactly fills the sequence; source budget is not validated here
        let unchecked = Budget {
            max_source_length: 3,
            max_seq_length: 4,
        };
        let example = assemble(&[1, 2, 3], &[7, 8], EOS, unchecked, MaskOptions::default()).unwrap();
        assert_eq!(example.input_ids, vec![1, 2, 3, EOS]);
        assert_eq!(example.labels, vec![-100, -100, -100, 2]);
    }

    #[test]
    fn test_cap_response() {
        assert_eq!(cap_response(&[1, 2, 3], 5), vec![1, 2, 3]);
        assert_eq!(cap_response(&[1, 2, 3, 4, 5], 3), vec![1, 2, 5]);
        assert_eq!(cap_response(&[1, 2, 3], 1), vec![3]);
        assert!(cap_response(&[1, 2, 3], 0).is_empty());
    }

    #[test]
    fn test_labels_match_inputs_after_prompt() {
        let prompt: Vec<u32> = (100..107).collect();
        let response: Vec<u32> = (200..230).collect();
        let example = assemble(&prompt, &response, EOS, budget(8, 24), MaskOptions::default())
            .unwrap();

        let real = example.real_tokens();
        assert!(example.labels[..prompt.len()].iter().all(|&l| l == IGNORE_INDEX));
        for i in prompt.len()..real {
            assert_eq!(example.labels[i], i64::from(example.input_ids[i]));
        }
        assert_eq!(example.len(), 24);
    }
}
