//! CLI tool for serializing instruction, chat and summarization datasets.
//!
//! This tool reads raw records (`.jsonl`, `.json` or `.csv` per split) and
//! writes fixed-length `input_ids` / `labels` / `attention_mask` rows as JSONL,
//! ready for supervised fine-tuning. It uses the HuggingFace tokenizers Rust
//! library for tokenization.

use std::path::PathBuf;

use clap::Parser;
use tokenizers::Tokenizer as HfTokenizer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sft_serializer_core::{
    DirectoryStore, PreprocessConfig, Preprocessor, SerializerError, SplitStats, TaskKind,
    Tokenizer,
};

/// Eos literals tried in order when `--eos-token` is not given.
const EOS_CANDIDATES: [&str; 5] = ["</s>", "<|endoftext|>", "<eos>", "<|end_of_text|>", "<|im_end|>"];

/// Serialize raw datasets into padded, loss-masked SFT examples.
#[derive(Parser, Debug)]
#[command(name = "sft-serialize")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding one file per split (train.jsonl, validation.csv, ...)
    #[arg(long)]
    data_dir: PathBuf,

    /// Output directory for the processed JSONL files
    #[arg(long)]
    output_dir: PathBuf,

    /// HuggingFace tokenizer model name or path to a tokenizer.json
    #[arg(long)]
    tokenizer: String,

    /// Optional TOML config; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Fine-tuning task: completion, chat or summarization
    #[arg(long)]
    task: Option<TaskKind>,

    /// Maximum prompt tokens
    #[arg(long)]
    max_source_length: Option<usize>,

    /// Total tokens per example, padding included
    #[arg(long)]
    max_seq_length: Option<usize>,

    /// Train on prompt tokens as well as responses
    #[arg(long)]
    train_on_inputs: bool,

    /// Fraction of train records moved to validation when no validation split exists
    #[arg(long)]
    val_ratio: Option<f64>,

    /// End-of-sequence token literal (auto-detected when omitted)
    #[arg(long)]
    eos_token: Option<String>,

    /// Splits to process; all splits found in --data-dir when omitted
    #[arg(long = "split")]
    splits: Vec<String>,
}

/// Wrapper around HuggingFace tokenizers.
///
/// This uses the Rust-native tokenizers library, which is `Send + Sync`
/// and enables true parallel tokenization.
struct RustTokenizer {
    inner: HfTokenizer,
    eos_token: String,
    eos_token_id: u32,
}

impl RustTokenizer {
    /// Load a HuggingFace tokenizer from a local file or a model name.
    fn load(model: &str, eos_token: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = PathBuf::from(model);
        let inner = if path.is_file() {
            HfTokenizer::from_file(&path)
        } else {
            HfTokenizer::from_pretrained(model, None)
        }
        .map_err(|e| e as Box<dyn std::error::Error>)?;

        let (eos_token, eos_token_id) = match eos_token {
            Some(token) => {
                let id = inner
                    .token_to_id(token)
                    .ok_or_else(|| format!("eos token {:?} is not in the vocabulary", token))?;
                (token.to_string(), id)
            }
            None => EOS_CANDIDATES
                .iter()
                .find_map(|&token| inner.token_to_id(token).map(|id| (token.to_string(), id)))
                .ok_or("could not detect an eos token; pass --eos-token")?,
        };

        Ok(Self {
            inner,
            eos_token,
            eos_token_id,
        })
    }
}

impl Tokenizer for RustTokenizer {
    fn tokenize(&self, text: &str) -> sft_serializer_core::Result<Vec<String>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| SerializerError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_tokens().to_vec())
    }

    fn convert_tokens_to_ids(&self, tokens: &[String]) -> sft_serializer_core::Result<Vec<u32>> {
        tokens
            .iter()
            .map(|token| {
                self.inner
                    .token_to_id(token)
                    .ok_or_else(|| SerializerError::Tokenizer(format!("unknown token {:?}", token)))
            })
            .collect()
    }

    fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }

    fn eos_token(&self) -> &str {
        &self.eos_token
    }
}

fn build_config(args: &Args) -> Result<PreprocessConfig, SerializerError> {
    let mut config = match &args.config {
        Some(path) => PreprocessConfig::from_toml_file(path)?,
        None => PreprocessConfig::default(),
    };
    if let Some(task) = args.task {
        config.task = task;
    }
    if let Some(n) = args.max_source_length {
        config.max_source_length = n;
    }
    if let Some(n) = args.max_seq_length {
        config.max_seq_length = n;
    }
    if args.train_on_inputs {
        config.train_on_inputs = true;
    }
    if let Some(ratio) = args.val_ratio {
        config.val_ratio = ratio;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sft_serializer_core=info,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;

    info!(tokenizer = %args.tokenizer, "loading tokenizer");
    let tokenizer = RustTokenizer::load(&args.tokenizer, args.eos_token.as_deref())?;
    info!(eos = %tokenizer.eos_token(), eos_id = tokenizer.eos_token_id(), "tokenizer ready");

    let preprocessor = Preprocessor::new(&tokenizer, &config)?;
    let mut store = DirectoryStore::new(&args.data_dir, &args.output_dir)?;

    info!(data_dir = ?args.data_dir, task = %config.task, "processing dataset");
    let stats: Vec<SplitStats> = if args.splits.is_empty() {
        preprocessor.run_all(&mut store, config.val_ratio)?
    } else {
        if config.val_ratio > 0.0 {
            warn!("--val-ratio is ignored when --split is given");
        }
        args.splits
            .iter()
            .map(|split| preprocessor.run_split(&mut store, split))
            .collect::<Result<_, _>>()?
    };

    if stats.is_empty() {
        return Err(format!("No dataset files found under {:?}", args.data_dir).into());
    }

    let metadata_path = args.output_dir.join("metadata.json");
    let metadata = serde_json::json!({
        "config": {
            "data_dir": args.data_dir.to_string_lossy(),
            "output_dir": args.output_dir.to_string_lossy(),
            "tokenizer": args.tokenizer,
            "eos_token": tokenizer.eos_token(),
            "eos_token_id": tokenizer.eos_token_id(),
            "preprocess": config,
        },
        "splits": stats,
        "files": stats
            .iter()
            .map(|s| (s.split.clone(), store.output_path(&s.split).to_string_lossy().to_string()))
            .collect::<std::collections::BTreeMap<_, _>>(),
    });
    std::fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?)?;

    println!("\n[summary]");
    for s in &stats {
        let avg_real = if s.examples > 0 {
            s.real_tokens as f64 / s.examples as f64
        } else {
            0.0
        };
        println!(
            "  {}: {} records -> {} examples (avg {:.1} real tokens, {} supervised tokens)",
            s.split, s.records, s.examples, avg_real, s.supervised_tokens
        );
    }
    println!("  Output: {:?}", args.output_dir);
    println!("  Metadata: {:?}", metadata_path);

    Ok(())
}
