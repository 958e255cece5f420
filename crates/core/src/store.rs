//! Dataset storage: raw records in, fixed-length examples out.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::assembler::TrainingExample;
use crate::error::{Result, SerializerError};
use crate::record::Record;

/// File extensions a [`DirectoryStore`] can read, in lookup order.
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["jsonl", "json", "csv"];

/// Row store holding named splits (`train`, `validation`, ...).
pub trait DatasetStore {
    /// Names of the splits available for reading.
    fn splits(&self) -> Result<Vec<String>>;

    fn read_all(&self, split: &str) -> Result<Vec<Record>>;

    /// Append examples to the output of `split`.
    fn write(&mut self, split: &str, examples: &[TrainingExample]) -> Result<()>;
}

/// In-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inputs: BTreeMap<String, Vec<Record>>,
    outputs: BTreeMap<String, Vec<TrainingExample>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_split(mut self, split: impl Into<String>, records: Vec<Record>) -> Self {
        self.inputs.insert(split.into(), records);
        self
    }

    pub fn output(&self, split: &str) -> &[TrainingExample] {
        self.outputs.get(split).map(Vec::as_slice).unwrap_or_default()
    }
}

impl DatasetStore for MemoryStore {
    fn splits(&self) -> Result<Vec<String>> {
        Ok(self.inputs.keys().cloned().collect())
    }

    fn read_all(&self, split: &str) -> Result<Vec<Record>> {
        self.inputs
            .get(split)
            .cloned()
            .ok_or_else(|| SerializerError::Io(missing_split(split)))
    }

    fn write(&mut self, split: &str, examples: &[TrainingExample]) -> Result<()> {
        self.outputs
            .entry(split.to_string())
            .or_default()
            .extend_from_slice(examples);
        Ok(())
    }
}

/// Reads `<split>.jsonl`, `<split>.json` or `<split>.csv` from `input_dir` and
/// writes `<split>.jsonl` into `output_dir`.
#[derive(Debug)]
pub struct DirectoryStore {
    input_dir: PathBuf,
    output_dir: PathBuf,
    started: HashSet<String>,
}

impl DirectoryStore {
    /// Fails with `InvalidConfig` when both paths name the same directory.
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Result<Self> {
        let input_dir = input_dir.into();
        let output_dir = output_dir.into();
        if same_directory(&input_dir, &output_dir) {
            return Err(SerializerError::InvalidConfig(format!(
                "output directory {:?} must differ from the input directory",
                output_dir
            )));
        }
        Ok(Self {
            input_dir,
            output_dir,
            started: HashSet::new(),
        })
    }

    pub fn output_path(&self, split: &str) -> PathBuf {
        self.output_dir.join(format!("{}.jsonl", split))
    }

    fn input_path(&self, split: &str) -> Option<PathBuf> {
        SUPPORTED_EXTENSIONS
            .iter()
            .map(|ext| self.input_dir.join(format!("{}.{}", split, ext)))
            .find(|p| p.is_file())
    }
}

impl DatasetStore for DirectoryStore {
    fn splits(&self) -> Result<Vec<String>> {
        let mut splits: Vec<String> = discover_data_files(&self.input_dir)
            .into_iter()
            .filter(|p| p.parent() == Some(self.input_dir.as_path()))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().to_string()))
            .collect();
        splits.sort();
        splits.dedup();
        Ok(splits)
    }

    fn read_all(&self, split: &str) -> Result<Vec<Record>> {
        let path = self
            .input_path(split)
            .ok_or_else(|| SerializerError::Io(missing_split(split)))?;
        debug!(split, path = %path.display(), "reading split");
        read_records(&path)
    }

    fn write(&mut self, split: &str, examples: &[TrainingExample]) -> Result<()> {
        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.output_path(split);

        // First write of a split replaces stale output; later writes append.
        let first = self.started.insert(split.to_string());
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(!first)
            .truncate(first)
            .open(&path)?;
        let mut writer = BufWriter::new(file);
        for example in examples {
            serde_json::to_writer(&mut writer, example)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn same_directory(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn missing_split(split: &str) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("split '{}' not found", split),
    )
}

/// Discover all readable data files under a directory.
pub fn discover_data_files(root: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map_or(false, |ext| SUPPORTED_EXTENSIONS.contains(&ext))
        })
        .map(|e| e.path().to_path_buf())
        .collect();
    paths.sort();
    paths
}

/// Read records from a `.jsonl`, `.json` (array of objects) or `.csv` file.
pub fn read_records(path: &Path) -> Result<Vec<Record>> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("jsonl") => read_jsonl(path),
        Some("json") => read_json_array(path),
        Some("csv") => read_csv(path),
        _ => Err(SerializerError::InvalidConfig(format!(
            "unsupported dataset file {:?}",
            path
        ))),
    }
}

fn read_jsonl(path: &Path) -> Result<Vec<Record>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line)?;
        let index = records.len();
        records.push(Record::try_from(value).map_err(|e| e.at_record(index))?);
    }
    Ok(records)
}

fn read_json_array(path: &Path) -> Result<Vec<Record>> {
    let reader = BufReader::new(File::open(path)?);
    let value: Value = serde_json::from_reader(reader)?;
    let Value::Array(items) = value else {
        return Err(SerializerError::malformed(format!(
            "{:?} must contain a JSON array of records",
            path
        )));
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| Record::try_from(item).map_err(|e| e.at_record(i)))
        .collect()
}

fn read_csv(path: &Path) -> Result<Vec<Record>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        let row: HashMap<String, String> = row?;
        let map: Map<String, Value> = row.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
        records.push(Record::from(map));
    }
    Ok(records)
}

/// Deterministically carve a validation set out of `records`.
///
/// Selection is a fixed multiplicative hash of the record index, so the same
/// input always yields the same split; relative order is kept within both
/// halves.
pub fn split_train_validation(records: Vec<Record>, val_ratio: f64) -> (Vec<Record>, Vec<Record>) {
    let total = records.len();
    let val_count = ((total as f64) * val_ratio).round() as usize;
    if val_count == 0 {
        return (records, Vec::new());
    }

    let mut order: Vec<usize> = (0..total).collect();
    order.sort_by_key(|&i| (i.wrapping_mul(2654435761) % 1000, i));
    let validation: HashSet<usize> = order.into_iter().take(val_count).collect();

    let mut train = Vec::with_capacity(total - val_count);
    let mut val = Vec::with_capacity(val_count);
    for (i, record) in records.into_iter().enumerate() {
        if validation.contains(&i) {
            val.push(record);
        } else {
            train.push(record);
        }
    }
    (train, val)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn example(id: u32) -> TrainingExample {
        TrainingExample {
            input_ids: vec![id, 2],
            labels: vec![-100, 2],
            attention_mask: vec![1, 1],
        }
    }

    #[test]
    fn test_discover_data_files() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("nested")).unwrap();
        std::fs::write(temp.path().join("train.jsonl"), "").unwrap();
        std::fs::write(temp.path().join("nested/validation.csv"), "").unwrap();
        std::fs::write(temp.path().join("README.md"), "").unwrap();

        let files = discover_data_files(temp.path());
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_read_jsonl_json_and_csv() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("train.jsonl"),
            "{\"instruction\": \"a\", \"output\": \"b\"}\n\n{\"instruction\": \"c\", \"output\": \"d\"}\n",
        )
        .unwrap();
        std::fs::write(
            temp.path().join("test.json"),
            r#"[{"article": "x", "highlights": "y"}]"#,
        )
        .unwrap();
        std::fs::write(
            temp.path().join("validation.csv"),
            "instruction,input,output\nhello,,world\n",
        )
        .unwrap();

        let store = DirectoryStore::new(temp.path(), temp.path().join("out")).unwrap();
        assert_eq!(store.splits().unwrap(), vec!["test", "train", "validation"]);

        let train = store.read_all("train").unwrap();
        assert_eq!(train.len(), 2);
        assert_eq!(train[1].require_str("instruction").unwrap(), "c");

        let test = store.read_all("test").unwrap();
        assert_eq!(test[0].require_str("highlights").unwrap(), "y");

        let validation = store.read_all("validation").unwrap();
        assert_eq!(validation[0].get_str("input").unwrap(), Some(""));
        assert_eq!(validation[0].require_str("output").unwrap(), "world");
    }

    #[test]
    fn test_read_jsonl_non_object_line() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("train.jsonl");
        std::fs::write(&path, "{\"a\": \"b\"}\n[1, 2]\n").unwrap();
        let err = read_records(&path).unwrap_err();
        assert!(err.to_string().contains("#1"));
    }

    #[test]
    fn test_missing_split() {
        let temp = TempDir::new().unwrap();
        let store = DirectoryStore::new(temp.path(), temp.path().join("out")).unwrap();
        assert!(store.read_all("train").is_err());
    }

    #[test]
    fn test_same_input_and_output_dir_rejected() {
        let temp = TempDir::new().unwrap();
        let raw = "{\"instruction\": \"a\", \"output\": \"b\"}\n";
        std::fs::write(temp.path().join("train.jsonl"), raw).unwrap();

        let err = DirectoryStore::new(temp.path(), temp.path()).unwrap_err();
        assert!(matches!(err, SerializerError::InvalidConfig(_)));

        // same directory spelled differently
        let aliased = temp.path().join("nested").join("..");
        std::fs::create_dir_all(temp.path().join("nested")).unwrap();
        assert!(DirectoryStore::new(temp.path(), &aliased).is_err());

        assert_eq!(
            std::fs::read_to_string(temp.path().join("train.jsonl")).unwrap(),
            raw
        );
    }

    #[test]
    fn test_directory_write_truncates_then_appends() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("train.jsonl"), "stale\n").unwrap();

        let mut store = DirectoryStore::new(temp.path(), &out).unwrap();
        store.write("train", &[example(5)]).unwrap();
        store.write("train", &[example(6), example(7)]).unwrap();

        let text = std::fs::read_to_string(store.output_path("train")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let first: TrainingExample = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first, example(5));
        assert!(lines[2].contains("\"input_ids\":[7,2]"));
    }

    #[test]
    fn test_memory_store_appends() {
        let mut store = MemoryStore::new().with_split("train", vec![Record::new()]);
        store.write("train", &[example(1)]).unwrap();
        store.write("train", &[example(2)]).unwrap();
        assert_eq!(store.output("train").len(), 2);
        assert!(store.output("validation").is_empty());
        assert!(store.read_all("validation").is_err());
    }

    #[test]
    fn test_split_train_validation() {
        let records: Vec<Record> = (0..20).map(|i| Record::new().with("id", i)).collect();
        let (train, val) = split_train_validation(records.clone(), 0.25);
        assert_eq!(train.len(), 15);
        assert_eq!(val.len(), 5);

        let (train_again, val_again) = split_train_validation(records.clone(), 0.25);
        assert_eq!(train, train_again);
        assert_eq!(val, val_again);

        let (all, none) = split_train_validation(records, 0.0);
        assert_eq!(all.len(), 20);
        assert!(none.is_empty());
    }
}
