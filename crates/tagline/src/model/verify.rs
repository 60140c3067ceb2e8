use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokenizers::Tokenizer;

use crate::config::ModelConfig;
use crate::error::ModelError;

const INDEX_FILE: &str = "model.safetensors.index.json";
const SINGLE_WEIGHT_FILE: &str = "model.safetensors";

/// A model directory that passed the structural check.
#[derive(Debug, Clone, Serialize)]
pub struct ModelDirectory {
    pub root: PathBuf,
    pub weight_files: Vec<PathBuf>,
    pub total_weight_bytes: u64,
    pub vocab_size: usize,
}

impl ModelDirectory {
    /// Path of a file inside the model directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

/// Check that the configured model directory holds a complete checkpoint.
///
/// The check is structural: metadata files present, weight shards present and large
/// enough in total, tokenizer loadable with a plausible vocabulary.
///
/// # Errors
///
/// * [`ModelError::NotFound`] if the directory does not exist.
/// * [`ModelError::Corrupt`] for any failed check.
pub fn verify_model_dir(config: &ModelConfig) -> Result<ModelDirectory, ModelError> {
    let root = config.dir.as_path();
    if !root.is_dir() {
        return Err(ModelError::NotFound(root.to_path_buf()));
    }

    let missing = config
        .required_files
        .iter()
        .filter(|name| !root.join(name).is_file())
        .map(String::as_str)
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(ModelError::corrupt(
            root,
            format!("missing metadata files: {}", missing.join(", ")),
        ));
    }

    let weight_files = weight_shards(root)?;

    let mut total_weight_bytes = 0u64;
    for file in &weight_files {
        let meta = std::fs::metadata(file).map_err(|e| {
            ModelError::corrupt(root, format!("cannot stat {}: {e}", file.display()))
        })?;
        total_weight_bytes += meta.len();
    }
    if total_weight_bytes < config.min_weight_bytes {
        return Err(ModelError::corrupt(
            root,
            format!(
                "weight files total {:.2} GB, expected at least {:.2} GB; the download is probably incomplete",
                total_weight_bytes as f64 / 1e9,
                config.min_weight_bytes as f64 / 1e9,
            ),
        ));
    }

    let tokenizer = Tokenizer::from_file(root.join("tokenizer.json"))
        .map_err(|e| ModelError::corrupt(root, format!("tokenizer failed to load: {e}")))?;
    let vocab_size = tokenizer.get_vocab_size(true);
    if vocab_size < config.min_vocab_size {
        return Err(ModelError::corrupt(
            root,
            format!(
                "tokenizer vocabulary too small ({vocab_size} < {})",
                config.min_vocab_size
            ),
        ));
    }

    log::debug!(
        "Verified model directory {}: {} weight files, {:.2} GB, vocabulary {vocab_size}",
        root.display(),
        weight_files.len(),
        total_weight_bytes as f64 / 1e9,
    );

    Ok(ModelDirectory {
        root: root.to_path_buf(),
        weight_files,
        total_weight_bytes,
        vocab_size,
    })
}

// shards named by the safetensors index, or found by name when there is no index
fn weight_shards(root: &Path) -> Result<Vec<PathBuf>, ModelError> {
    let index_path = root.join(INDEX_FILE);
    if index_path.is_file() {
        let data = std::fs::read_to_string(&index_path)
            .map_err(|e| ModelError::corrupt(root, format!("cannot read {INDEX_FILE}: {e}")))?;
        let index: serde_json::Value = serde_json::from_str(&data)
            .map_err(|e| ModelError::corrupt(root, format!("cannot parse {INDEX_FILE}: {e}")))?;
        let weight_map = index
            .get("weight_map")
            .and_then(serde_json::Value::as_object)
            .ok_or_else(|| ModelError::corrupt(root, format!("{INDEX_FILE} has no weight_map")))?;

        let names = weight_map
            .values()
            .filter_map(serde_json::Value::as_str)
            .collect::<BTreeSet<_>>();
        if names.is_empty() {
            return Err(ModelError::corrupt(
                root,
                format!("{INDEX_FILE} lists no weight files"),
            ));
        }

        let missing = names
            .iter()
            .filter(|name| !root.join(name).is_file())
            .copied()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(ModelError::corrupt(
                root,
                format!(
                    "index present but weight files not fully downloaded, missing: {}",
                    missing.join(", ")
                ),
            ));
        }

        return Ok(names.into_iter().map(|name| root.join(name)).collect());
    }

    let entries = std::fs::read_dir(root)
        .map_err(|e| ModelError::corrupt(root, format!("cannot list directory: {e}")))?;
    let mut shards = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(is_weight_file)
        })
        .collect::<Vec<_>>();
    shards.sort();

    if shards.is_empty() {
        return Err(ModelError::corrupt(
            root,
            "no weight files found (expected model-XXXXX-of-YYYYY.safetensors)",
        ));
    }

    Ok(shards)
}

fn is_weight_file(name: &str) -> bool {
    if name == SINGLE_WEIGHT_FILE {
        return true;
    }

    let Some(stem) = name
        .strip_prefix("model-")
        .and_then(|n| n.strip_suffix(".safetensors"))
    else {
        return false;
    };

    let is_number = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    match stem.split_once("-of-") {
        Some((part, total)) => is_number(part) && is_number(total),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKENIZER: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/tokenizer.json");

    fn small_policy(dir: &Path) -> ModelConfig {
        ModelConfig {
            dir: dir.to_path_buf(),
            min_weight_bytes: 64,
            min_vocab_size: 4,
            ..Default::default()
        }
    }

    fn write_metadata(dir: &Path) -> std::io::Result<()> {
        for name in [
            "config.json",
            "preprocessor_config.json",
            "tokenizer_config.json",
        ] {
            std::fs::write(dir.join(name), "{}")?;
        }
        std::fs::copy(TOKENIZER, dir.join("tokenizer.json"))?;
        Ok(())
    }

    #[test]
    fn weight_file_names() {
        assert!(is_weight_file("model.safetensors"));
        assert!(is_weight_file("model-00001-of-00004.safetensors"));
        assert!(is_weight_file("model-2-of-3.safetensors"));
        assert!(!is_weight_file("model-00001-of-.safetensors"));
        assert!(!is_weight_file("model-a-of-00004.safetensors"));
        assert!(!is_weight_file("pytorch_model-00001-of-00004.bin"));
        assert!(!is_weight_file("model.safetensors.index.json"));
    }

    #[test]
    fn missing_directory_is_not_found() {
        let config = small_policy(Path::new("/definitely/not/a/model/dir"));
        let result = verify_model_dir(&config);
        assert!(matches!(result, Err(ModelError::NotFound(_))));
    }

    #[test]
    fn missing_metadata_is_corrupt() -> std::io::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        write_metadata(tmp_dir.path())?;
        std::fs::remove_file(tmp_dir.path().join("config.json"))?;
        std::fs::write(tmp_dir.path().join("model.safetensors"), vec![0u8; 128])?;

        match verify_model_dir(&small_policy(tmp_dir.path())) {
            Err(ModelError::Corrupt { reason, .. }) => assert!(reason.contains("config.json")),
            other => panic!("expected corrupt, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn no_weights_is_corrupt() -> std::io::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        write_metadata(tmp_dir.path())?;

        let result = verify_model_dir(&small_policy(tmp_dir.path()));
        assert!(matches!(result, Err(ModelError::Corrupt { .. })));
        Ok(())
    }

    #[test]
    fn undersized_shards_are_corrupt() -> std::io::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        write_metadata(tmp_dir.path())?;
        std::fs::write(
            tmp_dir.path().join("model-00001-of-00002.safetensors"),
            vec![0u8; 16],
        )?;
        std::fs::write(
            tmp_dir.path().join("model-00002-of-00002.safetensors"),
            vec![0u8; 16],
        )?;

        match verify_model_dir(&small_policy(tmp_dir.path())) {
            Err(ModelError::Corrupt { reason, .. }) => assert!(reason.contains("incomplete")),
            other => panic!("expected corrupt, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn index_with_missing_shard_is_corrupt() -> std::io::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        write_metadata(tmp_dir.path())?;
        std::fs::write(
            tmp_dir.path().join(INDEX_FILE),
            r#"{ "weight_map": {
                "a.weight": "model-00001-of-00002.safetensors",
                "b.weight": "model-00002-of-00002.safetensors"
            } }"#,
        )?;
        std::fs::write(
            tmp_dir.path().join("model-00001-of-00002.safetensors"),
            vec![0u8; 128],
        )?;

        match verify_model_dir(&small_policy(tmp_dir.path())) {
            Err(ModelError::Corrupt { reason, .. }) => {
                assert!(reason.contains("model-00002-of-00002.safetensors"))
            }
            other => panic!("expected corrupt, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn small_vocabulary_is_corrupt() -> std::io::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        write_metadata(tmp_dir.path())?;
        std::fs::write(tmp_dir.path().join("model.safetensors"), vec![0u8; 128])?;

        let config = ModelConfig {
            min_vocab_size: 150_000,
            ..small_policy(tmp_dir.path())
        };
        match verify_model_dir(&config) {
            Err(ModelError::Corrupt { reason, .. }) => assert!(reason.contains("vocabulary")),
            other => panic!("expected corrupt, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn complete_sharded_checkpoint() -> Result<(), Box<dyn std::error::Error>> {
        let tmp_dir = tempfile::tempdir()?;
        write_metadata(tmp_dir.path())?;
        std::fs::write(
            tmp_dir.path().join(INDEX_FILE),
            r#"{ "weight_map": {
                "a.weight": "model-00001-of-00002.safetensors",
                "b.weight": "model-00002-of-00002.safetensors",
                "c.weight": "model-00002-of-00002.safetensors"
            } }"#,
        )?;
        for name in [
            "model-00001-of-00002.safetensors",
            "model-00002-of-00002.safetensors",
        ] {
            std::fs::write(tmp_dir.path().join(name), vec![0u8; 40])?;
        }

        let directory = verify_model_dir(&small_policy(tmp_dir.path()))?;
        assert_eq!(directory.weight_files.len(), 2);
        assert_eq!(directory.total_weight_bytes, 80);
        assert_eq!(directory.vocab_size, 6);
        assert_eq!(directory.file("config.json"), tmp_dir.path().join("config.json"));
        Ok(())
    }
}
