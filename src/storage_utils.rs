use serde::{Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::config::AppConfig;
use crate::error::{PipelineError, ProcessError};

const CONFIG_FILE: &str = "config";

/// A loaded configuration and where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    pub path: PathBuf,
    /// False when the file was missing and defaults were used.
    pub from_file: bool,
}

// STORAGE MANAGER

pub struct AsyncStorageManager {
    // Absolute path of the storage root (e.g., ".../target/debug/storage")
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// Creates a manager rooted at `base_dir`, creating the directory if needed.
    pub async fn new<P: AsRef<Path>>(base_dir: P) -> anyhow::Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir).await?;
        }
        Ok(Self { base_dir })
    }

    /// Creates a manager rooted next to the running executable.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> anyhow::Result<Self> {
        let exe_path = std::env::current_exe()?;
        let base_dir = exe_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Could not find binary directory"))?
            .join(relative_path);

        Self::new(base_dir).await
    }

    /// Resolves a path relative to the storage root. Absolute paths pass through.
    pub fn resolve<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.base_dir.join(path)
    }

    /// Resolves `dir` and makes sure it exists.
    pub async fn ensure_dir<P: AsRef<Path>>(&self, dir: P) -> std::io::Result<PathBuf> {
        let path = self.resolve(dir);
        fs::create_dir_all(&path).await?;
        Ok(path)
    }

    /// Writes `bytes` through a `.tmp` sibling and renames it into place, so a
    /// crash mid-write never leaves a truncated file behind.
    async fn write_atomic(&self, final_path: &Path, bytes: Vec<u8>) -> std::io::Result<()> {
        let mut tmp_name = final_path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        fs::write(&tmp_path, bytes).await?;
        fs::rename(tmp_path, final_path).await
    }

    /// Atomically writes a text document such as a rendered report.
    pub async fn save_text(&self, path: &Path, content: &str) -> std::io::Result<()> {
        self.write_atomic(path, content.as_bytes().to_vec()).await
    }

    /// Loads `config.json` from the root, or from `override_path` when given.
    ///
    /// A missing file falls back to defaults; a malformed one is fatal.
    /// Runs before logging is set up, so the caller reports the fallback.
    pub async fn load_config(&self, override_path: Option<&Path>) -> Result<LoadedConfig, PipelineError> {
        let path = match override_path {
            Some(p) => self.resolve(p),
            None => self.resolve(format!("{}.json", CONFIG_FILE)),
        };

        match fs::read(&path).await {
            Ok(bytes) => Ok(LoadedConfig {
                config: AppConfig::from_json(&path, &bytes)?,
                path,
                from_file: true,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LoadedConfig {
                config: AppConfig::default(),
                path,
                from_file: false,
            }),
            Err(e) => Err(PipelineError::Config {
                path,
                reason: e.to_string(),
            }),
        }
    }

    /// Writes `rows` as CSV with a header line taken from the row type.
    pub async fn save_csv<T: Serialize>(&self, path: &Path, rows: &[T]) -> Result<(), ProcessError> {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        for row in rows {
            wtr.serialize(row).map_err(|source| ProcessError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        let bytes = wtr.into_inner().map_err(|e| e.into_error())?;
        self.write_atomic(path, bytes).await?;
        Ok(())
    }

    pub async fn load_csv<T: DeserializeOwned>(&self, path: &Path) -> Result<Vec<T>, ProcessError> {
        let bytes = fs::read(path).await?;
        let mut rdr = csv::Reader::from_reader(bytes.as_slice());
        rdr.deserialize()
            .collect::<Result<Vec<T>, _>>()
            .map_err(|source| ProcessError::Read {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Lists regular files with the given extension directly inside `dir`.
    /// A missing directory yields an empty list.
    pub async fn list_files<P: AsRef<Path>>(&self, dir: P, extension: &str) -> std::io::Result<Vec<PathBuf>> {
        let dir = self.resolve(dir);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file()
                && path.extension().and_then(|e| e.to_str()) == Some(extension)
            {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        name: String,
        value: Option<f64>,
    }

    #[tokio::test]
    async fn text_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path()).await.unwrap();
        let path = storage.resolve("report.html");
        storage.save_text(&path, "<html></html>").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "<html></html>");
        assert!(!dir.path().join("report.html.tmp").exists());
    }

    #[tokio::test]
    async fn csv_keeps_missing_values() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path()).await.unwrap();
        let rows = vec![
            Row { name: "a".into(), value: None },
            Row { name: "b".into(), value: Some(0.1 + 0.2) },
        ];
        let path = storage.resolve("rows.csv");
        storage.save_csv(&path, &rows).await.unwrap();
        let back: Vec<Row> = storage.load_csv(&path).await.unwrap();
        assert_eq!(back, rows);
    }

    #[tokio::test]
    async fn missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path()).await.unwrap();
        let loaded = storage.load_config(None).await.unwrap();
        assert!(!loaded.from_file);
        assert_eq!(loaded.path, dir.path().join("config.json"));
        assert_eq!(loaded.config.alerts.volume_multiplier, 2.0);
    }

    #[tokio::test]
    async fn config_file_is_reported_as_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("custom.json"), r#"{ "symbols": ["IBM"] }"#).unwrap();

        let loaded = storage.load_config(Some(Path::new("custom.json"))).await.unwrap();
        assert!(loaded.from_file);
        assert_eq!(loaded.config.symbols, vec!["IBM".to_string()]);
    }

    #[tokio::test]
    async fn list_files_filters_extension() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("A_20240101.csv"), "x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        let files = storage.list_files(".", "csv").await.unwrap();
        assert_eq!(files.len(), 1);
        assert!(storage.list_files("nope", "csv").await.unwrap().is_empty());
    }
}
