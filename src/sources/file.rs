//! File-based configuration source.

use super::ConfigurationSource;
use crate::core::ConfigData;
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use config::File;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Extensions probed when resolving a file by name, in order.
const EXTENSIONS: [&str; 4] = ["yaml", "yml", "toml", "json"];

/// File-based configuration source.
///
/// Loads configuration from YAML, TOML, or JSON files with automatic format detection
/// based on file extension. Read-only: `set` and `watch` are unsupported.
///
/// # Examples
///
/// ```rust,no_run
/// use overlay_config::sources::FileSource;
///
/// let exact = FileSource::new("config/default.yaml");
/// // Probes config/service.{yaml,yml,toml,json}, then ./service.*, then ./configs/service.*
/// let searched = FileSource::search("config", "service");
/// ```
pub struct FileSource {
    location: Location,
}

enum Location {
    Exact(PathBuf),
    Search { dirs: Vec<PathBuf>, name: String },
}

impl FileSource {
    /// Create a source for one exact file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::Exact(path.into()),
        }
    }

    /// Create a source that resolves `<name>.<ext>` in `dir`, then `.`, then `./configs`.
    pub fn search(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            location: Location::Search {
                dirs: vec![dir.into(), PathBuf::from("."), PathBuf::from("./configs")],
                name: name.into(),
            },
        }
    }

    /// Resolve the file this source reads.
    ///
    /// A missing file is a [`ConfigError::Format`]; any other filesystem
    /// failure on an exact path surfaces as [`ConfigError::IoError`].
    pub fn resolve(&self) -> Result<PathBuf> {
        match &self.location {
            Location::Exact(path) => {
                validate_extension(path)?;
                match fs::metadata(path) {
                    Ok(_) => Ok(path.clone()),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ConfigError::Format(
                        format!("Configuration file not found: {}", path.display()),
                    )),
                    Err(e) => Err(e.into()),
                }
            }
            Location::Search { dirs, name } => dirs
                .iter()
                .flat_map(|dir| EXTENSIONS.iter().map(move |ext| dir.join(format!("{name}.{ext}"))))
                .find(|candidate| candidate.is_file())
                .ok_or_else(|| {
                    ConfigError::Format(format!(
                        "Configuration file '{}' not found in {:?}",
                        name, dirs
                    ))
                }),
        }
    }

    /// Parse the file synchronously.
    pub fn load(&self) -> Result<ConfigData> {
        let path = self.resolve()?;

        let parsed = config::Config::builder()
            .add_source(File::from(path.clone()).required(true))
            .build()
            .map_err(|e| {
                ConfigError::Format(format!("Failed to load {}: {}", path.display(), e))
            })?;

        parsed.try_deserialize::<ConfigData>().map_err(|e| {
            ConfigError::Format(format!("Failed to parse {}: {}", path.display(), e))
        })
    }
}

fn validate_extension(path: &Path) -> Result<()> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .ok_or_else(|| {
            ConfigError::Format(format!(
                "Unable to determine file format for: {}",
                path.display()
            ))
        })?;

    if EXTENSIONS.contains(&extension) {
        Ok(())
    } else {
        Err(ConfigError::Format(format!(
            "Unsupported file extension: {}. Supported: .yaml, .yml, .toml, .json",
            extension
        )))
    }
}

#[async_trait]
impl ConfigurationSource for FileSource {
    async fn get(&self) -> Result<ConfigData> {
        self.load()
    }

    fn name(&self) -> String {
        match &self.location {
            Location::Exact(path) => format!("file:{}", path.display()),
            Location::Search { name, .. } => format!("file:{name}"),
        }
    }
}
