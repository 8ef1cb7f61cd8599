use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Highlighter index behavior
    #[serde(default)]
    pub markup: MarkupConfig,

    /// Incremental build dirty-file tracking
    #[serde(default)]
    pub build: BuildConfig,
}

fn default_true() -> bool {
    true
}

/// Cross-tree order of the flattened highlighter list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AllHighlightersOrder {
    /// Exact-range highlighters first, then line highlighters, each by start offset
    #[default]
    TreeOrder,
    /// One list ordered by affected start offset
    Merged,
}

/// Markup model configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MarkupConfig {
    /// Remove a highlighter once all of its text has been deleted (persistent
    /// line highlighters are never removed this way)
    #[serde(default = "default_true")]
    pub invalidate_deleted_ranges: bool,

    /// Order of the flattened highlighter list
    #[serde(default)]
    pub all_highlighters_order: AllHighlightersOrder,
}

impl Default for MarkupConfig {
    fn default() -> Self {
        Self {
            invalidate_deleted_ranges: true,
            all_highlighters_order: AllHighlightersOrder::default(),
        }
    }
}

/// Build state configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BuildConfig {
    /// Slack in milliseconds when comparing a file's modification stamp to the
    /// build start; a file is dirty only if modified later than start + slack
    #[serde(default)]
    pub stamp_tolerance_ms: u64,
}

const MAX_STAMP_TOLERANCE_MS: u64 = 60_000;

impl Config {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Config =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;

        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.build.stamp_tolerance_ms > MAX_STAMP_TOLERANCE_MS {
            return Err(ConfigError::StampToleranceTooLarge {
                value: self.build.stamp_tolerance_ms,
                max: MAX_STAMP_TOLERANCE_MS,
            });
        }
        Ok(())
    }

    /// JSON schema of the configuration file, pretty-printed
    pub fn json_schema() -> Result<String, ConfigError> {
        serde_json::to_string_pretty(&schemars::schema_for!(Config)).map_err(ConfigError::Serialize)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    /// Reading or writing the config file failed
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The config file is not valid JSON for [`Config`]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    Serialize(serde_json::Error),
    StampToleranceTooLarge { value: u64, max: u64 },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "cannot access config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "invalid config {}: {source}", path.display())
            }
            ConfigError::Serialize(source) => write!(f, "cannot serialize config: {source}"),
            ConfigError::StampToleranceTooLarge { value, max } => {
                write!(f, "build.stamp_tolerance_ms is {value}, must be <= {max}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse { source, .. } | ConfigError::Serialize(source) => Some(source),
            ConfigError::StampToleranceTooLarge { .. } => None,
        }
    }
}
