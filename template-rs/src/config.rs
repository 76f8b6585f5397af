use crate::error::{Result, TemplateError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides, e.g. `TEMPLATE_RS_STORAGE__DATA_DIR`
pub const ENV_PREFIX: &str = "TEMPLATE_RS";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub versions: VersionConfig,
    pub search: SearchConfig,
    pub recommendations: RecommendationConfig,
    pub variables: VariableConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root directory holding template files, index and version files
    pub data_dir: PathBuf,
    /// SQLite URL of the analytics database
    pub analytics_database_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VersionConfig {
    /// Versions kept per template by `cleanup_old_versions` when no count is given
    pub keep_count: usize,
    /// Keep ancestors of retained versions when pruning
    pub preserve_lineage: bool,
    pub default_author: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    pub default_limit: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecommendationConfig {
    /// Recent usage contexts remembered per template
    pub max_contexts: usize,
    pub default_limit: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VariableConfig {
    /// Placeholders every recipient record is expected to provide
    pub default_variables: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TemplateError::Config(e.to_string()))?;

        toml::from_str(&content).map_err(|e| TemplateError::Config(e.to_string()))
    }

    /// Load defaults, then the optional TOML file, then `TEMPLATE_RS_*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&Config::default())
            .map_err(|e| TemplateError::Config(e.to_string()))?;

        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize::<Config>())
            .map_err(|e| TemplateError::Config(e.to_string()))
    }

    /// Defaults rooted at the given data directory
    pub fn with_data_dir<P: Into<PathBuf>>(data_dir: P) -> Self {
        let data_dir = data_dir.into();
        let mut config = Config::default();
        config.storage.analytics_database_url =
            format!("sqlite://{}", data_dir.join("email_analytics.db").display());
        config.storage.data_dir = data_dir;
        config
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.storage.data_dir.join("templates")
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.storage.data_dir.join("versions")
    }

    pub fn index_file(&self) -> PathBuf {
        self.storage.data_dir.join("index.json")
    }

    pub fn categories_file(&self) -> PathBuf {
        self.storage.data_dir.join("categories.json")
    }

    pub fn search_index_file(&self) -> PathBuf {
        self.storage.data_dir.join("search_index.json")
    }

    pub fn recommendations_file(&self) -> PathBuf {
        self.storage.data_dir.join("recommendations.json")
    }

    pub fn journal_file(&self) -> PathBuf {
        self.storage.data_dir.join("journal.jsonl")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                data_dir: PathBuf::from("templates_data"),
                analytics_database_url: "sqlite://templates_data/email_analytics.db".to_string(),
            },
            versions: VersionConfig {
                keep_count: 10,
                preserve_lineage: false,
                default_author: "system".to_string(),
            },
            search: SearchConfig { default_limit: 50 },
            recommendations: RecommendationConfig {
                max_contexts: 50,
                default_limit: 5,
            },
            variables: VariableConfig {
                default_variables: ["name", "email", "phone", "company"]
                    .iter()
                    .map(|v| v.to_string())
                    .collect(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}
