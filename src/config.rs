use crate::error::ConfigError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_CONFIG_PATH: &str = "landsat-bq.toml";
pub const DEFAULT_CATALOG_URL: &str = "https://landsatlook.usgs.gov/stac-server/search";
pub const DEFAULT_BIGQUERY_URL: &str = "https://bigquery.googleapis.com";

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub table: String,
    #[serde(default = "default_price_per_tib")]
    pub price_per_tib: f64,
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: f64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,
    #[serde(default = "default_catalog_collection")]
    pub catalog_collection: String,
    #[serde(default = "default_catalog_page_size")]
    pub catalog_page_size: u32,
    #[serde(default = "default_bigquery_url")]
    pub bigquery_url: String,
    /// OAuth bearer token, e.g. the output of `gcloud auth print-access-token`
    #[serde(default, skip_serializing)]
    pub access_token: Option<String>,
}

fn default_price_per_tib() -> f64 {
    6.25
}

fn default_warning_threshold() -> f64 {
    0.001
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}

fn default_catalog_url() -> String {
    DEFAULT_CATALOG_URL.to_string()
}

fn default_catalog_collection() -> String {
    "landsat-c2l1".to_string()
}

fn default_catalog_page_size() -> u32 {
    500
}

fn default_bigquery_url() -> String {
    DEFAULT_BIGQUERY_URL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str("").expect("Every field has a default")
    }
}

impl Config {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Reads the file if it exists, then applies environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = if path.as_ref().exists() {
            Self::read(path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_env(self: &mut Self, var: impl Fn(&str) -> Option<String>) {
        if let Some(project) = var("LANDSAT_BQ_PROJECT") {
            self.project = project;
        }
        if let Some(table) = var("LANDSAT_BQ_TABLE") {
            self.table = table;
        }
        if let Some(token) = var("GOOGLE_OAUTH_ACCESS_TOKEN") {
            self.access_token = Some(token);
        }
    }

    pub fn table_id(self: &Self) -> Result<TableId, ConfigError> {
        if self.table.is_empty() {
            return Err(ConfigError::MissingRequired("table"));
        }
        self.table.parse()
    }

    pub fn validate(self: &Self) -> Result<(), ConfigError> {
        if self.project.is_empty() {
            return Err(ConfigError::MissingRequired("project"));
        }
        self.table_id()?;
        if self.access_token.is_none() {
            return Err(ConfigError::MissingRequired(
                "access_token (or GOOGLE_OAUTH_ACCESS_TOKEN)",
            ));
        }
        Ok(())
    }
}

/// A fully-qualified BigQuery table id, `project.dataset.table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableId {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl FromStr for TableId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            [project, dataset, table]
                if !project.is_empty() && !dataset.is_empty() && !table.is_empty() =>
            {
                Ok(Self {
                    project: project.to_string(),
                    dataset: dataset.to_string(),
                    table: table.to_string(),
                })
            }
            _ => Err(ConfigError::InvalidTableId(s.to_string())),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}
