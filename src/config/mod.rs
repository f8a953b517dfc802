// src/config/mod.rs
//! Pipeline configuration files.

use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;

use crate::load::{Sink, WriteMode};

pub const DEFAULT_TEMPLATE: &str = "templates/transform_template.py";
pub const DEFAULT_CONFIG_DIR: &str = "sample_configs";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub details: PipelineDetails,
    pub extract_files: Vec<InputFile>,
    #[serde(alias = "output_table")]
    pub output: OutputTable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDetails {
    /// Base directory for schema and transformer units.
    pub project_path: PathBuf,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Transformer unit, relative to `project_path`, without `.py`.
    pub transformer_pipeline: String,
    #[serde(default = "default_template")]
    pub template_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputFile {
    pub data_file: PathBuf,
    /// Schema unit, relative to `project_path`, without `.py`.
    pub schema_file: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputTable {
    pub schema_file: String,
    pub output_path: PathBuf,
    pub table_name: String,
    pub db: String,
    pub data_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink: Option<Sink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<WriteMode>,
    #[serde(default = "default_partitions")]
    pub partition_cols: Vec<String>,
}

fn default_template() -> PathBuf {
    PathBuf::from(DEFAULT_TEMPLATE)
}

fn default_partitions() -> Vec<String> {
    vec!["data_label".to_string()]
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("unable to read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("error reading configuration file {}; check format and try again", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("unable to serialize configuration")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("invalid glob pattern")]
    Pattern(#[from] glob::PatternError),
}

impl PipelineConfig {
    /// Rejects blank required fields and an empty input list.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("details.name", self.details.name.as_str()),
            ("details.transformer_pipeline", self.details.transformer_pipeline.as_str()),
            ("output.schema_file", self.output.schema_file.as_str()),
            ("output.table_name", self.output.table_name.as_str()),
            ("output.db", self.output.db.as_str()),
            ("output.data_label", self.output.data_label.as_str()),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{} must not be empty", field)));
            }
        }
        if self.extract_files.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [[extract_files]] entry is required".into(),
            ));
        }
        for (i, input) in self.extract_files.iter().enumerate() {
            if input.data_file.as_os_str().is_empty() || input.schema_file.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "extract_files[{}] needs both data_file and schema_file",
                    i
                )));
            }
        }
        Ok(())
    }

    /// `<project_path>/<relative>.py`
    pub fn unit_path(&self, relative: &str) -> PathBuf {
        self.details.project_path.join(format!("{}.py", relative))
    }

    pub fn transformer_path(&self) -> PathBuf {
        self.unit_path(&self.details.transformer_pipeline)
    }
}

pub fn load_pipeline_config(path: impl AsRef<Path>) -> Result<PipelineConfig, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: PipelineConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    debug!(path = %path.display(), name = %config.details.name, "configuration loaded");
    Ok(config)
}

/// Writes `<dir>/<name>.toml`, returning its path.
pub fn save_pipeline_config(
    config: &PipelineConfig,
    name: &str,
    dir: impl AsRef<Path>,
) -> Result<PathBuf, ConfigError> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = dir.join(format!("{}.toml", name));
    let text = toml::to_string_pretty(config)?;
    fs::write(&path, text).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// All `*.toml` files directly under `dir`, sorted.
pub fn list_configs(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, ConfigError> {
    let pattern = dir.as_ref().join("*.toml");
    let mut found: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())?
        .filter_map(Result::ok)
        .collect();
    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const CONFIG: &str = indoc! {r#"
        [details]
        project_path = "demos/set1"
        name = "set1 purchases"
        description = "purchases by customer"
        transformer_pipeline = "transformers/purchases_transformer"

        [[extract_files]]
        data_file = "demos/set1/data/purchases.csv"
        schema_file = "models/purchases_input"
        label = "purchases"

        [output]
        schema_file = "models/purchases_output"
        output_path = "output"
        table_name = "purchases"
        db = "sales"
        data_label = "set1"
        sink = "duckdb"
    "#};

    #[test]
    fn parses_with_defaults() -> anyhow::Result<()> {
        let config: PipelineConfig = toml::from_str(CONFIG)?;
        config.validate()?;
        assert_eq!(config.details.template_file, PathBuf::from(DEFAULT_TEMPLATE));
        assert_eq!(config.output.partition_cols, vec!["data_label".to_string()]);
        assert_eq!(config.output.sink, Some(Sink::DuckDb));
        assert_eq!(config.output.mode, None);
        assert_eq!(
            config.transformer_path(),
            PathBuf::from("demos/set1/transformers/purchases_transformer.py")
        );
        Ok(())
    }

    #[test]
    fn accepts_output_table_section_name() -> anyhow::Result<()> {
        let text = CONFIG.replace("[output]", "[output_table]");
        let config: PipelineConfig = toml::from_str(&text)?;
        assert_eq!(config.output.table_name, "purchases");
        Ok(())
    }

    #[test]
    fn save_then_load_gives_the_same_config() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let config: PipelineConfig = toml::from_str(CONFIG)?;
        let path = save_pipeline_config(&config, "set1", dir.path())?;
        assert_eq!(path, dir.path().join("set1.toml"));
        assert_eq!(load_pipeline_config(&path)?, config);
        assert_eq!(list_configs(dir.path())?, vec![path]);
        Ok(())
    }

    #[test]
    fn missing_file_and_bad_content() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            load_pipeline_config(&missing),
            Err(ConfigError::NotFound(p)) if p == missing
        ));

        let broken = dir.path().join("broken.toml");
        fs::write(&broken, "[details]\nname = 3\n")?;
        assert!(matches!(
            load_pipeline_config(&broken),
            Err(ConfigError::Parse { .. })
        ));
        Ok(())
    }

    #[test]
    fn validation_rejects_blank_fields() -> anyhow::Result<()> {
        let mut config: PipelineConfig = toml::from_str(CONFIG)?;
        config.output.db = " ".into();
        assert_eq!(
            config.validate().unwrap_err().to_string(),
            "invalid configuration: output.db must not be empty"
        );

        let mut config: PipelineConfig = toml::from_str(CONFIG)?;
        config.extract_files.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        Ok(())
    }
}
