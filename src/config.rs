use crate::explain::LimeSettings;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse configuration file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level service configuration.
///
/// ```toml
/// bind = "0.0.0.0:9000"
///
/// [artifacts]
/// classifier = "artifacts/model.toml"
/// scaler = "artifacts/scaler.toml"
/// features = "artifacts/features.toml"
/// reference = "artifacts/reference.csv"
///
/// [explain]
/// top_k = 5
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub artifacts: ArtifactPaths,
    #[serde(default)]
    pub explain: ExplainConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ArtifactPaths {
    pub classifier: PathBuf,
    pub scaler: PathBuf,
    pub features: PathBuf,
    pub reference: PathBuf,
    /// Reject feature lists naming features no clinical field provides.
    #[serde(default = "default_strict")]
    pub strict_features: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExplainConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_num_samples")]
    pub num_samples: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Multiplied by `sqrt(n_features)`.
    #[serde(default = "default_kernel_width")]
    pub kernel_width: f64,
}

fn default_bind() -> String {
    "0.0.0.0:9000".to_string()
}

fn default_strict() -> bool {
    true
}

fn default_top_k() -> usize {
    5
}

fn default_num_samples() -> usize {
    LimeSettings::default().num_samples
}

fn default_seed() -> u64 {
    LimeSettings::default().seed
}

fn default_kernel_width() -> f64 {
    LimeSettings::default().kernel_width_factor
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self {
            classifier: PathBuf::from("artifacts/model.toml"),
            scaler: PathBuf::from("artifacts/scaler.toml"),
            features: PathBuf::from("artifacts/features.toml"),
            reference: PathBuf::from("artifacts/reference.csv"),
            strict_features: default_strict(),
        }
    }
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            num_samples: default_num_samples(),
            seed: default_seed(),
            kernel_width: default_kernel_width(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            artifacts: ArtifactPaths::default(),
            explain: ExplainConfig::default(),
        }
    }
}

impl ExplainConfig {
    pub fn lime_settings(&self) -> LimeSettings {
        LimeSettings {
            num_samples: self.num_samples,
            kernel_width_factor: self.kernel_width,
            seed: self.seed,
        }
    }
}

impl ServiceConfig {
    /// Loads a configuration file. Relative artifact paths are resolved against
    /// the directory containing the file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: ServiceConfig =
            toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.artifacts.resolve_against(base);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.explain.num_samples < 2 {
            return Err(ConfigError::Invalid(format!(
                "explain.num_samples must be at least 2, got {}",
                self.explain.num_samples
            )));
        }
        if !(self.explain.kernel_width > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "explain.kernel_width must be positive, got {}",
                self.explain.kernel_width
            )));
        }
        Ok(())
    }
}

impl ArtifactPaths {
    fn resolve_against(&mut self, base: &Path) {
        for path in [
            &mut self.classifier,
            &mut self.scaler,
            &mut self.features,
            &mut self.reference,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_fill_missing_sections() {
        let config: ServiceConfig = toml::from_str("").unwrap();
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.explain.top_k, 5);
        assert!(config.artifacts.strict_features);
    }

    #[test]
    fn relative_artifacts_resolve_next_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
bind = "127.0.0.1:8080"

[artifacts]
classifier = "model.toml"
scaler = "/abs/scaler.toml"
features = "nested/features.toml"
reference = "reference.csv"

[explain]
top_k = 3
seed = 7
"#
        )
        .unwrap();

        let config = ServiceConfig::load(&path).unwrap();
        assert_eq!(config.bind, "127.0.0.1:8080");
        assert_eq!(config.artifacts.classifier, dir.path().join("model.toml"));
        assert_eq!(config.artifacts.scaler, PathBuf::from("/abs/scaler.toml"));
        assert_eq!(
            config.artifacts.features,
            dir.path().join("nested/features.toml")
        );
        assert_eq!(config.explain.top_k, 3);
        assert_eq!(config.explain.lime_settings().seed, 7);
        assert_eq!(config.explain.num_samples, 5000);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = toml::from_str::<ServiceConfig>("bnd = \"0.0.0.0:1\"").unwrap_err();
        assert!(err.to_string().contains("bnd"));
    }

    #[test]
    fn invalid_explain_settings_are_rejected() {
        let mut config = ServiceConfig::default();
        config.explain.num_samples = 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = ServiceConfig::default();
        config.explain.kernel_width = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
