use super::types::*;
use crate::error_handling::types::ConfigError;
use crate::storage::types::ImageCategory;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Application configuration structure that defines all runtime parameters.
///
/// The configuration is read from a TOML file whose sections all have defaults,
/// so an empty file (or no file at all) yields a working setup. Command line
/// arguments parsed into [`Args`] override individual values afterwards.
///
/// # Fields Overview
///
/// - `server`: address and port the HTTP interface binds to
/// - `storage`: SQLite database file and pool size
/// - `study`: allowed session sizes and the fallback size
/// - `admin`: optional shared token guarding the admin routes
/// - `scenarios`: study contexts seeded into storage at start-up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub study: StudyConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default = "default_scenarios")]
    pub scenarios: Vec<ScenarioConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            study: StudyConfig::default(),
            admin: AdminConfig::default(),
            scenarios: default_scenarios(),
        }
    }
}

impl Config {
    /// Loads and validates the configuration file at `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let categories = ImageCategory::ALL.len();
        if self.study.allowed_image_counts.is_empty() {
            return Err(ConfigError::NotInRange(
                "study.allowed_image_counts must not be empty".into(),
            ));
        }
        for &n in &self.study.allowed_image_counts {
            if n == 0 || n % categories != 0 {
                return Err(ConfigError::NotInRange(format!(
                    "image count {} is not a positive multiple of {}",
                    n, categories
                )));
            }
        }
        if !self
            .study
            .allowed_image_counts
            .contains(&self.study.default_image_count)
        {
            return Err(ConfigError::NotInRange(format!(
                "default_image_count {} is not an allowed image count",
                self.study.default_image_count
            )));
        }
        if self.storage.max_connections == 0 {
            return Err(ConfigError::NotInRange(
                "storage.max_connections must be at least 1".into(),
            ));
        }

        if self.scenarios.is_empty() {
            return Err(ConfigError::ScenariosEmpty(
                "at least one scenario is required".into(),
            ));
        }
        let mut seen = HashSet::new();
        for scenario in &self.scenarios {
            if !seen.insert(scenario.id.as_str()) {
                return Err(ConfigError::DuplicateScenario(scenario.id.clone()));
            }
        }
        Ok(())
    }

    /// Replaces file values with the ones given on the command line.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(ref bind_address) = args.bind_address {
            self.server.bind_address = bind_address.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(ref database_path) = args.database_path {
            self.storage.database_path = database_path.clone();
        }
    }
}

/// Command line of the study server.
#[derive(Parser, Debug, Clone)]
#[command(name = "annostudy")]
#[command(version)]
#[command(about = "Image-annotation study session server")]
pub struct Args {
    /// Path to a TOML configuration file
    ///
    /// Every section is optional; built-in defaults apply when the file is
    /// omitted.
    pub config_file: Option<PathBuf>,

    /// Network address to bind the HTTP server to
    ///
    /// # Command Line
    /// Use `--bind-address <ADDRESS>` or `ANNOSTUDY_BIND_ADDRESS`
    #[arg(long, env = "ANNOSTUDY_BIND_ADDRESS")]
    pub bind_address: Option<String>,

    /// Port number for the HTTP server
    ///
    /// # Command Line
    /// Use `--port <PORT>` or `ANNOSTUDY_PORT`
    #[arg(long, env = "ANNOSTUDY_PORT")]
    pub port: Option<u16>,

    /// SQLite database file
    ///
    /// Created along with its schema if it does not exist yet.
    #[arg(long, env = "ANNOSTUDY_DATABASE_PATH")]
    pub database_path: Option<PathBuf>,

    /// Dataset root holding one folder per image category
    ///
    /// When given, image files found there are added to the pool before the
    /// server starts.
    #[arg(long)]
    pub seed_images: Option<PathBuf>,
}

impl Args {
    /// Reads the configuration file (if any), then applies the overrides.
    pub fn load_config(&self) -> Result<Config, ConfigError> {
        let mut config = match self.config_file {
            Some(ref path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_args(self);
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn from_args_under_test(extra: &[&str]) -> Result<Args, clap::Error> {
        let mut argv = vec!["annostudy"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv)
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.study.allowed_image_counts, vec![8, 16, 24]);
        assert_eq!(config.scenarios.len(), 4);
        assert!(config.admin.token.is_none());
    }

    #[test]
    fn test_full_file() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 8080

            [study]
            allowed_image_counts = [8, 16]
            default_image_count = 16

            [admin]
            token = "s3cret"

            [[scenarios]]
            id = "smart_camera"
            title = "Smart home security camera"
            description = "Imagine a camera."

            [[scenarios]]
            id = "pilot"
            title = "Pilot"
            description = "Pilot run."
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.study.default_image_count, 16);
        assert_eq!(config.admin.token.as_deref(), Some("s3cret"));
        assert_eq!(config.scenarios.len(), 2);
        assert!(config.scenarios[0].enabled);
        assert!(!config.scenarios[1].enabled);
    }

    #[test]
    fn test_validation_errors() {
        let bad_count = Config::from_toml("[study]\nallowed_image_counts = [8, 12]");
        assert!(matches!(bad_count, Err(ConfigError::NotInRange(_))));

        let bad_default = Config::from_toml("[study]\ndefault_image_count = 32");
        assert!(matches!(bad_default, Err(ConfigError::NotInRange(_))));

        let dup = Config::from_toml(
            "[[scenarios]]\nid = \"a\"\ntitle = \"A\"\ndescription = \"\"\n\
             [[scenarios]]\nid = \"a\"\ntitle = \"B\"\ndescription = \"\"",
        );
        assert!(matches!(dup, Err(ConfigError::DuplicateScenario(ref id)) if id == "a"));

        let empty = Config::from_toml("scenarios = []");
        assert!(matches!(empty, Err(ConfigError::ScenariosEmpty(_))));

        assert!(matches!(
            Config::from_toml("[server\nport = 1"),
            Err(ConfigError::TomlError(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file(Path::new("/nonexistent/annostudy.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }

    #[test]
    #[serial]
    fn test_args_override_file() {
        std::env::remove_var("ANNOSTUDY_PORT");
        std::env::remove_var("ANNOSTUDY_BIND_ADDRESS");
        std::env::remove_var("ANNOSTUDY_DATABASE_PATH");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 4000\nbind_address = \"0.0.0.0\"").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args = from_args_under_test(&[&path, "--port", "5000", "--database-path", "/tmp/x.db"])
            .unwrap_or_else(|e| panic!("{}", e));
        let config = args.load_config().unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.storage.database_path, PathBuf::from("/tmp/x.db"));
        assert!(args.seed_images.is_none());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("ANNOSTUDY_PORT", "4321");
        let args = from_args_under_test(&["--seed-images", "/data/images"]).unwrap();
        std::env::remove_var("ANNOSTUDY_PORT");

        assert!(args.config_file.is_none());
        assert_eq!(args.seed_images, Some(PathBuf::from("/data/images")));
        let config = args.load_config().unwrap();
        assert_eq!(config.server.port, 4321);
    }
}
