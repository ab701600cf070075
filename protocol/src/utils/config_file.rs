use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not access config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config file: {0}")]
    Format(#[from] serde_json::Error),
    #[error("invalid setting `{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// JSON configuration file, loaded once at startup.
pub trait ConfigFile: Serialize + DeserializeOwned {
    /// Rejects settings the application cannot run with.
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn load_config<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the config, keeping the previous file as `<name>.bak`.
    fn save_config<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            std::fs::copy(path, path.with_extension("bak"))?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Loads `path`, or writes `default()` there first when it does not exist yet.
    fn load_config_or_default<P: AsRef<Path>, F: FnOnce() -> Self>(
        path: P,
        default: F,
    ) -> Result<Self, ConfigError> {
        match std::fs::metadata(path.as_ref()) {
            Ok(metadata) if metadata.is_file() => Self::load_config(path),
            _ => {
                let config = default();
                config.save_config(path)?;
                config.validate()?;
                Ok(config)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        port: u16,
    }

    impl ConfigFile for Sample {
        fn validate(&self) -> Result<(), ConfigError> {
            if self.port == 0 {
                return Err(ConfigError::invalid("port", "must not be 0"));
            }
            Ok(())
        }
    }

    #[test]
    fn default_is_written_on_first_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let loaded = Sample::load_config_or_default(&path, || Sample { port: 7 }).unwrap();
        assert_eq!(loaded, Sample { port: 7 });
        assert!(path.is_file());

        // second load reads the file instead of the default
        let again = Sample::load_config_or_default(&path, || Sample { port: 9 }).unwrap();
        assert_eq!(again, Sample { port: 7 });
    }

    #[test]
    fn save_keeps_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        Sample { port: 1 }.save_config(&path).unwrap();
        Sample { port: 2 }.save_config(&path).unwrap();

        let backup = std::fs::read_to_string(path.with_extension("bak")).unwrap();
        assert_eq!(serde_json::from_str::<Sample>(&backup).unwrap(), Sample { port: 1 });
    }

    #[test]
    fn invalid_settings_fail_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"port": 0}"#).unwrap();
        assert!(matches!(
            Sample::load_config(&path),
            Err(ConfigError::Invalid { field: "port", .. })
        ));
    }
}
