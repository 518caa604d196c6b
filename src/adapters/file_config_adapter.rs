//! INI file configuration adapter.

use crate::domain::error::PinecastError;
use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;

pub struct FileConfigAdapter {
    config: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PinecastError> {
        let path = path.as_ref();
        let mut config = Ini::new();
        config.load(path).map_err(|reason| PinecastError::ConfigParse {
            file: path.display().to_string(),
            reason,
        })?;
        Ok(Self { config })
    }

    pub fn from_string(content: &str) -> Result<Self, PinecastError> {
        let mut config = Ini::new();
        config
            .read(content.to_string())
            .map_err(|reason| PinecastError::ConfigParse {
                file: "<string>".to_string(),
                reason,
            })?;
        Ok(Self { config })
    }

    fn parse_bool(value: &str) -> Option<bool> {
        match value.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        }
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config.get(section, key)
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.config
            .getint(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.config
            .getfloat(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.config
            .get(section, key)
            .as_ref()
            .and_then(|v| Self::parse_bool(v))
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::settings::Settings;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    const FULL: &str = r#"
[converter]
mechanical_threshold = 0.25
fallback_threshold = 0.75
max_nesting_depth = 2

[generator]
runtime_path = my_crate::runtime
emit_plots = no

[output]
extension = rs
"#;

    #[test]
    fn from_string_parses_config() {
        let adapter = FileConfigAdapter::from_string(FULL).unwrap();
        assert_eq!(
            adapter.get_string("generator", "runtime_path"),
            Some("my_crate::runtime".to_string())
        );
        assert_eq!(adapter.get_double("converter", "mechanical_threshold", 0.0), 0.25);
        assert_eq!(adapter.get_int("converter", "max_nesting_depth", 0), 2);
        assert!(!adapter.get_bool("generator", "emit_plots", true));
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let adapter = FileConfigAdapter::from_string("[converter]\n").unwrap();
        assert_eq!(adapter.get_string("converter", "missing"), None);
        assert_eq!(adapter.get_string("missing_section", "key"), None);
        assert_eq!(adapter.get_int("converter", "max_nesting_depth", 1), 1);
        assert_eq!(adapter.get_double("converter", "fallback_threshold", 0.7), 0.7);
        assert!(adapter.get_bool("generator", "emit_plots", true));
    }

    #[test]
    fn unparsable_numbers_fall_back_to_defaults() {
        let adapter = FileConfigAdapter::from_string(
            "[converter]\nmax_nesting_depth = deep\nmechanical_threshold = low\n",
        )
        .unwrap();
        assert_eq!(adapter.get_int("converter", "max_nesting_depth", 1), 1);
        assert_eq!(adapter.get_double("converter", "mechanical_threshold", 0.3), 0.3);
    }

    #[test]
    fn bool_spellings() {
        let adapter =
            FileConfigAdapter::from_string("[g]\na = true\nb = YES\nc = 1\nd = false\ne = no\nf = 0\n")
                .unwrap();
        for key in ["a", "b", "c"] {
            assert!(adapter.get_bool("g", key, false), "{key}");
        }
        for key in ["d", "e", "f"] {
            assert!(!adapter.get_bool("g", key, true), "{key}");
        }
    }

    #[test]
    fn from_file_feeds_settings() {
        let file = create_temp_config(FULL);
        let adapter = FileConfigAdapter::from_file(file.path()).unwrap();
        let settings = Settings::from_config(&adapter).unwrap();
        assert_eq!(settings.converter.thresholds.mechanical, 0.25);
        assert_eq!(settings.converter.thresholds.fallback, 0.75);
        assert_eq!(settings.converter.max_nesting_depth, 2);
        assert_eq!(settings.converter.generator.runtime_path, "my_crate::runtime");
        assert!(!settings.converter.generator.emit_plots);
    }

    #[test]
    fn from_file_reports_missing_file() {
        match FileConfigAdapter::from_file("/nonexistent/path/pinecast.ini") {
            Err(PinecastError::ConfigParse { file, .. }) => {
                assert_eq!(file, "/nonexistent/path/pinecast.ini");
            }
            Err(other) => panic!("expected ConfigParse, got {other:?}"),
            Ok(_) => panic!("expected an error"),
        }
    }
}
