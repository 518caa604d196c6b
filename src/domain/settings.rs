//! Converter settings loaded from configuration.
//!
//! Every key is optional; missing keys take the built-in defaults. Present
//! keys are validated before the converter is built.
//!
//! ```ini
//! [converter]
//! mechanical_threshold = 0.3
//! fallback_threshold = 0.7
//! max_nesting_depth = 1
//!
//! [generator]
//! runtime_path = pinecast::runtime
//! emit_plots = true
//!
//! [output]
//! extension = rs
//! ```

use crate::domain::codegen::{DEFAULT_RUNTIME_PATH, GeneratorOptions};
use crate::domain::complexity::{FALLBACK_THRESHOLD, MECHANICAL_THRESHOLD, Thresholds};
use crate::domain::converter::{ConverterSettings, DEFAULT_MAX_NESTING_DEPTH};
use crate::domain::error::PinecastError;
use crate::ports::config_port::ConfigPort;

pub const DEFAULT_EXTENSION: &str = "rs";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub converter: ConverterSettings,
    /// File extension for generated modules, without the dot.
    pub extension: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            converter: ConverterSettings::default(),
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> PinecastError {
    PinecastError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

impl Settings {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, PinecastError> {
        let thresholds = load_thresholds(config)?;
        let max_nesting_depth = load_nesting_depth(config)?;
        let generator = load_generator(config)?;
        let extension = load_extension(config)?;
        Ok(Self {
            converter: ConverterSettings {
                thresholds,
                max_nesting_depth,
                generator,
            },
            extension,
        })
    }
}

fn load_thresholds(config: &dyn ConfigPort) -> Result<Thresholds, PinecastError> {
    let mechanical = config.get_double("converter", "mechanical_threshold", MECHANICAL_THRESHOLD);
    if !(mechanical > 0.0 && mechanical <= 1.0) {
        return Err(invalid(
            "converter",
            "mechanical_threshold",
            "mechanical_threshold must be in (0, 1]",
        ));
    }
    let fallback = config.get_double("converter", "fallback_threshold", FALLBACK_THRESHOLD);
    if !(fallback >= mechanical && fallback <= 1.0) {
        return Err(invalid(
            "converter",
            "fallback_threshold",
            "fallback_threshold must be between mechanical_threshold and 1",
        ));
    }
    Ok(Thresholds {
        mechanical,
        fallback,
    })
}

fn load_nesting_depth(config: &dyn ConfigPort) -> Result<usize, PinecastError> {
    let depth = config.get_int("converter", "max_nesting_depth", DEFAULT_MAX_NESTING_DEPTH as i64);
    usize::try_from(depth)
        .map_err(|_| invalid("converter", "max_nesting_depth", "max_nesting_depth must be non-negative"))
}

fn load_generator(config: &dyn ConfigPort) -> Result<GeneratorOptions, PinecastError> {
    let runtime_path = config
        .get_string("generator", "runtime_path")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| DEFAULT_RUNTIME_PATH.to_string());
    if syn::parse_str::<syn::Path>(&runtime_path).is_err() {
        return Err(invalid(
            "generator",
            "runtime_path",
            format!("`{}` is not a Rust path", runtime_path),
        ));
    }
    if let Some(raw) = config.get_string("generator", "emit_plots") {
        let known = ["true", "false", "yes", "no", "1", "0"];
        if !known.contains(&raw.trim().to_lowercase().as_str()) {
            return Err(invalid("generator", "emit_plots", "emit_plots must be a boolean"));
        }
    }
    Ok(GeneratorOptions {
        runtime_path,
        emit_plots: config.get_bool("generator", "emit_plots", true),
    })
}

fn load_extension(config: &dyn ConfigPort) -> Result<String, PinecastError> {
    let extension = config
        .get_string("output", "extension")
        .map(|s| s.trim().trim_start_matches('.').to_string())
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
    if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid(
            "output",
            "extension",
            "extension must be a non-empty alphanumeric suffix",
        ));
    }
    Ok(extension)
}
