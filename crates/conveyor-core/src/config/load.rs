//! YAML configuration loading with environment interpolation.

use std::path::Path;

use serde::de::DeserializeOwned;
use snafu::prelude::*;

use super::interpolate;
use crate::error::{ConfigError, ReadFileSnafu, UnsupportedFormatSnafu, YamlParseSnafu};

/// Check if a path has a YAML extension.
pub fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
}

/// Read, interpolate and deserialize a YAML configuration file.
pub fn load_yaml_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    ensure!(is_yaml_file(path), UnsupportedFormatSnafu { path });

    let contents = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
    parse_yaml(&contents)
}

/// Interpolate environment variables in `contents` and deserialize the result.
pub fn parse_yaml<T: DeserializeOwned>(contents: &str) -> Result<T, ConfigError> {
    let text = interpolate(contents)?;
    serde_yaml::from_str(&text).context(YamlParseSnafu)
}
