//! Shared fixtures and helper functions for config tests.

use std::collections::HashMap;
use std::io::Write;

use camino::Utf8PathBuf;
use mockable::MockEnv;
use rstest::fixture;
use tempfile::NamedTempFile;

use crate::config::{ConfigFile, ConfigParams, ConfigResolver, Settings};
use crate::error::Result;

/// Build a `MockEnv` that answers from `vars` and returns `None` otherwise.
pub fn env_with(vars: &[(&str, &str)]) -> MockEnv {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(key, value)| (String::from(*key), String::from(*value)))
        .collect();
    let mut env = MockEnv::new();
    env.expect_string()
        .returning(move |key| vars.get(key).cloned());
    env
}

/// Fixture providing an environment with no `DUCKDBX_*` variables.
#[fixture]
pub fn empty_env() -> MockEnv {
    env_with(&[])
}

/// Fixture providing the smallest parameter set that resolves.
#[fixture]
pub fn databricks_params() -> ConfigParams {
    ConfigParams {
        databricks_host: Some(String::from("https://adb-1.azuredatabricks.net")),
        databricks_token: Some(String::from("dapi-param")),
        ..ConfigParams::default()
    }
}

/// Write `content` to a temporary TOML file and return it with its path.
pub fn config_file(content: &str) -> (NamedTempFile, ConfigFile) {
    let mut file = NamedTempFile::new().expect("temp file should be created");
    file.write_all(content.as_bytes())
        .expect("temp file should be writable");
    let path = Utf8PathBuf::try_from(file.path().to_path_buf()).expect("temp path should be UTF-8");
    (file, ConfigFile::Path(path))
}

/// Resolve with the given layers.
pub fn resolve(params: &ConfigParams, env: &MockEnv, file: &ConfigFile) -> Result<Settings> {
    ConfigResolver::resolve(params, env, file)
}
