//! Configuration resolution with layered precedence and provenance.
//!
//! [`ConfigResolver::resolve`] builds one JSON layer per source, pushes them
//! into an `ortho_config::MergeComposer` (defaults < file < environment <
//! parameters), deserialises the merged result, and records which layer
//! supplied each field before validating the values into [`Settings`].
//!
//! # Environment Variable Handling
//!
//! Every recognised field has exactly one `DUCKDBX_*` variable. Absent and
//! empty variables both mean "not set". Typed variables (ports, counts,
//! durations, the connection mode) that fail to parse return an error
//! immediately rather than silently falling back to a lower layer.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use ortho_config::discovery::ConfigDiscovery;
use ortho_config::serde_json::{self, Map, Value};
use ortho_config::{MergeComposer, toml};
use tracing::debug;

use super::settings::{Provenance, Settings};
use super::types::{ConfigParams, ConnectionMode, RawSettings};
use crate::error::{ConfigError, Result};

// ============================================================================
// Field Specification Table
// ============================================================================

/// The type of value expected from an environment variable.
#[derive(Clone, Copy)]
enum EnvVarType {
    /// String value (always accepted).
    String,
    /// Port number (`1..=65535`, or `0` where allowed).
    Port,
    /// Unsigned 32-bit integer.
    U32,
    /// Unsigned 64-bit integer.
    U64,
    /// `databricks` or `standalone`.
    Mode,
}

/// Specification for a single recognised field.
struct FieldSpec {
    /// The key used in the configuration file and the merged layers.
    key: &'static str,
    /// The environment variable name.
    env_var: &'static str,
    /// The expected value type.
    var_type: EnvVarType,
}

const fn field(key: &'static str, env_var: &'static str, var_type: EnvVarType) -> FieldSpec {
    FieldSpec {
        key,
        env_var,
        var_type,
    }
}

/// Table of all recognised fields and their environment variables.
const FIELD_SPECS: &[FieldSpec] = &[
    field(
        "connection_mode",
        "DUCKDBX_CONNECTION_MODE",
        EnvVarType::Mode,
    ),
    field(
        "databricks_host",
        "DUCKDBX_DATABRICKS_HOST",
        EnvVarType::String,
    ),
    field(
        "databricks_token",
        "DUCKDBX_DATABRICKS_TOKEN",
        EnvVarType::String,
    ),
    field("catalog_name", "DUCKDBX_CATALOG_NAME", EnvVarType::String),
    field("profile_path", "DUCKDBX_PROFILE_PATH", EnvVarType::String),
    field(
        "delta_sharing_server_url",
        "DUCKDBX_DELTA_SHARING_SERVER_URL",
        EnvVarType::String,
    ),
    field(
        "delta_sharing_token",
        "DUCKDBX_DELTA_SHARING_TOKEN",
        EnvVarType::String,
    ),
    field("engine_socket", "DUCKDBX_ENGINE_SOCKET", EnvVarType::String),
    field(
        "container_image",
        "DUCKDBX_CONTAINER_IMAGE",
        EnvVarType::String,
    ),
    field(
        "container_name",
        "DUCKDBX_CONTAINER_NAME",
        EnvVarType::String,
    ),
    field("port", "DUCKDBX_PORT", EnvVarType::Port),
    field(
        "port_range_start",
        "DUCKDBX_PORT_RANGE_START",
        EnvVarType::Port,
    ),
    field("port_range_end", "DUCKDBX_PORT_RANGE_END", EnvVarType::Port),
    field(
        "startup_timeout_secs",
        "DUCKDBX_STARTUP_TIMEOUT_SECS",
        EnvVarType::U64,
    ),
    field(
        "health_interval_ms",
        "DUCKDBX_HEALTH_INTERVAL_MS",
        EnvVarType::U64,
    ),
    field(
        "health_max_retries",
        "DUCKDBX_HEALTH_MAX_RETRIES",
        EnvVarType::U32,
    ),
    field("stop_grace_secs", "DUCKDBX_STOP_GRACE_SECS", EnvVarType::U64),
    field(
        "query_timeout_secs",
        "DUCKDBX_QUERY_TIMEOUT_SECS",
        EnvVarType::U64,
    ),
    field("pull_retries", "DUCKDBX_PULL_RETRIES", EnvVarType::U32),
];

/// Returns the list of environment variable names recognised by the resolver.
///
/// Tests use this to clear every `DUCKDBX_*` variable without keeping a
/// separate list in sync.
#[must_use]
pub fn env_var_names() -> Vec<&'static str> {
    FIELD_SPECS.iter().map(|spec| spec.env_var).collect()
}

/// Where the configuration file layer comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfigFile {
    /// Discover a file via `DUCKDBX_CONFIG_PATH`, `.duckdbx.toml`, or the XDG
    /// configuration directory. A missing file is not an error.
    #[default]
    Discover,
    /// Read this file. A missing file is an error.
    Path(Utf8PathBuf),
    /// Do not read any configuration file.
    Skip,
}

/// The individual layers, kept so provenance can be computed after merging.
struct Layers {
    parameters: Value,
    environment: Value,
    file: Value,
    defaults: Value,
}

impl Layers {
    /// Return the highest-priority layer holding a value for `key`.
    fn provenance_of(&self, key: &str) -> Option<Provenance> {
        [
            (&self.parameters, Provenance::Parameter),
            (&self.environment, Provenance::Environment),
            (&self.file, Provenance::File),
            (&self.defaults, Provenance::Default),
        ]
        .into_iter()
        .find(|(layer, _)| layer.get(key).is_some_and(is_present))
        .map(|(_, provenance)| provenance)
    }
}

/// Merges parameters, environment, configuration file, and defaults into
/// [`Settings`].
pub struct ConfigResolver;

impl ConfigResolver {
    /// Resolve settings from all layers.
    ///
    /// For every field the first present value in the order parameters,
    /// environment variable, file value, default wins. The result is validated
    /// before it is returned, so invalid configuration never reaches the
    /// container supervisor.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - an explicit configuration file is missing or any file is malformed
    /// - a typed environment variable does not parse
    /// - a required field has no value or a value fails validation
    pub fn resolve<E: mockable::Env>(
        params: &ConfigParams,
        env: &E,
        file: &ConfigFile,
    ) -> Result<Settings> {
        let layers = Layers {
            parameters: strip_absent(serde_json::to_value(params).map_err(|e| {
                ConfigError::ParseError {
                    message: format!("failed to serialise parameters: {e}"),
                }
            })?),
            environment: collect_env_vars(env)?,
            file: load_file_layer(file)?,
            defaults: serde_json::to_value(RawSettings::default()).map_err(|e| {
                ConfigError::ParseError {
                    message: format!("failed to serialise defaults: {e}"),
                }
            })?,
        };

        let mut composer = MergeComposer::new();
        composer.push_defaults(layers.defaults.clone());
        if !layers.file.is_null() {
            composer.push_file(layers.file.clone(), None);
        }
        if !layers.environment.is_null() {
            composer.push_environment(layers.environment.clone());
        }
        if !layers.parameters.is_null() {
            composer.push_cli(layers.parameters.clone());
        }

        let raw =
            RawSettings::merge_from_layers(composer.layers()).map_err(ConfigError::OrthoConfig)?;

        let provenance: BTreeMap<&'static str, Provenance> = FIELD_SPECS
            .iter()
            .filter_map(|spec| {
                layers
                    .provenance_of(spec.key)
                    .map(|provenance| (spec.key, provenance))
            })
            .collect();
        for (key, source) in &provenance {
            debug!(field = key, %source, "resolved configuration field");
        }

        Settings::validate(raw, provenance)
    }
}

/// Locate the configuration file for `file`, if any.
fn locate_config_file(file: &ConfigFile) -> Result<Option<Utf8PathBuf>> {
    match file {
        ConfigFile::Skip => Ok(None),
        ConfigFile::Path(path) => {
            if path.exists() {
                Ok(Some(path.clone()))
            } else {
                Err(ConfigError::FileNotFound {
                    path: path.clone().into_std_path_buf(),
                }
                .into())
            }
        }
        ConfigFile::Discover => {
            let discovery = ConfigDiscovery::builder("duckdbx")
                .env_var("DUCKDBX_CONFIG_PATH")
                .config_file_name("config.toml")
                .dotfile_name(".duckdbx.toml")
                .build();
            Ok(discovery
                .candidates()
                .into_iter()
                .filter(|p| p.exists())
                .find_map(|p| Utf8PathBuf::try_from(p).ok()))
        }
    }
}

/// Read and parse the configuration file layer.
///
/// Uses `cap_std::fs_utf8` for capability-oriented filesystem access: the
/// parent directory is opened first and the file is read from there.
fn load_file_layer(file: &ConfigFile) -> Result<Value> {
    let Some(path) = locate_config_file(file)? else {
        return Ok(Value::Null);
    };

    let content = read_utf8_file(&path).map_err(|message| ConfigError::ParseError { message })?;
    let value =
        toml::from_str::<Value>(&content).map_err(|e| ConfigError::ParseError {
            message: format!("failed to parse {path}: {e}"),
        })?;

    debug!(%path, "loaded configuration file");
    Ok(strip_absent(value))
}

/// Read a UTF-8 file through a capability handle on its parent directory.
fn read_utf8_file(path: &Utf8Path) -> std::result::Result<String, String> {
    let current_dir = Utf8PathBuf::from(".");
    let parent = path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| current_dir.as_ref());
    let file_name = path.file_name().unwrap_or(path.as_str());

    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|e| format!("failed to open directory {parent}: {e}"))?;
    dir.read_to_string(file_name)
        .map_err(|e| format!("failed to read {path}: {e}"))
}

/// Collect `DUCKDBX_*` environment variables into a JSON object.
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` if a typed variable has an
/// unparseable value.
fn collect_env_vars<E: mockable::Env>(env: &E) -> Result<Value> {
    let mut root = Map::new();

    for spec in FIELD_SPECS {
        let Some(raw_value) = env.string(spec.env_var).filter(|v| !v.trim().is_empty()) else {
            continue;
        };
        root.insert(String::from(spec.key), parse_env_value(spec, &raw_value)?);
    }

    if root.is_empty() {
        Ok(Value::Null)
    } else {
        Ok(Value::Object(root))
    }
}

fn parse_env_value(spec: &FieldSpec, raw_value: &str) -> Result<Value> {
    let trimmed = raw_value.trim();
    let invalid = |reason: String| ConfigError::InvalidValue {
        field: spec.env_var.to_owned(),
        reason,
    };

    let value = match spec.var_type {
        EnvVarType::String => Value::String(raw_value.to_owned()),
        EnvVarType::Port => trimmed
            .parse::<u16>()
            .map(|port| Value::Number(port.into()))
            .map_err(|_| invalid(format!("expected port number, got '{raw_value}'")))?,
        EnvVarType::U32 => trimmed
            .parse::<u32>()
            .map(|n| Value::Number(n.into()))
            .map_err(|_| invalid(format!("expected unsigned integer, got '{raw_value}'")))?,
        EnvVarType::U64 => trimmed
            .parse::<u64>()
            .map(|n| Value::Number(n.into()))
            .map_err(|_| invalid(format!("expected unsigned integer, got '{raw_value}'")))?,
        EnvVarType::Mode => trimmed
            .parse::<ConnectionMode>()
            .map(|mode| Value::String(mode.as_str().to_owned()))
            .map_err(invalid)?,
    };
    Ok(value)
}

/// Whether a layer value counts as "set".
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => !text.trim().is_empty(),
        _ => true,
    }
}

/// Drop null and blank entries so they fall through to lower layers.
fn strip_absent(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let kept: Map<String, Value> = map
                .into_iter()
                .filter(|(_, entry)| is_present(entry))
                .collect();
            if kept.is_empty() {
                Value::Null
            } else {
                Value::Object(kept)
            }
        }
        other => other,
    }
}
