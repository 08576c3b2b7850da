//! Delta Sharing profile files.
//!
//! A profile is a small JSON document issued by a sharing provider:
//!
//! ```json
//! {
//!   "shareCredentialsVersion": 1,
//!   "endpoint": "https://sharing.example.com/delta-sharing/",
//!   "bearerToken": "<token>",
//!   "expirationTime": "2027-01-01T00:00:00.0Z"
//! }
//! ```

use std::fmt;
use std::io;

use camino::Utf8Path;
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use reqwest::Url;
use serde::Deserialize;

use crate::config::redacted;
use crate::error::ConnectionError;

/// Profile JSON as written on disk, before validation.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProfile {
    share_credentials_version: u32,
    endpoint: String,
    bearer_token: String,
    #[serde(default)]
    expiration_time: Option<String>,
}

/// Parsed content of a Delta Sharing profile file.
#[derive(Clone, PartialEq, Eq)]
pub struct DeltaSharingProfile {
    /// Profile format version.
    pub share_credentials_version: u32,
    /// Sharing server endpoint.
    pub endpoint: Url,
    /// Bearer token for the endpoint.
    pub bearer_token: String,
    /// Optional token expiry, kept verbatim.
    pub expiration_time: Option<String>,
}

impl fmt::Debug for DeltaSharingProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeltaSharingProfile")
            .field("share_credentials_version", &self.share_credentials_version)
            .field("endpoint", &self.endpoint.as_str())
            .field("bearer_token", &redacted(Some(&self.bearer_token)))
            .field("expiration_time", &self.expiration_time)
            .finish()
    }
}

impl DeltaSharingProfile {
    /// Parse and validate profile JSON.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::ProfileMalformed` when the content is not
    /// JSON, lacks a required field, or carries a blank token.
    pub fn parse(path: &Utf8Path, content: &str) -> Result<Self, ConnectionError> {
        let malformed = |message: String| ConnectionError::ProfileMalformed {
            path: path.as_std_path().to_path_buf(),
            message,
        };

        let raw: RawProfile =
            serde_json::from_str(content).map_err(|error| malformed(error.to_string()))?;
        if raw.bearer_token.trim().is_empty() {
            return Err(malformed(String::from("bearerToken is empty")));
        }
        let endpoint = Url::parse(raw.endpoint.trim())
            .map_err(|error| malformed(format!("endpoint is not a valid URL: {error}")))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(malformed(format!(
                "endpoint scheme '{}' is not http or https",
                endpoint.scheme()
            )));
        }
        let profile = Self {
            share_credentials_version: raw.share_credentials_version,
            endpoint,
            bearer_token: raw.bearer_token,
            expiration_time: raw.expiration_time,
        };
        Ok(profile)
    }
}

/// Read access to profile files.
///
/// Implemented by [`FsProfileLoader`] for real use and mocked in tests so
/// that endpoint resolution stays free of filesystem side effects.
pub trait ProfileLoader: Send + Sync {
    /// Load the profile at `path`.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::ProfileUnreadable` when the file exists but
    /// cannot be read and `ConnectionError::ProfileMalformed` when it cannot be
    /// parsed.
    fn load(&self, path: &Utf8Path) -> Result<Option<DeltaSharingProfile>, ConnectionError>;
}

/// Loads profiles from the local filesystem via `cap_std`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProfileLoader;

impl ProfileLoader for FsProfileLoader {
    fn load(&self, path: &Utf8Path) -> Result<Option<DeltaSharingProfile>, ConnectionError> {
        let unreadable = |error: &io::Error| ConnectionError::ProfileUnreadable {
            path: path.as_std_path().to_path_buf(),
            message: error.to_string(),
        };

        let parent = path
            .parent()
            .filter(|dir| !dir.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        let file_name = path.file_name().unwrap_or(path.as_str());

        let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
            Ok(dir) => dir,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(unreadable(&error)),
        };
        let content = match dir.read_to_string(file_name) {
            Ok(content) => content,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(unreadable(&error)),
        };

        DeltaSharingProfile::parse(path, &content).map(Some)
    }
}
