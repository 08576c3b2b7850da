//! Mapping `Bollard` failures onto `ContainerError`.

use std::io;
use std::path::PathBuf;

use bollard::errors::Error as BollardError;

use crate::error::ContainerError;

/// Filesystem path behind a `unix://` or `npipe://` endpoint.
fn local_path(uri: &str) -> Option<PathBuf> {
    uri.strip_prefix("unix://")
        .or_else(|| uri.strip_prefix("npipe://"))
        .map(PathBuf::from)
}

/// First `io::ErrorKind` found on the error or its sources.
fn io_kind(error: &BollardError) -> Option<io::ErrorKind> {
    if let BollardError::IOError { err } = error {
        return Some(err.kind());
    }
    if matches!(error, BollardError::SocketNotFoundError(_)) {
        return Some(io::ErrorKind::NotFound);
    }
    let mut source = std::error::Error::source(error);
    while let Some(current) = source {
        if let Some(io_error) = current.downcast_ref::<io::Error>() {
            return Some(io_error.kind());
        }
        source = current.source();
    }
    None
}

/// Classify a daemon failure for the endpoint `uri`.
///
/// Only local sockets yield `SocketNotFound` or `PermissionDenied`; remote
/// endpoints always report `ConnectionFailed`.
pub(crate) fn classify_engine_error(error: &BollardError, uri: &str) -> ContainerError {
    match (io_kind(error), local_path(uri)) {
        (Some(io::ErrorKind::NotFound), Some(path)) => ContainerError::SocketNotFound { path },
        (Some(io::ErrorKind::PermissionDenied), Some(path)) => {
            ContainerError::PermissionDenied { path }
        }
        _ => ContainerError::ConnectionFailed {
            message: error.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn io_error(kind: io::ErrorKind) -> BollardError {
        BollardError::IOError {
            err: io::Error::new(kind, "socket trouble"),
        }
    }

    #[rstest]
    #[case("unix:///run/docker.sock", Some("/run/docker.sock"))]
    #[case("npipe:////./pipe/docker_engine", Some("//./pipe/docker_engine"))]
    #[case("tcp://localhost:2375", None)]
    fn local_path_needs_a_socket_scheme(#[case] uri: &str, #[case] expected: Option<&str>) {
        assert_eq!(local_path(uri), expected.map(PathBuf::from));
    }

    #[rstest]
    fn missing_local_socket_is_socket_not_found() {
        let classified =
            classify_engine_error(&io_error(io::ErrorKind::NotFound), "unix:///missing.sock");
        assert!(matches!(
            classified,
            ContainerError::SocketNotFound { ref path } if *path == PathBuf::from("/missing.sock")
        ));
    }

    #[rstest]
    fn unreadable_local_socket_is_permission_denied() {
        let classified = classify_engine_error(
            &io_error(io::ErrorKind::PermissionDenied),
            "unix:///root.sock",
        );
        assert!(matches!(classified, ContainerError::PermissionDenied { .. }));
    }

    #[rstest]
    #[case(io::ErrorKind::PermissionDenied)]
    #[case(io::ErrorKind::ConnectionRefused)]
    fn remote_endpoints_report_connection_failed(#[case] kind: io::ErrorKind) {
        let classified = classify_engine_error(&io_error(kind), "http://remote:2375");
        assert!(matches!(classified, ContainerError::ConnectionFailed { .. }));
    }
}
