//! Unit tests for duckdbx configuration.
//!
//! This module contains tests organised into:
//! - [`helpers`] - Shared fixtures and helper functions
//! - [`layer_precedence_tests`] - parameter, environment, file, default ordering
//! - [`validation`] - typed parsing and value validation

mod helpers;
