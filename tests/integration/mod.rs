//! Integration tests module
//!
//! This module organizes all integration tests for the pocket-player application.

pub mod config_test;
pub mod file_playback_test;
pub mod pipeline_test;
