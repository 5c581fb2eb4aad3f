//! Core types, configuration, and utilities for wintrack.
//!
//! This crate provides:
//! - Configuration parsing from TOML
//! - Logging setup
//! - Pixel geometry shared across backends

pub mod config;
pub mod error;
pub mod geometry;
pub mod logging;

pub use config::{BackendChoice, CompositorConfig, Config, DEFAULT_CONFIG_TOML, PlacementConfig};
pub use error::{Error, Result};
pub use geometry::Rect;
