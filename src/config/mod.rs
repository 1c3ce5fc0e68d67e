//! Configuration module for Somnoscope.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for each subsystem,
//! `StoragePaths` for cross-platform data directories, and TOML persistence
//! via `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::StoragePaths;
pub use settings::{AppConfig, AudioConfig, LifecycleConfig, PersistenceConfig, VadConfig};
