//! Shared types, error model, and configuration for listingscout.
//!
//! This crate is the foundation depended on by all other listingscout crates.
//! It provides:
//! - [`ListingScoutError`]: the unified error type
//! - Domain types ([`ListingLink`], [`ListingRecord`], [`RecordId`], [`Degradation`])
//! - Configuration ([`AppConfig`], [`DiscoveryConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BrowserLaunchConfig, DiscoveryConfig, LimitsConfig, OutputConfig, PacingConfig,
    SelectorsConfig, SiteConfig, StabilizerConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from,
};
pub use error::{ListingScoutError, Result};
pub use types::{Degradation, ListingLink, ListingRecord, RECORD_COLUMNS, RecordId};
