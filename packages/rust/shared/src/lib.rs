//! Shared types, error model, and configuration for tpsync.
//!
//! This crate is the foundation depended on by all other tpsync crates.
//! It provides:
//! - [`TpsyncError`]: the unified error type
//! - Domain types ([`Record`], [`NumberCheckTask`], [`ComplianceResult`], [`LedgerEntry`])
//! - Configuration ([`AppConfig`], [`Credentials`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CONFIG_FILE_NAME, ComplianceConfig, CrmConfig, Credentials, RetryConfig,
    SyncConfig, WebhookConfig, config_dir, find_config_file, init_config, load_config,
    load_config_from,
};
pub use error::{Result, TpsyncError, excerpt};
pub use types::{
    ComplianceResult, EntityStatuses, LedgerEntry, NumberCheckTask, NumberType, PropertyValue,
    RawRecord, Record, TpsStatus, normalize_phone,
};
