//! Shared types, error model, and configuration for contactlink.
//!
//! This crate is the foundation depended on by all other contactlink crates.
//! It provides:
//! - [`ContactLinkError`], the unified error type
//! - Domain types ([`Contact`], [`ContactId`], [`ContactLink`], [`IdentifyRequest`], ...)
//! - Configuration ([`AppConfig`], [`DatabaseConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DatabaseConfig, StoreBackend, config_dir, config_file_path, init_config,
    load_config, load_config_from, resolve_database_path,
};
pub use error::{ContactLinkError, Result};
pub use types::{
    ConsolidatedContact, Contact, ContactId, ContactLink, IdentifyRequest, IdentifyResponse,
    LinkPrecedence, NewContact,
};
