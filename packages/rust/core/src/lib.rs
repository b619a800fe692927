//! Identity reconciliation for contactlink.
//!
//! This crate turns `(email?, phone?)` observations into consolidated identity
//! clusters on top of any [`ContactStore`](contactlink_storage::ContactStore).

pub mod cluster;
pub mod reconciler;

pub use cluster::Cluster;
pub use reconciler::Reconciler;
