//! HTTP handlers and the state they share.

use crate::{
    models::identity::StoreKind,
    services::{health::HealthMonitor, replicator::Replicator},
};

pub mod health_handlers;
pub mod replicate_handlers;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub replicator: Replicator,
    pub health: HealthMonitor,
    pub source_kind: StoreKind,
    pub destination_kind: StoreKind,
    /// Bucket every replicated object is written to.
    pub target_bucket: String,
}
