//! Core data model for the replication engine.
//!
//! Identities address objects, requests pair a source with a destination,
//! jobs track one request through its state machine, and chunks are the
//! transient unit of transfer.

pub mod chunk;
pub mod identity;
pub mod job;
