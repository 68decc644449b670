pub mod context;
pub mod health;
pub mod replicator;
pub mod retry;
pub mod store;
pub mod stores;
pub mod transfer;
