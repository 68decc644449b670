//! Cached reachability checks for both stores.

use chrono::Utc;
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, warn};

use crate::{errors::ReplicationResult, services::replicator::Replicator};

pub const DEFAULT_HEALTH_CACHE: Duration = Duration::from_secs(10);

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct CheckStatus {
    pub ok: bool,
    pub error: Option<String>,
}

impl From<ReplicationResult<()>> for CheckStatus {
    fn from(result: ReplicationResult<()>) -> Self {
        match result {
            Ok(()) => Self {
                ok: true,
                error: None,
            },
            Err(err) => Self {
                ok: false,
                error: Some(err.to_string()),
            },
        }
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct HealthReport {
    pub status: &'static str,
    pub checks: BTreeMap<&'static str, CheckStatus>,
    pub in_flight: usize,
    pub available_slots: usize,
    pub shutting_down: bool,
    pub version: &'static str,
    pub timestamp: String,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Pings the source and destination at most once per `ttl`.
///
/// Load-balancer probes arrive far more often than the stores need checking,
/// so callers inside the window get the last result with fresh slot counts.
#[derive(Clone)]
pub struct HealthMonitor {
    replicator: Replicator,
    ttl: Duration,
    last: Arc<Mutex<Option<(Instant, BTreeMap<&'static str, CheckStatus>)>>>,
}

impl HealthMonitor {
    pub fn new(replicator: Replicator, ttl: Duration) -> Self {
        Self {
            replicator,
            ttl,
            last: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn check(&self) -> HealthReport {
        // held across the pings so concurrent probes share one round trip
        let mut last = self.last.lock().await;
        let checks = match last.as_ref() {
            Some((at, checks)) if at.elapsed() < self.ttl => {
                debug!("serving cached health check");
                checks.clone()
            }
            _ => {
                let checks = self.ping_stores().await;
                *last = Some((Instant::now(), checks.clone()));
                checks
            }
        };
        drop(last);

        let reachable = checks.values().all(|c| c.ok);
        let shutting_down = self.replicator.is_shutting_down();
        HealthReport {
            status: if reachable && !shutting_down {
                "healthy"
            } else {
                "unhealthy"
            },
            checks,
            in_flight: self.replicator.in_flight(),
            available_slots: self.replicator.available_slots(),
            shutting_down,
            version: env!("CARGO_PKG_VERSION"),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    async fn ping_stores(&self) -> BTreeMap<&'static str, CheckStatus> {
        let (source, destination) = futures::join!(
            self.replicator.source().ping(),
            self.replicator.destination().ping()
        );
        let mut checks = BTreeMap::new();
        checks.insert("source", CheckStatus::from(source));
        checks.insert("destination", CheckStatus::from(destination));
        for (name, check) in &checks {
            if let Some(err) = &check.error {
                warn!(store = *name, error = %err, "store health check failed");
            }
        }
        checks
    }
}
