/*
 * Copyright 2025 Vijaykumar Singh
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Endpoint health tracking
//!
//! Every endpoint gets its own probe loop on a fixed interval, independent of
//! request traffic. Health is debounced: `failure_threshold` consecutive probe
//! failures mark an endpoint unhealthy, a single success restores it. The
//! router reads health through [`EndpointHealthTracker::is_healthy`], which is
//! a lock-free map lookup.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::filesystem::StorageBackend;
use crate::core::{EndpointId, HealthConfig};

/// Health snapshot for one endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointHealth {
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_probe: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl EndpointHealth {
    fn initial() -> Self {
        Self {
            healthy: true,
            consecutive_failures: 0,
            last_success: None,
            last_probe: None,
            last_error: None,
        }
    }
}

/// Tracks endpoint health; the only writer of the health table
pub struct EndpointHealthTracker {
    table: DashMap<EndpointId, EndpointHealth>,
    probes: Vec<(EndpointId, Arc<dyn StorageBackend>)>,
    config: HealthConfig,
}

impl EndpointHealthTracker {
    /// Create a tracker; every endpoint starts healthy
    pub fn new(
        probes: Vec<(EndpointId, Arc<dyn StorageBackend>)>,
        config: HealthConfig,
    ) -> Self {
        let table = DashMap::new();
        for (endpoint_id, _) in &probes {
            table.insert(endpoint_id.clone(), EndpointHealth::initial());
        }
        Self {
            table,
            probes,
            config,
        }
    }

    /// Fast, non-blocking health read. Unknown endpoints are unhealthy.
    pub fn is_healthy(&self, endpoint_id: &str) -> bool {
        self.table
            .get(endpoint_id)
            .map(|entry| entry.healthy)
            .unwrap_or(false)
    }

    pub fn status(&self, endpoint_id: &str) -> Option<EndpointHealth> {
        self.table.get(endpoint_id).map(|entry| entry.clone())
    }

    pub fn snapshot(&self) -> Vec<(EndpointId, EndpointHealth)> {
        let mut all: Vec<_> = self
            .table
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Probe one endpoint once and fold the result into its health.
    /// Returns the probe outcome (not the debounced health).
    pub async fn probe(&self, endpoint_id: &str) -> bool {
        let Some(backend) = self
            .probes
            .iter()
            .find(|(id, _)| id == endpoint_id)
            .map(|(_, backend)| backend.clone())
        else {
            warn!("🩺 [HEALTH] Probe requested for unknown endpoint '{}'", endpoint_id);
            return false;
        };

        let outcome =
            match tokio::time::timeout(self.config.probe_timeout(), backend.probe()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!(
                    "probe timed out after {}ms",
                    self.config.probe_timeout_ms
                )),
            };

        let healthy = outcome.is_ok();
        self.record_probe(endpoint_id, outcome);
        healthy
    }

    /// Apply a probe result with debouncing
    pub fn record_probe(&self, endpoint_id: &str, outcome: Result<(), String>) {
        let now = Utc::now();
        let threshold = self.config.failure_threshold.max(1);
        let mut entry = self
            .table
            .entry(endpoint_id.to_string())
            .or_insert_with(EndpointHealth::initial);
        entry.last_probe = Some(now);

        match outcome {
            Ok(()) => {
                let was_healthy = entry.healthy;
                entry.healthy = true;
                entry.consecutive_failures = 0;
                entry.last_success = Some(now);
                entry.last_error = None;
                if !was_healthy {
                    info!("💚 [HEALTH] Endpoint '{}' recovered", endpoint_id);
                }
            }
            Err(reason) => {
                entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
                debug!(
                    "🩺 [HEALTH] Probe failed for '{}' ({}/{}): {}",
                    endpoint_id, entry.consecutive_failures, threshold, reason
                );
                if entry.healthy && entry.consecutive_failures >= threshold {
                    entry.healthy = false;
                    warn!(
                        "💔 [HEALTH] Endpoint '{}' marked unhealthy after {} consecutive failures: {}",
                        endpoint_id, entry.consecutive_failures, reason
                    );
                }
                entry.last_error = Some(reason);
            }
        }
    }

    /// Spawn one probe loop per endpoint. Loops exit when `shutdown` fires.
    pub fn spawn_probe_loops(self: &Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let interval = self.config.probe_interval().max(Duration::from_millis(10));
        info!(
            "🩺 [HEALTH] Starting probe loops for {} endpoints (interval: {}ms, threshold: {})",
            self.probes.len(),
            interval.as_millis(),
            self.config.failure_threshold
        );

        self.probes
            .iter()
            .map(|(endpoint_id, _)| {
                let tracker = Arc::clone(self);
                let endpoint_id = endpoint_id.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(interval);
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    loop {
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = ticker.tick() => {
                                tracker.probe(&endpoint_id).await;
                            }
                        }
                    }
                    debug!("🛑 [HEALTH] Probe loop for '{}' stopped", endpoint_id);
                })
            })
            .collect()
    }
}
