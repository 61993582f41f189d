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

//! Multi-endpoint storage router
//!
//! Decides where image bytes are written and where they are read from:
//! - **Write**: healthy primaries ordered by `read_priority`; a failed transfer
//!   falls through to the next primary.
//! - **Read**: endpoints holding a `present` copy, healthy, non-zero weight,
//!   grouped by priority; weighted random choice inside a group, with the
//!   remaining candidates as ordered fallbacks.
//! - **Sync**: copies an image from a local primary to a backup. Syncs out of an
//!   object store are rejected up front.

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::filesystem::{BackendError, StorageBackend};
use super::health::EndpointHealthTracker;
use super::locations::{ClaimOutcome, LocationTable};
use crate::core::{
    BackendType, ContentHash, EndpointConfig, EndpointId, EndpointRole, ImageId, ImageLocation,
    LocationStatus, RouterError, RouterResult,
};

/// An endpoint as the router sees it
#[derive(Clone)]
pub struct RoutedEndpoint {
    pub id: EndpointId,
    pub backend_type: BackendType,
    pub role: EndpointRole,
    pub read_priority: u32,
    pub read_weight: u32,
    pub backend: Arc<dyn StorageBackend>,
}

impl RoutedEndpoint {
    pub fn from_config(config: &EndpointConfig, backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            id: config.id.clone(),
            backend_type: config.backend.backend_type(),
            role: config.role,
            read_priority: config.read_priority,
            read_weight: config.read_weight,
            backend,
        }
    }
}

/// Public view of an endpoint including its current health
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageEndpoint {
    pub id: EndpointId,
    pub backend_type: BackendType,
    pub role: EndpointRole,
    pub read_priority: u32,
    pub read_weight: u32,
    pub healthy: bool,
}

/// Result of a successful write
#[derive(Debug, Clone, PartialEq)]
pub struct WriteReceipt {
    pub endpoint_id: EndpointId,
    pub object_key: String,
    /// Image was already present on a primary; no bytes moved
    pub deduplicated: bool,
    /// Number of primaries attempted
    pub attempts: usize,
}

/// Bytes served by a read together with their source
#[derive(Debug, Clone)]
pub struct ReadResult {
    pub endpoint_id: EndpointId,
    pub data: Vec<u8>,
}

/// Result of a sync request
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Copied { from: EndpointId },
    AlreadyPresent,
}

pub struct StorageRouter {
    endpoints: Vec<RoutedEndpoint>,
    health: Arc<EndpointHealthTracker>,
    locations: Arc<LocationTable>,
    transfer_timeout: Duration,
}

impl StorageRouter {
    pub fn new(
        endpoints: Vec<RoutedEndpoint>,
        health: Arc<EndpointHealthTracker>,
        locations: Arc<LocationTable>,
        transfer_timeout: Duration,
    ) -> Self {
        info!(
            "🧭 [ROUTER] Storage router ready with {} endpoints ({} primary, {} backup)",
            endpoints.len(),
            endpoints.iter().filter(|e| e.role == EndpointRole::Primary).count(),
            endpoints.iter().filter(|e| e.role == EndpointRole::Backup).count()
        );
        Self {
            endpoints,
            health,
            locations,
            transfer_timeout,
        }
    }

    pub fn health(&self) -> &Arc<EndpointHealthTracker> {
        &self.health
    }

    pub fn locations(&self) -> &Arc<LocationTable> {
        &self.locations
    }

    /// Snapshot of configured endpoints with current health
    pub fn endpoints(&self) -> Vec<StorageEndpoint> {
        self.endpoints
            .iter()
            .map(|e| StorageEndpoint {
                id: e.id.clone(),
                backend_type: e.backend_type,
                role: e.role,
                read_priority: e.read_priority,
                read_weight: e.read_weight,
                healthy: self.health.is_healthy(&e.id),
            })
            .collect()
    }

    fn endpoint(&self, endpoint_id: &str) -> Option<&RoutedEndpoint> {
        self.endpoints.iter().find(|e| e.id == endpoint_id)
    }

    /// All location rows for an image
    pub fn image_locations(&self, image_id: ImageId) -> Vec<ImageLocation> {
        self.locations.for_image(image_id)
    }

    async fn with_timeout<T>(
        &self,
        endpoint_id: &str,
        operation: impl std::future::Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        match tokio::time::timeout(self.transfer_timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Unavailable(format!(
                "transfer on '{}' timed out after {}ms",
                endpoint_id,
                self.transfer_timeout.as_millis()
            ))),
        }
    }

    // ----- write path -----

    /// Healthy primaries in write preference order
    pub fn write_candidates(&self) -> Vec<EndpointId> {
        let mut primaries: Vec<&RoutedEndpoint> = self
            .endpoints
            .iter()
            .filter(|e| e.role == EndpointRole::Primary && self.health.is_healthy(&e.id))
            .collect();
        primaries.sort_by(|a, b| {
            a.read_priority
                .cmp(&b.read_priority)
                .then(b.read_weight.cmp(&a.read_weight))
                .then(a.id.cmp(&b.id))
        });
        primaries.into_iter().map(|e| e.id.clone()).collect()
    }

    /// Write image bytes to the best healthy primary, falling through on failure
    pub async fn write(
        &self,
        image_id: ImageId,
        content_hash: &ContentHash,
        data: &[u8],
    ) -> RouterResult<WriteReceipt> {
        let candidates = self.write_candidates();
        if candidates.is_empty() {
            warn!("🚫 [ROUTER] Write of image {} refused: no healthy primary", image_id);
            return Err(RouterError::NoHealthyEndpoint);
        }

        let object_key = content_hash.object_key();
        let mut last_failure: Option<(EndpointId, String)> = None;
        let mut attempts = 0;

        for endpoint_id in &candidates {
            let Some(endpoint) = self.endpoint(endpoint_id) else {
                continue;
            };

            match self.locations.claim(image_id, endpoint_id, content_hash) {
                ClaimOutcome::AlreadyPresent => {
                    debug!(
                        "♻️ [ROUTER] Image {} already present on '{}', skipping transfer",
                        image_id, endpoint_id
                    );
                    return Ok(WriteReceipt {
                        endpoint_id: endpoint_id.clone(),
                        object_key,
                        deduplicated: true,
                        attempts,
                    });
                }
                ClaimOutcome::InFlight => {
                    last_failure = Some((
                        endpoint_id.clone(),
                        "another transfer is in flight".to_string(),
                    ));
                    continue;
                }
                ClaimOutcome::Claimed => {}
            }

            attempts += 1;
            match self
                .with_timeout(endpoint_id, endpoint.backend.put(&object_key, data))
                .await
            {
                Ok(()) => {
                    if !self
                        .locations
                        .set_status(image_id, endpoint_id, LocationStatus::Present)
                    {
                        self.discard_orphan(image_id, endpoint, &object_key).await;
                        return Err(RouterError::TransferFailure {
                            endpoint: endpoint_id.clone(),
                            reason: "image was removed during the transfer".to_string(),
                        });
                    }
                    info!(
                        "📥 [ROUTER] Stored image {} ({} bytes) on '{}' as {}",
                        image_id,
                        data.len(),
                        endpoint_id,
                        object_key
                    );
                    return Ok(WriteReceipt {
                        endpoint_id: endpoint_id.clone(),
                        object_key,
                        deduplicated: false,
                        attempts,
                    });
                }
                Err(e) => {
                    self.locations
                        .set_status(image_id, endpoint_id, LocationStatus::Failed);
                    warn!(
                        "⚠️ [ROUTER] Write of image {} to '{}' failed, trying next primary: {}",
                        image_id, endpoint_id, e
                    );
                    last_failure = Some((endpoint_id.clone(), e.to_string()));
                }
            }
        }

        let (endpoint, reason) = last_failure.unwrap_or_else(|| {
            (
                candidates[candidates.len() - 1].clone(),
                "no primary accepted the write".to_string(),
            )
        });
        Err(RouterError::TransferFailure {
            endpoint,
            reason: format!(
                "all {} healthy primaries failed; last error: {}",
                candidates.len(),
                reason
            ),
        })
    }

    // ----- read path -----

    /// Ordered read candidates using a per-call RNG
    pub fn read_candidates(&self, image_id: ImageId) -> Vec<EndpointId> {
        self.read_candidates_with_rng(image_id, &mut rand::thread_rng())
    }

    /// Ordered read candidates: priority groups ascending, weighted shuffle inside a group
    pub fn read_candidates_with_rng<R: Rng + ?Sized>(
        &self,
        image_id: ImageId,
        rng: &mut R,
    ) -> Vec<EndpointId> {
        let present = self.locations.present_endpoints(image_id);

        let mut groups: BTreeMap<u32, Vec<&RoutedEndpoint>> = BTreeMap::new();
        for endpoint in &self.endpoints {
            if endpoint.read_weight == 0
                || !present.contains(&endpoint.id)
                || !self.health.is_healthy(&endpoint.id)
            {
                continue;
            }
            groups
                .entry(endpoint.read_priority)
                .or_default()
                .push(endpoint);
        }

        let mut ordered = Vec::new();
        for (_, mut group) in groups {
            group.sort_by(|a, b| a.id.cmp(&b.id));
            ordered.extend(weighted_shuffle(group, rng).into_iter().map(|e| e.id.clone()));
        }
        ordered
    }

    /// Endpoint a read would go to first
    pub fn select_read_endpoint(&self, image_id: ImageId) -> Option<EndpointId> {
        self.read_candidates(image_id).into_iter().next()
    }

    /// Read image bytes, falling back through the candidate order
    pub async fn read(&self, image_id: ImageId) -> RouterResult<ReadResult> {
        let candidates = self.read_candidates(image_id);
        if candidates.is_empty() {
            return Err(RouterError::ReadUnavailable {
                image_id: image_id.to_string(),
                reason: "no healthy endpoint holds a present copy".to_string(),
            });
        }

        let mut last_error = String::new();
        for endpoint_id in &candidates {
            let (Some(endpoint), Some(location)) = (
                self.endpoint(endpoint_id),
                self.locations.get(image_id, endpoint_id),
            ) else {
                continue;
            };

            match self
                .with_timeout(endpoint_id, endpoint.backend.get(&location.object_key))
                .await
            {
                Ok(data) => {
                    debug!("📤 [ROUTER] Served image {} from '{}'", image_id, endpoint_id);
                    return Ok(ReadResult {
                        endpoint_id: endpoint_id.clone(),
                        data,
                    });
                }
                Err(BackendError::NotFound(key)) => {
                    warn!(
                        "🕳️ [ROUTER] Image {} listed on '{}' but object {} is gone",
                        image_id, endpoint_id, key
                    );
                    self.locations
                        .set_status(image_id, endpoint_id, LocationStatus::Missing);
                    last_error = format!("{}: object missing", endpoint_id);
                }
                Err(e) => {
                    warn!(
                        "⚠️ [ROUTER] Read of image {} from '{}' failed, falling back: {}",
                        image_id, endpoint_id, e
                    );
                    last_error = format!("{}: {}", endpoint_id, e);
                }
            }
        }

        Err(RouterError::ReadUnavailable {
            image_id: image_id.to_string(),
            reason: format!(
                "all {} candidates failed; last error: {}",
                candidates.len(),
                last_error
            ),
        })
    }

    // ----- sync path -----

    /// Backup endpoints without a present copy of the image
    pub fn missing_backups(&self, image_id: ImageId) -> Vec<EndpointId> {
        self.endpoints
            .iter()
            .filter(|e| e.role == EndpointRole::Backup)
            .filter(|e| self.locations.status(image_id, &e.id) != Some(LocationStatus::Present))
            .map(|e| e.id.clone())
            .collect()
    }

    /// Copy an image to `target_id`. Idempotent for already-present targets.
    pub async fn sync(&self, image_id: ImageId, target_id: &str) -> RouterResult<SyncOutcome> {
        let target = self
            .endpoint(target_id)
            .ok_or_else(|| RouterError::UnknownEndpoint(target_id.to_string()))?;

        if self.locations.status(image_id, target_id) == Some(LocationStatus::Present) {
            return Ok(SyncOutcome::AlreadyPresent);
        }

        let mut sources: Vec<&RoutedEndpoint> = self
            .locations
            .present_endpoints(image_id)
            .iter()
            .filter_map(|id| self.endpoint(id))
            .filter(|e| e.role == EndpointRole::Primary && e.id != target_id)
            .collect();
        if sources.is_empty() {
            return Err(RouterError::NoSource(image_id.to_string()));
        }
        sources.sort_by(|a, b| a.read_priority.cmp(&b.read_priority).then(a.id.cmp(&b.id)));

        // Direction check comes before any byte moves
        let local_sources: Vec<&RoutedEndpoint> = sources
            .iter()
            .copied()
            .filter(|e| e.backend_type == BackendType::Local)
            .collect();
        if local_sources.is_empty() {
            let err = RouterError::UnsupportedSyncDirection {
                from: sources[0].backend_type,
                to: target.backend_type,
            };
            warn!("🚫 [ROUTER] Sync of image {} to '{}' rejected: {}", image_id, target_id, err);
            return Err(err);
        }

        if !self.health.is_healthy(target_id) {
            return Err(RouterError::TransferFailure {
                endpoint: target_id.to_string(),
                reason: "target endpoint is unhealthy".to_string(),
            });
        }

        let healthy_sources: Vec<&RoutedEndpoint> = local_sources
            .into_iter()
            .filter(|e| self.health.is_healthy(&e.id))
            .collect();
        if healthy_sources.is_empty() {
            return Err(RouterError::TransferFailure {
                endpoint: target_id.to_string(),
                reason: "no healthy local source holds the image".to_string(),
            });
        }

        let Some(source_row) = self.locations.get(image_id, &healthy_sources[0].id) else {
            return Err(RouterError::NoSource(image_id.to_string()));
        };
        let content_hash = source_row.content_hash.clone();

        match self.locations.claim(image_id, target_id, &content_hash) {
            ClaimOutcome::AlreadyPresent => return Ok(SyncOutcome::AlreadyPresent),
            ClaimOutcome::InFlight => {
                return Err(RouterError::TransferFailure {
                    endpoint: target_id.to_string(),
                    reason: "sync already in flight".to_string(),
                })
            }
            ClaimOutcome::Claimed => {}
        }

        let mut last_error = String::new();
        for source in healthy_sources {
            let Some(row) = self.locations.get(image_id, &source.id) else {
                continue;
            };
            let data = match self
                .with_timeout(&source.id, source.backend.get(&row.object_key))
                .await
            {
                Ok(data) => data,
                Err(e) => {
                    last_error = format!("read from '{}': {}", source.id, e);
                    continue;
                }
            };

            match self
                .with_timeout(target_id, target.backend.put(&content_hash.object_key(), &data))
                .await
            {
                Ok(()) => {
                    if !self
                        .locations
                        .set_status(image_id, target_id, LocationStatus::Present)
                    {
                        self.discard_orphan(image_id, target, &content_hash.object_key())
                            .await;
                        return Err(RouterError::TransferFailure {
                            endpoint: target_id.to_string(),
                            reason: "image was removed during the transfer".to_string(),
                        });
                    }
                    info!(
                        "🔁 [ROUTER] Synced image {} from '{}' to '{}'",
                        image_id, source.id, target_id
                    );
                    return Ok(SyncOutcome::Copied {
                        from: source.id.clone(),
                    });
                }
                Err(e) => {
                    last_error = format!("write to '{}': {}", target_id, e);
                    break;
                }
            }
        }

        self.locations
            .set_status(image_id, target_id, LocationStatus::Failed);
        Err(RouterError::TransferFailure {
            endpoint: target_id.to_string(),
            reason: last_error,
        })
    }

    /// Remove every copy of an image; returns how many present copies were deleted.
    /// Rows whose delete failed are kept so the copy stays visible. Rows of
    /// in-flight transfers are dropped, and the transfer discards its object
    /// once it sees the row gone.
    pub async fn delete(&self, image_id: ImageId) -> usize {
        let mut deleted = 0;
        for row in self.locations.for_image(image_id) {
            let Some(endpoint) = self.endpoint(&row.endpoint_id) else {
                self.locations.remove(image_id, &row.endpoint_id);
                continue;
            };
            match row.status {
                LocationStatus::Missing | LocationStatus::Syncing => {
                    self.locations.remove(image_id, &row.endpoint_id);
                    continue;
                }
                LocationStatus::Failed => {
                    // A timed-out put may still have landed
                    self.discard_orphan(image_id, endpoint, &row.object_key).await;
                    self.locations.remove(image_id, &row.endpoint_id);
                    continue;
                }
                LocationStatus::Present => {}
            }
            match self
                .with_timeout(&row.endpoint_id, endpoint.backend.delete(&row.object_key))
                .await
            {
                Ok(()) => {
                    self.locations.remove(image_id, &row.endpoint_id);
                    deleted += 1;
                }
                Err(e) => warn!(
                    "⚠️ [ROUTER] Failed to delete image {} from '{}': {}",
                    image_id, row.endpoint_id, e
                ),
            }
        }
        if deleted > 0 {
            info!("🗑️ [ROUTER] Deleted {} copies of image {}", deleted, image_id);
        }
        deleted
    }

    /// Best-effort removal of an object that no location row accounts for
    async fn discard_orphan(&self, image_id: ImageId, endpoint: &RoutedEndpoint, object_key: &str) {
        match self
            .with_timeout(&endpoint.id, endpoint.backend.delete(object_key))
            .await
        {
            Ok(()) => warn!(
                "🧹 [ROUTER] Discarded untracked object {} on '{}' for image {}",
                object_key, endpoint.id, image_id
            ),
            Err(e) => warn!(
                "⚠️ [ROUTER] Could not discard {} on '{}' for removed image {}: {}",
                object_key, endpoint.id, image_id, e
            ),
        }
    }

    /// Forget location rows without touching stored bytes
    pub fn forget(&self, image_id: ImageId) -> usize {
        self.locations.remove_image(image_id)
    }
}

/// Weighted shuffle by successive weighted draws without replacement.
/// Stateless apart from the RNG handed in by the caller.
fn weighted_shuffle<'a, R: Rng + ?Sized>(
    mut remaining: Vec<&'a RoutedEndpoint>,
    rng: &mut R,
) -> Vec<&'a RoutedEndpoint> {
    let mut ordered = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let weights: Vec<u32> = remaining.iter().map(|e| e.read_weight).collect();
        match WeightedIndex::new(&weights) {
            Ok(dist) => {
                let picked = dist.sample(rng);
                ordered.push(remaining.remove(picked));
            }
            Err(_) => {
                ordered.append(&mut remaining);
            }
        }
    }
    ordered
}
