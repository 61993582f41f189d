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

//! # imghub - Multi-endpoint image storage with AI analysis
//!
//! imghub stores image bytes across local and S3-compatible endpoints, runs
//! vision tagging and embedding generation in the background, and answers
//! tag, vector and hybrid searches.
//!
//! ## Key Pieces
//!
//! - **Storage router**: priority/weight-aware endpoint selection with health-based failover
//! - **Task queue**: bounded worker pool with retries, backoff, cancellation and webhooks
//! - **Analysis coordinator**: smart-skip of vision when tags are supplied, backup sync
//! - **Retrieval ranker**: cosine similarity blended with tag overlap

pub mod analysis;
pub mod compute;
pub mod core;
pub mod queue;
pub mod search;
pub mod storage;

pub use crate::core::{Config, ImageHubError, Result};

use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::analysis::{
    create_embedding_provider, create_vision_provider, AnalysisCoordinator, EmbeddingProvider,
    ImageCatalog, IngestReceipt, NewImage, VisionProvider,
};
use crate::core::{EndpointId, Image, ImageId, TaskId};
use crate::queue::{CallbackNotifier, Enqueued, QueueStats, Task, TaskQueue, WebhookNotifier};
use crate::search::{RetrievalRanker, SearchQuery, SearchResultSet};
use crate::storage::{
    create_backend, EndpointHealth, EndpointHealthTracker, LocationTable, ReadResult,
    RoutedEndpoint, StorageEndpoint, StorageRouter,
};

/// Main imghub instance: owns the router, health tracker, queue, catalog,
/// coordinator and ranker
pub struct ImageHub {
    config: Config,
    router: Arc<StorageRouter>,
    health: Arc<EndpointHealthTracker>,
    queue: Arc<TaskQueue>,
    catalog: Arc<ImageCatalog>,
    coordinator: Arc<AnalysisCoordinator>,
    ranker: RetrievalRanker,
    shutdown: CancellationToken,
    probe_loops: Mutex<Vec<JoinHandle<()>>>,
}

impl ImageHub {
    /// Build every component from configuration
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        info!(
            "🚀 ImageHub::new - initializing node '{}' with {} storage endpoints",
            config.server.node_id,
            config.storage.endpoints.len()
        );

        let mut endpoints = Vec::with_capacity(config.storage.endpoints.len());
        for endpoint in &config.storage.endpoints {
            let backend = create_backend(&endpoint.backend).await?;
            info!(
                "✅ Endpoint '{}' ready ({}, {:?}, priority {}, weight {})",
                endpoint.id,
                backend.backend_type(),
                endpoint.role,
                endpoint.read_priority,
                endpoint.read_weight
            );
            endpoints.push(RoutedEndpoint::from_config(endpoint, backend));
        }

        let vision = create_vision_provider(&config.analysis.vision)?;
        let embedding = create_embedding_provider(&config.analysis.embedding)?;
        let notifier = WebhookNotifier::new(config.queue.callback_timeout())
            .map_err(|e| ImageHubError::InvalidInput(e.to_string()))?;

        Ok(Self::with_components(
            config,
            endpoints,
            vision,
            embedding,
            Some(Arc::new(notifier)),
        ))
    }

    /// Assemble a hub from pre-built backends and providers
    pub fn with_components(
        config: Config,
        endpoints: Vec<RoutedEndpoint>,
        vision: Arc<dyn VisionProvider>,
        embedding: Arc<dyn EmbeddingProvider>,
        notifier: Option<Arc<dyn CallbackNotifier>>,
    ) -> Self {
        let probes = endpoints
            .iter()
            .map(|e| (e.id.clone(), Arc::clone(&e.backend)))
            .collect();
        let health = Arc::new(EndpointHealthTracker::new(probes, config.health.clone()));
        let router = Arc::new(StorageRouter::new(
            endpoints,
            Arc::clone(&health),
            Arc::new(LocationTable::new()),
            Duration::from_millis(config.storage.transfer_timeout_ms),
        ));
        let queue = Arc::new(TaskQueue::new(config.queue.clone(), notifier));
        let catalog = Arc::new(ImageCatalog::new());
        let coordinator = Arc::new(AnalysisCoordinator::new(
            Arc::clone(&router),
            Arc::clone(&queue),
            Arc::clone(&catalog),
            vision,
            embedding,
            config.analysis.clone(),
        ));
        let ranker = RetrievalRanker::new(Arc::clone(&catalog), config.search.clone());

        Self {
            config,
            router,
            health,
            queue,
            catalog,
            coordinator,
            ranker,
            shutdown: CancellationToken::new(),
            probe_loops: Mutex::new(Vec::new()),
        }
    }

    /// Start health probing and the worker pool
    pub fn start(&self) -> Result<()> {
        let mut probe_loops = self.probe_loops.lock();
        if probe_loops.is_empty() {
            *probe_loops = self.health.spawn_probe_loops(self.shutdown.child_token());
        }
        drop(probe_loops);

        self.queue.start(self.coordinator.clone())?;
        info!("✅ ImageHub started");
        Ok(())
    }

    /// Stop probing, drain the worker pool
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.queue.shutdown().await;

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.probe_loops.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("⚠️ Probe loop ended abnormally: {}", e);
            }
        }
        info!("🛑 ImageHub stopped");
    }

    /// Probe every endpoint once, concurrently
    pub async fn check_endpoints(&self) -> Vec<(EndpointId, bool)> {
        let ids: Vec<EndpointId> = self.router.endpoints().into_iter().map(|e| e.id).collect();
        let outcomes = join_all(ids.iter().map(|id| self.health.probe(id))).await;
        ids.into_iter().zip(outcomes).collect()
    }

    pub async fn ingest(&self, bytes: &[u8], input: NewImage) -> Result<IngestReceipt> {
        self.coordinator.ingest(bytes, input).await
    }

    pub async fn read_image(&self, image_id: ImageId) -> Result<ReadResult> {
        if self.catalog.get(image_id).is_none() {
            return Err(ImageHubError::ImageNotFound(image_id.to_string()));
        }
        Ok(self.router.read(image_id).await?)
    }

    pub fn search(&self, query: &SearchQuery) -> Result<SearchResultSet> {
        self.ranker.search(query)
    }

    pub async fn remove(&self, image_id: ImageId) -> Result<Image> {
        self.coordinator.remove(image_id).await
    }

    pub fn reanalyze(&self, image_id: ImageId, callback_url: Option<String>) -> Result<Enqueued> {
        self.coordinator.reanalyze(image_id, callback_url)
    }

    /// Re-enqueue backup syncs for an image, e.g. after a backup recovered
    pub fn sync_backups(&self, image_id: ImageId) -> Result<Option<Enqueued>> {
        self.coordinator.sync_backups(image_id)
    }

    pub fn image(&self, image_id: ImageId) -> Option<Image> {
        self.catalog.get(image_id)
    }

    pub fn task(&self, task_id: TaskId) -> Option<Task> {
        self.queue.get(task_id)
    }

    pub fn tasks_for_image(&self, image_id: ImageId) -> Vec<Task> {
        self.queue.list_for_image(image_id)
    }

    pub async fn cancel_task(&self, task_id: TaskId) -> Result<crate::queue::TaskState> {
        Ok(self.queue.cancel(task_id).await?)
    }

    pub fn endpoints(&self) -> Vec<StorageEndpoint> {
        self.router.endpoints()
    }

    pub fn endpoint_health(&self) -> Vec<(EndpointId, EndpointHealth)> {
        self.health.snapshot()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn router(&self) -> &Arc<StorageRouter> {
        &self.router
    }

    pub fn catalog(&self) -> &Arc<ImageCatalog> {
        &self.catalog
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }
}
