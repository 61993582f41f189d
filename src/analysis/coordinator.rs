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

//! Analysis coordinator
//!
//! Turns a stored image into queued work and executes that work:
//! - explicit tags on upload skip vision analysis, embedding still runs
//! - vision success enqueues embedding; vision exhaustion enqueues it too,
//!   so no image stays unsearchable
//! - every backup lacking the image gets a storage sync

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::catalog::ImageCatalog;
use super::providers::{EmbeddingProvider, VisionProvider};
use crate::core::{
    normalize_tag, sniff_mime_type, AnalysisConfig, AnalysisStatus, ContentHash, EndpointId,
    Image, ImageHubError, ImageId, ProviderError, Result, RouterError, TaskError,
};
use crate::queue::{
    Enqueued, FailureReason, Task, TaskContext, TaskExecutor, TaskKind, TaskPayload, TaskQueue,
    TaskSpec,
};
use crate::storage::StorageRouter;

/// Caller-supplied metadata for a new image
#[derive(Debug, Clone, Default)]
pub struct NewImage {
    pub tags: Vec<String>,
    pub description: Option<String>,
    pub callback_url: Option<String>,
}

/// Outcome of an ingest
#[derive(Debug, Clone)]
pub struct IngestReceipt {
    pub image: Image,
    /// Same bytes were already stored; nothing was written or enqueued
    pub deduplicated: bool,
    pub endpoint_id: Option<EndpointId>,
    pub tasks: Vec<Enqueued>,
}

/// Text handed to the embedding provider.
///
/// ```text
/// {description}
/// Tags: {tag1}, {tag2}
/// ```
/// Empty parts are left out; with neither part the text is `untitled image`.
pub fn embedding_text(image: &Image) -> String {
    let mut lines = Vec::with_capacity(2);
    let description = image.description.trim();
    if !description.is_empty() {
        lines.push(description.to_string());
    }
    if !image.tags.is_empty() {
        let tags: Vec<&str> = image.tags.iter().map(String::as_str).collect();
        lines.push(format!("Tags: {}", tags.join(", ")));
    }
    if lines.is_empty() {
        "untitled image".to_string()
    } else {
        lines.join("\n")
    }
}

pub struct AnalysisCoordinator {
    router: Arc<StorageRouter>,
    queue: Arc<TaskQueue>,
    catalog: Arc<ImageCatalog>,
    vision: Arc<dyn VisionProvider>,
    embedding: Arc<dyn EmbeddingProvider>,
    config: AnalysisConfig,
}

impl AnalysisCoordinator {
    pub fn new(
        router: Arc<StorageRouter>,
        queue: Arc<TaskQueue>,
        catalog: Arc<ImageCatalog>,
        vision: Arc<dyn VisionProvider>,
        embedding: Arc<dyn EmbeddingProvider>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            router,
            queue,
            catalog,
            vision,
            embedding,
            config,
        }
    }

    fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.config.call_timeout_ms)
    }

    /// Store bytes on a primary, catalogue the image and enqueue its tasks
    pub async fn ingest(&self, bytes: &[u8], input: NewImage) -> Result<IngestReceipt> {
        if bytes.is_empty() {
            return Err(ImageHubError::InvalidInput("image is empty".to_string()));
        }

        let content_hash = ContentHash::of(bytes);
        if let Some(existing) = self.catalog.find_by_hash(&content_hash) {
            debug!(
                "♻️ [ANALYSIS] Upload matches existing image {} ({})",
                existing.id, content_hash
            );
            return Ok(IngestReceipt {
                image: existing,
                deduplicated: true,
                endpoint_id: None,
                tasks: Vec::new(),
            });
        }

        let image_id = ImageId::new();
        let receipt = self.router.write(image_id, &content_hash, bytes).await?;

        let explicit_tags: BTreeSet<String> =
            input.tags.iter().filter_map(|t| normalize_tag(t)).collect();
        let now = Utc::now();
        let image = Image {
            id: image_id,
            content_hash: content_hash.clone(),
            size_bytes: bytes.len() as u64,
            mime_type: sniff_mime_type(bytes).to_string(),
            tags: BTreeSet::new(),
            description: input
                .description
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .to_string(),
            embedding: None,
            analysis_status: AnalysisStatus::Pending,
            last_error: None,
            uploaded_at: now,
            updated_at: now,
        };

        if let Err(existing_id) = self.catalog.insert(image) {
            // Lost a race with a concurrent upload of the same bytes; the object
            // key is shared, so only our location rows go away
            self.router.forget(image_id);
            let existing = self
                .catalog
                .get(existing_id)
                .ok_or_else(|| ImageHubError::ImageNotFound(existing_id.to_string()))?;
            return Ok(IngestReceipt {
                image: existing,
                deduplicated: true,
                endpoint_id: None,
                tasks: Vec::new(),
            });
        }

        let smart_skip = !explicit_tags.is_empty();
        if smart_skip {
            self.catalog.set_tags(image_id, &explicit_tags);
            self.catalog
                .set_status(image_id, AnalysisStatus::Tagged, None);
        }

        let mut tasks = Vec::new();
        let first = if smart_skip {
            TaskSpec::embedding(image_id)
        } else {
            TaskSpec::vision(image_id)
        };
        tasks.push(
            self.queue
                .enqueue(first.with_callback(input.callback_url.clone()))?,
        );
        if let Some(sync) = self.sync_backups_with_callback(image_id, input.callback_url)? {
            tasks.push(sync);
        }

        info!(
            "🖼️ [ANALYSIS] Ingested image {} ({} bytes) on '{}'{}",
            image_id,
            bytes.len(),
            receipt.endpoint_id,
            if smart_skip {
                ", vision skipped (tags supplied)"
            } else {
                ""
            }
        );

        let image = self
            .catalog
            .get(image_id)
            .ok_or_else(|| ImageHubError::ImageNotFound(image_id.to_string()))?;
        Ok(IngestReceipt {
            image,
            deduplicated: false,
            endpoint_id: Some(receipt.endpoint_id),
            tasks,
        })
    }

    /// Enqueue a storage sync for every backup lacking the image
    pub fn sync_backups(&self, image_id: ImageId) -> Result<Option<Enqueued>> {
        self.sync_backups_with_callback(image_id, None)
    }

    fn sync_backups_with_callback(
        &self,
        image_id: ImageId,
        callback_url: Option<String>,
    ) -> Result<Option<Enqueued>> {
        let missing = self.router.missing_backups(image_id);
        if missing.is_empty() {
            return Ok(None);
        }
        let spec = TaskSpec::storage_sync(image_id, missing).with_callback(callback_url);
        Ok(Some(self.queue.enqueue(spec)?))
    }

    /// Run vision analysis again
    pub fn reanalyze(&self, image_id: ImageId, callback_url: Option<String>) -> Result<Enqueued> {
        if self.catalog.get(image_id).is_none() {
            return Err(ImageHubError::ImageNotFound(image_id.to_string()));
        }
        let spec = TaskSpec::vision(image_id).with_callback(callback_url);
        Ok(self.queue.enqueue(spec)?)
    }

    /// Cancel the image's tasks, delete its bytes and drop it from the catalog
    pub async fn remove(&self, image_id: ImageId) -> Result<Image> {
        if self.catalog.get(image_id).is_none() {
            return Err(ImageHubError::ImageNotFound(image_id.to_string()));
        }
        let cancelled = self.queue.cancel_image(image_id).await;
        let deleted = self.router.delete(image_id).await;
        let image = self
            .catalog
            .remove(image_id)
            .ok_or_else(|| ImageHubError::ImageNotFound(image_id.to_string()))?;
        info!(
            "🗑️ [ANALYSIS] Removed image {} ({} copies deleted, {} tasks cancelled)",
            image_id, deleted, cancelled
        );
        Ok(image)
    }

    /// Await a provider call under the call timeout, aborting on cancellation
    async fn provider_call<T>(
        &self,
        ctx: &TaskContext,
        call: impl Future<Output = std::result::Result<T, ProviderError>>,
    ) -> std::result::Result<T, TaskError> {
        let timeout = self.call_timeout();
        tokio::select! {
            _ = ctx.cancelled() => Err(TaskError::Cancelled),
            outcome = tokio::time::timeout(timeout, call) => match outcome {
                Ok(result) => result.map_err(TaskError::from),
                Err(_) => Err(ProviderError::Timeout {
                    timeout_ms: self.config.call_timeout_ms,
                }
                .into()),
            },
        }
    }

    fn image_for(&self, task: &Task) -> std::result::Result<Image, TaskError> {
        self.catalog
            .get(task.image_id)
            .ok_or_else(|| TaskError::Fatal(format!("image {} no longer exists", task.image_id)))
    }

    async fn run_vision(
        &self,
        task: &Task,
        prompt: Option<&str>,
        ctx: &TaskContext,
    ) -> std::result::Result<Vec<TaskSpec>, TaskError> {
        let image = self.image_for(task)?;
        self.catalog
            .set_status(image.id, AnalysisStatus::Analyzing, None);

        ctx.checkpoint()?;
        let read = self.router.read(image.id).await.map_err(|e| match e {
            RouterError::ReadUnavailable { .. } | RouterError::TransferFailure { .. } => {
                TaskError::Retryable(e.to_string())
            }
            other => TaskError::Fatal(other.to_string()),
        })?;

        ctx.checkpoint()?;
        let prompt = prompt.unwrap_or(&self.config.vision_prompt);
        let analysis = self
            .provider_call(ctx, self.vision.analyze(&read.data, &image.mime_type, prompt))
            .await?;

        ctx.checkpoint()?;
        self.catalog
            .apply_analysis(image.id, &analysis.tags, &analysis.description);
        info!(
            "🏷️ [ANALYSIS] Vision tagged image {} with {} tags via {}",
            image.id,
            analysis.tags.len(),
            self.vision.name()
        );

        Ok(vec![
            TaskSpec::embedding(image.id).with_callbacks(task.callback_urls.iter().cloned())
        ])
    }

    async fn run_embedding(
        &self,
        task: &Task,
        ctx: &TaskContext,
    ) -> std::result::Result<Vec<TaskSpec>, TaskError> {
        let image = self.image_for(task)?;
        let text = embedding_text(&image);

        ctx.checkpoint()?;
        let vector = self.provider_call(ctx, self.embedding.embed(&text)).await?;
        if vector.len() != self.config.embedding_dimension {
            return Err(TaskError::Fatal(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.config.embedding_dimension,
                vector.len()
            )));
        }

        ctx.checkpoint()?;
        self.catalog.set_embedding(image.id, vector);
        info!(
            "🧮 [ANALYSIS] Indexed image {} ({} dims via {})",
            image.id,
            self.config.embedding_dimension,
            self.embedding.name()
        );
        Ok(Vec::new())
    }

    async fn run_sync(
        &self,
        task: &Task,
        targets: &BTreeSet<EndpointId>,
        ctx: &TaskContext,
    ) -> std::result::Result<Vec<TaskSpec>, TaskError> {
        let mut failures = Vec::new();
        for target in targets {
            ctx.checkpoint()?;
            match self.router.sync(task.image_id, target).await {
                Ok(outcome) => debug!(
                    "🔁 [ANALYSIS] Sync of image {} to '{}': {:?}",
                    task.image_id, target, outcome
                ),
                Err(e @ RouterError::UnsupportedSyncDirection { .. }) => {
                    return Err(TaskError::Unsupported(e.to_string()));
                }
                Err(e @ RouterError::TransferFailure { .. }) => failures.push(e.to_string()),
                Err(e) => return Err(TaskError::Fatal(e.to_string())),
            }
        }

        if failures.is_empty() {
            Ok(Vec::new())
        } else {
            Err(TaskError::Retryable(failures.join("; ")))
        }
    }
}

#[async_trait]
impl TaskExecutor for AnalysisCoordinator {
    async fn execute(
        &self,
        task: &Task,
        ctx: &TaskContext,
    ) -> std::result::Result<Vec<TaskSpec>, TaskError> {
        match &task.payload {
            TaskPayload::VisionAnalysis { prompt } => {
                self.run_vision(task, prompt.as_deref(), ctx).await
            }
            TaskPayload::Embedding => self.run_embedding(task, ctx).await,
            TaskPayload::StorageSync { targets } => self.run_sync(task, targets, ctx).await,
        }
    }

    fn on_failure(&self, task: &Task, reason: &FailureReason) -> Vec<TaskSpec> {
        match (task.kind, reason) {
            (TaskKind::VisionAnalysis, FailureReason::Cancelled) => {
                self.catalog.set_last_error(task.image_id, reason.to_string());
                Vec::new()
            }
            (TaskKind::VisionAnalysis, _) => {
                warn!(
                    "⚠️ [ANALYSIS] Vision analysis of image {} gave up ({}); indexing with existing metadata",
                    task.image_id, reason
                );
                if !self.catalog.set_status(
                    task.image_id,
                    AnalysisStatus::Failed,
                    Some(reason.to_string()),
                ) {
                    return Vec::new();
                }
                vec![TaskSpec::embedding(task.image_id)
                    .with_callbacks(task.callback_urls.iter().cloned())]
            }
            (TaskKind::Embedding, _) => {
                self.catalog.set_last_error(task.image_id, reason.to_string());
                Vec::new()
            }
            (TaskKind::StorageSync, _) => {
                warn!(
                    "⚠️ [ANALYSIS] Backup sync of image {} abandoned: {}",
                    task.image_id, reason
                );
                Vec::new()
            }
        }
    }
}
