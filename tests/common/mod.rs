// Copyright 2025 Vijaykumar Singh
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Shared fakes for integration tests: in-memory backends, scripted
//! providers and a recording callback notifier

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use imghub::analysis::{EmbeddingProvider, VisionAnalysis, VisionProvider};
use imghub::core::{
    BackendConfig, BackendType, Config, EndpointConfig, EndpointRole, ProviderError, Vector,
};
use imghub::queue::{CallbackError, CallbackNotifier, CallbackPayload};
use imghub::storage::filesystem::local::LocalConfig;
use imghub::storage::filesystem::{BackendError, BackendResult, StorageBackend};
use imghub::storage::RoutedEndpoint;

/// In-memory object store with call counters and a failure switch
pub struct MemoryBackend {
    backend_type: BackendType,
    objects: Mutex<HashMap<String, Vec<u8>>>,
    failing: AtomicBool,
    put_delay_ms: AtomicU64,
    pub puts: AtomicUsize,
    pub gets: AtomicUsize,
}

impl MemoryBackend {
    pub fn new(backend_type: BackendType) -> Arc<Self> {
        Arc::new(Self {
            backend_type,
            objects: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
            put_delay_ms: AtomicU64::new(0),
            puts: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
        })
    }

    pub fn local() -> Arc<Self> {
        Self::new(BackendType::Local)
    }

    pub fn s3() -> Arc<Self> {
        Self::new(BackendType::S3Compatible)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Hold every put this long before the object lands
    pub fn set_put_delay(&self, delay: Duration) {
        self.put_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Remove an object behind the router's back
    pub fn drop_object(&self, key: &str) {
        self.objects.lock().remove(key);
    }

    fn check(&self) -> BackendResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(BackendError::Unavailable("memory backend switched off".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn put(&self, key: &str, data: &[u8]) -> BackendResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let delay = self.put_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.objects.lock().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> BackendResult<Vec<u8>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.objects
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        self.check()?;
        self.objects.lock().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        self.check()?;
        Ok(self.objects.lock().contains_key(key))
    }

    fn backend_type(&self) -> BackendType {
        self.backend_type
    }
}

pub fn endpoint(
    id: &str,
    role: EndpointRole,
    priority: u32,
    weight: u32,
    backend: Arc<MemoryBackend>,
) -> RoutedEndpoint {
    RoutedEndpoint {
        id: id.to_string(),
        backend_type: backend.backend_type(),
        role,
        read_priority: priority,
        read_weight: weight,
        backend,
    }
}

/// What the scripted vision provider does on one call
#[derive(Debug, Clone)]
pub enum VisionStep {
    Succeed(VisionAnalysis),
    Retryable(&'static str),
    Fatal(&'static str),
    /// Sleep past any sensible call timeout
    Hang,
}

/// Vision provider that replays a script, repeating the last step
pub struct ScriptedVision {
    steps: Mutex<VecDeque<VisionStep>>,
    last: Mutex<VisionStep>,
    pub calls: AtomicUsize,
}

impl ScriptedVision {
    pub fn new(steps: Vec<VisionStep>) -> Arc<Self> {
        let last = steps
            .last()
            .cloned()
            .unwrap_or(VisionStep::Retryable("empty script"));
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            last: Mutex::new(last),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn tagging(tags: &[&str], description: &str) -> Arc<Self> {
        Self::new(vec![VisionStep::Succeed(VisionAnalysis {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            description: description.to_string(),
        })])
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionProvider for ScriptedVision {
    fn name(&self) -> &str {
        "scripted-vision"
    }

    async fn analyze(
        &self,
        _image: &[u8],
        _mime_type: &str,
        _prompt: &str,
    ) -> Result<VisionAnalysis, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .steps
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.last.lock().clone());
        match step {
            VisionStep::Succeed(analysis) => Ok(analysis),
            VisionStep::Retryable(msg) => Err(ProviderError::Retryable(msg.to_string())),
            VisionStep::Fatal(msg) => Err(ProviderError::Fatal(msg.to_string())),
            VisionStep::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProviderError::Retryable("woke up".to_string()))
            }
        }
    }
}

/// Deterministic embedder: fixed dimension, records every input text
pub struct RecordingEmbedder {
    dimension: usize,
    pub texts: Mutex<Vec<String>>,
}

impl RecordingEmbedder {
    pub fn new(dimension: usize) -> Arc<Self> {
        Arc::new(Self {
            dimension,
            texts: Mutex::new(Vec::new()),
        })
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().clone()
    }
}

#[async_trait]
impl EmbeddingProvider for RecordingEmbedder {
    fn name(&self) -> &str {
        "recording-embedder"
    }

    async fn embed(&self, text: &str) -> Result<Vector, ProviderError> {
        self.texts.lock().push(text.to_string());
        let mut vector = vec![0.0; self.dimension];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % self.dimension] += byte as f32 / 255.0;
        }
        Ok(vector)
    }
}

/// Notifier that records every delivered payload
#[derive(Default)]
pub struct RecordingNotifier {
    pub delivered: Mutex<Vec<(String, CallbackPayload)>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn payloads(&self) -> Vec<CallbackPayload> {
        self.delivered.lock().iter().map(|(_, p)| p.clone()).collect()
    }

    pub fn urls(&self) -> Vec<String> {
        self.delivered.lock().iter().map(|(url, _)| url.clone()).collect()
    }
}

#[async_trait]
impl CallbackNotifier for RecordingNotifier {
    async fn notify(&self, url: &str, payload: &CallbackPayload) -> Result<(), CallbackError> {
        self.delivered
            .lock()
            .push((url.to_string(), payload.clone()));
        Ok(())
    }
}

/// Config tuned for fast tests: tiny backoff, short provider timeout
pub fn fast_config(endpoints: &[(&str, EndpointRole, u32, u32)]) -> Config {
    let mut config = Config::default();
    config.storage.endpoints = endpoints
        .iter()
        .map(|(id, role, priority, weight)| EndpointConfig {
            id: id.to_string(),
            backend: BackendConfig::Local(LocalConfig::default()),
            role: *role,
            read_priority: *priority,
            read_weight: *weight,
        })
        .collect();
    config.storage.transfer_timeout_ms = 2_000;
    config.queue.concurrency = 2;
    config.queue.max_retries = 2;
    config.queue.base_backoff_ms = 5;
    config.queue.max_backoff_ms = 20;
    config.analysis.call_timeout_ms = 200;
    config.analysis.embedding_dimension = 8;
    config
}

/// Poll `check` until it holds or the deadline passes
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// PNG magic followed by arbitrary bytes
pub fn png(seed: &str) -> Vec<u8> {
    let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
    bytes.extend_from_slice(seed.as_bytes());
    bytes
}
