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

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::errors::ConfigError;
use super::types::{BackendType, EndpointId, EndpointRole};
use crate::storage::filesystem::local::LocalConfig;
use crate::storage::filesystem::s3::S3Config;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub health: HealthConfig,
    pub queue: QueueConfig,
    pub analysis: AnalysisConfig,
    pub search: SearchConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub node_id: String,
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub endpoints: Vec<EndpointConfig>,
    /// Upper bound for a single put/get/delete against one endpoint
    pub transfer_timeout_ms: u64,
}

/// One configured storage endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub id: EndpointId,
    pub backend: BackendConfig,
    pub role: EndpointRole,
    /// Lower is preferred
    pub read_priority: u32,
    /// Relative read share within a priority group; 0 disables reads
    #[serde(default = "default_read_weight")]
    pub read_weight: u32,
}

fn default_read_weight() -> u32 {
    1
}

/// Connection configuration per backend type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BackendConfig {
    Local(LocalConfig),
    S3Compatible(S3Config),
}

impl BackendConfig {
    pub fn backend_type(&self) -> BackendType {
        match self {
            Self::Local(_) => BackendType::Local,
            Self::S3Compatible(_) => BackendType::S3Compatible,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub probe_interval_ms: u64,
    pub probe_timeout_ms: u64,
    /// Consecutive probe failures before an endpoint is marked unhealthy
    pub failure_threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Worker pool size
    pub concurrency: usize,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub callback_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Timeout applied to every vision/embedding call
    pub call_timeout_ms: u64,
    pub vision_prompt: String,
    pub embedding_dimension: usize,
    pub vision: ProviderConfig,
    pub embedding: ProviderConfig,
}

/// Vision/embedding provider selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ProviderConfig {
    OpenaiCompatible {
        base_url: String,
        api_key: Option<String>,
        model: String,
    },
    Gemini {
        base_url: String,
        api_key: String,
        model: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_weight_vector: f32,
    pub default_weight_tag: f32,
    pub default_limit: usize,
    pub max_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
}

pub const DEFAULT_VISION_PROMPT: &str = "Describe this image. Reply with a JSON object \
{\"tags\": [short lowercase tags], \"description\": one or two sentences}.";

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            health: HealthConfig::default(),
            queue: QueueConfig::default(),
            analysis: AnalysisConfig::default(),
            search: SearchConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            node_id: "node-1".to_string(),
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![EndpointConfig {
                id: "local-primary".to_string(),
                backend: BackendConfig::Local(LocalConfig {
                    root_dir: PathBuf::from("./data/images"),
                    ..Default::default()
                }),
                role: EndpointRole::Primary,
                read_priority: 1,
                read_weight: 1,
            }],
            transfer_timeout_ms: 30_000,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 10_000,
            probe_timeout_ms: 3_000,
            failure_threshold: 3,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_retries: 3,
            base_backoff_ms: 500,
            max_backoff_ms: 60_000,
            callback_timeout_ms: 5_000,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 60_000,
            vision_prompt: DEFAULT_VISION_PROMPT.to_string(),
            embedding_dimension: 768,
            vision: ProviderConfig::OpenaiCompatible {
                base_url: "http://localhost:11434/v1".to_string(),
                api_key: None,
                model: "llava".to_string(),
            },
            embedding: ProviderConfig::OpenaiCompatible {
                base_url: "http://localhost:11434/v1".to_string(),
                api_key: None,
                model: "nomic-embed-text".to_string(),
            },
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_weight_vector: 0.7,
            default_weight_tag: 0.3,
            default_limit: 20,
            max_limit: 1000,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl HealthConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl QueueConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_millis(self.callback_timeout_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&raw)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(raw).map_err(|e| ConfigError::TomlParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.endpoints.is_empty() {
            return Err(ConfigError::MissingField {
                field: "storage.endpoints".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for endpoint in &self.storage.endpoints {
            if endpoint.id.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "storage.endpoints.id".to_string(),
                    value: endpoint.id.clone(),
                });
            }
            if !seen.insert(endpoint.id.as_str()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "duplicate endpoint id '{}'",
                    endpoint.id
                )));
            }
        }

        if !self
            .storage
            .endpoints
            .iter()
            .any(|e| e.role == EndpointRole::Primary)
        {
            return Err(ConfigError::ValidationFailed(
                "at least one primary endpoint is required".to_string(),
            ));
        }

        if self.queue.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queue.concurrency".to_string(),
                value: "0".to_string(),
            });
        }
        if self.health.failure_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "health.failure_threshold".to_string(),
                value: "0".to_string(),
            });
        }
        if self.analysis.embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue {
                field: "analysis.embedding_dimension".to_string(),
                value: "0".to_string(),
            });
        }
        for (field, weight) in [
            ("search.default_weight_vector", self.search.default_weight_vector),
            ("search.default_weight_tag", self.search.default_weight_tag),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: weight.to_string(),
                });
            }
        }

        Ok(())
    }
}
