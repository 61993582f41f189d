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

//! S3-compatible object store backend (AWS S3, MinIO, R2, ...)

use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use serde::{Deserialize, Serialize};

use super::{BackendError, BackendResult, StorageBackend};
use crate::core::BackendType;

/// S3 configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// Bucket holding all objects of this endpoint
    pub bucket: String,

    /// AWS region (any value for most S3-compatible stores)
    #[serde(default = "default_region")]
    pub region: String,

    /// Custom endpoint for S3-compatible stores
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Static credentials; the default credential chain is used when absent
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,

    /// Path-style addressing (`host/bucket/key`), required by most self-hosted stores
    #[serde(default)]
    pub force_path_style: bool,

    /// Optional key prefix inside the bucket
    #[serde(default)]
    pub prefix: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: default_region(),
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            force_path_style: false,
            prefix: None,
        }
    }
}

/// S3 backend implementation
pub struct S3FileSystem {
    config: S3Config,
    client: Client,
}

impl S3FileSystem {
    /// Create new S3 backend instance
    pub async fn new(config: S3Config) -> BackendResult<Self> {
        if config.bucket.trim().is_empty() {
            return Err(BackendError::Config("S3 bucket must not be empty".to_string()));
        }

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        match (&config.access_key_id, &config.secret_access_key) {
            (Some(access_key), Some(secret_key)) => {
                loader = loader.credentials_provider(Credentials::new(
                    access_key.clone(),
                    secret_key.clone(),
                    config.session_token.clone(),
                    None,
                    "imghub-static",
                ));
            }
            (None, None) => {}
            _ => {
                return Err(BackendError::Config(
                    "Static credentials require access_key_id and secret_access_key".to_string(),
                ))
            }
        }

        let shared = loader.load().await;
        let mut builder =
            aws_sdk_s3::config::Builder::from(&shared).force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }
        let client = Client::from_conf(builder.build());

        Ok(Self { config, client })
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    /// Full object key including the configured prefix
    fn object_key(&self, key: &str) -> String {
        match self.config.prefix.as_deref().map(|p| p.trim_matches('/')) {
            Some(prefix) if !prefix.is_empty() => format!("{}/{}", prefix, key),
            _ => key.to_string(),
        }
    }

    fn describe(&self, key: &str) -> String {
        format!("s3://{}/{}", self.config.bucket, key)
    }
}

/// Map SDK errors onto the backend taxonomy
fn classify<E>(location: String, err: SdkError<E>) -> BackendError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let code = err.code().map(str::to_owned);

    match (status, code.as_deref()) {
        (Some(404), _) | (_, Some("NoSuchKey")) | (_, Some("NotFound")) => {
            BackendError::NotFound(location)
        }
        (Some(401), _) | (Some(403), _) | (_, Some("AccessDenied")) => {
            BackendError::AccessDenied(location)
        }
        (_, Some("NoSuchBucket")) => {
            BackendError::Config(format!("{}: bucket does not exist", location))
        }
        _ => BackendError::Unavailable(format!(
            "{}: {}",
            location,
            aws_sdk_s3::error::DisplayErrorContext(&err)
        )),
    }
}

#[async_trait]
impl StorageBackend for S3FileSystem {
    async fn put(&self, key: &str, data: &[u8]) -> BackendResult<()> {
        let object_key = self.object_key(key);
        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&object_key)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| classify(self.describe(&object_key), e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> BackendResult<Vec<u8>> {
        let object_key = self.object_key(key);
        let response = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| classify(self.describe(&object_key), e))?;

        let body = response.body.collect().await.map_err(|e| {
            BackendError::Unavailable(format!("{}: {}", self.describe(&object_key), e))
        })?;
        Ok(body.into_bytes().to_vec())
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        let object_key = self.object_key(key);
        match self
            .client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(&object_key)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => match classify(self.describe(&object_key), e) {
                BackendError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        let object_key = self.object_key(key);
        match self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(&object_key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => match classify(self.describe(&object_key), e) {
                BackendError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    fn backend_type(&self) -> BackendType {
        BackendType::S3Compatible
    }

    async fn probe(&self) -> BackendResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.config.bucket)
            .send()
            .await
            .map_err(|e| classify(format!("s3://{}", self.config.bucket), e))?;
        Ok(())
    }
}
