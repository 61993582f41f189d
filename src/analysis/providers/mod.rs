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

//! Vision and embedding providers
//!
//! The coordinator only sees [`VisionProvider`] and [`EmbeddingProvider`].
//! Implementations:
//! - `openai_compatible` - OpenAI API and compatible servers (Ollama, vLLM, LM Studio)
//! - `gemini`            - Google Gemini API
//!
//! Timeouts are applied by the caller; providers classify their own failures
//! as retryable or fatal.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

pub mod gemini;
pub mod openai;

use crate::core::{ProviderConfig, ProviderError, Vector};
use gemini::GeminiProvider;
use openai::OpenAiCompatibleProvider;

/// Vision model output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionAnalysis {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: String,
}

#[async_trait]
pub trait VisionProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Produce tags and a description for an image
    async fn analyze(
        &self,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
    ) -> Result<VisionAnalysis, ProviderError>;
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Embed text into a fixed-length vector
    async fn embed(&self, text: &str) -> Result<Vector, ProviderError>;
}

pub fn create_vision_provider(
    config: &ProviderConfig,
) -> Result<Arc<dyn VisionProvider>, ProviderError> {
    Ok(match config {
        ProviderConfig::OpenaiCompatible { .. } => Arc::new(OpenAiCompatibleProvider::new(config)?),
        ProviderConfig::Gemini { .. } => Arc::new(GeminiProvider::new(config)?),
    })
}

pub fn create_embedding_provider(
    config: &ProviderConfig,
) -> Result<Arc<dyn EmbeddingProvider>, ProviderError> {
    Ok(match config {
        ProviderConfig::OpenaiCompatible { .. } => Arc::new(OpenAiCompatibleProvider::new(config)?),
        ProviderConfig::Gemini { .. } => Arc::new(GeminiProvider::new(config)?),
    })
}

/// Parse a base URL so relative paths join below it
pub(crate) fn parse_base_url(raw: &str) -> Result<Url, ProviderError> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    Url::parse(&normalized)
        .map_err(|e| ProviderError::Fatal(format!("invalid provider base_url '{}': {}", raw, e)))
}

pub(crate) fn http_client() -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .user_agent(concat!("imghub/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProviderError::Fatal(format!("failed to build HTTP client: {}", e)))
}

/// Transport failures are always worth another attempt
pub(crate) fn classify_transport(provider: &str, err: reqwest::Error) -> ProviderError {
    ProviderError::Retryable(format!("{} request failed: {}", provider, err))
}

/// 408, 429 and 5xx are retryable; any other non-success status is fatal
pub(crate) fn classify_status(provider: &str, status: u16, body: &str) -> ProviderError {
    let snippet: String = body.chars().take(256).collect();
    let message = format!("{} returned HTTP {}: {}", provider, status, snippet);
    if status == 408 || status == 429 || status >= 500 {
        ProviderError::Retryable(message)
    } else {
        ProviderError::Fatal(message)
    }
}

/// Parse model text into tags and description.
/// Tolerates markdown code fences; unparseable output is retryable.
pub fn parse_vision_output(text: &str) -> Result<VisionAnalysis, ProviderError> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    // Some models wrap the object in prose; fall back to the outermost braces
    let candidate = match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if start < end => &unfenced[start..=end],
        _ => unfenced,
    };

    serde_json::from_str::<VisionAnalysis>(candidate).map_err(|e| {
        ProviderError::Retryable(format!("malformed vision output ({}): {}", e, snippet(text)))
    })
}

fn snippet(text: &str) -> String {
    text.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vision_output_variants() {
        let plain = parse_vision_output(r#"{"tags": ["cat", "sofa"], "description": "A cat."}"#)
            .unwrap();
        assert_eq!(plain.tags, vec!["cat", "sofa"]);
        assert_eq!(plain.description, "A cat.");

        let fenced =
            parse_vision_output("```json\n{\"tags\": [\"dog\"], \"description\": \"\"}\n```")
                .unwrap();
        assert_eq!(fenced.tags, vec!["dog"]);

        let prose = parse_vision_output("Sure! {\"description\": \"sunset\"} Hope it helps")
            .unwrap();
        assert!(prose.tags.is_empty());
        assert_eq!(prose.description, "sunset");
    }

    #[test]
    fn test_malformed_output_is_retryable() {
        let err = parse_vision_output("I cannot see the image").unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status("p", 429, "").is_retryable());
        assert!(classify_status("p", 503, "").is_retryable());
        assert!(classify_status("p", 408, "").is_retryable());
        assert!(!classify_status("p", 400, "bad").is_retryable());
        assert!(!classify_status("p", 401, "").is_retryable());
    }

    #[test]
    fn test_base_url_joining() {
        let base = parse_base_url("http://localhost:11434/v1").unwrap();
        assert_eq!(
            base.join("embeddings").unwrap().as_str(),
            "http://localhost:11434/v1/embeddings"
        );
        assert!(parse_base_url("not a url").is_err());
    }
}
