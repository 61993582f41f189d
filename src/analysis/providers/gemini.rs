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

//! Gemini `generateContent` / `embedContent`

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use super::{
    classify_status, classify_transport, http_client, parse_base_url, parse_vision_output,
    EmbeddingProvider, VisionAnalysis, VisionProvider,
};
use crate::core::{ProviderConfig, ProviderError, Vector};

const PROVIDER: &str = "gemini";

pub struct GeminiProvider {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: EmbedValues,
}

#[derive(Deserialize)]
struct EmbedValues {
    values: Vector,
}

impl GeminiProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let ProviderConfig::Gemini {
            base_url,
            api_key,
            model,
        } = config
        else {
            return Err(ProviderError::Fatal(
                "expected a gemini provider config".to_string(),
            ));
        };
        if api_key.trim().is_empty() {
            return Err(ProviderError::Fatal("gemini api_key must be set".to_string()));
        }

        Ok(Self {
            http: http_client()?,
            base_url: parse_base_url(base_url)?,
            api_key: api_key.clone(),
            model: model.trim_start_matches("models/").to_string(),
        })
    }

    /// `{base}/models/{model}:{method}?key=...`
    fn method_url(&self, method: &str) -> Result<Url, ProviderError> {
        let mut url = self
            .base_url
            .join(&format!("models/{}:{}", self.model, method))
            .map_err(|e| ProviderError::Fatal(format!("invalid gemini model path: {}", e)))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url)
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, ProviderError> {
        let response = self
            .http
            .post(self.method_url(method)?)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(PROVIDER, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(PROVIDER, status.as_u16(), &body));
        }
        response.json::<T>().await.map_err(|e| {
            ProviderError::Retryable(format!("{} returned an unreadable body: {}", PROVIDER, e))
        })
    }
}

#[async_trait]
impl VisionProvider for GeminiProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn analyze(
        &self,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
    ) -> Result<VisionAnalysis, ProviderError> {
        let body = json!({
            "contents": [{
                "parts": [
                    { "text": prompt },
                    { "inline_data": {
                        "mime_type": mime_type,
                        "data": base64::engine::general_purpose::STANDARD.encode(image)
                    } }
                ]
            }],
            "generationConfig": { "responseMimeType": "application/json" }
        });

        let response: GenerateResponse = self.call("generateContent", body).await?;
        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(ProviderError::Retryable("gemini returned no candidates".to_string()));
        }
        parse_vision_output(&text)
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn embed(&self, text: &str) -> Result<Vector, ProviderError> {
        let body = json!({
            "model": format!("models/{}", self.model),
            "content": { "parts": [{ "text": text }] }
        });
        let response: EmbedResponse = self.call("embedContent", body).await?;
        Ok(response.embedding.values)
    }
}
