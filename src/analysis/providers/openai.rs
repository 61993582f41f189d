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

//! OpenAI-compatible chat completions and embeddings

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

const PROVIDER: &str = "openai_compatible";

pub struct OpenAiCompatibleProvider {
    http: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vector,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let ProviderConfig::OpenaiCompatible {
            base_url,
            api_key,
            model,
        } = config
        else {
            return Err(ProviderError::Fatal(
                "expected an openai_compatible provider config".to_string(),
            ));
        };

        Ok(Self {
            http: http_client()?,
            base_url: parse_base_url(base_url)?,
            api_key: api_key.clone().filter(|key| !key.is_empty()),
            model: model.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        self.base_url
            .join(path)
            .map_err(|e| ProviderError::Fatal(format!("invalid endpoint path '{}': {}", path, e)))
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, ProviderError> {
        let mut request = self.http.post(self.endpoint(path)?).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
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
impl VisionProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn analyze(
        &self,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
    ) -> Result<VisionAnalysis, ProviderError> {
        let data_url = format!(
            "data:{};base64,{}",
            mime_type,
            base64::engine::general_purpose::STANDARD.encode(image)
        );
        let body = json!({
            "model": self.model,
            "response_format": { "type": "json_object" },
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": data_url } }
                ]
            }]
        });

        let response: ChatResponse = self.post("chat/completions", body).await?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Retryable("empty chat completion".to_string()))?;
        parse_vision_output(&content)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn embed(&self, text: &str) -> Result<Vector, ProviderError> {
        let body = json!({ "model": self.model, "input": text });
        let response: EmbeddingResponse = self.post("embeddings", body).await?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::Retryable("embedding response had no data".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_foreign_config() {
        let config = ProviderConfig::Gemini {
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: "k".to_string(),
            model: "gemini-1.5-flash".to_string(),
        };
        assert!(matches!(
            OpenAiCompatibleProvider::new(&config),
            Err(ProviderError::Fatal(_))
        ));
    }

    #[test]
    fn test_endpoint_paths() {
        let provider = OpenAiCompatibleProvider::new(&ProviderConfig::OpenaiCompatible {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: Some(String::new()),
            model: "gpt-4o-mini".to_string(),
        })
        .unwrap();
        assert!(provider.api_key.is_none());
        assert_eq!(
            provider.endpoint("chat/completions").unwrap().as_str(),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_retryable() {
        let provider = OpenAiCompatibleProvider::new(&ProviderConfig::OpenaiCompatible {
            base_url: "http://127.0.0.1:9/v1".to_string(),
            api_key: None,
            model: "m".to_string(),
        })
        .unwrap();
        let err = provider.embed("hello").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
