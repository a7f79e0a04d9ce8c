use crate::config::LlmConfig;
use crate::services::conversation::manager::{LlmProvider, RetrievalChunk};
use crate::utils::error::ApiError;
use anyhow::{anyhow, Result};
use futures::stream::Stream;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tracing::debug;

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: usize,
    pub temperature: f32,
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub delta: Delta,
}

#[derive(Debug, Deserialize)]
pub struct Delta {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<MessageChoice>,
}

#[derive(Debug, Deserialize)]
struct MessageChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Clone)]
pub struct LlmService {
    client: Client,
    config: LlmConfig,
}

impl LlmService {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(config.timeout_seconds))
                .build()
                .expect("Failed to create HTTP client"),
            config,
        }
    }
    
    /// Generate completion dengan streaming
    pub async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<String, ApiError>> + Send>>, ApiError> {
        debug!("Starting chat stream with {} messages", messages.len());
        
        let request = ChatCompletionRequest {
            messages,
            max_tokens: self.config.max_tokens,
            temperature: 0.7,
            stream: true,
        };
        
        let response = self
            .client
            .post(&format!("{}/v1/chat/completions", self.config.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::LlmError(format!("Failed to call LLM API: {}", e)))?;
        
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::LlmError(format!(
                "LLM API error: {} - {}",
                status, body
            )));
        }
        
        // Convert response stream to text stream
        let stream = response.bytes_stream();
        
        // Parse SSE stream
        let parsed_stream = futures::stream::unfold(stream, |mut stream| async move {
            use futures::StreamExt;
            
            match stream.next().await {
                Some(Ok(bytes)) => {
                    // Parse SSE format: "data: {...}\n\n"
                    let text = String::from_utf8_lossy(&bytes);
                    
                    for line in text.lines() {
                        if line.starts_with("data: ") {
                            let json_str = line.strip_prefix("data: ").unwrap_or("");
                            
                            if json_str == "[DONE]" {
                                return None;
                            }
                            
                            if let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(json_str) {
                                if let Some(content) = chunk.choices.first()
                                    .and_then(|c| c.delta.content.as_ref())
                                {
                                    return Some((Ok(content.clone()), stream));
                                }
                            }
                        }
                    }
                    
                    Some((Ok(String::new()), stream))
                }
                Some(Err(e)) => {
                    Some((Err(ApiError::LlmError(format!("Stream error: {}", e))), stream))
                }
                None => None,
            }
        });
        
        Ok(Box::pin(parsed_stream))
    }

    /// Non-streaming completion against the same chat endpoint as `chat_stream`.
    async fn complete(&self, messages: Vec<ChatMessage>, max_tokens: usize, temperature: f32) -> Result<String, ApiError> {
        let request = ChatCompletionRequest {
            messages,
            max_tokens,
            temperature,
            stream: false,
        };

        let response = self
            .client
            .post(&format!("{}/v1/chat/completions", self.config.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::LlmError(format!("Failed to call LLM API: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::LlmError(format!("LLM API error: {} - {}", status, body)));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ApiError::LlmError(format!("Failed to parse LLM response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ApiError::LlmError("LLM returned no choices".to_string()))
    }
}

#[async_trait::async_trait]
impl LlmProvider for LlmService {
    async fn generate(&self, messages: &[crate::models::chat::ChatMessage]) -> Result<String> {
        self.generate_with(messages, self.config.max_tokens, 0.7).await
    }

    async fn generate_with(
        &self,
        messages: &[crate::models::chat::ChatMessage],
        max_tokens: usize,
        temperature: f32,
    ) -> Result<String> {
        let mapped: Vec<ChatMessage> = messages
            .iter()
            .map(|m| ChatMessage { role: m.role.clone(), content: m.content.clone() })
            .collect();
        self.complete(mapped, max_tokens, temperature)
            .await
            .map_err(|e| anyhow!(e))
    }

    async fn generate_stream(
        &self,
        messages: &[crate::models::chat::ChatMessage],
    ) -> Result<Pin<Box<dyn Stream<Item = Result<String, anyhow::Error>> + Send>>> {
        let mapped: Vec<ChatMessage> = messages
            .iter()
            .map(|m| ChatMessage { role: m.role.clone(), content: m.content.clone() })
            .collect();
        let stream = self.chat_stream(mapped).await.map_err(|e| anyhow!(e))?;
        Ok(Box::pin(stream.map(|item| item.map_err(|e| anyhow!(e)))))
    }

    async fn summarize_chunks(&self, chunks: &[RetrievalChunk], query: &str) -> Result<String> {
        let mut listing = String::new();
        for c in chunks {
            listing.push_str(&format!(
                "[doc_{}, chunk_{}] {}\n\n",
                c.document_id, c.chunk_id, c.content.trim()
            ));
        }

        let system = crate::models::chat::ChatMessage::system(format!(
            "Ringkas informasi berikut menjadi jawaban singkat dan relevan untuk pertanyaan: \"{}\".\n\
            Pertahankan angka, tanggal, dan nama spesifik. Jangan mengarang informasi yang tidak ada.",
            query
        ));
        let user = crate::models::chat::ChatMessage::user(listing);

        self.generate_with(&[system, user], 1024, 0.3).await
    }

    /// §4.10: titles a conversation from its first exchange with a short,
    /// cheap call (low max_tokens stands in for "a cheaper model" since the
    /// provider here is a single fixed endpoint) and hard-truncates to 50
    /// chars regardless of what the model returns.
    async fn generate_title(&self, first_user_message: &str, first_assistant_message: &str) -> Result<String> {
        let system = crate::models::chat::ChatMessage::system(
            "Beri judul singkat (maksimal 6 kata, tanpa tanda kutip) untuk percakapan berikut. \
             Balas hanya dengan judulnya, tanpa penjelasan tambahan.",
        );
        let user = crate::models::chat::ChatMessage::user(format!(
            "User: {}\nAssistant: {}",
            first_user_message.chars().take(500).collect::<String>(),
            first_assistant_message.chars().take(500).collect::<String>(),
        ));

        let raw = self.generate_with(&[system, user], 32, 0.3).await?;
        let cleaned = raw.trim().trim_matches('"').trim();
        let truncated: String = cleaned.chars().take(50).collect();
        if truncated.is_empty() {
            anyhow::bail!("empty title generated");
        }
        Ok(truncated)
    }
}
