// OpenAI chat-completions client: lecture summaries and podcast scripts

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{snippet, truncate_chars};
use crate::config::{LlmConfig, Secret};
use crate::workflow::{PodcastScriptWriter, StageError, Summarizer};

const SCRIPT_INPUT_CHARS: usize = 15_000;

#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: Option<Secret>,
    model: String,
    base_url: String,
    output_language: String,
}

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize, Debug)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize, Debug)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            output_language: config.output_language.clone(),
        }
    }

    pub fn output_language(&self) -> &str {
        &self.output_language
    }

    /// One system + user exchange. Connection faults, 429 and 5xx are retried
    /// briefly here; anything that survives becomes a stage error.
    pub async fn chat(&self, system: &str, user: &str, temperature: f32) -> Result<String, StageError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| StageError::Configuration("OPENAI_API_KEY must be set".to_string()))?;

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature,
        };

        let backoff_config = ExponentialBackoff {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            max_elapsed_time: Some(Duration::from_secs(60)),
            ..Default::default()
        };

        let operation = || async {
            let response = self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(api_key.expose())
                .timeout(Duration::from_secs(300))
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    if e.is_connect() || e.is_timeout() {
                        tracing::warn!("OpenAI connection error (retrying): {}", e);
                        backoff::Error::transient(StageError::Generation(format!("Connection error: {}", e)))
                    } else {
                        backoff::Error::permanent(StageError::Generation(format!("Request error: {}", e)))
                    }
                })?;

            let status = response.status();
            let body = response.text().await.map_err(|e| {
                backoff::Error::permanent(StageError::Generation(format!("Failed to read response: {}", e)))
            })?;

            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                tracing::warn!("OpenAI returned {} (retrying)", status);
                return Err(backoff::Error::transient(StageError::Generation(format!(
                    "API error ({}): {}",
                    status,
                    snippet(&body)
                ))));
            }
            if status == StatusCode::UNAUTHORIZED {
                return Err(backoff::Error::permanent(StageError::Configuration(
                    "OPENAI_API_KEY was rejected".to_string(),
                )));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(StageError::Generation(format!(
                    "API error ({}): {}",
                    status,
                    snippet(&body)
                ))));
            }

            Ok(body)
        };

        let body = retry(backoff_config, operation).await?;
        parse_reply(&body)
    }
}

fn parse_reply(body: &str) -> Result<String, StageError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| StageError::Generation(format!("Invalid completion response: {}", e)))?;

    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|text| text.trim().to_string())
        .unwrap_or_default();

    if content.is_empty() {
        return Err(StageError::Generation("Model returned an empty response".to_string()));
    }
    Ok(content)
}

fn summary_prompt(language: &str) -> String {
    format!(
        "You are an expert teaching assistant. Turn the lecture transcript you receive into an \
         educational summary written in {language}. Start with a one-paragraph overview, then \
         cover every topic in the order it was taught using markdown headings, bullet points for \
         key ideas and definitions, and worked examples when the lecturer gave them. Finish with \
         a short list of review questions. Do not invent content that is not in the transcript."
    )
}

fn podcast_prompt(language: &str) -> String {
    format!(
        "You write scripts for a short educational podcast in {language}. Using the lecture \
         summary you receive, write a warm, conversational narration for a single host that \
         explains the main ideas clearly, in plain paragraphs. Do not use markdown, headings, \
         sound cues or speaker labels; output only the words to be spoken."
    )
}

#[async_trait]
impl Summarizer for OpenAiClient {
    async fn summarize(&self, text: &str) -> Result<String, StageError> {
        tracing::info!("📝 Summarizing transcript ({} chars)", text.chars().count());
        self.chat(&summary_prompt(&self.output_language), text, 0.0).await
    }
}

#[async_trait]
impl PodcastScriptWriter for OpenAiClient {
    async fn write_script(&self, summary: &str) -> Result<String, StageError> {
        tracing::info!("🎙️ Writing podcast script");
        let input = truncate_chars(summary, SCRIPT_INPUT_CHARS);
        self.chat(&podcast_prompt(&self.output_language), input, 0.5).await
    }
}
