use async_trait::async_trait;
use log::{ debug, info };
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::{ Deserialize, Serialize };

use super::{ http_stream_generate, ChatClient, ChatError, FragmentStream, LineEvent };
use crate::llm::{ LlmConfig, LlmType };
use crate::models::chat::Turn;

/// Client for any provider exposing the OpenAI `chat/completions` API,
/// including Gemini's OpenAI-compatible endpoint.
pub struct OpenAICompatClient {
    http: HttpClient,
    llm_type: LlmType,
    model: String,
    base_url: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct OpenAIMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct OpenAIChatRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIStreamResponse {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
    error: Option<OpenAIErrorBody>,
}

#[derive(Deserialize)]
struct OpenAIStreamChoice {
    #[serde(default)]
    delta: OpenAIDelta,
}

#[derive(Deserialize, Default)]
struct OpenAIDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIErrorBody {
    message: String,
}

/// Parses one Server-Sent Events line of a streamed chat completion.
pub fn parse_stream_line(line: &str) -> Result<LineEvent, ChatError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return Ok(LineEvent::Skip);
    }
    // event:, id: and retry: fields carry nothing we need
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(LineEvent::Skip);
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return Ok(LineEvent::Done);
    }

    let chunk: OpenAIStreamResponse = serde_json
        ::from_str(data)
        .map_err(|e| ChatError::Decode(format!("{} for data: {}", e, data)))?;
    if let Some(error) = chunk.error {
        return Err(ChatError::Provider(error.message));
    }

    let text: String = chunk.choices
        .into_iter()
        .filter_map(|choice| choice.delta.content)
        .collect();
    Ok(LineEvent::Fragment(text))
}

impl OpenAICompatClient {
    pub fn new(
        llm_type: LlmType,
        api_key: Option<String>,
        model: Option<String>,
        base_url: Option<String>,
        temperature: Option<f32>,
        max_tokens: Option<u32>
    ) -> Result<Self, ChatError> {
        let api_key = api_key.filter(|k| !k.trim().is_empty());
        if llm_type.requires_api_key() && api_key.is_none() {
            return Err(ChatError::MissingApiKey(llm_type.to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &api_key {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", key)).map_err(|e|
                ChatError::InvalidHeader(format!("Invalid API key format: {}", e))
            )?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = HttpClient::builder().default_headers(headers).build()?;

        Ok(Self {
            http,
            llm_type,
            model: model.unwrap_or_else(|| llm_type.default_model().to_string()),
            base_url: base_url.unwrap_or_else(|| llm_type.default_base_url().to_string()),
            temperature,
            max_tokens,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, ChatError> {
        Self::new(
            config.llm_type,
            config.api_key.clone(),
            config.completion_model.clone(),
            config.base_url.clone(),
            config.temperature,
            config.max_tokens
        )
    }

    pub fn llm_type(&self) -> LlmType {
        self.llm_type
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn build_request<'a>(
        &'a self,
        instructions: &'a str,
        turns: &'a [Turn],
        stream: bool
    ) -> OpenAIChatRequest<'a> {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        if !instructions.trim().is_empty() {
            messages.push(OpenAIMessage { role: "system", content: instructions });
        }
        messages.extend(
            turns.iter().map(|turn| OpenAIMessage {
                role: turn.role().as_str(),
                content: turn.content(),
            })
        );

        OpenAIChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream,
        }
    }
}

#[async_trait]
impl ChatClient for OpenAICompatClient {
    fn stream_chat(&self, instructions: &str, turns: &[Turn]) -> FragmentStream {
        let url = self.completions_url();
        info!(
            "OpenAICompatClient::stream_chat() → provider={} model={} turns={}",
            self.llm_type,
            self.model,
            turns.len()
        );
        let body = self.build_request(instructions, turns, true);
        // the body is serialized here, so the returned stream owns everything it needs
        let request = self.http.post(&url).json(&body);
        http_stream_generate(request, parse_stream_line)
    }

    async fn complete(&self, instructions: &str, turns: &[Turn]) -> Result<String, ChatError> {
        let url = self.completions_url();
        debug!("OpenAICompatClient::complete() → {}", url);
        let body = self.build_request(instructions, turns, false);

        let resp = self.http.post(&url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ChatError::Status { status: status.as_u16(), body });
        }
        let parsed = resp.json::<OpenAIResponse>().await?;

        parsed.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(ChatError::EmptyResponse)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}
