pub mod chat;
use serde::{ Deserialize, Serialize };
use std::str::FromStr;
use std::fmt;

/// Chat-completion providers reachable through an OpenAI-compatible endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmType {
    Gemini,
    OpenAI,
    Groq,
    DeepSeek,
    XAI,
    Ollama,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseLlmTypeError {
    message: String,
}

impl fmt::Display for ParseLlmTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseLlmTypeError {}
impl FromStr for LlmType {
    type Err = ParseLlmTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(LlmType::Gemini),
            "openai" => Ok(LlmType::OpenAI),
            "groq" => Ok(LlmType::Groq),
            "deepseek" => Ok(LlmType::DeepSeek),
            "xai" => Ok(LlmType::XAI),
            "ollama" => Ok(LlmType::Ollama),
            _ =>
                Err(ParseLlmTypeError {
                    message: format!("Invalid LLM type: '{}'", s),
                }),
        }
    }
}

impl fmt::Display for LlmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LlmType::Gemini => "gemini",
            LlmType::OpenAI => "openai",
            LlmType::Groq => "groq",
            LlmType::DeepSeek => "deepseek",
            LlmType::XAI => "xai",
            LlmType::Ollama => "ollama",
        };
        f.write_str(name)
    }
}

impl LlmType {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmType::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai/",
            LlmType::OpenAI => "https://api.openai.com/v1",
            LlmType::Groq => "https://api.groq.com/openai/v1",
            LlmType::DeepSeek => "https://api.deepseek.com/v1",
            LlmType::XAI => "https://api.x.ai/v1",
            LlmType::Ollama => "http://localhost:11434/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmType::Gemini => "gemini-2.0-flash",
            LlmType::OpenAI => "gpt-4o",
            LlmType::Groq => "llama-3.1-8b-instant",
            LlmType::DeepSeek => "deepseek-chat",
            LlmType::XAI => "grok-3-latest",
            LlmType::Ollama => "cogito:3b",
        }
    }

    /// Conventional environment variable holding this provider's key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            LlmType::Gemini => "GEMINI_API_KEY",
            LlmType::OpenAI => "OPENAI_API_KEY",
            LlmType::Groq => "GROQ_API_KEY",
            LlmType::DeepSeek => "DEEPSEEK_API_KEY",
            LlmType::XAI => "XAI_API_KEY",
            LlmType::Ollama => "OLLAMA_API_KEY",
        }
    }

    pub fn requires_api_key(&self) -> bool {
        !matches!(self, LlmType::Ollama)
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub llm_type: LlmType,
    pub api_key: Option<String>,
    pub completion_model: Option<String>,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            llm_type: LlmType::Gemini,
            api_key: None,
            completion_model: None,
            base_url: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

impl LlmConfig {
    pub fn model(&self) -> &str {
        self.completion_model.as_deref().unwrap_or(self.llm_type.default_model())
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(self.llm_type.default_base_url())
    }
}
