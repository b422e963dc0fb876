pub mod persona;

use crate::cli::Args;
use crate::llm::{ LlmConfig, LlmType, ParseLlmTypeError };
use log::info;
use thiserror::Error;

pub use persona::{ load_persona, Persona };

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is not set. Please ensure it is defined in your .env file.")]
    MissingCredential {
        var: String,
    },
    #[error(transparent)]
    InvalidProvider(#[from] ParseLlmTypeError),
    #[error("Failed to read persona file '{path}': {source}")]
    PersonaIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse persona file '{path}': {source}")]
    PersonaJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Persona file '{0}' has empty instructions")]
    EmptyInstructions(String),
}

/// Process-wide configuration, resolved once at startup and read-only after.
#[derive(Debug, Clone)]
pub struct Settings {
    pub persona: Persona,
    pub llm: LlmConfig,
}

impl Settings {
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        Self::resolve(args, |var| std::env::var(var).ok())
    }

    /// Resolves settings with `lookup` standing in for the process environment.
    pub fn resolve<F>(args: &Args, lookup: F) -> Result<Self, ConfigError>
        where F: Fn(&str) -> Option<String>
    {
        let llm_type: LlmType = args.chat_llm_type.parse()?;

        let api_key = Some(args.chat_api_key.clone())
            .filter(|k| !k.trim().is_empty())
            .or_else(|| lookup(llm_type.api_key_env()).filter(|k| !k.trim().is_empty()));
        if llm_type.requires_api_key() && api_key.is_none() {
            return Err(ConfigError::MissingCredential {
                var: llm_type.api_key_env().to_string(),
            });
        }

        let persona = match &args.persona_path {
            Some(path) if !path.trim().is_empty() => load_persona(path)?,
            _ => {
                info!("No persona file configured, using built-in '{}'", persona::DEFAULT_NAME);
                Persona::default()
            }
        };

        let llm = LlmConfig {
            llm_type,
            api_key,
            completion_model: args.chat_model.clone().filter(|m| !m.trim().is_empty()),
            base_url: args.chat_base_url.clone().filter(|u| !u.trim().is_empty()),
            temperature: args.chat_temperature,
            max_tokens: args.chat_max_tokens,
        };

        Ok(Self { persona, llm })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gemini_args() -> Args {
        Args {
            chat_llm_type: "gemini".to_string(),
            server_addr: "127.0.0.1:0".to_string(),
            ..Args::default()
        }
    }

    #[test]
    fn missing_credential_is_fatal_and_descriptive() {
        let err = Settings::resolve(&gemini_args(), |_| None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential { .. }));
        assert_eq!(
            err.to_string(),
            "GEMINI_API_KEY is not set. Please ensure it is defined in your .env file."
        );
    }

    #[test]
    fn blank_credential_counts_as_missing() {
        let err = Settings::resolve(&gemini_args(), |_| Some("   ".to_string())).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential { var } if var == "GEMINI_API_KEY"));
    }

    #[test]
    fn provider_variable_supplies_the_key() {
        let settings = Settings::resolve(&gemini_args(), |var| {
            (var == "GEMINI_API_KEY").then(|| "from-env".to_string())
        }).unwrap();
        assert_eq!(settings.llm.api_key.as_deref(), Some("from-env"));
        assert_eq!(settings.llm.model(), "gemini-2.0-flash");
        assert_eq!(settings.persona, Persona::default());
    }

    #[test]
    fn explicit_key_wins_over_environment() {
        let args = Args { chat_api_key: "from-flag".to_string(), ..gemini_args() };
        let settings = Settings::resolve(&args, |_| Some("from-env".to_string())).unwrap();
        assert_eq!(settings.llm.api_key.as_deref(), Some("from-flag"));
    }

    #[test]
    fn ollama_starts_without_credential() {
        let args = Args { chat_llm_type: "ollama".to_string(), ..gemini_args() };
        let settings = Settings::resolve(&args, |_| None).unwrap();
        assert_eq!(settings.llm.llm_type, LlmType::Ollama);
        assert!(settings.llm.api_key.is_none());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let args = Args { chat_llm_type: "palm".to_string(), ..gemini_args() };
        let err = Settings::resolve(&args, |_| Some("key".to_string())).unwrap_err();
        assert_eq!(err.to_string(), "Invalid LLM type: 'palm'");
    }
}
