use serde::Deserialize;
use std::fs;
use std::path::Path;
use log::info;

use super::ConfigError;

pub const DEFAULT_NAME: &str = "Client Communication Coach";

pub const DEFAULT_INSTRUCTIONS: &str = "\
You are a professional freelancer mentor and communication expert.

Your task is to help users respond to difficult clients with calm, professional, and polite language.
You should never be rude or defensive. Maintain empathy, confidence, and clarity in your tone.

If the user gives you a rough, emotional, or unclear message, rewrite it into a well-worded, professional reply that they can send to a client.
";

pub const DEFAULT_GREETING: &str = "👋 Hello! I'm your Client Communication Coach. Paste the rough message you'd like to send to a client, and I’ll rewrite it professionally.";

/// Fixed instructions sent ahead of every transcript, plus the text shown
/// when a session starts.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Persona {
    #[serde(default = "default_name")]
    pub name: String,
    pub instructions: String,
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_greeting() -> String {
    DEFAULT_GREETING.to_string()
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            name: default_name(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            greeting: default_greeting(),
        }
    }
}

pub fn load_persona<P: AsRef<Path>>(path: P) -> Result<Persona, ConfigError> {
    let path = path.as_ref();
    let display = path.display().to_string();
    let file_content = fs::read_to_string(path).map_err(|source| ConfigError::PersonaIo {
        path: display.clone(),
        source,
    })?;
    let persona: Persona = serde_json::from_str(&file_content).map_err(|source| ConfigError::PersonaJson {
        path: display.clone(),
        source,
    })?;
    if persona.instructions.trim().is_empty() {
        return Err(ConfigError::EmptyInstructions(display));
    }
    info!("Loaded persona '{}' from {}", persona.name, display);
    Ok(persona)
}
