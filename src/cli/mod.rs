use clap::Parser;

#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Chat LLM Provider Args ---
    /// Chat completion provider (gemini, openai, groq, deepseek, xai, ollama)
    #[arg(long, env = "CHAT_LLM_TYPE", default_value = "gemini")]
    pub chat_llm_type: String,

    /// Base URL of the provider's OpenAI-compatible API. Defaults per provider.
    #[arg(long, env = "CHAT_BASE_URL")]
    pub chat_base_url: Option<String>,

    /// API key for the chat provider. Falls back to the provider's own variable (e.g. GEMINI_API_KEY).
    #[arg(long, env = "CHAT_API_KEY", default_value = "")]
    pub chat_api_key: String,

    /// Model name for chat completion (e.g. gemini-2.0-flash, gpt-4o)
    #[arg(long, env = "CHAT_MODEL")]
    pub chat_model: Option<String>,

    /// Sampling temperature sent with each request. Provider default if unset.
    #[arg(long, env = "CHAT_TEMPERATURE")]
    pub chat_temperature: Option<f32>,

    /// Upper bound on generated tokens per response. Provider default if unset.
    #[arg(long, env = "CHAT_MAX_TOKENS")]
    pub chat_max_tokens: Option<u32>,

    // --- Persona Args ---
    /// Path to a persona JSON file ({ "name", "instructions", "greeting" }). Built-in coach if unset.
    #[arg(long, env = "PERSONA_PATH")]
    pub persona_path: Option<String>,

    // --- General App Args ---
    /// Chat in the terminal instead of starting the WebSocket server.
    #[arg(short = 'i', long, env = "INTERACTIVE", default_value = "false")]
    pub interactive: bool,

    /// Host address and port for the server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Optional API Key required for clients to connect to the WebSocket server. If set, clients must provide this key.
    #[arg(long, env = "SERVER_API_KEY")]
    pub server_api_key: Option<String>,

    /// Optional path to the TLS certificate file (PEM format) for enabling WSS. Requires --tls-key.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format) for enabling WSS. Requires --tls-cert.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}
