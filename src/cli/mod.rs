use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Generation Provider Args ---
    /// Type of LLM provider for chat completion (openai, groq, xai, deepseek, ollama)
    #[arg(long, env = "CHAT_LLM_TYPE", default_value = "openai")]
    pub chat_llm_type: String,

    /// Base URL for the provider API (e.g., https://api.openai.com/v1)
    #[arg(long, env = "CHAT_BASE_URL")] // No default, let adapters handle defaults if None
    pub chat_base_url: Option<String>,

    /// API Key for the generation provider
    #[arg(long, env = "OPENAI_API_KEY", default_value = "")]
    pub chat_api_key: String,

    /// Model used when a completion request does not name one
    #[arg(long, env = "DEFAULT_MODEL", default_value = "gpt-4-turbo")]
    pub default_model: String,

    /// System instruction used when a completion request does not carry one
    #[arg(long, env = "SYSTEM_MESSAGE", default_value = "You are a helpful assistant.")]
    pub system_message: String,

    /// Upper bound on generated tokens per completion
    #[arg(long, env = "MAX_TOKENS", default_value = "150")]
    pub max_tokens: u32,

    /// Maximum wall-clock seconds for a whole completion exchange
    #[arg(long, env = "MAX_DURATION_SECS", default_value = "30")]
    pub max_duration_secs: u64,

    // --- History Store Args ---
    /// History chat store type (memory, redis, supabase)
    #[arg(long, env = "HISTORY_TYPE", default_value = "memory")]
    pub history_type: String,

    /// Redis endpoint for the redis history store (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "HISTORY_HOST", default_value = "redis://127.0.0.1:6379")]
    pub history_host: String,

    /// Prefix for Redis history keys.
    #[arg(long, env = "HISTORY_REDIS_PREFIX", default_value = "chat-relay:")]
    pub history_redis_prefix: String,

    /// Project URL of the Supabase backend (e.g., https://xyz.supabase.co)
    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: Option<String>,

    /// Anonymous key of the Supabase backend
    #[arg(long, env = "SUPABASE_ANON_KEY")]
    pub supabase_anon_key: Option<String>,

    // --- Server Args ---
    /// Host address and port for the HTTP server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:3000")]
    pub server_addr: String,

    /// Optional path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}

/// Options of the terminal chat front end.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Terminal front end for the completion relay", long_about = None)]
pub struct ClientArgs {
    /// Base URL of a running relay server
    #[arg(long, env = "RELAY_URL", default_value = "http://127.0.0.1:3000")]
    pub relay_url: String,

    /// Model selected at startup
    #[arg(long, env = "DEFAULT_MODEL", default_value = "gpt-4-turbo")]
    pub model: String,

    /// System instruction attached to every request
    #[arg(long, env = "SYSTEM_MESSAGE", default_value = "You are a helpful assistant.")]
    pub system_message: String,

    /// Save every exchange to a new chat on the relay's history store
    #[arg(long, default_value = "false")]
    pub persist: bool,

    /// Resume an existing persisted chat (implies --persist)
    #[arg(long)]
    pub chat_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::CommandFactory;

    /// Declared default of a server flag, unaffected by the process environment.
    fn declared_default(id: &str) -> String {
        let command = Args::command();
        let arg = command
            .get_arguments()
            .find(|a| a.get_id() == id)
            .unwrap_or_else(|| panic!("no argument {}", id));
        arg.get_default_values()[0].to_string_lossy().into_owned()
    }

    #[test]
    fn server_defaults_match_relay_contract() {
        assert_eq!(declared_default("default_model"), "gpt-4-turbo");
        assert_eq!(declared_default("system_message"), "You are a helpful assistant.");
        assert_eq!(declared_default("max_tokens"), "150");
        assert_eq!(declared_default("max_duration_secs"), "30");
        assert_eq!(declared_default("history_type"), "memory");
    }

    #[test]
    fn explicit_flags_override_defaults() {
        let args = Args::parse_from(["chat-relay", "--max-tokens", "64", "--default-model", "gpt-4o"]);
        assert_eq!(args.max_tokens, 64);
        assert_eq!(args.default_model, "gpt-4o");
    }

    #[test]
    fn client_flags_parse() {
        let args = ClientArgs::parse_from(["chat-client", "--model", "gpt-4o", "--chat-id", "abc"]);
        assert_eq!(args.model, "gpt-4o");
        assert_eq!(args.chat_id.as_deref(), Some("abc"));
        assert!(!args.persist);
    }
}
