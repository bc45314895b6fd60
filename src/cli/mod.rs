use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Inference Provider Args ---
    /// API key for the Gemini API. Without it the server starts, but every analysis fails.
    #[arg(long, env = "GEMINI_API_KEY", default_value = "", hide_env_values = true)]
    pub chat_api_key: String,

    /// Base URL for the Gemini API (defaults to https://generativelanguage.googleapis.com)
    #[arg(long, env = "CHAT_BASE_URL")]
    pub chat_base_url: Option<String>,

    /// Model used for every tool instead of the per-tool model (e.g., gemini-2.0-flash)
    #[arg(long, env = "CHAT_MODEL")]
    pub chat_model: Option<String>,

    /// Timeout in seconds for a single call to the model. Unset means wait indefinitely.
    #[arg(long, env = "CHAT_TIMEOUT_SECS")]
    pub chat_timeout_secs: Option<u64>,

    // --- Tool Args ---
    /// JSON file overriding built-in tool definitions (same layout as json/tools.json)
    #[arg(long, env = "TOOLS_PATH")]
    pub tools_path: Option<String>,

    /// Largest accepted upload in bytes.
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value = "20971520")]
    pub max_upload_bytes: usize,

    /// Requests per second allowed into the model-backed endpoints, across all users.
    #[arg(long, env = "ANALYZE_RATE_LIMIT", default_value = "10")]
    pub analyze_rate_limit: u32,

    // --- Session Args ---
    /// Secret used to sign session tokens. A random one is generated when unset.
    #[arg(long, env = "SESSION_SECRET", hide_env_values = true)]
    pub session_secret: Option<String>,

    /// Lifetime of a session token in seconds.
    #[arg(long, env = "SESSION_TTL_SECS", default_value = "86400")]
    pub session_ttl_secs: u64,

    /// Mark the session cookie as Secure (HTTPS only).
    #[arg(long, env = "SESSION_COOKIE_SECURE", default_value = "false")]
    pub session_cookie_secure: bool,

    /// Firebase Web API key used to verify sign-in ID tokens.
    #[arg(long, env = "FIREBASE_API_KEY", hide_env_values = true)]
    pub firebase_api_key: Option<String>,

    /// Base URL of the identity toolkit API (defaults to https://identitytoolkit.googleapis.com)
    #[arg(long, env = "IDENTITY_BASE_URL")]
    pub identity_base_url: Option<String>,

    // --- General App Args ---
    /// Host address and port for the server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,

    /// Optional path to the TLS certificate file (PEM format) for enabling HTTPS. Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format) for enabling HTTPS. Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let args = Args::try_parse_from(["ukoro"]).unwrap();
        assert_eq!(args.server_addr, "127.0.0.1:4000");
        assert_eq!(args.max_upload_bytes, 20 * 1024 * 1024);
        assert_eq!(args.session_ttl_secs, 86400);
        assert!(args.chat_timeout_secs.is_none());
        assert!(!args.enable_tls);
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "ukoro",
            "--chat-model",
            "gemini-2.0-flash",
            "--chat-timeout-secs",
            "30",
            "--enable-tls",
        ]).unwrap();
        assert_eq!(args.chat_model.as_deref(), Some("gemini-2.0-flash"));
        assert_eq!(args.chat_timeout_secs, Some(30));
        assert!(args.enable_tls);
    }
}
