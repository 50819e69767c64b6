use clap::Parser;
use std::time::Duration;

use crate::error::ChatError;
use crate::llm::{ ModelConfig, DEFAULT_CONTEXT_LENGTH, DEFAULT_MODEL, DEFAULT_OLLAMA_HOST, DEFAULT_TEMPERATURE };
use crate::session::{ SessionOptions, DEFAULT_SYSTEM_PROMPT };

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Model Server Args ---
    /// Base URL of the Ollama server
    #[arg(long, env = "OLLAMA_HOST", default_value = DEFAULT_OLLAMA_HOST)]
    pub ollama_host: String,

    /// Model used by new sessions (e.g., deepseek-r1:14b, llama3)
    #[arg(long, env = "DEFAULT_MODEL", default_value = DEFAULT_MODEL)]
    pub default_model: String,

    /// Initial sampling temperature for new sessions (0.0 to 1.0).
    #[arg(long, env = "DEFAULT_TEMPERATURE", default_value_t = DEFAULT_TEMPERATURE)]
    pub default_temperature: f64,

    /// Initial context window (num_ctx) for new sessions.
    #[arg(long, env = "DEFAULT_CONTEXT_LENGTH", default_value_t = DEFAULT_CONTEXT_LENGTH as i64)]
    pub default_context_length: i64,

    /// System prompt placed before the conversation. An empty value sends none.
    #[arg(long, env = "SYSTEM_PROMPT", default_value = DEFAULT_SYSTEM_PROMPT)]
    pub system_prompt: String,

    /// Number of past turns sent with each request. Unset sends the full history.
    #[arg(long, env = "HISTORY_TURNS")]
    pub history_turns: Option<usize>,

    /// Seconds to wait for a complete reply before giving up. 0 disables the limit.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "0")]
    pub request_timeout_secs: u64,

    // --- Server Args ---
    /// Host address and port for the HTTP server that serves the chat page.
    #[arg(long, env = "HTTP_ADDR", default_value = "127.0.0.1:8501")]
    pub http_addr: String,

    /// Host address and port for the WebSocket server carrying chat sessions.
    #[arg(long, env = "WS_ADDR", default_value = "127.0.0.1:8502")]
    pub ws_addr: String,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}

impl Args {
    /// Settings every new session starts from.
    pub fn model_config(&self) -> Result<ModelConfig, ChatError> {
        ModelConfig::new(
            self.default_model.clone(),
            self.default_temperature,
            self.default_context_length
        )
    }

    pub fn session_options(&self) -> SessionOptions {
        let system_prompt = Some(self.system_prompt.trim().to_string()).filter(|p| !p.is_empty());
        SessionOptions {
            system_prompt,
            history_turns: self.history_turns,
            request_timeout: match self.request_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}
