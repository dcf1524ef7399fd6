//! Server configuration
//!
//! Parsed from CLI flags with environment-variable fallbacks.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Multi-room chat server with token-based reconnection
#[derive(Debug, Clone, Parser)]
#[command(name = "xchat-server", version, about)]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "XCHAT_ADDR", default_value = "127.0.0.1:8080")]
    pub addr: String,

    /// Directory holding the credential and token files
    #[arg(long, env = "XCHAT_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Session token time-to-live, seconds
    #[arg(long, env = "XCHAT_TOKEN_TTL", default_value_t = 3600)]
    pub token_ttl_secs: u64,

    /// Interval between token cleanup sweeps, seconds
    #[arg(long, default_value_t = 300)]
    pub cleanup_interval_secs: u64,

    /// Cadence of per-session view pushes, seconds
    #[arg(long, default_value_t = 2)]
    pub push_interval_secs: u64,

    /// AI completion endpoint
    #[arg(long, env = "XCHAT_AI_URL", default_value = "http://localhost:11434/api/generate")]
    pub ai_url: String,

    /// Model name passed to the AI endpoint
    #[arg(long, env = "XCHAT_AI_MODEL", default_value = "llama3")]
    pub ai_model: String,

    /// How long a room waits on the AI backend, seconds
    #[arg(long, default_value_t = 5)]
    pub ai_timeout_secs: u64,

    /// How long shutdown waits for sessions to drain, seconds
    #[arg(long, default_value_t = 30)]
    pub drain_timeout_secs: u64,
}

impl Config {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn push_interval(&self) -> Duration {
        Duration::from_secs(self.push_interval_secs)
    }

    pub fn ai_timeout(&self) -> Duration {
        Duration::from_secs(self.ai_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join("credentials.jsonl")
    }

    pub fn tokens_path(&self) -> PathBuf {
        self.data_dir.join("tokens.jsonl")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse_from(["xchat-server"]);
        assert_eq!(config.addr, "127.0.0.1:8080");
        assert_eq!(config.token_ttl(), Duration::from_secs(3600));
        assert_eq!(config.push_interval(), Duration::from_secs(2));
        assert!(config.credentials_path().ends_with("credentials.jsonl"));
    }

    #[test]
    fn test_overrides() {
        let config = Config::parse_from([
            "xchat-server",
            "--addr",
            "0.0.0.0:9999",
            "--token-ttl-secs",
            "60",
        ]);
        assert_eq!(config.addr, "0.0.0.0:9999");
        assert_eq!(config.token_ttl(), Duration::from_secs(60));
    }
}
