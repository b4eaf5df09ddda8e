/// Configuration for the gateway binary.
use anyhow::anyhow;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// The port on which the gateway will listen.
    #[arg(short = 'p', long, default_value_t = 3000)]
    pub port: u16,

    /// The model manifest file (models, adapters, static endpoints).
    #[arg(short = 'f', long)]
    pub manifest: PathBuf,

    /// Whether we should continue watching the manifest file for changes.
    #[arg(short = 'w', long, default_value_t = true)]
    pub watch: bool,

    /// Additional forwarding attempts after the first.
    #[arg(long, default_value_t = 3)]
    pub max_retries: usize,

    /// Backend status codes that trigger a retry.
    #[arg(long, value_delimiter = ',', default_values_t = [500, 502, 503, 504])]
    pub retry_codes: Vec<u16>,

    /// Seconds a request may wait for a backend endpoint to appear.
    #[arg(long, default_value_t = 30)]
    pub host_wait_secs: u64,

    /// Pub/sub subscription URL for asynchronous requests (mem:// scheme).
    #[arg(long)]
    pub requests_url: Option<String>,

    /// Pub/sub topic URL for asynchronous responses (mem:// scheme).
    #[arg(long)]
    pub responses_url: Option<String>,

    /// Maximum number of concurrent message handlers.
    #[arg(long, default_value_t = 16)]
    pub max_handlers: usize,

    /// Cap in seconds on the consecutive-error backoff between messages.
    #[arg(long, default_value_t = 30)]
    pub error_max_backoff_secs: u64,
}

impl Config {
    pub fn validate(self) -> Result<Self, anyhow::Error> {
        if !self.manifest.exists() {
            return Err(anyhow!(
                "manifest file '{}' does not exist",
                self.manifest.display()
            ));
        }
        if self.requests_url.is_some() != self.responses_url.is_some() {
            return Err(anyhow!(
                "--requests-url and --responses-url must be given together"
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_retry_contract() {
        let config = Config::parse_from(["switchboard", "-f", "manifest.json"]);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_codes, vec![500, 502, 503, 504]);
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn retry_codes_accept_a_custom_list() {
        let config = Config::parse_from([
            "switchboard",
            "-f",
            "manifest.json",
            "--retry-codes",
            "502,429",
        ]);
        assert_eq!(config.retry_codes, vec![502, 429]);
    }

    #[test]
    fn messenger_urls_must_come_in_pairs() {
        let config = Config::parse_from([
            "switchboard",
            "-f",
            "/dev/null",
            "--requests-url",
            "mem://requests",
        ]);
        assert!(config.validate().is_err());
    }
}
