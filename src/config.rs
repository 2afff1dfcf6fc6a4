use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Classroom client - command line access to the classroom API
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base URL of the classroom API
    #[arg(short = 'u', long, env = "API_BASE_URL")]
    pub api_base_url: Option<String>,

    /// SQLite file holding the persisted session
    #[arg(short = 'd', long, env = "CLASSROOM_DATA_FILE")]
    pub data_file: Option<String>,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "10")]
    pub connect_timeout: u64,

    /// Refresh the access token this many seconds before it expires
    #[arg(long, env = "TOKEN_REFRESH_THRESHOLD", default_value = "300")]
    pub refresh_threshold: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Log in and keep the session on this device
    Login {
        /// Account email, prompted for when omitted
        #[arg(short, long)]
        email: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show the logged-in user
    Whoami,
    /// List classes and their assessments
    Classes,
    /// Take a timed assessment
    Take {
        /// Assessment id
        assessment: String,

        /// Resume this submission instead of looking it up
        #[arg(long)]
        resume: Option<String>,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    // API
    pub api_base_url: String,

    // Session storage
    pub data_file: PathBuf,

    // Timeouts
    pub token_refresh_threshold: u64,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Logging
    pub log_level: String,

    pub command: Command,
}

impl Config {
    /// Load configuration with priority: CLI > ENV > .env > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(args: CliArgs) -> Result<Self> {
        let api_base_url = args
            .api_base_url
            .filter(|s| !s.trim().is_empty())
            .context("API_BASE_URL is required (use -u or set API_BASE_URL env var)")?;

        let data_file = args
            .data_file
            .map(|s| expand_tilde(&s))
            .or_else(default_data_file)
            .context("Could not locate a data directory, set CLASSROOM_DATA_FILE")?;

        Ok(Config {
            api_base_url: api_base_url.trim().trim_end_matches('/').to_string(),
            data_file,
            token_refresh_threshold: args.refresh_threshold,
            http_connect_timeout: args.connect_timeout,
            http_request_timeout: args.http_timeout,
            log_level: args.log_level,
            command: args.command,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://"))
        {
            anyhow::bail!(
                "API_BASE_URL must start with http:// or https://: {}",
                self.api_base_url
            );
        }

        if self.http_request_timeout == 0 {
            anyhow::bail!("HTTP_REQUEST_TIMEOUT must be greater than zero");
        }

        Ok(())
    }
}

/// `<data dir>/classroom-client/session.sqlite3`
fn default_data_file() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("classroom-client").join("session.sqlite3"))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
