use crate::log_line::FilterLevel;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";
pub const DEFAULT_LOG_FILE: &str = "access.log";
pub const API_URL_ENV: &str = "NEXT_PUBLIC_API_URL";
pub const AUTH_TOKEN_ENV: &str = "MAKETICKET_AUTH_TOKEN";

#[derive(Parser, Debug)]
#[clap(name = "maketicket-logconsole", version, about)]
pub struct Cli {
    /// Path to configuration file
    #[clap(long, default_value = "./logconsole.toml")]
    pub config: PathBuf,

    /// Override backend API URL
    #[clap(long)]
    pub api_url: Option<String>,

    /// Override admin auth token
    #[clap(long)]
    pub token: Option<String>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch historical log lines
    Fetch(FetchArgs),

    /// Stream new log lines as the server produces them
    Tail {
        #[clap(long, value_enum, default_value_t = FilterLevel::All)]
        filter: FilterLevel,
    },

    /// List the server's log files
    Files,

    /// Empty a log file on the server
    Clear {
        #[clap(long)]
        file: Option<String>,

        /// Skip the confirmation prompt
        #[clap(long)]
        yes: bool,
    },

    /// Save a log file locally
    Download {
        #[clap(long)]
        file: Option<String>,

        #[clap(long)]
        output: Option<PathBuf>,
    },

    /// Inspect or change the log backup integration
    Backup {
        #[clap(subcommand)]
        action: BackupAction,
    },
}

#[derive(clap::Args, Debug)]
pub struct FetchArgs {
    #[clap(long)]
    pub file: Option<String>,

    /// Number of lines to request (at most 200)
    #[clap(long, default_value_t = crate::log_fetcher::MAX_LINES)]
    pub lines: usize,

    #[clap(long)]
    pub search: Option<String>,

    #[clap(long)]
    pub user_id: Option<String>,

    #[clap(long)]
    pub ip: Option<String>,

    #[clap(long, value_enum, default_value_t = FilterLevel::All)]
    pub filter: FilterLevel,
}

#[derive(Subcommand, Debug)]
pub enum BackupAction {
    Status,
    Connect,
    Disconnect {
        #[clap(long)]
        yes: bool,
    },
    Now,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_url: String,
    pub auth_token: Option<String>,
    pub default_file: String,
    pub connect_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            auth_token: None,
            default_file: DEFAULT_LOG_FILE.to_string(),
            connect_timeout_secs: 10,
        }
    }
}

/// Environment values that take part in configuration.
#[derive(Debug, Default)]
pub struct EnvOverrides {
    pub api_url: Option<String>,
    pub auth_token: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let read = |key: &str| {
            std::env::var(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            api_url: read(API_URL_ENV),
            auth_token: read(AUTH_TOKEN_ENV),
        }
    }
}

pub fn load_config(cli: &Cli) -> Result<Config> {
    let config = read_config_file(&cli.config)?;
    Ok(apply_overrides(config, cli, EnvOverrides::from_env()))
}

/// Parses the TOML file at `path`; a missing file means defaults.
pub fn read_config_file(path: &Path) -> Result<Config> {
    match fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).context("Failed to parse config file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::debug!("No config file at {:?}, using defaults", path);
            Ok(Config::default())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to read config file: {:?}", path)),
    }
}

/// CLI flags beat the environment, which beats the file.
pub fn apply_overrides(mut config: Config, cli: &Cli, env: EnvOverrides) -> Config {
    if let Some(api_url) = env.api_url {
        config.api_url = api_url;
    }

    if let Some(token) = env.auth_token {
        config.auth_token = Some(token);
    }

    if let Some(ref api_url) = cli.api_url {
        config.api_url = api_url.clone();
    }

    if let Some(ref token) = cli.token {
        config.auth_token = Some(token.clone());
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["maketicket-logconsole"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = read_config_file(&path).unwrap();

        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.default_file, DEFAULT_LOG_FILE);
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn file_values_are_parsed_and_partially_defaulted() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "api_url = \"https://api.maketicket.app/api\"").unwrap();
        writeln!(file, "auth_token = \"file-token\"").unwrap();

        let config = read_config_file(file.path()).unwrap();

        assert_eq!(config.api_url, "https://api.maketicket.app/api");
        assert_eq!(config.default_file, DEFAULT_LOG_FILE);
        assert_eq!(config.connect_timeout_secs, 10);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "api_url = [").unwrap();

        assert!(read_config_file(file.path()).is_err());
    }

    #[test]
    fn cli_beats_env_beats_file() {
        let file_config = Config {
            api_url: "http://file/api".into(),
            auth_token: Some("file-token".into()),
            ..Config::default()
        };
        let env = EnvOverrides {
            api_url: Some("http://env/api".into()),
            auth_token: Some("env-token".into()),
        };

        let from_env = apply_overrides(file_config.clone(), &cli(&["files"]), env);
        assert_eq!(from_env.api_url, "http://env/api");
        assert_eq!(from_env.auth_token.as_deref(), Some("env-token"));

        let env = EnvOverrides {
            api_url: Some("http://env/api".into()),
            auth_token: None,
        };
        let from_cli = apply_overrides(
            file_config,
            &cli(&["--api-url", "http://cli/api", "--token", "cli-token", "files"]),
            env,
        );
        assert_eq!(from_cli.api_url, "http://cli/api");
        assert_eq!(from_cli.auth_token.as_deref(), Some("cli-token"));
    }

    #[test]
    fn fetch_arguments_parse() {
        let cli = cli(&["fetch", "--file", "error.log", "--lines", "50", "--filter", "errors"]);
        match cli.command {
            Command::Fetch(args) => {
                assert_eq!(args.file.as_deref(), Some("error.log"));
                assert_eq!(args.lines, 50);
                assert_eq!(args.filter, FilterLevel::Errors);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
