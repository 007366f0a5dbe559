//! Dispatcher configuration: `DISPATCH_*` environment defaults with an
//! optional TOML file on top.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level dispatcher configuration.
///
/// `Default` reads `DISPATCH_*` environment variables; a TOML file may
/// overlay it via [`DispatchConfig::apply_file`]; CLI flags win over both.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    /// `OWNER/NAME`. `None` lets `gh` use the repository of the working directory.
    pub repo: Option<String>,
    /// Path or name of the GitHub CLI binary.
    pub gh_bin: String,
    /// Spawn ledger location.
    pub ledger_path: PathBuf,
    /// Upper bound for a single tracker call.
    pub command_timeout: Duration,
    /// Attempts per tracker call, including the first.
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Period of the `watch` sweep.
    pub poll_interval: Duration,
    /// Prefix of the `Issue ID:` code in spawn triggers (`GH-42`).
    pub issue_code_prefix: String,
    /// Agent type when no label classifies the issue.
    pub default_agent_type: String,
    /// Comment on pull requests that cannot be linked to an issue.
    pub report_link_errors: bool,
    /// Analyze and print plans without calling the write surface.
    pub dry_run: bool,
}

fn env_or<T: FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(fallback)
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            repo: std::env::var("DISPATCH_REPO").ok().filter(|r| !r.is_empty()),
            gh_bin: std::env::var("DISPATCH_GH_BIN").unwrap_or_else(|_| "gh".into()),
            ledger_path: std::env::var("DISPATCH_LEDGER_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".swarm/spawn-ledger.json")),
            command_timeout: Duration::from_secs(env_or("DISPATCH_COMMAND_TIMEOUT_SECS", 30)),
            max_attempts: env_or("DISPATCH_MAX_ATTEMPTS", 4),
            retry_base_delay: Duration::from_millis(env_or("DISPATCH_RETRY_BASE_MS", 500)),
            retry_max_delay: Duration::from_millis(env_or("DISPATCH_RETRY_MAX_MS", 8000)),
            poll_interval: Duration::from_secs(env_or("DISPATCH_POLL_INTERVAL_SECS", 300)),
            issue_code_prefix: std::env::var("DISPATCH_ISSUE_CODE_PREFIX")
                .unwrap_or_else(|_| "GH".into()),
            default_agent_type: std::env::var("DISPATCH_DEFAULT_AGENT_TYPE")
                .unwrap_or_else(|_| "general".into()),
            report_link_errors: env_or("DISPATCH_REPORT_LINK_ERRORS", true),
            dry_run: false,
        }
    }
}

/// On-disk overlay. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    repo: Option<String>,
    gh_bin: Option<String>,
    ledger_path: Option<PathBuf>,
    command_timeout_secs: Option<u64>,
    max_attempts: Option<u32>,
    retry_base_ms: Option<u64>,
    retry_max_ms: Option<u64>,
    poll_interval_secs: Option<u64>,
    issue_code_prefix: Option<String>,
    default_agent_type: Option<String>,
    report_link_errors: Option<bool>,
}

impl DispatchConfig {
    /// Defaults overlaid with the TOML file at `path`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = path {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            config
                .apply_file(&raw)
                .with_context(|| format!("Invalid config file {}", path.display()))?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Overlay the fields present in a TOML document.
    pub fn apply_file(&mut self, raw: &str) -> Result<()> {
        let file: ConfigFile = toml::from_str(raw).context("Failed to parse TOML")?;
        if let Some(repo) = file.repo {
            self.repo = Some(repo);
        }
        if let Some(bin) = file.gh_bin {
            self.gh_bin = bin;
        }
        if let Some(path) = file.ledger_path {
            self.ledger_path = path;
        }
        if let Some(secs) = file.command_timeout_secs {
            self.command_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = file.max_attempts {
            self.max_attempts = n;
        }
        if let Some(ms) = file.retry_base_ms {
            self.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = file.retry_max_ms {
            self.retry_max_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = file.poll_interval_secs {
            self.poll_interval = Duration::from_secs(secs);
        }
        if let Some(prefix) = file.issue_code_prefix {
            self.issue_code_prefix = prefix;
        }
        if let Some(agent) = file.default_agent_type {
            self.default_agent_type = agent;
        }
        if let Some(report) = file.report_link_errors {
            self.report_link_errors = report;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.max_attempts >= 1, "max_attempts must be at least 1");
        anyhow::ensure!(
            !self.command_timeout.is_zero(),
            "command_timeout must be non-zero"
        );
        anyhow::ensure!(
            self.retry_base_delay <= self.retry_max_delay,
            "retry_base_delay exceeds retry_max_delay"
        );
        anyhow::ensure!(!self.gh_bin.trim().is_empty(), "gh_bin must not be empty");
        Ok(())
    }
}
