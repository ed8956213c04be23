use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Cli;
use crate::feed::MAX_PAGE_SIZE;

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub accounts: Vec<String>,
    pub database: PathBuf,
    pub api_url: String,
    pub timeout: Duration,
    pub watch_with_interval: Option<u64>,
    pub page_size: u32,
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Trim, drop blanks, and de-duplicate while keeping first-seen order.
fn normalize_accounts(raw: &[String]) -> Vec<String> {
    let mut accounts: Vec<String> = Vec::with_capacity(raw.len());
    for account in raw.iter().map(|a| a.trim()).filter(|a| !a.is_empty()) {
        if !accounts.iter().any(|seen| seen == account) {
            accounts.push(account.to_string());
        }
    }
    accounts
}

impl Config {
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let accounts = normalize_accounts(&cli.accounts);
        if accounts.is_empty() {
            anyhow::bail!("No accounts configured. Pass --accounts or set FILSYNC_ACCOUNTS");
        }

        if cli.page_size == 0 || cli.page_size > MAX_PAGE_SIZE {
            anyhow::bail!(
                "--page-size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE,
                cli.page_size
            );
        }

        if cli.timeout == 0 {
            anyhow::bail!("--timeout must be at least 1 second");
        }

        if cli.watch_with_interval == Some(0) {
            anyhow::bail!("--watch-with-interval must be at least 1 second");
        }

        let api_url = cli.api_url.trim().to_string();
        if api_url.is_empty() {
            anyhow::bail!("--api-url must not be empty");
        }

        Ok(Self {
            accounts,
            database: expand_tilde(&cli.database),
            api_url,
            timeout: Duration::from_secs(cli.timeout),
            watch_with_interval: cli.watch_with_interval,
            page_size: cli.page_size,
        })
    }
}
