use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::feed::DEFAULT_API_URL;
use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "filsync",
    about = "Mirror Filecoin explorer transfer history into a local SQLite ledger"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Watched account addresses, comma-separated
    #[arg(short = 'a', long, env = "FILSYNC_ACCOUNTS", value_delimiter = ',', global = true)]
    pub accounts: Vec<String>,

    /// Path to the ledger database
    #[arg(
        long,
        env = "FILSYNC_DATABASE",
        default_value = "~/.filsync/filsync.db",
        global = true
    )]
    pub database: String,

    /// Explorer API base URL
    #[arg(long, env = "FILSYNC_API_URL", default_value = DEFAULT_API_URL, global = true)]
    pub api_url: String,

    /// Records requested per page (1-100)
    #[arg(long, env = "FILSYNC_PAGE_SIZE", default_value_t = 100, global = true)]
    pub page_size: u32,

    /// HTTP request timeout in seconds
    #[arg(long, env = "FILSYNC_TIMEOUT", default_value_t = 20, global = true)]
    pub timeout: u64,

    /// Shorthand for --log-level debug
    #[arg(long, env = "FILSYNC_DEBUG", global = true)]
    pub debug: bool,

    /// Log level
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Run continuously, waiting N seconds between passes
    #[arg(long, env = "FILSYNC_WATCH_INTERVAL", global = true)]
    pub watch_with_interval: Option<u64>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch transfers added since the last pass (default)
    Sync,
    /// Walk the whole remote history and store everything missing
    FullSync,
    /// Show local counts, checkpoints and totals per transfer type
    Status {
        /// Only total transfers on this UTC date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

impl Cli {
    pub fn effective_command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Sync)
    }

    pub fn effective_log_level(&self) -> LogLevel {
        if self.debug {
            LogLevel::Debug
        } else {
            self.log_level
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_sync() {
        let cli = Cli::try_parse_from(["filsync", "--accounts", "f01"]).unwrap();
        assert_eq!(cli.effective_command(), Command::Sync);
        assert_eq!(cli.page_size, 100);
        assert_eq!(cli.timeout, 20);
        assert_eq!(cli.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_accounts_split_on_comma() {
        let cli = Cli::try_parse_from(["filsync", "--accounts", "f01,f02"]).unwrap();
        assert_eq!(cli.accounts, vec!["f01", "f02"]);
    }

    #[test]
    fn test_status_with_date() {
        let cli =
            Cli::try_parse_from(["filsync", "status", "--date", "2024-03-01", "-a", "f01"])
                .unwrap();
        assert_eq!(
            cli.effective_command(),
            Command::Status {
                date: NaiveDate::from_ymd_opt(2024, 3, 1)
            }
        );
    }

    #[test]
    fn test_status_rejects_bad_date() {
        assert!(Cli::try_parse_from(["filsync", "status", "--date", "March 1st"]).is_err());
    }

    #[test]
    fn test_full_sync_subcommand() {
        let cli = Cli::try_parse_from(["filsync", "full-sync", "-a", "f01"]).unwrap();
        assert_eq!(cli.effective_command(), Command::FullSync);
    }

    #[test]
    fn test_debug_flag_overrides_log_level() {
        let cli =
            Cli::try_parse_from(["filsync", "--log-level", "error", "--debug"]).unwrap();
        assert_eq!(cli.effective_log_level(), LogLevel::Debug);
    }
}
