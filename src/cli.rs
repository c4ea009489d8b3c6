//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use url::Url;

use catsync::config::{
    ConfigError, DEFAULT_LOCK_STALE_SECS, DEFAULT_LOCK_TIMEOUT_SECS, DEFAULT_RATE_LIMIT,
    DEFAULT_TIMEOUT_SECS, RemoteSettings, RunSettings, resolve_token,
};
use catsync::ledger::CorruptionPolicy;
use catsync::remote::DEFAULT_MAX_ATTEMPTS;

/// Ingest a catalog of product manifests into a remote content API.
///
/// Repeated runs over an unchanged catalog issue no remote writes; a
/// crashed run is safely resumable; concurrent runs never corrupt
/// shared state.
#[derive(Parser, Debug)]
#[command(name = "catsync")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan a catalog root and upsert changed items remotely
    Run(RunArgs),
    /// Check connectivity and credentials against the remote API
    Health(HealthArgs),
}

/// Flags shared by every command that touches the remote API.
#[derive(clap::Args, Debug)]
pub struct RemoteArgs {
    /// Base URL of the remote deployment
    #[arg(long)]
    pub base_url: Url,

    /// Bearer token; falls back to the CATSYNC_TOKEN environment variable
    #[arg(long)]
    pub token: Option<String>,

    /// Per-request timeout in seconds (1-300)
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..=300))]
    pub timeout: u64,

    /// Maximum requests per second to the remote API (0 to disable)
    #[arg(short = 'l', long, default_value_t = DEFAULT_RATE_LIMIT, value_parser = clap::value_parser!(u32).range(0..=100))]
    pub rate_limit: u32,

    /// Maximum attempts per remote call, including the first (1-10)
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_ATTEMPTS, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_retries: u32,
}

impl RemoteArgs {
    /// Resolves these flags into remote settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingToken`] when no token is available.
    pub fn to_settings(&self) -> Result<RemoteSettings, ConfigError> {
        Ok(RemoteSettings {
            base_url: self.base_url.clone(),
            token: resolve_token(self.token.clone())?,
            timeout: Duration::from_secs(self.timeout),
            rate_limit: self.rate_limit,
            max_attempts: self.max_retries,
        })
    }
}

/// Arguments for the `run` command.
#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Catalog root containing one directory per sku
    #[arg(long)]
    pub catalog: PathBuf,

    /// State directory for the ledger and lock files
    #[arg(long, default_value = ".catsync")]
    pub state_dir: PathBuf,

    /// Execute the full diff and lock logic but perform no remote
    /// mutation and write no ledger records
    #[arg(long)]
    pub dry_run: bool,

    /// Worker pool size; 1 processes skus sequentially (1-64)
    #[arg(short = 'p', long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=64))]
    pub parallelism: u8,

    /// Seconds to wait for a contended sku lock before skipping it
    #[arg(long, default_value_t = DEFAULT_LOCK_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(0..=3600))]
    pub lock_timeout: u64,

    /// Seconds after which a held lock is presumed abandoned
    #[arg(long, default_value_t = DEFAULT_LOCK_STALE_SECS, value_parser = clap::value_parser!(u64).range(1..=86400))]
    pub lock_stale_after: u64,

    /// What to do when a ledger record is unreadable
    #[arg(long, value_enum, default_value_t = OnCorrupt::Discard)]
    pub on_corrupt: OnCorrupt,

    #[command(flatten)]
    pub remote: RemoteArgs,
}

impl RunArgs {
    /// Resolves these flags into run settings.
    #[must_use]
    pub fn to_settings(&self) -> RunSettings {
        RunSettings {
            catalog_root: self.catalog.clone(),
            state_dir: self.state_dir.clone(),
            dry_run: self.dry_run,
            parallelism: usize::from(self.parallelism),
            lock_timeout: Duration::from_secs(self.lock_timeout),
            lock_stale_after: Duration::from_secs(self.lock_stale_after),
            corruption_policy: self.on_corrupt.into(),
        }
    }
}

/// Arguments for the `health` command.
#[derive(clap::Args, Debug)]
pub struct HealthArgs {
    #[command(flatten)]
    pub remote: RemoteArgs,
}

/// CLI surface of [`CorruptionPolicy`].
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnCorrupt {
    /// Abort the run on the first corrupt record
    Fail,
    /// Drop the record and reconcile via remote lookup
    Discard,
}

impl From<OnCorrupt> for CorruptionPolicy {
    fn from(value: OnCorrupt) -> Self {
        match value {
            OnCorrupt::Fail => Self::Fail,
            OnCorrupt::Discard => Self::Discard,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(args).unwrap()
    }

    const RUN_MINIMAL: &[&str] = &[
        "catsync",
        "run",
        "--catalog",
        "/data/catalog",
        "--base-url",
        "http://cms.test/",
    ];

    // ==================== Run Command Tests ====================

    #[test]
    fn test_cli_run_minimal_uses_defaults() {
        let args = parse(RUN_MINIMAL);
        let Command::Run(run) = args.command else {
            panic!("expected run command");
        };
        assert_eq!(run.catalog, PathBuf::from("/data/catalog"));
        assert_eq!(run.state_dir, PathBuf::from(".catsync"));
        assert!(!run.dry_run);
        assert_eq!(run.parallelism, 1);
        assert_eq!(run.lock_timeout, DEFAULT_LOCK_TIMEOUT_SECS);
        assert_eq!(run.lock_stale_after, DEFAULT_LOCK_STALE_SECS);
        assert_eq!(run.on_corrupt, OnCorrupt::Discard);
        assert_eq!(run.remote.rate_limit, DEFAULT_RATE_LIMIT);
        assert_eq!(run.remote.max_retries, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(run.remote.timeout, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_cli_run_settings_conversion() {
        let mut base: Vec<&str> = RUN_MINIMAL.to_vec();
        base.extend(["--dry-run", "-p", "8", "--lock-timeout", "5"]);
        let args = parse(&base);
        let Command::Run(run) = args.command else {
            panic!("expected run command");
        };

        let settings = run.to_settings();
        assert!(settings.dry_run);
        assert_eq!(settings.parallelism, 8);
        assert_eq!(settings.lock_timeout, Duration::from_secs(5));
        assert_eq!(settings.corruption_policy, CorruptionPolicy::Discard);
    }

    #[test]
    fn test_cli_run_requires_catalog_and_base_url() {
        let result = Args::try_parse_from(["catsync", "run", "--catalog", "/x"]);
        assert!(result.is_err());
        let result = Args::try_parse_from(["catsync", "run", "--base-url", "http://x/"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_run_rejects_invalid_base_url() {
        let result = Args::try_parse_from([
            "catsync",
            "run",
            "--catalog",
            "/x",
            "--base-url",
            "not a url",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_parallelism_bounds() {
        let mut ok: Vec<&str> = RUN_MINIMAL.to_vec();
        ok.extend(["-p", "64"]);
        assert!(Args::try_parse_from(&ok).is_ok());

        let mut zero: Vec<&str> = RUN_MINIMAL.to_vec();
        zero.extend(["-p", "0"]);
        let err = Args::try_parse_from(&zero).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);

        let mut over: Vec<&str> = RUN_MINIMAL.to_vec();
        over.extend(["-p", "65"]);
        let err = Args::try_parse_from(&over).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_rate_limit_zero_allowed() {
        let mut args: Vec<&str> = RUN_MINIMAL.to_vec();
        args.extend(["-l", "0"]);
        let parsed = parse(&args);
        let Command::Run(run) = parsed.command else {
            panic!("expected run command");
        };
        assert_eq!(run.remote.rate_limit, 0);
    }

    #[test]
    fn test_cli_max_retries_zero_rejected() {
        // At least one attempt is always made; 0 is a config error.
        let mut args: Vec<&str> = RUN_MINIMAL.to_vec();
        args.extend(["-r", "0"]);
        let err = Args::try_parse_from(&args).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_on_corrupt_fail() {
        let mut args: Vec<&str> = RUN_MINIMAL.to_vec();
        args.extend(["--on-corrupt", "fail"]);
        let parsed = parse(&args);
        let Command::Run(run) = parsed.command else {
            panic!("expected run command");
        };
        assert_eq!(run.on_corrupt, OnCorrupt::Fail);
        assert_eq!(CorruptionPolicy::from(run.on_corrupt), CorruptionPolicy::Fail);
    }

    // ==================== Health Command Tests ====================

    #[test]
    fn test_cli_health_parses() {
        let args = parse(&["catsync", "health", "--base-url", "http://cms.test/"]);
        let Command::Health(health) = args.command else {
            panic!("expected health command");
        };
        assert_eq!(health.remote.base_url.as_str(), "http://cms.test/");
    }

    // ==================== Global Flag Tests ====================

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let mut args: Vec<&str> = RUN_MINIMAL.to_vec();
        args.push("-vv");
        assert_eq!(parse(&args).verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let mut args: Vec<&str> = RUN_MINIMAL.to_vec();
        args.push("--quiet");
        assert!(parse(&args).quiet);
    }

    #[test]
    fn test_cli_missing_subcommand_is_error() {
        let err = Args::try_parse_from(["catsync"]).unwrap_err();
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::MissingSubcommand
        );
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["catsync", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Args::try_parse_from(["catsync", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
