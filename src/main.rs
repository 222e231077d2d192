use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tailf::{follow, resolve, TailConfig, DEFAULT_LINES, DEFAULT_PALETTE};

/// Follow files as they grow, across truncation, rotation and deletion
#[derive(Parser, Debug)]
#[command(name = "tailf", version, about, long_about = None, disable_version_flag = true)]
struct Cli {
    /// Print version
    #[arg(short = 'v', long, action = clap::ArgAction::Version)]
    version: (),

    /// Number of trailing lines to show first (`-N` works too)
    #[arg(short = 'n', long, default_value_t = DEFAULT_LINES)]
    lines: usize,

    /// Log what is going on to stderr
    #[arg(long)]
    verbose: bool,

    /// Files to follow
    #[arg(required = true, num_args = 1..=DEFAULT_PALETTE.len())]
    files: Vec<PathBuf>,
}

/// Rewrites the `-20` shorthand into `--lines=20`.
fn expand_line_shorthand<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| {
            let count = arg
                .to_str()
                .and_then(|s| s.strip_prefix('-'))
                .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
                .map(str::to_owned);

            match count {
                Some(count) => OsString::from(format!("--lines={}", count)),
                None => arg,
            }
        })
        .collect()
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Cancels `cancel` on SIGINT or SIGTERM.
async fn trap_signals(cancel: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "sig: failed to trap SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate => {}
    }

    tracing::debug!("sig: signal received");
    cancel.cancel();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_from(expand_line_shorthand(std::env::args_os()));

    init_logging(cli.verbose);

    let mut paths = Vec::with_capacity(cli.files.len());
    for file in &cli.files {
        match resolve(file) {
            Ok(path) => paths.push(path),
            Err(e) => {
                eprintln!("file not found: {}: {}", file.display(), e);
                return ExitCode::FAILURE;
            }
        }
    }

    tracing::debug!(files = paths.len(), "main: files to follow");

    let config = TailConfig {
        lines: cli.lines,
        ..TailConfig::default()
    };

    let cancel = CancellationToken::new();
    tokio::spawn(trap_signals(cancel.clone()));

    match follow(&paths, &config, std::io::stdout(), cancel).await {
        Ok(shutdown) => {
            tracing::debug!(?shutdown, "main: received notice to shutdown");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("tailf: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn args(raw: &[&str]) -> Vec<OsString> {
        expand_line_shorthand(raw.iter().map(OsString::from))
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_line_shorthand() {
        let cli = Cli::try_parse_from(args(&["tailf", "-20", "a.log"])).unwrap();
        assert_eq!(cli.lines, 20);
        assert_eq!(cli.files, vec![PathBuf::from("a.log")]);

        let cli = Cli::try_parse_from(args(&["tailf", "-n", "0", "--verbose", "a.log", "b.log"]))
            .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.lines, 0);
        assert_eq!(cli.files.len(), 2);
    }

    #[test]
    fn test_default_lines() {
        let cli = Cli::try_parse_from(args(&["tailf", "a.log"])).unwrap();
        assert_eq!(cli.lines, DEFAULT_LINES);
        assert!(!cli.verbose);
    }

    #[test]
    fn test_shorthand_leaves_other_args() {
        assert_eq!(
            args(&["tailf", "-v", "-", "-1x", "--lines", "3"]),
            ["tailf", "-v", "-", "-1x", "--lines", "3"]
                .iter()
                .map(OsString::from)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_file_limits() {
        assert!(Cli::try_parse_from(args(&["tailf"])).is_err());
        assert!(Cli::try_parse_from(args(&["tailf", "a", "b", "c", "d", "e"])).is_ok());
        assert!(Cli::try_parse_from(args(&["tailf", "a", "b", "c", "d", "e", "f"])).is_err());
    }

    #[test]
    fn test_short_v_is_version() {
        for flag in ["-v", "--version"] {
            let err = Cli::try_parse_from(args(&["tailf", flag])).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
        }
    }

    #[test]
    fn test_unknown_flag() {
        assert!(Cli::try_parse_from(args(&["tailf", "-x", "a.log"])).is_err());
    }
}
