use std::path::PathBuf;

use clap::Parser;

use fitroom_core::error::{ConfigError, FitroomError, OracleError, StoreError, ValidationError};

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "fitroom",
    version,
    about = "Preview garments on a model photo and get size recommendations"
)]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,

    /// Path to the config file
    #[arg(long, global = true, default_value = "fitroom.toml", env = "FITROOM_CONFIG")]
    config: PathBuf,

    /// SQLite database for cost records and saved outfits
    #[arg(long, global = true, default_value = "fitroom.db", env = "FITROOM_DB")]
    db: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,
}

/// Classify an error into a process exit code.
///
/// Exit codes:
///   0  success
///   1  general/unknown error
///   2  configuration error
///   3  invalid selection or measurements
///   4  database error
///   6  AI service error
fn classify_exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<FitroomError>() {
            return match e {
                FitroomError::Config(_) => 2,
                FitroomError::Validation(_) => 3,
                FitroomError::Store(_) => 4,
                FitroomError::Oracle(_) => 6,
                FitroomError::Fetch(_) => 1,
            };
        }
        if cause.is::<ConfigError>() {
            return 2;
        }
        if cause.is::<ValidationError>() {
            return 3;
        }
        if cause.is::<StoreError>() {
            return 4;
        }
        if cause.is::<OracleError>() {
            return 6;
        }
    }

    let lower = format!("{err:#}").to_lowercase();
    if lower.contains("config") {
        2
    } else if lower.contains("database") || lower.contains("sqlite") {
        4
    } else if lower.contains("api key") || lower.contains("ai service") {
        6
    } else {
        1
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (_, 0) => "warn",
        (_, 1) => "info",
        (_, 2) => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: Failed to create runtime: {e}");
            std::process::exit(1);
        }
    };

    let globals = commands::Globals {
        config: cli.config,
        db: cli.db,
        quiet: cli.quiet,
    };

    match runtime.block_on(commands::run(cli.command, globals)) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(classify_exit_code(&e));
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;
    use fitroom_core::types::Slot;

    #[test]
    fn exit_code_config() {
        let err = anyhow::Error::new(ConfigError::Parse("expected `=`".into()))
            .context("Cannot load config from fitroom.toml");
        assert_eq!(classify_exit_code(&err), 2);
    }

    #[test]
    fn exit_code_validation() {
        let err: anyhow::Error = FitroomError::from(ValidationError::MissingSize(Slot::Lower)).into();
        assert_eq!(classify_exit_code(&err), 3);
    }

    #[test]
    fn exit_code_database() {
        let err = anyhow::anyhow!("disk full").context("Cannot open database: /tmp/fitroom.db");
        assert_eq!(classify_exit_code(&err), 4);
    }

    #[test]
    fn exit_code_oracle_through_context() {
        let err: anyhow::Error =
            FitroomError::from(OracleError::Unavailable("GEMINI_API_KEY is not set".into())).into();
        let err = err.context("Cannot start the try-on session");
        assert_eq!(classify_exit_code(&err), 6);
    }

    #[test]
    fn exit_code_general() {
        let err: anyhow::Result<()> = Err(anyhow::anyhow!("Something unexpected happened"))
            .context("while writing the preview");
        assert_eq!(classify_exit_code(&err.unwrap_err()), 1);
    }
}
