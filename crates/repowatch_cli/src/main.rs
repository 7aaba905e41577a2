//! Repowatch CLI - daemon and tools for incremental GitHub fetching.

mod commands;
mod config;
mod progress;
mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::Term;
use tracing_subscriber::EnvFilter;

use crate::commands::status::OutputFormat;

#[derive(Parser)]
#[command(name = "repowatch")]
#[command(version)]
#[command(about = "Incrementally fetch GitHub repositories and commits")]
#[command(
    long_about = "Repowatch walks an account's repository listing and each repository's commit \
history page by page, resuming from the last page recorded in the database. Every page is \
published as an envelope, either to an in-process ingest task or to Kafka, and is recorded only \
once it has been applied."
)]
#[command(after_long_help = r#"EXAMPLES
    Run both schedulers until Ctrl+C:
        $ repowatch run

    Walk the repository listing once:
        $ repowatch walk repos

    Re-walk one repository's commits from page 1:
        $ repowatch walk commits my-repo --from-page 1

    Show how far every scope has been fetched:
        $ repowatch status

CONFIGURATION
    Repowatch reads configuration from:
      1. ~/.config/repowatch/config.toml (or $XDG_CONFIG_HOME/repowatch/config.toml)
      2. ./repowatch.toml
      3. Environment variables (REPOWATCH_ prefix, `__` between section and key)
      4. .env file in current directory

ENVIRONMENT VARIABLES
    REPOWATCH_DATABASE__URL     Database connection string (default: ~/.local/state/repowatch/repowatch.db)
    REPOWATCH_GITHUB__OWNER     Account whose repositories are watched
    REPOWATCH_GITHUB__TOKEN     GitHub personal access token
    REPOWATCH_PUBLISHER__BACKEND  local (default) or kafka
    START_DATE / END_DATE       RFC 3339 bounds for commit listings
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the repository and commit schedulers until Ctrl+C
    #[cfg(feature = "github")]
    Run,
    /// Walk one scope to exhaustion and exit
    #[cfg(feature = "github")]
    Walk {
        #[command(subcommand)]
        target: WalkTarget,

        /// Start at this page instead of the recorded position
        #[arg(long, global = true)]
        from_page: Option<u32>,
    },
    /// Publish the current metadata of one repository
    #[cfg(feature = "github")]
    Refresh {
        /// Repository name
        repository: String,
    },
    /// Apply envelopes from Kafka to the database
    #[cfg(feature = "kafka")]
    Consume,
    /// Show fetch positions and stored counts
    Status {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Run database migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
    /// Generate man page(s)
    Man {
        /// Output directory for man pages (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub(crate) enum WalkTarget {
    /// The account's repository listing
    Repos,
    /// One repository's commit history
    Commits {
        /// Repository name
        repository: String,
    },
}

#[derive(Subcommand)]
pub(crate) enum MigrateAction {
    /// Apply all pending migrations
    Up,
    /// Roll back applied migrations
    Down {
        /// Number of migrations to roll back
        #[arg(long, default_value_t = 1)]
        steps: u32,
    },
    /// Show migration status
    Status,
    /// Drop all tables and reapply migrations
    Fresh {
        /// Confirm that fetch history may be discarded
        #[arg(long)]
        yes: bool,
    },
}

fn init_tracing() {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("repowatch=info,repowatch_cli=info"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(Term::stderr().is_term())
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    // Handle commands that don't require configuration first
    match &cli.command {
        Commands::Completions { shell } => {
            return commands::meta::handle_completions(*shell);
        }
        Commands::Man { output } => {
            return commands::meta::handle_man(output.clone());
        }
        _ => {}
    }

    // Load configuration (config file -> env vars -> defaults)
    let config = config::Config::load();
    let database_url = config
        .database_url()
        .ok_or("Could not determine a database URL; set database.url")?;

    match cli.command {
        #[cfg(feature = "github")]
        Commands::Run => {
            let shutdown = shutdown::shutdown_signal();
            commands::run::handle_run(&config, &database_url, shutdown).await?;
        }
        #[cfg(feature = "github")]
        Commands::Walk { target, from_page } => {
            commands::walk::handle_walk(target, from_page, &config, &database_url).await?;
        }
        #[cfg(feature = "github")]
        Commands::Refresh { repository } => {
            commands::walk::handle_refresh(&repository, &config, &database_url).await?;
        }
        #[cfg(feature = "kafka")]
        Commands::Consume => {
            let shutdown = shutdown::shutdown_signal();
            commands::consume::handle_consume(&config, &database_url, shutdown).await?;
        }
        Commands::Status { output } => {
            commands::status::handle_status(output, &database_url).await?;
        }
        Commands::Migrate { action } => {
            commands::migrate::handle_migrate(action, &database_url).await?;
        }
        Commands::Completions { .. } | Commands::Man { .. } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[cfg(feature = "github")]
    #[test]
    fn walk_commits_parses_repository_and_from_page() {
        let cli = Cli::try_parse_from(["repowatch", "walk", "commits", "tracker", "--from-page", "3"])
            .expect("valid arguments");
        match cli.command {
            Commands::Walk {
                target: WalkTarget::Commits { repository },
                from_page,
            } => {
                assert_eq!(repository, "tracker");
                assert_eq!(from_page, Some(3));
            }
            _ => panic!("expected walk commits"),
        }
    }

    #[test]
    fn migrate_fresh_defaults_to_unconfirmed() {
        let cli = Cli::try_parse_from(["repowatch", "migrate", "fresh"]).expect("valid arguments");
        assert!(matches!(
            cli.command,
            Commands::Migrate {
                action: MigrateAction::Fresh { yes: false }
            }
        ));
    }
}
