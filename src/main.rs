use anyhow::Result;
use assetsync::log::init_logging;
use assetsync::zaim::MoneyQuery;
use chrono::NaiveDate;
use clap::{CommandFactory, Parser, Subcommand};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape brokerage valuations and post the deltas to the ledger
    Sync {
        /// Log what would be posted without writing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Inspect the ledger API
    #[command(subcommand)]
    Zaim(ZaimCommands),
}

#[derive(Subcommand)]
enum ZaimCommands {
    /// List ledger accounts
    Accounts {
        /// Filter by a name substring
        #[arg(long)]
        name: Option<String>,

        /// Include inactive accounts
        #[arg(long)]
        all: bool,
    },
    /// List categories
    Categories {
        /// Filter by mode (income or payment)
        #[arg(long)]
        mode: Option<String>,
    },
    /// List money history
    Money {
        #[arg(long)]
        mode: Option<String>,

        #[arg(long)]
        category_id: Option<i64>,

        #[arg(long)]
        start_date: Option<NaiveDate>,

        #[arg(long)]
        end_date: Option<NaiveDate>,

        #[arg(long)]
        limit: Option<u32>,

        #[arg(long)]
        page: Option<u32>,

        /// Exact-match filter on the destination account
        #[arg(long)]
        to_account_id: Option<i64>,
    },
    /// Obtain and store an OAuth access token
    Authorize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let config_path = cli.config_path.as_deref();
    let result = match cli.command {
        Some(Commands::Sync { dry_run }) => assetsync::commands::sync(config_path, dry_run).await,
        Some(Commands::Zaim(cmd)) => match cmd {
            ZaimCommands::Accounts { name, all } => {
                assetsync::commands::accounts(config_path, name.as_deref(), all).await
            }
            ZaimCommands::Categories { mode } => {
                assetsync::commands::categories(config_path, mode.as_deref()).await
            }
            ZaimCommands::Money {
                mode,
                category_id,
                start_date,
                end_date,
                limit,
                page,
                to_account_id,
            } => {
                let query = MoneyQuery {
                    mode,
                    category_id,
                    start_date,
                    end_date,
                    limit,
                    page,
                    to_account_id,
                };
                assetsync::commands::money(config_path, query).await
            }
            ZaimCommands::Authorize => assetsync::commands::authorize(config_path).await,
        },
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
