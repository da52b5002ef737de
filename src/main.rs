use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use geostats::aggregate::Metric;
use geostats::cli::commands;
use geostats::config::load_config_from;

#[derive(Parser, Debug)]
#[command(
    name = "geostats",
    version,
    about = "Web analytics by country: CSV, choropleth maps and mail"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "GEOSTATS_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch, aggregate, render and mail a report
    Report {
        /// Output CSV (defaults to <output.dir>/sessions_<accounts>_<start>_<end>.csv)
        output_file: Option<PathBuf>,

        /// Start date (defaults to the start of the previous fiscal quarter)
        #[arg(short, long, alias = "start-date")]
        start: Option<String>,

        /// End date (defaults to the end of the previous fiscal quarter)
        #[arg(short, long, alias = "end-date")]
        end: Option<String>,

        /// Fiscal quarter, e.g. Q2/2023
        #[arg(short, long, alias = "fiscal-qtr", conflicts_with_all = ["start", "end"])]
        quarter: Option<String>,

        /// Only these accounts (comma separated)
        #[arg(short, long, alias = "account-list", value_delimiter = ',')]
        accounts: Vec<String>,

        /// Do not send mail
        #[arg(long)]
        no_mail: bool,
    },
    /// Render maps from an existing CSV
    Plot {
        csv_file: PathBuf,

        /// Metric to map
        #[arg(short, long, value_enum)]
        metric: Option<Metric>,

        /// Interactive map output
        #[arg(long)]
        html: Option<PathBuf>,

        /// Static map output (.jpg, .png or .svg)
        #[arg(long)]
        image: Option<PathBuf>,

        /// Open the result when done
        #[arg(long)]
        show: bool,
    },
    /// List report sources
    Sources {
        /// Only these accounts (comma separated)
        #[arg(short, long, alias = "account-list", value_delimiter = ',')]
        accounts: Vec<String>,
    },
    /// Per-site totals for a fiscal quarter, compared with the quarter before
    Summary {
        /// Fiscal quarter, e.g. Q2/2023 (defaults to the previous one)
        #[arg(short, long, alias = "fiscal-qtr")]
        quarter: Option<String>,

        /// Only these accounts (comma separated)
        #[arg(short, long, alias = "account-list", value_delimiter = ',')]
        accounts: Vec<String>,

        /// Directory for the CSV (defaults to output.dir)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Do not send mail
        #[arg(long)]
        no_mail: bool,
    },
    /// Print the previous fiscal quarter for a date
    Quarter {
        /// Reference date (defaults to today)
        date: Option<String>,
    },
    /// Show the configuration
    Config,
}

fn init_tracing(debug: bool) {
    let default = if debug { "geostats=debug,info" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config_from(cli.config.as_deref())?;

    match cli.command {
        Command::Report {
            output_file,
            start,
            end,
            quarter,
            accounts,
            no_mail,
        } => {
            commands::report::run(&config, output_file, start, end, quarter, accounts, no_mail)
                .await
        }
        Command::Plot {
            csv_file,
            metric,
            html,
            image,
            show,
        } => commands::plot::run(&config, csv_file, metric, html, image, show).await,
        Command::Sources { accounts } => commands::sources::run(&config, accounts).await,
        Command::Summary {
            quarter,
            accounts,
            output_dir,
            no_mail,
        } => commands::summary::run(&config, quarter, accounts, output_dir, no_mail).await,
        Command::Quarter { date } => commands::quarter::run(&config, date).await,
        Command::Config => commands::config::run(&config, cli.config.as_deref()).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
