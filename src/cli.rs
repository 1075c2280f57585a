use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use pos_digest::runner::RunOptions;
use pos_digest::settings::DEFAULT_SETTINGS_FILE;

#[derive(Parser)]
#[command(name = "pos-digest", version, about = "Sales reports from a point-of-sale database, by email")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Settings file
    #[arg(short, long, default_value = DEFAULT_SETTINGS_FILE, global = true)]
    pub config: PathBuf,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the report and deliver it
    Run(RunArgs),
    /// Log in to the SMTP server without sending anything
    CheckEmail,
    /// List the tables in the database
    Tables,
}

#[derive(Args, Clone)]
pub struct RunArgs {
    /// First business day of the report (YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<NaiveDate>,

    /// Last business day of the report (YYYY-MM-DD), defaults to --from
    #[arg(long)]
    pub to: Option<NaiveDate>,

    /// Save the PDF to the output directory instead of emailing it
    #[arg(long)]
    pub dry_run: bool,
}

impl From<RunArgs> for RunOptions {
    fn from(args: RunArgs) -> RunOptions {
        RunOptions {
            from: args.from,
            to: args.to,
            dry_run: args.dry_run,
        }
    }
}
