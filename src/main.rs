mod cli;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{error, info};

use pos_digest::data::{MdbExport, TableSource};
use pos_digest::dispatch::{Mailer, SmtpMailer};
use pos_digest::runner::{self, PipelineError};
use pos_digest::settings::Settings;

use cli::{Cli, Commands};

const UNEXPECTED_FAILURE: u8 = 1;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let settings = match Settings::load(&cli.config) {
        Ok(settings) => settings,
        Err(err) => {
            let err = PipelineError::from(err);
            error!("{} stage failed: {}", err.stage(), err);
            return ExitCode::from(err.exit_code());
        },
    };

    match cli.command {
        Commands::Run(args) => match runner::run(&settings, &args.into()) {
            Ok(_) => ExitCode::SUCCESS,
            Err(err) => {
                if let Some(result) = err.delivery_result() {
                    info!("delivery status={:?}, report was not delivered", result.status());
                }
                ExitCode::from(err.exit_code())
            },
        },
        Commands::CheckEmail => report(check_email(&settings)),
        Commands::Tables => report(list_tables(&settings)),
    }
}

fn report(result: Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::from(UNEXPECTED_FAILURE)
        },
    }
}

fn check_email(settings: &Settings) -> Result<()> {
    let mailer = SmtpMailer::new(&settings.email).context("email settings are incomplete")?;
    mailer
        .check_connection()
        .with_context(|| format!("could not log in to {}:{}", settings.email.host, settings.email.port))?;

    println!("Logged in to {} as {}", settings.email.host, settings.email.username);
    Ok(())
}

fn list_tables(settings: &Settings) -> Result<()> {
    let source = MdbExport::new(&settings.database.path)
        .with_tools(&settings.database.export_tool, &settings.database.tables_tool)
        .with_timeout(settings.database.timeout());

    let tables = source
        .tables()
        .with_context(|| format!("failed to list tables in {}", source.database().display()))?;
    for table in tables {
        println!("{}", table);
    }

    Ok(())
}
