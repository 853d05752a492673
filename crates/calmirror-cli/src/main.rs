//! calmirror CLI entry point.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use calmirror_cli::cli::{Cli, Command, ConfigAction};
use calmirror_cli::commands::{self, book::BookingArgs};
use calmirror_cli::config::{AppConfig, CredentialOverrides};
use calmirror_cli::error::CliResult;
use calmirror_core::{TracingConfig, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracing = if cli.debug {
        TracingConfig::debug()
    } else if matches!(cli.command, Command::Watch { .. }) {
        TracingConfig::watch()
    } else {
        TracingConfig::default()
    };
    if let Err(e) = init_tracing(tracing) {
        eprintln!("warning: could not initialize logging: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(cli.config.as_deref())?;
    let user_id = cli
        .user
        .clone()
        .unwrap_or_else(|| config.storage.user_id.clone());

    let overrides = match cli.command {
        Command::Config { ref action } => {
            return match action {
                ConfigAction::Dump => commands::config::dump(&config, &config_path),
                ConfigAction::Validate => commands::config::validate(&config),
                ConfigAction::Path => commands::config::path(&config_path),
            };
        }
        Command::Auth {
            ref client_id,
            ref client_secret,
            ref credentials_file,
            ..
        } => CredentialOverrides {
            client_id: client_id.clone(),
            client_secret: client_secret.clone(),
            credentials_file: credentials_file.clone(),
        },
        _ => CredentialOverrides::default(),
    };

    let session = commands::open_session(&config, &user_id, &overrides)?;

    match cli.command {
        Command::Auth { force, .. } => commands::auth::google(&session, force).await,
        Command::Events { force, json } => commands::events::events(&session, force, json).await,
        Command::Calendars { force, json } => {
            commands::events::calendars(&session, force, json).await
        }
        Command::Book {
            title,
            start,
            duration,
            calendar,
            location,
        } => {
            let args = BookingArgs {
                title,
                start,
                duration_minutes: duration,
                calendar,
                location,
            };
            commands::book::book(&session, &args).await
        }
        Command::Status { probe } => commands::status::status(&session, probe).await,
        Command::Disconnect => commands::status::disconnect(&session),
        Command::Watch { interval } => {
            let interval = interval
                .map(Duration::from_secs)
                .unwrap_or(config.sync.cache_ttl)
                .max(Duration::from_secs(1));
            commands::watch::watch(&session, config.health.clone(), interval).await
        }
        Command::Config { .. } => Ok(()),
    }
}
