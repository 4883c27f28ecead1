mod application;
mod commands;
mod logging;

use crate::commands::{Cli, Commands};
use anyhow::Result;
use clap::Parser;
use fbackup::upload::UploadOutcome;
use fbackup::{BackupError, sysexits};
use std::process;
use std::time::Duration;

/// Entry point for the fbk CLI application.
/// Parses command-line arguments and dispatches to the appropriate command handler.
fn main() -> Result<()> {
    let cli = Cli::parse();
    let commands = match cli.commands {
        Some(commands) => commands,
        None => {
            eprintln!("fbk requires at least one command to execute. See 'fbk --help' for usage.");
            process::exit(sysexits::EX_KEYWORD);
        }
    };

    let config_path = commands::config_path(cli.config).unwrap_or_else(|e| exit_with(&e));
    if let Commands::Config { reset } = commands {
        if reset {
            commands::reset_config(&config_path).unwrap_or_else(|e| exit_with(&e));
        } else {
            commands::config(&config_path);
        }
        return Ok(());
    }

    let app = commands::load_config(&config_path).unwrap_or_else(|e| exit_with(&e));
    logging::init(&app.log.level, app.log.directory.as_deref(), cli.verbose)?;

    match commands {
        Commands::Run { request } => {
            let request = request.apply(app.backup);
            let report = commands::run(&request).unwrap_or_else(|e| {
                eprintln!("Backup failed during {}: {e}", e.stage());
                process::exit(sysexits::exit_code(&e));
            });
            for outcome in &report.uploads {
                match outcome {
                    UploadOutcome::Uploaded { target, remote_id } => {
                        eprintln!("Uploaded to {target}: {remote_id}");
                    }
                    UploadOutcome::Pending { target } => {
                        eprintln!("Upload to {target} is not available yet, skipped");
                    }
                    UploadOutcome::Failed { error, .. } => eprintln!("{error}"),
                }
            }
            println!("{}", report.artifact.display());
        }
        Commands::Watch {
            request,
            quiet_period_ms,
        } => {
            let quiet_period = quiet_period_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| app.quiet_period());
            let request = request.apply(app.backup);
            match commands::watch(request, quiet_period) {
                Ok(summary) => println!(
                    "Watch stopped: {} triggered, {} succeeded, {} failed",
                    summary.triggered, summary.succeeded, summary.failed
                ),
                Err(e) => {
                    if let Some(err) = e.downcast_ref::<BackupError>() {
                        exit_with(err);
                    }
                    return Err(e);
                }
            }
        }
        Commands::Config { .. } => {}
    }
    Ok(())
}

fn exit_with(err: &BackupError) -> ! {
    eprintln!("{err}");
    process::exit(sysexits::exit_code(err));
}
