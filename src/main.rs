use std::process::ExitCode;
use std::thread;
use std::time::Instant;

use clap::Parser;
use mysql_backup_lib::cli::{Action, Cli};
use mysql_backup_lib::config::BackupConfig;
use mysql_backup_lib::engine::{DumpOutcome, Engine, SystemClock};
use mysql_backup_lib::storage::{BackupSink, DiscardSink, FileSink};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // init logger
    let mut env_logger = env_logger::builder();
    if let Some(level) = cli.verbose {
        env_logger.filter_level(level);
    }
    env_logger.try_init().expect("env_logger should not fail");

    let mut config = match BackupConfig::load_or_init(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!(target: "config", "Reading the config file {} failed: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };
    if let Some(backup_root) = cli.backup_root.clone() {
        config.backup_root = backup_root;
    }
    if config.databases.is_empty() {
        log::warn!(target: "config", "No databases configured in {}", cli.config.display());
    }

    if cli.dry_run {
        log::warn!("Running in dry-run mode");
        drive(&cli, config, DiscardSink)
    } else {
        let sink = FileSink::new(&config.backup_root);
        drive(&cli, config, sink)
    }
}

fn drive<S: BackupSink>(cli: &Cli, config: BackupConfig, sink: S) -> ExitCode {
    let throttle = config.throttle();
    let poll_interval = config.poll_interval();
    let server_down_retry = config.server_down_retry();

    let mut engine = match Engine::new(config.databases, sink, config.dump_tool) {
        // a poll interval below one minute hits the scheduled minute more than once
        Ok(engine) => engine.with_throttle(throttle).with_run_ledger(),
        Err(e) => {
            log::error!(target: "config", "Invalid dump tool config: {e}");
            return ExitCode::FAILURE;
        }
    };

    match &cli.action {
        Action::Backup { database } => match engine.run_one(database) {
            Ok(outcome) => {
                if cli.json {
                    print_json(&outcome);
                }
                match outcome {
                    DumpOutcome::BackedUp => ExitCode::SUCCESS,
                    DumpOutcome::NotConfigured => {
                        log::error!(target: "engine", "No database configured with name {database}");
                        ExitCode::FAILURE
                    }
                    _ => ExitCode::FAILURE,
                }
            }
            Err(e) => {
                log::error!(target: "engine", "Backup resulted in a fatal error: {e}");
                ExitCode::FAILURE
            }
        },
        Action::Run { once } => {
            let mut server_down_since: Option<Instant> = None;
            loop {
                if let (Some(retry), Some(since)) = (server_down_retry, server_down_since) {
                    if since.elapsed() >= retry {
                        engine.reset();
                        server_down_since = None;
                    }
                }

                match engine.run_all(&SystemClock) {
                    Ok(reports) => {
                        if cli.json {
                            print_json(&reports);
                        }
                    }
                    Err(e) => {
                        log::error!(target: "engine", "Backup pass resulted in a fatal error: {e}");
                        if *once {
                            return ExitCode::FAILURE;
                        }
                    }
                }

                if engine.is_server_unreachable() && server_down_since.is_none() {
                    server_down_since = Some(Instant::now());
                }

                if *once {
                    return ExitCode::SUCCESS;
                }
                thread::sleep(poll_interval);
            }
        }
    }
}

fn print_json(value: &impl serde::Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => log::error!("Serializing the report failed: {e}"),
    }
}
