//! Engine performing scheduled `mysqldump` backups.
//!
//! The engine has no loop of its own. A driver calls [`Engine::run_all`] once per
//! polling tick, or [`Engine::run_one`] to back up a single database immediately.
//!
//! For every database the engine
//!
//! 1. skips it if the server was found unreachable before,
//! 2. checks if it is scheduled for the current minute ([should_run_now()]),
//! 3. runs the dump tool ([DumpTool::run_dump]),
//! 4. classifies the diagnostics of the dump tool ([classify()]) and
//! 5. hands successful dumps to the [BackupSink].

pub mod classify;
pub mod dump;
pub mod schedule;

use std::io;
use std::thread;
use std::time::Duration;

use derive_more::{Display, Error, From};

pub use classify::{classify, ClassifiedError, ErrorKind, WarningFilter};
pub use dump::{dump_args, DumpAttempt, DumpTool};
pub use schedule::{should_run_now, Clock, RunLedger, SystemClock};

use crate::config::{DatabaseDescriptor, Registry};
use crate::storage::BackupSink;

const DEFAULT_THROTTLE: Duration = Duration::from_secs(1);

/// State kept by an [Engine] between calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineState {
    server_unreachable: bool,
}

impl EngineState {
    pub fn is_server_unreachable(&self) -> bool {
        self.server_unreachable
    }

    /// Classifies `diagnostics` and latches server-wide failures.
    fn classify(&mut self, diagnostics: &str) -> ClassifiedError {
        let classified = classify(diagnostics);
        if classified.kind.is_server_wide() {
            self.server_unreachable = true;
        }

        classified
    }
}

/// Result of processing a single database.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DumpOutcome {
    /// The dump was handed to the [BackupSink].
    BackedUp,
    /// The dump tool reported an error.
    Failed(ClassifiedError),
    /// The database isn't scheduled for now.
    NotScheduled,
    /// The database was already dumped within its scheduled minute.
    AlreadyDumped,
    /// Skipped since the server was unreachable before.
    ServerDown,
    /// No database of this name is configured.
    NotConfigured,
}

/// [DumpOutcome] of a database within a pass of [`Engine::run_all`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DatabaseReport {
    pub database: String,
    #[serde(flatten)]
    pub outcome: DumpOutcome,
}

#[derive(Debug, Display, Error, From)]
/// Fatal errors of an [Engine] run.
pub enum EngineError {
    /// A pattern of ignored warnings isn't a valid regular expression.
    #[display("Invalid pattern of ignored warnings: {_0}")]
    #[from]
    InvalidWarningPattern(regex::Error),
    /// The dump tool couldn't be run.
    #[display("Running the dump tool for database {database} failed: {source}")]
    Execution { database: String, source: io::Error },
    /// A successful dump couldn't be stored.
    #[display("Writing the backup of database {database} failed: {source}")]
    Persistence { database: String, source: io::Error },
}

/// Backs up the databases of a [Registry] into a [BackupSink].
pub struct Engine<R, S> {
    registry: R,
    sink: S,
    tool: DumpTool,
    filter: WarningFilter,
    throttle: Duration,
    ledger: Option<RunLedger>,
    state: EngineState,
}

impl<R: Registry, S: BackupSink> Engine<R, S> {
    pub fn new(registry: R, sink: S, tool: DumpTool) -> Result<Self, EngineError> {
        let filter = WarningFilter::new(&tool.ignored_warnings)?;

        Ok(Self {
            registry,
            sink,
            tool,
            filter,
            throttle: DEFAULT_THROTTLE,
            ledger: None,
            state: EngineState::default(),
        })
    }

    /// Sets the pause before each database of [`run_all`](Self::run_all).
    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    /// Dumps every database at most once per scheduled minute in [`run_all`](Self::run_all),
    /// no matter how often it is called within that minute.
    pub fn with_run_ledger(mut self) -> Self {
        self.ledger = Some(RunLedger::default());
        self
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_server_unreachable(&self) -> bool {
        self.state.is_server_unreachable()
    }

    /// Clears the server unreachable latch, so that backups are attempted again.
    pub fn reset(&mut self) {
        if self.state.server_unreachable {
            log::info!(target: "engine", "Retrying backups of the previously unreachable server");
        }
        self.state = EngineState::default();
    }

    /// Backs up every database scheduled for the current minute.
    ///
    /// Databases are processed one after another in registry order, each preceded by
    /// the throttle pause. Only failures to run the dump tool or to store a dump abort
    /// the pass, errors reported by the dump tool are logged and reported.
    pub fn run_all(&mut self, clock: &impl Clock) -> Result<Vec<DatabaseReport>, EngineError> {
        let Self {
            registry,
            sink,
            tool,
            filter,
            throttle,
            ledger,
            state,
        } = self;

        let databases = registry.databases();
        let mut reports = Vec::with_capacity(databases.len());
        for database in databases {
            thread::sleep(*throttle);

            let now = clock.now();
            let outcome = if state.is_server_unreachable() {
                log::trace!(target: "engine", "Skipping {}: server unreachable", database.name);
                DumpOutcome::ServerDown
            } else if !should_run_now(database, &now) {
                DumpOutcome::NotScheduled
            } else if ledger
                .as_ref()
                .is_some_and(|ledger| ledger.dumped_this_minute(&database.name, &now))
            {
                log::trace!(target: "engine", "Skipping {}: already dumped at {now}", database.name);
                DumpOutcome::AlreadyDumped
            } else {
                let outcome = backup(tool, filter, state, sink, database)?;
                if let Some(ledger) = ledger.as_mut() {
                    ledger.record(&database.name, &now);
                }
                outcome
            };

            reports.push(DatabaseReport {
                database: database.name.clone(),
                outcome,
            });
        }

        Ok(reports)
    }

    /// Backs up the database `name` regardless of its schedule.
    pub fn run_one(&mut self, name: &str) -> Result<DumpOutcome, EngineError> {
        let Self {
            registry,
            sink,
            tool,
            filter,
            state,
            ..
        } = self;

        let Some(database) = registry.database(name) else {
            log::debug!(target: "engine", "No database configured with name {name}");
            return Ok(DumpOutcome::NotConfigured);
        };
        if state.is_server_unreachable() {
            log::debug!(target: "engine", "Skipping {name}: server unreachable");
            return Ok(DumpOutcome::ServerDown);
        }

        backup(tool, filter, state, sink, database)
    }
}

fn backup<S: BackupSink>(
    tool: &DumpTool,
    filter: &WarningFilter,
    state: &mut EngineState,
    sink: &mut S,
    database: &DatabaseDescriptor,
) -> Result<DumpOutcome, EngineError> {
    let attempt = tool
        .run_dump(database)
        .map_err(|source| EngineError::Execution {
            database: database.name.clone(),
            source,
        })?;

    let mut classified = state.classify(&filter.strip(&attempt.stderr));
    if !classified.is_error() {
        if attempt.timed_out {
            classified = ClassifiedError::unclassified(format!(
                "dump tool killed after {}s",
                tool.timeout_secs.unwrap_or_default()
            ));
        } else if !attempt.status.success() {
            classified =
                ClassifiedError::unclassified(format!("dump tool exited with {}", attempt.status));
        }
    }

    if classified.is_error() {
        log::error!(target: "engine", "Backup of the database {} failed: {}", database.name, classified.diagnostic);
        if classified.kind.is_server_wide() {
            log::error!(target: "engine", "Server unreachable, skipping all further backups");
        }
        return Ok(DumpOutcome::Failed(classified));
    }

    sink.write_backup_file(&database.name, &attempt.stdout)
        .map_err(|source| EngineError::Persistence {
            database: database.name.clone(),
            source,
        })?;
    log::info!(target: "engine", "Backup created of the database {}", database.name);

    Ok(DumpOutcome::BackedUp)
}
