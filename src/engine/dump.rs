//! Runs `mysqldump` for a single database and captures its output.

use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::DatabaseDescriptor;

const DEFAULT_PROGRAM: &str = "mysqldump";
const PASSWORD_WARNING: &str = "Using a password on the command line interface can be insecure";
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Flags passed to the dump tool between the credentials and the database selection.
const DUMP_FLAGS: [&str; 7] = [
    "--add-drop-database",
    "--add-drop-table",
    "--add-locks",
    "--comments",
    "--create-options",
    "--dump-date",
    "--lock-tables",
];

/// The external dump tool.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DumpTool {
    /// Program name or path of `mysqldump`.
    #[serde(default = "default_program")]
    pub program: PathBuf,

    /// Seconds after which a running dump is killed.
    ///
    /// If unset, a dump is waited for until it finishes on its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Regular expressions of stderr lines that aren't treated as an error.
    #[serde(default = "default_ignored_warnings")]
    pub ignored_warnings: Vec<String>,
}

impl Default for DumpTool {
    fn default() -> Self {
        Self {
            program: default_program(),
            timeout_secs: None,
            ignored_warnings: default_ignored_warnings(),
        }
    }
}

fn default_program() -> PathBuf {
    PathBuf::from(DEFAULT_PROGRAM)
}

fn default_ignored_warnings() -> Vec<String> {
    vec![PASSWORD_WARNING.to_string()]
}

/// Captured result of one run of the dump tool.
#[derive(Debug)]
pub struct DumpAttempt {
    pub args: Vec<String>,
    /// The dump itself.
    pub stdout: String,
    /// Diagnostics of the dump tool.
    pub stderr: String,
    pub status: ExitStatus,
    /// The dump was killed after exceeding the timeout.
    pub timed_out: bool,
}

/// Arguments of the dump tool for `database`.
pub fn dump_args(database: &DatabaseDescriptor) -> Vec<String> {
    let mut args = vec![
        format!("-u{}", database.user),
        format!("-p{}", database.password),
        format!("-h{}", database.host),
    ];
    args.extend(DUMP_FLAGS.iter().map(|flag| flag.to_string()));
    args.push("--databases".to_string());
    args.push(database.name.clone());

    args
}

impl DumpTool {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Dumps `database` and blocks until the dump tool exited.
    ///
    /// Fails only if the dump tool can't be run or its output can't be read.
    /// Errors reported by the dump tool itself end up in [`DumpAttempt::stderr`].
    pub fn run_dump(&self, database: &DatabaseDescriptor) -> io::Result<DumpAttempt> {
        let args = dump_args(database);
        log::info!(target: "engine::dump", "Create database dump of: {}", database.name);
        log::trace!(
            target: "engine::dump",
            "Running: {} {}",
            self.program.display(),
            masked(&args).join(" ")
        );

        let mut dump_process = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        log::trace!(target: "engine::dump", "Started {} process.", self.program.display());

        let stdout = dump_process.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = dump_process.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        // drain both pipes while waiting, so that the dump tool never blocks on a full pipe
        let stdout = spawn_reader(stdout);
        let stderr = spawn_reader(stderr);

        let deadline = self.timeout().map(|timeout| Instant::now() + timeout);
        let (status, mut timed_out) = match wait(&mut dump_process, deadline) {
            Ok(waited) => waited,
            Err(e) => {
                let _ = dump_process.kill();
                return Err(e);
            }
        };

        // Descendants of the dump tool may keep the pipes open after it was killed or
        // exited. Readers still blocked at the deadline are left behind.
        let (stdout, stderr) = if timed_out {
            (Vec::new(), Vec::new())
        } else {
            match (collect(&stdout, deadline)?, collect(&stderr, deadline)?) {
                (Some(stdout), Some(stderr)) => (stdout, stderr),
                _ => {
                    log::warn!(
                        target: "engine::dump",
                        "Output of the dump of {} still open at the deadline",
                        database.name
                    );
                    timed_out = true;
                    (Vec::new(), Vec::new())
                }
            }
        };

        let stdout = String::from_utf8(stdout)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let stderr = String::from_utf8_lossy(&stderr).into_owned();

        log::debug!(
            target: "engine::dump",
            "Dump of {} exited with {status} ({} bytes)",
            database.name,
            stdout.len()
        );

        Ok(DumpAttempt {
            args,
            stdout,
            stderr,
            status,
            timed_out,
        })
    }
}

fn wait(child: &mut Child, deadline: Option<Instant>) -> io::Result<(ExitStatus, bool)> {
    let Some(deadline) = deadline else {
        return Ok((child.wait()?, false));
    };

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((status, false));
        }
        if Instant::now() >= deadline {
            log::warn!(target: "engine::dump", "Dump exceeded its timeout, killing it");
            child.kill()?;
            return Ok((child.wait()?, true));
        }
        thread::sleep(WAIT_POLL_INTERVAL);
    }
}

fn read_all(mut pipe: impl Read) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    pipe.read_to_end(&mut buf)?;
    Ok(buf)
}

fn spawn_reader(pipe: impl Read + Send + 'static) -> Receiver<io::Result<Vec<u8>>> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        // the receiver is gone if the dump was abandoned
        let _ = sender.send(read_all(pipe));
    });

    receiver
}

/// Waits for a reader to finish, returns [None] if it is still reading at `deadline`.
fn collect(
    reader: &Receiver<io::Result<Vec<u8>>>,
    deadline: Option<Instant>,
) -> io::Result<Option<Vec<u8>>> {
    let output = match deadline {
        None => reader.recv().map_err(|_| reader_panicked())?,
        Some(deadline) => {
            match reader.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                Ok(output) => output,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(reader_panicked()),
            }
        }
    };

    output.map(Some)
}

fn reader_panicked() -> io::Error {
    io::Error::other("reading the output of the dump tool panicked")
}

fn missing_pipe(name: &str) -> io::Error {
    io::Error::other(format!("{name} of the dump tool isn't captured"))
}

fn masked(args: &[String]) -> Vec<&str> {
    args.iter()
        .map(|arg| if arg.starts_with("-p") { "-p***" } else { arg.as_str() })
        .collect()
}
