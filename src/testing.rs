//! Helpers shared by the unit tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tempfile::TempDir;

use crate::config::DatabaseDescriptor;
use crate::engine::DumpTool;

/// Serializes tests writing or spawning executables.
///
/// A script that is still open for writing in one test can't be executed by another (ETXTBSY).
static PROCESS_LOCK: Mutex<()> = Mutex::new(());

pub fn process_lock() -> MutexGuard<'static, ()> {
    PROCESS_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn descriptor(name: &str, start_time: &str) -> DatabaseDescriptor {
    DatabaseDescriptor {
        name: name.to_string(),
        host: "db.example.org".to_string(),
        user: "backup".to_string(),
        password: "hunter2".to_string(),
        start_time: start_time.parse().unwrap(),
    }
}

/// Shell script standing in for `mysqldump`.
///
/// Prints fixed stdout and stderr, exits with a fixed code and records its arguments,
/// one invocation per line.
pub struct FakeDumpTool {
    dir: TempDir,
    _lock: MutexGuard<'static, ()>,
}

impl FakeDumpTool {
    pub fn new(stdout: &str, stderr: &str, exit_code: i32) -> Self {
        let lock = process_lock();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stdout"), stdout).unwrap();
        fs::write(dir.path().join("stderr"), stderr).unwrap();

        let dir_path = dir.path().display();
        let script = format!(
            "#!/bin/sh\n\
             printf '%s\\n' \"$*\" >> \"{dir_path}/invocations\"\n\
             cat \"{dir_path}/stdout\"\n\
             cat \"{dir_path}/stderr\" >&2\n\
             exit {exit_code}\n"
        );
        write_script(dir.path(), &script);

        Self { dir, _lock: lock }
    }

    /// A dump tool that never finishes on its own.
    pub fn hanging() -> Self {
        Self::wrapping("exec sleep 600")
    }

    /// A dump tool running `body` as shell script.
    pub fn wrapping(body: &str) -> Self {
        let lock = process_lock();
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), &format!("#!/bin/sh\n{body}\n"));

        Self { dir, _lock: lock }
    }

    pub fn program(&self) -> PathBuf {
        self.dir.path().join("mysqldump")
    }

    pub fn tool(&self) -> DumpTool {
        DumpTool::with_program(self.program())
    }

    /// Arguments of every invocation so far.
    pub fn invocations(&self) -> Vec<String> {
        fs::read_to_string(self.dir.path().join("invocations"))
            .map(|log| log.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

#[cfg(unix)]
fn write_script(dir: &Path, script: &str) {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("mysqldump");
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
}

#[cfg(not(unix))]
fn write_script(dir: &Path, script: &str) {
    fs::write(dir.join("mysqldump"), script).unwrap();
}
