//! Persistence of successful database dumps.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;

const MAX_NAME_SUFFIX: u32 = 1000;

/// Receiver of successful database dumps.
pub trait BackupSink {
    /// Durably stores `dump` as backup of `database_name`.
    fn write_backup_file(&mut self, database_name: &str, dump: &str) -> io::Result<()>;
}

/// Writes every dump to its own timestamped file below a backup root.
///
/// Dumps of a database `shop` are stored as `<backup_root>/shop/shop-<timestamp>.sql`.
/// Existing files are never overwritten, a numeric suffix is appended instead.
#[derive(Debug, Clone)]
pub struct FileSink {
    backup_root: PathBuf,
}

impl FileSink {
    pub fn new(backup_root: &Path) -> Self {
        if backup_root.is_relative() {
            log::warn!(target: "storage", "backup_root is relative: {}", backup_root.display());
        }

        Self {
            backup_root: backup_root.to_path_buf(),
        }
    }

    fn database_dir(&self, database_name: &str) -> PathBuf {
        self.backup_root.join(database_name)
    }

    fn generate_backup_stem(database_name: &str) -> String {
        let timestamp = Local::now().format("%Y-%m-%dT%H-%M-%S%.3f");

        format!("{database_name}-{timestamp}")
    }
}

/// Creates `<stem>.sql` in `dir`, or `<stem>-<n>.sql` with the first free `n`.
fn create_new_backup_file(dir: &Path, stem: &str) -> io::Result<(PathBuf, File)> {
    for n in 0..MAX_NAME_SUFFIX {
        let path = if n == 0 {
            dir.join(format!("{stem}.sql"))
        } else {
            dir.join(format!("{stem}-{n}.sql"))
        };

        match File::create_new(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free backup file name for {stem}"),
    ))
}

impl BackupSink for FileSink {
    fn write_backup_file(&mut self, database_name: &str, dump: &str) -> io::Result<()> {
        let database_dir = self.database_dir(database_name);
        fs::create_dir_all(&database_dir)?;

        let stem = Self::generate_backup_stem(database_name);
        let (backup_file, mut file) = create_new_backup_file(&database_dir, &stem)?;
        log::debug!(target: "storage", "Save dump of {database_name} at: {}", backup_file.display());

        file.write_all(dump.as_bytes())?;
        file.sync_all()?;

        Ok(())
    }
}

/// Discards every dump, used on a dry run.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSink;

impl BackupSink for DiscardSink {
    fn write_backup_file(&mut self, database_name: &str, dump: &str) -> io::Result<()> {
        log::trace!(
            target: "storage",
            "Discarding dump of {database_name} ({} bytes) on dry-run",
            dump.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_dump_below_database_folder() {
        let root = tempfile::tempdir().unwrap();
        let mut sink = FileSink::new(root.path());

        sink.write_backup_file("shop", "CREATE DATABASE shop;\n").unwrap();

        let files: Vec<_> = fs::read_dir(root.path().join("shop"))
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);

        let file_name = files[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(file_name.starts_with("shop-"));
        assert!(file_name.ends_with(".sql"));
        assert_eq!(fs::read_to_string(&files[0]).unwrap(), "CREATE DATABASE shop;\n");
    }

    #[test]
    fn never_overwrites_an_existing_backup() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("shop-2024-01-01T02-30-00.000.sql"), "old").unwrap();

        let (path, _) = create_new_backup_file(dir.path(), "shop-2024-01-01T02-30-00.000").unwrap();
        assert_eq!(path, dir.path().join("shop-2024-01-01T02-30-00.000-1.sql"));
        assert_eq!(
            fs::read_to_string(dir.path().join("shop-2024-01-01T02-30-00.000.sql")).unwrap(),
            "old"
        );

        let (path, _) = create_new_backup_file(dir.path(), "shop-2024-01-01T02-30-00.000").unwrap();
        assert_eq!(path, dir.path().join("shop-2024-01-01T02-30-00.000-2.sql"));
    }

    #[test]
    fn back_to_back_backups_are_all_kept() {
        let root = tempfile::tempdir().unwrap();
        let mut sink = FileSink::new(root.path());

        for dump in ["first", "second", "third"] {
            sink.write_backup_file("shop", dump).unwrap();
        }

        let mut dumps: Vec<_> = fs::read_dir(root.path().join("shop"))
            .unwrap()
            .map(|entry| fs::read_to_string(entry.unwrap().path()).unwrap())
            .collect();
        dumps.sort();
        assert_eq!(dumps, ["first", "second", "third"]);
    }

    #[test]
    fn discard_sink_accepts_everything() {
        assert!(DiscardSink.write_backup_file("shop", "dump").is_ok());
    }
}
