use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::LevelFilter;

const DEFAULT_CONFIG: &str = "/etc/mysql-backup.toml";

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Verbosity of the command output.
    #[arg(long)]
    pub verbose: Option<LevelFilter>,

    /// Config file listing the databases. A default config is written if it doesn't exist.
    #[arg(long, short = 'c', env = "MYSQL_BACKUP_CONFIG", default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Folder for database backups. Overrides `backup_root` of the config file.
    #[arg(long, short = 'r')]
    pub backup_root: Option<PathBuf>,

    /// Run the dumps but discard their output.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the outcome of every database as JSON.
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub action: Action,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Action {
    /// Periodically back up every database at its scheduled time.
    Run {
        /// Check the schedule a single time instead of polling.
        #[arg(long)]
        once: bool,
    },
    /// Back up a single database right away, regardless of its schedule.
    Backup {
        /// Name of the database as configured.
        database: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run() {
        let cli = Cli::try_parse_from(["mysql-backup", "--config", "backup.toml", "run"]).unwrap();

        assert_eq!(cli.config, PathBuf::from("backup.toml"));
        assert_eq!(cli.action, Action::Run { once: false });
        assert!(!cli.dry_run);
        assert_eq!(cli.verbose, None);
    }

    #[test]
    fn parses_backup_of_single_database() {
        let cli = Cli::try_parse_from([
            "mysql-backup",
            "--verbose",
            "debug",
            "--dry-run",
            "-r",
            "/tmp/backups",
            "backup",
            "shop",
        ])
        .unwrap();

        assert_eq!(cli.verbose, Some(LevelFilter::Debug));
        assert!(cli.dry_run);
        assert_eq!(cli.backup_root, Some(PathBuf::from("/tmp/backups")));
        assert_eq!(
            cli.action,
            Action::Backup {
                database: "shop".to_string()
            }
        );
    }

    #[test]
    fn requires_action() {
        assert!(Cli::try_parse_from(["mysql-backup"]).is_err());
    }
}
