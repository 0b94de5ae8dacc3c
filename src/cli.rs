//! CLI argument parsing for the lmt-worker binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "lmt-worker", about = "LMT engagement list backend worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the worker server (default if no subcommand given)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Archive the current list and import a spreadsheet in this process
    Import {
        /// CSV, XLSX or XLS file to import
        file: PathBuf,
        /// Identity recorded as the uploader of every imported record
        #[arg(long)]
        uploaded_by: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_migrate_command_parses() {
        let cli = Cli::parse_from(["lmt-worker", "migrate"]);
        assert!(matches!(cli.command, Some(Command::Migrate)));
    }

    #[test]
    fn test_cli_no_command_defaults_to_none() {
        let cli = Cli::parse_from(["lmt-worker"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_import_command_parses() {
        let cli = Cli::parse_from(["lmt-worker", "import", "list.xlsx", "--uploaded-by", "admin-1"]);
        match cli.command {
            Some(Command::Import { file, uploaded_by }) => {
                assert_eq!(file, PathBuf::from("list.xlsx"));
                assert_eq!(uploaded_by, "admin-1");
            }
            _ => panic!("expected import command"),
        }
    }

    #[test]
    fn test_cli_import_requires_uploader() {
        assert!(Cli::try_parse_from(["lmt-worker", "import", "list.csv"]).is_err());
    }
}
