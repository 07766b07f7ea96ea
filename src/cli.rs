use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ConfigOverrides;

/// A concurrent NZB downloader for Usenet
#[derive(Parser, Debug)]
#[command(name = "nzbfetch")]
#[command(version, about, long_about = None)]
#[command(after_help = "EXAMPLES:
    # Download an NZB file
    nzbfetch download file.nzb

    # Download into a specific directory
    nzbfetch download file.nzb -o /path/to/downloads

    # Inspect an NZB without downloading
    nzbfetch info file.nzb")]
pub struct Cli {
    /// Verbose output (repeat for more)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short = 'q', long = "quiet", global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download all files referenced by an NZB
    Download {
        /// Path to the NZB file
        #[arg(value_name = "NZB_FILE")]
        nzb_file: PathBuf,

        /// Output directory (overrides config)
        #[arg(short = 'o', long = "output-dir", value_name = "DIR")]
        output: Option<PathBuf>,

        /// Connections per server (overrides config)
        #[arg(short = 'c', long, value_name = "NUM")]
        connections: Option<u16>,
    },

    /// Parse and display information about an NZB file
    Info {
        /// Path to the NZB file
        #[arg(value_name = "NZB_FILE")]
        nzb_file: PathBuf,
    },
}

impl Cli {
    /// Effective log level derived from the verbosity flags.
    pub fn log_level(&self) -> &str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    pub fn config_overrides(&self) -> ConfigOverrides {
        match &self.command {
            Commands::Download {
                output,
                connections,
                ..
            } => ConfigOverrides {
                output_dir: output.clone(),
                connections: *connections,
                log_level: None,
            },
            Commands::Info { .. } => ConfigOverrides::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_download() {
        let cli = Cli::try_parse_from(["nzbfetch", "download", "file.nzb", "-c", "8"]).unwrap();
        match cli.command {
            Commands::Download {
                nzb_file,
                connections,
                ..
            } => {
                assert_eq!(nzb_file, PathBuf::from("file.nzb"));
                assert_eq!(connections, Some(8));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_log_level_from_flags() {
        let cli = Cli::try_parse_from(["nzbfetch", "-vv", "info", "file.nzb"]).unwrap();
        assert_eq!(cli.log_level(), "trace");

        let cli = Cli::try_parse_from(["nzbfetch", "-q", "info", "file.nzb"]).unwrap();
        assert_eq!(cli.log_level(), "error");
    }
}
