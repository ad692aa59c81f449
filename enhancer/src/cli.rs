//! CLI argument definitions for the bytecode enhancer.
//!
//! This module defines the command-line interface using clap. It is separated
//! from the main entrypoint to keep the binary small and focused on
//! orchestration.

use crate::project::PROJECT_FILENAME;
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

/// Enhance persistence classes module by module.
#[derive(Parser, Debug)]
#[command(name = "bytecode-enhancer")]
#[command(version, about)]
#[command(long_about = concat!(
    "Enhance JDO/JPA persistence classes module by module.\n\n",
    "Reads a project file describing the build's modules, discovers persistence ",
    "metadata files and annotated class files in each module's output directories, ",
    "and runs the configured enhancer once per module against a classpath built for ",
    "that module alone.\n\n",
    "Class files enhanced by a fully successful pass are fingerprinted; later passes ",
    "only resubmit classes whose fingerprint changed. Use --full to ignore the ",
    "recorded fingerprints.",
))]
#[command(after_help = concat!(
    "EXAMPLES:\n",
    "  Enhance changed classes of the project in the current directory:\n",
    "    $ bytecode-enhancer\n\n",
    "  Re-enhance every class:\n",
    "    $ bytecode-enhancer --full\n\n",
    "  Show what would be enhanced:\n",
    "    $ bytecode-enhancer --dry-run\n\n",
    "  List discovered classes per module:\n",
    "    $ bytecode-enhancer list -p shop/enhancer.toml\n",
))]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Enhance arguments (used when no subcommand is given).
    #[command(flatten)]
    pub enhance: EnhanceArgs,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Enhance changed classes (default when no subcommand given).
    Enhance(EnhanceArgs),

    /// List discovered classes and whether they changed.
    List(ListArgs),
}

/// Arguments for the enhance command.
#[derive(Parser, Debug, Clone)]
pub struct EnhanceArgs {
    /// Project file describing the modules.
    #[arg(short, long, value_name = "FILE", default_value = PROJECT_FILENAME)]
    pub project: Utf8PathBuf,

    /// Fingerprint state file [default: .enhancer/fingerprints.json next to
    /// the project file].
    #[arg(short, long, value_name = "FILE")]
    pub state: Option<Utf8PathBuf>,

    /// Ignore recorded fingerprints and enhance every discovered class.
    #[arg(long)]
    pub full: bool,

    /// Show what would be enhanced and exit without running the enhancer.
    #[arg(long)]
    pub dry_run: bool,

    /// Increase output verbosity (repeatable: -v, -vv).
    #[arg(
        short,
        long = "verbose",
        action = clap::ArgAction::Count,
        conflicts_with = "quiet"
    )]
    pub verbosity: u8,

    /// Suppress progress output (warnings and errors still shown).
    #[arg(short, long, conflicts_with = "verbosity")]
    pub quiet: bool,
}

/// Arguments for the list command.
#[derive(Parser, Debug, Clone)]
pub struct ListArgs {
    /// Project file describing the modules.
    #[arg(short, long, value_name = "FILE", default_value = PROJECT_FILENAME)]
    pub project: Utf8PathBuf,

    /// Fingerprint state file [default: .enhancer/fingerprints.json next to
    /// the project file].
    #[arg(short, long, value_name = "FILE")]
    pub state: Option<Utf8PathBuf>,

    /// Output in JSON format for scripting.
    #[arg(long)]
    pub json: bool,
}

impl Default for EnhanceArgs {
    /// Creates arguments for an incremental pass over `enhancer.toml`.
    ///
    /// # Examples
    ///
    /// ```
    /// use bytecode_enhancer::cli::EnhanceArgs;
    ///
    /// let args = EnhanceArgs::default();
    /// assert_eq!(args.project, "enhancer.toml");
    /// assert!(!args.full);
    /// assert!(args.state.is_none());
    /// ```
    fn default() -> Self {
        Self {
            project: Utf8PathBuf::from(PROJECT_FILENAME),
            state: None,
            full: false,
            dry_run: false,
            verbosity: 0,
            quiet: false,
        }
    }
}

impl Default for ListArgs {
    fn default() -> Self {
        Self {
            project: Utf8PathBuf::from(PROJECT_FILENAME),
            state: None,
            json: false,
        }
    }
}

impl Cli {
    /// Returns the effective enhance arguments.
    ///
    /// If an `Enhance` subcommand was provided, returns those arguments.
    /// Otherwise returns the flattened arguments.
    ///
    /// # Note
    ///
    /// When `Command::List` is active, this returns the default flattened
    /// arguments. Callers should check `self.command` first.
    #[must_use]
    pub fn enhance_args(&self) -> &EnhanceArgs {
        match &self.command {
            Some(Command::Enhance(args)) => args,
            Some(Command::List(_)) | None => &self.enhance,
        }
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
