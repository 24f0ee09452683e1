use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s).map_err(|e| format!("invalid duration '{s}': {e}"))
}

#[derive(Parser, Debug)]
#[command(
    name = "als-exec",
    version,
    about = "Run Ansible tooling on the host or inside an execution environment image."
)]
pub(crate) struct Cli {
    /// YAML settings file (same keys as the language server settings)
    #[arg(long, global = true)]
    pub(crate) config: Option<PathBuf>,

    /// Workspace root; default working directory for dispatched tools
    #[arg(long, global = true)]
    pub(crate) workspace: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub(crate) verbose: u8,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum Command {
    /// Dispatch a tool and echo its output; exits with the tool's exit code
    Run {
        /// Tool name (e.g. ansible-config, ansible-lint)
        tool: String,
        /// Arguments passed through to the tool
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Working directory (defaults to the workspace root)
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Do not force color-disabling variables
        #[arg(long = "keep-colors")]
        keep_colors: bool,
        /// Per-process timeout, e.g. 45s or 2m (0s waits indefinitely)
        #[arg(long, value_parser = parse_duration)]
        timeout: Option<Duration>,
    },
    /// Report engine, image and cache status without pulling or starting containers
    Doctor {
        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Prepare the execution environment and cache plugin docs for the given paths
    SyncDocs {
        /// Collection path as reported inside the image (repeatable, ordered)
        #[arg(long = "collections-path")]
        collections_path: Vec<String>,
        /// Module location as reported inside the image (repeatable, ordered)
        #[arg(long = "module-location")]
        module_location: Vec<String>,
    },
    /// Inspect the host plugin doc cache
    Cache {
        #[command(subcommand)]
        action: CacheCmd,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub(crate) enum CacheCmd {
    /// List populated cache entries
    List {
        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the cache root directory
    Path,
}
