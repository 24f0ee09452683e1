//! Logging initialisation.
//!
//! Filter precedence: `ALS_EXEC_LOG`, then `RUST_LOG`, then a default derived
//! from the CLI verbosity. Output goes to stderr so it never mixes with
//! captured tool stdout echoed by the CLI.
use std::env;

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static INIT: OnceCell<()> = OnceCell::new();

fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

fn filter_from_env(verbosity: u8) -> EnvFilter {
    for var in ["ALS_EXEC_LOG", "RUST_LOG"] {
        if let Ok(v) = env::var(var) {
            if !v.trim().is_empty() {
                if let Ok(f) = EnvFilter::try_new(v.trim()) {
                    return f;
                }
                eprintln!("als-exec: ignoring invalid {var}='{v}'");
            }
        }
    }
    EnvFilter::new(default_directive(verbosity))
}

/// Install the global subscriber once; later calls are no-ops.
pub fn init(verbosity: u8) {
    INIT.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter_from_env(verbosity))
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    });
}
