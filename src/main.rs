use std::env;
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use als_exec::util::shell_join;
use als_exec::{
    default_cache_root, exit_code_for_error, telemetry, Dispatcher, DoctorReport,
    ExecutionEnvironment, ExecutionSettings, PluginDocCache, PluginPathSet,
};

mod cli;

use cli::{CacheCmd, Cli, Command};

fn print_doctor(report: &DoctorReport) {
    eprintln!("als-exec doctor");
    eprintln!("  version: v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "  execution environment: {}",
        if report.enabled { "enabled" } else { "disabled" }
    );
    eprintln!("  engine preference: {}", report.engine_preference);
    match (&report.engine, &report.engine_path) {
        (Some(engine), Some(path)) => eprintln!("  engine: {engine} ({})", path.display()),
        _ => eprintln!(
            "  engine: not found ({})",
            report.engine_error.as_deref().unwrap_or("unknown")
        ),
    }
    if let Some(v) = &report.engine_version {
        eprintln!("  engine --version: {v}");
    }
    eprintln!("  image: {} (pull policy: {})", report.image, report.pull_policy);
    eprintln!(
        "  image present: {}",
        if report.image_present { "yes" } else { "no" }
    );
    if let Some(id) = &report.content_id {
        eprintln!("  image id: {id}");
    }
    eprintln!("  cache root: {}", report.cache_root.display());
    if let Some(base) = &report.cache_base {
        eprintln!(
            "  cache base: {} ({})",
            base.display(),
            if report.cache_populated { "populated" } else { "empty" }
        );
    }
    eprintln!("doctor: completed diagnostics.");
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialize report")?;
    println!("{text}");
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let settings = ExecutionSettings::load(cli.config.as_deref()).context("load settings")?;
    let workspace = match cli.workspace {
        Some(dir) => dir,
        None => env::current_dir().context("determine current directory")?,
    };
    let cache_root = default_cache_root()?;
    let ee = Arc::new(ExecutionEnvironment::new(&workspace, &cache_root));

    match cli.command {
        Command::Run {
            tool,
            args,
            cwd,
            keep_colors,
            timeout,
        } => {
            let mut dispatcher = Dispatcher::new(settings, &workspace, ee);
            if let Some(t) = timeout {
                dispatcher = dispatcher.with_timeout(t);
            }
            let args = shell_join(&args);
            match dispatcher.run_capture(&tool, &args, cwd.as_deref(), keep_colors) {
                Ok(result) => {
                    print!("{}", result.stdout);
                    eprint!("{}", result.stderr);
                    let _ = io::stdout().flush();
                    let code = match result.exit_code {
                        Some(c) => u8::try_from(c).unwrap_or(1),
                        None => 1,
                    };
                    Ok(ExitCode::from(code))
                }
                Err(e) => {
                    if let Some(out) = e.stdout() {
                        print!("{out}");
                    }
                    eprintln!("als-exec: {e}");
                    if let Some(err) = e.stderr().filter(|s| !s.trim().is_empty()) {
                        eprint!("{err}");
                    }
                    Ok(ExitCode::from(exit_code_for_error(&e)))
                }
            }
        }
        Command::Doctor { json } => {
            let report = ee.doctor(&settings);
            if json {
                print_json(&report)?;
            } else {
                print_doctor(&report);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::SyncDocs {
            collections_path,
            module_location,
        } => {
            let reported = PluginPathSet {
                collection_paths: collections_path,
                module_locations: module_location,
            };
            let report = ee
                .initialize(&settings, &reported)
                .with_context(|| {
                    format!(
                        "initialize execution environment '{}'",
                        settings.execution_environment.image
                    )
                })?;
            print_json(&report)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Cache { action } => {
            let cache = PluginDocCache::new(cache_root);
            match action {
                CacheCmd::Path => println!("{}", cache.root().display()),
                CacheCmd::List { json: true } => print_json(&cache.entries()?)?,
                CacheCmd::List { json: false } => {
                    for entry in cache.entries()? {
                        println!(
                            "{}\t{}\t{} files\t{}",
                            entry.image,
                            entry.content_id,
                            entry.files,
                            entry.path.display()
                        );
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::init(cli.verbose);
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("als-exec: {e:#}");
            let code = e
                .downcast_ref::<als_exec::Error>()
                .map(exit_code_for_error)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}
