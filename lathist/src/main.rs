//! # lathist - Main Entry Point
//!
//! Subcommands:
//! - **trace** `NAME [bits N] [start SYM] [end SYM]`: create and pin a trace
//! - **remove** `NAME`: detach a trace and delete its histogram
//! - **read** `NAME [--json] [--watch SECS]`: print the histogram
//! - **list**: print trace names

use std::io::ErrorKind;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use lathist::backend::{AyaRegistrar, BpfFs};
use lathist::cli::{parse_trace_options, Args, Command, UsageError};
use lathist::domain::TraceError;
use lathist::lifecycle::TraceManager;
use lathist::preflight::run_preflight_checks;
use lathist::report::Report;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<UsageError>().is_some() {
        return EXIT_USAGE;
    }
    match err.downcast_ref::<TraceError>() {
        Some(e) if e.is_config_error() => return EXIT_USAGE,
        Some(TraceError::Io(e)) if e.kind() == ErrorKind::PermissionDenied => return EXIT_NOPERM,
        _ => {}
    }
    let msg = err.to_string().to_lowercase();
    if msg.contains("permission denied") || msg.contains("requires root") {
        EXIT_NOPERM
    } else {
        EXIT_ERROR
    }
}

type Manager = TraceManager<AyaRegistrar, BpfFs>;

/// Preflight, then wire the aya registrar to the bpffs store
fn open_manager(args: &Args) -> Result<Manager> {
    run_preflight_checks(&args.pin_root, args.quiet)?;
    Ok(TraceManager::new(AyaRegistrar::new(&args.bpf_object), BpfFs::new(&args.pin_root)))
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;

    match &args.command {
        Command::Trace { name, options } => {
            // Usage errors come before any system check
            let spec = parse_trace_options(name, options)?;
            let mut manager = open_manager(&args)?;
            manager.store().ensure_root().context("Failed to create pin root")?;
            let trace = manager.create(&spec)?;
            if !quiet {
                println!(
                    "Tracing {} -> {} as '{}' ({} slots, frac_bits {})",
                    trace.start, trace.end, trace.name, trace.n_slots, trace.frac_bits
                );
            }
        }
        Command::Remove { name } => {
            let outcome = open_manager(&args)?.remove(name)?;
            if !outcome.is_clean() {
                let failed: Vec<String> = outcome.failed.iter().map(ToString::to_string).collect();
                warn!("Trace {} removed, but could not release: {}", outcome.name, failed.join(", "));
            }
            info!("✓ Removed trace {}", outcome.name);
        }
        Command::List => {
            for name in open_manager(&args)?.list()? {
                println!("{}", name?);
            }
        }
        Command::Read { name, json, watch } => {
            let manager = open_manager(&args)?;
            match watch {
                None => print_report(&manager.read(name)?, *json)?,
                Some(secs) => watch_trace(&manager, name, *json, (*secs).max(1)).await?,
            }
        }
    }

    Ok(())
}

fn print_report(report: &Report, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}

/// Re-read `name` every `secs` seconds until Ctrl+C or until it disappears
async fn watch_trace(manager: &Manager, name: &str, json: bool, secs: u64) -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        print_report(&manager.read(name)?, json)?;
        println!();

        tokio::select! {
            () = tokio::time::sleep(Duration::from_secs(secs)) => {}
            _ = &mut ctrl_c => {
                break;
            }
        }
    }

    Ok(())
}
