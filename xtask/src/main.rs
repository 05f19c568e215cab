//! Build helpers for the lathist workspace
//!
//! `cargo xtask build-ebpf` compiles `lathist-ebpf` for the BPF target. The
//! object ends up at `target/<target>/release/lathist`, which is where the
//! `lathist` binary looks by default (`--bpf-object` overrides it).

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::Command;

const EBPF_PACKAGE: &str = "lathist-ebpf";
const EBPF_BINARY: &str = "lathist";

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Parser)]
enum Cmd {
    /// Build the eBPF object
    BuildEbpf {
        #[arg(long, default_value = "bpfel-unknown-none")]
        target: String,
        /// Also copy the object here (e.g. /usr/lib/lathist/lathist.bpf.o)
        #[arg(long, value_name = "PATH")]
        install: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Cmd::BuildEbpf { target, install } => {
            let object = build_ebpf(&target)?;
            if let Some(dest) = install {
                install_object(&object, &dest)?;
            }
        }
    }

    Ok(())
}

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..")
}

fn build_ebpf(target: &str) -> Result<PathBuf> {
    // Always release: debug builds with recent nightlies pull in formatting
    // code (LowerHex) the BPF linker rejects. LTO strips it.
    let status = Command::new("cargo")
        .current_dir(workspace_root())
        .args(["+nightly", "build", "--package", EBPF_PACKAGE, "--target", target])
        .args(["-Z", "build-std=core", "--release"])
        .status()
        .context("Failed to run cargo for the eBPF build")?;

    if !status.success() {
        bail!("Failed to build eBPF program");
    }

    let object = workspace_root().join("target").join(target).join("release").join(EBPF_BINARY);
    println!("✓ eBPF program built successfully");
    println!("  Object: {}", object.display());

    Ok(object)
}

fn install_object(object: &Path, dest: &Path) -> Result<()> {
    if let Some(dir) = dest.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    std::fs::copy(object, dest)
        .with_context(|| format!("Failed to copy {} to {}", object.display(), dest.display()))?;
    println!("✓ Installed to {}", dest.display());
    println!("  Use with: lathist --bpf-object {} ...", dest.display());
    Ok(())
}
