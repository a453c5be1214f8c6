// RebelDB™ © 2025 Huly Labs • https://hulylabs.com • SPDX-License-Identifier: MIT
//
// rebel-hot: build a native extension module at run time, bind it and call it.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::*;
use config::{Config, ConfigError};
use rebel_ext::{Cc, ModuleLoader, Runtime, Rustc, Toolchain};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, Level};

/// Module output goes to stdout; everything the driver has to say goes to stderr.
#[derive(Parser, Debug)]
#[clap(about = "Demonstrate building and loading a native extension module at run time")]
struct Args {
    /// Log every stage, command line and toolchain output
    #[clap(short, long)]
    verbose: bool,
    /// Keep the install directory and artifact on exit
    #[clap(short = 'd', long)]
    no_clean: bool,
    /// Name of the module and of its source file
    #[clap(short = 'n', long, default_value = "mymodule")]
    module_name: String,
    /// Directory holding the module source
    #[clap(short, long)]
    source: Option<PathBuf>,
    /// Directory to install the artifact in, created when missing
    #[clap(short, long)]
    install: Option<PathBuf>,
    #[clap(short, long, value_enum, default_value = "rustc")]
    toolchain: ToolchainKind,
    /// Bind an artifact left over from a previous run instead of failing
    #[clap(long)]
    reuse: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ToolchainKind {
    Rustc,
    Cc,
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::WARN })
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {:#}", "ERROR:".red().bold(), err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    debug!(?args, "argument settings");

    let settings = Config::builder()
        .add_source(config::File::with_name("rebel-hot").required(false))
        .add_source(config::Environment::with_prefix("REBEL_HOT"))
        .build()
        .context("reading settings")?;

    let source_dir = args
        .source
        .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../modules"));
    let install_dir = match args.install {
        Some(dir) => dir,
        None => std::env::current_dir()?.join("bin"),
    };

    let toolchain: Box<dyn Toolchain> = match args.toolchain {
        ToolchainKind::Rustc => {
            let mut rustc = Rustc::new();
            if let Some(program) = optional(&settings, "rustc")? {
                rustc = rustc.with_program(program);
            }
            Box::new(rustc)
        }
        ToolchainKind::Cc => {
            let mut cc = Cc::new().include_dir(&source_dir);
            if let Some(program) = optional(&settings, "cc")? {
                cc = cc.with_program(program);
            }
            Box::new(cc)
        }
    };

    let mut runtime = Runtime::new();
    let mut loader = ModuleLoader::new(&args.module_name, &source_dir, install_dir, toolchain)?
        .clean_on_drop(!args.no_clean)
        .reuse_existing(args.reuse);

    loader.load(&mut runtime)?;
    loader.invoke(&runtime, "hello_world", &[])?;
    loader.invoke(&runtime, "hello_world", &[])?;

    Ok(())
}

fn optional(settings: &Config, key: &str) -> Result<Option<String>> {
    match settings.get_string(key) {
        Ok(value) => Ok(Some(value)),
        Err(ConfigError::NotFound(_)) => Ok(None),
        Err(err) => Err(err.into()),
    }
}
