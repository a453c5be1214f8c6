// RebelDB™ © 2025 Huly Labs • https://hulylabs.com • SPDX-License-Identifier: MIT
//
// toolchain.rs:

//! Compiling extension sources into loadable artifacts.
//!
//! A [`Toolchain`] only knows how to run one external compiler. Preconditions
//! shared by every toolchain (the source must exist, the output must not) are
//! checked by [`build`], which is the single entry point from source to
//! [`Artifact`].

use crate::error::{BuildError, ToolchainReport};
use smol_str::SmolStr;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

pub trait Toolchain {
    /// File extension of sources this toolchain compiles, without the dot.
    fn source_extension(&self) -> &str;

    /// Compiles `source` into a loadable binary at `output`.
    fn compile(&self, module: &str, source: &Path, output: &Path) -> Result<(), BuildError>;
}

impl<T: Toolchain + ?Sized> Toolchain for Box<T> {
    fn source_extension(&self) -> &str {
        (**self).source_extension()
    }

    fn compile(&self, module: &str, source: &Path, output: &Path) -> Result<(), BuildError> {
        (**self).compile(module, source, output)
    }
}

/// A compiled, loadable binary and the module name it was built for.
#[derive(Debug, Clone)]
pub struct Artifact {
    module: SmolStr,
    path: PathBuf,
}

impl Artifact {
    pub fn new(module: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            module: module.into(),
            path: path.into(),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// File name of the artifact for `module` on this platform.
pub fn artifact_file_name(module: &str) -> String {
    format!("{}{}", module, std::env::consts::DLL_SUFFIX)
}

pub fn build<C>(
    toolchain: &C,
    module: &str,
    source: &Path,
    output: &Path,
) -> Result<Artifact, BuildError>
where
    C: Toolchain + ?Sized,
{
    if !source.is_file() {
        return Err(BuildError::MissingSource(source.to_path_buf()));
    }
    if output.exists() {
        return Err(BuildError::StaleArtifact(output.to_path_buf()));
    }

    toolchain.compile(module, source, output)?;

    if !output.is_file() {
        return Err(BuildError::NoArtifact(output.to_path_buf()));
    }
    info!(module, artifact = %output.display(), "build successful");
    Ok(Artifact::new(module, output))
}

fn command_line(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs `command` to completion, capturing its output. Blocks with no timeout.
fn run(mut command: Command) -> Result<ToolchainReport, BuildError> {
    let line = command_line(&command);
    debug!(command = %line, "invoking toolchain");

    let output = command.output().map_err(|source| BuildError::Spawn {
        command: line.clone(),
        source,
    })?;

    let report = ToolchainReport {
        command: line,
        status: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    if !report.success() {
        return Err(BuildError::Toolchain(report));
    }
    debug!("{}", report);
    Ok(report)
}

/// Builds Rust sources as `cdylib` crates with a bare `rustc` invocation.
#[derive(Debug, Clone)]
pub struct Rustc {
    program: OsString,
    opt_level: String,
    flags: Vec<OsString>,
}

impl Rustc {
    /// Uses `$RUSTC` when set, `rustc` from `PATH` otherwise.
    pub fn new() -> Self {
        Self {
            program: std::env::var_os("RUSTC").unwrap_or_else(|| "rustc".into()),
            opt_level: "2".into(),
            flags: Vec::new(),
        }
    }

    pub fn with_program(mut self, program: impl Into<OsString>) -> Self {
        self.program = program.into();
        self
    }

    pub fn opt_level(mut self, level: &str) -> Self {
        self.opt_level = level.into();
        self
    }

    pub fn flag(mut self, flag: impl Into<OsString>) -> Self {
        self.flags.push(flag.into());
        self
    }
}

impl Default for Rustc {
    fn default() -> Self {
        Self::new()
    }
}

impl Toolchain for Rustc {
    fn source_extension(&self) -> &str {
        "rs"
    }

    fn compile(&self, module: &str, source: &Path, output: &Path) -> Result<(), BuildError> {
        let mut command = Command::new(&self.program);
        command
            .args(["--edition", "2021", "--crate-type", "cdylib", "--crate-name", module])
            .arg("-C")
            .arg(format!("opt-level={}", self.opt_level))
            .args(&self.flags)
            .arg(source)
            .arg("-o")
            .arg(output);
        run(command).map(|_| ())
    }
}

/// Builds C sources into shared objects with the system C compiler.
#[derive(Debug, Clone)]
pub struct Cc {
    program: OsString,
    include_dirs: Vec<PathBuf>,
    flags: Vec<OsString>,
}

impl Cc {
    /// Uses `$CC` when set, `cc` from `PATH` otherwise.
    pub fn new() -> Self {
        Self {
            program: std::env::var_os("CC").unwrap_or_else(|| "cc".into()),
            include_dirs: Vec::new(),
            flags: Vec::new(),
        }
    }

    pub fn with_program(mut self, program: impl Into<OsString>) -> Self {
        self.program = program.into();
        self
    }

    pub fn include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dirs.push(dir.into());
        self
    }

    pub fn flag(mut self, flag: impl Into<OsString>) -> Self {
        self.flags.push(flag.into());
        self
    }
}

impl Default for Cc {
    fn default() -> Self {
        Self::new()
    }
}

impl Toolchain for Cc {
    fn source_extension(&self) -> &str {
        "c"
    }

    fn compile(&self, _module: &str, source: &Path, output: &Path) -> Result<(), BuildError> {
        let mut command = Command::new(&self.program);
        command.arg(source).arg("-o").arg(output);
        command.args(["-shared", "-fPIC", "-O2"]);
        for dir in &self.include_dirs {
            let mut include = OsString::from("-I");
            include.push(dir);
            command.arg(include);
        }
        command.args(&self.flags);
        run(command).map(|_| ())
    }
}
