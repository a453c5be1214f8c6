// RebelDB™ © 2025 Huly Labs • https://hulylabs.com • SPDX-License-Identifier: MIT
//
// error.rs:

use smol_str::SmolStr;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Every failure is fatal to a run; the three kinds map to the stage that failed.
#[derive(Debug, Error)]
pub enum Error {
    #[error("build failed")]
    Build(#[from] BuildError),
    #[error("load failed")]
    Load(#[from] LoadError),
    #[error("call failed")]
    Call(#[from] CallError),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("source file {} does not exist", .0.display())]
    MissingSource(PathBuf),
    #[error("install path {} already exists and is not a directory", .0.display())]
    InstallPathNotDir(PathBuf),
    #[error("artifact {} already exists, refusing to build over it", .0.display())]
    StaleArtifact(PathBuf),
    #[error("failed to run `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Toolchain(ToolchainReport),
    #[error("toolchain reported success but produced no artifact at {}", .0.display())]
    NoArtifact(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid module name `{0}`")]
    InvalidName(String),
    #[error("module `{0}` is already bound")]
    AlreadyBound(SmolStr),
    #[error("cannot open {}: {message}", .path.display())]
    Open { path: PathBuf, message: String },
    #[error("{} does not export `{symbol}`", .path.display())]
    MissingEntryPoint { path: PathBuf, symbol: String },
    #[error("initialization of module `{0}` returned no descriptor")]
    InitFailed(SmolStr),
    #[error("ABI version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("module bound as `{requested}` declares itself as `{declared}`")]
    NameMismatch { requested: SmolStr, declared: String },
    #[error("malformed descriptor for module `{module}`: {reason}")]
    Malformed { module: SmolStr, reason: String },
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("module `{0}` is not bound")]
    ModuleNotFound(SmolStr),
    #[error("module `{module}` has no function `{name}`")]
    FunctionNotFound { module: SmolStr, name: SmolStr },
    #[error("`{name}` takes {expected} arguments but {given} were given")]
    Arity {
        name: SmolStr,
        expected: usize,
        given: usize,
    },
}

/// Outcome of a toolchain run: the command line and everything it printed.
#[derive(Debug, Clone)]
pub struct ToolchainReport {
    pub command: String,
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolchainReport {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

impl fmt::Display for ToolchainReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = if self.success() { "successful" } else { "failed" };
        match self.status {
            Some(code) => writeln!(f, "execution of `{}` {} with status {}", self.command, outcome, code)?,
            None => writeln!(f, "execution of `{}` terminated by signal", self.command)?,
        }
        writeln!(f, "  stdout:")?;
        write_indented(f, &self.stdout, "    ")?;
        writeln!(f, "  stderr:")?;
        write_indented(f, &self.stderr, "    ")
    }
}

fn write_indented(f: &mut fmt::Formatter<'_>, text: &str, indent: &str) -> fmt::Result {
    for line in text.lines() {
        writeln!(f, "{indent}{line}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Renders an error with its sources the way the CLI reports it.
    fn chain(err: &dyn std::error::Error) -> String {
        let mut text = err.to_string();
        let mut source = err.source();
        while let Some(err) = source {
            text.push_str(": ");
            text.push_str(&err.to_string());
            source = err.source();
        }
        text
    }

    #[test]
    fn test_report_keeps_output_verbatim() {
        let report = ToolchainReport {
            command: "rustc broken.rs".into(),
            status: Some(1),
            stdout: String::new(),
            stderr: "error[E0425]: cannot find value `x`\n --> broken.rs:1:1\n".into(),
        };
        let text = chain(&Error::from(BuildError::Toolchain(report)));
        assert!(text.starts_with("build failed: execution of `rustc broken.rs` failed with status 1"));
        assert!(text.contains("    error[E0425]: cannot find value `x`\n"));
        assert!(text.contains("     --> broken.rs:1:1\n"));
    }

    #[test]
    fn test_stage_prefixes() {
        let load = Error::from(LoadError::AlreadyBound("mymodule".into()));
        assert_eq!(load.to_string(), "load failed");
        assert_eq!(chain(&load), "load failed: module `mymodule` is already bound");

        let call = Error::from(CallError::Arity {
            name: "hello_world".into(),
            expected: 0,
            given: 2,
        });
        assert_eq!(
            chain(&call),
            "call failed: `hello_world` takes 0 arguments but 2 were given"
        );
    }

    #[test]
    fn test_spawn_error_names_command() {
        let err = Error::from(BuildError::Spawn {
            command: "cc mymodule.c".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        });
        assert_eq!(chain(&err), "build failed: failed to run `cc mymodule.c`: no such file");
    }
}
