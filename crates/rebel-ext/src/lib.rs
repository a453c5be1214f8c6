// RebelDB™ © 2025 Huly Labs • https://hulylabs.com • SPDX-License-Identifier: MIT

//! Build native extension modules at run time and bind them into a host runtime.
//!
//! The pipeline is split into explicit stages: a [`toolchain::Toolchain`] turns a
//! source file into an [`toolchain::Artifact`], the [`runtime::Runtime`] binds the
//! artifact as a named module, and functions are then called by their registered
//! name. [`loader::ModuleLoader`] drives the stages and owns the files it creates.

pub mod abi;
pub mod error;
pub mod loader;
pub mod runtime;
pub mod toolchain;
pub mod value;


pub use error::{BuildError, CallError, Error, LoadError};
pub use loader::{ModuleLoader, Stage};
pub use runtime::{ExtModule, Runtime};
pub use toolchain::{Artifact, Cc, Rustc, Toolchain};
pub use value::Value;
