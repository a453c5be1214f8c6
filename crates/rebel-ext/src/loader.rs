// RebelDB™ © 2025 Huly Labs • https://hulylabs.com • SPDX-License-Identifier: MIT
//
// loader.rs:

//! Drives one module through build, bind and invoke, and cleans up after it.

use crate::abi;
use crate::error::{BuildError, Error, LoadError};
use crate::runtime::{ExtModule, Runtime};
use crate::toolchain::{self, artifact_file_name, Artifact, Toolchain};
use crate::value::Value;
use smol_str::SmolStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a [`ModuleLoader`] is in the build-and-load pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Unbuilt,
    Compiled,
    Loaded,
    Invoked,
}

pub struct ModuleLoader {
    name: SmolStr,
    source: PathBuf,
    install_dir: PathBuf,
    artifact_path: PathBuf,
    toolchain: Box<dyn Toolchain>,
    clean_on_drop: bool,
    reuse_existing: bool,
    stage: Stage,
    module: Option<Arc<ExtModule>>,
    // Paths this loader created, removed by `cleanup`.
    created: Vec<PathBuf>,
}

impl ModuleLoader {
    /// The source is `<source_dir>/<name>.<ext>` with the extension picked by
    /// the toolchain; the artifact goes to `<install_dir>/<name><dll suffix>`.
    pub fn new(
        name: &str,
        source_dir: impl AsRef<Path>,
        install_dir: impl Into<PathBuf>,
        toolchain: impl Toolchain + 'static,
    ) -> Result<Self, Error> {
        if !abi::is_valid_module_name(name) {
            return Err(LoadError::InvalidName(name.to_string()).into());
        }
        let source = source_dir
            .as_ref()
            .join(format!("{}.{}", name, toolchain.source_extension()));
        let install_dir = install_dir.into();
        let artifact_path = install_dir.join(artifact_file_name(name));

        if artifact_path.is_file() {
            debug!(artifact = %artifact_path.display(), "detected previous build");
        }

        Ok(Self {
            name: name.into(),
            source,
            install_dir,
            artifact_path,
            toolchain: Box::new(toolchain),
            clean_on_drop: true,
            reuse_existing: false,
            stage: Stage::Unbuilt,
            module: None,
            created: Vec::new(),
        })
    }

    /// Remove created files when the loader is dropped. On by default.
    pub fn clean_on_drop(mut self, clean: bool) -> Self {
        self.clean_on_drop = clean;
        self
    }

    /// Bind an artifact already present at the output path instead of failing.
    pub fn reuse_existing(mut self, reuse: bool) -> Self {
        self.reuse_existing = reuse;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Builds the module if needed and binds it into `runtime`. Calling it
    /// again returns the existing binding without rebuilding.
    pub fn load(&mut self, runtime: &mut Runtime) -> Result<Arc<ExtModule>, Error> {
        if let Some(module) = &self.module {
            debug!(module = %self.name, "module already bound");
            return Ok(module.clone());
        }

        let artifact = if self.reuse_existing && self.artifact_path.is_file() {
            debug!(artifact = %self.artifact_path.display(), "reusing previous build");
            Artifact::new(&self.name, &self.artifact_path)
        } else {
            self.build()?
        };
        self.stage = Stage::Compiled;

        let module = runtime.bind_artifact(&artifact)?;
        self.stage = Stage::Loaded;
        self.module = Some(module.clone());
        Ok(module)
    }

    /// Calls `function` on the bound module through the runtime.
    pub fn invoke(
        &mut self,
        runtime: &Runtime,
        function: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        let value = runtime.call(&self.name, function, args)?;
        self.stage = Stage::Invoked;
        Ok(value)
    }

    pub fn build(&mut self) -> Result<Artifact, BuildError> {
        self.prepare_install_dir()?;
        debug!(
            module = %self.name,
            source = %self.source.display(),
            artifact = %self.artifact_path.display(),
            "building module"
        );
        let artifact = toolchain::build(
            self.toolchain.as_ref(),
            &self.name,
            &self.source,
            &self.artifact_path,
        )?;
        self.created.push(self.artifact_path.clone());
        Ok(artifact)
    }

    fn prepare_install_dir(&mut self) -> Result<(), BuildError> {
        if self.install_dir.exists() {
            if !self.install_dir.is_dir() {
                return Err(BuildError::InstallPathNotDir(self.install_dir.clone()));
            }
            debug!(dir = %self.install_dir.display(), "using existing install directory");
            return Ok(());
        }

        let missing: Vec<PathBuf> = self
            .install_dir
            .ancestors()
            .take_while(|dir| !dir.as_os_str().is_empty() && !dir.exists())
            .map(Path::to_path_buf)
            .collect();
        debug!(dir = %self.install_dir.display(), "creating install directory");
        fs::create_dir_all(&self.install_dir)?;
        self.created.extend(missing);
        Ok(())
    }

    /// Removes every file and directory this loader created, deepest first.
    /// Directories holding anything else are left in place.
    pub fn cleanup(&mut self) {
        self.created.sort_unstable_by(|a, b| b.cmp(a));

        for path in self.created.drain(..) {
            if path.is_dir() {
                match fs::read_dir(&path).map(|mut entries| entries.next().is_none()) {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(dir = %path.display(), "not removing non-empty directory");
                        continue;
                    }
                    Err(err) => {
                        warn!(dir = %path.display(), %err, "cannot inspect directory");
                        continue;
                    }
                }
                debug!(dir = %path.display(), "removing");
                if let Err(err) = fs::remove_dir(&path) {
                    warn!(dir = %path.display(), %err, "failed to remove directory");
                }
            } else if path.is_file() {
                debug!(file = %path.display(), "removing");
                if let Err(err) = fs::remove_file(&path) {
                    warn!(file = %path.display(), %err, "failed to remove file");
                }
            } else {
                debug!(path = %path.display(), "already gone");
            }
        }
    }
}

impl Drop for ModuleLoader {
    fn drop(&mut self) {
        if self.clean_on_drop {
            self.cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::tests::StubToolchain;

    fn source_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("mymodule.rs"), "").unwrap();
        dir
    }

    #[test]
    fn test_invalid_name_rejected_up_front() {
        let result = ModuleLoader::new("../mymodule", ".", "bin", StubToolchain::failing());
        assert!(matches!(result, Err(Error::Load(LoadError::InvalidName(_)))));
    }

    #[test]
    fn test_paths() {
        let loader =
            ModuleLoader::new("mymodule", "/src", "/opt/bin", StubToolchain::failing()).unwrap();
        assert_eq!(loader.source(), Path::new("/src/mymodule.rs"));
        assert_eq!(
            loader.artifact_path(),
            Path::new("/opt/bin").join(artifact_file_name("mymodule"))
        );
        assert_eq!(loader.stage(), Stage::Unbuilt);
    }

    #[test]
    fn test_build_failure_stops_before_load() {
        let source = source_dir();
        let install = tempfile::tempdir().unwrap();
        let mut runtime = Runtime::new();

        let mut loader = ModuleLoader::new(
            "mymodule",
            source.path(),
            install.path().join("bin"),
            StubToolchain::failing(),
        )
        .unwrap();
        let result = loader.load(&mut runtime);

        assert!(matches!(result, Err(Error::Build(BuildError::Toolchain(_)))));
        assert_eq!(loader.stage(), Stage::Unbuilt);
        assert!(runtime.modules().is_empty());
    }

    #[test]
    fn test_missing_source_stops_before_load() {
        let empty = tempfile::tempdir().unwrap();
        let install = tempfile::tempdir().unwrap();
        let mut runtime = Runtime::new();

        let mut loader = ModuleLoader::new(
            "mymodule",
            empty.path(),
            install.path(),
            StubToolchain::writing(b"ELF"),
        )
        .unwrap();
        let result = loader.load(&mut runtime);

        assert!(matches!(result, Err(Error::Build(BuildError::MissingSource(_)))));
        assert!(runtime.modules().is_empty());
    }

    #[test]
    fn test_unloadable_artifact_is_load_failure() {
        let source = source_dir();
        let install = tempfile::tempdir().unwrap();
        let mut runtime = Runtime::new();

        let mut loader = ModuleLoader::new(
            "mymodule",
            source.path(),
            install.path(),
            StubToolchain::writing(b"definitely not ELF"),
        )
        .unwrap();
        let result = loader.load(&mut runtime);

        assert!(matches!(result, Err(Error::Load(LoadError::Open { .. }))));
        assert_eq!(loader.stage(), Stage::Compiled);
    }

    #[test]
    fn test_install_path_must_be_directory() {
        let source = source_dir();
        let install = tempfile::tempdir().unwrap();
        let file = install.path().join("bin");
        fs::write(&file, "").unwrap();

        let mut loader =
            ModuleLoader::new("mymodule", source.path(), &file, StubToolchain::writing(b"ELF"))
                .unwrap();
        assert!(matches!(loader.build(), Err(BuildError::InstallPathNotDir(_))));
    }

    #[test]
    fn test_stale_artifact_fails_unless_reused() {
        let source = source_dir();
        let install = tempfile::tempdir().unwrap();
        let stale = install.path().join(artifact_file_name("mymodule"));
        fs::write(&stale, "stale").unwrap();

        let mut runtime = Runtime::new();
        let mut loader = ModuleLoader::new(
            "mymodule",
            source.path(),
            install.path(),
            StubToolchain::writing(b"fresh"),
        )
        .unwrap();
        assert!(matches!(
            loader.load(&mut runtime),
            Err(Error::Build(BuildError::StaleArtifact(_)))
        ));
        assert_eq!(fs::read_to_string(&stale).unwrap(), "stale");

        // Reuse goes straight to binding; the stale bytes are not a library.
        let mut loader = ModuleLoader::new(
            "mymodule",
            source.path(),
            install.path(),
            StubToolchain::failing(),
        )
        .unwrap()
        .reuse_existing(true);
        assert!(matches!(
            loader.load(&mut runtime),
            Err(Error::Load(LoadError::Open { .. }))
        ));
        drop(loader);
        assert!(stale.exists(), "cleanup must not touch files it did not create");
    }

    #[test]
    fn test_cleanup_removes_created_tree() {
        let source = source_dir();
        let root = tempfile::tempdir().unwrap();
        let install = root.path().join("nested").join("bin");

        let mut loader = ModuleLoader::new(
            "mymodule",
            source.path(),
            &install,
            StubToolchain::writing(b"ELF"),
        )
        .unwrap();
        let artifact = loader.build().unwrap();
        assert!(artifact.path().is_file());

        drop(loader);
        assert!(!install.exists());
        assert!(!root.path().join("nested").exists());
        assert!(root.path().exists());
    }

    #[test]
    fn test_cleanup_keeps_foreign_files() {
        let source = source_dir();
        let root = tempfile::tempdir().unwrap();
        let install = root.path().join("bin");

        let mut loader = ModuleLoader::new(
            "mymodule",
            source.path(),
            &install,
            StubToolchain::writing(b"ELF"),
        )
        .unwrap()
        .clean_on_drop(false);
        loader.build().unwrap();
        fs::write(install.join("notes.txt"), "keep me").unwrap();

        loader.cleanup();
        assert!(!loader.artifact_path().exists());
        assert!(install.join("notes.txt").is_file());
    }

    #[test]
    fn test_no_clean_keeps_artifact() {
        let source = source_dir();
        let install = tempfile::tempdir().unwrap();

        let mut loader = ModuleLoader::new(
            "mymodule",
            source.path(),
            install.path(),
            StubToolchain::writing(b"ELF"),
        )
        .unwrap()
        .clean_on_drop(false);
        let artifact = loader.build().unwrap();
        drop(loader);
        assert!(artifact.path().is_file());
    }
}
