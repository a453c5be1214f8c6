// RebelDB™ © 2025 Huly Labs • https://hulylabs.com • SPDX-License-Identifier: MIT
//
// runtime.rs:

//! Host runtime: binds extension modules by name and dispatches calls to them.
//!
//! Binding runs the module's initialization entry point exactly once and
//! freezes the descriptor it returns into an [`ExtModule`]. After that the
//! module is read-only and stays loaded for as long as the runtime lives.

use crate::abi::{self, InitFn, MethodDef, ModuleDef, NativeFn};
use crate::error::{CallError, LoadError};
use crate::toolchain::Artifact;
use crate::value::Value;
use libloading::{Library, Symbol};
use smol_str::SmolStr;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    NoArgs,
}

impl Arity {
    fn from_flags(flags: u32) -> Option<Self> {
        match flags {
            abi::NO_ARGS => Some(Arity::NoArgs),
            _ => None,
        }
    }

    pub fn params(&self) -> usize {
        match self {
            Arity::NoArgs => 0,
        }
    }
}

struct Method {
    name: SmolStr,
    func: NativeFn,
    arity: Arity,
    doc: Option<SmolStr>,
}

impl Method {
    fn bind_args(&self, args: &[Value]) -> Result<(), CallError> {
        if args.len() != self.arity.params() {
            return Err(CallError::Arity {
                name: self.name.clone(),
                expected: self.arity.params(),
                given: args.len(),
            });
        }
        Ok(())
    }

    fn invoke(&self, _args: &[Value]) -> Value {
        match self.arity {
            Arity::NoArgs => {
                (self.func)();
                Value::None
            }
        }
    }
}

/// A bound module: its registration table frozen into a name lookup.
pub struct ExtModule {
    name: SmolStr,
    doc: Option<SmolStr>,
    state_size: isize,
    methods: Vec<Method>,
    index: HashMap<SmolStr, usize>,
    // Keeps the code behind `methods` mapped; `None` for statically linked modules.
    _lib: Option<Library>,
}

impl ExtModule {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    pub fn state_size(&self) -> isize {
        self.state_size
    }

    /// Registered function names in table order.
    pub fn functions(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(|m| m.name.as_str())
    }

    pub fn arity(&self, name: &str) -> Option<Arity> {
        self.method(name).map(|m| m.arity)
    }

    pub fn function_doc(&self, name: &str) -> Option<&str> {
        self.method(name).and_then(|m| m.doc.as_deref())
    }

    fn method(&self, name: &str) -> Option<&Method> {
        self.index.get(name).map(|&i| &self.methods[i])
    }

    /// Calls a registered function. Arguments are checked against the declared
    /// calling convention before any native code runs.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, CallError> {
        let method = self.method(name).ok_or_else(|| CallError::FunctionNotFound {
            module: self.name.clone(),
            name: name.into(),
        })?;
        method.bind_args(args)?;
        debug!(module = %self.name, function = %method.name, "calling native function");
        Ok(method.invoke(args))
    }

    /// Freezes the descriptor returned by an initialization entry point.
    ///
    /// # Safety
    ///
    /// `def` must be null or point to a descriptor whose pointers stay valid
    /// while `lib` (or the process, for static modules) is alive.
    unsafe fn freeze(
        requested: &str,
        def: *const ModuleDef,
        lib: Option<Library>,
    ) -> Result<Self, LoadError> {
        let module: SmolStr = requested.into();
        let def = def
            .as_ref()
            .ok_or_else(|| LoadError::InitFailed(module.clone()))?;

        if def.abi_version != abi::ABI_VERSION {
            return Err(LoadError::VersionMismatch {
                expected: abi::ABI_VERSION,
                found: def.abi_version,
            });
        }

        let malformed = |reason: String| LoadError::Malformed {
            module: module.clone(),
            reason,
        };

        let declared = abi::raw_str(def.name, def.name_len)
            .map_err(|e| malformed(format!("module name: {}", e)))?
            .ok_or_else(|| malformed("module name is null".into()))?;
        if declared != requested {
            return Err(LoadError::NameMismatch {
                requested: requested.into(),
                declared: declared.to_string(),
            });
        }
        let doc = abi::raw_str(def.doc, def.doc_len)
            .map_err(|e| malformed(format!("module doc: {}", e)))?
            .map(SmolStr::from);

        let table: &[MethodDef] = match def.method_count {
            0 => &[],
            _ if def.methods.is_null() => {
                return Err(malformed(format!(
                    "{} methods declared but table is null",
                    def.method_count
                )))
            }
            count => std::slice::from_raw_parts(def.methods, count),
        };

        let mut methods = Vec::with_capacity(table.len());
        let mut index = HashMap::with_capacity(table.len());
        for (i, entry) in table.iter().enumerate() {
            let name = abi::raw_str(entry.name, entry.name_len)
                .map_err(|e| malformed(format!("method #{} name: {}", i, e)))?
                .filter(|name| !name.is_empty())
                .ok_or_else(|| malformed(format!("method #{} has no name", i)))?;
            let func = entry
                .meth
                .ok_or_else(|| malformed(format!("method `{}` has no entry point", name)))?;
            let arity = Arity::from_flags(entry.flags).ok_or_else(|| {
                malformed(format!(
                    "method `{}` has unsupported flags {:#x}",
                    name, entry.flags
                ))
            })?;
            let doc = abi::raw_str(entry.doc, entry.doc_len)
                .map_err(|e| malformed(format!("method `{}` doc: {}", name, e)))?
                .map(SmolStr::from);

            let name = SmolStr::from(name);
            if index.insert(name.clone(), methods.len()).is_some() {
                return Err(malformed(format!("method `{}` registered twice", name)));
            }
            methods.push(Method {
                name,
                func,
                arity,
                doc,
            });
        }

        Ok(Self {
            name: module,
            doc,
            state_size: def.state_size,
            methods,
            index,
            _lib: lib,
        })
    }
}

/// Registry of bound modules. Bindings are never replaced or unloaded.
#[derive(Default)]
pub struct Runtime {
    modules: HashMap<SmolStr, Arc<ExtModule>>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_artifact(&mut self, artifact: &Artifact) -> Result<Arc<ExtModule>, LoadError> {
        self.bind(artifact.module(), artifact.path())
    }

    /// Loads the binary at `path` and binds it as `name`, running its
    /// `rebel_init_<name>` entry point once.
    pub fn bind(&mut self, name: &str, path: &Path) -> Result<Arc<ExtModule>, LoadError> {
        self.check_name(name)?;

        let canonical = path.canonicalize().map_err(|e| LoadError::Open {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        debug!(module = name, path = %canonical.display(), "opening artifact");
        let lib = open_library(&canonical)?;

        let symbol = abi::init_symbol(name);
        let init: InitFn = unsafe {
            let init: Symbol<InitFn> =
                lib.get(symbol.as_bytes())
                    .map_err(|_| LoadError::MissingEntryPoint {
                        path: canonical.clone(),
                        symbol: symbol.clone(),
                    })?;
            *init
        };

        let module = unsafe { ExtModule::freeze(name, init(), Some(lib))? };
        Ok(self.install(module))
    }

    /// Binds a module whose code is linked into the host.
    pub fn bind_static(&mut self, name: &str, init: InitFn) -> Result<Arc<ExtModule>, LoadError> {
        self.check_name(name)?;
        let module = unsafe { ExtModule::freeze(name, init(), None)? };
        Ok(self.install(module))
    }

    fn check_name(&self, name: &str) -> Result<(), LoadError> {
        if !abi::is_valid_module_name(name) {
            return Err(LoadError::InvalidName(name.to_string()));
        }
        if self.modules.contains_key(name) {
            return Err(LoadError::AlreadyBound(name.into()));
        }
        Ok(())
    }

    fn install(&mut self, module: ExtModule) -> Arc<ExtModule> {
        info!(
            module = %module.name,
            functions = module.methods.len(),
            "module bound"
        );
        let module = Arc::new(module);
        self.modules.insert(module.name.clone(), module.clone());
        module
    }

    pub fn get(&self, name: &str) -> Option<Arc<ExtModule>> {
        self.modules.get(name).cloned()
    }

    /// Names of bound modules, sorted.
    pub fn modules(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn call(&self, module: &str, function: &str, args: &[Value]) -> Result<Value, CallError> {
        self.modules
            .get(module)
            .ok_or_else(|| CallError::ModuleNotFound(module.into()))?
            .call(function, args)
    }
}

fn open_library(path: &Path) -> Result<Library, LoadError> {
    let open_failed = |e: libloading::Error| LoadError::Open {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    // RTLD_LOCAL keeps one module's symbols from resolving another's.
    #[cfg(unix)]
    let lib = unsafe {
        let flags = libloading::os::unix::RTLD_NOW | libloading::os::unix::RTLD_LOCAL;
        libloading::os::unix::Library::open(Some(path), flags)
            .map(Library::from)
            .map_err(open_failed)?
    };
    #[cfg(not(unix))]
    let lib = unsafe { Library::new(path).map_err(open_failed)? };

    Ok(lib)
}
