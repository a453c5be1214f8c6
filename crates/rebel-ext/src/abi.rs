// RebelDB™ © 2025 Huly Labs • https://hulylabs.com • SPDX-License-Identifier: MIT
//
// abi.rs:

//! C layout shared by the host and extension artifacts.
//!
//! An artifact exports one symbol, `rebel_init_<module>`, returning a pointer to a
//! static [`ModuleDef`]. The descriptor points at a length-prefixed table of
//! [`MethodDef`] entries. All strings are UTF-8, passed as pointer and length,
//! and are not NUL-terminated. The C mirror of these types lives in
//! `modules/rebel_ext.h`.

use std::ptr;

/// Bumped on any layout change of [`ModuleDef`] or [`MethodDef`].
pub const ABI_VERSION: u32 = 1;

/// Prefix of the initialization symbol, followed by the module name.
pub const INIT_PREFIX: &str = "rebel_init_";

/// Calling convention flag: the function takes no arguments and returns nothing.
pub const NO_ARGS: u32 = 0x1;

/// `state_size` value for modules that keep their state in globals.
pub const STATE_GLOBAL: isize = -1;

pub type NativeFn = extern "C" fn();

pub type InitFn = unsafe extern "C" fn() -> *const ModuleDef;

#[repr(C)]
pub struct MethodDef {
    pub name: *const u8,
    pub name_len: usize,
    pub meth: Option<NativeFn>,
    pub flags: u32,
    pub doc: *const u8,
    pub doc_len: usize,
}

unsafe impl Sync for MethodDef {}

impl MethodDef {
    pub const fn no_args(name: &'static str, meth: NativeFn, doc: Option<&'static str>) -> Self {
        let (doc, doc_len) = match doc {
            Some(doc) => (doc.as_ptr(), doc.len()),
            None => (ptr::null(), 0),
        };
        Self {
            name: name.as_ptr(),
            name_len: name.len(),
            meth: Some(meth),
            flags: NO_ARGS,
            doc,
            doc_len,
        }
    }
}

#[repr(C)]
pub struct ModuleDef {
    pub abi_version: u32,
    pub name: *const u8,
    pub name_len: usize,
    pub doc: *const u8,
    pub doc_len: usize,
    pub state_size: isize,
    pub methods: *const MethodDef,
    pub method_count: usize,
}

unsafe impl Sync for ModuleDef {}

impl ModuleDef {
    pub const fn new(
        name: &'static str,
        doc: Option<&'static str>,
        methods: &'static [MethodDef],
    ) -> Self {
        let (doc, doc_len) = match doc {
            Some(doc) => (doc.as_ptr(), doc.len()),
            None => (ptr::null(), 0),
        };
        Self {
            abi_version: ABI_VERSION,
            name: name.as_ptr(),
            name_len: name.len(),
            doc,
            doc_len,
            state_size: STATE_GLOBAL,
            methods: methods.as_ptr(),
            method_count: methods.len(),
        }
    }
}

/// Name of the initialization symbol an artifact for `module` must export.
pub fn init_symbol(module: &str) -> String {
    format!("{INIT_PREFIX}{module}")
}

/// Module names double as symbol suffixes and crate names, so they must be
/// plain identifiers.
pub fn is_valid_module_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Reads an optional pointer/length string out of a descriptor.
///
/// # Safety
///
/// `ptr` must be null or valid for reads of `len` bytes for `'a`.
pub(crate) unsafe fn raw_str<'a>(
    ptr: *const u8,
    len: usize,
) -> Result<Option<&'a str>, std::str::Utf8Error> {
    if ptr.is_null() {
        return Ok(None);
    }
    std::str::from_utf8(std::slice::from_raw_parts(ptr, len)).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_symbol() {
        assert_eq!(init_symbol("mymodule"), "rebel_init_mymodule");
    }

    #[test]
    fn test_module_names() {
        assert!(is_valid_module_name("mymodule"));
        assert!(is_valid_module_name("_private2"));
        assert!(!is_valid_module_name(""));
        assert!(!is_valid_module_name("2fast"));
        assert!(!is_valid_module_name("my-module"));
        assert!(!is_valid_module_name("../evil"));
    }

    #[test]
    fn test_module_def_layout() {
        extern "C" fn noop() {}
        static METHODS: [MethodDef; 1] = [MethodDef::no_args("noop", noop, Some("does nothing"))];
        static MODULE: ModuleDef = ModuleDef::new("layout", None, &METHODS);

        assert_eq!(MODULE.abi_version, ABI_VERSION);
        assert_eq!(MODULE.method_count, 1);
        assert_eq!(MODULE.state_size, STATE_GLOBAL);
        assert!(MODULE.doc.is_null());
        let name = unsafe { raw_str(MODULE.name, MODULE.name_len) }.unwrap();
        assert_eq!(name, Some("layout"));
        let doc = unsafe { raw_str(METHODS[0].doc, METHODS[0].doc_len) }.unwrap();
        assert_eq!(doc, Some("does nothing"));
    }
}
