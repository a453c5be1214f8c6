// RebelDB™ © 2025 Huly Labs • https://hulylabs.com • SPDX-License-Identifier: MIT
//
// mymodule.rs: built at run time with `rustc --crate-type cdylib`, so it
// carries its own copy of the extension ABI layout instead of a crate dependency.

use std::ptr;

const ABI_VERSION: u32 = 1;
const NO_ARGS: u32 = 0x1;

#[repr(C)]
pub struct MethodDef {
    pub name: *const u8,
    pub name_len: usize,
    pub meth: Option<extern "C" fn()>,
    pub flags: u32,
    pub doc: *const u8,
    pub doc_len: usize,
}

unsafe impl Sync for MethodDef {}

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

extern "C" fn mymodule_hello_world() {
    println!("Hello, World!");
}

static METHODS: [MethodDef; 1] = [MethodDef {
    name: b"hello_world".as_ptr(),
    name_len: 11,
    meth: Some(mymodule_hello_world),
    flags: NO_ARGS,
    doc: ptr::null(),
    doc_len: 0,
}];

static MODULE: ModuleDef = ModuleDef {
    abi_version: ABI_VERSION,
    name: b"mymodule".as_ptr(),
    name_len: 8,
    doc: ptr::null(),
    doc_len: 0,
    // -1: module state lives in globals
    state_size: -1,
    methods: &METHODS as *const [MethodDef; 1] as *const MethodDef,
    method_count: 1,
};

#[no_mangle]
pub extern "C" fn rebel_init_mymodule() -> *const ModuleDef {
    &MODULE
}
