//! Standard libraries scripts are allowed to see.
//!
//! Anything not listed here (`io`, `os`, `package`, `debug`, `utf8`) is
//! never opened, so it is unreachable from script code.

use std::ffi::{c_int, CStr};

use mlua::ffi;

struct Library {
    name: &'static CStr,
    open: ffi::lua_CFunction,
}

const ALLOWED: &[Library] = &[
    Library { name: c"_G", open: ffi::luaopen_base },
    Library { name: c"coroutine", open: ffi::luaopen_coroutine },
    Library { name: c"table", open: ffi::luaopen_table },
    Library { name: c"string", open: ffi::luaopen_string },
    Library { name: c"math", open: ffi::luaopen_math },
];

/// Names of the allowed libraries, in load order.
pub fn allowed_libraries() -> Vec<&'static str> {
    ALLOWED
        .iter()
        .map(|lib| lib.name.to_str().unwrap_or_default())
        .collect()
}

/// Opens every allowed library into the globals.
/// Meant to run under `lua_pcall` so allocation failures stay protected.
pub(crate) unsafe extern "C-unwind" fn open_allowed(state: *mut ffi::lua_State) -> c_int {
    for lib in ALLOWED {
        ffi::luaL_requiref(state, lib.name.as_ptr(), lib.open, 1);
        ffi::lua_pop(state, 1); // loader's return value
    }
    0
}
