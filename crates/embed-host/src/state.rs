//! Interpreter lifecycle over the raw Lua C API.
//!
//! The state is created with [`BlockAllocator`] as its allocator and an
//! [`ExecutionContext`] as the allocator user-data. Every hook the host
//! installs (panic, captured `print`) gets back to that context through
//! `lua_getallocf`, so nothing here is process-wide.

use std::{
    cell::RefCell,
    ffi::{c_int, c_void, CStr, CString},
    panic::{self, AssertUnwindSafe},
    ptr::{self, NonNull},
    slice,
};

use mlua::ffi;
use tracing::debug;

use crate::{error::ScriptError, libs, memory::BlockAllocator};

/// Per-execution state shared with the interpreter's hooks.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    allocator: BlockAllocator,
    panic: RefCell<Option<String>>,
    output: RefCell<String>,
}

/// Unwind payload thrown by the panic hook.
struct FatalUnwind;

impl ExecutionContext {
    pub fn new(allocator: BlockAllocator) -> Self {
        Self {
            allocator,
            ..Self::default()
        }
    }

    pub fn allocator(&self) -> &BlockAllocator {
        &self.allocator
    }

    /// Text written by the captured `print`, if it was installed.
    pub fn take_output(&self) -> String {
        std::mem::take(&mut *self.output.borrow_mut())
    }

    /// Runs `f`, turning an escape from the panic hook into
    /// [`ScriptError::Panic`]. Any other unwind is resumed.
    pub fn guard<T>(&self, f: impl FnOnce() -> Result<T, ScriptError>) -> Result<T, ScriptError> {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => result,
            Err(payload) if payload.is::<FatalUnwind>() => {
                let message = self.panic.borrow_mut().take().unwrap_or_default();
                Err(ScriptError::Panic(message))
            }
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    unsafe fn from_state<'a>(state: *mut ffi::lua_State) -> &'a ExecutionContext {
        let mut ud: *mut c_void = ptr::null_mut();
        ffi::lua_getallocf(state, &mut ud);
        &*(ud as *const ExecutionContext)
    }
}

unsafe extern "C-unwind" fn lua_alloc(
    ud: *mut c_void,
    block: *mut c_void,
    old_size: usize,
    new_size: usize,
) -> *mut c_void {
    let ctx = &*(ud as *const ExecutionContext);
    // For fresh blocks Lua passes the object type in `old_size`; the
    // allocator ignores it when `block` is null.
    ctx.allocator
        .realloc(NonNull::new(block.cast()), old_size, new_size)
        .map_or(ptr::null_mut(), |p| p.as_ptr().cast())
}

/// Called by Lua for errors raised outside any protected call. It must not
/// return, so it records the message and unwinds to [`ExecutionContext::guard`].
unsafe extern "C-unwind" fn panic_hook(state: *mut ffi::lua_State) -> c_int {
    let ctx = ExecutionContext::from_state(state);
    let message = error_message(state, -1);
    debug!(%message, "panic hook fired");
    *ctx.panic.borrow_mut() = Some(message);
    panic::resume_unwind(Box::new(FatalUnwind))
}

/// Replacement for the base `print` that writes into the context buffer,
/// formatting arguments the same way. Bytes that are not UTF-8 become
/// U+FFFD.
unsafe extern "C-unwind" fn captured_print(state: *mut ffi::lua_State) -> c_int {
    let ctx = ExecutionContext::from_state(state);
    let nargs = ffi::lua_gettop(state);
    for i in 1..=nargs {
        let mut len: usize = 0;
        let s = ffi::luaL_tolstring(state, i, &mut len);
        {
            let bytes = slice::from_raw_parts(s.cast::<u8>(), len);
            let mut out = ctx.output.borrow_mut();
            if i > 1 {
                out.push('\t');
            }
            out.push_str(&String::from_utf8_lossy(bytes));
        }
        ffi::lua_pop(state, 1);
    }
    ctx.output.borrow_mut().push('\n');
    0
}

/// Reads the error object at `idx` without calling back into Lua.
/// Numbers are converted like `lua_tostring` does; no metamethods run.
unsafe fn error_message(state: *mut ffi::lua_State, idx: c_int) -> String {
    let ty = ffi::lua_type(state, idx);
    if ty != ffi::LUA_TSTRING && ty != ffi::LUA_TNUMBER {
        let name = CStr::from_ptr(ffi::lua_typename(state, ty)).to_string_lossy();
        return format!("(error object is a {name} value)");
    }
    let mut len: usize = 0;
    let s = ffi::lua_tolstring(state, idx, &mut len);
    String::from_utf8_lossy(slice::from_raw_parts(s.cast::<u8>(), len)).into_owned()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Libraries,
    Compile,
    Run,
}

/// One Lua state. Closed with `lua_close` when dropped, whatever happened.
pub struct Interpreter<'ctx> {
    state: NonNull<ffi::lua_State>,
    ctx: &'ctx ExecutionContext,
}

impl<'ctx> Interpreter<'ctx> {
    /// Creates the state through the context's allocator and installs the
    /// panic hook. Fails when the allocator refuses the initial blocks.
    pub fn new(ctx: &'ctx ExecutionContext) -> Result<Self, ScriptError> {
        let ud = ctx as *const ExecutionContext as *mut c_void;
        let state = unsafe { ffi::lua_newstate(lua_alloc, ud) };
        let state = NonNull::new(state).ok_or(ScriptError::StateCreation)?;
        unsafe { ffi::lua_atpanic(state.as_ptr(), panic_hook) };
        debug!("interpreter created");
        Ok(Self { state, ctx })
    }

    pub fn as_ptr(&self) -> *mut ffi::lua_State {
        self.state.as_ptr()
    }

    pub fn open_libs(&mut self) -> Result<(), ScriptError> {
        let state = self.as_ptr();
        let status = unsafe {
            ffi::lua_pushcfunction(state, libs::open_allowed);
            ffi::lua_pcall(state, 0, 0, 0)
        };
        self.check(status, Phase::Libraries)?;
        debug!(allowed = ?libs::allowed_libraries(), "libraries loaded");
        Ok(())
    }

    /// Swaps the global `print` for one that writes into the context.
    pub fn capture_print(&mut self) {
        let state = self.as_ptr();
        unsafe {
            ffi::lua_pushcfunction(state, captured_print);
            ffi::lua_setglobal(state, c"print".as_ptr());
        }
    }

    /// Loads `source` as a text chunk and leaves the function on the stack.
    /// Without a name Lua reports the chunk as `?`.
    pub fn compile(&mut self, source: &[u8], chunk_name: Option<&str>) -> Result<(), ScriptError> {
        let name = chunk_name
            .map(CString::new)
            .transpose()
            .map_err(|_| ScriptError::Compile("chunk name contains a NUL byte".into()))?;
        let status = unsafe {
            ffi::luaL_loadbufferx(
                self.as_ptr(),
                source.as_ptr().cast(),
                source.len(),
                name.as_ref().map_or(ptr::null(), |n| n.as_ptr()),
                c"t".as_ptr(),
            )
        };
        self.check(status, Phase::Compile)?;
        debug!(bytes = source.len(), "chunk compiled");
        Ok(())
    }

    /// Calls the compiled chunk keeping every result, then hands the results
    /// (if any) to the global `print`.
    pub fn run(&mut self) -> Result<(), ScriptError> {
        let state = self.as_ptr();
        let base = unsafe { ffi::lua_gettop(state) } - 1;
        let status = unsafe { ffi::lua_pcall(state, 0, ffi::LUA_MULTRET, 0) };
        self.check(status, Phase::Run)?;

        let results = unsafe { ffi::lua_gettop(state) } - base;
        debug!(results, "chunk finished");
        if results == 0 {
            return Ok(());
        }
        // a chunk returning many values can leave no free slot for `print`
        if unsafe { ffi::lua_checkstack(state, 1) } == 0 {
            return Err(ScriptError::Runtime("too many results to print".into()));
        }
        let status = unsafe {
            ffi::lua_getglobal(state, c"print".as_ptr());
            ffi::lua_insert(state, base + 1);
            ffi::lua_pcall(state, results, 0, 0)
        };
        self.check(status, Phase::Run)
    }

    fn check(&self, status: c_int, phase: Phase) -> Result<(), ScriptError> {
        if status == ffi::LUA_OK {
            return Ok(());
        }
        let state = self.as_ptr();
        let message = unsafe { error_message(state, -1) };
        unsafe { ffi::lua_pop(state, 1) };
        Err(match status {
            ffi::LUA_ERRSYNTAX => ScriptError::Compile(message),
            ffi::LUA_ERRRUN if phase != Phase::Libraries => ScriptError::Runtime(message),
            _ => ScriptError::Panic(message),
        })
    }
}

impl Drop for Interpreter<'_> {
    fn drop(&mut self) {
        unsafe { ffi::lua_close(self.as_ptr()) };
        let stats = self.ctx.allocator().stats();
        debug!(
            live_blocks = stats.live_blocks,
            peak_bytes = stats.peak_bytes,
            allocations = stats.allocations,
            "interpreter closed"
        );
    }
}
