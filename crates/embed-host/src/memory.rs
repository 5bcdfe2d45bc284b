//! Host allocator handed to `lua_newstate`.
//!
//! Lua drives allocation, resizing and freeing through a single callback.
//! Every block we hand out is preceded by a private [`Header`] that records
//! the real capacity of the block (needed to give it back to `std::alloc`)
//! and the size Lua last asked for. Lua never sees the header.

use std::{
    alloc::{self as sys, Layout},
    cell::Cell,
    ptr::{self, NonNull},
};

#[repr(C, align(16))]
struct Header {
    capacity: usize,
    size: usize,
}

const HEADER: usize = std::mem::size_of::<Header>();
const ALIGN: usize = std::mem::align_of::<Header>();

/// Running counters for one allocator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocStats {
    pub live_blocks: usize,
    pub live_bytes: usize,
    pub peak_bytes: usize,
    /// Fresh blocks obtained from the system (growth included).
    pub allocations: usize,
    /// Requests that were turned down.
    pub refused: usize,
}

#[derive(Debug, Default)]
pub struct BlockAllocator {
    stats: Cell<AllocStats>,
    fail_after: Option<usize>,
}

impl BlockAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocator that refuses every request once `n` blocks were handed out.
    /// `failing_after(0)` refuses the very first one.
    pub fn failing_after(n: usize) -> Self {
        Self {
            stats: Cell::default(),
            fail_after: Some(n),
        }
    }

    pub fn stats(&self) -> AllocStats {
        self.stats.get()
    }

    /// Allocate, resize or free depending on the argument pattern:
    ///
    /// - `ptr == None`: allocate `new_size` bytes (`None` for a zero size)
    /// - `new_size == 0`: free `ptr`
    /// - otherwise resize, in place when the block is large enough
    ///
    /// `None` on a non-zero request means out of memory; the old block is
    /// then left untouched.
    ///
    /// # Safety
    /// `ptr` must be `None` or a live pointer returned by this allocator.
    pub unsafe fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        match (ptr, new_size) {
            (None, 0) => None,
            (None, n) => self.allocate(n),
            (Some(p), 0) => {
                self.free(p);
                None
            }
            (Some(p), n) => self.resize(p, old_size, n),
        }
    }

    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let mut stats = self.stats.get();
        if self.fail_after.is_some_and(|limit| stats.allocations >= limit) {
            return self.refuse();
        }
        let Some(layout) = block_layout(size) else {
            return self.refuse();
        };
        // SAFETY: layout has a non-zero size (it always includes the header).
        let Some(base) = NonNull::new(unsafe { sys::alloc(layout) }) else {
            return self.refuse();
        };
        unsafe {
            base.cast::<Header>().as_ptr().write(Header {
                capacity: size,
                size,
            });
        }

        stats.allocations += 1;
        stats.live_blocks += 1;
        stats.live_bytes += size;
        stats.peak_bytes = stats.peak_bytes.max(stats.live_bytes);
        self.stats.set(stats);

        // SAFETY: the block is HEADER + size bytes long.
        Some(unsafe { NonNull::new_unchecked(base.as_ptr().add(HEADER)) })
    }

    unsafe fn free(&self, ptr: NonNull<u8>) {
        let header = header_of(ptr);
        let Header { capacity, size } = header.read();
        if let Some(layout) = block_layout(capacity) {
            sys::dealloc(header.cast(), layout);
        }

        let mut stats = self.stats.get();
        stats.live_blocks -= 1;
        stats.live_bytes -= size;
        self.stats.set(stats);
    }

    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let header = header_of(ptr);
        let Header { capacity, size } = header.read();

        if new_size <= capacity {
            (*header).size = new_size;
            let mut stats = self.stats.get();
            stats.live_bytes = stats.live_bytes - size + new_size;
            stats.peak_bytes = stats.peak_bytes.max(stats.live_bytes);
            self.stats.set(stats);
            return Some(ptr);
        }

        let fresh = self.allocate(new_size)?;
        ptr::copy_nonoverlapping(ptr.as_ptr(), fresh.as_ptr(), old_size.min(size));
        self.free(ptr);
        Some(fresh)
    }

    fn refuse(&self) -> Option<NonNull<u8>> {
        let mut stats = self.stats.get();
        stats.refused += 1;
        self.stats.set(stats);
        None
    }
}

fn block_layout(size: usize) -> Option<Layout> {
    let total = size.checked_add(HEADER)?;
    Layout::from_size_align(total, ALIGN).ok()
}

unsafe fn header_of(ptr: NonNull<u8>) -> *mut Header {
    ptr.as_ptr().sub(HEADER).cast()
}
