//! Scoped allocation - stack discipline over an arena
//!
//! Design: A scoped allocator remembers the arena cursor at construction
//! and hands it back on teardown, after running every registered cleanup
//! in reverse registration order. Objects with non-trivial teardown get a
//! small cleanup record allocated next to them in the same arena.
//!
//! Scopes on one arena must nest strictly: only the one created last may
//! allocate, and it is torn down first. Each scope records its nesting
//! depth and the cursor it last observed after its own allocations. Any
//! allocation or teardown from a scope that is not innermost, or after the
//! arena moved behind its back, halts: rewinding would hand live memory of
//! another scope back to the arena.

use core::cell::Cell;
use core::marker::PhantomData;
use core::mem;
use core::ptr::{self, NonNull};
use crate::error::Result;
use crate::logging::log_scope_exit;
use super::{Allocator, Arena, LargeBlock};

/// Intrusive cleanup list node, stored in the arena
struct CleanupRecord {
    object: *mut u8,
    run: unsafe fn(*mut u8),
    prev: *mut CleanupRecord,
}

/// Allocator that releases everything it handed out when dropped
///
/// Must not outlive its arena (enforced by the borrow). While a younger
/// scope is open on the same arena this one must neither allocate nor be
/// dropped (checked at runtime).
pub struct ScopedAllocator<'a> {
    arena: &'a Arena,
    watermark: *mut u8,
    depth: usize,
    last_cursor: Cell<usize>,
    cleanups: Cell<*mut CleanupRecord>,
    registered: Cell<usize>,
    // Cleanups may run closures borrowing data for 'a
    _owns: PhantomData<&'a mut ()>,
}

impl<'a> ScopedAllocator<'a> {
    /// Open a scope at the arena's current cursor
    pub fn new(arena: &'a Arena) -> Self {
        let cursor = arena.cursor();
        Self {
            arena,
            watermark: cursor,
            depth: arena.open_scope(),
            last_cursor: Cell::new(cursor as usize),
            cleanups: Cell::new(ptr::null_mut()),
            registered: Cell::new(0),
            _owns: PhantomData,
        }
    }

    #[inline]
    pub fn arena(&self) -> &'a Arena {
        self.arena
    }

    /// Cursor the arena is rewound to on teardown
    #[inline]
    pub fn watermark(&self) -> *mut u8 {
        self.watermark
    }

    /// Number of cleanups that will run on teardown
    #[inline]
    pub fn cleanup_count(&self) -> usize {
        self.registered.get()
    }

    /// Allocate raw bytes from the arena
    pub fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>> {
        self.ensure_innermost("allocation");
        let ptr = self.arena.allocate(size, align)?;
        self.observe();
        Ok(ptr)
    }

    /// Allocate raw bytes and register `cleanup` to run on them at teardown
    pub fn allocate_with_cleanup(
        &self,
        size: usize,
        align: usize,
        cleanup: unsafe fn(*mut u8),
    ) -> Result<NonNull<u8>> {
        let object = self.allocate(size, align)?;
        self.register(object.as_ptr(), cleanup)?;
        Ok(object)
    }

    /// Move `value` into the arena
    ///
    /// Its destructor, if it has one, runs when the scope is torn down.
    pub fn alloc<T: 'a>(&self, value: T) -> Result<&mut T> {
        let storage = self.allocate(mem::size_of::<T>(), mem::align_of::<T>())?;
        if mem::needs_drop::<T>() {
            self.register(storage.as_ptr(), drop_in_arena::<T>)?;
        }

        let slot = storage.cast::<T>().as_ptr();
        unsafe {
            slot.write(value);
            Ok(&mut *slot)
        }
    }

    /// Run `f` when the scope is torn down
    pub fn defer<F: FnOnce() + 'a>(&self, f: F) -> Result<()> {
        let storage = self.allocate(mem::size_of::<F>(), mem::align_of::<F>())?;
        self.register(storage.as_ptr(), call_in_arena::<F>)?;
        unsafe { storage.cast::<F>().as_ptr().write(f) };
        Ok(())
    }

    fn register(&self, object: *mut u8, run: unsafe fn(*mut u8)) -> Result<()> {
        let record = self
            .allocate(mem::size_of::<CleanupRecord>(), mem::align_of::<CleanupRecord>())?
            .cast::<CleanupRecord>()
            .as_ptr();

        unsafe {
            record.write(CleanupRecord {
                object,
                run,
                prev: self.cleanups.get(),
            });
        }
        self.cleanups.set(record);
        self.registered.set(self.registered.get() + 1);
        Ok(())
    }

    #[inline]
    fn observe(&self) {
        self.last_cursor.set(self.arena.cursor() as usize);
    }

    /// Halt unless this is the innermost open scope and the arena cursor
    /// still sits where this scope left it
    fn ensure_innermost(&self, action: &str) {
        let open = self.arena.scope_depth();
        let cursor = self.arena.cursor() as usize;
        let last = self.last_cursor.get();
        if open != self.depth + 1 || cursor != last {
            crate::fatal!(
                "scoped allocator {} out of order: depth {} of {} open, arena cursor {:#x}, last observed {:#x}",
                action,
                self.depth,
                open,
                cursor,
                last
            );
        }
    }
}

unsafe fn drop_in_arena<T>(object: *mut u8) {
    ptr::drop_in_place(object as *mut T);
}

unsafe fn call_in_arena<F: FnOnce()>(object: *mut u8) {
    let f = ptr::read(object as *mut F);
    f();
}

impl Allocator for ScopedAllocator<'_> {
    #[inline]
    fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>> {
        ScopedAllocator::allocate(self, size, align)
    }

    unsafe fn reallocate(
        &self,
        ptr: *mut u8,
        old_size: usize,
        new_size: usize,
        align: usize,
    ) -> Result<NonNull<u8>> {
        self.ensure_innermost("reallocation");
        let resized = Allocator::reallocate(self.arena, ptr, old_size, new_size, align)?;
        self.observe();
        Ok(resized)
    }

    #[inline]
    unsafe fn free(&self, _ptr: *mut u8, _size: usize) {}

    fn allocate_large(&self, size: usize, align: usize) -> Result<LargeBlock> {
        self.ensure_innermost("allocation");
        let block = Allocator::allocate_large(self.arena, size, align)?;
        self.observe();
        Ok(block)
    }

    #[inline]
    unsafe fn free_large(&self, _block: LargeBlock) {}
}

impl Drop for ScopedAllocator<'_> {
    fn drop(&mut self) {
        // A halted scope is still dropped while unwinding in tests
        if !std::thread::panicking() {
            self.ensure_innermost("torn down");
        }

        let mut ran = 0;
        let mut record = self.cleanups.replace(ptr::null_mut());
        while let Some(node) = NonNull::new(record) {
            // Copied out before the cleanup runs
            let CleanupRecord { object, run, prev } = unsafe { node.as_ptr().read() };
            unsafe { run(object) };
            record = prev;
            ran += 1;
        }

        let released = (self.arena.cursor() as usize).saturating_sub(self.watermark as usize);
        unsafe { self.arena.reset(self.watermark) };
        self.arena.close_scope();
        log_scope_exit(ran, released);
    }
}
