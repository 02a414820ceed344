//! Memory discipline for key material and hot buffers.
//!
//! - `AlignedBuf`: 64-byte-aligned heap allocation for SIMD-friendly scans
//! - `SecureBuffer`: page-locked (best effort), zeroed-on-drop storage
//! - `MemoryPool`: mutex-guarded bump allocator over fixed slabs
//! - `ResourceGuard`: single-owner handle + disposer pair
//! - global allocation counters, printed via `print_stats()`

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Alignment for all scan buffers. One cache line, also enough for AVX-512.
pub const BUFFER_ALIGN: usize = 64;

// Global memory counters, relaxed; diagnostics only.
pub static TOTAL_ALLOC_BYTES: AtomicU64 = AtomicU64::new(0);
pub static CURRENT_ALLOC_BYTES: AtomicU64 = AtomicU64::new(0);
pub static PEAK_ALLOC_BYTES: AtomicU64 = AtomicU64::new(0);
pub static TOTAL_ALLOCATIONS: AtomicU64 = AtomicU64::new(0);
pub static TOTAL_DEALLOCATIONS: AtomicU64 = AtomicU64::new(0);

static MLOCK_WARNED: AtomicBool = AtomicBool::new(false);

fn record_alloc(bytes: usize) {
    TOTAL_ALLOC_BYTES.fetch_add(bytes as u64, Ordering::Relaxed);
    TOTAL_ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
    let current = CURRENT_ALLOC_BYTES.fetch_add(bytes as u64, Ordering::Relaxed) + bytes as u64;
    let mut peak = PEAK_ALLOC_BYTES.load(Ordering::Relaxed);
    while current > peak {
        match PEAK_ALLOC_BYTES.compare_exchange_weak(peak, current, Ordering::Relaxed, Ordering::Relaxed)
        {
            Ok(_) => break,
            Err(p) => peak = p,
        }
    }
}

fn record_dealloc(bytes: usize) {
    CURRENT_ALLOC_BYTES.fetch_sub(bytes as u64, Ordering::Relaxed);
    TOTAL_DEALLOCATIONS.fetch_add(1, Ordering::Relaxed);
}

/// Print the global counters.
pub fn print_stats() {
    eprintln!("\n[MEM STATS]");
    eprintln!(
        "  Current: {:.2} MB | Peak: {:.2} MB",
        CURRENT_ALLOC_BYTES.load(Ordering::Relaxed) as f64 / 1e6,
        PEAK_ALLOC_BYTES.load(Ordering::Relaxed) as f64 / 1e6
    );
    eprintln!(
        "  Allocations: {} | Deallocations: {}",
        TOTAL_ALLOCATIONS.load(Ordering::Relaxed),
        TOTAL_DEALLOCATIONS.load(Ordering::Relaxed)
    );
}

/// Heap buffer of raw bytes aligned to `BUFFER_ALIGN`. Zero-length buffers
/// allocate nothing and use the dangling sentinel.
pub struct AlignedBuf {
    ptr: NonNull<u8>,
    len: usize,
}

unsafe impl Send for AlignedBuf {}
unsafe impl Sync for AlignedBuf {}

impl AlignedBuf {
    pub fn zeroed(len: usize) -> Result<Self> {
        if len == 0 {
            return Ok(Self { ptr: NonNull::dangling(), len: 0 });
        }
        let layout = Layout::from_size_align(len, BUFFER_ALIGN)
            .map_err(|e| Error::Memory(format!("bad layout: {e}")))?;
        // Safety: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw)
            .ok_or_else(|| Error::Memory(format!("allocation of {len} bytes failed")))?;
        record_alloc(len);
        Ok(Self { ptr, len })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // Safety: ptr is valid for len bytes (or dangling with len 0).
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        if self.len != 0 {
            let layout = Layout::from_size_align(self.len, BUFFER_ALIGN).unwrap();
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
            record_dealloc(self.len);
        }
    }
}

/// Aligned storage for private-key material: page-locked when the platform
/// allows it, volatile-zeroed before release. Move-only.
pub struct SecureBuffer {
    buf: AlignedBuf,
    locked: bool,
}

impl SecureBuffer {
    /// Allocate `len` zeroed bytes. `lock_pages` asks for mlock; failure is
    /// recorded and logged once per process, never fatal.
    pub fn new(len: usize, lock_pages: bool) -> Result<Self> {
        let buf = AlignedBuf::zeroed(len)?;
        let mut locked = false;
        if lock_pages && len > 0 {
            locked = lock_memory(buf.as_ptr(), len);
            if !locked && !MLOCK_WARNED.swap(true, Ordering::Relaxed) {
                eprintln!("[MEM] page locking unavailable, key buffers may be swapped");
            }
        }
        Ok(Self { buf, locked })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_slice()
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.buf.as_mut_slice()
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Volatile zero plus a SeqCst fence; the optimizer cannot elide it.
    pub fn secure_zero(&mut self) {
        let ptr = self.buf.ptr.as_ptr();
        for i in 0..self.buf.len {
            unsafe { std::ptr::write_volatile(ptr.add(i), 0) };
        }
        std::sync::atomic::fence(Ordering::SeqCst);
    }
}

impl Drop for SecureBuffer {
    fn drop(&mut self) {
        if self.buf.len != 0 {
            self.secure_zero();
            if self.locked {
                unlock_memory(self.buf.as_ptr(), self.buf.len);
            }
        }
        // AlignedBuf::drop deallocates.
    }
}

#[cfg(unix)]
fn lock_memory(ptr: *const u8, len: usize) -> bool {
    unsafe { libc::mlock(ptr as *const libc::c_void, len) == 0 }
}

#[cfg(unix)]
fn unlock_memory(ptr: *const u8, len: usize) {
    unsafe { libc::munlock(ptr as *const libc::c_void, len) };
}

#[cfg(not(unix))]
fn lock_memory(_ptr: *const u8, _len: usize) -> bool {
    false
}

#[cfg(not(unix))]
fn unlock_memory(_ptr: *const u8, _len: usize) {}

/// Bump-pointer pool over fixed slabs of `B` values. Allocation hands out
/// stable indices; `reset` rewinds without freeing slabs.
pub struct MemoryPool<T: Default + Clone, const B: usize = 4096> {
    inner: Mutex<PoolInner<T>>,
}

struct PoolInner<T> {
    slabs: Vec<Box<[T]>>,
    // slab index of the bump position
    slab: usize,
    offset: usize,
}

impl<T: Default + Clone, const B: usize> MemoryPool<T, B> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PoolInner { slabs: Vec::new(), slab: 0, offset: 0 }),
        }
    }

    /// O(1) under one mutex. Returns (slab, offset), a stable handle that
    /// survives later allocations.
    pub fn alloc(&self) -> (usize, usize) {
        let mut inner = self.inner.lock().unwrap();
        if inner.slab == inner.slabs.len() {
            let slab: Box<[T]> = vec![T::default(); B].into_boxed_slice();
            record_alloc(B * std::mem::size_of::<T>());
            inner.slabs.push(slab);
        }
        let handle = (inner.slab, inner.offset);
        inner.offset += 1;
        if inner.offset == B {
            inner.slab += 1;
            inner.offset = 0;
        }
        handle
    }

    pub fn with<R>(&self, handle: (usize, usize), f: impl FnOnce(&mut T) -> R) -> R {
        let mut inner = self.inner.lock().unwrap();
        f(&mut inner.slabs[handle.0][handle.1])
    }

    /// Rewind the bump pointer, keeping slabs for reuse.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.slab = 0;
        inner.offset = 0;
    }

    /// Values handed out since the last reset.
    pub fn total_used(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.slab * B + inner.offset
    }

    pub fn memory_usage(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.slabs.len() * B * std::mem::size_of::<T>()
    }
}

impl<T: Default + Clone, const B: usize> Default for MemoryPool<T, B> {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-ownership (handle, disposer) pair. The disposer runs exactly once,
/// on drop or explicit `reset`; `release` forfeits it.
pub struct ResourceGuard<T, F: FnOnce(T)> {
    resource: Option<(T, F)>,
}

impl<T, F: FnOnce(T)> ResourceGuard<T, F> {
    pub fn new(resource: T, disposer: F) -> Self {
        Self { resource: Some((resource, disposer)) }
    }

    pub fn get(&self) -> Option<&T> {
        self.resource.as_ref().map(|(r, _)| r)
    }

    /// Take the handle back; the disposer will not run.
    pub fn release(mut self) -> T {
        let (resource, _) = self.resource.take().unwrap();
        resource
    }

    /// Dispose now instead of at drop.
    pub fn reset(&mut self) {
        if let Some((resource, disposer)) = self.resource.take() {
            disposer(resource);
        }
    }

    pub fn is_armed(&self) -> bool {
        self.resource.is_some()
    }
}

impl<T, F: FnOnce(T)> Drop for ResourceGuard<T, F> {
    fn drop(&mut self) {
        self.reset();
    }
}
