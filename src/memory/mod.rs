//! Heap accounting for worker processes
//!
//! The worker installs [`TrackingAllocator`] as its global allocator. It keeps
//! a running count of live bytes and their peak, and enforces the heap budget
//! the supervisor assigned: an allocation that would exceed it terminates the
//! process with [`EXIT_OUT_OF_MEMORY`].

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicU64, Ordering};

/// Exit status of a worker that ran past its heap budget.
pub const EXIT_OUT_OF_MEMORY: i32 = 87;

static CURRENT: AtomicU64 = AtomicU64::new(0);
static PEAK: AtomicU64 = AtomicU64::new(0);
static LIMIT: AtomicU64 = AtomicU64::new(u64::MAX);

const OOM_MESSAGE: &[u8] = b"heap budget exceeded\n";

pub struct TrackingAllocator;

unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        reserve(layout.size() as u64);
        let ptr = System.alloc(layout);
        if ptr.is_null() {
            release(layout.size() as u64);
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        reserve(layout.size() as u64);
        let ptr = System.alloc_zeroed(layout);
        if ptr.is_null() {
            release(layout.size() as u64);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
        release(layout.size() as u64);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let old = layout.size() as u64;
        let new = new_size as u64;
        if new > old {
            reserve(new - old);
        }
        let result = System.realloc(ptr, layout, new_size);
        if result.is_null() {
            // the old block is still live at its old size
            if new > old {
                release(new - old);
            }
        } else if new < old {
            release(old - new);
        }
        result
    }
}

/// Accounts for `bytes` about to be allocated, exiting if that breaks the
/// budget. Must not allocate.
fn reserve(bytes: u64) {
    let now = CURRENT.fetch_add(bytes, Ordering::Relaxed) + bytes;
    if now > LIMIT.load(Ordering::Relaxed) {
        unsafe {
            libc::write(2, OOM_MESSAGE.as_ptr() as *const libc::c_void, OOM_MESSAGE.len());
            libc::_exit(EXIT_OUT_OF_MEMORY);
        }
    }
    PEAK.fetch_max(now, Ordering::Relaxed);
}

fn release(bytes: u64) {
    CURRENT.fetch_sub(bytes, Ordering::Relaxed);
}

/// Caps live heap bytes for the rest of the process.
pub fn set_limit_bytes(limit: u64) {
    LIMIT.store(limit, Ordering::Relaxed);
}

pub fn current_bytes() -> u64 {
    CURRENT.load(Ordering::Relaxed)
}

pub fn peak_bytes() -> u64 {
    PEAK.load(Ordering::Relaxed)
}

/// Starts a new peak window at the current usage.
pub fn reset_peak() {
    PEAK.store(CURRENT.load(Ordering::Relaxed), Ordering::Relaxed);
}

/// Lets the allocator settle before a timed run: hands freed pages back to
/// the OS where glibc allows it, then yields the thread. Advisory only.
pub fn quiesce() {
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    unsafe {
        libc::malloc_trim(0);
    }
    std::thread::yield_now();
}

/// Pins the calling thread to a single CPU core.
#[cfg(target_os = "linux")]
pub fn set_affinity(core_id: usize) -> std::io::Result<()> {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core_id, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_affinity(_core_id: usize) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "CPU pinning is only supported on Linux",
    ))
}
