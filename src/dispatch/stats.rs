//! Dispatch counters
//!
//! Relaxed atomic counters the trampolines bump on their hot paths.
//! Readable by embedders for diagnostics; never consulted by dispatch
//! decisions.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one dispatch core
#[derive(Debug, Default)]
pub struct DispatchStats {
    /// Magic trampoline entries
    pub magic_entries: AtomicU64,
    /// AOT method trampoline entries
    pub aot_method_entries: AtomicU64,
    /// AOT PLT trampoline entries
    pub aot_plt_entries: AtomicU64,
    /// Class-init trampoline entries
    pub class_init_entries: AtomicU64,
    /// Delegate trampoline entries
    pub delegate_entries: AtomicU64,
    /// Vtable/IMT slot words patched
    pub slots_patched: AtomicU64,
    /// PLT entries patched
    pub plt_entries_patched: AtomicU64,
    /// Direct call sites rewritten
    pub callsites_patched: AtomicU64,
    /// Patches skipped for domain-ownership or GOT reasons
    pub patches_skipped: AtomicU64,
    /// Delegate thunk cache hits
    pub delegate_thunk_hits: AtomicU64,
    /// Delegate thunk cache misses
    pub delegate_thunk_misses: AtomicU64,
}

impl DispatchStats {
    /// Create zeroed counters
    pub fn new() -> DispatchStats {
        DispatchStats::default()
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
