//! Call-site classification and patching
//!
//! All mutation of generated code and dispatch words funnels through
//! [`CodePatcher`]. Dispatch slot words are stored with single-word release
//! stores so processors executing the generated code observe either the
//! trampoline address or the resolved target, never a torn word. Rewrites
//! of actual instructions (direct calls, PLT stubs) are delegated to the
//! architecture backend, which is the authority on what can be patched in
//! place and flushes instruction caches where the architecture requires.

use log::{debug, trace};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::dispatch::{DispatchStats, TrampolineDispatch};
use crate::services::{Arch, PltEntry};
use crate::vm::{domain, CodeAddr, Domain, SlotAddr};

/// Patches call sites and dispatch slots
pub struct CodePatcher {
    arch: Arc<dyn Arch>,
}

impl CodePatcher {
    /// Create a patcher backed by the given architecture
    pub fn new(arch: Arc<dyn Arch>) -> CodePatcher {
        CodePatcher { arch }
    }

    /// Store `target` into a dispatch slot word.
    ///
    /// Release ordering pairs with the acquire loads generated dispatch
    /// sequences use; racing stores are benign because every racer stores
    /// the same resolved address.
    pub fn store_slot(&self, slot: SlotAddr, target: CodeAddr) {
        trace!("store_slot: {:#x} <- {:#x}", slot.as_usize(), target.as_usize());
        // Safety: slot addresses come from the architecture backend or the
        // IMT resolver and point at words inside live vtable storage (or an
        // AOT GOT entry), which the owning domain keeps alive for the
        // duration of every dispatch operation.
        let word = unsafe { &*(slot.as_usize() as *const AtomicUsize) };
        word.store(target.as_usize(), Ordering::Release);
    }

    /// Current word of a dispatch slot
    pub fn load_slot(&self, slot: SlotAddr) -> usize {
        // Safety: see store_slot
        let word = unsafe { &*(slot.as_usize() as *const AtomicUsize) };
        word.load(Ordering::Acquire)
    }

    /// Rewrite the direct call instruction at `code` to call `target`
    pub fn rewrite_call(&self, code: CodeAddr, target: CodeAddr) {
        trace!("rewrite_call: {:#x} -> {:#x}", code.as_usize(), target.as_usize());
        self.arch.patch_callsite(code, target);
    }

    /// Rewrite a PLT stub to jump to `target`
    pub fn rewrite_plt(&self, plt: PltEntry, target: CodeAddr) {
        trace!("rewrite_plt: {:#x} -> {:#x}", plt.0, target.as_usize());
        self.arch.patch_plt_entry(plt, target);
    }
}

impl TrampolineDispatch {
    /// Whether a vtable slot observed at `code` may be patched from the
    /// current domain: it must be domain-owned, or a GOT entry of the AOT
    /// image the call came from.
    pub(crate) fn slot_is_patchable(
        &self,
        code: CodeAddr,
        slot: SlotAddr,
        domain: &Arc<Domain>,
    ) -> bool {
        self.services().aot.is_got_entry(code, slot) || domain.owns_vtable_slot(slot)
    }

    /// Patch a direct call site under the same-domain rule: both the
    /// originating and the target code range must be known to the current
    /// domain. A cross-domain call site is left alone; re-entering the
    /// trampoline on every call is the correct behaviour there, because the
    /// slot's lifetime is governed by the owning domain.
    pub(crate) fn patch_direct_callsite(&self, code: CodeAddr, target: CodeAddr) {
        let current = self.services().domains.current();
        let ji = current.jit_info_find(code);
        let target_ji = current.jit_info_find(target);

        if domain::same_domain(ji.as_deref(), target_ji.as_deref()) {
            self.patcher().rewrite_call(code, target);
            DispatchStats::bump(&self.stats().callsites_patched);
        } else {
            debug!(
                "leaving call site {:#x} unpatched: caller and target not in the same domain",
                code.as_usize()
            );
            DispatchStats::bump(&self.stats().patches_skipped);
        }
    }
}
