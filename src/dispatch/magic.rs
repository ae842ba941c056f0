//! The magic trampoline: calls from JIT-compiled code
//!
//! Every call site the JIT emits for a not-yet-compiled method initially
//! targets this trampoline. It compiles the method, then patches whichever
//! kind of call site brought us here (a vtable/IMT slot, an AOT PLT stub,
//! or a direct call instruction) so the next call goes straight to the
//! compiled body.

use log::debug;

use crate::dispatch::{DispatchError, DispatchStats, TrampolineDispatch};
use crate::services::RegisterSnapshot;
use crate::vm::{CodeAddr, MethodRef};

impl TrampolineDispatch {
    /// Resolve a call from JIT-compiled code to `method`.
    ///
    /// `code` is the caller's return address, or `None` when the method was
    /// jumped to rather than called; a tail call leaves no call site to
    /// patch. `tramp` is the trampoline's own address; it is part of the
    /// thunk-side contract but the portable core has no use for it.
    ///
    /// Returns the address the thunk transfers control to: the compiled
    /// body, or its unbox trampoline when a value-type method was invoked
    /// through a dispatch slot.
    pub fn magic_trampoline(
        &self,
        regs: &RegisterSnapshot,
        code: Option<CodeAddr>,
        method: &MethodRef,
        _tramp: CodeAddr,
    ) -> Result<CodeAddr, DispatchError> {
        DispatchStats::bump(&self.stats().magic_entries);
        let mut target = self.services().compiler.compile(method)?;

        let code = match code {
            Some(code) => code,
            None => return Ok(target),
        };

        if let Some(slot) = self.services().arch.vcall_slot_addr(code, regs) {
            if method.class().is_value_type() {
                target = self.services().arch.unbox_trampoline(method, target);
            }

            assert!(
                self.patcher().load_slot(slot) != 0,
                "dispatch slot {:#x} is null while resolving `{}`",
                slot.as_usize(),
                method.name()
            );

            let domain = self.services().domains.current();
            if self.slot_is_patchable(code, slot, &domain) {
                let slot = self.imt_to_vtable_slot(slot, regs, method);
                self.patcher().store_slot(slot, target);
                DispatchStats::bump(&self.stats().slots_patched);
            } else {
                debug!(
                    "leaving slot {:#x} unpatched for `{}`: not owned by domain `{}`",
                    slot.as_usize(),
                    method.name(),
                    domain.name()
                );
                DispatchStats::bump(&self.stats().patches_skipped);
            }
        } else if let Some(plt) = self.services().aot.plt_entry(code) {
            self.patcher().rewrite_plt(plt, target);
            DispatchStats::bump(&self.stats().plt_entries_patched);
        } else {
            self.patch_direct_callsite(code, target);
        }

        Ok(target)
    }
}
