//! The class-init trampoline: static initialiser execution
//!
//! AOT and JIT code call this trampoline before the first use of a type
//! whose static initialiser has not provably run. The initialiser runner is
//! idempotent, so the only job left here is erasing the call site: the
//! calling instruction is rewritten to a no-op (or the PLT stub to a branch
//! past the call) so initialised types pay nothing on later paths.

use crate::dispatch::{DispatchStats, TrampolineDispatch};
use crate::services::RegisterSnapshot;
use crate::vm::{CodeAddr, VTable};
use std::sync::Arc;

impl TrampolineDispatch {
    /// Run the static initialiser for `vtable`'s class, then nullify the
    /// calling code so the caller proceeds as if the initialiser had always
    /// been run.
    ///
    /// Under a memory checker the call site is left intact (the checker
    /// objects to self-modifying code) and the trampoline simply runs
    /// again on later calls, which is correct because the initialiser
    /// runner is idempotent. `tramp` is the trampoline's own address;
    /// unused by the portable core.
    pub fn class_init_trampoline(
        &self,
        regs: &RegisterSnapshot,
        code: CodeAddr,
        vtable: &Arc<VTable>,
        _tramp: CodeAddr,
    ) {
        DispatchStats::bump(&self.stats().class_init_entries);
        let plt_entry = self.services().aot.plt_entry(code);

        self.services().class_init.class_init(vtable);

        if self.config().memcheck {
            return;
        }

        match plt_entry {
            Some(plt) => self.services().arch.nullify_plt_entry(plt),
            None => self.services().arch.nullify_class_init_callsite(code, regs),
        }
    }
}
