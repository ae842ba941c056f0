//! The delegate trampoline: `Invoke` dispatch with thunk caching
//!
//! A freshly constructed delegate's `invoke_impl` points here. For a
//! single-target delegate the architecture backend can usually emit a
//! specialised invoke thunk for the signature; those thunks are cached per
//! domain, keyed by signature identity and split by target-presence, so
//! every delegate of the same shape shares one. Multicast delegates and
//! signatures the backend cannot specialise fall back to a compiled
//! generic wrapper from the marshal layer.

use log::trace;

use crate::dispatch::{DispatchError, DispatchStats, TrampolineDispatch};
use crate::services::RegisterSnapshot;
use crate::vm::{ClassRef, CodeAddr};

impl TrampolineDispatch {
    /// Resolve a call to a delegate's `Invoke` and install the resolved
    /// implementation in the delegate instance.
    ///
    /// Returns the installed address; the thunk transfers control there.
    /// `tramp` is the trampoline's own address; unused by the portable
    /// core.
    pub fn delegate_trampoline(
        &self,
        regs: &RegisterSnapshot,
        code: CodeAddr,
        class: &ClassRef,
        _tramp: CodeAddr,
    ) -> Result<CodeAddr, DispatchError> {
        DispatchStats::bump(&self.stats().delegate_entries);
        let domain = self.services().domains.current();

        let invoke = class
            .methods()
            .find(|m| m.name() == "Invoke")
            .cloned()
            .ok_or_else(|| DispatchError::MissingInvoke {
                class: class.name().to_string(),
            })?;

        let delegate = self
            .services()
            .arch
            .delegate_from_call(invoke.signature(), regs, code);

        // If the delegate still points at a trampoline, swap in the
        // compiled body so further calls skip the trampoline.
        if let Some(ji) = domain.jit_info_find(delegate.method_ptr()) {
            let body = self.services().compiler.compile(ji.method())?;
            delegate.set_method_ptr(body);
        }

        if !delegate.is_multicast() {
            let sig = invoke.signature();
            let has_target = delegate.target().is_some();

            let cached = domain.delegate_thunks().get(has_target, sig.id());
            if let Some(thunk) = cached {
                trace!(
                    "delegate_trampoline: thunk cache hit for `{}` (has_target = {})",
                    class.name(),
                    has_target
                );
                DispatchStats::bump(&self.stats().delegate_thunk_hits);
                delegate.set_invoke_impl(thunk);
                return Ok(thunk);
            }
            DispatchStats::bump(&self.stats().delegate_thunk_misses);

            // The domain lock is not held while the backend emits the
            // thunk. Two threads may race to generate the same thunk; the
            // insert is last-writer-wins and both thunks are equivalent,
            // the loser's storage staying allocated until domain teardown.
            if let Some(thunk) = self.services().arch.delegate_invoke_impl(sig, has_target) {
                domain.delegate_thunks().insert(has_target, sig.id(), thunk);
                delegate.set_invoke_impl(thunk);
                return Ok(thunk);
            }
        }

        // The general, unoptimized case
        let wrapper = self.services().marshal.delegate_invoke_wrapper(&invoke);
        let addr = self.services().compiler.compile(&wrapper)?;
        delegate.set_invoke_impl(addr);
        Ok(addr)
    }
}
