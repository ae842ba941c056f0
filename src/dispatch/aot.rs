//! AOT trampolines: token-based method resolution and PLT dispatch
//!
//! Calls from AOT-compiled code avoid the normal JIT path where possible:
//! the method trampoline first asks the AOT image for a pre-compiled body
//! so the method's metadata never has to be realised, and only falls back
//! to metadata plus on-demand compilation when the image has none.

use crate::dispatch::{DispatchError, DispatchStats, TrampolineDispatch};
use crate::services::{AotModuleHandle, MethodTokenRef, RegisterSnapshot};
use crate::vm::{CodeAddr, MethodImplFlags, MethodRef};

impl TrampolineDispatch {
    /// Resolve a call from AOT code to the method named by the token blob
    /// the AOT image emitted after the trampoline.
    ///
    /// `tramp` is the trampoline's own address; part of the thunk-side
    /// contract, unused by the portable core.
    pub fn aot_method_trampoline(
        &self,
        regs: &RegisterSnapshot,
        code: CodeAddr,
        token_blob: &[u8],
        _tramp: CodeAddr,
    ) -> Result<CodeAddr, DispatchError> {
        DispatchStats::bump(&self.stats().aot_method_entries);
        let token_ref = MethodTokenRef::decode(token_blob);
        let domain = self.services().domains.current();

        let mut method: Option<MethodRef> = None;
        let mut target = match self
            .services()
            .aot
            .method_from_token(&domain, token_ref.image, token_ref.token)
        {
            Some(addr) => addr,
            None => {
                let mut m = self.realize_token_method(token_ref)?;
                if m.impl_flags().contains(MethodImplFlags::SYNCHRONIZED) {
                    m = self.services().marshal.synchronized_wrapper(&m);
                }
                let addr = self.services().compiler.compile(&m)?;
                method = Some(m);
                addr
            }
        };

        let vtable_slot = self.services().arch.vcall_slot_addr(code, regs);
        let mut is_got_entry = false;
        match vtable_slot {
            Some(slot) => {
                is_got_entry = self.services().aot.is_got_entry(code, slot);
                if !is_got_entry {
                    // Value-type detection needs the descriptor even when
                    // the AOT image supplied the body.
                    let m = match method {
                        Some(ref m) => m.clone(),
                        None => self.realize_token_method(token_ref)?,
                    };
                    if m.class().is_value_type() {
                        target = self.services().arch.unbox_trampoline(&m, target);
                    }
                }
            }
            None => {
                // A normal call through a PLT entry
                let Some(plt) = self.services().aot.plt_entry(code) else {
                    panic!(
                        "AOT call at {:#x} has neither a vtable slot nor a PLT entry",
                        code.as_usize()
                    );
                };
                self.patcher().rewrite_plt(plt, target);
                DispatchStats::bump(&self.stats().plt_entries_patched);
            }
        }

        // AOT code is only installed in the root domain, so for a GOT slot
        // "current domain is the root domain" is the same-domain check
        // without realising the caller's metadata; a non-root current
        // domain here means a cross-domain invocation and the slot is left
        // alone. Non-GOT slots follow plain domain ownership. An absent
        // slot is never owned.
        let patchable = (is_got_entry && domain.is_root())
            || vtable_slot.is_some_and(|slot| domain.owns_vtable_slot(slot));
        if let Some(slot) = vtable_slot {
            if patchable {
                self.patcher().store_slot(slot, target);
                DispatchStats::bump(&self.stats().slots_patched);
            } else {
                DispatchStats::bump(&self.stats().patches_skipped);
            }
        }

        Ok(target)
    }

    /// Resolve a call from AOT code that went through the PLT.
    ///
    /// The PLT info offset travels in a dedicated register on architectures
    /// that define one; the AOT resolver locates the call target from it
    /// and rewrites the PLT stub itself, so no patching happens here.
    pub fn aot_plt_trampoline(
        &self,
        regs: &RegisterSnapshot,
        code: CodeAddr,
        module: AotModuleHandle,
        _tramp: CodeAddr,
    ) -> CodeAddr {
        DispatchStats::bump(&self.stats().aot_plt_entries);
        let plt_info_offset = self.services().arch.plt_info_offset(regs);
        self.services().aot.plt_resolve(module, plt_info_offset, code)
    }

    fn realize_token_method(&self, token_ref: MethodTokenRef) -> Result<MethodRef, DispatchError> {
        self.services()
            .metadata
            .method_from_token(token_ref.image, token_ref.token)
            .ok_or(DispatchError::MethodResolution {
                image: token_ref.image.as_usize(),
                token: token_ref.token.0,
            })
    }
}
