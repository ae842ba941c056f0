//! IMT slot → vtable slot resolution
//!
//! An interface call dispatches through an IMT slot at a negative word
//! displacement from the receiver's vtable base. A non-colliding IMT entry
//! already holds the single possible target, so the observed slot is
//! authoritative and patched directly. A colliding entry holds a dispatch
//! thunk shared by several interface methods; patching the thunk's slot
//! would break the other methods, so the resolver walks to the concrete
//! vtable slot of the interface method that was actually dispatched.

use log::trace;

use crate::dispatch::TrampolineDispatch;
use crate::services::RegisterSnapshot;
use crate::vm::{MethodRef, SlotAddr, IMT_SIZE};

impl TrampolineDispatch {
    /// Resolve an observed dispatch slot into the effective vtable slot to
    /// patch. Returns the slot unchanged when it already lies in the vtable
    /// proper, or when it is a non-colliding IMT entry.
    pub(crate) fn imt_to_vtable_slot(
        &self,
        slot: SlotAddr,
        regs: &RegisterSnapshot,
        method: &MethodRef,
    ) -> SlotAddr {
        let this = self.services().arch.this_argument(regs, method);
        let vtable = this.vtable().clone();
        let displacement = slot.word_displacement_from(vtable.slot_base());

        if displacement >= 0 {
            trace!(
                "imt_to_vtable_slot: slot {:#x} is in the vtable, not in the IMT",
                slot.as_usize()
            );
            return slot;
        }

        let imt_slot = (IMT_SIZE as isize + displacement) as usize;
        assert!(
            imt_slot < IMT_SIZE,
            "observed slot {:#x} lies below the IMT region of {:?}",
            slot.as_usize(),
            vtable
        );

        let imt_method = self.services().arch.imt_method(regs);
        let interface_offset = self
            .services()
            .metadata
            .interface_offset(vtable.class(), imt_method.class());
        trace!(
            "imt_to_vtable_slot: method = {}.{}, imt_method = {}.{}",
            method.class().name(),
            method.name(),
            imt_method.class().name(),
            imt_method.name()
        );

        if vtable.imt_slot_collides(imt_slot) {
            assert!(
                interface_offset >= 0,
                "class `{}` dispatched interface method `{}.{}` without implementing the interface",
                vtable.class().name(),
                imt_method.class().name(),
                imt_method.name()
            );
            let vtable_offset = interface_offset as usize + imt_method.vtable_slot();
            let resolved = vtable.slot_addr(vtable_offset);
            trace!(
                "imt_to_vtable_slot: slot {:#x}[{}] is colliding, becomes {:#x}[{}] \
                 (interface_offset = {}, method slot = {})",
                slot.as_usize(),
                imt_slot,
                resolved.as_usize(),
                vtable_offset,
                interface_offset,
                imt_method.vtable_slot()
            );
            resolved
        } else {
            trace!(
                "imt_to_vtable_slot: slot {:#x}[{}] is in the IMT, not colliding",
                slot.as_usize(),
                imt_slot
            );
            slot
        }
    }
}
