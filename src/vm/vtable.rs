//! Dispatch tables: the vtable and its leading IMT region
//!
//! # Memory layout
//!
//! ```text
//! ┌─────────────────────────────┐
//! │ IMT slot 0                  │  ← storage word 0
//! │ ...                         │
//! │ IMT slot IMT_SIZE-1         │
//! ├─────────────────────────────┤
//! │ vtable slot 0               │  ← slot base (word IMT_SIZE)
//! │ vtable slot 1               │
//! │ ...                         │
//! └─────────────────────────────┘
//! ```
//!
//! Generated code indexes both regions relative to the slot base: virtual
//! calls use non-negative word displacements, interface calls use negative
//! ones. Every word holds a code address and is written with single-word
//! atomic stores, so dispatch on other processors never observes a torn slot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::vm::class::ClassRef;
use crate::vm::domain::DomainId;

/// Number of interface-method-table slots preceding every vtable
pub const IMT_SIZE: usize = 19;

/// Address of generated code (a function entry point, trampoline, or thunk).
///
/// Code addresses are opaque to the dispatch core; only the architecture
/// backend interprets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeAddr(usize);

impl CodeAddr {
    /// Wrap a raw code address
    pub const fn new(addr: usize) -> CodeAddr {
        CodeAddr(addr)
    }

    /// Raw address value
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// Address of a function-pointer-sized dispatch slot word.
///
/// Points into the storage of a live [`VTable`] (either region) or an AOT
/// global-offset-table entry. Dispatch slots live exactly as long as their
/// owning domain, which outlives every trampoline invocation; the raw
/// address is therefore valid for the duration of any dispatch operation
/// that observed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotAddr(usize);

impl SlotAddr {
    /// Wrap a raw slot address
    pub const fn new(addr: usize) -> SlotAddr {
        SlotAddr(addr)
    }

    /// Raw address value
    pub fn as_usize(self) -> usize {
        self.0
    }

    /// Signed displacement from `base`, in pointer-sized words
    pub fn word_displacement_from(self, base: SlotAddr) -> isize {
        let bytes = self.0 as isize - base.0 as isize;
        bytes / std::mem::size_of::<usize>() as isize
    }
}

/// Per-(class, domain) dispatch table with its leading IMT region.
///
/// Slot words are `AtomicUsize` so concurrent dispatch and patching stay
/// tear-free; the patcher writes them with release ordering.
pub struct VTable {
    class: ClassRef,
    domain: DomainId,
    /// One bit per IMT slot; set iff that entry is a collision thunk
    imt_collisions: u32,
    /// IMT region followed by the virtual slots, contiguous
    words: Box<[AtomicUsize]>,
}

impl VTable {
    /// Create a table with `slot_count` virtual slots, all words zeroed
    pub fn new(class: ClassRef, domain: DomainId, slot_count: usize) -> Arc<VTable> {
        VTable::with_imt_collisions(class, domain, slot_count, 0)
    }

    /// Create a table with the given IMT collision bitmap
    pub fn with_imt_collisions(
        class: ClassRef,
        domain: DomainId,
        slot_count: usize,
        imt_collisions: u32,
    ) -> Arc<VTable> {
        let words = (0..IMT_SIZE + slot_count)
            .map(|_| AtomicUsize::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Arc::new(VTable {
            class,
            domain,
            imt_collisions,
            words,
        })
    }

    /// Class this table dispatches for
    pub fn class(&self) -> &ClassRef {
        &self.class
    }

    /// Domain that owns this table's slots
    pub fn domain(&self) -> DomainId {
        self.domain
    }

    /// Number of virtual slots (IMT region excluded)
    pub fn slot_count(&self) -> usize {
        self.words.len() - IMT_SIZE
    }

    /// Whether IMT slot `imt_slot` holds a collision thunk
    pub fn imt_slot_collides(&self, imt_slot: usize) -> bool {
        debug_assert!(imt_slot < IMT_SIZE);
        self.imt_collisions & (1 << imt_slot) != 0
    }

    /// Address of virtual slot 0; IMT displacements are negative from here
    pub fn slot_base(&self) -> SlotAddr {
        SlotAddr(&self.words[IMT_SIZE] as *const AtomicUsize as usize)
    }

    /// Address of virtual slot `index`
    pub fn slot_addr(&self, index: usize) -> SlotAddr {
        SlotAddr(&self.words[IMT_SIZE + index] as *const AtomicUsize as usize)
    }

    /// Address of IMT slot `imt_slot`
    pub fn imt_slot_addr(&self, imt_slot: usize) -> SlotAddr {
        debug_assert!(imt_slot < IMT_SIZE);
        SlotAddr(&self.words[imt_slot] as *const AtomicUsize as usize)
    }

    /// Install a code address in virtual slot `index`
    pub fn write_slot(&self, index: usize, addr: CodeAddr) {
        self.words[IMT_SIZE + index].store(addr.as_usize(), Ordering::Release);
    }

    /// Install a code address in IMT slot `imt_slot`
    pub fn write_imt_slot(&self, imt_slot: usize, addr: CodeAddr) {
        debug_assert!(imt_slot < IMT_SIZE);
        self.words[imt_slot].store(addr.as_usize(), Ordering::Release);
    }

    /// Current word in virtual slot `index`
    pub fn slot(&self, index: usize) -> usize {
        self.words[IMT_SIZE + index].load(Ordering::Acquire)
    }

    /// Current word in IMT slot `imt_slot`
    pub fn imt_slot(&self, imt_slot: usize) -> usize {
        debug_assert!(imt_slot < IMT_SIZE);
        self.words[imt_slot].load(Ordering::Acquire)
    }

    /// Whether `slot` addresses a word inside this table (either region)
    pub fn contains_slot(&self, slot: SlotAddr) -> bool {
        let word = std::mem::size_of::<usize>();
        let start = self.words.as_ptr() as usize;
        let end = start + self.words.len() * word;
        slot.as_usize() >= start && slot.as_usize() < end && slot.as_usize() % word == 0
    }
}

impl std::fmt::Debug for VTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VTable")
            .field("class", &self.class.name())
            .field("domain", &self.domain)
            .field("slot_count", &self.slot_count())
            .field("imt_collisions", &format_args!("{:#b}", self.imt_collisions))
            .finish()
    }
}
