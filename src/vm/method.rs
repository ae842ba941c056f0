//! Method descriptors and canonical signatures

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::vm::class::ClassRef;

/// Global counter for signature identities
static NEXT_SIGNATURE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a canonicalised method signature.
///
/// Signatures are canonicalised by the metadata layer: two methods with the
/// same parameter shape share one `MethodSignature` instance, so identity
/// comparison (this id) stands in for structural comparison everywhere in
/// the dispatch core, including the delegate thunk caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignatureId(u64);

/// A canonicalised method signature
#[derive(Debug)]
pub struct MethodSignature {
    id: SignatureId,
    param_count: usize,
    has_this: bool,
}

impl MethodSignature {
    /// Create a fresh canonical signature with a unique identity
    pub fn new(param_count: usize, has_this: bool) -> Arc<Self> {
        Arc::new(MethodSignature {
            id: SignatureId(NEXT_SIGNATURE_ID.fetch_add(1, Ordering::Relaxed)),
            param_count,
            has_this,
        })
    }

    /// Signature identity
    pub fn id(&self) -> SignatureId {
        self.id
    }

    /// Number of declared parameters (excluding `this`)
    pub fn param_count(&self) -> usize {
        self.param_count
    }

    /// Whether the signature carries an implicit `this` argument
    pub fn has_this(&self) -> bool {
        self.has_this
    }
}

/// Method implementation flags from metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MethodImplFlags(u32);

impl MethodImplFlags {
    /// No implementation flags
    pub const NONE: MethodImplFlags = MethodImplFlags(0);
    /// Body must run under the object/type lock; calls go through a
    /// synchronized wrapper built by the marshal layer
    pub const SYNCHRONIZED: MethodImplFlags = MethodImplFlags(0x0020);

    /// Raw flag bits
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Whether all bits of `other` are set
    pub fn contains(self, other: MethodImplFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for MethodImplFlags {
    type Output = MethodImplFlags;

    fn bitor(self, rhs: MethodImplFlags) -> MethodImplFlags {
        MethodImplFlags(self.0 | rhs.0)
    }
}

/// Shared handle to a method descriptor
pub type MethodRef = Arc<MethodDesc>;

/// Method descriptor supplied by the metadata layer.
///
/// Read-only to the dispatch core.
pub struct MethodDesc {
    name: String,
    class: ClassRef,
    signature: Arc<MethodSignature>,
    impl_flags: MethodImplFlags,
    vtable_slot: usize,
}

impl MethodDesc {
    /// Create a method descriptor
    pub fn new(
        name: impl Into<String>,
        class: ClassRef,
        signature: Arc<MethodSignature>,
        impl_flags: MethodImplFlags,
        vtable_slot: usize,
    ) -> MethodRef {
        Arc::new(MethodDesc {
            name: name.into(),
            class,
            signature,
            impl_flags,
            vtable_slot,
        })
    }

    /// Method name as it appears in metadata
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declaring class
    pub fn class(&self) -> &ClassRef {
        &self.class
    }

    /// Canonical signature
    pub fn signature(&self) -> &Arc<MethodSignature> {
        &self.signature
    }

    /// Implementation flags
    pub fn impl_flags(&self) -> MethodImplFlags {
        self.impl_flags
    }

    /// Virtual slot index within the declaring type's vtable layout
    pub fn vtable_slot(&self) -> usize {
        self.vtable_slot
    }
}

// Manual impl: MethodDesc and ClassDesc reference each other, so a derived
// Debug would recurse through the cycle.
impl std::fmt::Debug for MethodDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDesc")
            .field("name", &format_args!("{}.{}", self.class.name(), self.name))
            .field("signature", &self.signature.id())
            .field("impl_flags", &self.impl_flags)
            .field("vtable_slot", &self.vtable_slot)
            .finish()
    }
}
