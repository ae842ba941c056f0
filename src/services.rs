//! Collaborator traits the dispatch core is built against
//!
//! The trampolines contain only portable resolution and patching logic;
//! compilation, metadata access, AOT image reading, wrapper construction,
//! and everything architecture-specific are injected through the traits
//! here. Production wiring lives in the embedding runtime; tests inject
//! recording mocks.

use std::sync::Arc;

use crate::vm::{
    ClassRef, CodeAddr, DelegateRef, Domain, DomainRegistry, MethodRef, MethodSignature,
    ObjectRef, SlotAddr, VTable,
};

/// Number of pointer-sized words captured in a register snapshot
pub const REGISTER_WORDS: usize = 16;

/// Architecture-defined register state captured by a trampoline's entry
/// thunk.
///
/// Opaque to the dispatch core: only [`Arch`] implementations interpret the
/// words (which register holds `this`, where the IMT dispatch method was
/// stashed, and so on).
#[derive(Debug, Clone, Default)]
pub struct RegisterSnapshot {
    words: [usize; REGISTER_WORDS],
}

impl RegisterSnapshot {
    /// Capture a snapshot from raw register words
    pub fn new(words: [usize; REGISTER_WORDS]) -> RegisterSnapshot {
        RegisterSnapshot { words }
    }

    /// Word of register `index`
    pub fn word(&self, index: usize) -> usize {
        self.words[index]
    }
}

/// Opaque handle to a loaded metadata image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle(usize);

impl ImageHandle {
    /// Wrap a raw image handle
    pub const fn new(raw: usize) -> ImageHandle {
        ImageHandle(raw)
    }

    /// Raw handle value
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// A metadata token identifying a method within an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodToken(pub u32);

/// An (image, token) pair read from the inline data blob an AOT image
/// emits after a method trampoline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodTokenRef {
    /// Image the token resolves in
    pub image: ImageHandle,
    /// Method token
    pub token: MethodToken,
}

impl MethodTokenRef {
    /// Size of the encoded blob: a pointer-sized image handle followed by a
    /// 32-bit token, naturally packed in host endianness
    pub const ENCODED_LEN: usize = std::mem::size_of::<usize>() + 4;

    /// Decode a token blob. Panics if the blob is shorter than
    /// [`Self::ENCODED_LEN`]; a short blob means the AOT image is corrupt.
    pub fn decode(blob: &[u8]) -> MethodTokenRef {
        assert!(blob.len() >= Self::ENCODED_LEN, "method token blob too short");
        const PTR: usize = std::mem::size_of::<usize>();
        let mut image = [0u8; PTR];
        image.copy_from_slice(&blob[..PTR]);
        let mut token = [0u8; 4];
        token.copy_from_slice(&blob[PTR..PTR + 4]);
        MethodTokenRef {
            image: ImageHandle(usize::from_ne_bytes(image)),
            token: MethodToken(u32::from_ne_bytes(token)),
        }
    }

    /// Encode to the inline blob layout (used by AOT emission and tests)
    pub fn encode(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(Self::ENCODED_LEN);
        blob.extend_from_slice(&self.image.0.to_ne_bytes());
        blob.extend_from_slice(&self.token.0.to_ne_bytes());
        blob
    }
}

/// Opaque handle to a loaded AOT module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AotModuleHandle(pub usize);

/// Address of an AOT procedure-linkage-table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PltEntry(pub usize);

/// Error during on-demand method compilation
#[derive(Debug, thiserror::Error)]
#[error("compilation of `{method}` failed: {reason}")]
pub struct CompileError {
    /// Name of the method that failed to compile
    pub method: String,
    /// Backend-reported reason
    pub reason: String,
}

/// The method compiler. Thread-safe; may block on global compiler locks.
///
/// Failure is fatal for the calling trampoline: the caller is already inside
/// a prologue that expects a resolved address, so there is no recovery path.
pub trait Compiler: Send + Sync {
    /// Compile `method` and return the address of its body
    fn compile(&self, method: &MethodRef) -> Result<CodeAddr, CompileError>;
}

/// Metadata access
pub trait Metadata: Send + Sync {
    /// Realise the method descriptor for a token, or `None` if the token
    /// does not resolve (corrupt AOT input)
    fn method_from_token(&self, image: ImageHandle, token: MethodToken) -> Option<MethodRef>;

    /// Offset at which `interface`'s methods were laid out within `class`'s
    /// vtable; negative if the class does not implement the interface
    fn interface_offset(&self, class: &ClassRef, interface: &ClassRef) -> isize;
}

/// AOT image queries and PLT resolution
pub trait AotImages: Send + Sync {
    /// Address of a pre-compiled AOT body for the token, if the image
    /// carries one usable in `domain`
    fn method_from_token(
        &self,
        domain: &Arc<Domain>,
        image: ImageHandle,
        token: MethodToken,
    ) -> Option<CodeAddr>;

    /// Whether `slot` is a global-offset-table entry of the AOT image that
    /// emitted the code at `code`
    fn is_got_entry(&self, code: CodeAddr, slot: SlotAddr) -> bool;

    /// The PLT entry the call at `code` went through, if any
    fn plt_entry(&self, code: CodeAddr) -> Option<PltEntry>;

    /// Resolve a PLT call and patch the stub; returns the resolved target
    fn plt_resolve(
        &self,
        module: AotModuleHandle,
        plt_info_offset: Option<u32>,
        code: CodeAddr,
    ) -> CodeAddr;
}

/// Wrapper-method construction (marshalling layer)
pub trait Marshal: Send + Sync {
    /// Wrapper that takes the synchronization lock around `method`
    fn synchronized_wrapper(&self, method: &MethodRef) -> MethodRef;

    /// Generic wrapper implementing delegate `Invoke` semantics (multicast
    /// walking, target binding) for the given `Invoke` method
    fn delegate_invoke_wrapper(&self, invoke: &MethodRef) -> MethodRef;
}

/// Architecture backend: register decoding, call-site inspection, and
/// instruction rewriting. The sole authority on what is safe to patch in
/// place on the target architecture.
pub trait Arch: Send + Sync {
    /// The receiver (`this`) of the interrupted call, per calling convention
    fn this_argument(&self, regs: &RegisterSnapshot, method: &MethodRef) -> ObjectRef;

    /// The interface method actually dispatched, reconstructed from the
    /// architecture's IMT scratch register
    fn imt_method(&self, regs: &RegisterSnapshot) -> MethodRef;

    /// If the call at `code` was indirect through a dispatch slot, the
    /// address of that slot
    fn vcall_slot_addr(&self, code: CodeAddr, regs: &RegisterSnapshot) -> Option<SlotAddr>;

    /// The delegate instance of the interrupted `Invoke` call, located via
    /// the invoke signature's calling convention
    fn delegate_from_call(
        &self,
        sig: &Arc<MethodSignature>,
        regs: &RegisterSnapshot,
        code: CodeAddr,
    ) -> DelegateRef;

    /// A stub that strips the boxed header from the receiver before jumping
    /// to a value-type method body at `addr`
    fn unbox_trampoline(&self, method: &MethodRef, addr: CodeAddr) -> CodeAddr;

    /// A specialised delegate `Invoke` thunk for the signature, or `None`
    /// if the architecture has no specialisation for this shape
    fn delegate_invoke_impl(
        &self,
        sig: &Arc<MethodSignature>,
        has_target: bool,
    ) -> Option<CodeAddr>;

    /// Rewrite a PLT stub to jump to `target`
    fn patch_plt_entry(&self, plt: PltEntry, target: CodeAddr);

    /// Rewrite the direct call at `code` to call `target`
    fn patch_callsite(&self, code: CodeAddr, target: CodeAddr);

    /// Rewrite a PLT stub to a no-op branch past the class-init call
    fn nullify_plt_entry(&self, plt: PltEntry);

    /// Patch out the class-init call instruction at `code` in place
    fn nullify_class_init_callsite(&self, code: CodeAddr, regs: &RegisterSnapshot);

    /// The PLT info offset the AOT caller stashed in the architecture's
    /// dedicated register, or `None` where the architecture defines none
    fn plt_info_offset(&self, regs: &RegisterSnapshot) -> Option<u32>;
}

/// Domain context for the executing thread
pub trait DomainProvider: Send + Sync {
    /// Domain the current thread dispatches in
    fn current(&self) -> Arc<Domain>;

    /// The root domain
    fn root(&self) -> Arc<Domain>;
}

impl DomainProvider for crate::vm::DomainRegistry {
    fn current(&self) -> Arc<Domain> {
        DomainRegistry::current(self)
    }

    fn root(&self) -> Arc<Domain> {
        DomainRegistry::root(self)
    }
}

/// Runs a type's static initialiser.
///
/// Idempotent: runs the initialiser at most once per type and handles
/// re-entrant initialisation cycles internally.
pub trait ClassInitializer: Send + Sync {
    /// Ensure the static initialiser for `vtable`'s class has run
    fn class_init(&self, vtable: &Arc<VTable>);
}

/// The full collaborator bundle a dispatch core is constructed with
#[derive(Clone)]
pub struct Services {
    /// Method compiler
    pub compiler: Arc<dyn Compiler>,
    /// Metadata access
    pub metadata: Arc<dyn Metadata>,
    /// AOT image queries
    pub aot: Arc<dyn AotImages>,
    /// Wrapper construction
    pub marshal: Arc<dyn Marshal>,
    /// Architecture backend
    pub arch: Arc<dyn Arch>,
    /// Domain context
    pub domains: Arc<dyn DomainProvider>,
    /// Static initialiser runner
    pub class_init: Arc<dyn ClassInitializer>,
}
