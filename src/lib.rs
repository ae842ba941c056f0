//! Vireo trampoline dispatch core
//!
//! This crate implements the dispatch path between generated machine code and
//! the Vireo runtime. Code emitted by the JIT or AOT backend calls into one of
//! five trampoline entry points the first time a target is unresolved:
//! - Bytecode-compiled callers resolving an arbitrary method (magic)
//! - AOT callers resolving a method by metadata token
//! - AOT callers going through the procedure linkage table
//! - Static-initialiser execution before first type use
//! - Delegate `Invoke` dispatch with per-signature thunk caching
//!
//! Each trampoline compiles its target on demand, resolves interface dispatch
//! through the object's IMT/vtable, and patches the originating call site so
//! subsequent calls bypass the trampoline entirely. The compiler, metadata
//! loader, AOT image reader, marshaller, and architecture backend are injected
//! as trait objects; this crate contains only the portable resolution and
//! patching logic.

#![warn(rust_2018_idioms)]

pub mod dispatch;
pub mod services;
pub mod vm;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatch::{
    CodePatcher, DispatchConfig, DispatchError, DispatchStats, TrampolineDispatch,
};
pub use services::{
    AotImages, AotModuleHandle, Arch, ClassInitializer, CompileError, Compiler, DomainProvider,
    ImageHandle, Marshal, Metadata, MethodToken, MethodTokenRef, PltEntry, RegisterSnapshot,
    Services,
};
pub use vm::{
    ClassDesc, ClassRef, CodeAddr, Delegate, DelegateRef, Domain, DomainId, DomainRegistry,
    HeapObject, JitInfo, MethodDesc, MethodImplFlags, MethodRef, MethodSignature, ObjectRef,
    SignatureId, SlotAddr, VTable, IMT_SIZE,
};
