//! Runtime object model consumed by the dispatch core
//!
//! Method and class descriptors, dispatch tables (vtable + IMT region),
//! heap object headers, delegates, and the domain isolation unit. All of
//! these are owned by the runtime or the managed heap; the dispatch core
//! reads them and mutates only vtable slot words and delegate fields.

pub mod class;
pub mod domain;
pub mod method;
pub mod object;
pub mod vtable;

pub use class::{ClassDesc, ClassRef};
pub use domain::{same_domain, DelegateThunkCaches, Domain, DomainId, DomainRegistry, JitInfo};
pub use method::{MethodDesc, MethodImplFlags, MethodRef, MethodSignature, SignatureId};
pub use object::{Delegate, DelegateRef, HeapObject, ObjectRef};
pub use vtable::{CodeAddr, SlotAddr, VTable, IMT_SIZE};
