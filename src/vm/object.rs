//! Heap object headers and delegate objects

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::vm::vtable::{CodeAddr, VTable};

/// Shared handle to a heap object
pub type ObjectRef = Arc<HeapObject>;

/// Object header: the part of a managed object the dispatch core reads.
///
/// Virtual and interface dispatch only need the receiver's vtable; field
/// storage belongs to the GC'd heap and never crosses into this crate.
#[derive(Debug)]
pub struct HeapObject {
    vtable: Arc<VTable>,
}

impl HeapObject {
    /// Allocate an object header for the given dispatch table
    pub fn new(vtable: Arc<VTable>) -> ObjectRef {
        Arc::new(HeapObject { vtable })
    }

    /// The receiver's dispatch table
    pub fn vtable(&self) -> &Arc<VTable> {
        &self.vtable
    }
}

/// Shared handle to a delegate object
pub type DelegateRef = Arc<Delegate>;

/// A delegate instance: a first-class callable pairing an optional bound
/// target with a method address.
///
/// `method_ptr` and `invoke_impl` are mutated in place by the delegate
/// trampoline; both are code-address words written with release stores so
/// generated code on other processors reads them untorn. `invoke_impl`
/// moves from unset to either a specialised thunk or the generic wrapper
/// and is never reverted afterwards.
#[derive(Debug)]
pub struct Delegate {
    target: Option<ObjectRef>,
    method_ptr: AtomicUsize,
    invoke_impl: AtomicUsize,
    prev: Option<DelegateRef>,
}

impl Delegate {
    /// Create a single-target delegate
    pub fn new(target: Option<ObjectRef>, method_ptr: CodeAddr) -> DelegateRef {
        Arc::new(Delegate {
            target,
            method_ptr: AtomicUsize::new(method_ptr.as_usize()),
            invoke_impl: AtomicUsize::new(0),
            prev: None,
        })
    }

    /// Create a multicast node chained before `prev`
    pub fn multicast(
        target: Option<ObjectRef>,
        method_ptr: CodeAddr,
        prev: DelegateRef,
    ) -> DelegateRef {
        Arc::new(Delegate {
            target,
            method_ptr: AtomicUsize::new(method_ptr.as_usize()),
            invoke_impl: AtomicUsize::new(0),
            prev: Some(prev),
        })
    }

    /// Bound target object, if any
    pub fn target(&self) -> Option<&ObjectRef> {
        self.target.as_ref()
    }

    /// Current method address
    pub fn method_ptr(&self) -> CodeAddr {
        CodeAddr::new(self.method_ptr.load(Ordering::Acquire))
    }

    /// Replace the method address (trampoline → compiled body)
    pub fn set_method_ptr(&self, addr: CodeAddr) {
        self.method_ptr.store(addr.as_usize(), Ordering::Release);
    }

    /// Current `Invoke` implementation, if one has been installed
    pub fn invoke_impl(&self) -> Option<CodeAddr> {
        match self.invoke_impl.load(Ordering::Acquire) {
            0 => None,
            addr => Some(CodeAddr::new(addr)),
        }
    }

    /// Install the `Invoke` implementation
    pub fn set_invoke_impl(&self, addr: CodeAddr) {
        self.invoke_impl.store(addr.as_usize(), Ordering::Release);
    }

    /// Next node in the multicast chain
    pub fn prev(&self) -> Option<&DelegateRef> {
        self.prev.as_ref()
    }

    /// Whether this delegate heads a multicast chain
    pub fn is_multicast(&self) -> bool {
        self.prev.is_some()
    }
}
