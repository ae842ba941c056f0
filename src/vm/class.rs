//! Class descriptors

use once_cell::sync::OnceCell;
use std::sync::Arc;

use crate::vm::method::MethodRef;

/// Shared handle to a class descriptor
pub type ClassRef = Arc<ClassDesc>;

/// Class descriptor supplied by the metadata layer.
///
/// Read-only to the dispatch core. The method list is bound once, after the
/// methods themselves have been constructed (they hold a handle back to the
/// class), and is never mutated afterwards.
pub struct ClassDesc {
    name: String,
    is_value_type: bool,
    methods: OnceCell<Vec<MethodRef>>,
}

impl ClassDesc {
    /// Create a class descriptor with an unbound method list
    pub fn new(name: impl Into<String>, is_value_type: bool) -> ClassRef {
        Arc::new(ClassDesc {
            name: name.into(),
            is_value_type,
            methods: OnceCell::new(),
        })
    }

    /// Class name as it appears in metadata
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether instances are value types (boxed when dispatched virtually)
    pub fn is_value_type(&self) -> bool {
        self.is_value_type
    }

    /// Bind the declared method list. May be called at most once.
    pub fn bind_methods(&self, methods: Vec<MethodRef>) {
        if self.methods.set(methods).is_err() {
            panic!("method list for `{}` bound twice", self.name);
        }
    }

    /// Iterate the declared methods in metadata order
    pub fn methods(&self) -> impl Iterator<Item = &MethodRef> {
        self.methods.get().map(|v| v.as_slice()).unwrap_or(&[]).iter()
    }
}

// Manual impl: the method list refers back to this class, so a derived
// Debug would recurse through the cycle.
impl std::fmt::Debug for ClassDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassDesc")
            .field("name", &self.name)
            .field("is_value_type", &self.is_value_type)
            .field("methods", &self.methods.get().map_or(0, |m| m.len()))
            .finish()
    }
}
