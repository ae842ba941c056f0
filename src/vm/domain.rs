//! Domains: isolation units for code and dispatch state
//!
//! A domain owns the vtables whose slots it is allowed to patch, the table
//! of emitted-code ranges (JIT infos), and the per-domain delegate thunk
//! caches. Cross-domain call sites are never patched; the slot's lifetime is
//! governed by its owning domain, so a foreign-domain patch would outlive
//! its caller's right to the address.

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::vm::method::{MethodRef, SignatureId};
use crate::vm::vtable::{CodeAddr, SlotAddr, VTable};

/// Identifier of a domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DomainId(u32);

impl DomainId {
    /// The root domain's id; AOT code is only installed here
    pub const ROOT: DomainId = DomainId(0);

    /// Raw id value
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// Describes one emitted code range and the method it belongs to.
///
/// Looked up by address to map a call-site return address (or a trampoline
/// address a delegate still points at) back to its method.
#[derive(Debug)]
pub struct JitInfo {
    method: MethodRef,
    code_start: CodeAddr,
    code_size: usize,
    domain: DomainId,
}

impl JitInfo {
    /// The method this code range was emitted for
    pub fn method(&self) -> &MethodRef {
        &self.method
    }

    /// Start of the code range
    pub fn code_start(&self) -> CodeAddr {
        self.code_start
    }

    /// Size of the code range in bytes
    pub fn code_size(&self) -> usize {
        self.code_size
    }

    /// Domain the code was emitted in
    pub fn domain(&self) -> DomainId {
        self.domain
    }
}

/// Whether two looked-up code ranges exist and were emitted in the same
/// domain. Either side missing means the answer is no, which makes the
/// caller skip call-site patching and re-enter the trampoline next time.
pub fn same_domain(a: Option<&JitInfo>, b: Option<&JitInfo>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.domain == b.domain,
        _ => false,
    }
}

/// Per-domain delegate `Invoke` thunk caches, keyed by signature identity
/// and split by whether the delegate carries a bound target (the emitted
/// thunk differs between the two shapes).
#[derive(Debug, Default)]
pub struct DelegateThunkCaches {
    with_target: FxHashMap<SignatureId, CodeAddr>,
    no_target: FxHashMap<SignatureId, CodeAddr>,
}

impl DelegateThunkCaches {
    /// Look up the thunk for a signature
    pub fn get(&self, has_target: bool, sig: SignatureId) -> Option<CodeAddr> {
        let cache = if has_target { &self.with_target } else { &self.no_target };
        cache.get(&sig).copied()
    }

    /// Insert a thunk for a signature. Last writer wins: a concurrent
    /// generator that lost the race overwrites with an equivalent thunk and
    /// the loser's storage stays allocated until domain teardown.
    pub fn insert(&mut self, has_target: bool, sig: SignatureId, thunk: CodeAddr) {
        let cache = if has_target { &mut self.with_target } else { &mut self.no_target };
        cache.insert(sig, thunk);
    }
}

/// An isolation unit owning dispatch tables, emitted code ranges, and the
/// delegate thunk caches.
#[derive(Debug)]
pub struct Domain {
    id: DomainId,
    name: String,
    vtables: RwLock<Vec<Arc<VTable>>>,
    jit_infos: RwLock<Vec<Arc<JitInfo>>>,
    delegate_thunks: Mutex<DelegateThunkCaches>,
}

impl Domain {
    fn new(id: DomainId, name: impl Into<String>) -> Arc<Domain> {
        Arc::new(Domain {
            id,
            name: name.into(),
            vtables: RwLock::new(Vec::new()),
            jit_infos: RwLock::new(Vec::new()),
            delegate_thunks: Mutex::new(DelegateThunkCaches::default()),
        })
    }

    /// Domain id
    pub fn id(&self) -> DomainId {
        self.id
    }

    /// Domain name (diagnostics only)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this is the root domain
    pub fn is_root(&self) -> bool {
        self.id == DomainId::ROOT
    }

    /// Record a vtable as owned by this domain
    pub fn register_vtable(&self, vtable: Arc<VTable>) {
        self.vtables.write().push(vtable);
    }

    /// Whether `slot` addresses a dispatch word owned by this domain
    pub fn owns_vtable_slot(&self, slot: SlotAddr) -> bool {
        self.vtables.read().iter().any(|vt| vt.contains_slot(slot))
    }

    /// Record an emitted code range for `method` and return its info
    pub fn register_code(
        &self,
        method: MethodRef,
        code_start: CodeAddr,
        code_size: usize,
    ) -> Arc<JitInfo> {
        let ji = Arc::new(JitInfo {
            method,
            code_start,
            code_size,
            domain: self.id,
        });
        self.jit_infos.write().push(ji.clone());
        ji
    }

    /// Find the code range containing `addr`, if this domain emitted one
    pub fn jit_info_find(&self, addr: CodeAddr) -> Option<Arc<JitInfo>> {
        self.jit_infos
            .read()
            .iter()
            .find(|ji| {
                addr.as_usize() >= ji.code_start.as_usize()
                    && addr.as_usize() < ji.code_start.as_usize() + ji.code_size
            })
            .cloned()
    }

    /// Take the domain lock guarding the delegate thunk caches.
    ///
    /// The delegate trampoline drops this guard while the architecture
    /// backend emits a thunk, so the lock is never held across code
    /// emission.
    pub fn delegate_thunks(&self) -> MutexGuard<'_, DelegateThunkCaches> {
        self.delegate_thunks.lock()
    }
}

/// Process-wide domain table.
///
/// Creates the root domain eagerly and tracks which domain the executing
/// thread is dispatching in. Embedders that run managed threads across
/// domains switch the current domain around cross-domain invocations.
#[derive(Debug)]
pub struct DomainRegistry {
    domains: DashMap<u32, Arc<Domain>>,
    root: Arc<Domain>,
    current: RwLock<Arc<Domain>>,
    next_id: AtomicU32,
}

impl DomainRegistry {
    /// Create a registry with a fresh root domain, which starts current
    pub fn new() -> Arc<DomainRegistry> {
        let root = Domain::new(DomainId::ROOT, "root");
        let domains = DashMap::new();
        domains.insert(DomainId::ROOT.as_u32(), root.clone());
        Arc::new(DomainRegistry {
            domains,
            root: root.clone(),
            current: RwLock::new(root),
            next_id: AtomicU32::new(1),
        })
    }

    /// Create a new non-root domain
    pub fn create(&self, name: impl Into<String>) -> Arc<Domain> {
        let id = DomainId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let domain = Domain::new(id, name);
        self.domains.insert(id.as_u32(), domain.clone());
        domain
    }

    /// Look up a domain by id
    pub fn get(&self, id: DomainId) -> Option<Arc<Domain>> {
        self.domains.get(&id.as_u32()).map(|d| d.value().clone())
    }

    /// The root domain
    pub fn root(&self) -> Arc<Domain> {
        self.root.clone()
    }

    /// The domain the executing thread currently dispatches in
    pub fn current(&self) -> Arc<Domain> {
        self.current.read().clone()
    }

    /// Switch the current domain
    pub fn set_current(&self, domain: Arc<Domain>) {
        *self.current.write() = domain;
    }
}
