//! Mock collaborators and a wiring harness shared by the dispatch tests
//!
//! Every mock records what the dispatch core asked of it, so tests assert
//! on observable behaviour (what got patched, what got compiled) instead of
//! internal state.

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::dispatch::{DispatchConfig, TrampolineDispatch};
use crate::services::{
    AotImages, AotModuleHandle, Arch, ClassInitializer, CompileError, Compiler, ImageHandle,
    Marshal, Metadata, MethodToken, PltEntry, RegisterSnapshot, Services,
};
use crate::vm::{
    ClassDesc, ClassRef, CodeAddr, DelegateRef, Domain, DomainRegistry, HeapObject, MethodDesc,
    MethodImplFlags, MethodRef, MethodSignature, ObjectRef, SignatureId, SlotAddr, VTable,
};

/// Stand-in trampoline address used as the pre-patch slot content
pub const TRAMP: CodeAddr = CodeAddr::new(0x0077_7000);

fn method_key(method: &MethodRef) -> usize {
    Arc::as_ptr(method) as usize
}

/// Recording mock compiler. Bodies can be pinned per method; unpinned
/// methods get sequentially allocated fake addresses.
#[derive(Default)]
pub struct TestCompiler {
    bodies: Mutex<FxHashMap<usize, CodeAddr>>,
    failures: Mutex<FxHashSet<usize>>,
    counts: Mutex<FxHashMap<usize, u32>>,
    next: AtomicUsize,
}

impl TestCompiler {
    pub fn set_body(&self, method: &MethodRef, addr: usize) -> CodeAddr {
        let addr = CodeAddr::new(addr);
        self.bodies.lock().insert(method_key(method), addr);
        addr
    }

    pub fn fail_for(&self, method: &MethodRef) {
        self.failures.lock().insert(method_key(method));
    }

    pub fn compile_count(&self, method: &MethodRef) -> u32 {
        self.counts.lock().get(&method_key(method)).copied().unwrap_or(0)
    }

    pub fn total_compiles(&self) -> u32 {
        self.counts.lock().values().sum()
    }
}

impl Compiler for TestCompiler {
    fn compile(&self, method: &MethodRef) -> Result<CodeAddr, CompileError> {
        *self.counts.lock().entry(method_key(method)).or_insert(0) += 1;
        if self.failures.lock().contains(&method_key(method)) {
            return Err(CompileError {
                method: method.name().to_string(),
                reason: "induced test failure".to_string(),
            });
        }
        let mut bodies = self.bodies.lock();
        let addr = bodies.entry(method_key(method)).or_insert_with(|| {
            CodeAddr::new(0x0100_0000 + self.next.fetch_add(1, Ordering::Relaxed) * 0x100)
        });
        Ok(*addr)
    }
}

/// Mock metadata: token → method and pairwise interface layout offsets,
/// both keyed the way tests configure them.
#[derive(Default)]
pub struct TestMetadata {
    tokens: Mutex<FxHashMap<(usize, u32), MethodRef>>,
    iface_offsets: Mutex<FxHashMap<(String, String), isize>>,
}

impl TestMetadata {
    pub fn add_token_method(&self, image: ImageHandle, token: MethodToken, method: MethodRef) {
        self.tokens.lock().insert((image.as_usize(), token.0), method);
    }

    pub fn set_interface_offset(&self, class: &str, interface: &str, offset: isize) {
        self.iface_offsets
            .lock()
            .insert((class.to_string(), interface.to_string()), offset);
    }
}

impl Metadata for TestMetadata {
    fn method_from_token(&self, image: ImageHandle, token: MethodToken) -> Option<MethodRef> {
        self.tokens.lock().get(&(image.as_usize(), token.0)).cloned()
    }

    fn interface_offset(&self, class: &ClassRef, interface: &ClassRef) -> isize {
        self.iface_offsets
            .lock()
            .get(&(class.name().to_string(), interface.name().to_string()))
            .copied()
            .unwrap_or(-1)
    }
}

/// Mock AOT image layer
#[derive(Default)]
pub struct TestAot {
    got_entries: Mutex<FxHashSet<usize>>,
    plt_entries: Mutex<FxHashMap<usize, PltEntry>>,
    aot_bodies: Mutex<FxHashMap<(usize, u32), CodeAddr>>,
    plt_resolve_target: Mutex<Option<CodeAddr>>,
    plt_resolutions: Mutex<Vec<(AotModuleHandle, Option<u32>, CodeAddr)>>,
}

impl TestAot {
    pub fn add_got_entry(&self, slot: SlotAddr) {
        self.got_entries.lock().insert(slot.as_usize());
    }

    pub fn add_plt_entry(&self, code: CodeAddr, plt_addr: usize) -> PltEntry {
        let plt = PltEntry(plt_addr);
        self.plt_entries.lock().insert(code.as_usize(), plt);
        plt
    }

    pub fn set_aot_body(&self, image: ImageHandle, token: MethodToken, addr: usize) -> CodeAddr {
        let addr = CodeAddr::new(addr);
        self.aot_bodies.lock().insert((image.as_usize(), token.0), addr);
        addr
    }

    pub fn set_plt_resolve_target(&self, addr: usize) -> CodeAddr {
        let addr = CodeAddr::new(addr);
        *self.plt_resolve_target.lock() = Some(addr);
        addr
    }

    pub fn plt_resolutions(&self) -> Vec<(AotModuleHandle, Option<u32>, CodeAddr)> {
        self.plt_resolutions.lock().clone()
    }
}

impl AotImages for TestAot {
    fn method_from_token(
        &self,
        _domain: &Arc<Domain>,
        image: ImageHandle,
        token: MethodToken,
    ) -> Option<CodeAddr> {
        self.aot_bodies.lock().get(&(image.as_usize(), token.0)).copied()
    }

    fn is_got_entry(&self, _code: CodeAddr, slot: SlotAddr) -> bool {
        self.got_entries.lock().contains(&slot.as_usize())
    }

    fn plt_entry(&self, code: CodeAddr) -> Option<PltEntry> {
        self.plt_entries.lock().get(&code.as_usize()).copied()
    }

    fn plt_resolve(
        &self,
        module: AotModuleHandle,
        plt_info_offset: Option<u32>,
        code: CodeAddr,
    ) -> CodeAddr {
        self.plt_resolutions.lock().push((module, plt_info_offset, code));
        (*self.plt_resolve_target.lock()).unwrap_or(CodeAddr::new(0x0400_0000))
    }
}

/// Scriptable, recording mock architecture backend
#[derive(Default)]
pub struct TestArch {
    this: Mutex<Option<ObjectRef>>,
    imt_method: Mutex<Option<MethodRef>>,
    imt_lookups: AtomicUsize,
    vcall_slots: Mutex<FxHashMap<usize, SlotAddr>>,
    delegate: Mutex<Option<DelegateRef>>,
    unbox: Mutex<FxHashMap<usize, CodeAddr>>,
    next_unbox: AtomicUsize,
    callsite_patches: Mutex<Vec<(CodeAddr, CodeAddr)>>,
    plt_patches: Mutex<Vec<(PltEntry, CodeAddr)>>,
    nullified_plts: Mutex<FxHashSet<usize>>,
    nullified_callsites: Mutex<FxHashSet<usize>>,
    delegate_thunks_enabled: AtomicBool,
    delegate_impl_calls: Mutex<Vec<(SignatureId, bool)>>,
    next_thunk: AtomicUsize,
    plt_info_reg: Mutex<Option<usize>>,
}

impl TestArch {
    pub fn set_this(&self, this: ObjectRef) {
        *self.this.lock() = Some(this);
    }

    pub fn set_imt_method(&self, method: MethodRef) {
        *self.imt_method.lock() = Some(method);
    }

    pub fn imt_method_lookups(&self) -> usize {
        self.imt_lookups.load(Ordering::Relaxed)
    }

    pub fn set_vcall_slot(&self, code: CodeAddr, slot: SlotAddr) {
        self.vcall_slots.lock().insert(code.as_usize(), slot);
    }

    pub fn set_delegate(&self, delegate: DelegateRef) {
        *self.delegate.lock() = Some(delegate);
    }

    pub fn enable_delegate_thunks(&self) {
        self.delegate_thunks_enabled.store(true, Ordering::Relaxed);
    }

    pub fn delegate_impl_requests(&self) -> usize {
        self.delegate_impl_calls.lock().len()
    }

    /// The unbox trampoline emitted for `body`, if one was requested
    pub fn unbox_for(&self, body: CodeAddr) -> Option<CodeAddr> {
        self.unbox.lock().get(&body.as_usize()).copied()
    }

    pub fn callsite_patches(&self) -> Vec<(CodeAddr, CodeAddr)> {
        self.callsite_patches.lock().clone()
    }

    pub fn callsites_patched(&self) -> usize {
        self.callsite_patches.lock().len()
    }

    pub fn plt_patches(&self) -> Vec<(PltEntry, CodeAddr)> {
        self.plt_patches.lock().clone()
    }

    pub fn was_callsite_nullified(&self, code: CodeAddr) -> bool {
        self.nullified_callsites.lock().contains(&code.as_usize())
    }

    pub fn nullified_callsite_count(&self) -> usize {
        self.nullified_callsites.lock().len()
    }

    pub fn was_plt_nullified(&self, plt: PltEntry) -> bool {
        self.nullified_plts.lock().contains(&plt.0)
    }

    pub fn set_plt_info_reg(&self, reg: usize) {
        *self.plt_info_reg.lock() = Some(reg);
    }
}

impl Arch for TestArch {
    fn this_argument(&self, _regs: &RegisterSnapshot, _method: &MethodRef) -> ObjectRef {
        self.this.lock().clone().expect("test arch: receiver not configured")
    }

    fn imt_method(&self, _regs: &RegisterSnapshot) -> MethodRef {
        self.imt_lookups.fetch_add(1, Ordering::Relaxed);
        self.imt_method
            .lock()
            .clone()
            .expect("test arch: imt method not configured")
    }

    fn vcall_slot_addr(&self, code: CodeAddr, _regs: &RegisterSnapshot) -> Option<SlotAddr> {
        self.vcall_slots.lock().get(&code.as_usize()).copied()
    }

    fn delegate_from_call(
        &self,
        _sig: &Arc<MethodSignature>,
        _regs: &RegisterSnapshot,
        _code: CodeAddr,
    ) -> DelegateRef {
        self.delegate.lock().clone().expect("test arch: delegate not configured")
    }

    fn unbox_trampoline(&self, _method: &MethodRef, addr: CodeAddr) -> CodeAddr {
        *self.unbox.lock().entry(addr.as_usize()).or_insert_with(|| {
            CodeAddr::new(0x0200_0000 + self.next_unbox.fetch_add(1, Ordering::Relaxed) * 0x100)
        })
    }

    fn delegate_invoke_impl(
        &self,
        sig: &Arc<MethodSignature>,
        has_target: bool,
    ) -> Option<CodeAddr> {
        self.delegate_impl_calls.lock().push((sig.id(), has_target));
        if self.delegate_thunks_enabled.load(Ordering::Relaxed) {
            Some(CodeAddr::new(
                0x0300_0000 + self.next_thunk.fetch_add(1, Ordering::Relaxed) * 0x100,
            ))
        } else {
            None
        }
    }

    fn patch_plt_entry(&self, plt: PltEntry, target: CodeAddr) {
        self.plt_patches.lock().push((plt, target));
    }

    fn patch_callsite(&self, code: CodeAddr, target: CodeAddr) {
        self.callsite_patches.lock().push((code, target));
    }

    fn nullify_plt_entry(&self, plt: PltEntry) {
        self.nullified_plts.lock().insert(plt.0);
    }

    fn nullify_class_init_callsite(&self, code: CodeAddr, _regs: &RegisterSnapshot) {
        self.nullified_callsites.lock().insert(code.as_usize());
    }

    fn plt_info_offset(&self, regs: &RegisterSnapshot) -> Option<u32> {
        (*self.plt_info_reg.lock()).map(|reg| regs.word(reg) as u32)
    }
}

/// Mock marshal layer: wrappers are fresh methods on the wrapped method's
/// class, recorded for assertions.
#[derive(Default)]
pub struct TestMarshal {
    sync_wrappers: Mutex<Vec<MethodRef>>,
    invoke_wrappers: Mutex<Vec<MethodRef>>,
}

impl TestMarshal {
    pub fn last_sync_wrapper(&self) -> Option<MethodRef> {
        self.sync_wrappers.lock().last().cloned()
    }

    pub fn last_invoke_wrapper(&self) -> Option<MethodRef> {
        self.invoke_wrappers.lock().last().cloned()
    }
}

impl Marshal for TestMarshal {
    fn synchronized_wrapper(&self, method: &MethodRef) -> MethodRef {
        let wrapper = MethodDesc::new(
            format!("{}#synchronized", method.name()),
            method.class().clone(),
            method.signature().clone(),
            MethodImplFlags::NONE,
            method.vtable_slot(),
        );
        self.sync_wrappers.lock().push(wrapper.clone());
        wrapper
    }

    fn delegate_invoke_wrapper(&self, invoke: &MethodRef) -> MethodRef {
        let wrapper = MethodDesc::new(
            format!("{}#invoke_wrapper", invoke.name()),
            invoke.class().clone(),
            invoke.signature().clone(),
            MethodImplFlags::NONE,
            invoke.vtable_slot(),
        );
        self.invoke_wrappers.lock().push(wrapper.clone());
        wrapper
    }
}

/// Mock static-initialiser runner: idempotent per vtable, counting actual
/// initialiser executions per class name.
#[derive(Default)]
pub struct TestClassInit {
    initialized: Mutex<FxHashSet<usize>>,
    runs: Mutex<FxHashMap<String, u32>>,
}

impl TestClassInit {
    /// How many times the class's static initialiser actually ran
    pub fn runs(&self, class: &str) -> u32 {
        self.runs.lock().get(class).copied().unwrap_or(0)
    }
}

impl ClassInitializer for TestClassInit {
    fn class_init(&self, vtable: &Arc<VTable>) {
        let key = Arc::as_ptr(vtable) as usize;
        if self.initialized.lock().insert(key) {
            *self.runs.lock().entry(vtable.class().name().to_string()).or_insert(0) += 1;
        }
    }
}

/// A fully wired dispatch core over recording mocks
pub struct TestHarness {
    pub dispatch: TrampolineDispatch,
    pub compiler: Arc<TestCompiler>,
    pub metadata: Arc<TestMetadata>,
    pub aot: Arc<TestAot>,
    pub arch: Arc<TestArch>,
    pub marshal: Arc<TestMarshal>,
    pub class_init: Arc<TestClassInit>,
    pub domains: Arc<DomainRegistry>,
    classes: Mutex<FxHashMap<String, ClassRef>>,
}

impl TestHarness {
    pub fn new() -> TestHarness {
        TestHarness::with_config(DispatchConfig::default())
    }

    pub fn with_config(config: DispatchConfig) -> TestHarness {
        let compiler = Arc::new(TestCompiler::default());
        let metadata = Arc::new(TestMetadata::default());
        let aot = Arc::new(TestAot::default());
        let arch = Arc::new(TestArch::default());
        let marshal = Arc::new(TestMarshal::default());
        let class_init = Arc::new(TestClassInit::default());
        let domains = DomainRegistry::new();

        let services = Services {
            compiler: compiler.clone(),
            metadata: metadata.clone(),
            aot: aot.clone(),
            marshal: marshal.clone(),
            arch: arch.clone(),
            domains: domains.clone(),
            class_init: class_init.clone(),
        };

        TestHarness {
            dispatch: TrampolineDispatch::with_config(services, config),
            compiler,
            metadata,
            aot,
            arch,
            marshal,
            class_init,
            domains,
            classes: Mutex::new(FxHashMap::default()),
        }
    }

    /// An empty register snapshot; the mocks rarely read registers
    pub fn regs(&self) -> RegisterSnapshot {
        RegisterSnapshot::default()
    }

    /// Get or create the class named `name`
    pub fn class(&self, name: &str, is_value_type: bool) -> ClassRef {
        self.classes
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| ClassDesc::new(name, is_value_type))
            .clone()
    }

    /// A method on the (shared) class named `class_name`
    pub fn new_method(&self, class_name: &str, name: &str, slot: usize) -> MethodRef {
        let class = self.class(class_name, false);
        self.new_method_in(&class, name, slot)
    }

    /// A method on an explicit class
    pub fn new_method_in(&self, class: &ClassRef, name: &str, slot: usize) -> MethodRef {
        MethodDesc::new(
            name,
            class.clone(),
            MethodSignature::new(0, true),
            MethodImplFlags::NONE,
            slot,
        )
    }

    /// A vtable registered with (and owned by) the current domain
    pub fn new_vtable(&self, class_name: &str, is_value_type: bool, slots: usize) -> Arc<VTable> {
        self.new_vtable_with_collisions(class_name, is_value_type, slots, 0)
    }

    /// A vtable with IMT collision bits, owned by the current domain
    pub fn new_vtable_with_collisions(
        &self,
        class_name: &str,
        is_value_type: bool,
        slots: usize,
        imt_collisions: u32,
    ) -> Arc<VTable> {
        let domain = self.domains.current();
        let class = self.class(class_name, is_value_type);
        let vt = VTable::with_imt_collisions(class, domain.id(), slots, imt_collisions);
        domain.register_vtable(vt.clone());
        vt
    }

    /// A vtable registered with an explicit domain
    pub fn new_vtable_in(
        &self,
        domain: &Arc<Domain>,
        class_name: &str,
        is_value_type: bool,
        slots: usize,
    ) -> Arc<VTable> {
        let class = self.class(class_name, is_value_type);
        let vt = VTable::new(class, domain.id(), slots);
        domain.register_vtable(vt.clone());
        vt
    }

    /// An object header dispatching through `vtable`
    pub fn new_object(&self, vtable: &Arc<VTable>) -> ObjectRef {
        HeapObject::new(vtable.clone())
    }

    /// A delegate class with a bound `Invoke` method (plus a constructor,
    /// so the lookup has something to skip)
    pub fn delegate_class(&self, name: &str) -> (ClassRef, MethodRef) {
        let class = self.class(name, false);
        let sig = MethodSignature::new(1, true);
        let ctor = MethodDesc::new(
            ".ctor",
            class.clone(),
            MethodSignature::new(2, true),
            MethodImplFlags::NONE,
            0,
        );
        let invoke = MethodDesc::new("Invoke", class.clone(), sig, MethodImplFlags::NONE, 1);
        class.bind_methods(vec![ctor, invoke.clone()]);
        (class, invoke)
    }
}
