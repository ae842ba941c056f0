//! Trampoline entry points and call-site patching
//!
//! Five entry points, each invoked by a thin architecture-specific thunk
//! that captured the caller's registers:
//! - [`TrampolineDispatch::magic_trampoline`]: calls from JIT-compiled code
//! - [`TrampolineDispatch::aot_method_trampoline`]: AOT calls resolved by
//!   metadata token
//! - [`TrampolineDispatch::aot_plt_trampoline`]: AOT calls through the PLT
//! - [`TrampolineDispatch::class_init_trampoline`]: static-initialiser
//!   execution
//! - [`TrampolineDispatch::delegate_trampoline`]: delegate `Invoke` calls
//!
//! Every entry point returns the resolved target address (the thunk jumps
//! there) after patching the originating call site so the trampoline is
//! bypassed on subsequent calls wherever domain isolation allows it.

mod aot;
mod class_init;
mod delegate;
mod imt;
mod magic;
mod patcher;
mod stats;

pub use patcher::CodePatcher;
pub use stats::DispatchStats;

use crate::services::{CompileError, Services};

/// Construction-time configuration for the dispatch core
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Whether the process runs under a memory checker that objects to
    /// self-modifying code; suppresses class-init call-site nullification
    pub memcheck: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig { memcheck: false }
    }
}

/// Fatal dispatch failures.
///
/// None of these are recoverable inside the trampoline: the interrupted
/// caller sits in a prologue that expects a resolved address. The
/// architecture thunk layer aborts the process on `Err`; the variants exist
/// so the abort carries a diagnosis.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// On-demand compilation failed
    #[error(transparent)]
    Compilation(#[from] CompileError),

    /// A metadata token from an AOT image did not resolve to a method
    #[error("method token {token:#010x} does not resolve in image {image:#x}")]
    MethodResolution {
        /// Image the token failed to resolve in
        image: usize,
        /// The unresolvable token
        token: u32,
    },

    /// A delegate class without an `Invoke` method reached dispatch
    #[error("delegate class `{class}` has no Invoke method")]
    MissingInvoke {
        /// Name of the offending class
        class: String,
    },
}

/// The trampoline dispatch core.
///
/// Holds the injected collaborators, the code patcher, and dispatch
/// counters. One instance serves the whole runtime; every method is
/// re-entrant and callable from any managed thread.
pub struct TrampolineDispatch {
    services: Services,
    config: DispatchConfig,
    patcher: CodePatcher,
    stats: DispatchStats,
}

impl TrampolineDispatch {
    /// Create a dispatch core with default configuration
    pub fn new(services: Services) -> TrampolineDispatch {
        TrampolineDispatch::with_config(services, DispatchConfig::default())
    }

    /// Create a dispatch core with explicit configuration
    pub fn with_config(services: Services, config: DispatchConfig) -> TrampolineDispatch {
        let patcher = CodePatcher::new(services.arch.clone());
        TrampolineDispatch {
            services,
            config,
            patcher,
            stats: DispatchStats::new(),
        }
    }

    /// Dispatch counters
    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub(crate) fn services(&self) -> &Services {
        &self.services
    }

    pub(crate) fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub(crate) fn patcher(&self) -> &CodePatcher {
        &self.patcher
    }
}
