//! The execution seam between the sandbox and whatever runs bytecode.
//!
//! The sandbox never decodes instructions itself. Wasm functions (the
//! start function in particular) are handed to an [`AwwasmEngine`]
//! attached to the store; host functions are called directly. Both
//! receive an [`AwwasmCaller`] giving access to the store and to the
//! calling instance's frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{AwwasmRuntimeError, AwwasmTrap};
use crate::func::AwwasmWasmFuncInst;
use crate::instance::AwwasmModuleInst;
use crate::memory::AwwasmMemInst;
use crate::store::AwwasmStore;
use crate::table::AwwasmTableInst;
use crate::values::{AwwasmFuncAddr, AwwasmValue};

/// An interpreter or compiled-code runner.
///
/// Implementations must perform every memory and table access through
/// the bounds-checked accessors of [`AwwasmMemInst`] and
/// [`AwwasmTableInst`], and should poll
/// [`AwwasmCaller::check_interrupt`] at loop headers and calls.
///
/// The engine stays attached while it runs: a host function it calls may
/// re-enter it through [`AwwasmCaller::invoke`], so per-call state belongs
/// on the call stack rather than in `self`.
pub trait AwwasmEngine: Send + Sync {
    fn call(
        &self,
        caller: &mut AwwasmCaller<'_>,
        func: &AwwasmWasmFuncInst,
        args: &[AwwasmValue],
    ) -> Result<Vec<AwwasmValue>, AwwasmTrap>;
}

/// Context handed to host functions and engines.
pub struct AwwasmCaller<'a> {
    store: &'a mut AwwasmStore,
    frame: Option<&'a AwwasmModuleInst>,
}

impl<'a> AwwasmCaller<'a> {
    pub fn new(store: &'a mut AwwasmStore, frame: Option<&'a AwwasmModuleInst>) -> Self {
        Self { store, frame }
    }

    pub fn store(&mut self) -> &mut AwwasmStore {
        self.store
    }

    /// The instance whose code made the call, if any.
    pub fn frame(&self) -> Option<&'a AwwasmModuleInst> {
        self.frame
    }

    /// Memory `idx` of the calling instance.
    pub fn memory_mut(&mut self, idx: u32) -> Option<&mut AwwasmMemInst> {
        let addr = self.frame?.mem(idx)?;
        self.store.mem_mut(addr).ok()
    }

    /// Table `idx` of the calling instance.
    pub fn table_mut(&mut self, idx: u32) -> Option<&mut AwwasmTableInst> {
        let addr = self.frame?.table(idx)?;
        self.store.table_mut(addr).ok()
    }

    /// Call `func` on behalf of the current frame.
    ///
    /// Wasm callees run on the store's engine with their own instance as
    /// frame; host callees see this caller's frame.
    pub fn invoke(&mut self, func: AwwasmFuncAddr, args: &[AwwasmValue]) -> Result<Vec<AwwasmValue>, AwwasmTrap> {
        self.store
            .invoke_in_frame(func, args, self.frame)
            .map_err(|err| match err {
                AwwasmRuntimeError::Trap(trap) => trap,
                other => AwwasmTrap::Host(other.to_string()),
            })
    }

    /// Cooperative cancellation point.
    pub fn check_interrupt(&self) -> Result<(), AwwasmTrap> {
        self.store.interrupt_handle().check()
    }
}

/// Shared flag used to stop running code from another thread.
///
/// Setting the flag does not preempt anything; the engine observes it at
/// its next [`check`](Self::check).
#[derive(Debug, Clone, Default)]
pub struct AwwasmInterruptHandle(Arc<AtomicBool>);

impl AwwasmInterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that running code stops.
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Re-arm after an interruption has been handled.
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), AwwasmTrap> {
        if self.is_interrupted() {
            return Err(AwwasmTrap::Interrupted);
        }
        Ok(())
    }
}
