//! The Store - central runtime state for WebAssembly execution.
//!
//! The Store contains all runtime instances (functions, tables, memories,
//! globals, etc.) and provides allocation and access methods. It is also
//! the registry of named module instances and the only place where a
//! name binding is published or removed.

use core::fmt;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::config::AwwasmConfig;
use crate::engine::{AwwasmCaller, AwwasmEngine, AwwasmInterruptHandle};
use crate::error::{AwwasmInstantiationError, AwwasmRuntimeError, AwwasmStoreError, AwwasmTrap};
use crate::func::{AwwasmDataInst, AwwasmElemInst, AwwasmFuncInst};
use crate::global::AwwasmGlobalInst;
use crate::imports::{AwwasmImportValue, AwwasmImports};
use crate::instance::AwwasmModuleInst;
use crate::instantiate::AwwasmInstantiator;
use crate::memory::AwwasmMemInst;
use crate::module::AwwasmModule;
use crate::resolve::AwwasmExternType;
use crate::table::AwwasmTableInst;
use crate::values::{
    AwwasmDataAddr, AwwasmElemAddr, AwwasmExternAddr, AwwasmExternHandle, AwwasmFuncAddr, AwwasmGlobalAddr,
    AwwasmMemAddr, AwwasmModuleAddr, AwwasmTableAddr, AwwasmValue, AwwasmValueType,
};

/// Slot storage behind the store addresses.
///
/// Addresses are never reused: a freed slot stays empty, so a stale
/// address fails to resolve instead of aliasing a newer object.
#[derive(Debug)]
struct AwwasmArena<T> {
    slots: Vec<Option<T>>,
    live: usize,
}

impl<T> AwwasmArena<T> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            live: 0,
        }
    }

    fn alloc(&mut self, value: T) -> u32 {
        self.slots.push(Some(value));
        self.live += 1;
        self.slots.len() as u32 - 1
    }

    /// Take an address without a value yet.
    fn reserve(&mut self) -> u32 {
        self.slots.push(None);
        self.slots.len() as u32 - 1
    }

    fn fill(&mut self, idx: u32, value: T) {
        if let Some(slot) = self.slots.get_mut(idx as usize) {
            if slot.replace(value).is_none() {
                self.live += 1;
            }
        }
    }

    fn free(&mut self, idx: u32) -> Option<T> {
        let value = self.slots.get_mut(idx as usize)?.take();
        if value.is_some() {
            self.live -= 1;
        }
        value
    }

    fn get(&self, idx: u32) -> Option<&T> {
        self.slots.get(idx as usize)?.as_ref()
    }

    fn get_mut(&mut self, idx: u32) -> Option<&mut T> {
        self.slots.get_mut(idx as usize)?.as_mut()
    }

    fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|value| (idx as u32, value)))
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_mut().map(|value| (idx as u32, value)))
    }
}

/// The Store - global runtime state for WebAssembly.
///
/// Per the WebAssembly spec, the Store represents all global state that can
/// be manipulated by WebAssembly programs. It consists of runtime instances
/// of functions, tables, memories, globals, element segments, and data segments.
///
/// Multiple modules can share a Store, enabling cross-module calls and
/// shared memories/tables. A store is `Send` but is meant to be driven by
/// one thread at a time.
pub struct AwwasmStore {
    config: AwwasmConfig,
    funcs: AwwasmArena<AwwasmFuncInst>,
    tables: AwwasmArena<AwwasmTableInst>,
    mems: AwwasmArena<AwwasmMemInst>,
    globals: AwwasmArena<AwwasmGlobalInst>,
    elems: AwwasmArena<AwwasmElemInst>,
    datas: AwwasmArena<AwwasmDataInst>,
    modules: AwwasmArena<Arc<AwwasmModuleInst>>,
    /// Named module instances.
    names: HashMap<String, AwwasmModuleAddr>,
    /// The most recent anonymous instance.
    active: Option<AwwasmModuleAddr>,
    /// Host objects referenced by externref values.
    externs: AwwasmArena<Box<dyn Any + Send>>,
    engine: Option<Arc<dyn AwwasmEngine>>,
    interrupt: AwwasmInterruptHandle,
}

impl fmt::Debug for AwwasmStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwwasmStore")
            .field("config", &self.config)
            .field("funcs", &self.funcs.live)
            .field("tables", &self.tables.live)
            .field("mems", &self.mems.live)
            .field("globals", &self.globals.live)
            .field("modules", &self.names)
            .field("active", &self.active)
            .field("engine", &self.engine.is_some())
            .finish_non_exhaustive()
    }
}

impl AwwasmStore {
    /// Create a new empty Store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(AwwasmConfig::default())
    }

    pub fn with_config(config: AwwasmConfig) -> Self {
        Self {
            config,
            funcs: AwwasmArena::new(),
            tables: AwwasmArena::new(),
            mems: AwwasmArena::new(),
            globals: AwwasmArena::new(),
            elems: AwwasmArena::new(),
            datas: AwwasmArena::new(),
            modules: AwwasmArena::new(),
            names: HashMap::new(),
            active: None,
            externs: AwwasmArena::new(),
            engine: None,
            interrupt: AwwasmInterruptHandle::new(),
        }
    }

    #[inline]
    pub fn config(&self) -> &AwwasmConfig {
        &self.config
    }

    // ========================================================================
    // Allocation methods
    // ========================================================================

    pub(crate) fn alloc_func(&mut self, func: AwwasmFuncInst) -> AwwasmFuncAddr {
        AwwasmFuncAddr(self.funcs.alloc(func))
    }

    pub(crate) fn alloc_table(&mut self, table: AwwasmTableInst) -> AwwasmTableAddr {
        AwwasmTableAddr(self.tables.alloc(table))
    }

    pub(crate) fn alloc_mem(&mut self, mem: AwwasmMemInst) -> AwwasmMemAddr {
        AwwasmMemAddr(self.mems.alloc(mem))
    }

    pub(crate) fn alloc_global(&mut self, global: AwwasmGlobalInst) -> AwwasmGlobalAddr {
        AwwasmGlobalAddr(self.globals.alloc(global))
    }

    pub(crate) fn alloc_elem(&mut self, elem: AwwasmElemInst) -> AwwasmElemAddr {
        AwwasmElemAddr(self.elems.alloc(elem))
    }

    pub(crate) fn alloc_data(&mut self, data: AwwasmDataInst) -> AwwasmDataAddr {
        AwwasmDataAddr(self.datas.alloc(data))
    }

    /// Reserve the address of an instance that is still being built.
    pub(crate) fn reserve_module(&mut self) -> AwwasmModuleAddr {
        AwwasmModuleAddr(self.modules.reserve())
    }

    /// Make a finished instance reachable by address (but not by name).
    pub(crate) fn fill_module(&mut self, inst: Arc<AwwasmModuleInst>) {
        self.modules.fill(inst.addr.0, inst);
    }

    // ========================================================================
    // Access methods
    // ========================================================================

    /// Get a function instance by address.
    pub fn func(&self, addr: AwwasmFuncAddr) -> Result<&AwwasmFuncInst, AwwasmRuntimeError> {
        self.funcs.get(addr.0).ok_or(AwwasmRuntimeError::InvalidFuncAddr(addr.0))
    }

    /// Get a table instance by address.
    pub fn table(&self, addr: AwwasmTableAddr) -> Result<&AwwasmTableInst, AwwasmRuntimeError> {
        self.tables.get(addr.0).ok_or(AwwasmRuntimeError::InvalidTableAddr(addr.0))
    }

    /// Get a mutable table instance by address.
    pub fn table_mut(&mut self, addr: AwwasmTableAddr) -> Result<&mut AwwasmTableInst, AwwasmRuntimeError> {
        self.tables.get_mut(addr.0).ok_or(AwwasmRuntimeError::InvalidTableAddr(addr.0))
    }

    /// Get a memory instance by address.
    pub fn mem(&self, addr: AwwasmMemAddr) -> Result<&AwwasmMemInst, AwwasmRuntimeError> {
        self.mems.get(addr.0).ok_or(AwwasmRuntimeError::InvalidMemAddr(addr.0))
    }

    /// Get a mutable memory instance by address.
    pub fn mem_mut(&mut self, addr: AwwasmMemAddr) -> Result<&mut AwwasmMemInst, AwwasmRuntimeError> {
        self.mems.get_mut(addr.0).ok_or(AwwasmRuntimeError::InvalidMemAddr(addr.0))
    }

    /// Get a global instance by address.
    pub fn global(&self, addr: AwwasmGlobalAddr) -> Result<&AwwasmGlobalInst, AwwasmRuntimeError> {
        self.globals.get(addr.0).ok_or(AwwasmRuntimeError::InvalidGlobalAddr(addr.0))
    }

    /// Get a mutable global instance by address.
    pub fn global_mut(&mut self, addr: AwwasmGlobalAddr) -> Result<&mut AwwasmGlobalInst, AwwasmRuntimeError> {
        self.globals.get_mut(addr.0).ok_or(AwwasmRuntimeError::InvalidGlobalAddr(addr.0))
    }

    /// Get an element instance by address.
    pub fn elem(&self, addr: AwwasmElemAddr) -> Result<&AwwasmElemInst, AwwasmRuntimeError> {
        self.elems.get(addr.0).ok_or(AwwasmRuntimeError::InvalidElemAddr(addr.0))
    }

    /// Get a mutable element instance by address.
    pub fn elem_mut(&mut self, addr: AwwasmElemAddr) -> Result<&mut AwwasmElemInst, AwwasmRuntimeError> {
        self.elems.get_mut(addr.0).ok_or(AwwasmRuntimeError::InvalidElemAddr(addr.0))
    }

    /// Get a data instance by address.
    pub fn data(&self, addr: AwwasmDataAddr) -> Result<&AwwasmDataInst, AwwasmRuntimeError> {
        self.datas.get(addr.0).ok_or(AwwasmRuntimeError::InvalidDataAddr(addr.0))
    }

    /// Get a mutable data instance by address.
    pub fn data_mut(&mut self, addr: AwwasmDataAddr) -> Result<&mut AwwasmDataInst, AwwasmRuntimeError> {
        self.datas.get_mut(addr.0).ok_or(AwwasmRuntimeError::InvalidDataAddr(addr.0))
    }

    /// Get a module instance by address.
    pub fn module(&self, addr: AwwasmModuleAddr) -> Result<&Arc<AwwasmModuleInst>, AwwasmRuntimeError> {
        self.modules.get(addr.0).ok_or(AwwasmRuntimeError::InvalidModuleAddr(addr.0))
    }

    /// The current type of the item behind an external address.
    pub fn extern_type(&self, addr: AwwasmExternAddr) -> Result<AwwasmExternType, AwwasmRuntimeError> {
        Ok(match addr {
            AwwasmExternAddr::Func(a) => AwwasmExternType::Func(self.func(a)?.func_type().clone()),
            AwwasmExternAddr::Table(a) => AwwasmExternType::Table(self.table(a)?.table_type()),
            AwwasmExternAddr::Mem(a) => AwwasmExternType::Memory(self.mem(a)?.memory_type()),
            AwwasmExternAddr::Global(a) => AwwasmExternType::Global(self.global(a)?.global_type()),
        })
    }

    // ========================================================================
    // Module registry
    // ========================================================================

    /// Instantiate `module`, optionally registering it under `name`.
    ///
    /// Without a name the new instance becomes the store's active instance,
    /// replacing (and recycling) the previous one. On failure nothing this
    /// attempt allocated stays in the store.
    pub fn instantiate(
        &mut self,
        module: &AwwasmModule,
        name: Option<&str>,
    ) -> Result<Arc<AwwasmModuleInst>, AwwasmInstantiationError> {
        AwwasmInstantiator::new(self, module, name).run()
    }

    /// Bind `name` to a live instance, e.g. to publish the active instance.
    pub fn register_module(&mut self, name: &str, addr: AwwasmModuleAddr) -> Result<(), AwwasmStoreError> {
        if self.names.contains_key(name) {
            return Err(AwwasmStoreError::ModuleNameConflict(name.to_string()));
        }
        if self.modules.get(addr.0).is_none() {
            return Err(AwwasmStoreError::UnknownModule(addr.to_string()));
        }
        if let Some(existing) = self.name_of(addr) {
            return Err(AwwasmStoreError::AlreadyRegistered(existing.to_string()));
        }
        if self.active == Some(addr) {
            self.active = None;
        }
        self.names.insert(name.to_string(), addr);
        debug!(name, module = addr.0, "module registered");
        Ok(())
    }

    /// Find a registered module instance by name.
    pub fn find_module(&self, name: &str) -> Option<&Arc<AwwasmModuleInst>> {
        self.find_module_addr(name).and_then(|addr| self.modules.get(addr.0))
    }

    #[inline]
    pub fn find_module_addr(&self, name: &str) -> Option<AwwasmModuleAddr> {
        self.names.get(name).copied()
    }

    /// Whether `name` is bound in the store.
    pub fn contains_module(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// The name an instance is registered under, if any.
    pub fn name_of(&self, addr: AwwasmModuleAddr) -> Option<&str> {
        self.names
            .iter()
            .find(|(_, a)| **a == addr)
            .map(|(name, _)| name.as_str())
    }

    /// The active anonymous instance.
    pub fn active_module(&self) -> Option<&Arc<AwwasmModuleInst>> {
        self.active.and_then(|addr| self.modules.get(addr.0))
    }

    /// Registered names, sorted.
    pub fn module_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.names.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Remove a named instance and release everything it owns.
    pub fn unregister_module(&mut self, name: &str) -> Result<(), AwwasmStoreError> {
        let addr = self
            .find_module_addr(name)
            .ok_or_else(|| AwwasmStoreError::UnknownModule(name.to_string()))?;
        self.recycle_module(addr)
    }

    /// Release a live instance, named or anonymous.
    ///
    /// Fails with [`AwwasmStoreError::ModuleInUse`] while another live
    /// instance imports from it.
    pub fn recycle_module(&mut self, addr: AwwasmModuleAddr) -> Result<(), AwwasmStoreError> {
        let label = self.module_label(addr);
        if self.modules.get(addr.0).is_none() {
            return Err(AwwasmStoreError::UnknownModule(label));
        }
        if let Some(dependent) = self.dependent_of(addr) {
            return Err(AwwasmStoreError::ModuleInUse {
                name: label,
                importer: self.module_label(dependent),
            });
        }

        self.names.retain(|_, a| *a != addr);
        if self.active == Some(addr) {
            self.active = None;
        }
        if let Some(inst) = self.modules.free(addr.0) {
            self.release_instance(&inst);
        }
        debug!(module = %label, "module recycled");
        Ok(())
    }

    /// Publish a committed instance: under `name`, or as the active one.
    pub(crate) fn publish(&mut self, addr: AwwasmModuleAddr, name: Option<&str>) -> Result<(), AwwasmStoreError> {
        if self.modules.get(addr.0).is_none() {
            return Err(AwwasmStoreError::UnknownModule(addr.to_string()));
        }
        match name {
            Some(name) => {
                if self.names.contains_key(name) {
                    return Err(AwwasmStoreError::ModuleNameConflict(name.to_string()));
                }
                self.names.insert(name.to_string(), addr);
            }
            None => {
                if let Some(previous) = self.active.replace(addr) {
                    if let Some(dependent) = self.dependent_of(previous) {
                        // Detached: no longer active, released by an explicit
                        // recycle once nothing depends on it.
                        debug!(module = previous.0, dependent = dependent.0, "previous active module kept alive");
                    } else if let Some(inst) = self.modules.free(previous.0) {
                        self.release_instance(&inst);
                        debug!(module = previous.0, "previous active module recycled");
                    }
                }
            }
        }
        Ok(())
    }

    /// Release everything an instance owns; tolerates partially built
    /// instances and never touches imported items.
    pub(crate) fn release_instance(&mut self, inst: &AwwasmModuleInst) {
        for addr in inst.owned_funcs() {
            self.funcs.free(addr.0);
        }
        for addr in inst.owned_tables() {
            self.tables.free(addr.0);
        }
        for addr in inst.owned_mems() {
            self.mems.free(addr.0);
        }
        for addr in inst.owned_globals() {
            self.globals.free(addr.0);
        }
        for addr in &inst.elemaddrs {
            self.elems.free(addr.0);
        }
        for addr in &inst.dataaddrs {
            self.datas.free(addr.0);
        }
        trace!(module = inst.addr.0, "instance resources released");
    }

    /// Drop an instance that never got published.
    ///
    /// Segment writes and the start function may already have stored its
    /// functions in shared tables or globals; those slots are nulled so no
    /// live reference outlives the callee.
    pub(crate) fn discard_instance(&mut self, inst: &AwwasmModuleInst) {
        let addr = inst.addr;
        self.names.retain(|_, a| *a != addr);
        if self.active == Some(addr) {
            self.active = None;
        }
        self.modules.free(addr.0);
        self.clear_refs_to(inst);
        self.release_instance(inst);
    }

    /// Another live instance that keeps `addr` alive, either by importing
    /// from it or by holding one of its functions in a table or global.
    fn dependent_of(&self, addr: AwwasmModuleAddr) -> Option<AwwasmModuleAddr> {
        self.importer_of(addr)
            .or_else(|| self.modules.get(addr.0).and_then(|inst| self.referrer_of(inst)))
    }

    fn importer_of(&self, addr: AwwasmModuleAddr) -> Option<AwwasmModuleAddr> {
        self.modules
            .iter()
            .find(|(idx, inst)| *idx != addr.0 && inst.imports_from.contains(&addr))
            .map(|(idx, _)| AwwasmModuleAddr(idx))
    }

    /// The first other instance whose own tables or globals reference one
    /// of `inst`'s functions.
    fn referrer_of(&self, inst: &AwwasmModuleInst) -> Option<AwwasmModuleAddr> {
        let owned: HashSet<AwwasmFuncAddr> = inst.owned_funcs().iter().copied().collect();
        if owned.is_empty() {
            return None;
        }
        let is_owned = |func: AwwasmFuncAddr| owned.contains(&func);

        self.modules
            .iter()
            .filter(|(idx, _)| *idx != inst.addr.0)
            .find(|(_, other)| {
                let in_tables = other.owned_tables().iter().any(|addr| {
                    self.tables.get(addr.0).is_some_and(|table| {
                        table
                            .get_range(0, table.size())
                            .unwrap_or_default()
                            .iter()
                            .any(|r| r.func_addr().is_some_and(is_owned))
                    })
                });
                in_tables
                    || other
                        .owned_globals()
                        .iter()
                        .any(|addr| self.globals.get(addr.0).is_some_and(|global| global.holds_func(is_owned)))
            })
            .map(|(idx, _)| AwwasmModuleAddr(idx))
    }

    /// Null every reference to `inst`'s functions held outside of it.
    fn clear_refs_to(&mut self, inst: &AwwasmModuleInst) {
        let owned: HashSet<AwwasmFuncAddr> = inst.owned_funcs().iter().copied().collect();
        if owned.is_empty() {
            return;
        }
        let is_owned = |func: AwwasmFuncAddr| owned.contains(&func);

        let mut cleared = 0;
        for (_, table) in self.tables.iter_mut() {
            cleared += table.clear_func_refs(is_owned);
        }
        for (_, global) in self.globals.iter_mut() {
            if global.clear_func_ref(is_owned) {
                cleared += 1;
            }
        }
        if cleared > 0 {
            debug!(module = inst.addr.0, cleared, "references to discarded functions nulled");
        }
    }

    fn module_label(&self, addr: AwwasmModuleAddr) -> String {
        match self.name_of(addr) {
            Some(name) => name.to_string(),
            None => addr.to_string(),
        }
    }

    // ========================================================================
    // Host bindings
    // ========================================================================

    /// Turn host bindings into named host module instances.
    ///
    /// Either every module name in `imports` is free and all of them are
    /// defined, or nothing is.
    pub fn define_imports(&mut self, imports: AwwasmImports) -> Result<Vec<AwwasmModuleAddr>, AwwasmStoreError> {
        if let Some(taken) = imports.module_names().into_iter().find(|name| self.names.contains_key(*name)) {
            return Err(AwwasmStoreError::ModuleNameConflict(taken.to_string()));
        }

        let mut defined: Vec<(String, AwwasmModuleInst)> = Vec::new();
        for entry in imports.into_entries() {
            let pos = match defined.iter().position(|(name, _)| *name == entry.module) {
                Some(pos) => pos,
                None => {
                    let addr = self.reserve_module();
                    defined.push((entry.module.clone(), AwwasmModuleInst::new(addr)));
                    defined.len() - 1
                }
            };
            let addr = match entry.value {
                AwwasmImportValue::Func(func) => {
                    let addr = self.alloc_func(func);
                    defined[pos].1.funcaddrs.push(addr);
                    AwwasmExternAddr::Func(addr)
                }
                AwwasmImportValue::Table(table) => {
                    let addr = self.alloc_table(table);
                    defined[pos].1.tableaddrs.push(addr);
                    AwwasmExternAddr::Table(addr)
                }
                AwwasmImportValue::Memory(mem) => {
                    let addr = self.alloc_mem(mem);
                    defined[pos].1.memaddrs.push(addr);
                    AwwasmExternAddr::Mem(addr)
                }
                AwwasmImportValue::Global(global) => {
                    let addr = self.alloc_global(global);
                    defined[pos].1.globaladdrs.push(addr);
                    AwwasmExternAddr::Global(addr)
                }
            };
            defined[pos].1.exports.insert(entry.name, addr);
        }

        let mut addrs = Vec::with_capacity(defined.len());
        for (name, inst) in defined {
            let addr = inst.addr;
            debug!(name = %name, exports = inst.exports.len(), "host module defined");
            self.fill_module(Arc::new(inst));
            self.names.insert(name, addr);
            addrs.push(addr);
        }
        Ok(addrs)
    }

    // ========================================================================
    // Extern side table
    // ========================================================================

    /// Store a host object and get the handle externref values carry.
    pub fn add_extern<T: Any + Send>(&mut self, value: T) -> AwwasmExternHandle {
        AwwasmExternHandle(self.externs.alloc(Box::new(value)))
    }

    pub fn extern_ref<T: Any + Send>(&self, handle: AwwasmExternHandle) -> Option<&T> {
        self.externs.get(handle.0)?.downcast_ref::<T>()
    }

    pub fn extern_mut<T: Any + Send>(&mut self, handle: AwwasmExternHandle) -> Option<&mut T> {
        self.externs.get_mut(handle.0)?.downcast_mut::<T>()
    }

    /// Remove a host object. References holding the handle stop resolving.
    pub fn remove_extern(&mut self, handle: AwwasmExternHandle) -> Option<Box<dyn Any + Send>> {
        self.externs.free(handle.0)
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Attach the engine that runs wasm function bodies.
    pub fn set_engine<E: AwwasmEngine + 'static>(&mut self, engine: E) {
        self.engine = Some(Arc::new(engine));
    }

    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    /// The store's interrupt flag; clone it to stop execution from elsewhere.
    pub fn interrupt_handle(&self) -> &AwwasmInterruptHandle {
        &self.interrupt
    }

    /// Call a function by address.
    pub fn invoke(
        &mut self,
        func: AwwasmFuncAddr,
        args: &[AwwasmValue],
    ) -> Result<Vec<AwwasmValue>, AwwasmRuntimeError> {
        self.invoke_in_frame(func, args, None)
    }

    /// Call a function; host functions see `frame` as their caller.
    pub(crate) fn invoke_in_frame(
        &mut self,
        func: AwwasmFuncAddr,
        args: &[AwwasmValue],
        frame: Option<&AwwasmModuleInst>,
    ) -> Result<Vec<AwwasmValue>, AwwasmRuntimeError> {
        self.interrupt.check()?;
        let func = self.func(func)?.clone();
        check_args(&func.func_type().params, args)?;

        let results = match &func {
            AwwasmFuncInst::Host(host) => {
                let mut caller = AwwasmCaller::new(self, frame);
                (host.func)(&mut caller, args)?
            }
            AwwasmFuncInst::Wasm(wasm) => {
                let owner = Arc::clone(self.module(wasm.module)?);
                // Shared so that nested calls back into wasm find it too.
                let engine = self.engine.clone().ok_or(AwwasmTrap::NoEngine)?;
                let mut caller = AwwasmCaller::new(self, Some(&*owner));
                engine.call(&mut caller, wasm, args)?
            }
        };
        check_results(&func.func_type().results, &results)?;
        Ok(results)
    }

    // ========================================================================
    // Utility methods
    // ========================================================================

    /// Get the number of live function instances.
    pub fn func_count(&self) -> usize {
        self.funcs.live
    }

    /// Get the number of live table instances.
    pub fn table_count(&self) -> usize {
        self.tables.live
    }

    /// Get the number of live memory instances.
    pub fn mem_count(&self) -> usize {
        self.mems.live
    }

    /// Get the number of live global instances.
    pub fn global_count(&self) -> usize {
        self.globals.live
    }

    pub fn elem_count(&self) -> usize {
        self.elems.live
    }

    pub fn data_count(&self) -> usize {
        self.datas.live
    }

    /// Get the number of live module instances (named, active and host).
    pub fn module_count(&self) -> usize {
        self.modules.live
    }
}

impl Default for AwwasmStore {
    fn default() -> Self {
        Self::new()
    }
}

fn check_results(expected: &[AwwasmValueType], results: &[AwwasmValue]) -> Result<(), AwwasmRuntimeError> {
    let got: Vec<AwwasmValueType> = results.iter().map(AwwasmValue::value_type).collect();
    if got != expected {
        return Err(AwwasmRuntimeError::ResultMismatch {
            expected: expected.to_vec(),
            got,
        });
    }
    Ok(())
}

fn check_args(params: &[AwwasmValueType], args: &[AwwasmValue]) -> Result<(), AwwasmRuntimeError> {
    if params.len() != args.len() {
        return Err(AwwasmRuntimeError::ArityMismatch {
            expected: params.len(),
            got: args.len(),
        });
    }
    for (expected, arg) in params.iter().zip(args) {
        let got = arg.value_type();
        if got != *expected {
            return Err(AwwasmRuntimeError::TypeMismatch {
                expected: *expected,
                got,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::AwwasmFuncType;
    use crate::global::AwwasmGlobalType;
    use crate::memory::AwwasmMemoryType;

    fn host_env() -> AwwasmImports {
        let mut imports = AwwasmImports::new();
        imports
            .add_memory("env", "memory", AwwasmMemInst::new(AwwasmMemoryType::new(1, None), 16).unwrap())
            .add_global(
                "env",
                "base",
                AwwasmGlobalInst::new(AwwasmGlobalType::immutable(AwwasmValueType::I32), AwwasmValue::I32(8)).unwrap(),
            )
            .add_host_func(
                "env",
                "double",
                AwwasmFuncType::new(vec![AwwasmValueType::I32], vec![AwwasmValueType::I32]),
                |_, args| Ok(vec![AwwasmValue::I32(args[0].as_i32().unwrap_or(0) * 2)]),
            );
        imports
    }

    #[test]
    fn test_store_creation() {
        let store = AwwasmStore::new();
        assert_eq!(store.func_count(), 0);
        assert_eq!(store.mem_count(), 0);
        assert_eq!(store.table_count(), 0);
        assert_eq!(store.global_count(), 0);
        assert_eq!(store.module_count(), 0);
        assert!(store.module_names().is_empty());
    }

    #[test]
    fn test_define_imports_registers_host_module() {
        let mut store = AwwasmStore::new();
        let addrs = store.define_imports(host_env()).unwrap();
        assert_eq!(addrs.len(), 1);
        assert_eq!(store.module_names(), vec!["env"]);

        let env = store.find_module("env").unwrap();
        assert_eq!(env.export_names(), vec!["base", "double", "memory"]);
        let mem = env.export_memory("memory").unwrap();
        assert_eq!(store.mem(mem).unwrap().size_pages(), 1);
    }

    #[test]
    fn test_define_imports_is_all_or_nothing() {
        let mut store = AwwasmStore::new();
        store.define_imports(host_env()).unwrap();

        let mut more = AwwasmImports::new();
        more.add_memory("other", "m", AwwasmMemInst::new(AwwasmMemoryType::new(0, None), 16).unwrap());
        more.add_memory("env", "m", AwwasmMemInst::new(AwwasmMemoryType::new(0, None), 16).unwrap());
        assert_eq!(
            store.define_imports(more).unwrap_err(),
            AwwasmStoreError::ModuleNameConflict("env".into())
        );
        assert!(!store.contains_module("other"));
        assert_eq!(store.mem_count(), 1);
    }

    #[test]
    fn test_invoke_host_function() {
        let mut store = AwwasmStore::new();
        store.define_imports(host_env()).unwrap();
        let double = store.find_module("env").unwrap().export_func("double").unwrap();

        assert_eq!(store.invoke(double, &[AwwasmValue::I32(21)]).unwrap(), vec![AwwasmValue::I32(42)]);
        assert_eq!(
            store.invoke(double, &[AwwasmValue::I64(21)]).unwrap_err(),
            AwwasmRuntimeError::TypeMismatch {
                expected: AwwasmValueType::I32,
                got: AwwasmValueType::I64,
            }
        );
        assert_eq!(
            store.invoke(double, &[]).unwrap_err(),
            AwwasmRuntimeError::ArityMismatch { expected: 1, got: 0 }
        );
    }

    #[test]
    fn test_invoke_checks_results() {
        let mut imports = AwwasmImports::new();
        imports.add_host_func(
            "env",
            "wrong",
            AwwasmFuncType::new(vec![], vec![AwwasmValueType::I32]),
            |_, _| Ok(vec![AwwasmValue::I64(1)]),
        );
        let mut store = AwwasmStore::new();
        store.define_imports(imports).unwrap();
        let wrong = store.find_module("env").unwrap().export_func("wrong").unwrap();

        assert_eq!(
            store.invoke(wrong, &[]).unwrap_err(),
            AwwasmRuntimeError::ResultMismatch {
                expected: vec![AwwasmValueType::I32],
                got: vec![AwwasmValueType::I64],
            }
        );
    }

    #[test]
    fn test_invoke_checks_interrupt() {
        let mut store = AwwasmStore::new();
        store.define_imports(host_env()).unwrap();
        let double = store.find_module("env").unwrap().export_func("double").unwrap();

        store.interrupt_handle().clone().interrupt();
        assert_eq!(
            store.invoke(double, &[AwwasmValue::I32(1)]).unwrap_err(),
            AwwasmRuntimeError::Trap(AwwasmTrap::Interrupted)
        );
        store.interrupt_handle().clear();
        assert!(store.invoke(double, &[AwwasmValue::I32(1)]).is_ok());
    }

    #[test]
    fn test_unregister_releases_and_invalidates_addresses() {
        let mut store = AwwasmStore::new();
        store.define_imports(host_env()).unwrap();
        let mem = store.find_module("env").unwrap().export_memory("memory").unwrap();

        store.unregister_module("env").unwrap();
        assert!(store.find_module("env").is_none());
        assert_eq!(store.mem(mem).unwrap_err(), AwwasmRuntimeError::InvalidMemAddr(mem.0));
        assert_eq!(store.module_count(), 0);
        assert_eq!(store.func_count(), 0);
        assert_eq!(
            store.unregister_module("env").unwrap_err(),
            AwwasmStoreError::UnknownModule("env".into())
        );
    }

    #[test]
    fn test_extern_side_table() {
        let mut store = AwwasmStore::new();
        let handle = store.add_extern(String::from("host object"));

        assert_eq!(store.extern_ref::<String>(handle).map(String::as_str), Some("host object"));
        assert!(store.extern_ref::<u32>(handle).is_none());

        store.extern_mut::<String>(handle).unwrap().push('!');
        let removed = store.remove_extern(handle).unwrap();
        assert_eq!(removed.downcast_ref::<String>().map(String::as_str), Some("host object!"));
        assert!(store.extern_ref::<String>(handle).is_none());

        // Handles are not reused after removal.
        let next = store.add_extern(1u32);
        assert_ne!(next, handle);
    }

    #[test]
    fn test_store_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<AwwasmStore>();
    }
}
