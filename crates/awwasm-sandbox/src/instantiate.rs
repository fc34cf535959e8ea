//! Instantiation of a validated module into a store.
//!
//! Instantiation walks a fixed sequence of phases. Everything an attempt
//! allocates is recorded in the instance under construction; when any
//! phase fails that partial instance is torn down again and the store ends
//! up exactly as it was, minus whatever the start function did to shared
//! (imported) state.

use core::fmt;
use std::sync::Arc;

use tracing::{debug, debug_span, trace, warn};

use crate::error::{AwwasmInstantiationError, AwwasmRuntimeError, AwwasmTrap};
use crate::func::{AwwasmDataInst, AwwasmElemInst, AwwasmFuncInst, AwwasmFuncType};
use crate::global::AwwasmGlobalInst;
use crate::instance::AwwasmModuleInst;
use crate::memory::AwwasmMemInst;
use crate::module::{AwwasmDataMode, AwwasmElemItems, AwwasmElemMode, AwwasmImportDesc, AwwasmModule};
use crate::resolve::{AwwasmExternType, AwwasmImportResolver};
use crate::store::AwwasmStore;
use crate::table::AwwasmTableInst;
use crate::values::{
    AwwasmExternAddr, AwwasmExternKind, AwwasmGlobalAddr, AwwasmMemAddr, AwwasmRef, AwwasmRefType,
    AwwasmTableAddr, AwwasmValue,
};

/// The phases of instantiation, in the order they complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AwwasmInstantiationPhase {
    TypesRegistered,
    ImportsResolved,
    FunctionsAllocated,
    MemoriesAllocated,
    TablesAllocated,
    GlobalsInitialized,
    ExportsPublished,
    ElementSegmentsChecked,
    DataSegmentsChecked,
    TableContentsInitialized,
    MemoryContentsInitialized,
    StartFunctionExecuted,
    Done,
}

impl fmt::Display for AwwasmInstantiationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AwwasmInstantiationPhase::TypesRegistered => "types registered",
            AwwasmInstantiationPhase::ImportsResolved => "imports resolved",
            AwwasmInstantiationPhase::FunctionsAllocated => "functions allocated",
            AwwasmInstantiationPhase::MemoriesAllocated => "memories allocated",
            AwwasmInstantiationPhase::TablesAllocated => "tables allocated",
            AwwasmInstantiationPhase::GlobalsInitialized => "globals initialized",
            AwwasmInstantiationPhase::ExportsPublished => "exports published",
            AwwasmInstantiationPhase::ElementSegmentsChecked => "element segments checked",
            AwwasmInstantiationPhase::DataSegmentsChecked => "data segments checked",
            AwwasmInstantiationPhase::TableContentsInitialized => "table contents initialized",
            AwwasmInstantiationPhase::MemoryContentsInitialized => "memory contents initialized",
            AwwasmInstantiationPhase::StartFunctionExecuted => "start function executed",
            AwwasmInstantiationPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// A pending write of an active element segment.
struct AwwasmElemWrite {
    segment: u32,
    table: AwwasmTableAddr,
    offset: u32,
    elem_type: AwwasmRefType,
    refs: Vec<AwwasmRef>,
}

/// A pending write of an active data segment.
struct AwwasmDataWrite {
    segment: u32,
    mem: AwwasmMemAddr,
    offset: u32,
    bytes: Arc<[u8]>,
}

/// Drives one instantiation attempt.
pub(crate) struct AwwasmInstantiator<'s> {
    store: &'s mut AwwasmStore,
    module: &'s AwwasmModule,
    name: Option<&'s str>,
    /// Last phase that completed.
    phase: Option<AwwasmInstantiationPhase>,
}

impl<'s> AwwasmInstantiator<'s> {
    pub(crate) fn new(store: &'s mut AwwasmStore, module: &'s AwwasmModule, name: Option<&'s str>) -> Self {
        Self {
            store,
            module,
            name,
            phase: None,
        }
    }

    pub(crate) fn run(mut self) -> Result<Arc<AwwasmModuleInst>, AwwasmInstantiationError> {
        let span = debug_span!("instantiate", name = self.name.unwrap_or("<anonymous>"));
        let _enter = span.enter();

        // Fail fast, before any allocation.
        if let Some(name) = self.name {
            if self.store.contains_module(name) {
                warn!(name, "module name already registered");
                return Err(AwwasmInstantiationError::ModuleNameConflict(name.to_string()));
            }
        }

        let mut inst = AwwasmModuleInst::new(self.store.reserve_module());
        if let Err(err) = self.build(&mut inst) {
            self.rollback(&inst, &err);
            return Err(err);
        }

        let inst = Arc::new(inst);
        self.store.fill_module(Arc::clone(&inst));
        if let Err(err) = self.finish(&inst) {
            self.rollback(&inst, &err);
            return Err(err);
        }

        debug!(
            module = inst.addr().0,
            funcs = inst.funcaddrs.len(),
            memories = inst.memaddrs.len(),
            tables = inst.tableaddrs.len(),
            globals = inst.globaladdrs.len(),
            "module instantiated"
        );
        Ok(inst)
    }

    fn advance(&mut self, phase: AwwasmInstantiationPhase) {
        debug_assert!(self.phase.map_or(true, |done| done < phase));
        self.phase = Some(phase);
        trace!(%phase, "phase complete");
    }

    fn rollback(&mut self, inst: &AwwasmModuleInst, err: &AwwasmInstantiationError) {
        warn!(
            error = %err,
            completed = ?self.phase,
            "instantiation failed, rolling back"
        );
        self.store.discard_instance(inst);
        debug!(module = inst.addr().0, "partial instance recycled");
    }

    /// Everything up to and including the segment writes.
    fn build(&mut self, inst: &mut AwwasmModuleInst) -> Result<(), AwwasmInstantiationError> {
        inst.types = self.module.types.clone();
        self.advance(AwwasmInstantiationPhase::TypesRegistered);

        self.resolve_imports(inst)?;
        self.advance(AwwasmInstantiationPhase::ImportsResolved);

        self.alloc_funcs(inst)?;
        self.advance(AwwasmInstantiationPhase::FunctionsAllocated);

        self.alloc_memories(inst)?;
        self.advance(AwwasmInstantiationPhase::MemoriesAllocated);

        self.alloc_tables(inst)?;
        self.advance(AwwasmInstantiationPhase::TablesAllocated);

        self.init_globals(inst)?;
        self.advance(AwwasmInstantiationPhase::GlobalsInitialized);

        self.publish_exports(inst)?;
        self.advance(AwwasmInstantiationPhase::ExportsPublished);

        let globals = self.global_values(&inst.globaladdrs)?;
        let (elem_writes, passive_refs) = self.plan_elem_segments(inst, &globals)?;
        if !self.store.config().relaxed_segment_bounds {
            for write in &elem_writes {
                self.check_elem_fits(write)?;
            }
        }
        self.advance(AwwasmInstantiationPhase::ElementSegmentsChecked);

        let data_writes = self.plan_data_segments(inst, &globals)?;
        if !self.store.config().relaxed_segment_bounds {
            for write in &data_writes {
                self.check_data_fits(write)?;
            }
        }
        self.advance(AwwasmInstantiationPhase::DataSegmentsChecked);

        self.write_elem_segments(inst, elem_writes, passive_refs)?;
        self.advance(AwwasmInstantiationPhase::TableContentsInitialized);

        self.write_data_segments(inst, data_writes)?;
        self.advance(AwwasmInstantiationPhase::MemoryContentsInitialized);

        Ok(())
    }

    /// The start function and the final commit. The instance is already
    /// reachable by address so calls made by the start function resolve.
    fn finish(&mut self, inst: &Arc<AwwasmModuleInst>) -> Result<(), AwwasmInstantiationError> {
        if let Some(start) = inst.start() {
            debug!(func = start.0, "running start function");
            self.store
                .invoke_in_frame(start, &[], Some(inst.as_ref()))
                .map_err(|err| match err {
                    AwwasmRuntimeError::Trap(trap) => AwwasmInstantiationError::StartFunctionTrapped(trap),
                    other => AwwasmInstantiationError::InvalidModule(other.to_string()),
                })?;
        }
        self.advance(AwwasmInstantiationPhase::StartFunctionExecuted);

        // The start function may have registered the same name meanwhile.
        self.store.publish(inst.addr(), self.name)?;
        self.advance(AwwasmInstantiationPhase::Done);
        Ok(())
    }

    // ========================================================================
    // Phases
    // ========================================================================

    fn resolve_imports(&mut self, inst: &mut AwwasmModuleInst) -> Result<(), AwwasmInstantiationError> {
        for import in &self.module.imports {
            let expected = match &import.desc {
                AwwasmImportDesc::Func(type_idx) => AwwasmExternType::Func(self.func_type(*type_idx)?.clone()),
                AwwasmImportDesc::Table(ty) => AwwasmExternType::Table(*ty),
                AwwasmImportDesc::Memory(ty) => AwwasmExternType::Memory(*ty),
                AwwasmImportDesc::Global(ty) => AwwasmExternType::Global(*ty),
            };
            let resolved = AwwasmImportResolver::new(self.store).resolve(&import.module, &import.name, &expected)?;
            trace!(module = %import.module, name = %import.name, "import resolved");

            inst.add_import_source(resolved.exporter);
            // Counts grow with each entry so a rollback never frees an import.
            match resolved.addr {
                AwwasmExternAddr::Func(addr) => {
                    inst.funcaddrs.push(addr);
                    inst.imported.funcs += 1;
                }
                AwwasmExternAddr::Table(addr) => {
                    inst.tableaddrs.push(addr);
                    inst.imported.tables += 1;
                }
                AwwasmExternAddr::Mem(addr) => {
                    inst.memaddrs.push(addr);
                    inst.imported.mems += 1;
                }
                AwwasmExternAddr::Global(addr) => {
                    inst.globaladdrs.push(addr);
                    inst.imported.globals += 1;
                }
            }
        }
        Ok(())
    }

    fn alloc_funcs(&mut self, inst: &mut AwwasmModuleInst) -> Result<(), AwwasmInstantiationError> {
        for (def_index, decl) in self.module.funcs.iter().enumerate() {
            let ty = self.func_type(decl.type_idx)?.clone();
            let func = AwwasmFuncInst::wasm(ty, inst.addr(), def_index as u32, Arc::clone(&decl.body));
            inst.funcaddrs.push(self.store.alloc_func(func));
        }
        Ok(())
    }

    fn alloc_memories(&mut self, inst: &mut AwwasmModuleInst) -> Result<(), AwwasmInstantiationError> {
        let page_limit = self.store.config().max_memory_pages;
        for ty in &self.module.memories {
            let index = inst.memaddrs.len() as u32;
            let mem = AwwasmMemInst::new(*ty, page_limit).map_err(|source| AwwasmInstantiationError::AllocationFailed {
                kind: AwwasmExternKind::Memory,
                index,
                source,
            })?;
            inst.memaddrs.push(self.store.alloc_mem(mem));
        }
        Ok(())
    }

    fn alloc_tables(&mut self, inst: &mut AwwasmModuleInst) -> Result<(), AwwasmInstantiationError> {
        let limit = self.store.config().max_table_elements;
        for ty in &self.module.tables {
            let index = inst.tableaddrs.len() as u32;
            let table = AwwasmTableInst::new(*ty, limit).map_err(|source| AwwasmInstantiationError::AllocationFailed {
                kind: AwwasmExternKind::Table,
                index,
                source,
            })?;
            inst.tableaddrs.push(self.store.alloc_table(table));
        }
        Ok(())
    }

    /// Initializers see the imported globals and every function.
    fn init_globals(&mut self, inst: &mut AwwasmModuleInst) -> Result<(), AwwasmInstantiationError> {
        let imported = self.global_values(&inst.globaladdrs)?;
        for decl in &self.module.globals {
            let value = decl
                .init
                .eval(&imported, &inst.funcaddrs)
                .map_err(AwwasmInstantiationError::InitializerTrapped)?;
            let global = AwwasmGlobalInst::new(decl.ty, value).map_err(|err| match err {
                AwwasmRuntimeError::TypeMismatch { expected, got } => {
                    AwwasmInstantiationError::InitializerTrapped(AwwasmTrap::ConstExprTypeMismatch { expected, got })
                }
                other => AwwasmInstantiationError::InvalidModule(other.to_string()),
            })?;
            inst.globaladdrs.push(self.store.alloc_global(global));
        }
        Ok(())
    }

    fn publish_exports(&mut self, inst: &mut AwwasmModuleInst) -> Result<(), AwwasmInstantiationError> {
        for export in &self.module.exports {
            let addr = match export.kind {
                AwwasmExternKind::Func => inst.func(export.index).map(AwwasmExternAddr::from),
                AwwasmExternKind::Table => inst.table(export.index).map(AwwasmExternAddr::from),
                AwwasmExternKind::Memory => inst.mem(export.index).map(AwwasmExternAddr::from),
                AwwasmExternKind::Global => inst.global(export.index).map(AwwasmExternAddr::from),
            }
            .ok_or_else(|| {
                invalid(format!(
                    "export {} refers to missing {} {}",
                    export.name, export.kind, export.index
                ))
            })?;
            if inst.exports.insert(export.name.clone(), addr).is_some() {
                return Err(invalid(format!("duplicate export {}", export.name)));
            }
        }

        inst.start = match self.module.start {
            Some(idx) => Some(
                inst.func(idx)
                    .ok_or_else(|| invalid(format!("start function {} does not exist", idx)))?,
            ),
            None => None,
        };
        Ok(())
    }

    /// Evaluate element items and offsets without touching any table.
    ///
    /// Returns the pending active writes and, per segment, the references a
    /// passive segment keeps (empty for the others).
    fn plan_elem_segments(
        &self,
        inst: &AwwasmModuleInst,
        globals: &[AwwasmValue],
    ) -> Result<(Vec<AwwasmElemWrite>, Vec<Vec<AwwasmRef>>), AwwasmInstantiationError> {
        let mut writes = Vec::new();
        let mut passive = Vec::with_capacity(self.module.elems.len());

        for (segment, seg) in self.module.elems.iter().enumerate() {
            let refs = match &seg.items {
                AwwasmElemItems::Funcs(indices) => indices
                    .iter()
                    .map(|idx| {
                        inst.func(*idx)
                            .map(AwwasmRef::Func)
                            .ok_or(AwwasmTrap::FuncIndexOutOfRange(*idx))
                    })
                    .collect::<Result<Vec<_>, _>>(),
                AwwasmElemItems::Exprs(exprs) => exprs
                    .iter()
                    .map(|expr| expr.eval_ref(globals, &inst.funcaddrs))
                    .collect::<Result<Vec<_>, _>>(),
            }
            .map_err(AwwasmInstantiationError::InitializerTrapped)?;

            match &seg.mode {
                AwwasmElemMode::Active { table, offset } => {
                    let table_addr = inst
                        .table(*table)
                        .ok_or_else(|| invalid(format!("element segment {} targets missing table {}", segment, table)))?;
                    let offset = offset
                        .eval_offset(globals, &inst.funcaddrs)
                        .map_err(AwwasmInstantiationError::InitializerTrapped)?;
                    writes.push(AwwasmElemWrite {
                        segment: segment as u32,
                        table: table_addr,
                        offset,
                        elem_type: seg.elem_type,
                        refs,
                    });
                    passive.push(Vec::new());
                }
                AwwasmElemMode::Passive => passive.push(refs),
                AwwasmElemMode::Declarative => passive.push(Vec::new()),
            }
        }
        Ok((writes, passive))
    }

    fn plan_data_segments(
        &self,
        inst: &AwwasmModuleInst,
        globals: &[AwwasmValue],
    ) -> Result<Vec<AwwasmDataWrite>, AwwasmInstantiationError> {
        let mut writes = Vec::new();
        for (segment, seg) in self.module.datas.iter().enumerate() {
            if let AwwasmDataMode::Active { memory, offset } = &seg.mode {
                let mem = inst
                    .mem(*memory)
                    .ok_or_else(|| invalid(format!("data segment {} targets missing memory {}", segment, memory)))?;
                let offset = offset
                    .eval_offset(globals, &inst.funcaddrs)
                    .map_err(AwwasmInstantiationError::InitializerTrapped)?;
                writes.push(AwwasmDataWrite {
                    segment: segment as u32,
                    mem,
                    offset,
                    bytes: Arc::clone(&seg.bytes),
                });
            }
        }
        Ok(writes)
    }

    /// The bounds check shared by the up-front pass and the relaxed mode.
    fn check_elem_fits(&self, write: &AwwasmElemWrite) -> Result<(), AwwasmInstantiationError> {
        let table = self
            .store
            .table(write.table)
            .map_err(|err| invalid(err.to_string()))?;
        if table.elem_type() != write.elem_type {
            return Err(invalid(format!(
                "element segment {} holds {} but its table holds {}",
                write.segment,
                write.elem_type,
                table.elem_type()
            )));
        }
        if let Some(stray) = write.refs.iter().find(|r| r.ref_type() != write.elem_type) {
            return Err(invalid(format!(
                "element segment {} of type {} holds a {} item",
                write.segment,
                write.elem_type,
                stray.ref_type()
            )));
        }
        let len = write.refs.len() as u64;
        if !table.check_bounds(write.offset as u64, len) {
            return Err(AwwasmInstantiationError::ElementSegmentDoesNotFit {
                segment: write.segment,
                offset: write.offset as u64,
                len,
                table_size: table.size() as u64,
            });
        }
        Ok(())
    }

    fn check_data_fits(&self, write: &AwwasmDataWrite) -> Result<(), AwwasmInstantiationError> {
        let mem = self.store.mem(write.mem).map_err(|err| invalid(err.to_string()))?;
        let len = write.bytes.len() as u64;
        if !mem.check_bounds(write.offset as u64, len) {
            return Err(AwwasmInstantiationError::DataSegmentDoesNotFit {
                segment: write.segment,
                offset: write.offset as u64,
                len,
                memory_size: mem.size_bytes(),
            });
        }
        Ok(())
    }

    fn write_elem_segments(
        &mut self,
        inst: &mut AwwasmModuleInst,
        writes: Vec<AwwasmElemWrite>,
        passive: Vec<Vec<AwwasmRef>>,
    ) -> Result<(), AwwasmInstantiationError> {
        let relaxed = self.store.config().relaxed_segment_bounds;
        for write in &writes {
            if relaxed {
                self.check_elem_fits(write)?;
            }
            let table = self
                .store
                .table_mut(write.table)
                .map_err(|err| invalid(err.to_string()))?;
            if let Err(trap) = table.set_range(write.offset, &write.refs, 0, write.refs.len() as u32) {
                panic!(
                    "element segment {} write failed after its bounds check passed: {}",
                    write.segment, trap
                );
            }
        }

        for (seg, refs) in self.module.elems.iter().zip(passive) {
            let mut elem = AwwasmElemInst::new(seg.elem_type, refs);
            if !matches!(seg.mode, AwwasmElemMode::Passive) {
                elem.drop_elem();
            }
            inst.elemaddrs.push(self.store.alloc_elem(elem));
        }
        Ok(())
    }

    fn write_data_segments(
        &mut self,
        inst: &mut AwwasmModuleInst,
        writes: Vec<AwwasmDataWrite>,
    ) -> Result<(), AwwasmInstantiationError> {
        let relaxed = self.store.config().relaxed_segment_bounds;
        for write in &writes {
            if relaxed {
                self.check_data_fits(write)?;
            }
            let mem = self.store.mem_mut(write.mem).map_err(|err| invalid(err.to_string()))?;
            if let Err(trap) = mem.write(write.offset as u64, &write.bytes) {
                panic!(
                    "data segment {} write failed after its bounds check passed: {}",
                    write.segment, trap
                );
            }
        }

        for seg in &self.module.datas {
            let mut data = AwwasmDataInst::new(Arc::clone(&seg.bytes));
            if !matches!(seg.mode, AwwasmDataMode::Passive) {
                data.drop_data();
            }
            inst.dataaddrs.push(self.store.alloc_data(data));
        }
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn func_type(&self, idx: u32) -> Result<&'s AwwasmFuncType, AwwasmInstantiationError> {
        let module: &'s AwwasmModule = self.module;
        module
            .types
            .get(idx as usize)
            .ok_or_else(|| invalid(format!("type index {} out of range", idx)))
    }

    fn global_values(
        &self,
        addrs: &[AwwasmGlobalAddr],
    ) -> Result<Vec<AwwasmValue>, AwwasmInstantiationError> {
        addrs
            .iter()
            .map(|addr| self.store.global(*addr).map(AwwasmGlobalInst::get))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| invalid(err.to_string()))
    }
}

fn invalid(msg: String) -> AwwasmInstantiationError {
    AwwasmInstantiationError::InvalidModule(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases_are_ordered() {
        assert!(AwwasmInstantiationPhase::TypesRegistered < AwwasmInstantiationPhase::ImportsResolved);
        assert!(AwwasmInstantiationPhase::DataSegmentsChecked < AwwasmInstantiationPhase::TableContentsInitialized);
        assert!(AwwasmInstantiationPhase::StartFunctionExecuted < AwwasmInstantiationPhase::Done);
        assert_eq!(AwwasmInstantiationPhase::ElementSegmentsChecked.to_string(), "element segments checked");
    }
}
