//! Module instance.
//!
//! A module instance is the runtime representation of an instantiated module.
//! It maps module-local indices to store addresses and holds the export map.
//! Once committed to the store it is immutable and shared behind an `Arc`.

use std::collections::HashMap;

use crate::error::AwwasmRuntimeError;
use crate::func::AwwasmFuncType;
use crate::values::{
    AwwasmDataAddr, AwwasmElemAddr, AwwasmExternAddr, AwwasmExternKind, AwwasmFuncAddr, AwwasmGlobalAddr,
    AwwasmMemAddr, AwwasmModuleAddr, AwwasmTableAddr,
};

/// How many entries at the front of each index space were imported.
///
/// Imported entries are owned by the exporting instance and are never
/// released when this instance goes away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct AwwasmImportCounts {
    pub funcs: usize,
    pub tables: usize,
    pub mems: usize,
    pub globals: usize,
}

/// Module instance - runtime representation of an instantiated module.
///
/// This holds all the addresses that map module-local indices to
/// Store addresses, plus the exports.
#[derive(Debug, Clone)]
pub struct AwwasmModuleInst {
    /// Address of this instance in the store.
    pub(crate) addr: AwwasmModuleAddr,
    /// Function signatures (indexed by typeidx).
    pub(crate) types: Vec<AwwasmFuncType>,
    /// Function addresses (indexed by funcidx).
    pub(crate) funcaddrs: Vec<AwwasmFuncAddr>,
    /// Table addresses (indexed by tableidx).
    pub(crate) tableaddrs: Vec<AwwasmTableAddr>,
    /// Memory addresses (indexed by memidx).
    pub(crate) memaddrs: Vec<AwwasmMemAddr>,
    /// Global addresses (indexed by globalidx).
    pub(crate) globaladdrs: Vec<AwwasmGlobalAddr>,
    /// Element addresses (indexed by elemidx).
    pub(crate) elemaddrs: Vec<AwwasmElemAddr>,
    /// Data addresses (indexed by dataidx).
    pub(crate) dataaddrs: Vec<AwwasmDataAddr>,
    pub(crate) exports: HashMap<String, AwwasmExternAddr>,
    pub(crate) start: Option<AwwasmFuncAddr>,
    pub(crate) imported: AwwasmImportCounts,
    /// Instances this one imports from; they must outlive it.
    pub(crate) imports_from: Vec<AwwasmModuleAddr>,
}

impl AwwasmModuleInst {
    pub(crate) fn new(addr: AwwasmModuleAddr) -> Self {
        Self {
            addr,
            types: Vec::new(),
            funcaddrs: Vec::new(),
            tableaddrs: Vec::new(),
            memaddrs: Vec::new(),
            globaladdrs: Vec::new(),
            elemaddrs: Vec::new(),
            dataaddrs: Vec::new(),
            exports: HashMap::new(),
            start: None,
            imported: AwwasmImportCounts::default(),
            imports_from: Vec::new(),
        }
    }

    #[inline]
    pub fn addr(&self) -> AwwasmModuleAddr {
        self.addr
    }

    /// Get a function signature by type index.
    pub fn func_type(&self, idx: u32) -> Option<&AwwasmFuncType> {
        self.types.get(idx as usize)
    }

    /// Get a function address by module-local index.
    #[inline]
    pub fn func(&self, idx: u32) -> Option<AwwasmFuncAddr> {
        self.funcaddrs.get(idx as usize).copied()
    }

    /// Get a table address by module-local index.
    #[inline]
    pub fn table(&self, idx: u32) -> Option<AwwasmTableAddr> {
        self.tableaddrs.get(idx as usize).copied()
    }

    /// Get a memory address by module-local index.
    #[inline]
    pub fn mem(&self, idx: u32) -> Option<AwwasmMemAddr> {
        self.memaddrs.get(idx as usize).copied()
    }

    /// Get a global address by module-local index.
    #[inline]
    pub fn global(&self, idx: u32) -> Option<AwwasmGlobalAddr> {
        self.globaladdrs.get(idx as usize).copied()
    }

    /// Get an element address by module-local index.
    #[inline]
    pub fn elem(&self, idx: u32) -> Option<AwwasmElemAddr> {
        self.elemaddrs.get(idx as usize).copied()
    }

    /// Get a data address by module-local index.
    #[inline]
    pub fn data(&self, idx: u32) -> Option<AwwasmDataAddr> {
        self.dataaddrs.get(idx as usize).copied()
    }

    pub fn start(&self) -> Option<AwwasmFuncAddr> {
        self.start
    }

    // ========================================================================
    // Exports
    // ========================================================================

    /// Find an export by name.
    pub fn export(&self, name: &str) -> Option<AwwasmExternAddr> {
        self.exports.get(name).copied()
    }

    /// Export names, sorted.
    pub fn export_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.exports.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn export_func(&self, name: &str) -> Result<AwwasmFuncAddr, AwwasmRuntimeError> {
        match self.export(name) {
            Some(AwwasmExternAddr::Func(addr)) => Ok(addr),
            _ => Err(unknown_export(name, AwwasmExternKind::Func)),
        }
    }

    pub fn export_table(&self, name: &str) -> Result<AwwasmTableAddr, AwwasmRuntimeError> {
        match self.export(name) {
            Some(AwwasmExternAddr::Table(addr)) => Ok(addr),
            _ => Err(unknown_export(name, AwwasmExternKind::Table)),
        }
    }

    pub fn export_memory(&self, name: &str) -> Result<AwwasmMemAddr, AwwasmRuntimeError> {
        match self.export(name) {
            Some(AwwasmExternAddr::Mem(addr)) => Ok(addr),
            _ => Err(unknown_export(name, AwwasmExternKind::Memory)),
        }
    }

    pub fn export_global(&self, name: &str) -> Result<AwwasmGlobalAddr, AwwasmRuntimeError> {
        match self.export(name) {
            Some(AwwasmExternAddr::Global(addr)) => Ok(addr),
            _ => Err(unknown_export(name, AwwasmExternKind::Global)),
        }
    }

    /// Instances this one imports from.
    pub fn imports_from(&self) -> &[AwwasmModuleAddr] {
        &self.imports_from
    }

    pub(crate) fn add_import_source(&mut self, exporter: AwwasmModuleAddr) {
        if !self.imports_from.contains(&exporter) {
            self.imports_from.push(exporter);
        }
    }

    // ========================================================================
    // Owned entities (everything that was not imported)
    // ========================================================================

    pub(crate) fn owned_funcs(&self) -> &[AwwasmFuncAddr] {
        self.funcaddrs.get(self.imported.funcs..).unwrap_or_default()
    }

    pub(crate) fn owned_tables(&self) -> &[AwwasmTableAddr] {
        self.tableaddrs.get(self.imported.tables..).unwrap_or_default()
    }

    pub(crate) fn owned_mems(&self) -> &[AwwasmMemAddr] {
        self.memaddrs.get(self.imported.mems..).unwrap_or_default()
    }

    pub(crate) fn owned_globals(&self) -> &[AwwasmGlobalAddr] {
        self.globaladdrs.get(self.imported.globals..).unwrap_or_default()
    }
}

fn unknown_export(name: &str, kind: AwwasmExternKind) -> AwwasmRuntimeError {
    AwwasmRuntimeError::UnknownExport {
        name: name.to_string(),
        kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_entities_skip_imports() {
        let mut inst = AwwasmModuleInst::new(AwwasmModuleAddr(0));
        inst.memaddrs = vec![AwwasmMemAddr(7), AwwasmMemAddr(8), AwwasmMemAddr(9)];
        inst.imported.mems = 1;
        assert_eq!(inst.owned_mems(), &[AwwasmMemAddr(8), AwwasmMemAddr(9)]);
        assert!(inst.owned_funcs().is_empty());
    }

    #[test]
    fn test_partial_instance_tolerates_short_index_spaces() {
        // An instance torn down mid-import has fewer entries than its counts.
        let mut inst = AwwasmModuleInst::new(AwwasmModuleAddr(0));
        inst.imported.globals = 3;
        inst.globaladdrs = vec![AwwasmGlobalAddr(0)];
        assert!(inst.owned_globals().is_empty());
    }

    #[test]
    fn test_export_lookup_checks_kind() {
        let mut inst = AwwasmModuleInst::new(AwwasmModuleAddr(0));
        inst.exports.insert("memory".into(), AwwasmExternAddr::Mem(AwwasmMemAddr(2)));

        assert_eq!(inst.export_memory("memory").unwrap(), AwwasmMemAddr(2));
        assert_eq!(
            inst.export_func("memory").unwrap_err(),
            AwwasmRuntimeError::UnknownExport {
                name: "memory".into(),
                kind: AwwasmExternKind::Func,
            }
        );
        assert!(inst.export_global("missing").is_err());
    }

    #[test]
    fn test_import_sources_are_deduplicated() {
        let mut inst = AwwasmModuleInst::new(AwwasmModuleAddr(3));
        inst.add_import_source(AwwasmModuleAddr(1));
        inst.add_import_source(AwwasmModuleAddr(1));
        inst.add_import_source(AwwasmModuleAddr(2));
        assert_eq!(inst.imports_from(), &[AwwasmModuleAddr(1), AwwasmModuleAddr(2)]);
    }
}
