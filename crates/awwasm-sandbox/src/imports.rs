//! Host-provided imports.
//!
//! The embedder collects functions, memories, tables and globals in an
//! [`AwwasmImports`] and hands it to
//! [`AwwasmStore::define_imports`](crate::store::AwwasmStore::define_imports).
//! Every distinct module name becomes a host module instance in the store,
//! so the resolver finds host items the same way it finds exports of
//! registered wasm instances.

use crate::engine::AwwasmCaller;
use crate::error::AwwasmTrap;
use crate::func::{AwwasmFuncInst, AwwasmFuncType};
use crate::global::AwwasmGlobalInst;
use crate::memory::AwwasmMemInst;
use crate::table::AwwasmTableInst;
use crate::values::{AwwasmExternKind, AwwasmValue};

/// Host-provided imports for module instantiation.
///
/// Imports are keyed by (module, name) pairs. Adding a second item under
/// the same key replaces the first.
#[derive(Debug, Default)]
pub struct AwwasmImports {
    entries: Vec<AwwasmImportEntry>,
}

/// A single import entry keyed by (module, name).
#[derive(Debug)]
pub struct AwwasmImportEntry {
    /// Module name (e.g. "env").
    pub module: String,
    /// Field name (e.g. "memory").
    pub name: String,
    /// The provided value.
    pub value: AwwasmImportValue,
}

/// The value provided for an import.
#[derive(Debug)]
pub enum AwwasmImportValue {
    Func(AwwasmFuncInst),
    Table(AwwasmTableInst),
    Memory(AwwasmMemInst),
    Global(AwwasmGlobalInst),
}

impl AwwasmImportValue {
    pub fn kind(&self) -> AwwasmExternKind {
        match self {
            AwwasmImportValue::Func(_) => AwwasmExternKind::Func,
            AwwasmImportValue::Table(_) => AwwasmExternKind::Table,
            AwwasmImportValue::Memory(_) => AwwasmExternKind::Memory,
            AwwasmImportValue::Global(_) => AwwasmExternKind::Global,
        }
    }
}

impl AwwasmImports {
    /// Create a new empty import set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a function import.
    pub fn add_func(&mut self, module: &str, name: &str, func: AwwasmFuncInst) -> &mut Self {
        self.insert(module, name, AwwasmImportValue::Func(func))
    }

    /// Add a host closure as a function import.
    pub fn add_host_func<F>(&mut self, module: &str, name: &str, ty: AwwasmFuncType, func: F) -> &mut Self
    where
        F: Fn(&mut AwwasmCaller<'_>, &[AwwasmValue]) -> Result<Vec<AwwasmValue>, AwwasmTrap> + Send + Sync + 'static,
    {
        self.add_func(module, name, AwwasmFuncInst::host(ty, func))
    }

    /// Add a table import.
    pub fn add_table(&mut self, module: &str, name: &str, table: AwwasmTableInst) -> &mut Self {
        self.insert(module, name, AwwasmImportValue::Table(table))
    }

    /// Add a memory import.
    pub fn add_memory(&mut self, module: &str, name: &str, mem: AwwasmMemInst) -> &mut Self {
        self.insert(module, name, AwwasmImportValue::Memory(mem))
    }

    /// Add a global import.
    pub fn add_global(&mut self, module: &str, name: &str, global: AwwasmGlobalInst) -> &mut Self {
        self.insert(module, name, AwwasmImportValue::Global(global))
    }

    /// Find an import by (module, name).
    pub fn find(&self, module: &str, name: &str) -> Option<&AwwasmImportEntry> {
        self.entries.iter().find(|e| e.module == module && e.name == name)
    }

    /// Remove and return an import by (module, name).
    pub fn take(&mut self, module: &str, name: &str) -> Option<AwwasmImportEntry> {
        let pos = self.entries.iter().position(|e| e.module == module && e.name == name)?;
        Some(self.entries.remove(pos))
    }

    /// Distinct module names, in order of first appearance.
    pub fn module_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for entry in &self.entries {
            if !names.contains(&entry.module.as_str()) {
                names.push(&entry.module);
            }
        }
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_entries(self) -> Vec<AwwasmImportEntry> {
        self.entries
    }

    fn insert(&mut self, module: &str, name: &str, value: AwwasmImportValue) -> &mut Self {
        self.entries.retain(|e| !(e.module == module && e.name == name));
        self.entries.push(AwwasmImportEntry {
            module: module.to_string(),
            name: name.to_string(),
            value,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::global::AwwasmGlobalType;
    use crate::memory::AwwasmMemoryType;
    use crate::values::AwwasmValueType;

    fn global(value: i32) -> AwwasmGlobalInst {
        AwwasmGlobalInst::new(AwwasmGlobalType::immutable(AwwasmValueType::I32), AwwasmValue::I32(value)).unwrap()
    }

    #[test]
    fn test_find_and_take() {
        let mut imports = AwwasmImports::new();
        imports
            .add_global("env", "g", global(1))
            .add_memory("env", "memory", AwwasmMemInst::new(AwwasmMemoryType::new(1, None), 16).unwrap());

        assert_eq!(imports.len(), 2);
        assert_eq!(imports.find("env", "memory").unwrap().value.kind(), AwwasmExternKind::Memory);
        assert!(imports.find("env", "missing").is_none());

        let taken = imports.take("env", "g").unwrap();
        assert_eq!(taken.value.kind(), AwwasmExternKind::Global);
        assert!(imports.find("env", "g").is_none());
    }

    #[test]
    fn test_same_key_replaces() {
        let mut imports = AwwasmImports::new();
        imports.add_global("env", "g", global(1));
        imports.add_global("env", "g", global(2));
        assert_eq!(imports.len(), 1);
        match &imports.find("env", "g").unwrap().value {
            AwwasmImportValue::Global(g) => assert_eq!(g.get(), AwwasmValue::I32(2)),
            other => panic!("unexpected import {:?}", other),
        }
    }

    #[test]
    fn test_module_names_in_first_appearance_order() {
        let mut imports = AwwasmImports::new();
        imports.add_global("wasi", "a", global(0));
        imports.add_global("env", "b", global(0));
        imports.add_global("wasi", "c", global(0));
        assert_eq!(imports.module_names(), vec!["wasi", "env"]);
    }
}
