//! Validated module descriptor.
//!
//! This is the shape in which a decoded and validated module is handed to
//! the instantiator. Decoding and validation happen elsewhere; the
//! instantiator still refuses descriptors whose indices point at
//! nothing instead of trusting them blindly.

use std::sync::Arc;

use crate::const_expr::AwwasmConstExpr;
use crate::func::AwwasmFuncType;
use crate::global::AwwasmGlobalType;
use crate::memory::AwwasmMemoryType;
use crate::table::AwwasmTableType;
use crate::values::{AwwasmExternKind, AwwasmRefType};

/// What an import expects to receive.
#[derive(Debug, Clone, PartialEq)]
pub enum AwwasmImportDesc {
    /// A function with the signature at this type index.
    Func(u32),
    Table(AwwasmTableType),
    Memory(AwwasmMemoryType),
    Global(AwwasmGlobalType),
}

impl AwwasmImportDesc {
    pub fn kind(&self) -> AwwasmExternKind {
        match self {
            AwwasmImportDesc::Func(_) => AwwasmExternKind::Func,
            AwwasmImportDesc::Table(_) => AwwasmExternKind::Table,
            AwwasmImportDesc::Memory(_) => AwwasmExternKind::Memory,
            AwwasmImportDesc::Global(_) => AwwasmExternKind::Global,
        }
    }
}

/// An import, keyed by (module, name).
#[derive(Debug, Clone, PartialEq)]
pub struct AwwasmImport {
    pub module: String,
    pub name: String,
    pub desc: AwwasmImportDesc,
}

/// A function defined by the module.
#[derive(Debug, Clone, PartialEq)]
pub struct AwwasmFuncDecl {
    pub type_idx: u32,
    pub body: Arc<[u8]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AwwasmGlobalDecl {
    pub ty: AwwasmGlobalType,
    pub init: AwwasmConstExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AwwasmExport {
    pub name: String,
    pub kind: AwwasmExternKind,
    /// Index into the module's index space of `kind` (imports first).
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AwwasmElemMode {
    /// Available to `table.init` only.
    Passive,
    /// Written into `table` at instantiation.
    Active { table: u32, offset: AwwasmConstExpr },
    /// Only forward-declares function references.
    Declarative,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AwwasmElemItems {
    /// Plain function indices.
    Funcs(Vec<u32>),
    /// Constant expressions producing references.
    Exprs(Vec<AwwasmConstExpr>),
}

impl AwwasmElemItems {
    pub fn len(&self) -> usize {
        match self {
            AwwasmElemItems::Funcs(funcs) => funcs.len(),
            AwwasmElemItems::Exprs(exprs) => exprs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AwwasmElemSegment {
    pub elem_type: AwwasmRefType,
    pub items: AwwasmElemItems,
    pub mode: AwwasmElemMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AwwasmDataMode {
    Passive,
    Active { memory: u32, offset: AwwasmConstExpr },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AwwasmDataSegment {
    pub bytes: Arc<[u8]>,
    pub mode: AwwasmDataMode,
}

/// A validated module, ready for instantiation.
///
/// Index spaces follow the WebAssembly convention: imported entities come
/// first, in import order, followed by the module's own definitions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AwwasmModule {
    pub types: Vec<AwwasmFuncType>,
    pub imports: Vec<AwwasmImport>,
    pub funcs: Vec<AwwasmFuncDecl>,
    pub tables: Vec<AwwasmTableType>,
    pub memories: Vec<AwwasmMemoryType>,
    pub globals: Vec<AwwasmGlobalDecl>,
    pub exports: Vec<AwwasmExport>,
    pub elems: Vec<AwwasmElemSegment>,
    pub datas: Vec<AwwasmDataSegment>,
    pub start: Option<u32>,
}

impl AwwasmModule {
    /// Create an empty module.
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Builder methods - each returns the index of the added entity
    // ========================================================================

    pub fn add_type(&mut self, ty: AwwasmFuncType) -> u32 {
        self.types.push(ty);
        self.types.len() as u32 - 1
    }

    /// Add an import. Returns the index within the import's kind.
    pub fn add_import(&mut self, module: &str, name: &str, desc: AwwasmImportDesc) -> u32 {
        let kind = desc.kind();
        self.imports.push(AwwasmImport {
            module: module.to_string(),
            name: name.to_string(),
            desc,
        });
        self.imported_count(kind) - 1
    }

    /// Add a function definition. Returns its function index.
    pub fn add_func(&mut self, type_idx: u32, body: &[u8]) -> u32 {
        self.funcs.push(AwwasmFuncDecl {
            type_idx,
            body: Arc::from(body),
        });
        self.total_count(AwwasmExternKind::Func) - 1
    }

    pub fn add_table(&mut self, ty: AwwasmTableType) -> u32 {
        self.tables.push(ty);
        self.total_count(AwwasmExternKind::Table) - 1
    }

    pub fn add_memory(&mut self, ty: AwwasmMemoryType) -> u32 {
        self.memories.push(ty);
        self.total_count(AwwasmExternKind::Memory) - 1
    }

    pub fn add_global(&mut self, ty: AwwasmGlobalType, init: AwwasmConstExpr) -> u32 {
        self.globals.push(AwwasmGlobalDecl { ty, init });
        self.total_count(AwwasmExternKind::Global) - 1
    }

    pub fn add_export(&mut self, name: &str, kind: AwwasmExternKind, index: u32) {
        self.exports.push(AwwasmExport {
            name: name.to_string(),
            kind,
            index,
        });
    }

    pub fn add_elem(&mut self, elem_type: AwwasmRefType, items: AwwasmElemItems, mode: AwwasmElemMode) -> u32 {
        self.elems.push(AwwasmElemSegment { elem_type, items, mode });
        self.elems.len() as u32 - 1
    }

    pub fn add_data(&mut self, bytes: &[u8], mode: AwwasmDataMode) -> u32 {
        self.datas.push(AwwasmDataSegment {
            bytes: Arc::from(bytes),
            mode,
        });
        self.datas.len() as u32 - 1
    }

    pub fn set_start(&mut self, func_idx: u32) {
        self.start = Some(func_idx);
    }

    // ========================================================================
    // Index-space helpers
    // ========================================================================

    /// Number of imports of the given kind.
    pub fn imported_count(&self, kind: AwwasmExternKind) -> u32 {
        self.imports.iter().filter(|i| i.desc.kind() == kind).count() as u32
    }

    /// Size of the index space of the given kind (imports + definitions).
    pub fn total_count(&self, kind: AwwasmExternKind) -> u32 {
        let defined = match kind {
            AwwasmExternKind::Func => self.funcs.len(),
            AwwasmExternKind::Table => self.tables.len(),
            AwwasmExternKind::Memory => self.memories.len(),
            AwwasmExternKind::Global => self.globals.len(),
        };
        self.imported_count(kind) + defined as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::AwwasmValueType;

    #[test]
    fn test_index_spaces_put_imports_first() {
        let mut module = AwwasmModule::new();
        let ty = module.add_type(AwwasmFuncType::new(vec![], vec![]));
        assert_eq!(module.add_import("env", "f", AwwasmImportDesc::Func(ty)), 0);
        assert_eq!(module.add_import("env", "g", AwwasmImportDesc::Func(ty)), 1);
        assert_eq!(
            module.add_import("env", "mem", AwwasmImportDesc::Memory(AwwasmMemoryType::new(1, None))),
            0
        );

        assert_eq!(module.add_func(ty, &[0x0b]), 2);
        assert_eq!(module.add_memory(AwwasmMemoryType::new(1, None)), 1);
        assert_eq!(
            module.add_global(
                AwwasmGlobalType::immutable(AwwasmValueType::I32),
                AwwasmConstExpr::i32(0)
            ),
            0
        );

        assert_eq!(module.imported_count(AwwasmExternKind::Func), 2);
        assert_eq!(module.total_count(AwwasmExternKind::Func), 3);
        assert_eq!(module.total_count(AwwasmExternKind::Memory), 2);
        assert_eq!(module.total_count(AwwasmExternKind::Table), 0);
    }

    #[test]
    fn test_elem_items_len() {
        assert_eq!(AwwasmElemItems::Funcs(vec![0, 1]).len(), 2);
        assert!(AwwasmElemItems::Exprs(vec![]).is_empty());
    }
}
