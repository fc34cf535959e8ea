//! Import resolution and external type matching.

use core::fmt;

use crate::error::{AwwasmInstantiationError, AwwasmMismatch, AwwasmMismatchCategory};
use crate::func::AwwasmFuncType;
use crate::global::AwwasmGlobalType;
use crate::memory::AwwasmMemoryType;
use crate::store::AwwasmStore;
use crate::table::AwwasmTableType;
use crate::values::{AwwasmExternAddr, AwwasmExternKind, AwwasmModuleAddr};

/// The full type of an external item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwwasmExternType {
    Func(AwwasmFuncType),
    Table(AwwasmTableType),
    Memory(AwwasmMemoryType),
    Global(AwwasmGlobalType),
}

impl AwwasmExternType {
    pub fn kind(&self) -> AwwasmExternKind {
        match self {
            AwwasmExternType::Func(_) => AwwasmExternKind::Func,
            AwwasmExternType::Table(_) => AwwasmExternKind::Table,
            AwwasmExternType::Memory(_) => AwwasmExternKind::Memory,
            AwwasmExternType::Global(_) => AwwasmExternKind::Global,
        }
    }
}

impl fmt::Display for AwwasmExternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AwwasmExternType::Func(ty) => ty.fmt(f),
            AwwasmExternType::Table(ty) => ty.fmt(f),
            AwwasmExternType::Memory(ty) => ty.fmt(f),
            AwwasmExternType::Global(ty) => ty.fmt(f),
        }
    }
}

/// A successfully resolved import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwwasmResolvedImport {
    /// The instance that exports (and owns) the item.
    pub exporter: AwwasmModuleAddr,
    pub addr: AwwasmExternAddr,
}

/// Looks imports up among the named instances of a store.
///
/// Host bindings are visible here once they have been defined in the store
/// with [`AwwasmStore::define_imports`].
pub struct AwwasmImportResolver<'s> {
    store: &'s AwwasmStore,
}

impl<'s> AwwasmImportResolver<'s> {
    pub fn new(store: &'s AwwasmStore) -> Self {
        Self { store }
    }

    /// Resolve `module.name` and check it against `expected`.
    pub fn resolve(
        &self,
        module: &str,
        name: &str,
        expected: &AwwasmExternType,
    ) -> Result<AwwasmResolvedImport, AwwasmInstantiationError> {
        let unknown = || AwwasmInstantiationError::UnknownImport {
            module: module.to_string(),
            name: name.to_string(),
            kind: expected.kind(),
        };

        let exporter = self.store.find_module_addr(module).ok_or_else(unknown)?;
        let addr = self
            .store
            .module(exporter)
            .ok()
            .and_then(|inst| inst.export(name))
            .ok_or_else(unknown)?;

        // A live instance only exports live items.
        let actual = self
            .store
            .extern_type(addr)
            .map_err(|err| AwwasmInstantiationError::InvalidModule(err.to_string()))?;

        match_extern_type(expected, &actual).map_err(|mismatch| AwwasmInstantiationError::IncompatibleImportType {
            module: module.to_string(),
            name: name.to_string(),
            mismatch,
        })?;

        Ok(AwwasmResolvedImport { exporter, addr })
    }
}

/// Check that `actual` can be used where `expected` is required.
pub fn match_extern_type(expected: &AwwasmExternType, actual: &AwwasmExternType) -> Result<(), AwwasmMismatch> {
    match (expected, actual) {
        (AwwasmExternType::Func(exp), AwwasmExternType::Func(act)) => {
            if exp != act {
                return Err(AwwasmMismatch::new(AwwasmMismatchCategory::FunctionType, exp, act));
            }
        }
        (AwwasmExternType::Table(exp), AwwasmExternType::Table(act)) => {
            if exp.elem_type != act.elem_type || !limits_match(exp.min, exp.max, act.min, act.max) {
                return Err(AwwasmMismatch::new(AwwasmMismatchCategory::Table, exp, act));
            }
        }
        (AwwasmExternType::Memory(exp), AwwasmExternType::Memory(act)) => {
            if !limits_match(exp.min, exp.max, act.min, act.max) {
                return Err(AwwasmMismatch::new(AwwasmMismatchCategory::Memory, exp, act));
            }
        }
        (AwwasmExternType::Global(exp), AwwasmExternType::Global(act)) => {
            if exp != act {
                return Err(AwwasmMismatch::new(AwwasmMismatchCategory::Global, exp, act));
            }
        }
        _ => {
            return Err(AwwasmMismatch::new(
                AwwasmMismatchCategory::ExternalType,
                expected.kind(),
                actual.kind(),
            ))
        }
    }
    Ok(())
}

/// Limits subtyping: the provided minimum must cover the required one, and
/// a required maximum must be matched by an equal or smaller provided one.
pub fn limits_match(req_min: u32, req_max: Option<u32>, act_min: u32, act_max: Option<u32>) -> bool {
    if act_min < req_min {
        return false;
    }
    match (req_max, act_max) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(req), Some(act)) => act <= req,
    }
}
