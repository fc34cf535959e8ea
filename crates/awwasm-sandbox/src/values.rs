//! WebAssembly runtime values, references and addresses.
//!
//! This module defines the core value types and type-safe addresses
//! used throughout the sandbox.

use core::fmt;

/// Runtime values that can appear on the stack, in globals, or as
/// host-function arguments.
///
/// Per the WebAssembly spec, values are either numbers, vectors or references.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AwwasmValue {
    /// 32-bit integer
    I32(i32),
    /// 64-bit integer
    I64(i64),
    /// 32-bit IEEE 754 floating point
    F32(f32),
    /// 64-bit IEEE 754 floating point
    F64(f64),
    /// 128-bit SIMD vector
    V128(u128),
    /// Function or external reference
    Ref(AwwasmRef),
}

impl AwwasmValue {
    /// Get the default value for a given value type.
    ///
    /// Reference types default to their typed null.
    pub fn default_for_type(value_type: AwwasmValueType) -> Self {
        match value_type {
            AwwasmValueType::I32 => AwwasmValue::I32(0),
            AwwasmValueType::I64 => AwwasmValue::I64(0),
            AwwasmValueType::F32 => AwwasmValue::F32(0.0),
            AwwasmValueType::F64 => AwwasmValue::F64(0.0),
            AwwasmValueType::V128 => AwwasmValue::V128(0),
            AwwasmValueType::FuncRef => AwwasmValue::Ref(AwwasmRef::Null(AwwasmRefType::FuncRef)),
            AwwasmValueType::ExternRef => AwwasmValue::Ref(AwwasmRef::Null(AwwasmRefType::ExternRef)),
        }
    }

    /// Get the type of this value.
    pub fn value_type(&self) -> AwwasmValueType {
        match self {
            AwwasmValue::I32(_) => AwwasmValueType::I32,
            AwwasmValue::I64(_) => AwwasmValueType::I64,
            AwwasmValue::F32(_) => AwwasmValueType::F32,
            AwwasmValue::F64(_) => AwwasmValueType::F64,
            AwwasmValue::V128(_) => AwwasmValueType::V128,
            AwwasmValue::Ref(r) => r.ref_type().into(),
        }
    }

    /// Try to get an i32 value.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            AwwasmValue::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get an i64 value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AwwasmValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get an f32 value.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            AwwasmValue::F32(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get an f64 value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AwwasmValue::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get a reference value.
    pub fn as_reference(&self) -> Option<AwwasmRef> {
        match self {
            AwwasmValue::Ref(r) => Some(*r),
            _ => None,
        }
    }
}

impl From<AwwasmRef> for AwwasmValue {
    fn from(r: AwwasmRef) -> Self {
        AwwasmValue::Ref(r)
    }
}

/// Value types in WebAssembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AwwasmValueType {
    I32,
    I64,
    F32,
    F64,
    V128,
    FuncRef,
    ExternRef,
}

impl fmt::Display for AwwasmValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AwwasmValueType::I32 => "i32",
            AwwasmValueType::I64 => "i64",
            AwwasmValueType::F32 => "f32",
            AwwasmValueType::F64 => "f64",
            AwwasmValueType::V128 => "v128",
            AwwasmValueType::FuncRef => "funcref",
            AwwasmValueType::ExternRef => "externref",
        };
        f.write_str(name)
    }
}

/// Reference types - the element types a table may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AwwasmRefType {
    /// Function reference.
    FuncRef,
    /// External (host) reference.
    ExternRef,
}

impl From<AwwasmRefType> for AwwasmValueType {
    fn from(ty: AwwasmRefType) -> Self {
        match ty {
            AwwasmRefType::FuncRef => AwwasmValueType::FuncRef,
            AwwasmRefType::ExternRef => AwwasmValueType::ExternRef,
        }
    }
}

impl fmt::Display for AwwasmRefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        AwwasmValueType::from(*self).fmt(f)
    }
}

/// Handle to a host object kept in the store's extern side table.
///
/// Handles never carry host pointers into the sandbox; a handle whose
/// object was removed simply stops resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AwwasmExternHandle(pub u32);

/// A reference value as stored in tables, globals and on the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AwwasmRef {
    /// Typed null reference (`ref.null t`).
    Null(AwwasmRefType),
    /// Reference to a function instance in the Store.
    Func(AwwasmFuncAddr),
    /// Reference to a host object in the extern side table.
    Extern(AwwasmExternHandle),
}

impl AwwasmRef {
    /// Null function reference, the default fill for funcref tables.
    pub const NULL_FUNC: AwwasmRef = AwwasmRef::Null(AwwasmRefType::FuncRef);
    /// Null external reference.
    pub const NULL_EXTERN: AwwasmRef = AwwasmRef::Null(AwwasmRefType::ExternRef);

    /// The reference type this value inhabits.
    pub fn ref_type(&self) -> AwwasmRefType {
        match self {
            AwwasmRef::Null(ty) => *ty,
            AwwasmRef::Func(_) => AwwasmRefType::FuncRef,
            AwwasmRef::Extern(_) => AwwasmRefType::ExternRef,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, AwwasmRef::Null(_))
    }

    /// The referenced function, if this is a non-null function reference.
    pub fn func_addr(&self) -> Option<AwwasmFuncAddr> {
        match self {
            AwwasmRef::Func(addr) => Some(*addr),
            _ => None,
        }
    }
}

// ============================================================================
// Type-safe addresses into Store components
// Using newtypes prevents mixing up different address types
// ============================================================================

/// Address of a function instance in the Store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct AwwasmFuncAddr(pub u32);

/// Address of a table instance in the Store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct AwwasmTableAddr(pub u32);

/// Address of a memory instance in the Store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct AwwasmMemAddr(pub u32);

/// Address of a global instance in the Store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct AwwasmGlobalAddr(pub u32);

/// Address of an element instance in the Store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct AwwasmElemAddr(pub u32);

/// Address of a data instance in the Store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct AwwasmDataAddr(pub u32);

/// Address of a module instance in the Store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct AwwasmModuleAddr(pub u32);

impl fmt::Display for AwwasmModuleAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<module #{}>", self.0)
    }
}

/// External address - what can be imported/exported.
///
/// This represents the runtime address of an entity that can cross
/// module boundaries through imports and exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AwwasmExternAddr {
    /// Function reference
    Func(AwwasmFuncAddr),
    /// Table reference
    Table(AwwasmTableAddr),
    /// Memory reference
    Mem(AwwasmMemAddr),
    /// Global reference
    Global(AwwasmGlobalAddr),
}

impl AwwasmExternAddr {
    /// The external kind of the addressed entity.
    pub fn kind(&self) -> AwwasmExternKind {
        match self {
            AwwasmExternAddr::Func(_) => AwwasmExternKind::Func,
            AwwasmExternAddr::Table(_) => AwwasmExternKind::Table,
            AwwasmExternAddr::Mem(_) => AwwasmExternKind::Memory,
            AwwasmExternAddr::Global(_) => AwwasmExternKind::Global,
        }
    }
}

impl From<AwwasmFuncAddr> for AwwasmExternAddr {
    fn from(addr: AwwasmFuncAddr) -> Self {
        AwwasmExternAddr::Func(addr)
    }
}

impl From<AwwasmTableAddr> for AwwasmExternAddr {
    fn from(addr: AwwasmTableAddr) -> Self {
        AwwasmExternAddr::Table(addr)
    }
}

impl From<AwwasmMemAddr> for AwwasmExternAddr {
    fn from(addr: AwwasmMemAddr) -> Self {
        AwwasmExternAddr::Mem(addr)
    }
}

impl From<AwwasmGlobalAddr> for AwwasmExternAddr {
    fn from(addr: AwwasmGlobalAddr) -> Self {
        AwwasmExternAddr::Global(addr)
    }
}

/// The four kinds of importable/exportable entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AwwasmExternKind {
    Func,
    Table,
    Memory,
    Global,
}

impl fmt::Display for AwwasmExternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AwwasmExternKind::Func => "function",
            AwwasmExternKind::Table => "table",
            AwwasmExternKind::Memory => "memory",
            AwwasmExternKind::Global => "global",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_types() {
        assert_eq!(AwwasmValue::I32(42).value_type(), AwwasmValueType::I32);
        assert_eq!(AwwasmValue::I64(100).value_type(), AwwasmValueType::I64);
        assert_eq!(AwwasmValue::F32(1.5).value_type(), AwwasmValueType::F32);
        assert_eq!(AwwasmValue::F64(2.5).value_type(), AwwasmValueType::F64);

        assert_eq!(AwwasmValue::I32(42).as_i32(), Some(42));
        assert_eq!(AwwasmValue::I32(42).as_i64(), None);

        assert_eq!(AwwasmValue::default_for_type(AwwasmValueType::I32), AwwasmValue::I32(0));
        assert_eq!(AwwasmValue::default_for_type(AwwasmValueType::F64), AwwasmValue::F64(0.0));
    }

    #[test]
    fn test_reference_values() {
        let null = AwwasmValue::default_for_type(AwwasmValueType::ExternRef);
        assert_eq!(null, AwwasmValue::Ref(AwwasmRef::NULL_EXTERN));
        assert_eq!(null.value_type(), AwwasmValueType::ExternRef);

        let func = AwwasmRef::Func(AwwasmFuncAddr(7));
        assert!(!func.is_null());
        assert_eq!(func.ref_type(), AwwasmRefType::FuncRef);
        assert_eq!(func.func_addr(), Some(AwwasmFuncAddr(7)));
        assert_eq!(AwwasmValue::from(func).value_type(), AwwasmValueType::FuncRef);

        let ext = AwwasmRef::Extern(AwwasmExternHandle(3));
        assert_eq!(ext.ref_type(), AwwasmRefType::ExternRef);
        assert_eq!(ext.func_addr(), None);
    }

    #[test]
    fn test_extern_addr_kind() {
        assert_eq!(AwwasmExternAddr::from(AwwasmMemAddr(0)).kind(), AwwasmExternKind::Memory);
        assert_eq!(AwwasmExternAddr::from(AwwasmFuncAddr(0)).kind(), AwwasmExternKind::Func);
        assert_eq!(AwwasmExternKind::Global.to_string(), "global");
    }
}
