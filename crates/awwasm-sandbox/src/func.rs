//! Function, element and data instances.
//!
//! A function instance is either a closure over a module instance and an
//! opaque code body (executed by an [`AwwasmEngine`](crate::engine::AwwasmEngine)),
//! or a host function supplied by the embedder.

use core::fmt;
use std::sync::Arc;

use crate::engine::AwwasmCaller;
use crate::error::AwwasmTrap;
use crate::values::{AwwasmModuleAddr, AwwasmRef, AwwasmRefType, AwwasmValue, AwwasmValueType};

/// Function type signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AwwasmFuncType {
    /// Parameter types.
    pub params: Vec<AwwasmValueType>,
    /// Result types.
    pub results: Vec<AwwasmValueType>,
}

impl AwwasmFuncType {
    /// Create a new function type.
    pub fn new(params: Vec<AwwasmValueType>, results: Vec<AwwasmValueType>) -> Self {
        Self { params, results }
    }
}

impl fmt::Display for AwwasmFuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |types: &[AwwasmValueType]| {
            types.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(" ")
        };
        write!(f, "func [{}] -> [{}]", join(&self.params), join(&self.results))
    }
}

/// Signature of host function callbacks.
pub type AwwasmHostFn =
    dyn Fn(&mut AwwasmCaller<'_>, &[AwwasmValue]) -> Result<Vec<AwwasmValue>, AwwasmTrap> + Send + Sync;

/// Function instance - runtime representation of a function.
#[derive(Debug, Clone)]
pub enum AwwasmFuncInst {
    /// WebAssembly function defined in a module.
    Wasm(AwwasmWasmFuncInst),
    /// Host function provided by the embedder.
    Host(AwwasmHostFuncInst),
}

/// WebAssembly function instance.
#[derive(Debug, Clone)]
pub struct AwwasmWasmFuncInst {
    /// The function signature, copied out of the module's type space.
    pub ty: AwwasmFuncType,
    /// Reference to the owning module instance.
    pub module: AwwasmModuleAddr,
    /// Index of the definition among the module's own functions.
    pub def_index: u32,
    /// Raw body bytes (locals + instruction sequence), decoded lazily by
    /// the engine.
    pub code: Arc<[u8]>,
}

/// Host function instance.
#[derive(Clone)]
pub struct AwwasmHostFuncInst {
    /// The function signature.
    pub ty: AwwasmFuncType,
    /// The embedder's callback.
    pub func: Arc<AwwasmHostFn>,
}

impl fmt::Debug for AwwasmHostFuncInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwwasmHostFuncInst").field("ty", &self.ty).finish_non_exhaustive()
    }
}

impl AwwasmFuncInst {
    /// Create a new WebAssembly function instance.
    pub fn wasm(ty: AwwasmFuncType, module: AwwasmModuleAddr, def_index: u32, code: Arc<[u8]>) -> Self {
        AwwasmFuncInst::Wasm(AwwasmWasmFuncInst {
            ty,
            module,
            def_index,
            code,
        })
    }

    /// Create a new host function instance.
    pub fn host<F>(ty: AwwasmFuncType, func: F) -> Self
    where
        F: Fn(&mut AwwasmCaller<'_>, &[AwwasmValue]) -> Result<Vec<AwwasmValue>, AwwasmTrap> + Send + Sync + 'static,
    {
        AwwasmFuncInst::Host(AwwasmHostFuncInst {
            ty,
            func: Arc::new(func),
        })
    }

    /// Get the signature of this function.
    pub fn func_type(&self) -> &AwwasmFuncType {
        match self {
            AwwasmFuncInst::Wasm(f) => &f.ty,
            AwwasmFuncInst::Host(f) => &f.ty,
        }
    }

    /// Check if this is a WebAssembly function.
    pub fn is_wasm(&self) -> bool {
        matches!(self, AwwasmFuncInst::Wasm(_))
    }

    /// Check if this is a host function.
    pub fn is_host(&self) -> bool {
        matches!(self, AwwasmFuncInst::Host(_))
    }
}

/// Element instance - runtime representation of an element segment.
#[derive(Debug, Clone)]
pub struct AwwasmElemInst {
    /// The element type.
    pub type_: AwwasmRefType,
    /// The reference values.
    pub elem: Vec<AwwasmRef>,
    /// Whether this segment has been dropped.
    pub dropped: bool,
}

impl AwwasmElemInst {
    /// Create a new element instance.
    pub fn new(type_: AwwasmRefType, elem: Vec<AwwasmRef>) -> Self {
        Self {
            type_,
            elem,
            dropped: false,
        }
    }

    /// Drop this element segment (elem.drop instruction).
    pub fn drop_elem(&mut self) {
        self.elem = Vec::new();
        self.dropped = true;
    }

    /// The references this segment still holds; empty once dropped.
    pub fn refs(&self) -> &[AwwasmRef] {
        &self.elem
    }
}

/// Data instance - runtime representation of a data segment.
#[derive(Debug, Clone)]
pub struct AwwasmDataInst {
    /// The data bytes, shared with the module descriptor.
    pub data: Arc<[u8]>,
    /// Whether this segment has been dropped.
    pub dropped: bool,
}

impl AwwasmDataInst {
    /// Create a new data instance.
    pub fn new(data: Arc<[u8]>) -> Self {
        Self {
            data,
            dropped: false,
        }
    }

    /// Drop this data segment (data.drop instruction).
    ///
    /// The module descriptor may still hold the bytes, so this only
    /// releases our share and marks the segment dropped.
    pub fn drop_data(&mut self) {
        self.data = Arc::from(&[][..]);
        self.dropped = true;
    }

    /// Get the data bytes; a dropped segment reads as empty, which makes
    /// any non-empty `memory.init` from it trap.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_kinds() {
        let ty = AwwasmFuncType::new(vec![AwwasmValueType::I32], vec![AwwasmValueType::I64]);
        let code: Arc<[u8]> = Arc::from(&[0x00, 0x0b][..]);
        let func = AwwasmFuncInst::wasm(ty.clone(), AwwasmModuleAddr(0), 0, code);
        assert!(func.is_wasm());
        assert_eq!(func.func_type(), &ty);

        let host = AwwasmFuncInst::host(ty.clone(), |_, args| Ok(vec![AwwasmValue::I64(args.len() as i64)]));
        assert!(host.is_host());
        assert!(format!("{:?}", host).contains("AwwasmHostFuncInst"));
    }

    #[test]
    fn test_func_type_display() {
        let ty = AwwasmFuncType::new(vec![AwwasmValueType::I32, AwwasmValueType::F64], vec![]);
        assert_eq!(ty.to_string(), "func [i32 f64] -> []");
    }

    #[test]
    fn test_data_instance() {
        let mut data = AwwasmDataInst::new(Arc::from(&b"Hello, WebAssembly!"[..]));

        assert_eq!(data.bytes(), b"Hello, WebAssembly!");
        assert!(!data.dropped);

        data.drop_data();
        assert!(data.dropped);
        assert!(data.bytes().is_empty());
    }

    #[test]
    fn test_elem_instance_drop() {
        let mut elem = AwwasmElemInst::new(AwwasmRefType::FuncRef, vec![AwwasmRef::NULL_FUNC; 3]);
        assert_eq!(elem.refs().len(), 3);
        elem.drop_elem();
        assert!(elem.dropped);
        assert!(elem.refs().is_empty());
    }
}
