//! Global instance implementation.
//!
//! A global instance is the runtime representation of a global variable.

use core::fmt;

use crate::error::AwwasmRuntimeError;
use crate::values::{AwwasmFuncAddr, AwwasmRef, AwwasmValue, AwwasmValueType};

/// Global type - describes the mutability and value type of a global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwwasmGlobalType {
    /// Whether the global is mutable.
    pub mutable: bool,
    /// The value type of the global.
    pub value_type: AwwasmValueType,
}

impl AwwasmGlobalType {
    /// Create a new immutable global type.
    pub fn immutable(value_type: AwwasmValueType) -> Self {
        Self {
            mutable: false,
            value_type,
        }
    }

    /// Create a new mutable global type.
    pub fn mutable(value_type: AwwasmValueType) -> Self {
        Self {
            mutable: true,
            value_type,
        }
    }
}

impl fmt::Display for AwwasmGlobalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mutable {
            write!(f, "global (mut {})", self.value_type)
        } else {
            write!(f, "global {}", self.value_type)
        }
    }
}

/// Global instance - runtime representation of a global variable.
///
/// The value is only reachable through [`get`](Self::get) and
/// [`set`](Self::set), so an immutable global keeps its initial value
/// for its whole lifetime. The one exception is a function reference whose
/// callee the store recycles; it then reads as null.
#[derive(Debug, Clone)]
pub struct AwwasmGlobalInst {
    type_: AwwasmGlobalType,
    value: AwwasmValue,
}

impl AwwasmGlobalInst {
    /// Create a new global instance.
    ///
    /// Fails if `value` does not have the declared value type.
    pub fn new(type_: AwwasmGlobalType, value: AwwasmValue) -> Result<Self, AwwasmRuntimeError> {
        check_type(type_.value_type, &value)?;
        Ok(Self { type_, value })
    }

    #[inline]
    pub fn global_type(&self) -> AwwasmGlobalType {
        self.type_
    }

    /// Get the current value.
    #[inline]
    pub fn get(&self) -> AwwasmValue {
        self.value
    }

    /// Set the value (only if mutable and of the declared type).
    #[inline]
    pub fn set(&mut self, value: AwwasmValue) -> Result<(), AwwasmRuntimeError> {
        if !self.type_.mutable {
            return Err(AwwasmRuntimeError::ImmutableGlobal);
        }
        check_type(self.type_.value_type, &value)?;
        self.value = value;
        Ok(())
    }

    /// Check if this global is mutable.
    #[inline]
    pub fn is_mutable(&self) -> bool {
        self.type_.mutable
    }

    /// Whether the global holds a reference to a function `is_dead` selects.
    pub(crate) fn holds_func(&self, is_dead: impl Fn(AwwasmFuncAddr) -> bool) -> bool {
        self.value
            .as_reference()
            .and_then(|r| r.func_addr())
            .is_some_and(is_dead)
    }

    /// Null out a reference to a function that is going away. Bypasses
    /// mutability: the store is reclaiming the callee, not code writing.
    pub(crate) fn clear_func_ref(&mut self, is_dead: impl Fn(AwwasmFuncAddr) -> bool) -> bool {
        if !self.holds_func(is_dead) {
            return false;
        }
        self.value = AwwasmValue::Ref(AwwasmRef::NULL_FUNC);
        true
    }
}

fn check_type(expected: AwwasmValueType, value: &AwwasmValue) -> Result<(), AwwasmRuntimeError> {
    let got = value.value_type();
    if got != expected {
        return Err(AwwasmRuntimeError::TypeMismatch { expected, got });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutable_global() {
        let mut global = AwwasmGlobalInst::new(
            AwwasmGlobalType::mutable(AwwasmValueType::I32),
            AwwasmValue::I32(100),
        )
        .unwrap();
        assert_eq!(global.get(), AwwasmValue::I32(100));

        global.set(AwwasmValue::I32(200)).unwrap();
        assert_eq!(global.get(), AwwasmValue::I32(200));

        assert_eq!(
            global.set(AwwasmValue::I64(1)).unwrap_err(),
            AwwasmRuntimeError::TypeMismatch {
                expected: AwwasmValueType::I32,
                got: AwwasmValueType::I64,
            }
        );
    }

    #[test]
    fn test_immutable_global() {
        let mut global = AwwasmGlobalInst::new(
            AwwasmGlobalType::immutable(AwwasmValueType::I64),
            AwwasmValue::I64(42),
        )
        .unwrap();

        assert!(!global.is_mutable());
        assert_eq!(global.set(AwwasmValue::I64(0)).unwrap_err(), AwwasmRuntimeError::ImmutableGlobal);
        assert_eq!(global.get(), AwwasmValue::I64(42));
    }

    #[test]
    fn test_initial_value_type_checked() {
        assert!(AwwasmGlobalInst::new(
            AwwasmGlobalType::immutable(AwwasmValueType::F32),
            AwwasmValue::I32(0),
        )
        .is_err());
    }

    #[test]
    fn test_global_type_display() {
        assert_eq!(AwwasmGlobalType::mutable(AwwasmValueType::I64).to_string(), "global (mut i64)");
        assert_eq!(AwwasmGlobalType::immutable(AwwasmValueType::FuncRef).to_string(), "global funcref");
    }

    #[test]
    fn test_clear_func_ref_ignores_live_callees() {
        let held = AwwasmValue::Ref(AwwasmRef::Func(AwwasmFuncAddr(3)));
        let mut global = AwwasmGlobalInst::new(AwwasmGlobalType::immutable(AwwasmValueType::FuncRef), held).unwrap();

        assert!(!global.clear_func_ref(|addr| addr == AwwasmFuncAddr(4)));
        assert_eq!(global.get(), held);
        assert!(global.clear_func_ref(|addr| addr == AwwasmFuncAddr(3)));
        assert_eq!(global.get(), AwwasmValue::Ref(AwwasmRef::NULL_FUNC));
    }
}
