//! Constant initializer expressions and their evaluation.
//!
//! Global initializers and segment offsets are small stack programs drawn
//! from the constant instruction subset (including the extended-const
//! integer arithmetic).

use crate::error::AwwasmTrap;
use crate::values::{AwwasmFuncAddr, AwwasmRef, AwwasmRefType, AwwasmValue, AwwasmValueType};

/// One instruction of a constant expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AwwasmConstInstr {
    I32Const(i32),
    I64Const(i64),
    F32Const(f32),
    F64Const(f64),
    V128Const(u128),
    RefNull(AwwasmRefType),
    RefFunc(u32),
    GlobalGet(u32),
    I32Add,
    I32Sub,
    I32Mul,
    I64Add,
    I64Sub,
    I64Mul,
}

/// A constant expression (without the terminating `end`).
#[derive(Debug, Clone, PartialEq)]
pub struct AwwasmConstExpr(pub Vec<AwwasmConstInstr>);

impl AwwasmConstExpr {
    pub fn new(instrs: Vec<AwwasmConstInstr>) -> Self {
        Self(instrs)
    }

    pub fn i32(value: i32) -> Self {
        Self(vec![AwwasmConstInstr::I32Const(value)])
    }

    pub fn i64(value: i64) -> Self {
        Self(vec![AwwasmConstInstr::I64Const(value)])
    }

    pub fn f32(value: f32) -> Self {
        Self(vec![AwwasmConstInstr::F32Const(value)])
    }

    pub fn f64(value: f64) -> Self {
        Self(vec![AwwasmConstInstr::F64Const(value)])
    }

    pub fn global_get(idx: u32) -> Self {
        Self(vec![AwwasmConstInstr::GlobalGet(idx)])
    }

    pub fn ref_func(idx: u32) -> Self {
        Self(vec![AwwasmConstInstr::RefFunc(idx)])
    }

    pub fn ref_null(ty: AwwasmRefType) -> Self {
        Self(vec![AwwasmConstInstr::RefNull(ty)])
    }

    /// Evaluate the expression.
    ///
    /// `globals` holds the values of the globals the expression may read,
    /// `funcs` the function addresses of the module's index space.
    pub fn eval(&self, globals: &[AwwasmValue], funcs: &[AwwasmFuncAddr]) -> Result<AwwasmValue, AwwasmTrap> {
        let mut stack: Vec<AwwasmValue> = Vec::with_capacity(2);

        for instr in &self.0 {
            let value = match *instr {
                AwwasmConstInstr::I32Const(v) => AwwasmValue::I32(v),
                AwwasmConstInstr::I64Const(v) => AwwasmValue::I64(v),
                AwwasmConstInstr::F32Const(v) => AwwasmValue::F32(v),
                AwwasmConstInstr::F64Const(v) => AwwasmValue::F64(v),
                AwwasmConstInstr::V128Const(v) => AwwasmValue::V128(v),
                AwwasmConstInstr::RefNull(ty) => AwwasmValue::Ref(AwwasmRef::Null(ty)),
                AwwasmConstInstr::RefFunc(idx) => {
                    let addr = funcs
                        .get(idx as usize)
                        .ok_or(AwwasmTrap::FuncIndexOutOfRange(idx))?;
                    AwwasmValue::Ref(AwwasmRef::Func(*addr))
                }
                AwwasmConstInstr::GlobalGet(idx) => *globals
                    .get(idx as usize)
                    .ok_or(AwwasmTrap::GlobalIndexOutOfRange(idx))?,
                AwwasmConstInstr::I32Add => binary_i32(&mut stack, i32::wrapping_add)?,
                AwwasmConstInstr::I32Sub => binary_i32(&mut stack, i32::wrapping_sub)?,
                AwwasmConstInstr::I32Mul => binary_i32(&mut stack, i32::wrapping_mul)?,
                AwwasmConstInstr::I64Add => binary_i64(&mut stack, i64::wrapping_add)?,
                AwwasmConstInstr::I64Sub => binary_i64(&mut stack, i64::wrapping_sub)?,
                AwwasmConstInstr::I64Mul => binary_i64(&mut stack, i64::wrapping_mul)?,
            };
            stack.push(value);
        }

        match stack.as_slice() {
            [value] => Ok(*value),
            other => Err(AwwasmTrap::ConstExprArity(other.len())),
        }
    }

    /// Evaluate an offset expression (i32 result, reinterpreted unsigned).
    pub fn eval_offset(&self, globals: &[AwwasmValue], funcs: &[AwwasmFuncAddr]) -> Result<u32, AwwasmTrap> {
        match self.eval(globals, funcs)? {
            AwwasmValue::I32(v) => Ok(v as u32),
            other => Err(AwwasmTrap::ConstExprTypeMismatch {
                expected: AwwasmValueType::I32,
                got: other.value_type(),
            }),
        }
    }

    /// Evaluate an element item (a reference result).
    pub fn eval_ref(&self, globals: &[AwwasmValue], funcs: &[AwwasmFuncAddr]) -> Result<AwwasmRef, AwwasmTrap> {
        let value = self.eval(globals, funcs)?;
        value.as_reference().ok_or(AwwasmTrap::ConstExprTypeMismatch {
            expected: AwwasmValueType::FuncRef,
            got: value.value_type(),
        })
    }
}

fn pop_i32(stack: &mut Vec<AwwasmValue>) -> Result<i32, AwwasmTrap> {
    match stack.pop() {
        Some(AwwasmValue::I32(v)) => Ok(v),
        Some(other) => Err(AwwasmTrap::ConstExprTypeMismatch {
            expected: AwwasmValueType::I32,
            got: other.value_type(),
        }),
        None => Err(AwwasmTrap::ConstExprArity(0)),
    }
}

fn pop_i64(stack: &mut Vec<AwwasmValue>) -> Result<i64, AwwasmTrap> {
    match stack.pop() {
        Some(AwwasmValue::I64(v)) => Ok(v),
        Some(other) => Err(AwwasmTrap::ConstExprTypeMismatch {
            expected: AwwasmValueType::I64,
            got: other.value_type(),
        }),
        None => Err(AwwasmTrap::ConstExprArity(0)),
    }
}

fn binary_i32(stack: &mut Vec<AwwasmValue>, op: fn(i32, i32) -> i32) -> Result<AwwasmValue, AwwasmTrap> {
    let rhs = pop_i32(stack)?;
    let lhs = pop_i32(stack)?;
    Ok(AwwasmValue::I32(op(lhs, rhs)))
}

fn binary_i64(stack: &mut Vec<AwwasmValue>, op: fn(i64, i64) -> i64) -> Result<AwwasmValue, AwwasmTrap> {
    let rhs = pop_i64(stack)?;
    let lhs = pop_i64(stack)?;
    Ok(AwwasmValue::I64(op(lhs, rhs)))
}
