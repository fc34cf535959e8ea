//! Table instance implementation.
//!
//! A table instance is the runtime representation of a table, holding
//! function references, external references or nulls. Range accesses go
//! through the same widened bounds gate as linear memory.

use core::fmt;
use core::ops::Range;

use tracing::debug;

use crate::error::{AwwasmAllocationError, AwwasmTrap};
use crate::values::{AwwasmFuncAddr, AwwasmRef, AwwasmRefType};

/// Table type - describes the limits and element type of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwwasmTableType {
    /// Minimum number of elements.
    pub min: u32,
    /// Maximum number of elements (if specified).
    pub max: Option<u32>,
    /// Element type.
    pub elem_type: AwwasmRefType,
}

impl AwwasmTableType {
    pub fn new(elem_type: AwwasmRefType, min: u32, max: Option<u32>) -> Self {
        Self { min, max, elem_type }
    }

    /// Create a new table type for function references.
    pub fn funcref(min: u32, max: Option<u32>) -> Self {
        Self::new(AwwasmRefType::FuncRef, min, max)
    }

    /// Create a new table type for external references.
    pub fn externref(min: u32, max: Option<u32>) -> Self {
        Self::new(AwwasmRefType::ExternRef, min, max)
    }
}

impl fmt::Display for AwwasmTableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "table {} {{min: {}, max: {}}}", self.elem_type, self.min, max),
            None => write!(f, "table {} {{min: {}}}", self.elem_type, self.min),
        }
    }
}

/// Table instance - runtime representation of a table.
#[derive(Debug, Clone)]
pub struct AwwasmTableInst {
    elem_type: AwwasmRefType,
    max: Option<u32>,
    /// The table elements.
    elem: Vec<AwwasmRef>,
}

impl AwwasmTableInst {
    /// Create a new table instance with the given type.
    ///
    /// Initializes all elements to the typed null. `limit` is the engine's
    /// cap on table size.
    pub fn new(type_: AwwasmTableType, limit: u32) -> Result<Self, AwwasmAllocationError> {
        if let Some(max) = type_.max {
            if type_.min > max {
                return Err(AwwasmAllocationError::MinExceedsMax {
                    min: type_.min as u64,
                    max: max as u64,
                });
            }
        }
        if type_.min > limit {
            return Err(AwwasmAllocationError::ExceedsEngineLimit {
                requested: type_.min as u64,
                limit: limit as u64,
            });
        }

        let size = type_.min as usize;
        let mut elem = Vec::new();
        elem.try_reserve_exact(size)
            .map_err(|_| AwwasmAllocationError::OutOfMemory {
                bytes: (size * core::mem::size_of::<AwwasmRef>()) as u64,
            })?;
        elem.resize(size, AwwasmRef::Null(type_.elem_type));
        Ok(Self {
            elem_type: type_.elem_type,
            max: type_.max,
            elem,
        })
    }

    /// The current table type; `min` tracks the current size.
    pub fn table_type(&self) -> AwwasmTableType {
        AwwasmTableType::new(self.elem_type, self.size(), self.max)
    }

    #[inline]
    pub fn elem_type(&self) -> AwwasmRefType {
        self.elem_type
    }

    /// Get the current size.
    #[inline]
    pub fn size(&self) -> u32 {
        self.elem.len() as u32
    }

    #[inline]
    pub fn has_max(&self) -> bool {
        self.max.is_some()
    }

    /// Declared maximum, or the 32-bit index space when none was declared.
    #[inline]
    pub fn max_size(&self) -> u32 {
        self.max.unwrap_or(u32::MAX)
    }

    /// Whether `[offset, offset + count)` lies inside the table.
    #[inline]
    pub fn check_bounds(&self, offset: u64, count: u64) -> bool {
        offset
            .checked_add(count)
            .is_some_and(|end| end <= self.elem.len() as u64)
    }

    #[inline]
    fn bounds(&self, offset: u64, count: u64) -> Result<Range<usize>, AwwasmTrap> {
        if !self.check_bounds(offset, count) {
            return Err(AwwasmTrap::TableOutOfBounds {
                offset,
                len: count,
                bound: self.elem.len() as u64,
            });
        }
        let start = offset as usize;
        Ok(start..start + count as usize)
    }

    /// Tables only hold references of their element type.
    #[inline]
    fn check_ref(&self, value: AwwasmRef) -> Result<(), AwwasmTrap> {
        if value.ref_type() != self.elem_type {
            return Err(AwwasmTrap::RefTypeMismatch {
                expected: self.elem_type,
                got: value.ref_type(),
            });
        }
        Ok(())
    }

    /// Get an element at the given index.
    #[inline]
    pub fn get(&self, index: u32) -> Result<AwwasmRef, AwwasmTrap> {
        let range = self.bounds(index as u64, 1)?;
        Ok(self.elem[range.start])
    }

    /// Set an element at the given index.
    #[inline]
    pub fn set(&mut self, index: u32, value: AwwasmRef) -> Result<(), AwwasmTrap> {
        let range = self.bounds(index as u64, 1)?;
        self.check_ref(value)?;
        self.elem[range.start] = value;
        Ok(())
    }

    /// Get `count` elements starting at `offset`.
    pub fn get_range(&self, offset: u32, count: u32) -> Result<&[AwwasmRef], AwwasmTrap> {
        let range = self.bounds(offset as u64, count as u64)?;
        Ok(&self.elem[range])
    }

    /// Copy `src[start..start + count]` into the table at `dst`.
    ///
    /// The source slice and the destination table are bounds-checked
    /// independently, and both before anything is written.
    pub fn set_range(&mut self, dst: u32, src: &[AwwasmRef], start: u32, count: u32) -> Result<(), AwwasmTrap> {
        let dst_range = self.bounds(dst as u64, count as u64)?;
        let src_end = start as u64 + count as u64;
        if src_end > src.len() as u64 {
            return Err(AwwasmTrap::TableOutOfBounds {
                offset: start as u64,
                len: count as u64,
                bound: src.len() as u64,
            });
        }
        let src = &src[start as usize..src_end as usize];
        for value in src {
            self.check_ref(*value)?;
        }
        self.elem[dst_range].copy_from_slice(src);
        Ok(())
    }

    /// Grow the table by the given number of elements.
    ///
    /// Returns the previous size on success, or None if growth would
    /// exceed the maximum or the engine limit. New slots hold `init`.
    pub fn grow(&mut self, delta: u32, init: AwwasmRef, limit: u32) -> Option<u32> {
        let old_size = self.size();
        let new_size = old_size.checked_add(delta)?;

        if init.ref_type() != self.elem_type {
            debug!(elem_type = %self.elem_type, "table grow refused: init has the wrong type");
            return None;
        }
        if new_size > self.max_size().min(limit) {
            debug!(old_size, delta, "table grow refused");
            return None;
        }
        if self.elem.try_reserve_exact(delta as usize).is_err() {
            return None;
        }

        // Extend with the init value
        self.elem.resize(new_size as usize, init);
        Some(old_size)
    }

    /// Fill a range of elements with a value.
    pub fn fill(&mut self, offset: u32, count: u32, value: AwwasmRef) -> Result<(), AwwasmTrap> {
        let range = self.bounds(offset as u64, count as u64)?;
        self.check_ref(value)?;
        self.elem[range].fill(value);
        Ok(())
    }

    /// Copy elements within the table. Overlapping ranges are handled.
    pub fn copy_within(&mut self, dst: u32, src: u32, count: u32) -> Result<(), AwwasmTrap> {
        let src_range = self.bounds(src as u64, count as u64)?;
        let dst_range = self.bounds(dst as u64, count as u64)?;
        self.elem.copy_within(src_range, dst_range.start);
        Ok(())
    }

    /// Replace every function reference selected by `is_dead` with null.
    /// Returns how many slots were cleared.
    pub(crate) fn clear_func_refs(&mut self, is_dead: impl Fn(AwwasmFuncAddr) -> bool) -> usize {
        let mut cleared = 0;
        for slot in self.elem.iter_mut() {
            if slot.func_addr().is_some_and(&is_dead) {
                *slot = AwwasmRef::NULL_FUNC;
                cleared += 1;
            }
        }
        cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::{AwwasmExternHandle, AwwasmFuncAddr};
    use proptest::prelude::*;

    fn table(min: u32, max: Option<u32>) -> AwwasmTableInst {
        AwwasmTableInst::new(AwwasmTableType::funcref(min, max), u32::MAX).unwrap()
    }

    #[test]
    fn test_table_scenario() {
        let mut t = table(2, Some(4));
        let some_ref = AwwasmRef::Func(AwwasmFuncAddr(9));

        assert_eq!(
            t.set(5, some_ref).unwrap_err(),
            AwwasmTrap::TableOutOfBounds { offset: 5, len: 1, bound: 2 }
        );
        assert_eq!(t.grow(2, AwwasmRef::NULL_FUNC, u32::MAX), Some(2));
        assert_eq!(t.size(), 4);

        t.set(3, some_ref).unwrap();
        assert_eq!(t.get(3).unwrap(), some_ref);

        assert_eq!(t.grow(1, AwwasmRef::NULL_FUNC, u32::MAX), None);
        assert_eq!(t.size(), 4);
    }

    #[test]
    fn test_null_by_default_and_grow_fill() {
        let mut t = table(1, None);
        assert_eq!(t.get(0).unwrap(), AwwasmRef::NULL_FUNC);
        let fill = AwwasmRef::Func(AwwasmFuncAddr(1));
        t.grow(3, fill, u32::MAX).unwrap();
        assert_eq!(t.get_range(1, 3).unwrap(), &[fill; 3]);
    }

    #[test]
    fn test_engine_limit_caps_growth() {
        let mut t = table(1, None);
        assert_eq!(t.grow(4, AwwasmRef::NULL_FUNC, 3), None);
        assert_eq!(t.grow(2, AwwasmRef::NULL_FUNC, 3), Some(1));
        assert!(AwwasmTableInst::new(AwwasmTableType::funcref(10, None), 8).is_err());
    }

    #[test]
    fn test_externref_table() {
        let mut t = AwwasmTableInst::new(AwwasmTableType::externref(2, None), u32::MAX).unwrap();
        assert_eq!(t.get(1).unwrap(), AwwasmRef::NULL_EXTERN);
        let handle = AwwasmRef::Extern(AwwasmExternHandle(0));
        t.set(1, handle).unwrap();
        assert_eq!(t.get(1).unwrap(), handle);
    }

    #[test]
    fn test_set_range_checks_source_and_destination() {
        let mut t = table(4, None);
        let src: Vec<AwwasmRef> = (0..3).map(|i| AwwasmRef::Func(AwwasmFuncAddr(i))).collect();

        t.set_range(1, &src, 1, 2).unwrap();
        assert_eq!(t.get_range(1, 2).unwrap(), &src[1..3]);

        // source overrun
        assert!(t.set_range(0, &src, 2, 2).is_err());
        // destination overrun
        assert!(t.set_range(3, &src, 0, 2).is_err());
        assert_eq!(t.get(0).unwrap(), AwwasmRef::NULL_FUNC);
    }

    #[test]
    fn test_fill_and_copy() {
        let mut t = table(6, None);
        let r = AwwasmRef::Func(AwwasmFuncAddr(5));
        t.fill(0, 2, r).unwrap();
        t.copy_within(1, 0, 3).unwrap();
        assert_eq!(t.get_range(0, 4).unwrap(), &[r, r, r, AwwasmRef::NULL_FUNC]);
        assert!(t.fill(5, 2, r).is_err());
        assert_eq!(t.get(5).unwrap(), AwwasmRef::NULL_FUNC);
    }

    #[test]
    fn test_rejects_references_of_the_wrong_type() {
        let mut t = table(2, None);
        let foreign = AwwasmRef::Extern(AwwasmExternHandle(0));
        let mismatch = AwwasmTrap::RefTypeMismatch {
            expected: AwwasmRefType::FuncRef,
            got: AwwasmRefType::ExternRef,
        };

        assert_eq!(t.set(0, foreign).unwrap_err(), mismatch);
        assert_eq!(t.fill(0, 2, foreign).unwrap_err(), mismatch);
        let src = [AwwasmRef::Func(AwwasmFuncAddr(1)), foreign];
        assert_eq!(t.set_range(0, &src, 0, 2).unwrap_err(), mismatch);
        assert_eq!(t.grow(1, AwwasmRef::NULL_EXTERN, u32::MAX), None);
        assert_eq!(t.size(), 2);
        assert_eq!(t.get_range(0, 2).unwrap(), &[AwwasmRef::NULL_FUNC; 2]);

        let mut ext = AwwasmTableInst::new(AwwasmTableType::externref(1, None), u32::MAX).unwrap();
        assert!(ext.set(0, AwwasmRef::Func(AwwasmFuncAddr(1))).is_err());
        assert!(ext.set(0, AwwasmRef::NULL_FUNC).is_err());
        assert_eq!(ext.get(0).unwrap(), AwwasmRef::NULL_EXTERN);
    }

    #[test]
    fn test_clear_func_refs() {
        let mut t = table(3, None);
        t.set(0, AwwasmRef::Func(AwwasmFuncAddr(1))).unwrap();
        t.set(2, AwwasmRef::Func(AwwasmFuncAddr(2))).unwrap();

        assert_eq!(t.clear_func_refs(|addr| addr == AwwasmFuncAddr(2)), 1);
        assert_eq!(
            t.get_range(0, 3).unwrap(),
            &[AwwasmRef::Func(AwwasmFuncAddr(1)), AwwasmRef::NULL_FUNC, AwwasmRef::NULL_FUNC]
        );
    }

    proptest! {
        #[test]
        fn prop_table_writes_out_of_bounds_never_mutate(dst in 0u32..16, src in 0u32..16, count in 1u32..16) {
            let seed: Vec<AwwasmRef> = (0..8).map(|i| AwwasmRef::Func(AwwasmFuncAddr(i))).collect();
            let mut base = table(8, None);
            base.set_range(0, &seed, 0, 8).unwrap();
            let r = AwwasmRef::Func(AwwasmFuncAddr(99));
            let dst_fits = dst as u64 + count as u64 <= 8;
            let src_fits = src as u64 + count as u64 <= 8;

            let mut t = base.clone();
            prop_assert_eq!(t.set(dst, r).is_ok(), dst < 8);
            prop_assert_eq!(t.get(dst).is_ok(), dst < 8);

            let mut t = base.clone();
            let copied = t.copy_within(dst, src, count);
            prop_assert_eq!(copied.is_ok(), dst_fits && src_fits);
            if copied.is_err() {
                prop_assert_eq!(t.get_range(0, 8).unwrap(), &seed[..]);
            }

            let mut t = base.clone();
            let written = t.set_range(dst, &seed, src, count);
            prop_assert_eq!(written.is_ok(), dst_fits && src_fits);
            if written.is_err() {
                prop_assert_eq!(t.get_range(0, 8).unwrap(), &seed[..]);
            }
        }

        #[test]
        fn prop_table_bounds_soundness(offset in 0u32..16, count in 1u32..16) {
            let mut t = table(8, None);
            let r = AwwasmRef::Func(AwwasmFuncAddr(1));
            let in_bounds = offset as u64 + count as u64 <= 8;
            prop_assert_eq!(t.fill(offset, count, r).is_ok(), in_bounds);
            prop_assert_eq!(t.get_range(offset, count).is_ok(), in_bounds);
            if !in_bounds {
                prop_assert!(t.get_range(0, 8).unwrap().iter().all(|e| e.is_null()));
            }
        }
    }
}
