//! Memory instance implementation.
//!
//! A memory instance is the runtime representation of a linear memory.
//! It owns a byte buffer with page-granular sizing. Every access, from
//! the byte-slice accessors to the scalar loads and stores, goes through
//! [`AwwasmMemInst::bounds`], the single bounds gate.

use core::fmt;
use core::ops::Range;

use tracing::{debug, warn};

use crate::error::{AwwasmAllocationError, AwwasmTrap};

/// WebAssembly page size in bytes (64 KiB).
pub const PAGE_SIZE: u64 = 65536;

/// Protocol ceiling for 32-bit memories: 2^16 pages (4 GiB).
pub const MAX_PAGES: u32 = 65536;

/// Memory type - describes the limits of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwwasmMemoryType {
    /// Minimum number of pages.
    pub min: u32,
    /// Maximum number of pages (if specified).
    pub max: Option<u32>,
}

impl AwwasmMemoryType {
    /// Create a new memory type.
    pub fn new(min: u32, max: Option<u32>) -> Self {
        Self { min, max }
    }
}

impl fmt::Display for AwwasmMemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "memory {{min: {}, max: {}}}", self.min, max),
            None => write!(f, "memory {{min: {}}}", self.min),
        }
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for i32 {}
    impl Sealed for u32 {}
    impl Sealed for i64 {}
    impl Sealed for u64 {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// Numeric types that can be loaded from and stored to linear memory.
///
/// Values travel through a little-endian 64-bit staging word: loads
/// zero- or sign-extend into it, stores take its low bytes.
pub trait AwwasmScalar: Copy + sealed::Sealed {
    /// Natural width in bytes.
    const SIZE: u32;
    /// Whether narrow loads sign-extend.
    const SIGNED: bool;

    fn from_bits64(bits: u64) -> Self;
    fn to_bits64(self) -> u64;
}

macro_rules! impl_int_scalar {
    ($($ty:ty => $unsigned:ty, $signed:expr;)*) => {
        $(
            impl AwwasmScalar for $ty {
                const SIZE: u32 = core::mem::size_of::<$ty>() as u32;
                const SIGNED: bool = $signed;

                #[inline]
                fn from_bits64(bits: u64) -> Self {
                    bits as $unsigned as $ty
                }

                #[inline]
                fn to_bits64(self) -> u64 {
                    self as $unsigned as u64
                }
            }
        )*
    };
}

impl_int_scalar! {
    i32 => u32, true;
    u32 => u32, false;
    i64 => u64, true;
    u64 => u64, false;
}

impl AwwasmScalar for f32 {
    const SIZE: u32 = 4;
    const SIGNED: bool = false;

    #[inline]
    fn from_bits64(bits: u64) -> Self {
        f32::from_bits(bits as u32)
    }

    #[inline]
    fn to_bits64(self) -> u64 {
        self.to_bits() as u64
    }
}

impl AwwasmScalar for f64 {
    const SIZE: u32 = 8;
    const SIGNED: bool = false;

    #[inline]
    fn from_bits64(bits: u64) -> Self {
        f64::from_bits(bits)
    }

    #[inline]
    fn to_bits64(self) -> u64 {
        self.to_bits()
    }
}

/// Memory instance - runtime representation of linear memory.
///
/// The data vector always has a size that is a multiple of PAGE_SIZE and
/// never shrinks. The current page count doubles as the `min` of the
/// memory type reported to importers.
#[derive(Debug, Clone)]
pub struct AwwasmMemInst {
    /// Declared maximum number of pages.
    max: Option<u32>,
    /// Engine-imposed page cap, fixed at creation.
    page_limit: u32,
    /// The raw bytes of memory.
    data: Vec<u8>,
}

impl AwwasmMemInst {
    /// Create a new memory instance with the given type.
    ///
    /// Allocates `min` pages of zeroed memory. Fails if `min` exceeds the
    /// declared maximum or `page_limit`, or if the host cannot provide the
    /// buffer.
    pub fn new(type_: AwwasmMemoryType, page_limit: u32) -> Result<Self, AwwasmAllocationError> {
        let page_limit = page_limit.min(MAX_PAGES);
        if let Some(max) = type_.max {
            if type_.min > max {
                return Err(AwwasmAllocationError::MinExceedsMax {
                    min: type_.min as u64,
                    max: max as u64,
                });
            }
        }
        if type_.min > page_limit {
            warn!(requested = type_.min, limit = page_limit, "memory exceeds engine page limit");
            return Err(AwwasmAllocationError::ExceedsEngineLimit {
                requested: type_.min as u64,
                limit: page_limit as u64,
            });
        }

        let data = zeroed_buffer(type_.min)?;
        Ok(Self {
            max: type_.max,
            page_limit,
            data,
        })
    }

    /// The current memory type; `min` tracks the current size.
    pub fn memory_type(&self) -> AwwasmMemoryType {
        AwwasmMemoryType::new(self.size_pages(), self.max)
    }

    /// Get the current size in pages.
    #[inline]
    pub fn size_pages(&self) -> u32 {
        (self.data.len() as u64 / PAGE_SIZE) as u32
    }

    /// Get the current size in bytes.
    #[inline]
    pub fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    #[inline]
    pub fn has_max(&self) -> bool {
        self.max.is_some()
    }

    /// Declared maximum, or the protocol ceiling when none was declared.
    #[inline]
    pub fn max_pages(&self) -> u32 {
        self.max.unwrap_or(MAX_PAGES)
    }

    #[inline]
    pub fn page_limit(&self) -> u32 {
        self.page_limit
    }

    /// Read-only view of the whole buffer.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether `[offset, offset + len)` lies inside the memory.
    ///
    /// Computed in u64 with overflow detection, so an offset close to
    /// `u64::MAX` cannot wrap around and pass.
    #[inline]
    pub fn check_bounds(&self, offset: u64, len: u64) -> bool {
        offset
            .checked_add(len)
            .is_some_and(|end| end <= self.size_bytes())
    }

    /// The bounds gate: validate the range and convert it to a buffer index.
    #[inline]
    pub(crate) fn bounds(&self, offset: u64, len: u64) -> Result<Range<usize>, AwwasmTrap> {
        if !self.check_bounds(offset, len) {
            return Err(AwwasmTrap::MemoryOutOfBounds {
                offset,
                len,
                bound: self.size_bytes(),
            });
        }
        // Both ends are <= data.len(), which already fits in usize.
        let start = offset as usize;
        Ok(start..start + len as usize)
    }

    /// Grow the memory by the given number of pages.
    ///
    /// Returns the previous size in pages on success, or None if growth
    /// would exceed the declared maximum, the engine page limit or the
    /// protocol ceiling, or if the host cannot extend the buffer. A failed
    /// grow leaves the memory untouched.
    pub fn grow(&mut self, delta: u32) -> Option<u32> {
        let old_pages = self.size_pages();
        if delta == 0 {
            return Some(old_pages);
        }
        let new_pages = old_pages.checked_add(delta)?;

        let cap = self.max_pages().min(self.page_limit).min(MAX_PAGES);
        if new_pages > cap {
            debug!(old_pages, delta, cap, "memory grow refused");
            return None;
        }

        let new_len = usize::try_from(new_pages as u64 * PAGE_SIZE).ok()?;
        if let Err(err) = self.data.try_reserve_exact(new_len - self.data.len()) {
            warn!(old_pages, delta, %err, "memory grow allocation failed");
            return None;
        }
        self.data.resize(new_len, 0);

        Some(old_pages)
    }

    /// Read bytes from memory.
    ///
    /// Returns a Trap if the access is out of bounds.
    pub fn read(&self, offset: u64, len: u64) -> Result<&[u8], AwwasmTrap> {
        let range = self.bounds(offset, len)?;
        Ok(&self.data[range])
    }

    /// Mutable view of `[offset, offset + len)`.
    pub fn read_mut(&mut self, offset: u64, len: u64) -> Result<&mut [u8], AwwasmTrap> {
        let range = self.bounds(offset, len)?;
        Ok(&mut self.data[range])
    }

    /// Write bytes to memory.
    ///
    /// Returns a Trap if the access is out of bounds; nothing is written
    /// in that case.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), AwwasmTrap> {
        let range = self.bounds(offset, data.len() as u64)?;
        self.data[range].copy_from_slice(data);
        Ok(())
    }

    /// Copy `src[start..start + len]` into memory at `offset`.
    ///
    /// The source range and the destination range are checked
    /// independently; both must pass before anything is written.
    pub fn set_bytes(&mut self, src: &[u8], offset: u64, start: u64, len: u64) -> Result<(), AwwasmTrap> {
        let dst = self.bounds(offset, len)?;
        let src_ok = start
            .checked_add(len)
            .is_some_and(|end| end <= src.len() as u64);
        if !src_ok {
            return Err(AwwasmTrap::MemoryOutOfBounds {
                offset: start,
                len,
                bound: src.len() as u64,
            });
        }
        let start = start as usize;
        self.data[dst].copy_from_slice(&src[start..start + len as usize]);
        Ok(())
    }

    /// Fill a region of memory with a value.
    pub fn fill(&mut self, offset: u64, len: u64, value: u8) -> Result<(), AwwasmTrap> {
        let range = self.bounds(offset, len)?;
        self.data[range].fill(value);
        Ok(())
    }

    /// Copy a region within memory. Overlapping ranges are handled.
    pub fn copy_within(&mut self, dst: u64, src: u64, len: u64) -> Result<(), AwwasmTrap> {
        let src_range = self.bounds(src, len)?;
        let dst_range = self.bounds(dst, len)?;
        self.data.copy_within(src_range, dst_range.start);
        Ok(())
    }

    /// Load `width` bytes at `offset` as a `T`.
    ///
    /// Signed integers are sign-extended, unsigned integers zero-extended,
    /// floats are a raw bit copy.
    ///
    /// # Panics
    ///
    /// Panics if `width` exceeds the size of `T`; callers derive `width`
    /// from the instruction, so this is an engine bug.
    pub fn load<T: AwwasmScalar>(&self, offset: u64, width: u32) -> Result<T, AwwasmTrap> {
        assert!(width <= T::SIZE, "load width {} wider than target type ({} bytes)", width, T::SIZE);
        let range = self.bounds(offset, width as u64)?;

        let mut staging = [0u8; 8];
        staging[..width as usize].copy_from_slice(&self.data[range]);
        let mut bits = u64::from_le_bytes(staging);
        if T::SIGNED && width > 0 && width < 8 {
            let shift = 64 - width * 8;
            bits = (((bits << shift) as i64) >> shift) as u64;
        }
        Ok(T::from_bits64(bits))
    }

    /// Store the low `width` bytes of `value` at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `width` exceeds the size of `T`.
    pub fn store<T: AwwasmScalar>(&mut self, offset: u64, value: T, width: u32) -> Result<(), AwwasmTrap> {
        assert!(width <= T::SIZE, "store width {} wider than source type ({} bytes)", width, T::SIZE);
        let range = self.bounds(offset, width as u64)?;
        let bytes = value.to_bits64().to_le_bytes();
        self.data[range].copy_from_slice(&bytes[..width as usize]);
        Ok(())
    }

    /// Read a single byte from memory.
    #[inline]
    pub fn read_u8(&self, offset: u64) -> Result<u8, AwwasmTrap> {
        let bytes = self.read(offset, 1)?;
        Ok(bytes[0])
    }

    /// Write a single byte to memory.
    #[inline]
    pub fn write_u8(&mut self, offset: u64, value: u8) -> Result<(), AwwasmTrap> {
        self.write(offset, &[value])
    }

    /// Read an i32 from memory (little-endian).
    #[inline]
    pub fn read_i32(&self, offset: u64) -> Result<i32, AwwasmTrap> {
        self.load(offset, 4)
    }

    /// Write an i32 to memory (little-endian).
    #[inline]
    pub fn write_i32(&mut self, offset: u64, value: i32) -> Result<(), AwwasmTrap> {
        self.store(offset, value, 4)
    }

    /// Read an i64 from memory (little-endian).
    #[inline]
    pub fn read_i64(&self, offset: u64) -> Result<i64, AwwasmTrap> {
        self.load(offset, 8)
    }

    /// Write an i64 to memory (little-endian).
    #[inline]
    pub fn write_i64(&mut self, offset: u64, value: i64) -> Result<(), AwwasmTrap> {
        self.store(offset, value, 8)
    }
}

fn zeroed_buffer(pages: u32) -> Result<Vec<u8>, AwwasmAllocationError> {
    let bytes = pages as u64 * PAGE_SIZE;
    let len = usize::try_from(bytes).map_err(|_| AwwasmAllocationError::OutOfMemory { bytes })?;
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| AwwasmAllocationError::OutOfMemory { bytes })?;
    data.resize(len, 0);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mem(min: u32, max: Option<u32>) -> AwwasmMemInst {
        AwwasmMemInst::new(AwwasmMemoryType::new(min, max), MAX_PAGES).unwrap()
    }

    #[test]
    fn test_create_zero_filled() {
        let m = mem(1, Some(2));
        assert_eq!(m.size_pages(), 1);
        assert_eq!(m.size_bytes(), PAGE_SIZE);
        assert!(m.data().iter().all(|&b| b == 0));
        assert!(m.has_max());
        assert_eq!(m.max_pages(), 2);
    }

    #[test]
    fn test_create_rejects_bad_limits() {
        assert_eq!(
            AwwasmMemInst::new(AwwasmMemoryType::new(3, Some(2)), MAX_PAGES).unwrap_err(),
            AwwasmAllocationError::MinExceedsMax { min: 3, max: 2 }
        );
        assert_eq!(
            AwwasmMemInst::new(AwwasmMemoryType::new(5, None), 4).unwrap_err(),
            AwwasmAllocationError::ExceedsEngineLimit { requested: 5, limit: 4 }
        );
    }

    #[test]
    fn test_round_trip_scenario() {
        let mut m = mem(1, Some(2));
        assert_eq!(m.grow(1), Some(1));
        assert_eq!(m.size_bytes(), 131072);

        assert_eq!(m.grow(1), None);
        assert_eq!(m.size_pages(), 2);

        m.write(65536 + 100, &[0xAB, 0xCD]).unwrap();
        assert_eq!(m.read(65536 + 100, 2).unwrap(), &[0xAB, 0xCD]);

        assert_eq!(
            m.read(131070, 4).unwrap_err(),
            AwwasmTrap::MemoryOutOfBounds { offset: 131070, len: 4, bound: 131072 }
        );
    }

    #[test]
    fn test_grow_respects_engine_limit() {
        let mut m = AwwasmMemInst::new(AwwasmMemoryType::new(1, None), 3).unwrap();
        assert_eq!(m.grow(2), Some(1));
        assert_eq!(m.grow(1), None);
        assert_eq!(m.size_pages(), 3);
        assert_eq!(m.grow(0), Some(3));
    }

    #[test]
    fn test_grow_zero_fills() {
        let mut m = mem(1, None);
        m.fill(0, PAGE_SIZE, 0xFF).unwrap();
        m.grow(1).unwrap();
        assert!(m.read(PAGE_SIZE, PAGE_SIZE).unwrap().iter().all(|&b| b == 0));
        assert!(m.read(0, PAGE_SIZE).unwrap().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_zero_length_access_at_end() {
        let mut m = mem(1, None);
        assert!(m.write(PAGE_SIZE, &[]).is_ok());
        assert!(m.read(PAGE_SIZE, 0).is_ok());
        assert!(m.fill(PAGE_SIZE, 0, 1).is_ok());
        assert!(m.read(PAGE_SIZE + 1, 0).is_err());
    }

    #[test]
    fn test_wrapping_offset_is_rejected() {
        let m = mem(1, None);
        assert!(!m.check_bounds(u64::MAX, 2));
        assert!(!m.check_bounds(u32::MAX as u64, 4));
        assert!(m.read(u64::MAX - 1, 4).is_err());
    }

    #[test]
    fn test_narrow_loads_extend() {
        let mut m = mem(1, None);
        m.write(0, &[0xFF, 0x80]).unwrap();
        assert_eq!(m.load::<i32>(0, 1).unwrap(), -1);
        assert_eq!(m.load::<u32>(0, 1).unwrap(), 0xFF);
        assert_eq!(m.load::<i64>(0, 2).unwrap(), -32513);
        assert_eq!(m.load::<u64>(0, 2).unwrap(), 0x80FF);
        assert_eq!(m.load::<i64>(1, 1).unwrap(), -128);
    }

    #[test]
    fn test_store_truncates() {
        let mut m = mem(1, None);
        m.store::<u32>(8, 0x1122_3344, 2).unwrap();
        assert_eq!(m.read(8, 4).unwrap(), &[0x44, 0x33, 0x00, 0x00]);
        m.store::<i64>(16, -1, 4).unwrap();
        assert_eq!(m.load::<u64>(16, 8).unwrap(), 0xFFFF_FFFF);
    }

    #[test]
    fn test_float_bits_round_trip() {
        let mut m = mem(1, None);
        let nan = f32::from_bits(0x7FC0_0001);
        m.store(32, nan, 4).unwrap();
        assert_eq!(m.load::<f32>(32, 4).unwrap().to_bits(), 0x7FC0_0001);
        m.store(40, 2.5f64, 8).unwrap();
        assert_eq!(m.load::<f64>(40, 8).unwrap(), 2.5);
    }

    #[test]
    #[should_panic]
    fn test_load_wider_than_type_panics() {
        let m = mem(1, None);
        let _ = m.load::<i32>(0, 8);
    }

    #[test]
    fn test_set_bytes_checks_source() {
        let mut m = mem(1, None);
        let src = [1u8, 2, 3, 4];
        m.set_bytes(&src, 10, 1, 3).unwrap();
        assert_eq!(m.read(10, 3).unwrap(), &[2, 3, 4]);
        assert_eq!(
            m.set_bytes(&src, 20, 2, 3).unwrap_err(),
            AwwasmTrap::MemoryOutOfBounds { offset: 2, len: 3, bound: 4 }
        );
        assert_eq!(m.read(20, 3).unwrap(), &[0, 0, 0]);
    }

    #[test]
    fn test_copy_within_overlapping() {
        let mut m = mem(1, None);
        m.write(0, &[1, 2, 3, 4, 5]).unwrap();
        m.copy_within(2, 0, 5).unwrap();
        assert_eq!(m.read(0, 7).unwrap(), &[1, 2, 1, 2, 3, 4, 5]);
        assert!(m.copy_within(PAGE_SIZE - 2, 0, 5).is_err());
    }

    proptest! {
        #[test]
        fn prop_out_of_bounds_never_mutates(offset in 0u64..(2 * PAGE_SIZE), len in 1u64..4096) {
            let mut m = mem(1, None);
            let in_bounds = offset + len <= PAGE_SIZE;
            let data = vec![0xAAu8; len as usize];

            prop_assert_eq!(m.write(offset, &data).is_ok(), in_bounds);
            prop_assert_eq!(m.fill(offset, len, 0xAA).is_ok(), in_bounds);
            prop_assert_eq!(m.read(offset, len).is_ok(), in_bounds);
            if !in_bounds {
                prop_assert!(m.data().iter().all(|&b| b == 0));
            }
        }

        #[test]
        fn prop_scalar_access_is_bounds_checked(offset in (PAGE_SIZE - 16)..(PAGE_SIZE + 16), width_idx in 0usize..4) {
            let width = [1u32, 2, 4, 8][width_idx];
            let fits = offset + width as u64 <= PAGE_SIZE;
            let mut m = mem(1, None);

            prop_assert_eq!(m.load::<i64>(offset, width).is_ok(), fits);
            prop_assert_eq!(m.load::<u64>(offset, width).is_ok(), fits);
            prop_assert_eq!(m.store::<i64>(offset, -1, width).is_ok(), fits);
            prop_assert_eq!(m.store::<u64>(offset, u64::MAX, width).is_ok(), fits);
            if width <= 4 {
                prop_assert_eq!(m.load::<i32>(offset, width).is_ok(), fits);
                prop_assert_eq!(m.store::<i32>(offset, -1, width).is_ok(), fits);
                prop_assert_eq!(m.store::<u32>(offset, u32::MAX, width).is_ok(), fits);
            }
            if width == 4 {
                prop_assert_eq!(m.load::<f32>(offset, 4).is_ok(), fits);
                prop_assert_eq!(m.store::<f32>(offset, 1.5, 4).is_ok(), fits);
            }
            if width == 8 {
                prop_assert_eq!(m.load::<f64>(offset, 8).is_ok(), fits);
                prop_assert_eq!(m.store::<f64>(offset, 1.5, 8).is_ok(), fits);
            }
            if !fits {
                prop_assert!(m.data().iter().all(|&b| b == 0));
            }
        }

        #[test]
        fn prop_copy_within_out_of_bounds_never_mutates(dst in 0u64..(2 * PAGE_SIZE), src in 0u64..(2 * PAGE_SIZE), len in 1u64..4096) {
            let pattern: Vec<u8> = (0..PAGE_SIZE).map(|i| (i % 251) as u8).collect();
            let mut m = mem(1, None);
            m.write(0, &pattern).unwrap();

            let fits = dst + len <= PAGE_SIZE && src + len <= PAGE_SIZE;
            prop_assert_eq!(m.copy_within(dst, src, len).is_ok(), fits);
            if !fits {
                prop_assert_eq!(m.data(), &pattern[..]);
            }
        }

        #[test]
        fn prop_growth_is_monotonic_and_capped(deltas in proptest::collection::vec(0u32..4, 1..8), max in 1u32..10) {
            let mut m = mem(1, Some(max));
            for delta in deltas {
                let before = m.size_pages();
                match m.grow(delta) {
                    Some(old) => {
                        prop_assert_eq!(old, before);
                        prop_assert_eq!(m.size_pages(), before + delta);
                    }
                    None => {
                        prop_assert!(before + delta > max);
                        prop_assert_eq!(m.size_pages(), before);
                    }
                }
                prop_assert!(m.size_pages() <= max);
                prop_assert_eq!(m.size_bytes(), m.size_pages() as u64 * PAGE_SIZE);
            }
        }
    }
}
