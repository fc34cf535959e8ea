//! Sandbox configuration.

use crate::memory::MAX_PAGES;

/// Engine-wide limits and behaviour switches for a store.
///
/// The config is handed to the store at construction and passed explicitly
/// to every memory and table allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwwasmConfig {
    /// Maximum linear memory pages (1 page = 64 KiB) any memory may reach.
    /// Default: 65536 pages = 4 GiB, the 32-bit protocol ceiling.
    pub max_memory_pages: u32,

    /// Maximum number of elements any table may reach.
    pub max_table_elements: u32,

    /// Check each active segment right before writing it instead of
    /// checking all of them up front. Segments preceding a failing one
    /// keep their writes in shared (imported) tables and memories.
    pub relaxed_segment_bounds: bool,
}

impl AwwasmConfig {
    /// Set the engine page limit, clamped to the protocol ceiling.
    pub fn with_max_memory_pages(mut self, pages: u32) -> Self {
        self.max_memory_pages = pages.min(MAX_PAGES);
        self
    }

    pub fn with_max_table_elements(mut self, elements: u32) -> Self {
        self.max_table_elements = elements;
        self
    }

    pub fn with_relaxed_segment_bounds(mut self, relaxed: bool) -> Self {
        self.relaxed_segment_bounds = relaxed;
        self
    }
}

impl Default for AwwasmConfig {
    fn default() -> Self {
        Self {
            max_memory_pages: MAX_PAGES, // 4 GiB
            max_table_elements: u32::MAX,
            relaxed_segment_bounds: false,
        }
    }
}
