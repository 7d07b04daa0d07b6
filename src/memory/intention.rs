//! Allocation intention tags.

use std::fmt;

/// Why a chunk of off-heap memory was allocated.
///
/// Purely diagnostic: the tag is attached to every [`MemoryHandle`] and used
/// as the key for memory-profiling reports. It carries no behavior and has
/// no effect on allocation itself.
///
/// [`MemoryHandle`]: crate::memory::MemoryHandle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intention {
    Test,
    PagePreAllocation,
    AddNewPageInCache,
    CheckFileStorage,
    LoadPageFromDisk,
    CopyPageDuringFlush,
    FileFlush,
    LoadWalPage,
    AddNewPageInMemoryStorage,
    AllocateFirstWalBuffer,
    AllocateSecondWalBuffer,
}

impl Intention {
    /// All intentions, in report order.
    pub const ALL: [Intention; 11] = [
        Intention::Test,
        Intention::PagePreAllocation,
        Intention::AddNewPageInCache,
        Intention::CheckFileStorage,
        Intention::LoadPageFromDisk,
        Intention::CopyPageDuringFlush,
        Intention::FileFlush,
        Intention::LoadWalPage,
        Intention::AddNewPageInMemoryStorage,
        Intention::AllocateFirstWalBuffer,
        Intention::AllocateSecondWalBuffer,
    ];

    /// Stable index into per-intention counter tables.
    #[inline]
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Intention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_covers_every_variant() {
        // Indices must be dense so counter tables can be plain arrays.
        for (i, intention) in Intention::ALL.iter().enumerate() {
            assert_eq!(intention.index(), i);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Intention::Test), "Test");
        assert_eq!(
            format!("{}", Intention::AddNewPageInCache),
            "AddNewPageInCache"
        );
    }
}
