//! Snapshot detail levels
//!
//! The mixer asks each avatar for a detail level based on viewer interest;
//! the send policy turns the level into an initial section mask.

/// How much of the avatar state one snapshot should carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AvatarDataDetail {
    /// Flags only - an empty snapshot that keeps the session alive
    NoData,
    /// People-list minimum: audio loudness and global position
    PalMinimum,
    /// Everything except the joint stream
    MinimumData,
    /// Everything, with sub-threshold joint changes elided
    CullSmallData,
    /// Everything, unconditionally
    SendAllData,
}

impl AvatarDataDetail {
    /// True when joint rotations below the change threshold are dropped
    #[inline]
    pub fn culls_small_changes(self) -> bool {
        self == AvatarDataDetail::CullSmallData
    }

    /// True when every field is included regardless of change history
    #[inline]
    pub fn sends_all(self) -> bool {
        self == AvatarDataDetail::SendAllData
    }
}
