// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::cmp::Ordering;

/// User defined key
pub type UserKey = byteview::ByteView;

/// Sequence number, a monotonically increasing counter
///
/// Values with the same user key and a higher sequence number
/// shadow values with a lower sequence number.
pub type SeqNo = u64;

/// Value type (regular value or tombstone)
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ValueType {
    /// Existing value
    Value,

    /// Deleted value
    Tombstone,

    /// "Weak" deletion (a.k.a. `SingleDelete` in `RocksDB`)
    WeakTombstone,
}

impl From<ValueType> for u8 {
    fn from(value: ValueType) -> Self {
        match value {
            ValueType::Value => 0,
            ValueType::Tombstone => 1,
            ValueType::WeakTombstone => 2,
        }
    }
}

impl TryFrom<u8> for ValueType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Value),
            1 => Ok(Self::Tombstone),
            2 => Ok(Self::WeakTombstone),
            _ => Err(()),
        }
    }
}

impl ValueType {
    /// Returns `true` if the type is any kind of tombstone
    #[must_use]
    pub fn is_tombstone(self) -> bool {
        matches!(self, Self::Tombstone | Self::WeakTombstone)
    }
}

/// Internal key: user key + sequence number + value type
///
/// Internal keys sort by user key ascending, then by sequence number
/// descending, so the newest version of a key comes first.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct InternalKey {
    /// User key
    pub user_key: UserKey,

    /// Sequence number
    pub seqno: SeqNo,

    /// Value type
    pub value_type: ValueType,
}

impl InternalKey {
    /// Creates a new internal key.
    pub fn new<K: AsRef<[u8]>>(user_key: K, seqno: SeqNo, value_type: ValueType) -> Self {
        Self {
            user_key: UserKey::from(user_key.as_ref()),
            seqno,
            value_type,
        }
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.user_key
            .cmp(&other.user_key)
            .then_with(|| other.seqno.cmp(&self.seqno))
            .then_with(|| u8::from(other.value_type).cmp(&u8::from(self.value_type)))
    }
}
