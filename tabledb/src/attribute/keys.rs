use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Table-level behavior flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct TableKeys: u32 {
        const CACHING = 1 << 0;
        const READ_ONLY = 1 << 1;
        const PRIVATE = 1 << 2;
        const NO_LOGS = 1 << 3;
        const VIRTUAL = 1 << 4;
    }
}

impl Default for TableKeys {
    fn default() -> Self {
        TableKeys::empty()
    }
}

bitflags! {
    /// Column roles and behavior flags.
    ///
    /// The roles in [`ColumnKeys::RESERVED`] may be carried by at most one
    /// column per table.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ColumnKeys: u32 {
        const PRIMARY = 1 << 0;
        const ITEM_TYPE = 1 << 1;
        const STAMP = 1 << 2;
        const DATE = 1 << 3;
        const CODE = 1 << 4;
        const STATUS = 1 << 5;
        const GROUP = 1 << 6;
        const FILE = 1 << 7;
        const ACCESS = 1 << 8;
        const REFERENCE = 1 << 9;
        const INDEXING = 1 << 10;
        const NOT_NULL = 1 << 11;
        const NO_LOG = 1 << 12;
        const UNIQUE = 1 << 13;
        const VIEW = 1 << 14;
        const SYSTEM = 1 << 15;
        /// Log table bookkeeping columns.
        const LOG_TYPE = 1 << 16;
        const LOG_BASE = 1 << 17;

        const RESERVED = Self::PRIMARY.bits()
            | Self::ITEM_TYPE.bits()
            | Self::STAMP.bits()
            | Self::DATE.bits()
            | Self::CODE.bits()
            | Self::STATUS.bits()
            | Self::GROUP.bits()
            | Self::FILE.bits()
            | Self::ACCESS.bits()
            | Self::LOG_TYPE.bits()
            | Self::LOG_BASE.bits();
    }
}

impl Default for ColumnKeys {
    fn default() -> Self {
        ColumnKeys::empty()
    }
}

impl ColumnKeys {
    /// The individual reserved roles set on these keys.
    pub fn reserved_roles(self) -> impl Iterator<Item = ColumnKeys> {
        (self & ColumnKeys::RESERVED).iter()
    }

    /// Whether a column with these keys gets an in-memory secondary index.
    pub fn is_indexed(self) -> bool {
        self.intersects(
            ColumnKeys::PRIMARY
                | ColumnKeys::INDEXING
                | ColumnKeys::REFERENCE
                | ColumnKeys::ITEM_TYPE
                | ColumnKeys::CODE
                | ColumnKeys::UNIQUE
                | ColumnKeys::LOG_BASE,
        )
    }
}
