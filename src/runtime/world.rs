//! Block world made of explicitly described columns.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::collaborators::WorldView;
use crate::types::{BlockKind, BlockPos};

/// Columns of blocks above radio positions.
///
/// Entry `0` of a column is the block directly above the radio (offset 1).
/// Past the end of a described column every block is `Other`; positions
/// without a column read as unloaded.
#[derive(Debug, Default)]
pub struct ColumnWorld {
    columns: RwLock<HashMap<BlockPos, Vec<BlockKind>>>,
}

impl ColumnWorld {
    pub fn set_column(&self, base: &BlockPos, column: Vec<BlockKind>) {
        self.columns.write().unwrap_or_else(PoisonError::into_inner).insert(base.clone(), column);
    }

    /// Forget the column, as if its chunk were unloaded.
    pub fn clear_column(&self, base: &BlockPos) {
        self.columns.write().unwrap_or_else(PoisonError::into_inner).remove(base);
    }

    /// A well-formed antenna structure with `antennas` elements.
    pub fn sandwich(antennas: u32) -> Vec<BlockKind> {
        let mut column = vec![BlockKind::Cap];
        column.extend(std::iter::repeat_n(BlockKind::Antenna, antennas as usize));
        column.extend([BlockKind::Cap; 3]);
        column
    }
}

impl WorldView for ColumnWorld {
    fn block_above(&self, position: &BlockPos, offset: u32) -> Option<BlockKind> {
        let columns = self.columns.read().unwrap_or_else(PoisonError::into_inner);
        let column = columns.get(position)?;
        let index = offset.checked_sub(1)? as usize;
        Some(column.get(index).copied().unwrap_or(BlockKind::Other))
    }
}
