use crate::common::SectorType;
use thiserror::Error;

/// Why a chain walk stopped before reaching `EndOfChain`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// A slot held a sentinel other than `EndOfChain`.
    /// `chain` holds the sectors visited before the bad slot.
    #[error("unexpected {found} after {} sectors", .chain.len())]
    Invalid { chain: Vec<u32>, found: SectorType },
    /// A sector number points past the end of the table.
    #[error("sector {sector} is outside a table of {table_len} entries")]
    OutOfRange { chain: Vec<u32>, sector: u32, table_len: usize },
    #[error("chain starting at {start} exceeds {max_steps} steps")]
    TooLong { start: u32, max_steps: usize },
}

impl ChainError {
    /// The sectors collected before the walk failed.
    pub fn partial(&self) -> &[u32] {
        match self {
            ChainError::Invalid { chain, .. } | ChainError::OutOfRange { chain, .. } => chain,
            ChainError::TooLong { .. } => &[],
        }
    }
}

/// Follows `table` from `start` until `EndOfChain`, returning every visited sector.
///
/// At most `max_steps` sectors are collected; a longer chain (including any
/// cycle) fails with [`ChainError::TooLong`]. Used for both the FAT and the
/// MiniFAT.
pub fn walk_chain(table: &[SectorType], start: SectorType, max_steps: usize) -> Result<Vec<u32>, ChainError> {
    let mut chain = Vec::with_capacity(max_steps.min(table.len()));
    let mut current = start;
    loop {
        match current {
            SectorType::EndOfChain => return Ok(chain),
            SectorType::RegularSect(sector) => {
                if chain.len() >= max_steps {
                    return Err(ChainError::TooLong { start: start.to_raw(), max_steps });
                }
                let Some(next) = table.get(sector as usize) else {
                    return Err(ChainError::OutOfRange { chain, sector, table_len: table.len() });
                };
                chain.push(sector);
                current = *next;
            }
            found => return Err(ChainError::Invalid { chain, found }),
        }
    }
}
