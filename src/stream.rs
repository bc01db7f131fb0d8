use crate::chain::{walk_chain, ChainError};
use crate::common::{checked_size, OleError, OleResult, SectorType};
use crate::options::{CfbWarning, Reporter, WarningCode};

/// Extra sectors a chain may carry past what its declared size needs
/// before the walk is abandoned.
pub const CHAIN_SLACK: usize = 64;

#[derive(Debug, Clone, Copy)]
struct Codes {
    invalid: WarningCode,
    too_short: WarningCode,
    mismatch: WarningCode,
    truncated: WarningCode,
}

const FAT_CODES: Codes = Codes {
    invalid: WarningCode::FatChainInvalid,
    too_short: WarningCode::FatChainTooShort,
    mismatch: WarningCode::FatChainLengthMismatch,
    truncated: WarningCode::FatSectorReadFailed,
};

const MINI_FAT_CODES: Codes = Codes {
    invalid: WarningCode::MiniFatChainInvalid,
    too_short: WarningCode::MiniFatChainTooShort,
    mismatch: WarningCode::MiniFatChainLengthMismatch,
    truncated: WarningCode::MiniStreamTruncated,
};

/// The address space a chain indexes into.
#[derive(Debug, Clone, Copy)]
struct SectorSpace<'a> {
    data: &'a [u8],
    sector_size: usize,
    /// Byte offset of sector 0: one header sector for the file, zero for the mini stream.
    base: usize,
}

impl SectorSpace<'_> {
    fn slice(&self, sector: u32, len: usize) -> Option<&[u8]> {
        let start = (sector as usize).checked_mul(self.sector_size)?.checked_add(self.base)?;
        self.data.get(start..start.checked_add(len)?)
    }
}

/// Reads `declared_size` bytes of a stream stored in regular sectors.
pub(crate) fn read_from_fat(
    bytes: &[u8],
    fat: &[SectorType],
    sector_size: usize,
    start: SectorType,
    declared_size: u64,
    location: &str,
    reporter: &Reporter,
) -> OleResult<Vec<u8>> {
    let space = SectorSpace { data: bytes, sector_size, base: sector_size };
    read_chain(space, fat, start, declared_size, FAT_CODES, location, reporter)
}

/// Reads `declared_size` bytes of a stream stored in the mini stream.
pub(crate) fn read_from_mini_fat(
    mini_stream: &[u8],
    mini_fat: &[SectorType],
    mini_sector_size: usize,
    start: SectorType,
    declared_size: u64,
    location: &str,
    reporter: &Reporter,
) -> OleResult<Vec<u8>> {
    let space = SectorSpace { data: mini_stream, sector_size: mini_sector_size, base: 0 };
    read_chain(space, mini_fat, start, declared_size, MINI_FAT_CODES, location, reporter)
}

fn read_chain(
    space: SectorSpace,
    table: &[SectorType],
    start: SectorType,
    declared_size: u64,
    codes: Codes,
    location: &str,
    reporter: &Reporter,
) -> OleResult<Vec<u8>> {
    let size = checked_size(declared_size, location)?;
    if size == 0 {
        return Ok(Vec::new());
    }
    if start == SectorType::EndOfChain {
        return Err(OleError::chain(
            codes.invalid,
            format!("{}: {} bytes declared but the chain is empty", location, size),
        ));
    }

    let required = size.div_ceil(space.sector_size);
    if required > table.len() {
        return Err(OleError::chain(
            codes.too_short,
            format!("{}: needs {} sectors but the table has {} entries", location, required, table.len()),
        ));
    }

    let (chain, broken) = match walk_chain(table, start, required + CHAIN_SLACK) {
        Ok(chain) => (chain, false),
        Err(ChainError::TooLong { start, max_steps }) => {
            return Err(OleError::ChainTooLong { start, max_steps });
        }
        Err(err) if err.partial().len() >= required => {
            reporter.inconsistency(
                CfbWarning::new(codes.invalid, location, err.to_string())
                    .with_meta("required", required as u64)
                    .with_meta("walked", err.partial().len() as u64),
            )?;
            (err.partial().to_vec(), true)
        }
        Err(err) => {
            return Err(OleError::chain(codes.invalid, format!("{}: {}", location, err)));
        }
    };

    if chain.len() < required {
        return Err(OleError::chain(
            codes.too_short,
            format!("{}: chain has {} sectors, {} bytes need {}", location, chain.len(), size, required),
        ));
    }
    if chain.len() > required && !broken {
        reporter.inconsistency(
            CfbWarning::new(
                codes.mismatch,
                location,
                format!("chain has {} sectors, {} bytes need {}", chain.len(), size, required),
            )
            .with_meta("expected", required as u64)
            .with_meta("actual", chain.len() as u64),
        )?;
    }

    let mut data = Vec::with_capacity(size);
    for &sector in &chain[..required] {
        let take = (size - data.len()).min(space.sector_size);
        let buf = space.slice(sector, take).ok_or_else(|| {
            OleError::chain(
                codes.truncated,
                format!("{}: sector {} lies beyond the {} available bytes", location, sector, space.data.len()),
            )
        })?;
        data.extend_from_slice(buf);
    }
    Ok(data)
}
