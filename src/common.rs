use std::fmt::{Display, Formatter};
use binrw::BinRead;
use thiserror::Error;
use crate::options::WarningCode;

pub const MAX_REG_SECT: u32 = 0xFFFFFFFA;
pub const NOT_APPLICABLE: u32 = 0xFFFFFFFB;
pub const DIF_SECT: u32 = 0xFFFFFFFC;
pub const FAT_SECT: u32 = 0xFFFFFFFD;
pub const END_OF_CHAIN: u32 = 0xFFFFFFFE;
pub const FREE_SECT: u32 = 0xFFFFFFFF;

/// Largest stream size accepted before any buffer is allocated (2^53 - 1).
pub const MAX_SAFE_SIZE: u64 = (1 << 53) - 1;

/// One slot of a FAT or MiniFAT, or a sector reference held elsewhere.
///
/// REGSECT 0x00000000 - 0xFFFFFFF9 Regular sector number.
///
/// MAXREGSECT 0xFFFFFFFA Maximum regular sector number.
///
/// Not applicable 0xFFFFFFFB Reserved for future use.
///
/// DIFSECT 0xFFFFFFFC Specifies a DIFAT sector in the FAT.
///
/// FATSECT 0xFFFFFFFD Specifies a FAT sector in the FAT.
///
/// ENDOFCHAIN 0xFFFFFFFE End of a linked chain of sectors.
///
/// FREESECT 0xFFFFFFFF Specifies an unallocated sector in the FAT, Mini FAT, or DIFAT.
#[derive(BinRead, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[br(little)]
pub enum SectorType {
    #[br(magic(0xFFFFFFFAu32))]
    MaxRegSect,
    #[br(magic(0xFFFFFFFBu32))]
    NotApplicable,
    #[br(magic(0xFFFFFFFCu32))]
    DifSect,
    #[br(magic(0xFFFFFFFDu32))]
    FatSect,
    #[default]
    #[br(magic(0xFFFFFFFEu32))]
    EndOfChain,
    #[br(magic(0xFFFFFFFFu32))]
    FreeSect,
    RegularSect(u32),
}

impl SectorType {
    pub fn from_raw(value: u32) -> Self {
        match value {
            MAX_REG_SECT => SectorType::MaxRegSect,
            NOT_APPLICABLE => SectorType::NotApplicable,
            DIF_SECT => SectorType::DifSect,
            FAT_SECT => SectorType::FatSect,
            END_OF_CHAIN => SectorType::EndOfChain,
            FREE_SECT => SectorType::FreeSect,
            v => SectorType::RegularSect(v),
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            SectorType::MaxRegSect => MAX_REG_SECT,
            SectorType::NotApplicable => NOT_APPLICABLE,
            SectorType::DifSect => DIF_SECT,
            SectorType::FatSect => FAT_SECT,
            SectorType::EndOfChain => END_OF_CHAIN,
            SectorType::FreeSect => FREE_SECT,
            SectorType::RegularSect(v) => v,
        }
    }

    /// Returns the sector number if this slot points at a regular sector.
    pub fn regular(self) -> Option<u32> {
        match self {
            SectorType::RegularSect(v) => Some(v),
            _ => None,
        }
    }
}

impl From<u32> for SectorType {
    fn from(value: u32) -> Self {
        SectorType::from_raw(value)
    }
}

impl Display for SectorType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SectorType::MaxRegSect => write!(f, "MaxRegSect"),
            SectorType::NotApplicable => write!(f, "NotApplicable"),
            SectorType::DifSect => write!(f, "DifatSect"),
            SectorType::FatSect => write!(f, "FatSect"),
            SectorType::EndOfChain => write!(f, "EndOfChain"),
            SectorType::FreeSect => write!(f, "FreeSect"),
            SectorType::RegularSect(v) => write!(f, "{}", v)
        }
    }
}

#[derive(Debug, Eq, PartialEq, Copy, Clone, Default)]
pub enum MajorVersion {
    #[default]
    Version3,
    Version4,
}

impl MajorVersion {
    pub fn from_raw(value: u16) -> Option<Self> {
        match value {
            3 => Some(MajorVersion::Version3),
            4 => Some(MajorVersion::Version4),
            _ => None,
        }
    }

    /// Sector shift the format mandates for this version.
    pub fn expected_sector_shift(&self) -> SectorShift {
        match self {
            MajorVersion::Version3 => SectorShift::Shift9,
            MajorVersion::Version4 => SectorShift::Shift12,
        }
    }
}

impl Display for MajorVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MajorVersion::Version3 => write!(f, "3"),
            MajorVersion::Version4 => write!(f, "4"),
        }
    }
}

#[derive(Debug, Eq, PartialEq, Copy, Clone, Default)]
pub enum SectorShift {
    #[default]
    Shift9,
    Shift12,
}

impl SectorShift {
    pub fn from_raw(value: u16) -> Option<Self> {
        match value {
            9 => Some(SectorShift::Shift9),
            12 => Some(SectorShift::Shift12),
            _ => None,
        }
    }

    pub fn sector_size(&self) -> usize {
        match self {
            SectorShift::Shift9 => 512,
            SectorShift::Shift12 => 4096,
        }
    }
}

/// Broad classification of an [`OleError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The input is not a well-formed compound file.
    Format,
    /// The input is structurally valid but uses something this crate does not handle.
    Unsupported,
}

#[derive(Debug, Error)]
pub enum OleError {
    #[error("Invalid File Format: header signature mismatch")]
    InvalidSignature,
    #[error("Invalid File Format: buffer of {0} bytes is shorter than the 512-byte header")]
    TruncatedHeader(usize),
    #[error("Invalid File Format: {0}")]
    InvalidHeader(String),
    #[error("Invalid sector shift {0}, expected 9 or 12")]
    InvalidSectorShift(u16),
    #[error("Invalid mini sector shift {0}, expected 6")]
    InvalidMiniSectorShift(u16),
    #[error("Unsupported major version {0}")]
    UnsupportedVersion(u16),
    #[error("Invalid Difat: {0}")]
    InvalidDifat(String),
    #[error("{code}: {message}")]
    Chain { code: WarningCode, message: String },
    #[error("Chain starting at sector {start} exceeds {max_steps} steps")]
    ChainTooLong { start: u32, max_steps: usize },
    #[error("Directory stream is missing or empty")]
    EmptyDirectory,
    #[error("Invalid root entry: {0}")]
    InvalidRootEntry(String),
    #[error("Path not found: {0}")]
    PathNotFound(String),
    #[error("Not a stream: {0}")]
    NotAStream(String),
    #[error("Declared size {size} of {what} is too large to address")]
    SizeTooLarge { what: String, size: u64 },
    #[error("Parse Error")]
    ParseError(#[from] binrw::Error),
}

impl OleError {
    pub(crate) fn chain(code: WarningCode, message: impl Into<String>) -> Self {
        OleError::Chain { code, message: message.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            OleError::UnsupportedVersion(_) => ErrorKind::Unsupported,
            _ => ErrorKind::Format,
        }
    }

    /// The inconsistency code behind a chain or sector failure, if any.
    pub fn code(&self) -> Option<WarningCode> {
        match self {
            OleError::Chain { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type OleResult<T> = Result<T, OleError>;

/// Converts a declared 64-bit size into an addressable length.
pub(crate) fn checked_size(size: u64, what: impl Display) -> OleResult<usize> {
    if size > MAX_SAFE_SIZE {
        return Err(OleError::SizeTooLarge { what: what.to_string(), size });
    }
    usize::try_from(size).map_err(|_| OleError::SizeTooLarge { what: what.to_string(), size })
}

/// Returns the bytes of sector `index`, or `None` if it starts past the end of `bytes`.
///
/// The returned slice is shorter than `sector_size` when the file ends mid-sector.
pub(crate) fn sector_slice(bytes: &[u8], sector_size: usize, index: u32) -> Option<&[u8]> {
    let start = (index as usize).checked_add(1)?.checked_mul(sector_size)?;
    if start >= bytes.len() {
        return None;
    }
    let end = bytes.len().min(start + sector_size);
    Some(&bytes[start..end])
}
