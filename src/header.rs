use crate::common::{MajorVersion, OleError, OleResult, SectorShift, SectorType};
use crate::options::Reporter;
use binrw::BinRead;
use std::fmt::{Display, Formatter};
use std::io::Cursor;

/// header
/// https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-cfb/05060311-bfce-4b12-874d-71fd4ce63aea

pub const SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
pub const HEADER_SIZE: usize = 512;
pub const HEADER_DIFAT_ENTRIES: usize = 109;
pub const MINI_SECTOR_SHIFT: u16 = 6;
pub const DEFAULT_MINI_STREAM_CUTOFF: u32 = 0x1000;
const BYTE_ORDER_MARK: u16 = 0xFFFE;

#[derive(Debug, Clone, BinRead)]
#[br(little, magic(0xE11AB1A1E011CFD0u64))]
struct RawHeader {
    // Header CLSID (16 bytes): Reserved and unused class ID that MUST be set to all zeroes (CLSID_NULL).
    clsid: [u8; 16],
    // Minor Version (2 bytes): SHOULD be 0x003E.
    minor_version: u16,
    // Major Version (2 bytes): MUST be 0x0003 or 0x0004.
    major_version: u16,
    // Byte Order (2 bytes): MUST be 0xFFFE.
    byte_order: u16,
    // Sector Shift (2 bytes): 0x0009 for version 3, 0x000C for version 4.
    sector_shift: u16,
    // Mini Sector Shift (2 bytes): MUST be 0x0006.
    mini_sector_shift: u16,
    // Reserved (6 bytes).
    _reserved: [u8; 6],
    // Number of Directory Sectors (4 bytes): MUST be zero for version 3.
    number_of_directory_sectors: u32,
    number_of_fat_sectors: u32,
    first_directory_sector_location: SectorType,
    // Transaction Signature Number (4 bytes): zero if transactions are not implemented.
    transaction_signature_number: u32,
    // Mini Stream Cutoff Size (4 bytes): MUST be 0x00001000.
    mini_stream_cutoff_size: u32,
    first_mini_fat_sector_location: SectorType,
    number_of_mini_fat_sectors: u32,
    first_difat_sector_location: SectorType,
    number_of_difat_sectors: u32,
    // DIFAT (436 bytes): the first 109 FAT sector locations.
    difat_entries: [SectorType; HEADER_DIFAT_ENTRIES],
}

/// The validated compound file header.
#[derive(Debug, Clone)]
pub struct Header {
    pub clsid: [u8; 16],
    pub minor_version: u16,
    pub major_version: MajorVersion,
    pub sector_shift: SectorShift,
    pub mini_sector_shift: u16,
    /// Always zero for version 3 files.
    pub number_of_directory_sectors: u32,
    pub number_of_fat_sectors: u32,
    pub first_directory_sector_location: SectorType,
    pub transaction_signature_number: u32,
    pub mini_stream_cutoff_size: u32,
    pub first_mini_fat_sector_location: SectorType,
    pub number_of_mini_fat_sectors: u32,
    pub first_difat_sector_location: SectorType,
    pub number_of_difat_sectors: u32,
    pub difat_entries: [SectorType; HEADER_DIFAT_ENTRIES],
}

impl Header {
    /// Decodes and validates the header at the start of `bytes`.
    ///
    /// The signature, sector shift, mini sector shift and major version are
    /// always checked. The CLSID, byte order mark, version/shift pairing and
    /// mini stream cutoff only fail in strict mode.
    pub(crate) fn parse(bytes: &[u8], reporter: &Reporter) -> OleResult<Self> {
        if bytes.len() < SIGNATURE.len() || bytes[..SIGNATURE.len()] != SIGNATURE {
            return Err(OleError::InvalidSignature);
        }
        if bytes.len() < HEADER_SIZE {
            return Err(OleError::TruncatedHeader(bytes.len()));
        }

        let raw = RawHeader::read(&mut Cursor::new(&bytes[..HEADER_SIZE]))?;

        let sector_shift = SectorShift::from_raw(raw.sector_shift)
            .ok_or(OleError::InvalidSectorShift(raw.sector_shift))?;
        if raw.mini_sector_shift != MINI_SECTOR_SHIFT {
            return Err(OleError::InvalidMiniSectorShift(raw.mini_sector_shift));
        }
        let major_version = MajorVersion::from_raw(raw.major_version)
            .ok_or(OleError::UnsupportedVersion(raw.major_version))?;

        if raw.clsid != [0u8; 16] {
            reporter.anomaly("header CLSID is not null".to_string())?;
        }
        if raw.byte_order != BYTE_ORDER_MARK {
            reporter.anomaly(format!("byte order set to {:#06x} instead of {:#06x}", raw.byte_order, BYTE_ORDER_MARK))?;
        }
        if major_version.expected_sector_shift() != sector_shift {
            reporter.anomaly(format!(
                "major version {} with a sector size of {} bytes",
                major_version,
                sector_shift.sector_size()
            ))?;
        }
        if raw.mini_stream_cutoff_size != DEFAULT_MINI_STREAM_CUTOFF {
            reporter.anomaly(format!(
                "mini stream cutoff is {:#x} instead of {:#x}",
                raw.mini_stream_cutoff_size, DEFAULT_MINI_STREAM_CUTOFF
            ))?;
        }

        let number_of_directory_sectors = match major_version {
            MajorVersion::Version3 => 0,
            MajorVersion::Version4 => raw.number_of_directory_sectors,
        };

        Ok(Self {
            clsid: raw.clsid,
            minor_version: raw.minor_version,
            major_version,
            sector_shift,
            mini_sector_shift: raw.mini_sector_shift,
            number_of_directory_sectors,
            number_of_fat_sectors: raw.number_of_fat_sectors,
            first_directory_sector_location: raw.first_directory_sector_location,
            transaction_signature_number: raw.transaction_signature_number,
            mini_stream_cutoff_size: raw.mini_stream_cutoff_size,
            first_mini_fat_sector_location: raw.first_mini_fat_sector_location,
            number_of_mini_fat_sectors: raw.number_of_mini_fat_sectors,
            first_difat_sector_location: raw.first_difat_sector_location,
            number_of_difat_sectors: raw.number_of_difat_sectors,
            difat_entries: raw.difat_entries,
        })
    }

    pub fn sector_size(&self) -> usize {
        self.sector_shift.sector_size()
    }

    pub fn mini_sector_size(&self) -> usize {
        1 << self.mini_sector_shift
    }
}

impl Display for Header {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "version: {}, sector size: {}, fat sectors: {}, difat sectors: {}, mini fat sectors: {}",
            self.major_version,
            self.sector_size(),
            self.number_of_fat_sectors,
            self.number_of_difat_sectors,
            self.number_of_mini_fat_sectors
        )
    }
}

/// Returns true if `bytes` starts with the compound file signature.
pub fn is_cfb(bytes: &[u8]) -> bool {
    bytes.len() >= HEADER_SIZE && bytes[..SIGNATURE.len()] == SIGNATURE
}
