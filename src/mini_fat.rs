use binrw::BinRead;
use std::io::Cursor;
use crate::common::{OleError, OleResult, SectorType};
use crate::directory::DirectoryEntry;
use crate::header::Header;
use crate::options::Reporter;
use crate::stream::read_from_fat;

/// mini fat sector
/// https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-cfb/c5d235f7-b73c-4ec5-bf8d-5c08306cd023

#[derive(Debug, Clone, BinRead)]
#[br(little, import(entry_count: u16))]
pub struct MiniFat {
    #[br(count = entry_count)]
    pub entries: Vec<SectorType>,
}

/// Reads the MiniFAT through the FAT. Returns `None` when the header names no MiniFAT.
pub(crate) fn build_mini_fat(
    bytes: &[u8],
    header: &Header,
    fat: &[SectorType],
    reporter: &Reporter,
) -> OleResult<Option<Vec<SectorType>>> {
    let start = header.first_mini_fat_sector_location;
    if start.regular().is_none() {
        return Ok(None);
    }
    if header.number_of_mini_fat_sectors == 0 {
        reporter.anomaly(format!("MiniFAT starts at sector {} but no MiniFAT sectors are declared", start))?;
        return Ok(None);
    }

    let sector_size = header.sector_size();
    let size = header.number_of_mini_fat_sectors as u64 * sector_size as u64;
    let raw = read_from_fat(bytes, fat, sector_size, start, size, "MiniFAT", reporter)?;

    let entry_count = (sector_size / 4) as u16;
    let mut table = Vec::with_capacity(raw.len() / 4);
    for chunk in raw.chunks(sector_size) {
        let MiniFat { entries } = MiniFat::read_args(&mut Cursor::new(chunk), (entry_count,))?;
        table.extend(entries);
    }
    log::debug!("MiniFAT has {} entries", table.len());
    Ok(Some(table))
}

/// The mini stream is the Root Entry's own stream, always stored in regular sectors.
pub(crate) fn load_mini_stream(
    bytes: &[u8],
    header: &Header,
    fat: &[SectorType],
    root: &DirectoryEntry,
    reporter: &Reporter,
) -> OleResult<Vec<u8>> {
    if !root.is_root() {
        return Err(OleError::InvalidRootEntry(format!("entry 0 is a {}", root.object_type)));
    }
    let data = read_from_fat(
        bytes,
        fat,
        header.sector_size(),
        root.starting_sector_location,
        root.stream_size,
        "mini stream",
        reporter,
    )?;
    if data.len() % header.mini_sector_size() != 0 {
        log::debug!("mini stream length {} is not a multiple of the mini sector size", data.len());
    }
    Ok(data)
}
