use crate::common::{sector_slice, OleError, OleResult, SectorType};
use crate::header::Header;
use crate::options::{CfbWarning, Reporter, WarningCode};
use binrw::BinRead;
use std::io::Cursor;

/// fat sector
/// https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-cfb/30e1013a-a0ff-4404-9ccf-d75d835ff404
#[derive(Debug, Clone, BinRead)]
#[br(little, import(entry_count: u16))]
pub struct Fat {
    #[br(count = entry_count)]
    pub entries: Vec<SectorType>,
}

/// Decodes one table sector (FAT or MiniFAT) into its slots.
pub(crate) fn decode_table_sector(buf: &[u8]) -> OleResult<Vec<SectorType>> {
    let count = (buf.len() / 4) as u16;
    Ok(Fat::read_args(&mut Cursor::new(buf), (count,))?.entries)
}

/// Concatenates the FAT sectors named by `difat`, in order.
pub(crate) fn build_fat(bytes: &[u8], header: &Header, difat: &[u32], reporter: &Reporter) -> OleResult<Vec<SectorType>> {
    let sector_size = header.sector_size();
    let mut fat = Vec::with_capacity(difat.len() * (sector_size / 4));

    for &sector in difat {
        let location = format!("FAT sector {}", sector);
        let buf = sector_slice(bytes, sector_size, sector).ok_or_else(|| {
            OleError::chain(WarningCode::FatSectorReadFailed, format!("{} is outside the file", location))
        })?;

        if buf.len() == sector_size {
            fat.extend(decode_table_sector(buf)?);
        } else {
            reporter.inconsistency(
                CfbWarning::new(
                    WarningCode::FatSectorReadFailed,
                    location,
                    format!("file ends {} bytes into the sector", buf.len()),
                )
                .with_meta("available", buf.len() as u64)
                .with_meta("sector_size", sector_size as u64),
            )?;
            let mut padded = vec![0xFF; sector_size];
            padded[..buf.len()].copy_from_slice(buf);
            fat.extend(decode_table_sector(&padded)?);
        }
    }

    log::debug!("FAT has {} entries from {} sectors", fat.len(), difat.len());
    Ok(fat)
}
