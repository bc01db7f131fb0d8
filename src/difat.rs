use crate::common::{sector_slice, OleError, OleResult, SectorType};
use crate::header::{Header, HEADER_DIFAT_ENTRIES};
use crate::options::Reporter;
use binrw::BinRead;
use fixedbitset::FixedBitSet;
use std::io::Cursor;

/// difat sector
/// https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-cfb/0afa4e43-b18f-432a-9917-4f276eca7a73

#[derive(Debug, Clone, BinRead)]
#[br(little, import(entry_count: u16))]
pub struct Difat {
    #[br(count = entry_count)]
    pub entries: Vec<SectorType>,
    pub next: SectorType,
}

/// Collects the FAT sector numbers in order: the header's inline entries,
/// then the DIFAT sector chain when the FAT has more than 109 sectors.
pub(crate) fn build_difat(bytes: &[u8], header: &Header, reporter: &Reporter) -> OleResult<Vec<u32>> {
    let mut difat: Vec<u32> = header.difat_entries.iter().map_while(|e| e.regular()).collect();
    let wanted = header.number_of_fat_sectors as usize;

    if wanted > HEADER_DIFAT_ENTRIES {
        let sector_size = header.sector_size();
        let entry_count = (sector_size / 4 - 1) as u16;
        let declared = header.number_of_difat_sectors as usize;
        let mut visited = FixedBitSet::with_capacity(bytes.len() / sector_size + 1);
        let mut current = header.first_difat_sector_location;
        let mut walked = 0usize;

        loop {
            let sector = match current {
                SectorType::EndOfChain | SectorType::FreeSect => break,
                SectorType::RegularSect(sector) => sector,
                other => return Err(OleError::InvalidDifat(format!("unexpected {} in DIFAT chain", other))),
            };
            if walked == declared {
                reporter.tolerate(OleError::InvalidDifat(format!(
                    "chain continues past the {} declared DIFAT sectors",
                    declared
                )))?;
                break;
            }
            let buf = sector_slice(bytes, sector_size, sector)
                .filter(|s| s.len() == sector_size)
                .ok_or_else(|| OleError::InvalidDifat(format!("DIFAT sector {} is outside the file", sector)))?;
            if visited.put(sector as usize) {
                return Err(OleError::InvalidDifat(format!("DIFAT sector {} is visited twice", sector)));
            }

            let Difat { entries, next } = Difat::read_args(&mut Cursor::new(buf), (entry_count,))?;
            let before = difat.len();
            difat.extend(entries.iter().map_while(|e| e.regular()));
            walked += 1;
            if difat.len() - before < entries.len() && next.regular().is_some() {
                reporter.tolerate(OleError::InvalidDifat(format!(
                    "DIFAT sector {} has a free slot but the chain continues",
                    sector
                )))?;
                break;
            }
            current = next;
        }

        if walked < declared {
            reporter.tolerate(OleError::InvalidDifat(format!(
                "chain ends after {} of {} declared DIFAT sectors",
                walked, declared
            )))?;
        }
    } else if header.first_difat_sector_location.regular().is_some() {
        log::debug!("ignoring DIFAT chain, {} FAT sectors fit in the header", wanted);
    }

    if difat.len() > wanted {
        difat.truncate(wanted);
    } else if difat.len() < wanted {
        reporter.tolerate(OleError::InvalidDifat(format!(
            "found {} FAT sectors, header declares {}",
            difat.len(),
            wanted
        )))?;
    }
    Ok(difat)
}
