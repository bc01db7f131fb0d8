use crate::chain::{walk_chain, ChainError};
use crate::common::{sector_slice, MajorVersion, OleError, OleResult, SectorType};
use crate::header::Header;
use crate::options::{Reporter, WarningCode};
use binrw::{binread, BinRead};
use chrono::{DateTime, Utc};
use encoding_rs::UTF_16LE;
use fixedbitset::FixedBitSet;
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::io::Cursor;

/// directory sector
/// https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-cfb/a94d7445-c4be-49cd-b6b9-2f4abc663817

pub const MAX_REG_SID: u32 = 0xFFFFFFFA;
pub const NO_STREAM: u32 = 0xFFFFFFFF;
pub const ENTRY_SIZE: usize = 128;

/// Seconds between 1601-01-01 (FILETIME epoch) and 1970-01-01.
const FILETIME_UNIX_OFFSET: i64 = 11_644_473_600;

#[binread]
#[derive(Debug, Clone)]
#[br(little, import(entry_id: u32, version: MajorVersion))]
pub struct DirectoryEntry {
    #[br(calc = entry_id)]
    pub id: u32,
    // Directory Entry Name (64 bytes): UTF-16 string terminated by a null character, at most 32 code
    // points including the terminator. Compared with a special case-insensitive uppercase mapping.
    #[br(temp)]
    raw_name: [u8; 64],
    // Directory Entry Name Length (2 bytes): length of the name in bytes, including the terminator.
    #[br(temp)]
    name_length: u16,
    #[br(calc = decode_name(&raw_name, name_length))]
    pub name: String,
    // Object Type (1 byte): 0x00, 0x01, 0x02 or 0x05. All other values are not valid.
    #[br(map = |v: u8| ObjectType::from(v))]
    pub object_type: ObjectType,
    // Color Flag (1 byte): 0x00 (red) or 0x01 (black).
    #[br(map = |v: u8| Color::from(v))]
    pub color: Color,
    // Left / Right Sibling ID and Child ID (4 bytes each): NOSTREAM (0xFFFFFFFF) when absent.
    pub left_sibling_id: u32,
    pub right_sibling_id: u32,
    pub child_id: u32,
    // CLSID (16 bytes): object class GUID of a storage, all zeroes for streams.
    pub clsid: [u8; 16],
    pub state_bits: u32,
    // Creation / Modified Time (8 bytes each): FILETIME in UTC, zero when not recorded.
    pub creation_time: u64,
    pub modified_time: u64,
    // Starting Sector Location (4 bytes): first sector of a stream; for the root, first sector of the mini stream.
    pub starting_sector_location: SectorType,
    // Stream Size (8 bytes): only the low 32 bits are meaningful in version 3 files, older writers
    // left garbage in the high half.
    #[br(map = |size: u64| match version {
        MajorVersion::Version3 => size & 0xFFFF_FFFF,
        MajorVersion::Version4 => size,
    })]
    pub stream_size: u64,
}

fn decode_name(raw: &[u8; 64], name_length: u16) -> String {
    let len = (name_length as usize).min(raw.len()) & !1;
    let (name, _) = UTF_16LE.decode_without_bom_handling(&raw[..len]);
    match name.find('\0') {
        Some(end) => name[..end].to_string(),
        None => name.into_owned(),
    }
}

fn sibling(id: u32) -> Option<u32> {
    (id <= MAX_REG_SID).then_some(id)
}

fn filetime(value: u64) -> Option<DateTime<Utc>> {
    if value == 0 {
        return None;
    }
    let secs = (value / 10_000_000) as i64 - FILETIME_UNIX_OFFSET;
    let nanos = (value % 10_000_000) as u32 * 100;
    DateTime::from_timestamp(secs, nanos)
}

impl DirectoryEntry {
    pub fn is_stream(&self) -> bool {
        self.object_type == ObjectType::Stream
    }

    pub fn is_storage(&self) -> bool {
        matches!(self.object_type, ObjectType::Storage | ObjectType::RootStorage)
    }

    pub fn is_root(&self) -> bool {
        self.object_type == ObjectType::RootStorage
    }

    /// Unallocated slots are skipped by path lookup.
    pub fn is_unused(&self) -> bool {
        self.object_type == ObjectType::Unknown || self.name.is_empty()
    }

    pub fn left(&self) -> Option<u32> {
        sibling(self.left_sibling_id)
    }

    pub fn right(&self) -> Option<u32> {
        sibling(self.right_sibling_id)
    }

    pub fn child(&self) -> Option<u32> {
        if self.is_storage() { sibling(self.child_id) } else { None }
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        filetime(self.creation_time)
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        filetime(self.modified_time)
    }

    /// Formats the CLSID as `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`, or `None` when it is null.
    pub fn clsid_string(&self) -> Option<String> {
        let b = &self.clsid;
        if b.iter().all(|&v| v == 0) {
            return None;
        }
        Some(format!(
            "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            u16::from_le_bytes([b[4], b[5]]),
            u16::from_le_bytes([b[6], b[7]]),
            b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
        ))
    }
}

impl Display for DirectoryEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "name: {},\ttype: {},\tcolor: {},\tsize: {}\n", self.name, self.object_type, self.color, self.stream_size)?;
        write!(f, "left sibling: {:?},\tright sibling: {:?},\tchild: {:?},\tstart: {}",
               self.left(), self.right(), self.child(), self.starting_sector_location)
    }
}

/// Maps a character the way CFB name comparison does: simple uppercase,
/// leaving characters whose uppercase form is not a single character alone.
fn upper(c: char) -> char {
    let mut up = c.to_uppercase();
    match (up.next(), up.next()) {
        (Some(u), None) => u,
        _ => c,
    }
}

/// Orders names the way the sibling red-black tree does: shorter first, then by uppercase code points.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    a.encode_utf16()
        .count()
        .cmp(&b.encode_utf16().count())
        .then_with(|| a.chars().map(upper).cmp(b.chars().map(upper)))
}

pub fn names_equal(a: &str, b: &str) -> bool {
    compare_names(a, b) == Ordering::Equal
}

/// Every directory entry, addressed by id. Entry 0 is the root.
#[derive(Debug, Clone)]
pub struct Directory {
    entries: Vec<DirectoryEntry>,
}

impl Directory {
    pub fn root(&self) -> &DirectoryEntry {
        &self.entries[0]
    }

    pub fn get(&self, id: u32) -> Option<&DirectoryEntry> {
        self.entries.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    /// The sibling tree rooted at `start`, in order.
    ///
    /// Ids out of range or already visited are skipped, so malformed and
    /// cyclic trees terminate.
    pub fn siblings(&self, start: Option<u32>) -> Vec<u32> {
        let mut visited = FixedBitSet::with_capacity(self.entries.len());
        let mut stack = Vec::new();
        let mut out = Vec::new();
        let mut current = start;
        loop {
            while let Some(id) = current {
                let Some(entry) = self.get(id) else { break };
                if visited.put(id as usize) {
                    break;
                }
                stack.push(id);
                current = entry.left();
            }
            let Some(id) = stack.pop() else { break };
            out.push(id);
            current = self.entries[id as usize].right();
        }
        out
    }

    /// Finds an allocated entry named `name` among the siblings reachable from `start`.
    pub fn find_sibling(&self, start: Option<u32>, name: &str) -> Option<&DirectoryEntry> {
        self.siblings(start)
            .into_iter()
            .map(|id| &self.entries[id as usize])
            .find(|entry| !entry.is_unused() && names_equal(&entry.name, name))
    }

    /// Resolves `path` from the root. An empty path is the root itself.
    pub fn resolve(&self, path: &[&str]) -> OleResult<&DirectoryEntry> {
        let mut current = self.root();
        for (depth, component) in path.iter().enumerate() {
            let not_found = || OleError::PathNotFound(path.join("/"));
            if depth > 0 && !current.is_storage() {
                return Err(not_found());
            }
            current = self.find_sibling(current.child(), component).ok_or_else(not_found)?;
        }
        Ok(current)
    }
}

/// Reads the directory chain and decodes every 128-byte entry.
pub(crate) fn parse_directory(
    bytes: &[u8],
    header: &Header,
    fat: &[SectorType],
    reporter: &Reporter,
) -> OleResult<Directory> {
    let start = header.first_directory_sector_location;
    if start.regular().is_none() {
        return Err(OleError::EmptyDirectory);
    }
    let chain = walk_chain(fat, start, fat.len()).map_err(|err| match err {
        ChainError::TooLong { start, max_steps } => OleError::ChainTooLong { start, max_steps },
        other => OleError::chain(WarningCode::FatChainInvalid, format!("directory: {}", other)),
    })?;
    if chain.is_empty() {
        return Err(OleError::EmptyDirectory);
    }
    if header.number_of_directory_sectors != 0 && header.number_of_directory_sectors as usize != chain.len() {
        reporter.anomaly(format!(
            "directory chain has {} sectors, header declares {}",
            chain.len(),
            header.number_of_directory_sectors
        ))?;
    }

    let sector_size = header.sector_size();
    let per_sector = sector_size / ENTRY_SIZE;
    let mut entries = Vec::with_capacity(chain.len() * per_sector);
    for sector in chain {
        let buf = sector_slice(bytes, sector_size, sector)
            .filter(|s| s.len() == sector_size)
            .ok_or_else(|| {
                OleError::chain(
                    WarningCode::FatSectorReadFailed,
                    format!("directory sector {} is outside the file", sector),
                )
            })?;
        let mut cursor = Cursor::new(buf);
        for _ in 0..per_sector {
            let id = entries.len() as u32;
            entries.push(DirectoryEntry::read_args(&mut cursor, (id, header.major_version))?);
        }
    }

    if !entries[0].is_root() {
        return Err(OleError::InvalidRootEntry(format!("entry 0 is a {}", entries[0].object_type)));
    }
    log::debug!("directory has {} entries", entries.len());
    Ok(Directory { entries })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Unknown,
    Storage,
    Stream,
    RootStorage,
}

impl From<u8> for ObjectType {
    fn from(value: u8) -> Self {
        match value {
            0x01 => ObjectType::Storage,
            0x02 => ObjectType::Stream,
            0x05 => ObjectType::RootStorage,
            _ => ObjectType::Unknown,
        }
    }
}

impl Display for ObjectType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectType::Unknown => write!(f, "unknown"),
            ObjectType::Storage => write!(f, "storage"),
            ObjectType::Stream => write!(f, "stream"),
            ObjectType::RootStorage => write!(f, "root storage")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Red,
    Black,
}

impl From<u8> for Color {
    fn from(value: u8) -> Self {
        if value == 0 { Color::Red } else { Color::Black }
    }
}

impl Display for Color {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Color::Red => write!(f, "red"),
            Color::Black => write!(f, "black")
        }
    }
}
