use crate::common::{OleError, OleResult, SectorType};
use crate::difat::build_difat;
use crate::directory::{parse_directory, Directory, DirectoryEntry};
use crate::fat::build_fat;
use crate::header::Header;
use crate::mini_fat::{build_mini_fat, load_mini_stream};
use crate::options::{CfbOptions, Reporter, WarningCode};
use crate::stream::{read_from_fat, read_from_mini_fat};
use fixedbitset::FixedBitSet;
use std::fmt::{Display, Formatter};

/// A parsed compound file. Construction reads every table up front; streams
/// are read on demand and the file is never modified.
#[derive(Debug, Clone)]
pub struct CfbFile {
    bytes: Vec<u8>,
    header: Header,
    fat: Vec<SectorType>,
    mini_fat: Option<Vec<SectorType>>,
    mini_stream: Option<Vec<u8>>,
    directory: Directory,
    options: CfbOptions,
}

/// Parses `bytes` as a compound file.
pub fn open_cfb(bytes: impl Into<Vec<u8>>, options: CfbOptions) -> OleResult<CfbFile> {
    let bytes = bytes.into();
    let reporter = Reporter::from_options(&options);

    let header = Header::parse(&bytes, &reporter)?;
    log::debug!("{}", header);
    let difat = build_difat(&bytes, &header, &reporter)?;
    let fat = build_fat(&bytes, &header, &difat, &reporter)?;
    let directory = parse_directory(&bytes, &header, &fat, &reporter)?;
    let mini_fat = build_mini_fat(&bytes, &header, &fat, &reporter)?;
    let mini_stream = match mini_fat {
        Some(_) => {
            let stream = load_mini_stream(&bytes, &header, &fat, directory.root(), &reporter)?;
            log::debug!("mini stream is {} bytes", stream.len());
            Some(stream)
        }
        None => None,
    };

    Ok(CfbFile { bytes, header, fat, mini_fat, mini_stream, directory, options })
}

impl CfbFile {
    /// Opens with the default, lenient options.
    pub fn open(bytes: impl Into<Vec<u8>>) -> OleResult<Self> {
        open_cfb(bytes, CfbOptions::default())
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn root_entry(&self) -> &DirectoryEntry {
        self.directory.root()
    }

    /// Every decoded directory slot, unused ones included.
    pub fn entries(&self) -> &[DirectoryEntry] {
        self.directory.entries()
    }

    pub fn entry(&self, path: &[&str]) -> OleResult<&DirectoryEntry> {
        self.directory.resolve(path)
    }

    pub fn exists(&self, path: &[&str]) -> bool {
        self.directory.resolve(path).is_ok()
    }

    /// The entries directly inside the storage at `path`, in sibling-tree order.
    pub fn children(&self, path: &[&str]) -> OleResult<Vec<&DirectoryEntry>> {
        let storage = self.directory.resolve(path)?;
        if !storage.is_storage() {
            return Err(OleError::PathNotFound(path.join("/")));
        }
        Ok(self
            .directory
            .siblings(storage.child())
            .into_iter()
            .filter_map(|id| self.directory.get(id))
            .filter(|entry| !entry.is_unused())
            .collect())
    }

    /// Every stream reachable from the root, depth first in sibling-tree order,
    /// each as its path components.
    pub fn list_streams(&self) -> Vec<Vec<String>> {
        let mut visited = FixedBitSet::with_capacity(self.directory.len());
        visited.insert(0);
        let mut out = Vec::new();
        let mut stack: Vec<(u32, Vec<String>)> = self
            .directory
            .siblings(self.root_entry().child())
            .into_iter()
            .rev()
            .map(|id| (id, Vec::new()))
            .collect();
        while let Some((id, prefix)) = stack.pop() {
            if visited.put(id as usize) {
                continue;
            }
            let Some(entry) = self.directory.get(id) else { continue };
            if entry.is_unused() {
                continue;
            }
            let mut path = prefix;
            path.push(entry.name.clone());
            if entry.is_stream() {
                out.push(path);
            } else if entry.is_storage() {
                for child in self.directory.siblings(entry.child()).into_iter().rev() {
                    stack.push((child, path.clone()));
                }
            }
        }
        out
    }

    /// Reads the full contents of the stream at `path`.
    pub fn read_stream(&self, path: &[&str]) -> OleResult<Vec<u8>> {
        let entry = self.directory.resolve(path)?;
        if !entry.is_stream() {
            return Err(OleError::NotAStream(path.join("/")));
        }
        self.read_entry(entry, &path.join("/"))
    }

    fn read_entry(&self, entry: &DirectoryEntry, name: &str) -> OleResult<Vec<u8>> {
        let reporter = Reporter::from_options(&self.options);
        let location = format!("stream \"{}\"", name);
        if entry.stream_size == 0 {
            return Ok(Vec::new());
        }

        if entry.stream_size >= self.header.mini_stream_cutoff_size as u64 {
            return read_from_fat(
                &self.bytes,
                &self.fat,
                self.header.sector_size(),
                entry.starting_sector_location,
                entry.stream_size,
                &location,
                &reporter,
            );
        }

        let (Some(mini_fat), Some(mini_stream)) = (&self.mini_fat, &self.mini_stream) else {
            return Err(OleError::chain(
                WarningCode::MiniFatChainInvalid,
                format!("{}: {} bytes belong in the mini stream but the file has no MiniFAT", location, entry.stream_size),
            ));
        };
        read_from_mini_fat(
            mini_stream,
            mini_fat,
            self.header.mini_sector_size(),
            entry.starting_sector_location,
            entry.stream_size,
            &location,
            &reporter,
        )
    }
}

impl Display for CfbFile {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n", self.header)?;
        for entry in self.directory.entries().iter().filter(|e| !e.is_unused()) {
            write!(f, "{}\n", entry)?;
        }
        Ok(())
    }
}
