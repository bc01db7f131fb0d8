//! Test-only compound file encoder.
//!
//! Lays sectors out as `[FAT][DIFAT][directory][MiniFAT][mini stream][streams...]`,
//! each chain contiguous, and returns a [`Layout`] so tests can corrupt
//! specific slots afterwards.

use crate::common::{DIF_SECT, END_OF_CHAIN, FAT_SECT, FREE_SECT};

pub const NO_STREAM: u32 = 0xFFFFFFFF;
const MINI_SECTOR_SIZE: usize = 64;
const ENTRY_SIZE: usize = 128;

const STORAGE: u8 = 1;
const STREAM: u8 = 2;
const ROOT: u8 = 5;

struct Node {
    name: String,
    kind: u8,
    data: Vec<u8>,
    declared: u64,
    children: Vec<usize>,
}

pub struct CfbBuilder {
    version: u16,
    nodes: Vec<Node>,
    min_fat_sectors: usize,
    cutoff: u32,
}

#[derive(Debug, Clone)]
pub struct StreamLayout {
    pub entry_id: u32,
    pub mini: bool,
    pub sectors: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct Layout {
    pub sector_size: usize,
    pub fat_sectors: Vec<u32>,
    pub difat_sectors: Vec<u32>,
    pub directory_sectors: Vec<u32>,
    pub mini_fat_sectors: Vec<u32>,
    pub mini_stream_sectors: Vec<u32>,
    pub streams: Vec<(String, StreamLayout)>,
}

impl Layout {
    pub fn stream(&self, path: &str) -> &StreamLayout {
        &self.streams.iter().find(|(p, _)| p == path).expect("stream in layout").1
    }

    pub fn sector_offset(&self, sector: u32) -> usize {
        (sector as usize + 1) * self.sector_size
    }

    pub fn set_fat(&self, bytes: &mut [u8], index: u32, value: u32) {
        let per = self.sector_size / 4;
        let sector = self.fat_sectors[index as usize / per];
        let offset = self.sector_offset(sector) + (index as usize % per) * 4;
        bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn set_mini_fat(&self, bytes: &mut [u8], index: u32, value: u32) {
        let per = self.sector_size / 4;
        let sector = self.mini_fat_sectors[index as usize / per];
        let offset = self.sector_offset(sector) + (index as usize % per) * 4;
        bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn entry_offset(&self, id: u32) -> usize {
        let per = self.sector_size / ENTRY_SIZE;
        let sector = self.directory_sectors[id as usize / per];
        self.sector_offset(sector) + (id as usize % per) * ENTRY_SIZE
    }
}

fn div_ceil(a: usize, b: usize) -> usize {
    a.div_ceil(b)
}

fn upper_key(name: &str) -> (usize, Vec<u16>) {
    let units: Vec<u16> = name.to_uppercase().encode_utf16().collect();
    (name.encode_utf16().count(), units)
}

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

impl Default for CfbBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CfbBuilder {
    pub fn new() -> Self {
        Self {
            version: 3,
            nodes: vec![Node {
                name: "Root Entry".to_string(),
                kind: ROOT,
                data: Vec::new(),
                declared: 0,
                children: Vec::new(),
            }],
            min_fat_sectors: 1,
            cutoff: 4096,
        }
    }

    pub fn version4(mut self) -> Self {
        self.version = 4;
        self
    }

    /// Pads the FAT to at least `count` sectors; more than 109 forces DIFAT sectors.
    pub fn min_fat_sectors(mut self, count: usize) -> Self {
        self.min_fat_sectors = count.max(1);
        self
    }

    pub fn storage(mut self, path: &[&str]) -> Self {
        self.ensure_storage(path);
        self
    }

    pub fn stream(self, path: &[&str], data: &[u8]) -> Self {
        let declared = data.len() as u64;
        self.stream_sized(path, data, declared)
    }

    /// Stores `data` but records `declared` as the directory entry size.
    pub fn stream_sized(mut self, path: &[&str], data: &[u8], declared: u64) -> Self {
        let (name, parent_path) = path.split_last().expect("non-empty path");
        let parent = self.ensure_storage(parent_path);
        self.nodes.push(Node {
            name: name.to_string(),
            kind: STREAM,
            data: data.to_vec(),
            declared,
            children: Vec::new(),
        });
        let id = self.nodes.len() - 1;
        self.nodes[parent].children.push(id);
        self
    }

    fn ensure_storage(&mut self, path: &[&str]) -> usize {
        let mut current = 0;
        for component in path {
            let found = self.nodes[current]
                .children
                .iter()
                .copied()
                .find(|&c| self.nodes[c].kind == STORAGE && self.nodes[c].name == *component);
            current = match found {
                Some(id) => id,
                None => {
                    self.nodes.push(Node {
                        name: component.to_string(),
                        kind: STORAGE,
                        data: Vec::new(),
                        declared: 0,
                        children: Vec::new(),
                    });
                    let id = self.nodes.len() - 1;
                    self.nodes[current].children.push(id);
                    id
                }
            };
        }
        current
    }

    pub fn build(&self) -> Vec<u8> {
        self.build_with_layout().0
    }

    fn paths(&self) -> Vec<String> {
        let mut paths = vec![String::new(); self.nodes.len()];
        let mut stack = vec![(0usize, String::new())];
        while let Some((id, prefix)) = stack.pop() {
            for &child in &self.nodes[id].children {
                let path = if prefix.is_empty() {
                    self.nodes[child].name.clone()
                } else {
                    format!("{}/{}", prefix, self.nodes[child].name)
                };
                paths[child] = path.clone();
                stack.push((child, path));
            }
        }
        paths
    }

    pub fn build_with_layout(&self) -> (Vec<u8>, Layout) {
        let sector_size = if self.version == 4 { 4096 } else { 512 };
        let per_sector = sector_size / 4;
        let paths = self.paths();

        // sibling trees
        let count = self.nodes.len();
        let mut left = vec![NO_STREAM; count];
        let mut right = vec![NO_STREAM; count];
        let mut child = vec![NO_STREAM; count];
        for (id, node) in self.nodes.iter().enumerate() {
            let mut kids = node.children.clone();
            kids.sort_by_key(|&k| upper_key(&self.nodes[k].name));
            child[id] = balance(&kids, &mut left, &mut right);
        }

        // mini stream allocation
        let mut mini_chains: Vec<Option<(u32, usize)>> = vec![None; count];
        let mut mini_stream = Vec::new();
        let mut regular: Vec<(usize, usize)> = Vec::new();
        for (id, node) in self.nodes.iter().enumerate() {
            if node.kind != STREAM || node.declared == 0 {
                continue;
            }
            if node.declared < self.cutoff as u64 {
                let start = (mini_stream.len() / MINI_SECTOR_SIZE) as u32;
                let n = div_ceil(node.data.len(), MINI_SECTOR_SIZE);
                mini_stream.extend_from_slice(&node.data);
                mini_stream.resize((start as usize + n) * MINI_SECTOR_SIZE, 0);
                mini_chains[id] = Some((start, n));
            } else {
                regular.push((id, div_ceil(node.data.len(), sector_size)));
            }
        }
        let mini_sector_count = mini_stream.len() / MINI_SECTOR_SIZE;

        let n_dir = div_ceil(count, sector_size / ENTRY_SIZE);
        let n_mini_fat = div_ceil(mini_sector_count * 4, sector_size);
        let n_mini_stream = div_ceil(mini_stream.len(), sector_size);
        let n_regular: usize = regular.iter().map(|(_, n)| n).sum();
        let others = n_dir + n_mini_fat + n_mini_stream + n_regular;

        let mut n_fat = self.min_fat_sectors;
        let n_difat = loop {
            let n_difat = if n_fat > 109 { div_ceil(n_fat - 109, per_sector - 1) } else { 0 };
            let needed = div_ceil(n_fat + n_difat + others, per_sector);
            if needed <= n_fat {
                break n_difat;
            }
            n_fat = needed;
        };
        let total = n_fat + n_difat + others;

        let mut next = 0u32;
        let mut take = |n: usize| -> Vec<u32> {
            let v: Vec<u32> = (next..next + n as u32).collect();
            next += n as u32;
            v
        };
        let fat_sectors = take(n_fat);
        let difat_sectors = take(n_difat);
        let directory_sectors = take(n_dir);
        let mini_fat_sectors = take(n_mini_fat);
        let mini_stream_sectors = take(n_mini_stream);
        let mut streams = Vec::new();
        let mut starts = vec![END_OF_CHAIN; count];
        for &(id, n) in &regular {
            let sectors = take(n);
            starts[id] = sectors.first().copied().unwrap_or(END_OF_CHAIN);
            streams.push((paths[id].clone(), StreamLayout { entry_id: id as u32, mini: false, sectors }));
        }
        for (id, chain) in mini_chains.iter().enumerate() {
            if let Some((start, n)) = chain {
                starts[id] = *start;
                let sectors = (*start..*start + *n as u32).collect();
                streams.push((paths[id].clone(), StreamLayout { entry_id: id as u32, mini: true, sectors }));
            }
        }

        // FAT
        let mut fat = vec![FREE_SECT; n_fat * per_sector];
        for &s in &fat_sectors {
            fat[s as usize] = FAT_SECT;
        }
        for &s in &difat_sectors {
            fat[s as usize] = DIF_SECT;
        }
        link(&mut fat, &directory_sectors);
        link(&mut fat, &mini_fat_sectors);
        link(&mut fat, &mini_stream_sectors);
        for (_, layout) in streams.iter().filter(|(_, l)| !l.mini) {
            link(&mut fat, &layout.sectors);
        }

        let mut mini_fat = vec![FREE_SECT; n_mini_fat * per_sector];
        for (_, layout) in streams.iter().filter(|(_, l)| l.mini) {
            link(&mut mini_fat, &layout.sectors);
        }

        let mut out = vec![0u8; (total + 1) * sector_size];

        // header
        out[..8].copy_from_slice(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1]);
        put_u16(&mut out, 24, 0x003E);
        put_u16(&mut out, 26, self.version);
        put_u16(&mut out, 28, 0xFFFE);
        put_u16(&mut out, 30, if self.version == 4 { 12 } else { 9 });
        put_u16(&mut out, 32, 6);
        put_u32(&mut out, 40, if self.version == 4 { n_dir as u32 } else { 0 });
        put_u32(&mut out, 44, n_fat as u32);
        put_u32(&mut out, 48, directory_sectors[0]);
        put_u32(&mut out, 56, self.cutoff);
        put_u32(&mut out, 60, mini_fat_sectors.first().copied().unwrap_or(END_OF_CHAIN));
        put_u32(&mut out, 64, n_mini_fat as u32);
        put_u32(&mut out, 68, difat_sectors.first().copied().unwrap_or(END_OF_CHAIN));
        put_u32(&mut out, 72, n_difat as u32);
        for i in 0..109 {
            put_u32(&mut out, 76 + i * 4, fat_sectors.get(i).copied().unwrap_or(FREE_SECT));
        }

        let layout = Layout {
            sector_size,
            fat_sectors,
            difat_sectors,
            directory_sectors,
            mini_fat_sectors,
            mini_stream_sectors,
            streams,
        };

        // DIFAT sectors
        let overflow: Vec<u32> = layout.fat_sectors.iter().skip(109).copied().collect();
        for (i, &sector) in layout.difat_sectors.iter().enumerate() {
            let base = layout.sector_offset(sector);
            for slot in 0..per_sector - 1 {
                let value = overflow.get(i * (per_sector - 1) + slot).copied().unwrap_or(FREE_SECT);
                put_u32(&mut out, base + slot * 4, value);
            }
            let next = layout.difat_sectors.get(i + 1).copied().unwrap_or(END_OF_CHAIN);
            put_u32(&mut out, base + (per_sector - 1) * 4, next);
        }

        write_table(&mut out, &layout, &layout.fat_sectors, &fat);
        write_table(&mut out, &layout, &layout.mini_fat_sectors, &mini_fat);

        // directory
        let per_dir = sector_size / ENTRY_SIZE;
        for id in 0..n_dir * per_dir {
            let offset = layout.entry_offset(id as u32);
            let entry = &mut out[offset..offset + ENTRY_SIZE];
            put_u32(entry, 68, NO_STREAM);
            put_u32(entry, 72, NO_STREAM);
            put_u32(entry, 76, NO_STREAM);
            let Some(node) = self.nodes.get(id) else { continue };
            let units: Vec<u16> = node.name.encode_utf16().collect();
            for (i, u) in units.iter().enumerate() {
                put_u16(entry, i * 2, *u);
            }
            put_u16(entry, 64, ((units.len() + 1) * 2) as u16);
            entry[66] = node.kind;
            entry[67] = 1;
            put_u32(entry, 68, left[id]);
            put_u32(entry, 72, right[id]);
            put_u32(entry, 76, child[id]);
            let (start, size) = match node.kind {
                ROOT => (
                    layout.mini_stream_sectors.first().copied().unwrap_or(END_OF_CHAIN),
                    mini_stream.len() as u64,
                ),
                STREAM => (starts[id], node.declared),
                _ => (0, 0),
            };
            put_u32(entry, 116, start);
            put_u64(entry, 120, size);
        }

        // payloads
        for (i, chunk) in mini_stream.chunks(sector_size).enumerate() {
            let offset = layout.sector_offset(layout.mini_stream_sectors[i]);
            out[offset..offset + chunk.len()].copy_from_slice(chunk);
        }
        for (_, stream) in layout.streams.iter().filter(|(_, l)| !l.mini) {
            let id = stream.entry_id as usize;
            for (i, chunk) in self.nodes[id].data.chunks(sector_size).enumerate() {
                let offset = layout.sector_offset(stream.sectors[i]);
                out[offset..offset + chunk.len()].copy_from_slice(chunk);
            }
        }

        (out, layout)
    }
}

fn link(table: &mut [u32], sectors: &[u32]) {
    for pair in sectors.windows(2) {
        table[pair[0] as usize] = pair[1];
    }
    if let Some(&last) = sectors.last() {
        table[last as usize] = END_OF_CHAIN;
    }
}

fn write_table(out: &mut [u8], layout: &Layout, sectors: &[u32], table: &[u32]) {
    let per_sector = layout.sector_size / 4;
    for (i, &sector) in sectors.iter().enumerate() {
        let base = layout.sector_offset(sector);
        for slot in 0..per_sector {
            put_u32(out, base + slot * 4, table[i * per_sector + slot]);
        }
    }
}

/// Builds a balanced binary tree over sorted ids, returning the subtree root.
fn balance(ids: &[usize], left: &mut [u32], right: &mut [u32]) -> u32 {
    if ids.is_empty() {
        return NO_STREAM;
    }
    let mid = ids.len() / 2;
    let root = ids[mid];
    left[root] = balance(&ids[..mid], left, right);
    right[root] = balance(&ids[mid + 1..], left, right);
    root as u32
}

/// Deterministic payload so tests can compare content without fixtures.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}
