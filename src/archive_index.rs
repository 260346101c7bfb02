//! The archive index: every member of the archive and where its data lives.
//!
//! An [`ArchiveEntry`] maps its packed payload onto one or more
//! [`Fragment`]s, each a contiguous byte range inside a single volume. The
//! fragment map is sorted by logical offset so any payload offset resolves to
//! a volume position with a binary search.

use std::fmt;

use crate::formats::{CompressionMethod, Signature};

/// A contiguous range of packed payload inside one volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fragment {
    /// Index of the volume in the volume set.
    pub volume: usize,
    /// Absolute offset within that volume.
    pub offset: u64,
    pub length: u64,
}

impl Fragment {
    /// First offset past this fragment.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Mapping of a fragment within the logical payload.
/// Stored sorted by start offset for binary search.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FragmentMapEntry {
    index: usize,
    start: u64,
    /// Inclusive.
    end: u64,
}

/// A member of the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Physical order within the archive, starting at 0.
    pub position: usize,
    pub name: String,
    /// Unpacked size from the header.
    pub size: u64,
    pub method: CompressionMethod,
    pub encrypted: bool,
    pub is_directory: bool,
    /// CRC32 of the whole unpacked file, when the header carries one.
    pub crc: Option<u32>,
    packed_size: u64,
    fragments: Vec<Fragment>,
    fragment_map: Vec<FragmentMapEntry>,
}

impl ArchiveEntry {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        position: usize,
        name: String,
        size: u64,
        method: CompressionMethod,
        encrypted: bool,
        is_directory: bool,
        crc: Option<u32>,
        fragments: Vec<Fragment>,
    ) -> Self {
        let packed_size = fragments.iter().map(|f| f.length).sum();
        let fragment_map = Self::calculate_fragment_map(&fragments);
        Self {
            position,
            name,
            size,
            method,
            encrypted,
            is_directory,
            crc,
            packed_size,
            fragments,
            fragment_map,
        }
    }

    fn calculate_fragment_map(fragments: &[Fragment]) -> Vec<FragmentMapEntry> {
        let mut map = Vec::with_capacity(fragments.len());
        let mut offset = 0u64;
        for (index, fragment) in fragments.iter().enumerate() {
            if fragment.length == 0 {
                continue;
            }
            let start = offset;
            let end = offset + fragment.length - 1;
            map.push(FragmentMapEntry { index, start, end });
            offset = end + 1;
        }
        map
    }

    /// Sum of all fragment lengths.
    pub fn packed_size(&self) -> u64 {
        self.packed_size
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// Store payloads are the file bytes themselves.
    pub fn is_store(&self) -> bool {
        self.method.is_store()
    }

    /// Volume indices holding this entry's data, in order.
    pub fn volumes(&self) -> Vec<usize> {
        let mut volumes: Vec<usize> = self.fragments.iter().map(|f| f.volume).collect();
        volumes.dedup();
        volumes
    }

    /// Fragments covering payload bytes `start..start + length`, clipped to
    /// the payload.
    pub fn slice_fragments(&self, start: u64, length: u64) -> Vec<Fragment> {
        let end = start.saturating_add(length).min(self.packed_size);
        if start >= end {
            return Vec::new();
        }

        let first = self.fragment_map.partition_point(|entry| entry.end < start);
        self.fragment_map[first..]
            .iter()
            .take_while(|entry| entry.start < end)
            .map(|entry| {
                let fragment = &self.fragments[entry.index];
                let from = start.max(entry.start);
                let to = end.min(entry.end + 1);
                Fragment {
                    volume: fragment.volume,
                    offset: fragment.offset + (from - entry.start),
                    length: to - from,
                }
            })
            .collect()
    }

    /// Detached summary for listings.
    pub fn record(&self) -> EntryRecord {
        EntryRecord {
            name: self.name.clone(),
            size: self.size,
            packed_size: self.packed_size,
            method: self.method,
            encrypted: self.encrypted,
            is_directory: self.is_directory,
        }
    }
}

/// Listing record of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct EntryRecord {
    pub name: String,
    pub size: u64,
    pub packed_size: u64,
    pub method: CompressionMethod,
    pub encrypted: bool,
    pub is_directory: bool,
}

impl fmt::Display for EntryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (Size: {} bytes, Compressed: {} bytes, Method: {}",
            if self.is_directory { "Directory" } else { "File" },
            self.name,
            group_thousands(self.size),
            group_thousands(self.packed_size),
            self.method,
        )?;
        if self.encrypted {
            f.write_str(", Encrypted")?;
        }
        f.write_str(")")
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Whether the index covers the whole archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexStatus {
    Complete,
    /// Building stopped early; only entries before the failure are listed.
    Partial { reason: String },
}

/// Immutable catalog of archive members in physical order.
#[derive(Debug, Clone)]
pub struct ArchiveIndex {
    format: Signature,
    entries: Vec<ArchiveEntry>,
    status: IndexStatus,
    volume_count: usize,
}

impl ArchiveIndex {
    pub(crate) fn new(
        format: Signature,
        entries: Vec<ArchiveEntry>,
        status: IndexStatus,
        volume_count: usize,
    ) -> Self {
        Self {
            format,
            entries,
            status,
            volume_count,
        }
    }

    pub fn list_all(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ArchiveEntry> {
        self.entries.iter()
    }

    pub fn by_position(&self, position: usize) -> Option<&ArchiveEntry> {
        self.entries.get(position)
    }

    /// First entry named `name` in physical order.
    pub fn by_name(&self, name: &str) -> Option<&ArchiveEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Every entry named `name`, in physical order.
    pub fn by_name_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ArchiveEntry> + 'a {
        self.entries.iter().filter(move |e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn status(&self) -> &IndexStatus {
        &self.status
    }

    pub fn is_complete(&self) -> bool {
        self.status == IndexStatus::Complete
    }

    pub fn format(&self) -> Signature {
        self.format
    }

    /// Volumes walked while building the index.
    pub fn volume_count(&self) -> usize {
        self.volume_count
    }

    pub fn records(&self) -> Vec<EntryRecord> {
        self.entries.iter().map(ArchiveEntry::record).collect()
    }
}

impl<'a> IntoIterator for &'a ArchiveIndex {
    type Item = &'a ArchiveEntry;
    type IntoIter = std::slice::Iter<'a, ArchiveEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
