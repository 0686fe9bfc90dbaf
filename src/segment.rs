//! Script segments and the export table
//!
//! Segments are demand-loaded from the host's resource manager and cached
//! by index for the lifetime of the interpreter. They stay writable:
//! scripts keep static variables in their own code segments.

use crate::error::{VmError, VmResult};
use log::{debug, info};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Segment numbers above this are treated as corrupt export data.
pub const MAX_SEGMENT_NUMBER: u16 = 1000;

/// The resource manager as seen by the interpreter.
pub trait ScriptResources {
    /// Bytes of code or object segment `index`, or `None` if absent.
    fn load_segment(&mut self, index: u16) -> Option<Vec<u8>>;
    /// The process-wide data segment.
    fn load_data_segment(&mut self) -> Option<Vec<u8>>;
    /// The raw export table.
    fn load_export_table(&mut self) -> Option<Vec<u8>>;
    /// Segment number scripts use to refer to the data segment.
    fn data_segment_index(&self) -> u16 {
        0
    }
}

/// Resources held in memory; used by tests and embedding hosts that
/// already unpacked their archive.
#[derive(Debug, Clone, Default)]
pub struct MemoryResources {
    pub segments: HashMap<u16, Vec<u8>>,
    pub data: Vec<u8>,
    pub exports: Vec<u8>,
    pub data_index: u16,
}

impl MemoryResources {
    pub fn new(data: Vec<u8>, exports: Vec<u8>) -> Self {
        MemoryResources {
            segments: HashMap::new(),
            data,
            exports,
            data_index: 0,
        }
    }

    pub fn with_segment(mut self, index: u16, bytes: Vec<u8>) -> Self {
        self.segments.insert(index, bytes);
        self
    }
}

impl ScriptResources for MemoryResources {
    fn load_segment(&mut self, index: u16) -> Option<Vec<u8>> {
        self.segments.get(&index).cloned()
    }

    fn load_data_segment(&mut self) -> Option<Vec<u8>> {
        Some(self.data.clone())
    }

    fn load_export_table(&mut self) -> Option<Vec<u8>> {
        Some(self.exports.clone())
    }

    fn data_segment_index(&self) -> u16 {
        self.data_index
    }
}

/// An unpacked script image on disk: `data.bin`, `exports.bin` and one
/// `seg_<n>.bin` per segment.
#[derive(Debug, Clone)]
pub struct DirectoryResources {
    root: PathBuf,
}

impl DirectoryResources {
    pub fn open(root: &Path) -> Result<Self, String> {
        if !root.is_dir() {
            return Err(format!("Script image {} is not a directory", root.display()));
        }
        for required in ["data.bin", "exports.bin"] {
            if !root.join(required).is_file() {
                return Err(format!(
                    "Script image {} is missing {required}",
                    root.display()
                ));
            }
        }
        info!("Opened script image {}", root.display());
        Ok(DirectoryResources {
            root: root.to_path_buf(),
        })
    }

    pub fn segment_path(&self, index: u16) -> PathBuf {
        self.root.join(format!("seg_{index}.bin"))
    }

    fn read(&self, path: &Path) -> Option<Vec<u8>> {
        match std::fs::read(path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                debug!("Cannot read {}: {e}", path.display());
                None
            }
        }
    }
}

impl ScriptResources for DirectoryResources {
    fn load_segment(&mut self, index: u16) -> Option<Vec<u8>> {
        self.read(&self.segment_path(index))
    }

    fn load_data_segment(&mut self) -> Option<Vec<u8>> {
        self.read(&self.root.join("data.bin"))
    }

    fn load_export_table(&mut self) -> Option<Vec<u8>> {
        self.read(&self.root.join("exports.bin"))
    }
}

/// Demand-loaded, index-keyed segment store.
pub struct SegmentCache {
    resources: Box<dyn ScriptResources>,
    segments: HashMap<u16, Vec<u8>>,
}

impl SegmentCache {
    pub fn new(resources: Box<dyn ScriptResources>) -> Self {
        SegmentCache {
            resources,
            segments: HashMap::new(),
        }
    }

    pub fn resources_mut(&mut self) -> &mut dyn ScriptResources {
        self.resources.as_mut()
    }

    pub fn data_segment_index(&self) -> u16 {
        self.resources.data_segment_index()
    }

    /// Make sure segment `index` is resident.
    pub fn load(&mut self, index: u16) -> VmResult<()> {
        if !self.segments.contains_key(&index) {
            let bytes = self
                .resources
                .load_segment(index)
                .ok_or(VmError::MissingSegment(index))?;
            debug!("Loaded script segment {} ({} bytes)", index, bytes.len());
            self.segments.insert(index, bytes);
        }
        Ok(())
    }

    pub fn get(&mut self, index: u16) -> VmResult<&[u8]> {
        self.load(index)?;
        self.segments
            .get(&index)
            .map(|s| s.as_slice())
            .ok_or(VmError::MissingSegment(index))
    }

    pub fn get_mut(&mut self, index: u16) -> VmResult<&mut [u8]> {
        self.load(index)?;
        self.segments
            .get_mut(&index)
            .map(|s| s.as_mut_slice())
            .ok_or(VmError::MissingSegment(index))
    }

    pub fn is_resident(&self, index: u16) -> bool {
        self.segments.contains_key(&index)
    }

    pub fn resident_count(&self) -> usize {
        self.segments.len()
    }
}

/// The export table: entry `n` maps a symbol to a segment:offset pair.
#[derive(Debug, Clone)]
pub struct ExportTable {
    bytes: Vec<u8>,
    count: usize,
}

impl ExportTable {
    pub fn new(bytes: Vec<u8>) -> Self {
        let count = bytes.len() / 4 + 1;
        ExportTable { bytes, count }
    }

    /// Number of addressable entries, counting the reserved entry 0.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Resolve export `entry` to (segment, offset).
    ///
    /// The packed value for entry `n` is the little-endian 32-bit word
    /// starting at byte `4n - 2`: segment in the low half, offset in the
    /// high half.
    pub fn lookup(&self, entry: u16) -> VmResult<(u16, u16)> {
        if entry == 0 || entry as usize > self.count {
            return Err(VmError::ExportOutOfRange {
                entry,
                count: self.count,
            });
        }
        let start = 4 * entry as usize - 2;
        let raw = self
            .bytes
            .get(start..start + 4)
            .ok_or(VmError::ExportOutOfRange {
                entry,
                count: self.count,
            })?;
        let packed = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let segment = (packed & 0xffff) as u16;
        let offset = (packed >> 16) as u16;
        if segment > MAX_SEGMENT_NUMBER {
            return Err(VmError::BadExport { entry, segment });
        }
        Ok((segment, offset))
    }
}

/// Build raw export-table bytes from a list of (segment, offset) pairs
/// for entries 1.., in the on-disk layout `lookup` reads.
pub fn encode_exports(entries: &[(u16, u16)]) -> Vec<u8> {
    let mut bytes = vec![0u8; 2];
    for (segment, offset) in entries {
        bytes.extend_from_slice(&segment.to_le_bytes());
        bytes.extend_from_slice(&offset.to_le_bytes());
    }
    bytes
}
