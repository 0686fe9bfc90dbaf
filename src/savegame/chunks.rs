//! Chunk framing and the script system's two chunks

use crate::error::SaveError;
use crate::interpreter::Interpreter;
use crate::thread_list::ThreadList;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use std::io::{Read, Write};

pub type ChunkId = [u8; 4];

/// Thread list chunk
pub const THREADS_CHUNK: ChunkId = *b"SAGA";
/// Data segment chunk
pub const DATA_CHUNK: ChunkId = *b"SDTA";

fn id_name(id: &ChunkId) -> String {
    String::from_utf8_lossy(id).into_owned()
}

/// One framed chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: ChunkId,
    pub data: Vec<u8>,
}

impl Chunk {
    pub fn new(id: ChunkId, data: Vec<u8>) -> Self {
        Chunk { id, data }
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<(), SaveError> {
        out.write_all(&self.id)?;
        out.write_u32::<LittleEndian>(self.data.len() as u32)?;
        out.write_all(&self.data)?;
        debug!("Wrote chunk {} ({} bytes)", id_name(&self.id), self.data.len());
        Ok(())
    }

    pub fn read_from<R: Read>(input: &mut R) -> Result<Self, SaveError> {
        let mut id = [0u8; 4];
        input.read_exact(&mut id)?;
        let size = input.read_u32::<LittleEndian>()? as usize;
        let mut data = Vec::with_capacity(size.min(1 << 20));
        input.by_ref().take(size as u64).read_to_end(&mut data)?;
        if data.len() != size {
            return Err(SaveError::Truncated("chunk payload"));
        }
        debug!("Read chunk {} ({} bytes)", id_name(&id), size);
        Ok(Chunk { id, data })
    }

    /// Read the next chunk and check it is `id`.
    pub fn read_expected<R: Read>(input: &mut R, id: ChunkId) -> Result<Self, SaveError> {
        let chunk = Self::read_from(input)?;
        if chunk.id != id {
            return Err(SaveError::UnexpectedChunk {
                expected: id_name(&id),
                found: id_name(&chunk.id),
            });
        }
        Ok(chunk)
    }
}

/// The archived thread list. An empty payload means no threads.
pub struct ThreadsChunk {
    pub data: Vec<u8>,
}

impl ThreadsChunk {
    pub fn from_vm(vm: &Interpreter) -> Result<Self, SaveError> {
        let threads = vm.threads();
        if threads.is_empty() {
            return Ok(ThreadsChunk { data: Vec::new() });
        }
        let mut data = Vec::with_capacity(threads.archive_size());
        threads.archive(&mut data)?;
        Ok(ThreadsChunk { data })
    }

    /// Decode the archived threads into a fresh list without touching
    /// the VM's own. Each thread's code segment must load.
    pub fn decode(&self, vm: &mut Interpreter) -> Result<ThreadList, SaveError> {
        let mut list = ThreadList::new();
        if self.data.is_empty() {
            return Ok(list);
        }
        let mut input = self.data.as_slice();
        list.restore(&mut input)?;
        for thread in list.parked() {
            vm.segment(thread.program_counter.segment)?;
        }
        Ok(list)
    }

    /// Replace the VM's threads with the archived ones. Returns how many
    /// were restored. On error the VM keeps its current threads.
    pub fn restore_to_vm(&self, vm: &mut Interpreter) -> Result<usize, SaveError> {
        let list = self.decode(vm)?;
        let count = list.len();
        vm.replace_threads(list);
        Ok(count)
    }

    pub fn into_chunk(self) -> Chunk {
        Chunk::new(THREADS_CHUNK, self.data)
    }
}

/// The data segment image.
pub struct DataChunk {
    pub data: Vec<u8>,
}

impl DataChunk {
    pub fn from_vm(vm: &Interpreter) -> Self {
        DataChunk {
            data: vm.data_segment().to_vec(),
        }
    }

    /// The saved bytes covering a data segment of `len` bytes.
    pub fn payload_for(&self, len: usize) -> Result<&[u8], SaveError> {
        self.data
            .get(..len)
            .ok_or(SaveError::Truncated("data segment"))
    }

    pub fn restore_to_vm(&self, vm: &mut Interpreter) -> Result<(), SaveError> {
        let source = self.payload_for(vm.data_segment().len())?;
        vm.data_segment_mut().copy_from_slice(source);
        Ok(())
    }

    pub fn into_chunk(self) -> Chunk {
        Chunk::new(DATA_CHUNK, self.data)
    }
}
