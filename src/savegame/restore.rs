//! Reading the script system's save chunks

use crate::error::SaveError;
use crate::interpreter::Interpreter;
use crate::savegame::chunks::{Chunk, DataChunk, ThreadsChunk, DATA_CHUNK, THREADS_CHUNK};
use log::info;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Read a "SAGA" chunk and replace the VM's threads with its contents.
/// Every restored thread's code segment is loaded; a missing one is
/// fatal.
pub fn load_threads<R: Read>(vm: &mut Interpreter, input: &mut R) -> Result<usize, SaveError> {
    let chunk = Chunk::read_expected(input, THREADS_CHUNK)?;
    let count = ThreadsChunk { data: chunk.data }.restore_to_vm(vm)?;
    info!("Restored {} script threads", count);
    Ok(count)
}

/// Read an "SDTA" chunk into the data segment.
pub fn load_data_segment<R: Read>(vm: &mut Interpreter, input: &mut R) -> Result<(), SaveError> {
    let chunk = Chunk::read_expected(input, DATA_CHUNK)?;
    DataChunk { data: chunk.data }.restore_to_vm(vm)
}

/// A save file read back from disk.
pub struct RestoreGame {
    threads: ThreadsChunk,
    data: DataChunk,
}

impl RestoreGame {
    pub fn read_from<R: Read>(input: &mut R) -> Result<Self, SaveError> {
        let threads = Chunk::read_expected(input, THREADS_CHUNK)?;
        let data = Chunk::read_expected(input, DATA_CHUNK)?;
        Ok(RestoreGame {
            threads: ThreadsChunk { data: threads.data },
            data: DataChunk { data: data.data },
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, SaveError> {
        info!("Loading script state from {:?}", path);
        let mut input = BufReader::new(File::open(path)?);
        Self::read_from(&mut input)
    }

    /// Install the saved data segment and threads. Returns the number of
    /// threads restored. Both chunks are decoded before either is
    /// installed, so a failed restore leaves the VM as it was.
    pub fn restore_to_vm(&self, vm: &mut Interpreter) -> Result<usize, SaveError> {
        let threads = self.threads.decode(vm)?;
        let data = self.data.payload_for(vm.data_segment().len())?;
        let count = threads.len();
        vm.data_segment_mut().copy_from_slice(data);
        vm.replace_threads(threads);
        info!("Script state restored ({} threads)", count);
        Ok(count)
    }
}
