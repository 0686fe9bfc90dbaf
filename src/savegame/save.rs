//! Writing the script system's save chunks

use crate::error::SaveError;
use crate::interpreter::Interpreter;
use crate::savegame::chunks::{Chunk, DataChunk, ThreadsChunk};
use log::info;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Write the "SAGA" chunk holding every parked thread.
pub fn save_threads<W: Write>(vm: &Interpreter, out: &mut W) -> Result<(), SaveError> {
    ThreadsChunk::from_vm(vm)?.into_chunk().write_to(out)
}

/// Write the "SDTA" chunk holding the data segment.
pub fn save_data_segment<W: Write>(vm: &Interpreter, out: &mut W) -> Result<(), SaveError> {
    DataChunk::from_vm(vm).into_chunk().write_to(out)
}

/// A snapshot of the script system ready to be written out.
pub struct SaveGame {
    chunks: Vec<Chunk>,
}

impl SaveGame {
    /// Capture the current state. Call between dispatcher passes: a
    /// thread checked out for execution is not captured.
    pub fn from_vm(vm: &Interpreter) -> Result<Self, SaveError> {
        Ok(SaveGame {
            chunks: vec![
                ThreadsChunk::from_vm(vm)?.into_chunk(),
                DataChunk::from_vm(vm).into_chunk(),
            ],
        })
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<(), SaveError> {
        for chunk in &self.chunks {
            chunk.write_to(out)?;
        }
        Ok(())
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), SaveError> {
        info!("Saving script state to {:?}", path);
        let mut out = BufWriter::new(File::create(path)?);
        self.write_to(&mut out)?;
        out.flush()?;
        Ok(())
    }
}
