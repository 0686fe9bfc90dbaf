//! Fixed-capacity thread table
//!
//! A thread's id is its slot index. While the interpreter runs a thread it
//! checks the thread out of its slot, so native code running on that
//! thread's behalf can create, wake or abort other threads.

use crate::error::{SaveError, VmError, VmResult};
use crate::thread::{Thread, ThreadFlags, ThreadId};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, warn};
use std::io::{Read, Write};

pub const MAX_THREADS: usize = 32;

#[derive(Debug)]
enum Slot {
    Free,
    Parked(Box<Thread>),
    /// checked out to the interpreter
    Running,
}

impl Slot {
    fn is_free(&self) -> bool {
        matches!(self, Slot::Free)
    }
}

#[derive(Debug)]
pub struct ThreadList {
    slots: Vec<Slot>,
    extended_level: i16,
}

impl Default for ThreadList {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadList {
    pub fn new() -> Self {
        ThreadList {
            slots: (0..MAX_THREADS).map(|_| Slot::Free).collect(),
            extended_level: 0,
        }
    }

    fn free_slot(&self) -> VmResult<ThreadId> {
        self.slots
            .iter()
            .position(Slot::is_free)
            .map(|i| i as ThreadId)
            .ok_or(VmError::TooManyThreads)
    }

    /// Store a thread in the first free slot.
    pub fn insert(&mut self, mut thread: Thread) -> VmResult<ThreadId> {
        let id = self.free_slot()?;
        thread.id = id;
        self.slots[id as usize] = Slot::Parked(Box::new(thread));
        Ok(id)
    }

    /// Claim the first free slot for a thread that starts out checked out.
    pub fn insert_running(&mut self, thread: &mut Thread) -> VmResult<ThreadId> {
        let id = self.free_slot()?;
        thread.id = id;
        self.slots[id as usize] = Slot::Running;
        Ok(id)
    }

    /// Store a thread in a specific slot, as save-game restore does.
    pub fn insert_at(&mut self, id: ThreadId, mut thread: Thread) -> VmResult<()> {
        let slot = self
            .slots
            .get_mut(id as usize)
            .ok_or(VmError::UnknownThread(id))?;
        if !slot.is_free() {
            return Err(VmError::ThreadExists(id));
        }
        thread.id = id;
        *slot = Slot::Parked(Box::new(thread));
        Ok(())
    }

    /// Take a parked thread out for interpretation.
    pub fn checkout(&mut self, id: ThreadId) -> Option<Box<Thread>> {
        let slot = self.slots.get_mut(id as usize)?;
        match std::mem::replace(slot, Slot::Running) {
            Slot::Parked(thread) => Some(thread),
            other => {
                *slot = other;
                None
            }
        }
    }

    /// Return a checked-out thread to its slot.
    pub fn checkin(&mut self, thread: Box<Thread>) {
        let id = thread.id;
        match self.slots.get_mut(id as usize) {
            Some(slot @ Slot::Running) => *slot = Slot::Parked(thread),
            _ => warn!("Thread {} checked in without being checked out", id),
        }
    }

    /// Free the slot of a checked-out thread that is being destroyed.
    pub fn release(&mut self, thread: &mut Thread) {
        self.clear_extended(thread);
        if let Some(slot @ Slot::Running) = self.slots.get_mut(thread.id as usize) {
            *slot = Slot::Free;
        }
        debug!("Released thread {}", thread.id);
    }

    /// Destroy a parked thread.
    pub fn remove(&mut self, id: ThreadId) -> Option<Box<Thread>> {
        let slot = self.slots.get_mut(id as usize)?;
        match std::mem::replace(slot, Slot::Free) {
            Slot::Parked(mut thread) => {
                self.clear_extended(&mut thread);
                debug!("Removed thread {}", id);
                Some(thread)
            }
            other => {
                *slot = other;
                None
            }
        }
    }

    pub fn get(&self, id: ThreadId) -> Option<&Thread> {
        match self.slots.get(id as usize)? {
            Slot::Parked(thread) => Some(thread),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: ThreadId) -> Option<&mut Thread> {
        match self.slots.get_mut(id as usize)? {
            Slot::Parked(thread) => Some(thread),
            _ => None,
        }
    }

    pub fn is_running(&self, id: ThreadId) -> bool {
        matches!(self.slots.get(id as usize), Some(Slot::Running))
    }

    /// First occupied slot.
    pub fn first(&self) -> Option<ThreadId> {
        self.following(0)
    }

    /// Next occupied slot after `id`.
    pub fn next(&self, id: ThreadId) -> Option<ThreadId> {
        self.following(id as usize + 1)
    }

    fn following(&self, start: usize) -> Option<ThreadId> {
        (start..self.slots.len())
            .find(|&i| !self.slots[i].is_free())
            .map(|i| i as ThreadId)
    }

    pub fn ids(&self) -> Vec<ThreadId> {
        (0..self.slots.len())
            .filter(|&i| !self.slots[i].is_free())
            .map(|i| i as ThreadId)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_free()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn parked(&self) -> impl Iterator<Item = &Thread> {
        self.slots.iter().filter_map(|s| match s {
            Slot::Parked(thread) => Some(thread.as_ref()),
            _ => None,
        })
    }

    // ---- extended threads ----

    pub fn extended_level(&self) -> i16 {
        self.extended_level
    }

    pub fn set_extended(&mut self, thread: &mut Thread) {
        if !thread.flags.contains(ThreadFlags::EXTENDED) {
            thread.flags |= ThreadFlags::EXTENDED;
            self.extended_level += 1;
        }
    }

    pub fn clear_extended(&mut self, thread: &mut Thread) {
        if thread.flags.contains(ThreadFlags::EXTENDED) {
            thread.flags.remove(ThreadFlags::EXTENDED);
            self.extended_level -= 1;
        }
    }

    /// Drop every thread.
    pub fn cleanup(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = Slot::Free;
        }
        self.extended_level = 0;
    }

    // ---- save games ----

    pub fn archive_size(&self) -> usize {
        2 + self.parked().map(|t| 2 + t.archive_size()).sum::<usize>()
    }

    pub fn archive<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        if self.slots.iter().any(|s| matches!(s, Slot::Running)) {
            warn!("Archiving thread list while a thread is running; it is not saved");
        }
        let count = self.parked().count();
        out.write_i16::<LittleEndian>(count as i16)?;
        debug!("... threadCount = {}", count);
        for thread in self.parked() {
            out.write_i16::<LittleEndian>(thread.id as i16)?;
            thread.archive(out)?;
        }
        Ok(())
    }

    /// Recreate archived threads in their original slots.
    pub fn restore<R: Read>(&mut self, input: &mut R) -> Result<usize, SaveError> {
        let count = input.read_i16::<LittleEndian>()?;
        debug!("... threadCount = {}", count);
        for _ in 0..count.max(0) {
            let id = input.read_i16::<LittleEndian>()? as ThreadId;
            let mut thread = Thread::restore(input)?;
            if thread.flags.contains(ThreadFlags::EXTENDED) {
                thread.flags.remove(ThreadFlags::EXTENDED);
                self.set_extended(&mut thread);
            }
            self.insert_at(id, thread)?;
        }
        Ok(count.max(0) as usize)
    }
}
