//! One cooperative SAGA execution context
//!
//! A thread owns its operand stack (a byte buffer that grows downward),
//! the program counter as a segment:offset pair, a frame pointer and its
//! wait state. Everything it addresses outside its own stack and argument
//! block lives in the interpreter.

use crate::address::Location;
use crate::config::INITIAL_FRAME_SIZE;
use crate::error::{SaveError, VmError, VmResult};
use crate::host::ScriptHost;
use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Thread identifier: the thread's slot in the thread list.
pub type ThreadId = u16;

/// Sentinel for "no thread", as stored by scripts.
pub const NO_THREAD: ThreadId = 0xffff;

bitflags! {
    /// Thread state bits. Stored verbatim in save games.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ThreadFlags: u16 {
        /// blocked on a delay, frame delay, TAG semaphore or native event
        const WAITING = 1 << 0;
        /// returned past its initial frame
        const FINISHED = 1 << 1;
        /// terminated externally or by a script error
        const ABORTED = 1 << 2;
        /// counts toward the extended-thread level
        const EXTENDED = 1 << 3;
        /// the native call that suspended this thread left a result slot
        const EXPECT_RESULT = 1 << 4;
        /// keeps the dispatcher on this thread until it yields
        const SYNCHRONOUS = 1 << 5;
        /// any state that ends the current time slice
        const ASLEEP = Self::WAITING.bits() | Self::FINISHED.bits() | Self::ABORTED.bits();
    }
}

/// What a waiting thread is waiting for. Not part of the save format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitType {
    #[default]
    None,
    Delay,
    FrameDelay,
    TagSemaphore,
    Other,
}

/// Coarse thread state derived from the flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Running,
    Waiting,
    Finished,
    Aborted,
}

/// Result of running a script synchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum ScriptResult {
    NoScript = 0,
    Aborted = 1,
    Finished = 2,
    Async = 3,
}

impl ScriptResult {
    /// Interpret a native function's return value as a script result.
    pub fn from_native(value: i16) -> Self {
        match value {
            1 => ScriptResult::Aborted,
            2 => ScriptResult::Finished,
            3 => ScriptResult::Async,
            _ => ScriptResult::NoScript,
        }
    }
}

/// A program counter: code segment and byte offset within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentOffset {
    pub segment: u16,
    pub offset: u16,
}

/// Timer measured in game-time ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Alarm {
    pub basetime: u32,
    pub duration: u32,
}

impl Alarm {
    pub fn set(&mut self, now: u32, duration: u32) {
        self.basetime = now;
        self.duration = duration;
    }

    pub fn check(&self, now: u32) -> bool {
        now.wrapping_sub(self.basetime) >= self.duration
    }

    pub fn remaining(&self, now: u32) -> u32 {
        self.duration.saturating_sub(now.wrapping_sub(self.basetime))
    }
}

/// Timer measured in rendered frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameAlarm {
    pub baseframe: u32,
    pub duration: u32,
}

impl FrameAlarm {
    pub fn set(&mut self, frame: u32, duration: u32) {
        self.baseframe = frame;
        self.duration = duration;
    }

    pub fn check(&self, frame: u32) -> bool {
        frame.wrapping_sub(self.baseframe) >= self.duration
    }
}

/// Size of the thread argument block addressed by `thread[...]` operands.
pub const CALL_FRAME_SIZE: usize = 20;

/// Arguments passed from native code into a script entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScriptCallFrame {
    /// object whose method is running
    pub invoked_object: u16,
    pub invoked_tai: u16,
    /// who triggered the action
    pub enactor: u16,
    pub direct_object: u16,
    pub direct_tai: u16,
    pub indirect_object: u16,
    pub indirect_tai: u16,
    pub value: i16,
    pub command: i16,
    pub return_value: i16,
}

impl ScriptCallFrame {
    pub fn to_bytes(&self) -> [u8; CALL_FRAME_SIZE] {
        let words = [
            self.invoked_object,
            self.invoked_tai,
            self.enactor,
            self.direct_object,
            self.direct_tai,
            self.indirect_object,
            self.indirect_tai,
            self.value as u16,
            self.command as u16,
            self.return_value as u16,
        ];
        let mut out = [0u8; CALL_FRAME_SIZE];
        for (chunk, word) in out.chunks_exact_mut(2).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8; CALL_FRAME_SIZE]) -> Self {
        let w = |i: usize| u16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]]);
        ScriptCallFrame {
            invoked_object: w(0),
            invoked_tai: w(1),
            enactor: w(2),
            direct_object: w(3),
            direct_tai: w(4),
            indirect_object: w(5),
            indirect_tai: w(6),
            value: w(7) as i16,
            command: w(8) as i16,
            return_value: w(9) as i16,
        }
    }
}

/// Fixed part of a thread archive, before the live stack bytes.
pub const THREAD_ARCHIVE_HEADER: usize = 22;

pub struct Thread {
    pub(crate) id: ThreadId,
    pub(crate) stack: Vec<u8>,
    /// byte offset of the top of stack
    pub(crate) stack_ptr: usize,
    /// byte offset of the current frame
    pub(crate) frame_ptr: u16,
    pub program_counter: SegmentOffset,
    pub flags: ThreadFlags,
    pub return_value: i16,
    pub wait_type: WaitType,
    pub wait_alarm: Alarm,
    pub wait_frame_alarm: FrameAlarm,
    /// TAG a semaphore wait is blocked on
    pub wait_param: u16,
    pub(crate) args: [u8; CALL_FRAME_SIZE],
    /// argument count of the native call in progress
    pub(crate) arg_count: u16,
    /// object a native member function was invoked on
    pub(crate) this_object: Option<Location>,
    pub(crate) valid: bool,
}

impl Thread {
    /// Fresh thread about to execute `segment:offset`.
    pub fn new(segment: u16, offset: u16, args: &ScriptCallFrame, stack_size: u16) -> Self {
        let size = stack_size as usize;
        Thread {
            id: NO_THREAD,
            stack: vec![0; size],
            // arg count, return offset, return segment, this segment, this index
            stack_ptr: size - INITIAL_FRAME_SIZE,
            frame_ptr: stack_size,
            program_counter: SegmentOffset { segment, offset },
            flags: ThreadFlags::empty(),
            return_value: 0,
            wait_type: WaitType::None,
            wait_alarm: Alarm::default(),
            wait_frame_alarm: FrameAlarm::default(),
            wait_param: 0,
            args: args.to_bytes(),
            arg_count: 0,
            this_object: None,
            valid: true,
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    pub fn stack_ptr(&self) -> usize {
        self.stack_ptr
    }

    pub fn frame_ptr(&self) -> u16 {
        self.frame_ptr
    }

    pub fn call_frame(&self) -> ScriptCallFrame {
        ScriptCallFrame::from_bytes(&self.args)
    }

    pub fn set_call_frame(&mut self, frame: &ScriptCallFrame) {
        self.args = frame.to_bytes();
    }

    pub(crate) fn invoked_object(&self) -> u16 {
        u16::from_le_bytes([self.args[0], self.args[1]])
    }

    pub(crate) fn set_invoked_object(&mut self, id: u16) {
        self.args[..2].copy_from_slice(&id.to_le_bytes());
    }

    pub fn args_bytes(&self) -> &[u8] {
        &self.args
    }

    pub fn args_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.args
    }

    pub fn stack_bytes(&self) -> &[u8] {
        &self.stack
    }

    pub fn stack_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.stack
    }

    // ---- state ----

    pub fn state(&self) -> ThreadState {
        if self.flags.contains(ThreadFlags::ABORTED) {
            ThreadState::Aborted
        } else if self.flags.contains(ThreadFlags::FINISHED) {
            ThreadState::Finished
        } else if self.flags.contains(ThreadFlags::WAITING) {
            ThreadState::Waiting
        } else {
            ThreadState::Running
        }
    }

    pub fn is_asleep(&self) -> bool {
        self.flags.intersects(ThreadFlags::ASLEEP)
    }

    pub fn is_done(&self) -> bool {
        self.flags
            .intersects(ThreadFlags::FINISHED | ThreadFlags::ABORTED)
    }

    pub fn abort(&mut self) {
        self.flags |= ThreadFlags::ABORTED;
    }

    pub fn set_synchronous(&mut self, on: bool) {
        self.flags.set(ThreadFlags::SYNCHRONOUS, on);
    }

    // ---- waiting ----

    pub fn wait_for_delay(&mut self, now: u32, ticks: u32) {
        self.wait_alarm.set(now, ticks);
        self.wait_type = WaitType::Delay;
        self.flags |= ThreadFlags::WAITING;
    }

    pub fn wait_for_frames(&mut self, frame: u32, frames: u32) {
        self.wait_frame_alarm.set(frame, frames);
        self.wait_type = WaitType::FrameDelay;
        self.flags |= ThreadFlags::WAITING;
    }

    pub fn wait_for_tag(&mut self, tag: u16) {
        self.wait_param = tag;
        self.wait_type = WaitType::TagSemaphore;
        self.flags |= ThreadFlags::WAITING;
    }

    /// Suspend until woken explicitly.
    pub fn sleep(&mut self) {
        self.wait_type = WaitType::Other;
        self.flags |= ThreadFlags::WAITING;
    }

    pub fn wake(&mut self) {
        self.flags.remove(ThreadFlags::WAITING);
    }

    /// Re-test the wait condition, waking the thread when it holds.
    /// A TAG semaphore is acquired as part of waking.
    pub fn check_wait(&mut self, host: &mut dyn ScriptHost) -> bool {
        if !self.flags.contains(ThreadFlags::WAITING) {
            return true;
        }
        let ready = match self.wait_type {
            WaitType::Delay => self.wait_alarm.check(host.game_time()),
            WaitType::FrameDelay => self.wait_frame_alarm.check(host.frame_count()),
            WaitType::TagSemaphore => {
                if host.tag_is_exclusive(self.wait_param) {
                    false
                } else {
                    host.set_tag_exclusive(self.wait_param, true);
                    true
                }
            }
            WaitType::None | WaitType::Other => false,
        };
        if ready {
            self.wake();
        }
        ready
    }

    // ---- operand stack ----

    pub fn push(&mut self, value: i16) -> VmResult<()> {
        if self.stack_ptr < 2 {
            return Err(VmError::StackOverflow(self.id));
        }
        self.stack_ptr -= 2;
        let sp = self.stack_ptr;
        self.stack[sp..sp + 2].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn pop(&mut self) -> VmResult<i16> {
        let value = self.peek()?;
        self.stack_ptr += 2;
        Ok(value)
    }

    pub fn peek(&self) -> VmResult<i16> {
        self.stack_word(self.stack_ptr)
    }

    /// Overwrite the top of stack.
    pub fn set_top(&mut self, value: i16) -> VmResult<()> {
        let sp = self.stack_ptr;
        self.set_stack_word(sp, value)
    }

    /// Word at byte offset `offset` into the stack buffer.
    pub fn stack_word(&self, offset: usize) -> VmResult<i16> {
        self.stack
            .get(offset..offset + 2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .ok_or(VmError::StackUnderflow(self.id))
    }

    pub fn set_stack_word(&mut self, offset: usize, value: i16) -> VmResult<()> {
        let id = self.id;
        self.stack
            .get_mut(offset..offset + 2)
            .ok_or(VmError::StackUnderflow(id))?
            .copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Drop `count` words.
    pub fn discard(&mut self, count: usize) -> VmResult<()> {
        let sp = self.stack_ptr + 2 * count;
        if sp > self.stack.len() {
            return Err(VmError::StackUnderflow(self.id));
        }
        self.stack_ptr = sp;
        Ok(())
    }

    /// Reserve `count` words.
    pub fn reserve(&mut self, count: usize) -> VmResult<()> {
        if 2 * count > self.stack_ptr {
            return Err(VmError::StackOverflow(self.id));
        }
        self.stack_ptr -= 2 * count;
        Ok(())
    }

    /// Live operand stack below the initial frame, top first, for tracing.
    pub fn stack_words(&self, limit: usize) -> (Vec<i16>, bool) {
        let end = self.stack.len().saturating_sub(INITIAL_FRAME_SIZE);
        let live = end.saturating_sub(self.stack_ptr) / 2;
        let words = (0..live.min(limit))
            .filter_map(|i| self.stack_word(self.stack_ptr + 2 * i).ok())
            .collect();
        (words, live > limit)
    }

    /// Write the `this` pair into the initial frame.
    pub(crate) fn set_initial_this(&mut self, segment: u16, index: u16) -> VmResult<()> {
        let base = self.stack.len() - INITIAL_FRAME_SIZE;
        self.set_stack_word(base + 6, segment as i16)?;
        self.set_stack_word(base + 8, index as i16)
    }

    // ---- save games ----

    /// Bytes `archive` will write.
    pub fn archive_size(&self) -> usize {
        THREAD_ARCHIVE_HEADER + (self.stack.len() - self.stack_ptr)
    }

    pub fn archive<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        let stack_offset = self.stack.len() - self.stack_ptr;
        out.write_u16::<LittleEndian>(self.program_counter.segment)?;
        out.write_u16::<LittleEndian>(self.program_counter.offset)?;
        out.write_i16::<LittleEndian>(self.stack.len() as i16)?;
        out.write_i16::<LittleEndian>(self.flags.bits() as i16)?;
        out.write_i16::<LittleEndian>(self.frame_ptr as i16)?;
        out.write_i16::<LittleEndian>(self.return_value)?;
        out.write_u32::<LittleEndian>(self.wait_alarm.basetime)?;
        out.write_u32::<LittleEndian>(self.wait_alarm.duration)?;
        out.write_i16::<LittleEndian>(stack_offset as i16)?;
        out.write_all(&self.stack[self.stack_ptr..])?;
        Ok(())
    }

    /// Rebuild a thread from `archive` output. The argument block and any
    /// frame alarm are not part of the format; a restored waiting thread
    /// waits on its delay alarm.
    pub fn restore<R: Read>(input: &mut R) -> Result<Self, SaveError> {
        let segment = input.read_u16::<LittleEndian>()?;
        let offset = input.read_u16::<LittleEndian>()?;
        let stack_size = input.read_i16::<LittleEndian>()?;
        let flags = ThreadFlags::from_bits_truncate(input.read_i16::<LittleEndian>()? as u16);
        let frame_ptr = input.read_i16::<LittleEndian>()?;
        let return_value = input.read_i16::<LittleEndian>()?;
        let basetime = input.read_u32::<LittleEndian>()?;
        let duration = input.read_u32::<LittleEndian>()?;
        let stack_offset = input.read_i16::<LittleEndian>()?;

        if stack_size <= 0 || stack_offset < 0 || stack_offset > stack_size || frame_ptr < 0 {
            return Err(SaveError::Truncated("thread record"));
        }
        // every stack must hold the initial frame plus one word
        if (stack_size as usize) < INITIAL_FRAME_SIZE + 2
            || stack_size % 2 != 0
            || frame_ptr > stack_size
        {
            return Err(SaveError::Truncated("thread record"));
        }

        let size = stack_size as usize;
        let mut stack = vec![0u8; size];
        let stack_ptr = size - stack_offset as usize;
        input.read_exact(&mut stack[stack_ptr..])?;

        Ok(Thread {
            id: NO_THREAD,
            stack,
            stack_ptr,
            frame_ptr: frame_ptr as u16,
            program_counter: SegmentOffset { segment, offset },
            flags,
            return_value,
            wait_type: if flags.contains(ThreadFlags::WAITING) {
                WaitType::Delay
            } else {
                WaitType::None
            },
            wait_alarm: Alarm { basetime, duration },
            wait_frame_alarm: FrameAlarm::default(),
            wait_param: 0,
            args: [0; CALL_FRAME_SIZE],
            arg_count: 0,
            this_object: None,
            valid: true,
        })
    }
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("pc", &self.program_counter)
            .field("sp", &self.stack_ptr)
            .field("fp", &self.frame_ptr)
            .field("flags", &self.flags)
            .field("wait", &self.wait_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn asleep_mask_covers_waiting_finished_aborted() {
        assert_eq!(ThreadFlags::ASLEEP.bits(), 0x07);
        assert_eq!(ThreadFlags::SYNCHRONOUS.bits(), 0x20);
    }

    #[test]
    fn initial_frame_layout() {
        let th = Thread::new(3, 0x10, &ScriptCallFrame::default(), 512);
        assert_eq!(th.stack_ptr(), 502);
        assert_eq!(th.frame_ptr(), 512);
        assert_eq!(th.stack_word(502).unwrap(), 0);
        assert_eq!(th.archive_size(), THREAD_ARCHIVE_HEADER + 10);
    }

    #[test]
    fn push_pop_and_overflow() {
        let mut th = Thread::new(0, 0, &ScriptCallFrame::default(), 14);
        th.push(-5).unwrap();
        assert_eq!(th.peek().unwrap(), -5);
        assert_eq!(th.pop().unwrap(), -5);
        th.push(1).unwrap();
        th.push(2).unwrap();
        assert_eq!(th.push(3), Err(VmError::StackOverflow(NO_THREAD)));
    }

    #[test]
    fn alarm_checks_elapsed_ticks() {
        let mut alarm = Alarm::default();
        alarm.set(100, 10);
        assert!(!alarm.check(109));
        assert!(alarm.check(110));
        assert_eq!(alarm.remaining(104), 6);
    }

    #[test]
    fn call_frame_bytes_are_little_endian_words() {
        let frame = ScriptCallFrame {
            invoked_object: 0x1234,
            value: -2,
            ..Default::default()
        };
        let bytes = frame.to_bytes();
        assert_eq!(&bytes[..2], &[0x34, 0x12]);
        assert_eq!(&bytes[14..16], &[0xfe, 0xff]);
        assert_eq!(ScriptCallFrame::from_bytes(&bytes), frame);
    }

    #[test]
    fn archive_layout_is_fixed() {
        let mut th = Thread::new(7, 0x22, &ScriptCallFrame::default(), 512);
        th.push(0x0102).unwrap();
        th.flags = ThreadFlags::WAITING | ThreadFlags::EXTENDED;
        th.return_value = -1;
        th.wait_alarm.set(0x01020304, 60);

        let mut buf = Vec::new();
        th.archive(&mut buf).unwrap();
        assert_eq!(buf.len(), th.archive_size());
        assert_eq!(&buf[0..4], &[7, 0, 0x22, 0]);
        assert_eq!(&buf[4..6], &512i16.to_le_bytes());
        assert_eq!(&buf[6..8], &[0x09, 0]);
        assert_eq!(&buf[8..10], &512i16.to_le_bytes());
        assert_eq!(&buf[10..12], &[0xff, 0xff]);
        assert_eq!(&buf[12..16], &0x01020304u32.to_le_bytes());
        assert_eq!(&buf[16..20], &60u32.to_le_bytes());
        assert_eq!(&buf[20..22], &12i16.to_le_bytes());
        assert_eq!(&buf[22..24], &[0x02, 0x01]);
    }

    #[test]
    fn restore_rejects_bad_stack_offset() {
        let mut th = Thread::new(1, 0, &ScriptCallFrame::default(), 32);
        th.push(9).unwrap();
        let mut buf = Vec::new();
        th.archive(&mut buf).unwrap();
        buf[20..22].copy_from_slice(&40i16.to_le_bytes());
        assert!(Thread::restore(&mut buf.as_slice()).is_err());
    }

    /// A record with no stack bytes saved and the given header fields.
    fn record(stack_size: i16, frame_ptr: i16) -> Vec<u8> {
        let mut buf = vec![0u8; THREAD_ARCHIVE_HEADER];
        buf[0..2].copy_from_slice(&1u16.to_le_bytes());
        buf[4..6].copy_from_slice(&stack_size.to_le_bytes());
        buf[8..10].copy_from_slice(&frame_ptr.to_le_bytes());
        buf
    }

    #[test]
    fn restore_rejects_unusable_stack_size() {
        // too small for the initial frame
        assert!(Thread::restore(&mut record(6, 2).as_slice()).is_err());
        assert!(Thread::restore(&mut record(10, 10).as_slice()).is_err());
        // odd
        assert!(Thread::restore(&mut record(33, 33).as_slice()).is_err());
        // frame pointer past the stack
        assert!(Thread::restore(&mut record(32, 34).as_slice()).is_err());

        let mut th = Thread::restore(&mut record(12, 12).as_slice()).unwrap();
        assert_eq!(th.stack_size(), 12);
        th.set_initial_this(4, 5).unwrap();
    }
}
