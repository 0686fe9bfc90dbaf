//! The game engine as seen from a script
//!
//! Builtin objects (actors, TAGs, missions), the native function tables
//! and the clocks all belong to the embedding game. The interpreter talks
//! to them through [`ScriptHost`]; native functions get a [`NativeCall`]
//! describing the thread that called them.

use crate::address::Location;
use crate::error::VmResult;
use crate::interpreter::Interpreter;
use crate::thread::{ScriptCallFrame, Thread, ThreadFlags, ThreadId};
use log::warn;

/// Builtin object classes, addressed by negative segment numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum BuiltinType {
    Object = -1,
    Tag = -2,
    Abstract = -3,
    Mission = -4,
}

impl BuiltinType {
    pub fn from_segment(segment: i16) -> Option<Self> {
        match segment {
            -1 => Some(BuiltinType::Object),
            -2 => Some(BuiltinType::Tag),
            -3 => Some(BuiltinType::Abstract),
            -4 => Some(BuiltinType::Mission),
            _ => None,
        }
    }

    pub fn segment(self) -> u16 {
        self as i16 as u16
    }

    /// Native table serving member functions of this class.
    pub fn call_table(self) -> Option<CallTable> {
        match self {
            BuiltinType::Object => Some(CallTable::Actor),
            BuiltinType::Tag => Some(CallTable::Tag),
            BuiltinType::Mission => Some(CallTable::Mission),
            BuiltinType::Abstract => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BuiltinType::Object => "GameObject",
            BuiltinType::Tag => "TAG",
            BuiltinType::Abstract => "Abstract",
            BuiltinType::Mission => "Mission",
        }
    }
}

/// The native function tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallTable {
    Global,
    Actor,
    Tag,
    Mission,
}

impl CallTable {
    pub fn name(self) -> &'static str {
        match self {
            CallTable::Global => "global",
            CallTable::Actor => "actor",
            CallTable::Tag => "TAG",
            CallTable::Mission => "mission",
        }
    }
}

/// One slot of a class vtable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VTableEntry {
    /// a compiled script function
    Script { segment: u16, offset: u16 },
    /// an entry in the class's native table
    Native(u16),
    /// pure virtual; calls do nothing
    Null,
}

impl VTableEntry {
    const UNUSED: u16 = 0xffff;

    pub fn decode(first: u16, second: u16) -> Self {
        if first != Self::UNUSED {
            VTableEntry::Script {
                segment: first,
                offset: second,
            }
        } else if second != Self::UNUSED {
            VTableEntry::Native(second)
        } else {
            VTableEntry::Null
        }
    }
}

/// Services the embedding game provides to scripts.
pub trait ScriptHost {
    /// Game clock in ticks, for delay waits.
    fn game_time(&self) -> u32;

    /// Frames rendered so far, for frame waits.
    fn frame_count(&self) -> u32;

    /// Script-visible data block of a builtin object.
    fn builtin_data(&mut self, kind: BuiltinType, index: u16) -> Option<&mut [u8]>;

    /// Export number of the object's script class; 0 if it has none.
    fn builtin_script_class(&self, kind: BuiltinType, index: u16) -> u16;

    /// Entries in a native table.
    fn native_count(&self, table: CallTable) -> usize;

    /// Call native `func` of `table`. Arguments are on the calling
    /// thread's stack, first argument on top.
    fn call_native(
        &mut self,
        table: CallTable,
        func: u16,
        call: &mut NativeCall<'_>,
    ) -> VmResult<i16>;

    fn tag_is_exclusive(&self, tag: u16) -> bool;

    fn set_tag_exclusive(&mut self, tag: u16, exclusive: bool);

    /// Status-line output, used for script errors.
    fn status_message(&mut self, message: &str) {
        warn!("{}", message);
    }

    /// Display name of an object, for trace logging.
    fn object_name(&self, kind: Option<BuiltinType>, index: u16) -> String {
        match kind {
            None => "SagaObject".to_string(),
            Some(BuiltinType::Abstract) => "@".to_string(),
            Some(kind) => format!("{}#{}", kind.name(), index),
        }
    }
}

/// What a native function sees of its caller.
pub struct NativeCall<'a> {
    pub thread: &'a mut Thread,
    pub vm: &'a mut Interpreter,
}

impl<'a> NativeCall<'a> {
    pub fn new(thread: &'a mut Thread, vm: &'a mut Interpreter) -> Self {
        NativeCall { thread, vm }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread.id()
    }

    pub fn arg_count(&self) -> u16 {
        self.thread.arg_count
    }

    /// Argument `i`, counting from the top of stack.
    pub fn arg(&self, i: usize) -> VmResult<i16> {
        self.thread.stack_word(self.thread.stack_ptr() + 2 * i)
    }

    pub fn args(&self) -> VmResult<Vec<i16>> {
        (0..self.arg_count() as usize).map(|i| self.arg(i)).collect()
    }

    /// Object a member function was invoked on.
    pub fn this_object(&self) -> Option<Location> {
        self.thread.this_object
    }

    pub fn invoked_object(&self) -> u16 {
        self.thread.invoked_object()
    }

    pub fn call_frame(&self) -> ScriptCallFrame {
        self.thread.call_frame()
    }

    /// String `n` of the calling code segment's string table.
    pub fn string(&mut self, n: u16) -> VmResult<String> {
        let location = self.vm.string_address(self.thread, n)?;
        self.vm.read_c_string(location)
    }

    /// Suspend the caller until it is woken explicitly.
    pub fn sleep(&mut self) {
        self.thread.sleep();
    }

    pub fn wait_for_delay(&mut self, now: u32, ticks: u32) {
        self.thread.wait_for_delay(now, ticks);
    }

    pub fn wait_for_frames(&mut self, frame: u32, frames: u32) {
        self.thread.wait_for_frames(frame, frames);
    }

    pub fn wait_for_tag(&mut self, tag: u16) {
        self.thread.wait_for_tag(tag);
    }

    /// Keep the dispatcher on the caller until it yields.
    pub fn set_synchronous(&mut self, on: bool) {
        self.thread.set_synchronous(on);
    }

    pub fn set_extended(&mut self) {
        self.vm.threads_mut().set_extended(self.thread);
    }

    pub fn clear_extended(&mut self) {
        self.vm.threads_mut().clear_extended(self.thread);
    }

    pub fn is_extended(&self) -> bool {
        self.thread.flags.contains(ThreadFlags::EXTENDED)
    }
}
