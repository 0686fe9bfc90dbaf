//! The SAGA interpreter context
//!
//! [`Interpreter`] owns everything that was process-wide in the engine:
//! the data segment, the export table, the segment cache, the thread list
//! and the random source. The host creates one when the script system
//! starts and drops it at shutdown.
//!
//! Opcode execution is split by category across `opcodes_memory.rs`,
//! `opcodes_math.rs`, `opcodes_call.rs` and `opcodes_branch.rs`.

use crate::address::Location;
use crate::config::ScriptConfig;
use crate::error::{ScriptError, VmError, VmResult};
use crate::host::{BuiltinType, CallTable, NativeCall, ScriptHost, VTableEntry};
use crate::instruction::Opcode;
use crate::segment::{ExportTable, ScriptResources, SegmentCache};
use crate::thread::{
    ScriptCallFrame, ScriptResult, Thread, ThreadFlags, ThreadId, WaitType, NO_THREAD,
};
use crate::thread_list::ThreadList;
use crate::zrand::ScriptRand;
use log::{debug, info, log_enabled, warn, Level};
use std::collections::HashMap;

/// Words of operand stack shown by stack tracing.
const STACK_PRINT_DEPTH: usize = 30;

/// Outcome of a single instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Keep going
    Continue,
    /// The thread can do no more this time slice
    Yield,
    /// The thread returned past its initial frame
    Finished,
}

pub struct Interpreter {
    pub(crate) config: ScriptConfig,
    pub(crate) segments: SegmentCache,
    pub(crate) data_segment: Vec<u8>,
    pristine_data: Vec<u8>,
    pub(crate) data_index: u16,
    exports: ExportTable,
    threads: ThreadList,
    pub(crate) rand: ScriptRand,
    /// decoded vtable slots, by vtable segment, offset and slot
    vtables: HashMap<(u16, usize, u16), VTableEntry>,
    last_export: u16,
}

impl Interpreter {
    /// Load the data segment and export table and set up an empty
    /// thread list.
    pub fn new(mut resources: Box<dyn ScriptResources>, config: ScriptConfig) -> VmResult<Self> {
        config.validate().map_err(VmError::BadConfig)?;
        let data = resources
            .load_data_segment()
            .ok_or(VmError::MissingResource("data segment"))?;
        let exports = resources
            .load_export_table()
            .ok_or(VmError::MissingResource("export table"))?;
        let data_index = resources.data_segment_index();
        let exports = ExportTable::new(exports);
        info!(
            "Script data segment: {} bytes; {} exports",
            data.len(),
            exports.count()
        );

        Ok(Interpreter {
            config,
            segments: SegmentCache::new(resources),
            pristine_data: data.clone(),
            data_segment: data,
            data_index,
            exports,
            threads: ThreadList::new(),
            rand: ScriptRand::new_uniform(),
            vtables: HashMap::new(),
            last_export: 0,
        })
    }

    /// Replace the engine random source, e.g. with a predictable one.
    pub fn with_rand(mut self, rand: ScriptRand) -> Self {
        match rand.seed() {
            Some(seed) => info!("Script random source is predictable (seed {})", seed),
            None => info!("Script random source is uniform"),
        }
        self.rand = rand;
        self
    }

    pub fn config(&self) -> &ScriptConfig {
        &self.config
    }

    pub fn threads(&self) -> &ThreadList {
        &self.threads
    }

    pub fn threads_mut(&mut self) -> &mut ThreadList {
        &mut self.threads
    }

    pub fn thread(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.get(id)
    }

    pub fn extended_level(&self) -> i16 {
        self.threads.extended_level()
    }

    pub fn data_segment(&self) -> &[u8] {
        &self.data_segment
    }

    pub fn data_segment_mut(&mut self) -> &mut [u8] {
        &mut self.data_segment
    }

    /// Put the data segment back to its state at load time.
    pub fn reset_data_segment(&mut self) {
        self.data_segment.copy_from_slice(&self.pristine_data);
    }

    /// Bytes of script segment `index`, loading it if needed.
    pub fn segment(&mut self, index: u16) -> VmResult<&[u8]> {
        self.segments.get(index)
    }

    /// Export most recently resolved; for diagnostics.
    pub fn last_export(&self) -> u16 {
        self.last_export
    }

    pub fn lookup_export(&mut self, entry: u16) -> VmResult<(u16, u16)> {
        self.last_export = entry;
        self.exports.lookup(entry)
    }

    /// Name stored just before a function's entry point: a length byte
    /// preceded by that many characters.
    pub fn script_name(&mut self, segment: u16, offset: u16) -> Option<String> {
        let code = self.segments.get(segment).ok()?;
        let length_at = (offset as usize).checked_sub(1)?;
        let length = *code.get(length_at)? as usize;
        let start = length_at.checked_sub(length)?;
        let name = code.get(start..start + length.min(31))?;
        Some(String::from_utf8_lossy(name).into_owned())
    }

    /// Drop every thread and cached vtable.
    pub fn cleanup(&mut self) {
        self.threads.cleanup();
        self.vtables.clear();
    }

    /// Swap in a restored thread list. Cached vtables are dropped with
    /// the old threads.
    pub(crate) fn replace_threads(&mut self, threads: ThreadList) {
        self.cleanup();
        self.threads = threads;
    }

    // ---- threads ----

    /// Create a thread at `segment:offset` holding a slot but checked out.
    fn spawn(&mut self, segment: u16, offset: u16, args: &ScriptCallFrame) -> VmResult<Box<Thread>> {
        let code = self.segments.get(segment)?;
        let valid = code.get(offset as usize) == Some(&(Opcode::Enter as u8));
        let mut thread = Box::new(Thread::new(segment, offset, args, self.config.stack_size));
        thread.valid = valid;
        self.threads.insert_running(&mut thread)?;
        debug!("Created thread {} at {}:{:#06x}", thread.id(), segment, offset);
        Ok(thread)
    }

    /// Queue export `export` as a new thread for the dispatcher without
    /// running it. Returns `None` if the entry point is not a function.
    pub fn start_script(&mut self, export: u16, args: &ScriptCallFrame) -> VmResult<Option<ThreadId>> {
        let (segment, offset) = self.lookup_export(export)?;
        let mut thread = self.spawn(segment, offset, args)?;
        if !thread.is_valid() {
            debug!("Scripts: {} is not valid", self.last_export);
            self.threads.release(&mut thread);
            return Ok(None);
        }
        let id = thread.id();
        self.threads.checkin(thread);
        Ok(Some(id))
    }

    pub fn wake_up_thread(&mut self, id: ThreadId) -> VmResult<()> {
        if id == NO_THREAD {
            return Ok(());
        }
        self.threads
            .get_mut(id)
            .ok_or(VmError::UnknownThread(id))?
            .wake();
        Ok(())
    }

    /// Wake a thread suspended in a native call, handing it the call's
    /// result if it is waiting for one.
    pub fn wake_up_thread_with_result(&mut self, id: ThreadId, value: i16) -> VmResult<()> {
        if id == NO_THREAD {
            return Ok(());
        }
        let thread = self.threads.get_mut(id).ok_or(VmError::UnknownThread(id))?;
        if thread.flags.contains(ThreadFlags::EXPECT_RESULT) {
            debug!("Result {}", value);
            thread.return_value = value;
            thread.set_top(value)?;
        } else {
            debug!("Thread {} not expecting result!", id);
        }
        thread
            .flags
            .remove(ThreadFlags::WAITING | ThreadFlags::EXPECT_RESULT);
        Ok(())
    }

    /// Request termination. The thread is removed the next time the
    /// dispatcher visits it.
    pub fn abort_thread(&mut self, id: ThreadId) -> VmResult<()> {
        self.threads
            .get_mut(id)
            .ok_or(VmError::UnknownThread(id))?
            .abort();
        Ok(())
    }

    pub(crate) fn script_error(
        &self,
        thread: &mut Thread,
        host: &mut dyn ScriptHost,
        error: ScriptError,
    ) {
        warn!(
            "Script error in thread {} at {}:{:#06x}: {}",
            thread.id(),
            thread.program_counter.segment,
            thread.program_counter.offset,
            error
        );
        thread.abort();
        host.status_message(&error.to_string());
    }

    // ---- execution ----

    /// Execute up to one time slice of `thread`. Returns `true` when the
    /// thread finished by returning past its initial frame.
    pub fn interpret(&mut self, thread: &mut Thread, host: &mut dyn ScriptHost) -> VmResult<bool> {
        for _ in 0..self.config.max_time_slice {
            if self.config.trace_stack {
                Self::trace_stack(thread);
            }
            match self.step(thread, host)? {
                ExecutionResult::Continue => {}
                ExecutionResult::Yield => break,
                ExecutionResult::Finished => return Ok(true),
            }
        }
        Ok(false)
    }

    fn step(&mut self, thread: &mut Thread, host: &mut dyn ScriptHost) -> VmResult<ExecutionResult> {
        let start = thread.program_counter;
        let byte = self.fetch_byte(thread)?;
        let op = Opcode::from_byte(byte).ok_or(VmError::UndefinedOpcode {
            opcode: byte,
            segment: start.segment,
            offset: start.offset,
        })?;
        debug!("[{:04} {:#06x}]: {}", start.offset, start.offset, op.name());

        use Opcode::*;
        match op {
            Dup | Drop | Zero | One | ConstInt | StrLit | GetFlag | GetByte | GetInt | PutFlag
            | PutByte | PutInt | PutFlagV | PutByteV | PutIntV | IncV | DecV | PostInc
            | PostDec => self.execute_memory_op(op, thread, host),

            Negate | Not | Compl | Add | Sub | Mul | Div | Mod | Eq | Ne | Gt | Lt | Ge | Le
            | Rsh | Lsh | And | Or | Xor | Land | Lor | Lxor => {
                self.execute_math_op(op, thread, start)
            }

            Enter | Return | ReturnV | CallNear | CallFar | CCall | CCallV | CallMember
            | CallMemberV => self.execute_call_op(op, thread, host),

            Jmp | JmpTrueV | JmpFalseV | JmpTrue | JmpFalse | JmpSwitch | JmpRandom
            | JmpSeedRandom => self.execute_branch_op(op, thread, start),

            Speak | DialogBegin | DialogEnd | Reply | Animate => {
                self.script_error(thread, host, ScriptError::NotImplemented);
                Ok(ExecutionResult::Yield)
            }
        }
    }

    /// Error for an opcode handed to the wrong category handler.
    pub(crate) fn misrouted(op: Opcode, thread: &Thread) -> VmError {
        VmError::UndefinedOpcode {
            opcode: op as u8,
            segment: thread.program_counter.segment,
            offset: thread.program_counter.offset,
        }
    }

    fn trace_stack(thread: &Thread) {
        let (words, truncated) = thread.stack_words(STACK_PRINT_DEPTH);
        let marker = if truncated { " ..." } else { "" };
        debug!("stack: {:?}{}", words, marker);
    }

    fn stopped_result(thread: &Thread) -> Option<ScriptResult> {
        if thread.flags.contains(ThreadFlags::FINISHED) {
            Some(ScriptResult::Finished)
        } else if thread.flags.contains(ThreadFlags::WAITING) {
            Some(ScriptResult::Async)
        } else if thread.flags.contains(ThreadFlags::ABORTED) {
            Some(ScriptResult::Aborted)
        } else {
            None
        }
    }

    /// Drive a thread until it stops, within the configured run limit.
    fn run(&mut self, thread: &mut Thread, host: &mut dyn ScriptHost) -> VmResult<ScriptResult> {
        for _ in 0..self.config.run_limit {
            if let Some(result) = Self::stopped_result(thread) {
                return Ok(result);
            }
            self.interpret(thread, host)?;
        }
        Err(VmError::ThreadHung(thread.id()))
    }

    /// Run an existing thread until it stops.
    pub fn run_thread(&mut self, id: ThreadId, host: &mut dyn ScriptHost) -> VmResult<ScriptResult> {
        let mut thread = self.threads.checkout(id).ok_or(VmError::UnknownThread(id))?;
        let result = self.run(&mut thread, host);
        self.threads.checkin(thread);
        result
    }

    fn run_spawned(
        &mut self,
        mut thread: Box<Thread>,
        host: &mut dyn ScriptHost,
        args: &mut ScriptCallFrame,
        this: Option<(BuiltinType, u16)>,
    ) -> VmResult<ScriptResult> {
        if !thread.is_valid() {
            debug!("Scripts: {} is not valid", self.last_export);
            self.threads.release(&mut thread);
            return Ok(ScriptResult::NoScript);
        }

        if log_enabled!(Level::Debug) {
            let pc = thread.program_counter;
            let name = self.script_name(pc.segment, pc.offset).unwrap_or_default();
            let object = match this {
                Some((kind, index)) => host.object_name(Some(kind), index),
                None => host.object_name(None, pc.offset),
            };
            debug!("Scripts: {} kOpEnter: [{}].{}", self.last_export, object, name);
        }

        let result = match this {
            Some((kind, index)) => thread
                .set_initial_this(kind.segment(), index)
                .and_then(|_| self.run(&mut thread, host)),
            None => self.run(&mut thread, host),
        };
        args.return_value = thread.return_value;

        match result {
            Ok(ScriptResult::Async) => self.threads.checkin(thread),
            _ => self.threads.release(&mut thread),
        }
        result
    }

    /// Run exported function `export` to completion or until it waits.
    /// A waiting thread stays in the thread list; `args.return_value`
    /// receives the thread's return value either way.
    pub fn run_script(
        &mut self,
        host: &mut dyn ScriptHost,
        export: u16,
        args: &mut ScriptCallFrame,
    ) -> VmResult<ScriptResult> {
        let (segment, offset) = self.lookup_export(export)?;
        let thread = self.spawn(segment, offset, args)?;
        self.run_spawned(thread, host, args, None)
    }

    /// Run member function `method` of script class `script_class` on
    /// builtin object `index`.
    pub fn run_method(
        &mut self,
        host: &mut dyn ScriptHost,
        script_class: u16,
        btype: BuiltinType,
        index: u16,
        method: u16,
        args: &mut ScriptCallFrame,
    ) -> VmResult<ScriptResult> {
        // an abstract object is its own class
        let index = if btype == BuiltinType::Abstract {
            script_class
        } else {
            index
        };

        let (segment, offset) = self.lookup_export(script_class)?;
        let vtable = self.segment_address(segment, offset)?;

        match self.vtable_entry(host, vtable, method)? {
            VTableEntry::Null => Ok(ScriptResult::NoScript),
            VTableEntry::Native(func) => {
                self.check_native(host, CallTable::Global, func)?;
                // natives run on a scratch thread carrying the arguments
                let mut thread = Box::new(Thread::new(0, 0, args, self.config.stack_size));
                self.threads.insert_running(&mut thread)?;
                let value = {
                    let mut call = NativeCall::new(&mut thread, self);
                    host.call_native(CallTable::Global, func, &mut call)
                };
                self.threads.release(&mut thread);
                Ok(ScriptResult::from_native(value?))
            }
            VTableEntry::Script { segment, offset } => {
                let thread = self.spawn(segment, offset, args)?;
                self.run_spawned(thread, host, args, Some((btype, index)))
            }
        }
    }

    pub fn run_object_method(
        &mut self,
        host: &mut dyn ScriptHost,
        id: u16,
        method: u16,
        args: &mut ScriptCallFrame,
    ) -> VmResult<ScriptResult> {
        let class = host.builtin_script_class(BuiltinType::Object, id);
        if class == 0 {
            return Err(VmError::NoScriptClass {
                kind: BuiltinType::Object.name(),
                index: id,
            });
        }
        self.run_method(host, class, BuiltinType::Object, id, method, args)
    }

    pub fn run_tag_method(
        &mut self,
        host: &mut dyn ScriptHost,
        index: u16,
        method: u16,
        args: &mut ScriptCallFrame,
    ) -> VmResult<ScriptResult> {
        let class = host.builtin_script_class(BuiltinType::Tag, index);
        if class == 0 {
            return Ok(ScriptResult::NoScript);
        }
        self.run_method(host, class, BuiltinType::Tag, index, method, args)
    }

    /// Slot `slot` of the vtable at `vtable`.
    pub(crate) fn vtable_entry(
        &mut self,
        host: &mut dyn ScriptHost,
        vtable: Location,
        slot: u16,
    ) -> VmResult<VTableEntry> {
        let key = match vtable {
            Location::Segment { segment, offset } => Some((segment, offset, slot)),
            _ => None,
        };
        if let Some(entry) = key.and_then(|k| self.vtables.get(&k)) {
            return Ok(*entry);
        }
        let at = vtable.offset_by(4 * slot as usize);
        let first = self.read_shared_word(host, at)?;
        let second = self.read_shared_word(host, at.offset_by(2))?;
        let entry = VTableEntry::decode(first, second);
        if let Some(k) = key {
            self.vtables.insert(k, entry);
        }
        Ok(entry)
    }

    pub(crate) fn check_native(
        &self,
        host: &dyn ScriptHost,
        table: CallTable,
        func: u16,
    ) -> VmResult<()> {
        if (func as i16) < 0 || func as usize >= host.native_count(table) {
            return Err(VmError::InvalidFunction {
                table: table.name(),
                func: func as i16 as i32,
            });
        }
        Ok(())
    }

    // ---- dispatcher ----

    fn log_census(&self) {
        if !log_enabled!(Level::Debug) {
            return;
        }
        let (mut execute, mut delay, mut frames, mut semaphore, mut other) = (0, 0, 0, 0, 0);
        for thread in self.threads.parked() {
            if thread.flags.contains(ThreadFlags::WAITING) {
                match thread.wait_type {
                    WaitType::Delay => delay += 1,
                    WaitType::FrameDelay => frames += 1,
                    WaitType::TagSemaphore => semaphore += 1,
                    WaitType::None | WaitType::Other => other += 1,
                }
            } else {
                execute += 1;
            }
        }
        debug!(
            "Threads:{} X:{} D:{} F:{} T:{} O:{}",
            self.threads.len(),
            execute,
            delay,
            frames,
            semaphore,
            other
        );
    }

    /// Give every thread its time slice for this tick, in slot order.
    ///
    /// Finished and aborted threads are destroyed; waiting threads whose
    /// condition now holds are woken; synchronous threads run until they
    /// stop. A thread finishing by returning past its initial frame ends
    /// the pass.
    pub fn dispatch(&mut self, host: &mut dyn ScriptHost) -> VmResult<()> {
        self.log_census();

        let mut cursor = self.threads.first();
        while let Some(id) = cursor {
            cursor = self.threads.next(id);

            let Some(mut thread) = self.threads.checkout(id) else {
                continue;
            };

            if thread.is_done() {
                self.threads.release(&mut thread);
                continue;
            }

            thread.check_wait(host);

            let outcome = loop {
                if thread.is_asleep() {
                    break Ok(false);
                }
                match self.interpret(&mut thread, host) {
                    Ok(false) => {}
                    other => break other,
                }
                if !thread.flags.contains(ThreadFlags::SYNCHRONOUS) {
                    break Ok(false);
                }
            };
            self.threads.checkin(thread);

            if outcome? {
                break;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("config", &self.config)
            .field("data_segment", &self.data_segment.len())
            .field("exports", &self.exports.count())
            .field("threads", &self.threads.len())
            .field("last_export", &self.last_export)
            .finish()
    }
}
