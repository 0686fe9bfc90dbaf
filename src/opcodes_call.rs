/// Call and return operations for the SAGA interpreter
///
/// Calls push a return record (argument count, return offset, return
/// segment) and transfer control; `enter` saves the caller's frame pointer
/// and reserves locals; the return opcodes unwind one frame, finishing the
/// thread when they unwind past its initial frame.
///
/// Native calls run host code directly on the calling thread's stack. A
/// native that puts the thread to sleep ends the time slice.
use crate::address::{Location, ObjectRef};
use crate::config::INITIAL_FRAME_SIZE;
use crate::error::{VmError, VmResult};
use crate::host::{BuiltinType, CallTable, NativeCall, ScriptHost, VTableEntry};
use crate::instruction::Opcode;
use crate::interpreter::{ExecutionResult, Interpreter};
use crate::thread::{SegmentOffset, Thread, ThreadFlags};
use log::{debug, log_enabled, Level};

impl Interpreter {
    pub(crate) fn execute_call_op(
        &mut self,
        op: Opcode,
        thread: &mut Thread,
        host: &mut dyn ScriptHost,
    ) -> VmResult<ExecutionResult> {
        match op {
            Opcode::Enter => {
                if log_enabled!(Level::Debug) {
                    let pc = thread.program_counter;
                    let name = self
                        .script_name(pc.segment, pc.offset.wrapping_sub(1))
                        .unwrap_or_default();
                    debug!("Scripts: {} kOpEnter: ::{}", self.last_export(), name);
                }
                let fp = thread.frame_ptr;
                thread.push(fp as i16)?;
                thread.frame_ptr = thread.stack_ptr as u16;
                let locals = self.fetch_word(thread)? as i16 / 2;
                if locals >= 0 {
                    thread.reserve(locals as usize)?;
                } else {
                    thread.discard(locals.unsigned_abs() as usize)?;
                }
            }

            Opcode::Return | Opcode::ReturnV => {
                if op == Opcode::Return {
                    thread.return_value = thread.pop()?;
                }
                thread.stack_ptr = thread.frame_ptr as usize;
                thread.frame_ptr = thread.pop()? as u16;

                if thread.stack_ptr >= thread.stack_size() - INITIAL_FRAME_SIZE {
                    thread.flags |= ThreadFlags::FINISHED;
                    debug!("Thread {} finished", thread.id());
                    return Ok(ExecutionResult::Finished);
                }

                let segment = thread.pop()? as u16;
                let offset = thread.pop()? as u16;
                self.segments.load(segment)?;
                thread.program_counter = SegmentOffset { segment, offset };

                let argc = thread.pop()?;
                if argc >= 0 {
                    thread.discard(argc as usize)?;
                } else {
                    thread.reserve(argc.unsigned_abs() as usize)?;
                }
                if op == Opcode::Return {
                    let value = thread.return_value;
                    thread.push(value)?;
                }
            }

            Opcode::CallNear => {
                let argc = self.fetch_byte(thread)?;
                let target = self.fetch_word(thread)?;
                Self::push_return(thread, argc as i16)?;
                thread.program_counter.offset = target;
            }

            Opcode::CallFar => {
                let argc = self.fetch_byte(thread)?;
                let segment = self.fetch_word(thread)?;
                let offset = self.fetch_word(thread)?;
                Self::push_return(thread, argc as i16)?;
                self.segments.load(segment)?;
                thread.program_counter = SegmentOffset { segment, offset };
            }

            Opcode::CCall | Opcode::CCallV => {
                let argc = self.fetch_byte(thread)? as u16;
                let func = self.fetch_word(thread)?;
                self.check_native(host, CallTable::Global, func)?;
                thread.arg_count = argc;
                let value = self.call_native(thread, host, CallTable::Global, func)?;
                return Self::finish_native(thread, op == Opcode::CCall, argc, value);
            }

            Opcode::CallMember | Opcode::CallMemberV => {
                let argc = self.fetch_byte(thread)? as u16;
                let slot = self.fetch_byte(thread)? as u16;
                let object = self.object_address(thread, host)?;
                let (vtable, table) = self.member_vtable(thread, host, &object)?;

                match self.vtable_entry(host, vtable, slot)? {
                    VTableEntry::Script { segment, offset } => {
                        thread.push(object.index as i16)?;
                        thread.push(object.segment as i16)?;
                        // 'this' counts as two argument words
                        Self::push_return(thread, argc as i16 + 2)?;
                        self.segments.load(segment)?;
                        thread.program_counter = SegmentOffset { segment, offset };
                        debug!(
                            "Member call {}.{} -> {}:{:#06x}",
                            host.object_name(
                                BuiltinType::from_segment(object.segment as i16),
                                object.index
                            ),
                            slot,
                            segment,
                            offset
                        );
                    }
                    VTableEntry::Native(func) => {
                        let table = table.ok_or(VmError::InvalidFunction {
                            table: "abstract",
                            func: func as i16 as i32,
                        })?;
                        self.check_native(host, table, func)?;

                        let saved = thread.invoked_object();
                        thread.this_object = Some(object.location);
                        thread.arg_count = argc;
                        thread.set_invoked_object(object.index);
                        let value = self.call_native(thread, host, table, func);
                        thread.set_invoked_object(saved);

                        return Self::finish_native(thread, op == Opcode::CallMember, argc, value?);
                    }
                    VTableEntry::Null => {
                        if op == Opcode::CallMember {
                            thread.push(0)?;
                        }
                    }
                }
            }

            _ => return Err(Self::misrouted(op, thread)),
        }
        Ok(ExecutionResult::Continue)
    }

    /// Push argument count, return offset and return segment.
    fn push_return(thread: &mut Thread, argc: i16) -> VmResult<()> {
        let pc = thread.program_counter;
        thread.push(argc)?;
        thread.push(pc.offset as i16)?;
        thread.push(pc.segment as i16)
    }

    fn call_native(
        &mut self,
        thread: &mut Thread,
        host: &mut dyn ScriptHost,
        table: CallTable,
        func: u16,
    ) -> VmResult<i16> {
        debug!("Native call {}[{}]", table.name(), func);
        let mut call = NativeCall::new(thread, self);
        host.call_native(table, func, &mut call)
    }

    fn finish_native(
        thread: &mut Thread,
        with_result: bool,
        argc: u16,
        value: i16,
    ) -> VmResult<ExecutionResult> {
        thread.return_value = value;
        thread.discard(argc as usize)?;
        if with_result {
            thread.push(value)?;
            thread.flags |= ThreadFlags::EXPECT_RESULT;
        } else {
            thread.flags.remove(ThreadFlags::EXPECT_RESULT);
        }
        if thread.is_asleep() {
            Ok(ExecutionResult::Yield)
        } else {
            Ok(ExecutionResult::Continue)
        }
    }

    /// The vtable and native table serving an object's member functions.
    ///
    /// Builtin objects find their class through the host; an abstract
    /// object is its own vtable and has no native table. Script objects
    /// start with the segment and offset of their class vtable.
    fn member_vtable(
        &mut self,
        thread: &mut Thread,
        host: &mut dyn ScriptHost,
        object: &ObjectRef,
    ) -> VmResult<(Location, Option<CallTable>)> {
        if (object.segment as i16) >= 0 {
            let segment = self.read_word(thread, host, object.location)?;
            let offset = self.read_word(thread, host, object.location.offset_by(2))?;
            return Ok((self.segment_address(segment, offset)?, Some(CallTable::Global)));
        }

        let kind = BuiltinType::from_segment(object.segment as i16)
            .ok_or(VmError::InvalidBuiltin(object.segment as i16))?;
        if kind == BuiltinType::Abstract {
            return Ok((object.location, None));
        }
        let class = host.builtin_script_class(kind, object.index);
        if class == 0 {
            return Err(VmError::NoScriptClass {
                kind: kind.name(),
                index: object.index,
            });
        }
        let (segment, offset) = self.lookup_export(class)?;
        Ok((self.segment_address(segment, offset)?, kind.call_table()))
    }
}
