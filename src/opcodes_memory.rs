/// Stack and memory operations for the SAGA interpreter
///
/// Constants, duplication and every opcode that reads or writes through an
/// addressing mode: flags, bytes and words, plus the increment family.
/// "put" opcodes leave the stored value on the stack; the `_v` variants
/// consume it.
use crate::error::VmResult;
use crate::host::ScriptHost;
use crate::instruction::Opcode;
use crate::interpreter::{ExecutionResult, Interpreter};
use crate::thread::Thread;
use log::debug;

impl Interpreter {
    pub(crate) fn execute_memory_op(
        &mut self,
        op: Opcode,
        thread: &mut Thread,
        host: &mut dyn ScriptHost,
    ) -> VmResult<ExecutionResult> {
        match op {
            Opcode::Dup => {
                let top = thread.peek()?;
                thread.push(top)?;
            }
            Opcode::Drop => thread.discard(1)?,
            Opcode::Zero => thread.push(0)?,
            Opcode::One => thread.push(1)?,
            Opcode::ConstInt | Opcode::StrLit => {
                let w = self.fetch_word(thread)?;
                thread.push(w as i16)?;
                debug!("{} = {}", op.name(), w as i16);
            }

            Opcode::GetFlag => {
                let (location, mask) = self.bit_address(thread)?;
                let byte = self.read_byte(thread, host, location)?;
                thread.push((byte & mask != 0) as i16)?;
            }
            Opcode::GetByte => {
                let location = self.byte_address(thread, host)?;
                let byte = self.read_byte(thread, host, location)?;
                thread.push(byte as i16)?;
            }
            Opcode::GetInt => {
                let location = self.byte_address(thread, host)?;
                let word = self.read_word(thread, host, location)?;
                thread.push(word as i16)?;
            }

            Opcode::PutFlag | Opcode::PutFlagV => {
                let (location, mask) = self.bit_address(thread)?;
                let value = if op == Opcode::PutFlagV {
                    thread.pop()?
                } else {
                    thread.peek()?
                };
                let byte = self.read_byte(thread, host, location)?;
                let byte = if value != 0 { byte | mask } else { byte & !mask };
                self.write_byte(thread, host, location, byte)?;
            }
            Opcode::PutByte | Opcode::PutByteV => {
                let location = self.byte_address(thread, host)?;
                let value = if op == Opcode::PutByteV {
                    thread.pop()?
                } else {
                    thread.peek()?
                };
                self.write_byte(thread, host, location, value as u8)?;
            }
            Opcode::PutInt | Opcode::PutIntV => {
                let location = self.byte_address(thread, host)?;
                let value = if op == Opcode::PutIntV {
                    thread.pop()?
                } else {
                    thread.peek()?
                };
                self.write_word(thread, host, location, value as u16)?;
            }

            Opcode::IncV | Opcode::DecV => {
                let location = self.byte_address(thread, host)?;
                let word = self.read_word(thread, host, location)?;
                let word = if op == Opcode::IncV {
                    word.wrapping_add(1)
                } else {
                    word.wrapping_sub(1)
                };
                self.write_word(thread, host, location, word)?;
            }
            Opcode::PostInc | Opcode::PostDec => {
                let location = self.byte_address(thread, host)?;
                let word = self.read_word(thread, host, location)?;
                thread.push(word as i16)?;
                let word = if op == Opcode::PostInc {
                    word.wrapping_add(1)
                } else {
                    word.wrapping_sub(1)
                };
                self.write_word(thread, host, location, word)?;
            }

            _ => return Err(Self::misrouted(op, thread)),
        }
        Ok(ExecutionResult::Continue)
    }
}
