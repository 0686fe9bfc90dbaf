/// Arithmetic, comparison and logical operations for the SAGA interpreter
///
/// Operands are 16-bit signed words. Binary operators combine the second
/// word on the stack (left) with the top word (right) and replace both
/// with the result, truncated to 16 bits the way the original compiler's
/// int arithmetic did.
use crate::error::{VmError, VmResult};
use crate::instruction::Opcode;
use crate::interpreter::{ExecutionResult, Interpreter};
use crate::thread::{SegmentOffset, Thread};
use log::debug;

impl Interpreter {
    pub(crate) fn execute_math_op(
        &mut self,
        op: Opcode,
        thread: &mut Thread,
        at: SegmentOffset,
    ) -> VmResult<ExecutionResult> {
        match op {
            Opcode::Negate | Opcode::Not | Opcode::Compl => {
                let top = thread.peek()?;
                let value = match op {
                    Opcode::Negate => top.wrapping_neg(),
                    Opcode::Not => (top == 0) as i16,
                    _ => !top,
                };
                thread.set_top(value)?;
            }
            _ => {
                let right = thread.pop()?;
                let left = thread.peek()?;
                let value = Self::binary(op, left, right, at, thread)?;
                debug!("{} {} {} = {}", op.name(), left, right, value);
                thread.set_top(value)?;
            }
        }
        Ok(ExecutionResult::Continue)
    }

    fn binary(
        op: Opcode,
        left: i16,
        right: i16,
        at: SegmentOffset,
        thread: &Thread,
    ) -> VmResult<i16> {
        let (a, b) = (left as i32, right as i32);
        let divide_by_zero = VmError::DivideByZero {
            segment: at.segment,
            offset: at.offset,
        };
        let value = match op {
            Opcode::Add => a + b,
            Opcode::Sub => a - b,
            Opcode::Mul => a.wrapping_mul(b),
            Opcode::Div => a.checked_div(b).ok_or(divide_by_zero)?,
            Opcode::Mod => a.checked_rem(b).ok_or(divide_by_zero)?,

            Opcode::Eq => (a == b) as i32,
            Opcode::Ne => (a != b) as i32,
            Opcode::Gt => (a > b) as i32,
            Opcode::Lt => (a < b) as i32,
            Opcode::Ge => (a >= b) as i32,
            Opcode::Le => (a <= b) as i32,

            // shift counts outside 0..32 shift everything out
            Opcode::Rsh => a
                .checked_shr(b as u32)
                .unwrap_or(if a < 0 { -1 } else { 0 }),
            Opcode::Lsh => a.checked_shl(b as u32).unwrap_or(0),
            Opcode::And => a & b,
            Opcode::Or => a | b,
            Opcode::Xor => a ^ b,

            Opcode::Land => (a != 0 && b != 0) as i32,
            Opcode::Lor => (a != 0 || b != 0) as i32,
            Opcode::Lxor => ((a != 0) != (b != 0)) as i32,

            _ => return Err(Self::misrouted(op, thread)),
        };
        Ok(value as i16)
    }
}
