/// Branch operations for the SAGA interpreter
///
/// Jump targets are offsets within the current code segment.
use crate::error::{VmError, VmResult};
use crate::instruction::Opcode;
use crate::interpreter::{ExecutionResult, Interpreter};
use crate::thread::{SegmentOffset, Thread};
use crate::zrand::restricted_random;
use log::debug;

impl Interpreter {
    pub(crate) fn execute_branch_op(
        &mut self,
        op: Opcode,
        thread: &mut Thread,
        at: SegmentOffset,
    ) -> VmResult<ExecutionResult> {
        match op {
            Opcode::Jmp => {
                let target = self.fetch_word(thread)?;
                Self::branch(thread, target);
            }
            Opcode::JmpTrueV | Opcode::JmpFalseV | Opcode::JmpTrue | Opcode::JmpFalse => {
                let target = self.fetch_word(thread)?;
                let value = match op {
                    Opcode::JmpTrueV | Opcode::JmpFalseV => thread.pop()?,
                    _ => thread.peek()?,
                };
                let wanted = matches!(op, Opcode::JmpTrueV | Opcode::JmpTrue);
                if (value != 0) == wanted {
                    Self::branch(thread, target);
                }
            }
            Opcode::JmpSwitch => self.jump_switch(thread)?,
            Opcode::JmpRandom | Opcode::JmpSeedRandom => self.jump_random(op, thread, at)?,
            _ => return Err(Self::misrouted(op, thread)),
        }
        Ok(ExecutionResult::Continue)
    }

    fn branch(thread: &mut Thread, target: u16) {
        debug!("BRANCH({} {:#06x})", target, target);
        thread.program_counter.offset = target;
    }

    /// Linear scan of (value, target) cases, then the default target.
    fn jump_switch(&mut self, thread: &mut Thread) -> VmResult<()> {
        let count = self.fetch_word(thread)?;
        let value = thread.pop()?;
        for _ in 0..count {
            let case = self.fetch_word(thread)?;
            let target = self.fetch_word(thread)?;
            debug!("Case {}: jmp {}", case, target);
            // the scrutinee is signed and the case value unsigned, so a
            // negative scrutinee never matches
            if value as i32 == case as i32 {
                Self::branch(thread, target);
                return Ok(());
            }
        }
        let default = self.fetch_word(thread)?;
        Self::branch(thread, default);
        Ok(())
    }

    /// Weighted random jump. A number is drawn below the table's total
    /// weight and each case's weight is subtracted from it in turn; the
    /// case that takes it below zero is taken.
    fn jump_random(&mut self, op: Opcode, thread: &mut Thread, at: SegmentOffset) -> VmResult<()> {
        let exhausted = VmError::RandomTableExhausted {
            segment: at.segment,
            offset: at.offset,
        };

        let (mut n, count) = if op == Opcode::JmpSeedRandom {
            let seed = thread.pop()?;
            let restriction = self.fetch_word(thread)? as i16;
            let count = self.fetch_word(thread)?;
            let total = self.fetch_word(thread)? as i16;
            let n = restricted_random(&mut self.rand, total, restriction, seed)
                .ok_or(exhausted.clone())?;
            (n, count)
        } else {
            let count = self.fetch_word(thread)?;
            let total = self.fetch_word(thread)?;
            (self.rand.random_below(total) as i16, count)
        };

        for _ in 0..count {
            let weight = self.fetch_word(thread)?;
            let target = self.fetch_word(thread)?;
            n = n.wrapping_sub(weight as i16);
            if n < 0 {
                Self::branch(thread, target);
                return Ok(());
            }
        }
        Err(exhausted)
    }
}
