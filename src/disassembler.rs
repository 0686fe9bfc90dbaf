use crate::instruction::{Instruction, Opcode};

pub struct Disassembler<'a> {
    code: &'a [u8],
}

impl<'a> Disassembler<'a> {
    pub fn new(code: &'a [u8]) -> Self {
        Disassembler { code }
    }

    /// Name stored before an `enter`: the characters, then their count.
    fn script_name(&self, entry: usize) -> Option<String> {
        let length_at = entry.checked_sub(1)?;
        let length = *self.code.get(length_at)? as usize;
        if length == 0 {
            return None;
        }
        let start = length_at.checked_sub(length)?;
        let name = self.code.get(start..length_at)?;
        if !name.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            return None;
        }
        Some(String::from_utf8_lossy(name).into_owned())
    }

    /// Disassemble up to `count` instructions starting at `start`, or to
    /// the end of the segment. Decoding stops at the first byte that is
    /// not an instruction.
    pub fn disassemble(&self, start: usize, count: Option<usize>) -> Result<String, String> {
        let mut output = format!("Disassembly starting at {start:#06x}:\n\n");
        let mut pc = start;
        let mut decoded = 0;

        while count.map_or(true, |max| decoded < max) {
            if pc >= self.code.len() {
                output.push_str(&format!("{pc:#06x}: <end of segment>\n"));
                break;
            }
            let instruction = Instruction::decode(self.code, pc)?;
            output.push_str(&self.format_instruction(&instruction));
            output.push('\n');
            pc += instruction.size;
            decoded += 1;
        }
        Ok(output)
    }

    pub fn format_instruction(&self, instruction: &Instruction) -> String {
        let offset = instruction.offset;
        let mut line = String::new();
        if instruction.opcode == Opcode::Enter {
            if let Some(name) = self.script_name(offset) {
                line.push_str(&format!("\n; {name}\n"));
            }
        }
        let bytes = &self.code[offset..offset + instruction.size];
        let hex: Vec<String> = bytes.iter().take(8).map(|b| format!("{b:02x}")).collect();
        let more = if bytes.len() > 8 { ".." } else { "" };
        line.push_str(&format!(
            "[{offset:04} {offset:#06x}]: {:<26} {instruction}",
            hex.join(" ") + more
        ));
        line
    }
}
