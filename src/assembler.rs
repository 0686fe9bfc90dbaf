//! A small assembler for SAGA bytecode
//!
//! Builds code segments and whole script images by hand, for tests and
//! for hosts that want to drive the VM without a compiled game. Jump and
//! call targets may be given as labels and are patched by
//! [`ScriptBuilder::build`].

use crate::instruction::{Opcode, Operand};
use crate::segment::{encode_exports, MemoryResources};
use std::collections::HashMap;
use std::path::Path;

/// Bytes at the start of every code segment: a reserved word, then the
/// segment and offset of the segment's string table.
pub const CODE_HEADER_SIZE: usize = 6;

#[derive(Debug, Clone)]
pub struct ScriptBuilder {
    code: Vec<u8>,
    labels: HashMap<String, u16>,
    fixups: Vec<(usize, String)>,
}

impl Default for ScriptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptBuilder {
    pub fn new() -> Self {
        ScriptBuilder {
            code: vec![0; CODE_HEADER_SIZE],
            labels: HashMap::new(),
            fixups: Vec::new(),
        }
    }

    /// Offset the next byte will be written at.
    pub fn here(&self) -> u16 {
        self.code.len() as u16
    }

    pub fn address_of(&self, label: &str) -> Option<u16> {
        self.labels.get(label).copied()
    }

    pub fn label(&mut self, name: &str) -> &mut Self {
        let here = self.here();
        self.labels.insert(name.to_string(), here);
        self
    }

    /// Point the segment header at a string table.
    pub fn string_table(&mut self, segment: u16, offset: u16) -> &mut Self {
        self.code[2..4].copy_from_slice(&segment.to_le_bytes());
        self.code[4..6].copy_from_slice(&offset.to_le_bytes());
        self
    }

    /// Lay out a string table here: a word offset per string, relative to
    /// the table, followed by the NUL-terminated strings.
    pub fn strings(&mut self, strings: &[&str]) -> &mut Self {
        let table = self.code.len();
        let mut next = 2 * strings.len();
        for s in strings {
            self.word(next as u16);
            next += s.len() + 1;
        }
        for s in strings {
            self.code.extend_from_slice(s.as_bytes());
            self.code.push(0);
        }
        debug_assert_eq!(self.code.len(), table + next);
        self
    }

    pub fn byte(&mut self, b: u8) -> &mut Self {
        self.code.push(b);
        self
    }

    pub fn word(&mut self, w: u16) -> &mut Self {
        self.code.extend_from_slice(&w.to_le_bytes());
        self
    }

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.code.extend_from_slice(data);
        self
    }

    /// Word holding the offset of `label`, patched at build time.
    pub fn target(&mut self, label: &str) -> &mut Self {
        self.fixups.push((self.code.len(), label.to_string()));
        self.word(0)
    }

    pub fn op(&mut self, op: Opcode) -> &mut Self {
        self.byte(op as u8)
    }

    /// Start a function: its name (characters then length byte), a label
    /// at the entry point and an `enter` reserving `locals` words.
    pub fn function(&mut self, name: &str, locals: u16) -> &mut Self {
        let name = &name.as_bytes()[..name.len().min(255)];
        self.bytes(name).byte(name.len() as u8);
        self.label(&String::from_utf8_lossy(name));
        self.op(Opcode::Enter).word(2 * locals)
    }

    pub fn constant(&mut self, value: i16) -> &mut Self {
        self.op(Opcode::ConstInt).word(value as u16)
    }

    pub fn operand(&mut self, operand: &Operand) -> &mut Self {
        match operand {
            Operand::Data(o) => self.byte(0).word(*o),
            Operand::Near(o) => self.byte(1).word(*o),
            Operand::Far { segment, offset } => self.byte(2).word(*segment).word(*offset),
            Operand::Array {
                segment,
                index,
                offset,
            } => self.byte(3).word(*segment).word(*index).word(*offset),
            Operand::Stack(o) => self.byte(4).word(*o as u16),
            Operand::Thread(o) => self.byte(5).word(*o),
            Operand::This(o) => self.byte(6).word(*o),
            Operand::Deref {
                reference,
                segment,
                offset,
            } => self.byte(7).operand(reference).word(*segment).word(*offset),
        }
    }

    /// An opcode taking one memory operand: the get, put and increment
    /// families.
    pub fn access(&mut self, op: Opcode, operand: Operand) -> &mut Self {
        self.op(op).operand(&operand)
    }

    pub fn call_near(&mut self, argc: u8, label: &str) -> &mut Self {
        self.op(Opcode::CallNear).byte(argc).target(label)
    }

    pub fn call_far(&mut self, argc: u8, segment: u16, offset: u16) -> &mut Self {
        self.op(Opcode::CallFar).byte(argc).word(segment).word(offset)
    }

    /// `ccall` or `ccall_v`.
    pub fn ccall(&mut self, op: Opcode, argc: u8, func: u16) -> &mut Self {
        self.op(op).byte(argc).word(func)
    }

    /// `call_member` or `call_member_v`.
    pub fn call_member(&mut self, op: Opcode, argc: u8, slot: u8, object: Operand) -> &mut Self {
        self.op(op).byte(argc).byte(slot).operand(&object)
    }

    pub fn jump(&mut self, op: Opcode, label: &str) -> &mut Self {
        self.op(op).target(label)
    }

    pub fn switch(&mut self, cases: &[(u16, &str)], default: &str) -> &mut Self {
        self.op(Opcode::JmpSwitch).word(cases.len() as u16);
        for (value, label) in cases {
            self.word(*value).target(label);
        }
        self.target(default)
    }

    /// `jmp_random` over (weight, label) cases; the total is their sum.
    pub fn random(&mut self, cases: &[(u16, &str)]) -> &mut Self {
        let total = cases.iter().map(|(w, _)| *w).fold(0u16, u16::wrapping_add);
        self.op(Opcode::JmpRandom).word(cases.len() as u16).word(total);
        for (weight, label) in cases {
            self.word(*weight).target(label);
        }
        self
    }

    pub fn seeded_random(&mut self, restriction: u16, cases: &[(u16, &str)]) -> &mut Self {
        let total = cases.iter().map(|(w, _)| *w).fold(0u16, u16::wrapping_add);
        self.op(Opcode::JmpSeedRandom)
            .word(restriction)
            .word(cases.len() as u16)
            .word(total);
        for (weight, label) in cases {
            self.word(*weight).target(label);
        }
        self
    }

    /// The finished segment with every label patched.
    pub fn build(&self) -> Result<Vec<u8>, String> {
        let mut code = self.code.clone();
        for (at, label) in &self.fixups {
            let target = self
                .labels
                .get(label)
                .ok_or_else(|| format!("Undefined label {label}"))?;
            code[*at..*at + 2].copy_from_slice(&target.to_le_bytes());
        }
        Ok(code)
    }
}

/// A script image: data segment, export table and code segments.
#[derive(Debug, Clone, Default)]
pub struct ImageBuilder {
    data: Vec<u8>,
    exports: Vec<(u16, u16)>,
    segments: HashMap<u16, Vec<u8>>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(&mut self, data: Vec<u8>) -> &mut Self {
        self.data = data;
        self
    }

    pub fn segment(&mut self, index: u16, bytes: Vec<u8>) -> &mut Self {
        self.segments.insert(index, bytes);
        self
    }

    /// Append an export entry; entries are numbered from 1.
    pub fn export(&mut self, segment: u16, offset: u16) -> u16 {
        self.exports.push((segment, offset));
        self.exports.len() as u16
    }

    pub fn export_table(&self) -> Vec<u8> {
        encode_exports(&self.exports)
    }

    pub fn resources(&self) -> MemoryResources {
        let mut resources = MemoryResources::new(self.data.clone(), self.export_table());
        resources.segments = self.segments.clone();
        resources
    }

    /// Write the image in the layout `DirectoryResources` reads.
    pub fn write_to_dir(&self, root: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(root)?;
        std::fs::write(root.join("data.bin"), &self.data)?;
        std::fs::write(root.join("exports.bin"), self.export_table())?;
        for (index, bytes) in &self.segments {
            std::fs::write(root.join(format!("seg_{index}.bin")), bytes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{Args, Instruction};

    #[test]
    fn labels_are_patched() {
        let mut b = ScriptBuilder::new();
        b.function("Main", 0)
            .jump(Opcode::Jmp, "end")
            .op(Opcode::Zero)
            .label("end")
            .op(Opcode::ReturnV);
        let code = b.build().unwrap();
        let entry = b.address_of("Main").unwrap() as usize;
        let jmp = Instruction::decode(&code, entry + 3).unwrap();
        assert_eq!(jmp.args, Args::Word(b.address_of("end").unwrap()));
    }

    #[test]
    fn undefined_label_fails_to_build() {
        let mut b = ScriptBuilder::new();
        b.jump(Opcode::Jmp, "nowhere");
        assert!(b.build().is_err());
    }

    #[test]
    fn operands_encode_as_decoded() {
        let operand = Operand::Deref {
            reference: Box::new(Operand::Stack(-2)),
            segment: 3,
            offset: 4,
        };
        let mut b = ScriptBuilder::new();
        let at = b.here() as usize;
        b.access(Opcode::GetInt, operand.clone());
        let code = b.build().unwrap();
        let inst = Instruction::decode(&code, at).unwrap();
        assert_eq!(inst.args, Args::Address(operand));
    }
}
