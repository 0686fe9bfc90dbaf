//! SAGA bytecode: opcodes, addressing modes and a standalone decoder
//!
//! The interpreter core reads operands inline while it executes; the
//! decoder here exists for the disassembler and for trace logging, and
//! must agree with the core on every operand layout.

use std::fmt::{self, Display, Formatter};

/// Operand addressing modes. The tag byte precedes the mode's immediates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AddressMode {
    /// offset into the process data segment
    Data = 0,
    /// offset into the current code segment
    Near = 1,
    /// explicit segment:offset
    Far = 2,
    /// segment:index:offset through a length-prefixed array segment
    Array = 3,
    /// signed offset from the frame pointer
    Stack = 4,
    /// offset into the thread argument block
    Thread = 5,
    /// offset relative to the invoked object
    This = 6,
    /// indirect through a stored index, then segment:offset
    Deref = 7,
}

impl AddressMode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => AddressMode::Data,
            1 => AddressMode::Near,
            2 => AddressMode::Far,
            3 => AddressMode::Array,
            4 => AddressMode::Stack,
            5 => AddressMode::Thread,
            6 => AddressMode::This,
            7 => AddressMode::Deref,
            _ => return None,
        })
    }
}

/// Opcodes understood by the VM.
///
/// Gaps in the numbering belong to compiler-only operations (string
/// handling, compound assignment) that never reach compiled segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Dup = 2,
    Drop = 3,
    Zero = 4,
    One = 5,
    ConstInt = 6,
    StrLit = 8,

    GetFlag = 13,
    GetByte = 14,
    GetInt = 15,
    PutFlag = 18,
    PutByte = 19,
    PutInt = 20,
    PutFlagV = 24,
    PutByteV = 25,
    PutIntV = 26,

    CallNear = 30,
    CallFar = 31,
    CCall = 32,
    CCallV = 33,
    CallMember = 34,
    CallMemberV = 35,
    Enter = 36,
    Return = 37,
    ReturnV = 38,

    Jmp = 39,
    JmpTrueV = 40,
    JmpFalseV = 41,
    JmpTrue = 42,
    JmpFalse = 43,
    JmpSwitch = 44,
    JmpRandom = 46,

    Negate = 47,
    Not = 48,
    Compl = 49,
    IncV = 50,
    DecV = 51,
    PostInc = 52,
    PostDec = 53,

    Add = 54,
    Sub = 55,
    Mul = 56,
    Div = 57,
    Mod = 58,

    Eq = 61,
    Ne = 62,
    Gt = 63,
    Lt = 64,
    Ge = 65,
    Le = 66,

    Rsh = 73,
    Lsh = 74,
    And = 75,
    Or = 76,
    Xor = 77,
    Land = 78,
    Lor = 79,
    Lxor = 80,

    Speak = 95,
    DialogBegin = 96,
    DialogEnd = 97,
    Reply = 98,
    Animate = 99,
    JmpSeedRandom = 100,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        use Opcode::*;
        Some(match byte {
            2 => Dup,
            3 => Drop,
            4 => Zero,
            5 => One,
            6 => ConstInt,
            8 => StrLit,
            13 => GetFlag,
            14 => GetByte,
            15 => GetInt,
            18 => PutFlag,
            19 => PutByte,
            20 => PutInt,
            24 => PutFlagV,
            25 => PutByteV,
            26 => PutIntV,
            30 => CallNear,
            31 => CallFar,
            32 => CCall,
            33 => CCallV,
            34 => CallMember,
            35 => CallMemberV,
            36 => Enter,
            37 => Return,
            38 => ReturnV,
            39 => Jmp,
            40 => JmpTrueV,
            41 => JmpFalseV,
            42 => JmpTrue,
            43 => JmpFalse,
            44 => JmpSwitch,
            46 => JmpRandom,
            47 => Negate,
            48 => Not,
            49 => Compl,
            50 => IncV,
            51 => DecV,
            52 => PostInc,
            53 => PostDec,
            54 => Add,
            55 => Sub,
            56 => Mul,
            57 => Div,
            58 => Mod,
            61 => Eq,
            62 => Ne,
            63 => Gt,
            64 => Lt,
            65 => Ge,
            66 => Le,
            73 => Rsh,
            74 => Lsh,
            75 => And,
            76 => Or,
            77 => Xor,
            78 => Land,
            79 => Lor,
            80 => Lxor,
            95 => Speak,
            96 => DialogBegin,
            97 => DialogEnd,
            98 => Reply,
            99 => Animate,
            100 => JmpSeedRandom,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            Dup => "dup",
            Drop => "drop",
            Zero => "zero",
            One => "one",
            ConstInt => "constint",
            StrLit => "strlit",
            GetFlag => "getflag",
            GetByte => "getbyte",
            GetInt => "getint",
            PutFlag => "putflag",
            PutByte => "putbyte",
            PutInt => "putint",
            PutFlagV => "putflag_v",
            PutByteV => "putbyte_v",
            PutIntV => "putint_v",
            CallNear => "call_near",
            CallFar => "call_far",
            CCall => "ccall",
            CCallV => "ccall_v",
            CallMember => "call_member",
            CallMemberV => "call_member_v",
            Enter => "enter",
            Return => "return",
            ReturnV => "return_v",
            Jmp => "jmp",
            JmpTrueV => "jmp_true_v",
            JmpFalseV => "jmp_false_v",
            JmpTrue => "jmp_true",
            JmpFalse => "jmp_false",
            JmpSwitch => "jmp_switch",
            JmpRandom => "jmp_random",
            Negate => "negate",
            Not => "not",
            Compl => "compl",
            IncV => "inc_v",
            DecV => "dec_v",
            PostInc => "postinc",
            PostDec => "postdec",
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Div => "div",
            Mod => "mod",
            Eq => "eq",
            Ne => "ne",
            Gt => "gt",
            Lt => "lt",
            Ge => "ge",
            Le => "le",
            Rsh => "rsh",
            Lsh => "lsh",
            And => "and",
            Or => "or",
            Xor => "xor",
            Land => "land",
            Lor => "lor",
            Lxor => "lxor",
            Speak => "speak",
            DialogBegin => "dialog_begin",
            DialogEnd => "dialog_end",
            Reply => "reply",
            Animate => "animate",
            JmpSeedRandom => "jmp_seedrandom",
        }
    }
}

/// A decoded operand reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Data(u16),
    Near(u16),
    Far { segment: u16, offset: u16 },
    Array { segment: u16, index: u16, offset: u16 },
    Stack(i16),
    Thread(u16),
    This(u16),
    Deref {
        reference: Box<Operand>,
        segment: u16,
        offset: u16,
    },
}

impl Display for Operand {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Data(o) => write!(f, "data[{o}]"),
            Operand::Near(o) => write!(f, "near[{o}]"),
            Operand::Far { segment, offset } => write!(f, "far[{}:{offset}]", *segment as i16),
            Operand::Array {
                segment,
                index,
                offset,
            } => write!(f, "array[{}:{index}:{offset}]", *segment as i16),
            Operand::Stack(o) => write!(f, "stack[{o}]"),
            Operand::Thread(o) => write!(f, "thread[{o}]"),
            Operand::This(o) => write!(f, "this[{o}]"),
            Operand::Deref {
                reference,
                segment,
                offset,
            } => write!(f, "deref[{reference} -> {}:{offset}]", *segment as i16),
        }
    }
}

/// Instruction payloads, one shape per operand layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Args {
    None,
    Word(u16),
    Address(Operand),
    /// call_near: argument count, target offset
    Near { argc: u8, offset: u16 },
    /// call_far: argument count, target segment:offset
    Far { argc: u8, segment: u16, offset: u16 },
    /// ccall: argument count, native function number
    Native { argc: u8, func: u16 },
    /// call_member: argument count, vtable slot, object
    Member { argc: u8, slot: u8, object: Operand },
    /// jmp_switch: (value, target) cases then default target
    Switch { cases: Vec<(u16, u16)>, default: u16 },
    /// jmp_random / jmp_seedrandom: (weight, target) cases
    Random {
        restriction: Option<u16>,
        total: u16,
        cases: Vec<(u16, u16)>,
    },
}

/// A decoded SAGA instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub offset: usize,
    pub opcode: Opcode,
    pub args: Args,
    /// Total encoded size in bytes
    pub size: usize,
}

struct Reader<'a> {
    code: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn byte(&mut self) -> Result<u8, String> {
        let b = *self
            .code
            .get(self.pos)
            .ok_or_else(|| format!("Truncated instruction at {:#06x}", self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn word(&mut self) -> Result<u16, String> {
        let lo = self.byte()? as u16;
        let hi = self.byte()? as u16;
        Ok(lo | (hi << 8))
    }

    fn operand(&mut self, allow_near: bool) -> Result<Operand, String> {
        let tag = self.byte()?;
        let mode = AddressMode::from_byte(tag)
            .ok_or_else(|| format!("Invalid addressing mode {tag} at {:#06x}", self.pos - 1))?;
        Ok(match mode {
            AddressMode::Data => Operand::Data(self.word()?),
            AddressMode::Near if allow_near => Operand::Near(self.word()?),
            AddressMode::Near => {
                return Err(format!(
                    "Near addressing not allowed for objects at {:#06x}",
                    self.pos - 1
                ))
            }
            AddressMode::Far => Operand::Far {
                segment: self.word()?,
                offset: self.word()?,
            },
            AddressMode::Array => Operand::Array {
                segment: self.word()?,
                index: self.word()?,
                offset: self.word()?,
            },
            AddressMode::Stack => Operand::Stack(self.word()? as i16),
            AddressMode::Thread => Operand::Thread(self.word()?),
            AddressMode::This => Operand::This(self.word()?),
            AddressMode::Deref => {
                let reference = Box::new(self.operand(true)?);
                Operand::Deref {
                    reference,
                    segment: self.word()?,
                    offset: self.word()?,
                }
            }
        })
    }
}

impl Instruction {
    /// Decode the instruction at `offset` within a code segment.
    pub fn decode(code: &[u8], offset: usize) -> Result<Self, String> {
        let mut r = Reader { code, pos: offset };
        let byte = r.byte()?;
        let opcode = Opcode::from_byte(byte)
            .ok_or_else(|| format!("Undefined opcode {byte:#04x} at {offset:#06x}"))?;

        use Opcode::*;
        let args = match opcode {
            ConstInt | StrLit | Enter | Jmp | JmpTrueV | JmpFalseV | JmpTrue | JmpFalse => {
                Args::Word(r.word()?)
            }
            GetFlag | GetByte | GetInt | PutFlag | PutByte | PutInt | PutFlagV | PutByteV
            | PutIntV | IncV | DecV | PostInc | PostDec => Args::Address(r.operand(true)?),
            CallNear => Args::Near {
                argc: r.byte()?,
                offset: r.word()?,
            },
            CallFar => Args::Far {
                argc: r.byte()?,
                segment: r.word()?,
                offset: r.word()?,
            },
            CCall | CCallV => Args::Native {
                argc: r.byte()?,
                func: r.word()?,
            },
            CallMember | CallMemberV => Args::Member {
                argc: r.byte()?,
                slot: r.byte()?,
                object: r.operand(false)?,
            },
            JmpSwitch => {
                let count = r.word()?;
                let mut cases = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    cases.push((r.word()?, r.word()?));
                }
                Args::Switch {
                    cases,
                    default: r.word()?,
                }
            }
            JmpRandom | JmpSeedRandom => {
                let restriction = if opcode == JmpSeedRandom {
                    Some(r.word()?)
                } else {
                    None
                };
                let count = r.word()?;
                let total = r.word()?;
                let mut cases = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    cases.push((r.word()?, r.word()?));
                }
                Args::Random {
                    restriction,
                    total,
                    cases,
                }
            }
            _ => Args::None,
        };

        Ok(Instruction {
            offset,
            opcode,
            args,
            size: r.pos - offset,
        })
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode.name())?;
        match &self.args {
            Args::None => Ok(()),
            Args::Word(w) => write!(f, " {w}"),
            Args::Address(op) => write!(f, " {op}"),
            Args::Near { argc, offset } => write!(f, " {offset:#06x} ({argc} args)"),
            Args::Far {
                argc,
                segment,
                offset,
            } => write!(f, " {segment}:{offset:#06x} ({argc} args)"),
            Args::Native { argc, func } => write!(f, " #{func} ({argc} args)"),
            Args::Member { argc, slot, object } => {
                write!(f, " {object}.{slot} ({argc} args)")
            }
            Args::Switch { cases, default } => {
                for (value, target) in cases {
                    write!(f, " {value}->{target:#06x}")?;
                }
                write!(f, " default->{default:#06x}")
            }
            Args::Random {
                restriction,
                total,
                cases,
            } => {
                if let Some(r) = restriction {
                    write!(f, " restrict={r}")?;
                }
                write!(f, " total={total}")?;
                for (weight, target) in cases {
                    write!(f, " {weight}->{target:#06x}")?;
                }
                Ok(())
            }
        }
    }
}
