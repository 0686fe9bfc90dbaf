//! Operand addressing
//!
//! Every memory operand is decoded into a [`Location`] naming the storage
//! it refers to: the thread's argument block or stack, the data segment,
//! a script segment, or a builtin object's data block. Reads and writes
//! through a location are bounds-checked; an access outside its region is
//! a fatal [`VmError::BadAddress`].

use crate::error::{VmError, VmResult};
use crate::host::{BuiltinType, ScriptHost};
use crate::instruction::AddressMode;
use crate::interpreter::Interpreter;
use crate::thread::Thread;
use log::debug;

/// Resolved storage for a memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// byte offset into the thread argument block
    Thread(usize),
    /// byte offset into the thread stack
    Stack(usize),
    /// byte offset into the data segment
    Data(usize),
    Segment { segment: u16, offset: usize },
    Builtin {
        kind: BuiltinType,
        index: u16,
        offset: usize,
    },
}

impl Location {
    pub fn offset(&self) -> usize {
        match *self {
            Location::Thread(o) | Location::Stack(o) | Location::Data(o) => o,
            Location::Segment { offset, .. } | Location::Builtin { offset, .. } => offset,
        }
    }

    /// The same storage, `delta` bytes further on.
    pub fn offset_by(self, delta: usize) -> Location {
        match self {
            Location::Thread(o) => Location::Thread(o + delta),
            Location::Stack(o) => Location::Stack(o + delta),
            Location::Data(o) => Location::Data(o + delta),
            Location::Segment { segment, offset } => Location::Segment {
                segment,
                offset: offset + delta,
            },
            Location::Builtin {
                kind,
                index,
                offset,
            } => Location::Builtin {
                kind,
                index,
                offset: offset + delta,
            },
        }
    }

    fn region(&self) -> &'static str {
        match self {
            Location::Thread(_) => "thread arguments",
            Location::Stack(_) => "thread stack",
            Location::Data(_) => "data segment",
            Location::Segment { .. } => "script segment",
            Location::Builtin { kind, .. } => kind.name(),
        }
    }
}

/// An object operand: where it lives plus the (segment, index) pair that
/// names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectRef {
    pub location: Location,
    pub segment: u16,
    pub index: u16,
}

/// Maximum length read for a NUL-terminated script string.
const MAX_STRING: usize = 1024;

impl Interpreter {
    // ---- instruction stream ----

    pub(crate) fn fetch_byte(&mut self, thread: &mut Thread) -> VmResult<u8> {
        let pc = thread.program_counter;
        let code = self.segments.get(pc.segment)?;
        let byte = *code
            .get(pc.offset as usize)
            .ok_or(VmError::BadAddress {
                region: "code segment",
                offset: pc.offset as isize,
                size: code.len(),
            })?;
        thread.program_counter.offset = pc.offset.wrapping_add(1);
        Ok(byte)
    }

    pub(crate) fn fetch_word(&mut self, thread: &mut Thread) -> VmResult<u16> {
        let lo = self.fetch_byte(thread)? as u16;
        let hi = self.fetch_byte(thread)? as u16;
        Ok(lo | (hi << 8))
    }

    // ---- segment routing ----

    /// Storage of builtin object `index`. Abstract objects are script
    /// classes and resolve through the export table.
    pub(crate) fn builtin_address(&mut self, kind: BuiltinType, index: u16) -> VmResult<Location> {
        match kind {
            BuiltinType::Abstract => {
                let (segment, offset) = self.lookup_export(index)?;
                self.segment_address(segment, offset)
            }
            _ => Ok(Location::Builtin {
                kind,
                index,
                offset: 0,
            }),
        }
    }

    /// `segment:offset`, where a negative segment names a builtin class
    /// and `offset` is then the object index.
    pub(crate) fn segment_address(&mut self, segment: u16, offset: u16) -> VmResult<Location> {
        if (segment as i16) < 0 {
            let kind = BuiltinType::from_segment(segment as i16)
                .ok_or(VmError::InvalidBuiltin(segment as i16))?;
            return self.builtin_address(kind, offset);
        }
        if segment == self.data_index {
            return Ok(Location::Data(offset as usize));
        }
        self.segments.load(segment)?;
        Ok(Location::Segment {
            segment,
            offset: offset as usize,
        })
    }

    /// Element `index` of an array segment. The segment starts with the
    /// element size as a word; element offsets wrap at 16 bits.
    pub(crate) fn segment_array_address(&mut self, segment: u16, index: u16) -> VmResult<Location> {
        if (segment as i16) < 0 {
            let kind = BuiltinType::from_segment(segment as i16)
                .ok_or(VmError::InvalidBuiltin(segment as i16))?;
            return self.builtin_address(kind, index);
        }
        let bytes = self.segments.get(segment)?;
        let header = bytes.get(0..2).ok_or(VmError::BadAddress {
            region: "array segment",
            offset: 0,
            size: bytes.len(),
        })?;
        let element_size = i16::from_le_bytes([header[0], header[1]]);
        let element = (index as i32).wrapping_mul(element_size as i32) as u16;
        Ok(Location::Segment {
            segment,
            offset: 2 + element as usize,
        })
    }

    /// The invoked object's (segment, index), stored just above the
    /// caller's frame pointer.
    fn this_object(&self, thread: &Thread) -> VmResult<(u16, u16)> {
        let fp = thread.frame_ptr() as usize;
        let segment = thread.stack_word(fp + 8)? as u16;
        let index = thread.stack_word(fp + 10)? as u16;
        Ok((segment, index))
    }

    fn this_address(&mut self, segment: u16, index: u16) -> VmResult<Location> {
        if segment == self.data_index {
            Ok(Location::Data(index as usize))
        } else {
            self.segment_array_address(segment, index)
        }
    }

    fn stack_location(thread: &Thread, delta: isize) -> VmResult<Location> {
        let offset = thread.frame_ptr() as isize + delta;
        if offset < 0 || offset as usize >= thread.stack_size() {
            return Err(VmError::BadAddress {
                region: "thread stack",
                offset,
                size: thread.stack_size(),
            });
        }
        Ok(Location::Stack(offset as usize))
    }

    fn address_mode(&mut self, thread: &mut Thread, context: &'static str) -> VmResult<AddressMode> {
        let tag = self.fetch_byte(thread)?;
        AddressMode::from_byte(tag).ok_or(VmError::InvalidAddressMode { context, mode: tag })
    }

    // ---- operand decoding ----

    /// Decode a byte or word operand.
    pub(crate) fn byte_address(
        &mut self,
        thread: &mut Thread,
        host: &mut dyn ScriptHost,
    ) -> VmResult<Location> {
        let location = match self.address_mode(thread, "byteAddress")? {
            AddressMode::Data => Location::Data(self.fetch_word(thread)? as usize),
            AddressMode::Near => Location::Segment {
                segment: thread.program_counter.segment,
                offset: self.fetch_word(thread)? as usize,
            },
            AddressMode::Far => {
                let segment = self.fetch_word(thread)?;
                let offset = self.fetch_word(thread)?;
                self.segment_address(segment, offset)?
            }
            AddressMode::Array => {
                let segment = self.fetch_word(thread)?;
                let index = self.fetch_word(thread)?;
                let offset = self.fetch_word(thread)?;
                self.segment_array_address(segment, index)?
                    .offset_by(offset as usize)
            }
            AddressMode::Stack => {
                let delta = self.fetch_word(thread)? as i16;
                Self::stack_location(thread, delta as isize)?
            }
            AddressMode::Thread => Location::Thread(self.fetch_word(thread)? as usize),
            AddressMode::This => {
                let offset = self.fetch_word(thread)?;
                let (segment, index) = self.this_object(thread)?;
                self.this_address(segment, index)?.offset_by(offset as usize)
            }
            AddressMode::Deref => {
                let reference = self.byte_address(thread, host)?;
                let index = self.read_word(thread, host, reference)?;
                let segment = self.fetch_word(thread)?;
                let offset = self.fetch_word(thread)?;
                self.segment_address(segment, index)?
                    .offset_by(offset as usize)
            }
        };
        debug!("byteAddress: {:?}", location);
        Ok(location)
    }

    /// Decode an object operand.
    pub(crate) fn object_address(
        &mut self,
        thread: &mut Thread,
        host: &mut dyn ScriptHost,
    ) -> VmResult<ObjectRef> {
        let object = match self.address_mode(thread, "objectAddress")? {
            AddressMode::Data => {
                let index = self.fetch_word(thread)?;
                ObjectRef {
                    location: Location::Data(index as usize),
                    segment: self.data_index,
                    index,
                }
            }
            AddressMode::Far => {
                let segment = self.fetch_word(thread)?;
                let index = self.fetch_word(thread)?;
                ObjectRef {
                    location: self.segment_address(segment, index)?,
                    segment,
                    index,
                }
            }
            AddressMode::Array => {
                let segment = self.fetch_word(thread)?;
                let index = self.fetch_word(thread)?;
                let offset = self.fetch_word(thread)?;
                ObjectRef {
                    location: self
                        .segment_array_address(segment, index)?
                        .offset_by(offset as usize),
                    segment,
                    index,
                }
            }
            AddressMode::This => {
                let offset = self.fetch_word(thread)?;
                let (segment, index) = self.this_object(thread)?;
                ObjectRef {
                    location: self.this_address(segment, index)?.offset_by(offset as usize),
                    segment,
                    index,
                }
            }
            AddressMode::Deref => {
                let reference = self.byte_address(thread, host)?;
                let index = self.read_word(thread, host, reference)?;
                let segment = self.fetch_word(thread)?;
                let offset = self.fetch_word(thread)?;
                ObjectRef {
                    location: self
                        .segment_address(segment, index)?
                        .offset_by(offset as usize),
                    segment,
                    index,
                }
            }
            mode => {
                return Err(VmError::InvalidAddressMode {
                    context: "objectAddress",
                    mode: mode as u8,
                })
            }
        };
        debug!("objectAddress: {:?}", object);
        Ok(object)
    }

    /// Decode a flag operand: the byte holding the bit, and the bit mask.
    pub(crate) fn bit_address(&mut self, thread: &mut Thread) -> VmResult<(Location, u8)> {
        let mode = self.address_mode(thread, "bitAddress")?;
        let (location, bit) = match mode {
            AddressMode::Data => {
                let bit = self.fetch_word(thread)?;
                (Location::Data((bit >> 3) as usize), bit)
            }
            AddressMode::Near => {
                let bit = self.fetch_word(thread)?;
                let location = Location::Segment {
                    segment: thread.program_counter.segment,
                    offset: (bit >> 3) as usize,
                };
                (location, bit)
            }
            AddressMode::Far => {
                let segment = self.fetch_word(thread)?;
                let bit = self.fetch_word(thread)?;
                (self.segment_address(segment, bit >> 3)?, bit)
            }
            AddressMode::Array => {
                let segment = self.fetch_word(thread)?;
                let index = self.fetch_word(thread)?;
                let bit = self.fetch_word(thread)?;
                let element = self.segment_array_address(segment, index)?;
                (element.offset_by((bit >> 3) as usize), bit)
            }
            AddressMode::Stack => {
                let bit = self.fetch_word(thread)?;
                (Self::stack_location(thread, (bit >> 3) as isize)?, bit)
            }
            AddressMode::Thread => {
                let bit = self.fetch_word(thread)?;
                (Location::Thread((bit >> 3) as usize), bit)
            }
            AddressMode::This => return Err(VmError::ThisBitAddress),
            AddressMode::Deref => {
                return Err(VmError::InvalidAddressMode {
                    context: "bitAddress",
                    mode: mode as u8,
                })
            }
        };
        let mask = 1u8 << (bit & 7);
        debug!("bitAddress: {:?} mask {:#04x}", location, mask);
        Ok((location, mask))
    }

    // ---- memory access ----

    fn region<'a, 'h>(
        &'a mut self,
        thread: Option<&'a mut Thread>,
        host: Option<&'a mut (dyn ScriptHost + 'h)>,
        location: Location,
    ) -> VmResult<&'a mut [u8]> {
        let unavailable = VmError::BadAddress {
            region: location.region(),
            offset: location.offset() as isize,
            size: 0,
        };
        Ok(match location {
            Location::Thread(_) => thread.ok_or(unavailable)?.args_bytes_mut(),
            Location::Stack(_) => thread.ok_or(unavailable)?.stack_bytes_mut(),
            Location::Data(_) => self.data_segment.as_mut_slice(),
            Location::Segment { segment, .. } => self.segments.get_mut(segment)?,
            Location::Builtin { kind, index, .. } => host
                .ok_or(unavailable.clone())?
                .builtin_data(kind, index)
                .ok_or(unavailable)?,
        })
    }

    fn span<'a, 'h>(
        &'a mut self,
        thread: Option<&'a mut Thread>,
        host: Option<&'a mut (dyn ScriptHost + 'h)>,
        location: Location,
        width: usize,
    ) -> VmResult<&'a mut [u8]> {
        let bytes = self.region(thread, host, location)?;
        let size = bytes.len();
        let offset = location.offset();
        bytes
            .get_mut(offset..offset + width)
            .ok_or(VmError::BadAddress {
                region: location.region(),
                offset: offset as isize,
                size,
            })
    }

    pub(crate) fn read_byte(
        &mut self,
        thread: &mut Thread,
        host: &mut dyn ScriptHost,
        location: Location,
    ) -> VmResult<u8> {
        Ok(self.span(Some(thread), Some(host), location, 1)?[0])
    }

    pub(crate) fn write_byte(
        &mut self,
        thread: &mut Thread,
        host: &mut dyn ScriptHost,
        location: Location,
        value: u8,
    ) -> VmResult<()> {
        self.span(Some(thread), Some(host), location, 1)?[0] = value;
        Ok(())
    }

    pub(crate) fn read_word(
        &mut self,
        thread: &mut Thread,
        host: &mut dyn ScriptHost,
        location: Location,
    ) -> VmResult<u16> {
        let b = self.span(Some(thread), Some(host), location, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn write_word(
        &mut self,
        thread: &mut Thread,
        host: &mut dyn ScriptHost,
        location: Location,
        value: u16,
    ) -> VmResult<()> {
        self.span(Some(thread), Some(host), location, 2)?
            .copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Word at a location outside any thread.
    pub(crate) fn read_shared_word(
        &mut self,
        host: &mut dyn ScriptHost,
        location: Location,
    ) -> VmResult<u16> {
        let b = self.span(None, Some(host), location, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// NUL-terminated string in the data segment or a script segment.
    pub fn read_c_string(&mut self, location: Location) -> VmResult<String> {
        let bytes = self.region(None, None, location)?;
        let size = bytes.len();
        let start = location.offset();
        let tail = bytes.get(start..).ok_or(VmError::BadAddress {
            region: location.region(),
            offset: start as isize,
            size,
        })?;
        let text: Vec<u8> = tail
            .iter()
            .take(MAX_STRING)
            .take_while(|&&b| b != 0)
            .copied()
            .collect();
        Ok(String::from_utf8_lossy(&text).into_owned())
    }

    /// Location of string `n` in the string table of the thread's current
    /// code segment. The segment header holds the table's segment and
    /// offset at bytes 2 and 4; the table is an array of word offsets.
    pub fn string_address(&mut self, thread: &Thread, n: u16) -> VmResult<Location> {
        let code_segment = thread.program_counter.segment;
        let code = self.segments.get(code_segment)?;
        let header = code.get(2..6).ok_or(VmError::BadAddress {
            region: "code segment",
            offset: 2,
            size: code.len(),
        })?;
        let segment = u16::from_le_bytes([header[0], header[1]]);
        let offset = u16::from_le_bytes([header[2], header[3]]);
        let table = self.segment_address(segment, offset)?;
        let slot = table.offset_by(2 * n as usize);
        let b = self.span(None, None, slot, 2)?;
        let string_offset = u16::from_le_bytes([b[0], b[1]]);
        Ok(table.offset_by(string_offset as usize))
    }
}
