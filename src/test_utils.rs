// Test host for driving the interpreter without a game engine
use crate::assembler::{ImageBuilder, ScriptBuilder};
use crate::config::ScriptConfig;
use crate::error::VmResult;
use crate::host::{BuiltinType, CallTable, NativeCall, ScriptHost};
use crate::interpreter::Interpreter;
use crate::zrand::ScriptRand;
use std::collections::{HashMap, HashSet};

pub type NativeFn = Box<dyn FnMut(&mut NativeCall<'_>) -> VmResult<i16>>;

/// A native call as the mock host saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub table: CallTable,
    pub func: u16,
    pub args: Vec<i16>,
    pub invoked_object: u16,
}

pub struct MockHost {
    pub time: u32,
    pub frames: u32,
    natives: HashMap<CallTable, Vec<NativeFn>>,
    pub builtins: HashMap<(BuiltinType, u16), Vec<u8>>,
    pub classes: HashMap<(BuiltinType, u16), u16>,
    pub exclusive_tags: HashSet<u16>,
    pub messages: Vec<String>,
    pub calls: Vec<RecordedCall>,
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHost {
    pub fn new() -> Self {
        MockHost {
            time: 0,
            frames: 0,
            natives: HashMap::new(),
            builtins: HashMap::new(),
            classes: HashMap::new(),
            exclusive_tags: HashSet::new(),
            messages: Vec::new(),
            calls: Vec::new(),
        }
    }

    /// Append a native to `table`; returns its function number.
    pub fn native<F>(&mut self, table: CallTable, f: F) -> u16
    where
        F: FnMut(&mut NativeCall<'_>) -> VmResult<i16> + 'static,
    {
        let list = self.natives.entry(table).or_default();
        list.push(Box::new(f));
        (list.len() - 1) as u16
    }

    pub fn builtin(&mut self, kind: BuiltinType, index: u16, data: Vec<u8>, class: u16) {
        self.builtins.insert((kind, index), data);
        self.classes.insert((kind, index), class);
    }

    /// Advance both clocks.
    pub fn tick(&mut self, ticks: u32) {
        self.time += ticks;
        self.frames += ticks;
    }
}

impl ScriptHost for MockHost {
    fn game_time(&self) -> u32 {
        self.time
    }

    fn frame_count(&self) -> u32 {
        self.frames
    }

    fn builtin_data(&mut self, kind: BuiltinType, index: u16) -> Option<&mut [u8]> {
        self.builtins
            .get_mut(&(kind, index))
            .map(|data| data.as_mut_slice())
    }

    fn builtin_script_class(&self, kind: BuiltinType, index: u16) -> u16 {
        self.classes.get(&(kind, index)).copied().unwrap_or(0)
    }

    fn native_count(&self, table: CallTable) -> usize {
        self.natives.get(&table).map_or(0, Vec::len)
    }

    fn call_native(
        &mut self,
        table: CallTable,
        func: u16,
        call: &mut NativeCall<'_>,
    ) -> VmResult<i16> {
        self.calls.push(RecordedCall {
            table,
            func,
            args: call.args()?,
            invoked_object: call.invoked_object(),
        });
        match self
            .natives
            .get_mut(&table)
            .and_then(|list| list.get_mut(func as usize))
        {
            Some(f) => f(call),
            None => Ok(0),
        }
    }

    fn tag_is_exclusive(&self, tag: u16) -> bool {
        self.exclusive_tags.contains(&tag)
    }

    fn set_tag_exclusive(&mut self, tag: u16, exclusive: bool) {
        if exclusive {
            self.exclusive_tags.insert(tag);
        } else {
            self.exclusive_tags.remove(&tag);
        }
    }

    fn status_message(&mut self, message: &str) {
        self.messages.push(message.to_string());
    }
}

/// An interpreter over `image` with a fixed random seed.
pub fn interpreter_for(image: &ImageBuilder) -> VmResult<Interpreter> {
    interpreter_with(image, ScriptConfig::default())
}

pub fn interpreter_with(image: &ImageBuilder, config: ScriptConfig) -> VmResult<Interpreter> {
    Ok(Interpreter::new(Box::new(image.resources()), config)?
        .with_rand(ScriptRand::new_predictable(7)))
}

/// Segment `image_with` places the code in.
pub const CODE_SEGMENT: u16 = 1;

/// An image with `code` as segment 1 and `data` as the data segment,
/// exporting each named entry point in order: the first is export 1.
pub fn image_with(code: &ScriptBuilder, data: Vec<u8>, entries: &[&str]) -> Result<ImageBuilder, String> {
    let mut image = ImageBuilder::new();
    image.data(data).segment(CODE_SEGMENT, code.build()?);
    for name in entries {
        let offset = code
            .address_of(name)
            .ok_or_else(|| format!("No entry point {name}"))?;
        image.export(CODE_SEGMENT, offset);
    }
    Ok(image)
}
