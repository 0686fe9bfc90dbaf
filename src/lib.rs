#![crate_name = "sagascript"]

pub mod address;
pub mod assembler;
pub mod config;
pub mod disassembler;
pub mod error;
pub mod host;
pub mod instruction;
pub mod interpreter;
pub mod opcodes_branch;
pub mod opcodes_call;
pub mod opcodes_math;
pub mod opcodes_memory;
pub mod savegame;
pub mod segment;
pub mod thread;
pub mod thread_list;
pub mod zrand;

#[doc(hidden)]
pub mod test_utils;

pub use config::ScriptConfig;
pub use error::{SaveError, ScriptError, VmError, VmResult};
pub use host::{BuiltinType, CallTable, NativeCall, ScriptHost};
pub use interpreter::Interpreter;
pub use thread::{ScriptCallFrame, ScriptResult, ThreadId};

#[cfg(test)]
mod branch_tests;
#[cfg(test)]
mod call_tests;
