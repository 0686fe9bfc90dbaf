//! Error types for the SAGA script VM
//!
//! Failures come in two tiers. A [`VmError`] is fatal: the script data is
//! corrupt or the VM has been asked to do something it cannot do, and the
//! host is expected to stop running scripts. A [`ScriptError`] only aborts
//! the thread that raised it; the dispatcher deletes that thread on its
//! next pass and every other thread keeps running.

use thiserror::Error;

/// Fatal VM failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("{context}: invalid addressing mode {mode}")]
    InvalidAddressMode { context: &'static str, mode: u8 },

    #[error("addressing relative to 'this' is not supported for bit fields")]
    ThisBitAddress,

    #[error("undefined opcode {opcode:#04x} at {segment}:{offset:#06x}")]
    UndefinedOpcode { opcode: u8, segment: u16, offset: u16 },

    #[error("invalid {table} function number {func}")]
    InvalidFunction { table: &'static str, func: i32 },

    #[error("export entry {entry} out of range (table holds {count})")]
    ExportOutOfRange { entry: u16, count: usize },

    #[error("bad data in export table entry #{entry} (segment {segment})")]
    BadExport { entry: u16, segment: u16 },

    #[error("unable to load script segment {0}")]
    MissingSegment(u16),

    #[error("unable to load the {0}")]
    MissingResource(&'static str),

    #[error("address {offset:#x} outside {region} (size {size:#x})")]
    BadAddress {
        region: &'static str,
        offset: isize,
        size: usize,
    },

    #[error("invalid builtin object segment number {0}")]
    InvalidBuiltin(i16),

    #[error("builtin object {kind} {index} has no script")]
    NoScriptClass { kind: &'static str, index: u16 },

    #[error("stack overflow in thread {0}")]
    StackOverflow(u16),

    #[error("stack underflow in thread {0}")]
    StackUnderflow(u16),

    #[error("division by zero at {segment}:{offset:#06x}")]
    DivideByZero { segment: u16, offset: u16 },

    #[error("random jump table exhausted at {segment}:{offset:#06x}")]
    RandomTableExhausted { segment: u16, offset: u16 },

    #[error("too many threads")]
    TooManyThreads,

    #[error("thread {0} already exists")]
    ThreadExists(u16),

    #[error("unknown thread {0}")]
    UnknownThread(u16),

    #[error("thread {0} timed out")]
    ThreadHung(u16),

    #[error("invalid script config: {0}")]
    BadConfig(String),
}

pub type VmResult<T> = Result<T, VmError>;

/// Recoverable script failures. Raising one aborts the current thread.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Feature not implemented.")]
    NotImplemented,
}

/// Save-file failures.
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("save file I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("expected chunk {expected:?}, found {found:?}")]
    UnexpectedChunk { expected: String, found: String },

    #[error("truncated {0}")]
    Truncated(&'static str),

    #[error(transparent)]
    Vm(#[from] VmError),
}
