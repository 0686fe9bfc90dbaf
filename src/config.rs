//! Interpreter tuning loaded from TOML
//!
//! ```toml
//! max_time_slice = 16
//! stack_size = 512
//! run_limit = 4000
//! trace_stack = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Bytes reserved at the top of every thread stack for the initial frame:
/// argument count, return offset, return segment and the `this` pair.
pub const INITIAL_FRAME_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Instructions executed per `interpret` call
    pub max_time_slice: u16,
    /// Operand stack size in bytes for new threads
    pub stack_size: u16,
    /// `interpret` calls a synchronous run may take before the thread is
    /// declared hung
    pub run_limit: u32,
    /// Log the operand stack before every instruction
    pub trace_stack: bool,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        ScriptConfig {
            max_time_slice: 16,
            stack_size: 512,
            run_limit: 4000,
            trace_stack: std::env::var("SAGA_TRACE_STACK").is_ok(),
        }
    }
}

impl ScriptConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, String> {
        let config: ScriptConfig =
            toml::from_str(text).map_err(|e| format!("Invalid script config: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config {}: {e}", path.display()))?;
        Self::from_toml_str(&text)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.max_time_slice == 0 {
            return Err("max_time_slice must be at least 1".to_string());
        }
        if (self.stack_size as usize) < INITIAL_FRAME_SIZE + 2 || self.stack_size % 2 != 0 {
            return Err(format!("stack_size {} is not usable", self.stack_size));
        }
        if self.stack_size > i16::MAX as u16 {
            return Err(format!(
                "stack_size {} does not fit the save format",
                self.stack_size
            ));
        }
        if self.run_limit == 0 {
            return Err("run_limit must be at least 1".to_string());
        }
        Ok(())
    }
}
