//! Compiler configuration

use serde::{Deserialize, Serialize};

/// How `break` and `continue` are lowered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopControlStyle {
    /// A plain `JMP` to the loop label
    #[default]
    Direct,
    /// `CONST_FALSE` followed by `JMP_IF_FALSE`, for targets whose verifier
    /// rejects an unconditional jump followed by unreachable code
    GuardedConstant,
}

/// Options of one [`Compiler`](crate::Compiler)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    pub loop_control: LoopControlStyle,
    /// Run the bytecode verifier on every unit before encoding
    pub verify: bool,
    /// Emit line and local-variable tables
    pub debug_info: bool,
    /// Source file recorded in unit headers, overriding the module's own
    pub source_file: Option<String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            loop_control: LoopControlStyle::Direct,
            verify: true,
            debug_info: true,
            source_file: None,
        }
    }
}

impl CompileOptions {
    /// Parse options from JSON; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_loop_control(mut self, style: LoopControlStyle) -> Self {
        self.loop_control = style;
        self
    }

    pub fn with_debug_info(mut self, enabled: bool) -> Self {
        self.debug_info = enabled;
        self
    }

    pub fn with_verify(mut self, enabled: bool) -> Self {
        self.verify = enabled;
        self
    }
}
