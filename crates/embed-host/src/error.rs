use thiserror::Error;

/// Why an execution stopped. Every variant is terminal for that run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    /// The allocator refused the blocks `lua_newstate` needs.
    #[error("panic: not enough memory to create the interpreter state")]
    StateCreation,
    #[error("parser error: {0}")]
    Compile(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    /// The panic hook fired, or the interpreter ran out of memory or
    /// failed inside its own error handling.
    #[error("panic: {0}")]
    Panic(String),
}

impl ScriptError {
    /// Log tag used for this failure.
    pub fn tag(&self) -> &'static str {
        match self {
            ScriptError::StateCreation | ScriptError::Panic(_) => "panic",
            ScriptError::Compile(_) => "parser error",
            ScriptError::Runtime(_) => "runtime error",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ScriptError::StateCreation => "not enough memory to create the interpreter state",
            ScriptError::Compile(m) | ScriptError::Runtime(m) | ScriptError::Panic(m) => m,
        }
    }
}
