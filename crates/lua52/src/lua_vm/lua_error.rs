use thiserror::Error;

/// Status codes. The error object itself lives on the thread
/// (`LuaState::error_object`) to keep `Result` small.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LuaError {
    /// Coroutine yield; the yielded values are on the thread's stack
    #[error("coroutine yield")]
    Yield,
    /// Runtime error - error object stored on the thread
    #[error("runtime error")]
    RuntimeError,
    /// Syntax error while compiling a chunk
    #[error("syntax error")]
    SyntaxError,
    /// Memory error (also used by the loader for oversized chunks)
    #[error("not enough memory")]
    MemoryError,
    /// Error while running a `__gc` metamethod
    #[error("error in __gc metamethod")]
    GcError,
    /// Error while running the message handler
    #[error("error in error handling")]
    ErrorInErrorHandling,
    /// A file given to `load_file` could not be opened or read
    #[error("cannot read file")]
    FileError,
}

impl LuaError {
    /// Numeric status as exposed by the embedding API (`Ok` is 0)
    pub fn status_code(self) -> i32 {
        match self {
            LuaError::Yield => 1,
            LuaError::RuntimeError => 2,
            LuaError::SyntaxError => 3,
            LuaError::MemoryError => 4,
            LuaError::GcError => 5,
            LuaError::ErrorInErrorHandling => 6,
            LuaError::FileError => 7,
        }
    }
}

pub type LuaResult<T> = Result<T, LuaError>;

/// Status of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadStatus {
    #[default]
    Ok,
    Yield,
    /// Finished with an error; the thread is dead.
    Error(LuaError),
}
