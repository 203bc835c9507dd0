// Lua 5.2 runtime
// Single-pass compiler, precompiled chunk loader/dumper, register VM
// with coroutines and the standard libraries

#[cfg(test)]
mod test;

pub mod compiler;
pub mod lib_registry;
pub mod lua_value;
pub mod lua_vm;
pub mod stdlib;

#[cfg(feature = "serde")]
pub mod serde;

pub use lib_registry::LibraryRegistry;
pub use lua_value::{CFunction, Chunk, LuaFunction, LuaString, LuaTable, LuaValue};
pub use lua_vm::{Instruction, LuaError, LuaResult, LuaState, LuaVM, OpCode, SafeOption, ThreadStatus};
