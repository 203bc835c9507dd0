// Lua 5.2 standard libraries

pub mod basic;
pub mod bit32;
pub mod coroutine;
pub mod debug;
pub mod io;
pub mod math;
pub mod os;
pub mod package;
pub mod string;
pub mod table;
