//! Centralized VM limits and configuration constants.
//!
//! Every magic number that bounds the stack, the compiler, metamethod
//! chains or the pattern matcher is collected here.

// ===== Stack =====

/// Extra stack slots kept above the usable top for temporaries.
pub const EXTRA_STACK: usize = 5;

/// Minimum guaranteed stack slots available to host functions.
pub const LUA_MINSTACK: usize = 20;

/// Initial stack size of a new thread.
pub const BASIC_STACK_SIZE: usize = 2 * LUA_MINSTACK;

/// Hard limit on the number of value-stack slots of a thread.
pub const LUAI_MAXSTACK: usize = 1_000_000;

/// Emergency size granted while handling a stack overflow.
pub const ERRORSTACKSIZE: usize = LUAI_MAXSTACK + 200;

/// Maximum depth of nested host calls (host functions, metamethods, parser levels).
pub const LUAI_MAXCCALLS: usize = 200;

/// Default bound on the number of call frames of one thread.
pub const MAX_CALL_DEPTH: usize = 200_000;

/// Option for multiple returns in calls.
pub const LUA_MULTRET: i32 = -1;

// ===== Pseudo indices =====

/// Pseudo-index of the registry table.
pub const LUA_REGISTRYINDEX: i32 = -(LUAI_MAXSTACK as i32) - 1000;

/// Registry slot holding the main thread.
pub const LUA_RIDX_MAINTHREAD: i64 = 1;

/// Registry slot holding the globals table.
pub const LUA_RIDX_GLOBALS: i64 = 2;

/// Pseudo-index of the `i`-th upvalue of the running host closure.
pub const fn lua_upvalueindex(i: i32) -> i32 {
    LUA_REGISTRYINDEX - i
}

// ===== Compiler =====

/// Maximum number of local variables per function.
pub const MAXVARS: usize = 200;

/// Maximum number of upvalues per function.
pub const MAXUPVAL: usize = 255;

/// Maximum number of registers in a function.
pub const MAXREGS: u32 = 250;

/// Number of list items to accumulate before a SETLIST instruction.
pub const LFIELDS_PER_FLUSH: u32 = 50;

/// Priority of unary operators.
pub const UNARY_PRIORITY: u8 = 8;

/// Largest integer the scanner line counter may reach.
pub const MAX_INT: u32 = i32::MAX as u32;

// ===== Metamethods =====

/// Maximum number of hops in an `__index` / `__newindex` chain.
pub const MAXTAGLOOP: usize = 100;

// ===== Debug =====

/// Size of a chunk id used in messages, including the terminating byte.
pub const LUA_IDSIZE: usize = 60;

/// Levels shown at the start and end of a long traceback.
pub const LEVELS1: usize = 12;
pub const LEVELS2: usize = 10;

// ===== Pattern Matching =====

/// Maximum number of captures in a pattern.
pub const LUA_MAXCAPTURES: usize = 32;

/// Maximum matcher recursion depth.
pub const MAXCCALLS_PATTERN: usize = 200;

// ===== Strings =====

/// Largest string a library function may build.
pub const MAX_STRING_SIZE: usize = 1 << 31;

/// Format of numbers when converted to strings (`%.14g`).
pub const LUAI_NUMDIGITS: usize = 14;
