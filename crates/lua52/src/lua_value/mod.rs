// Value model: the tagged union every register, constant and table slot holds.

pub mod chunk_serializer;
mod lua_convert;
mod lua_function;
mod lua_string;
mod lua_table;
mod lua_userdata;

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

pub use lua_convert::{format_float, number_to_string, number_to_unsigned, str_to_number};
pub(crate) use lua_convert::ldexp;
pub use lua_function::{Chunk, LocVar, LuaClosure, LuaFunction, LuaUpvalue, RustClosure, UpvalueDesc, UpvalueRef};
pub use lua_string::LuaString;
pub use lua_table::{InvalidKey, LuaTable};
pub use lua_userdata::LuaUserdata;

use crate::lua_vm::{LuaResult, LuaState};

/// Host function: receives the thread, returns how many results it left on top of the stack
pub type CFunction = fn(&mut LuaState) -> LuaResult<usize>;

pub type TableRef = Rc<RefCell<LuaTable>>;
pub type UserdataRef = Rc<RefCell<LuaUserdata>>;
pub type ThreadRef = Rc<RefCell<LuaState>>;

/// Basic type tags, numbered like the embedding API numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum LuaValueKind {
    /// Not a valid stack index
    None = -1,
    Nil = 0,
    Boolean = 1,
    LightUserdata = 2,
    Number = 3,
    String = 4,
    Table = 5,
    Function = 6,
    Userdata = 7,
    Thread = 8,
}

/// Number of basic types (size of the per-type metatable array)
pub const NUM_TYPES: usize = 9;

impl LuaValueKind {
    pub fn name(self) -> &'static str {
        match self {
            LuaValueKind::None => "no value",
            LuaValueKind::Nil => "nil",
            LuaValueKind::Boolean => "boolean",
            LuaValueKind::LightUserdata | LuaValueKind::Userdata => "userdata",
            LuaValueKind::Number => "number",
            LuaValueKind::String => "string",
            LuaValueKind::Table => "table",
            LuaValueKind::Function => "function",
            LuaValueKind::Thread => "thread",
        }
    }
}

#[derive(Clone, Default)]
pub enum LuaValue {
    #[default]
    Nil,
    Boolean(bool),
    Number(f64),
    String(LuaString),
    Table(TableRef),
    Function(LuaFunction),
    Userdata(UserdataRef),
    /// Host pointer-sized datum without a metatable of its own
    LightUserdata(usize),
    Thread(ThreadRef),
}

impl LuaValue {
    #[inline(always)]
    pub const fn nil() -> Self {
        LuaValue::Nil
    }

    #[inline(always)]
    pub const fn boolean(b: bool) -> Self {
        LuaValue::Boolean(b)
    }

    #[inline(always)]
    pub const fn number(n: f64) -> Self {
        LuaValue::Number(n)
    }

    #[inline(always)]
    pub fn integer(i: i64) -> Self {
        LuaValue::Number(i as f64)
    }

    pub fn string(s: impl Into<LuaString>) -> Self {
        LuaValue::String(s.into())
    }

    pub fn table(t: LuaTable) -> Self {
        LuaValue::Table(Rc::new(RefCell::new(t)))
    }

    pub fn cfunction(f: CFunction) -> Self {
        LuaValue::Function(LuaFunction::Light(f))
    }

    pub fn kind(&self) -> LuaValueKind {
        match self {
            LuaValue::Nil => LuaValueKind::Nil,
            LuaValue::Boolean(_) => LuaValueKind::Boolean,
            LuaValue::Number(_) => LuaValueKind::Number,
            LuaValue::String(_) => LuaValueKind::String,
            LuaValue::Table(_) => LuaValueKind::Table,
            LuaValue::Function(_) => LuaValueKind::Function,
            LuaValue::Userdata(_) => LuaValueKind::Userdata,
            LuaValue::LightUserdata(_) => LuaValueKind::LightUserdata,
            LuaValue::Thread(_) => LuaValueKind::Thread,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    #[inline(always)]
    pub fn is_nil(&self) -> bool {
        matches!(self, LuaValue::Nil)
    }

    /// `nil` and `false` are false, everything else is true
    #[inline(always)]
    pub fn is_falsy(&self) -> bool {
        matches!(self, LuaValue::Nil | LuaValue::Boolean(false))
    }

    #[inline(always)]
    pub fn is_truthy(&self) -> bool {
        !self.is_falsy()
    }

    pub fn is_function(&self) -> bool {
        matches!(self, LuaValue::Function(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, LuaValue::String(_))
    }

    pub fn is_table(&self) -> bool {
        matches!(self, LuaValue::Table(_))
    }

    #[inline(always)]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            LuaValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            LuaValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&LuaString> {
        match self {
            LuaValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            LuaValue::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&LuaFunction> {
        match self {
            LuaValue::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_thread(&self) -> Option<&ThreadRef> {
        match self {
            LuaValue::Thread(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_userdata(&self) -> Option<&UserdataRef> {
        match self {
            LuaValue::Userdata(u) => Some(u),
            _ => None,
        }
    }

    /// Number value, converting strings that spell a number
    pub fn to_number(&self) -> Option<f64> {
        match self {
            LuaValue::Number(n) => Some(*n),
            LuaValue::String(s) => str_to_number(s.as_bytes()),
            _ => None,
        }
    }

    /// String value, converting numbers
    pub fn to_lua_string(&self) -> Option<LuaString> {
        match self {
            LuaValue::String(s) => Some(s.clone()),
            LuaValue::Number(n) => Some(LuaString::from(number_to_string(*n))),
            _ => None,
        }
    }

    /// Identity of a reference value (0 for plain values), as printed by `%p`
    pub fn pointer(&self) -> usize {
        match self {
            LuaValue::Table(t) => Rc::as_ptr(t) as *const u8 as usize,
            LuaValue::Function(f) => f.pointer(),
            LuaValue::Userdata(u) => Rc::as_ptr(u) as *const u8 as usize,
            LuaValue::LightUserdata(p) => *p,
            LuaValue::Thread(t) => Rc::as_ptr(t) as *const u8 as usize,
            _ => 0,
        }
    }

    /// Raw conversion used by `tostring` when no `__tostring` applies
    pub fn to_plain_string(&self) -> LuaString {
        match self {
            LuaValue::Nil => LuaString::from("nil"),
            LuaValue::Boolean(true) => LuaString::from("true"),
            LuaValue::Boolean(false) => LuaString::from("false"),
            LuaValue::Number(n) => LuaString::from(number_to_string(*n)),
            LuaValue::String(s) => s.clone(),
            other => LuaString::from(format!("{}: {:#x}", other.type_name(), other.pointer())),
        }
    }

    /// Raw equality (no metamethods)
    pub fn raw_equal(&self, other: &LuaValue) -> bool {
        self == other
    }
}

/// Raw equality: value semantics for plain values, identity for references
impl PartialEq for LuaValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LuaValue::Nil, LuaValue::Nil) => true,
            (LuaValue::Boolean(a), LuaValue::Boolean(b)) => a == b,
            (LuaValue::Number(a), LuaValue::Number(b)) => a == b,
            (LuaValue::String(a), LuaValue::String(b)) => a == b,
            (LuaValue::Table(a), LuaValue::Table(b)) => Rc::ptr_eq(a, b),
            (LuaValue::Function(a), LuaValue::Function(b)) => a == b,
            (LuaValue::Userdata(a), LuaValue::Userdata(b)) => Rc::ptr_eq(a, b),
            (LuaValue::LightUserdata(a), LuaValue::LightUserdata(b)) => a == b,
            (LuaValue::Thread(a), LuaValue::Thread(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

// NaN never becomes a table key, so raw equality is reflexive on keys.
impl Eq for LuaValue {}

impl Hash for LuaValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            LuaValue::Nil => {}
            LuaValue::Boolean(b) => b.hash(state),
            LuaValue::Number(n) => {
                // -0.0 and 0.0 are the same key
                let n = if *n == 0.0 { 0.0 } else { *n };
                n.to_bits().hash(state)
            }
            LuaValue::String(s) => s.hash(state),
            other => other.pointer().hash(state),
        }
    }
}

impl fmt::Debug for LuaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuaValue::String(s) => write!(f, "{:?}", s),
            other => write!(f, "{}", other.to_plain_string()),
        }
    }
}

impl fmt::Display for LuaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_plain_string())
    }
}

impl From<bool> for LuaValue {
    fn from(b: bool) -> Self {
        LuaValue::Boolean(b)
    }
}

impl From<f64> for LuaValue {
    fn from(n: f64) -> Self {
        LuaValue::Number(n)
    }
}

impl From<i64> for LuaValue {
    fn from(i: i64) -> Self {
        LuaValue::Number(i as f64)
    }
}

impl From<&str> for LuaValue {
    fn from(s: &str) -> Self {
        LuaValue::String(LuaString::from(s))
    }
}

impl From<String> for LuaValue {
    fn from(s: String) -> Self {
        LuaValue::String(LuaString::from(s))
    }
}

impl From<LuaString> for LuaValue {
    fn from(s: LuaString) -> Self {
        LuaValue::String(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(v: &LuaValue) -> u64 {
        let mut h = DefaultHasher::new();
        v.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_negative_zero_key() {
        let a = LuaValue::number(0.0);
        let b = LuaValue::number(-0.0);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_nan_not_equal() {
        let nan = LuaValue::number(f64::NAN);
        assert_ne!(nan, nan.clone());
    }

    #[test]
    fn test_identity_equality() {
        let t1 = LuaValue::table(LuaTable::new(0, 0));
        let t2 = LuaValue::table(LuaTable::new(0, 0));
        assert_eq!(t1, t1.clone());
        assert_ne!(t1, t2);
        assert_eq!(LuaValue::from("abc"), LuaValue::from(String::from("abc")));
    }

    #[test]
    fn test_truthiness() {
        assert!(LuaValue::nil().is_falsy());
        assert!(LuaValue::boolean(false).is_falsy());
        assert!(LuaValue::number(0.0).is_truthy());
        assert!(LuaValue::from("").is_truthy());
    }
}
