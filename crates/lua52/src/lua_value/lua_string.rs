use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;

/// Immutable byte string shared by reference count.
/// Equality, ordering and hashing are by content.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LuaString(Rc<[u8]>);

impl LuaString {
    pub fn new(bytes: &[u8]) -> Self {
        LuaString(Rc::from(bytes))
    }

    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// UTF-8 view, replacing invalid sequences
    pub fn to_str_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn ptr_eq(&self, other: &LuaString) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl From<&str> for LuaString {
    fn from(s: &str) -> Self {
        LuaString(Rc::from(s.as_bytes()))
    }
}

impl From<String> for LuaString {
    fn from(s: String) -> Self {
        LuaString(Rc::from(s.into_bytes()))
    }
}

impl From<&[u8]> for LuaString {
    fn from(b: &[u8]) -> Self {
        LuaString(Rc::from(b))
    }
}

impl From<Vec<u8>> for LuaString {
    fn from(b: Vec<u8>) -> Self {
        LuaString(Rc::from(b))
    }
}

impl AsRef<[u8]> for LuaString {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for LuaString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_str_lossy())
    }
}

impl fmt::Debug for LuaString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_str_lossy())
    }
}
