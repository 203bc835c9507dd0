use std::any::Any;

use super::TableRef;

/// Host-owned datum with a metatable and a per-instance environment table
pub struct LuaUserdata {
    data: Box<dyn Any>,
    pub(crate) metatable: Option<TableRef>,
    pub(crate) env: Option<TableRef>,
}

impl LuaUserdata {
    pub fn new<T: Any>(data: T) -> Self {
        LuaUserdata {
            data: Box::new(data),
            metatable: None,
            env: None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.data.downcast_mut::<T>()
    }

    pub fn metatable(&self) -> Option<TableRef> {
        self.metatable.clone()
    }

    pub fn env(&self) -> Option<TableRef> {
        self.env.clone()
    }
}
