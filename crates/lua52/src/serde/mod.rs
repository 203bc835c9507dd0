/// Conversion between Lua values and `serde_json` values
///
/// Tables holding a dense `1..n` sequence become JSON arrays, other tables
/// become objects keyed by strings. Functions, threads and userdata have no
/// JSON form; neither do tables that contain themselves.
mod deserializer;
mod serializer;

pub use deserializer::{from_str as json_string_to_lua, from_value};
pub use serializer::{to_string, to_value};

use crate::lua_value::LuaValue;

/// Convert a Lua value to a serde_json::Value
pub fn lua_to_json(lua_value: &LuaValue) -> Result<serde_json::Value, String> {
    to_value(lua_value)
}

/// Convert a Lua value to a JSON string
pub fn lua_to_json_string(lua_value: &LuaValue, pretty: bool) -> Result<String, String> {
    to_string(lua_value, pretty)
}

/// Convert a serde_json::Value to a Lua value; null becomes nil
pub fn json_to_lua(json_value: &serde_json::Value) -> LuaValue {
    from_value(json_value)
}
