// Lua value -> serde_json::Value
//
// nil -> null, booleans and strings map directly, integral numbers become
// JSON integers and the rest floats.

use std::collections::HashSet;
use std::rc::Rc;

use serde_json::{Map, Number, Value as JsonValue};

use crate::lua_value::{LuaTable, LuaValue, number_to_string};

pub fn to_value(lua_value: &LuaValue) -> Result<JsonValue, String> {
    let mut visited = HashSet::new();
    to_value_internal(lua_value, &mut visited)
}

pub fn to_string(lua_value: &LuaValue, pretty: bool) -> Result<String, String> {
    let json_value = to_value(lua_value)?;
    let text = if pretty { serde_json::to_string_pretty(&json_value) } else { serde_json::to_string(&json_value) };
    text.map_err(|e| format!("failed to serialize to JSON: {}", e))
}

fn number_to_json(n: f64) -> Result<JsonValue, String> {
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        return Ok(JsonValue::Number(Number::from(n as i64)));
    }
    Number::from_f64(n).map(JsonValue::Number).ok_or_else(|| format!("cannot serialize number {} to JSON", number_to_string(n)))
}

fn to_value_internal(lua_value: &LuaValue, visited: &mut HashSet<usize>) -> Result<JsonValue, String> {
    match lua_value {
        LuaValue::Nil => Ok(JsonValue::Null),
        LuaValue::Boolean(b) => Ok(JsonValue::Bool(*b)),
        LuaValue::Number(n) => number_to_json(*n),
        LuaValue::String(s) => Ok(JsonValue::String(s.to_str_lossy().into_owned())),
        LuaValue::Table(t) => {
            let addr = Rc::as_ptr(t) as usize;
            if !visited.insert(addr) {
                return Err("circular reference detected in table".to_string());
            }
            let table = t.borrow();
            let result = if is_array_like(&table) {
                table_to_json_array(&table, visited)
            } else {
                table_to_json_object(&table, visited)
            };
            visited.remove(&addr);
            result
        }
        other => Err(format!("cannot serialize a {} to JSON", other.type_name())),
    }
}

/// True when the keys are exactly `1..=n` (the empty table included)
fn is_array_like(table: &LuaTable) -> bool {
    let mut count = 0usize;
    let mut max = 0i64;
    for (key, _) in table.iter() {
        match key.as_number() {
            Some(n) if n >= 1.0 && n.fract() == 0.0 => {
                count += 1;
                max = max.max(n as i64);
            }
            _ => return false,
        }
    }
    max as usize == count
}

fn table_to_json_array(table: &LuaTable, visited: &mut HashSet<usize>) -> Result<JsonValue, String> {
    let len = table.len();
    let mut array = Vec::with_capacity(len);
    for i in 1..=len {
        array.push(to_value_internal(&table.get_int(i as i64), visited)?);
    }
    Ok(JsonValue::Array(array))
}

fn table_to_json_object(table: &LuaTable, visited: &mut HashSet<usize>) -> Result<JsonValue, String> {
    let mut object = Map::new();
    for (key, value) in table.iter() {
        let key_str = match &key {
            LuaValue::String(s) => s.to_str_lossy().into_owned(),
            LuaValue::Number(n) => number_to_string(*n),
            // keys without a string form are skipped
            _ => continue,
        };
        object.insert(key_str, to_value_internal(&value, visited)?);
    }
    Ok(JsonValue::Object(object))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sequences_and_objects() {
        let mut seq = LuaTable::new(3, 0);
        for i in 1..=3 {
            seq.set_int(i, LuaValue::from(i as f64 * 1.5));
        }
        assert_eq!(to_value(&LuaValue::table(seq)).unwrap(), json!([1.5, 3, 4.5]));

        let mut obj = LuaTable::new(0, 2);
        obj.set_str("name", LuaValue::from("lua"));
        obj.set_str("missing", LuaValue::Nil);
        obj.set_int(7, LuaValue::Boolean(true));
        assert_eq!(to_value(&LuaValue::table(obj)).unwrap(), json!({"name": "lua", "7": true}));
        assert_eq!(to_value(&LuaValue::table(LuaTable::new(0, 0))).unwrap(), json!([]));
    }

    #[test]
    fn test_rejected_values() {
        let f = LuaValue::cfunction(|_| Ok(0));
        assert!(to_value(&f).unwrap_err().contains("function"));
        assert!(to_value(&LuaValue::from(f64::NAN)).is_err());

        let t = LuaValue::table(LuaTable::new(0, 1));
        if let LuaValue::Table(inner) = &t {
            inner.borrow_mut().set_str("self", t.clone());
        }
        assert!(to_value(&t).unwrap_err().contains("circular"));
        if let LuaValue::Table(inner) = &t {
            // break the cycle so the table is freed
            inner.borrow_mut().set_str("self", LuaValue::Nil);
        }
    }
}
