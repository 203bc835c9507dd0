// serde_json::Value -> Lua value

use serde_json::Value as JsonValue;

use crate::lua_value::{LuaTable, LuaValue};

pub fn from_value(json_value: &JsonValue) -> LuaValue {
    match json_value {
        JsonValue::Null => LuaValue::Nil,
        JsonValue::Bool(b) => LuaValue::Boolean(*b),
        JsonValue::Number(n) => LuaValue::Number(n.as_f64().unwrap_or(f64::NAN)),
        JsonValue::String(s) => LuaValue::from(s.as_str()),
        JsonValue::Array(arr) => {
            let mut table = LuaTable::new(arr.len(), 0);
            for (i, item) in arr.iter().enumerate() {
                table.set_int(i as i64 + 1, from_value(item));
            }
            LuaValue::table(table)
        }
        JsonValue::Object(obj) => {
            let mut table = LuaTable::new(0, obj.len());
            for (key, item) in obj {
                table.set_str(key, from_value(item));
            }
            LuaValue::table(table)
        }
    }
}

pub fn from_str(json_str: &str) -> Result<LuaValue, String> {
    let json_value: JsonValue = serde_json::from_str(json_str).map_err(|e| format!("failed to parse JSON: {}", e))?;
    Ok(from_value(&json_value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua_vm::{LuaVM, SafeOption};

    #[test]
    fn test_json_into_lua() {
        let value = from_str(r#"{"list": [1, 2, null, "x"], "flag": false, "none": null}"#).unwrap();
        let t = value.as_table().unwrap().borrow();
        assert_eq!(t.get_str("flag"), LuaValue::Boolean(false));
        assert!(t.get_str("none").is_nil());
        let list = t.get_str("list");
        let list = list.as_table().unwrap().borrow();
        assert_eq!(list.get_int(1), LuaValue::from(1.0));
        assert!(list.get_int(3).is_nil());
        assert_eq!(list.get_int(4), LuaValue::from("x"));
        assert!(from_str("{").is_err());
    }

    #[test]
    fn test_round_trip_through_lua_code() {
        let mut vm = LuaVM::new(SafeOption::default());
        vm.open_libs();
        vm.set_global("config", from_value(&serde_json::json!({"port": 8080, "hosts": ["a", "b"]})));
        let result = vm.execute_string(
            r#"
            assert(config.port == 8080)
            assert(#config.hosts == 2 and config.hosts[2] == "b")
            config.hosts[3] = "c"
            "#,
        );
        assert!(result.is_ok());
        let back = crate::serde::lua_to_json(&vm.get_global("config")).unwrap();
        assert_eq!(back, serde_json::json!({"port": 8080, "hosts": ["a", "b", "c"]}));
    }
}
