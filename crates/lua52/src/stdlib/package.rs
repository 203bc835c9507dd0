// Package library: require and the module searchers
// Implements: package.loadlib, package.searchpath, package.searchers,
// package.path, package.cpath, package.config, package.loaded,
// package.preload and the global `require`

use tracing::debug;

use crate::lib_registry::{LibraryModule, loaded_table};
use crate::lua_vm::lua_limits::{LUA_REGISTRYINDEX, lua_upvalueindex};
use crate::lua_vm::{LuaResult, LuaState};

pub const LUA_DIRSEP: &str = "/";
pub const LUA_PATH_SEP: &str = ";";
pub const LUA_PATH_MARK: &str = "?";
pub const LUA_EXEC_DIR: &str = "!";
pub const LUA_IGMARK: &str = "-";

const LUA_LDIR: &str = "/usr/local/share/lua/5.2/";
const LUA_CDIR: &str = "/usr/local/lib/lua/5.2/";

/// Message of `loadlib` and the C searchers: native modules are not loaded
const DLMSG: &str = "dynamic libraries not enabled; check your Lua installation";

pub fn default_path() -> String {
    format!("{LUA_LDIR}?.lua;{LUA_LDIR}?/init.lua;{LUA_CDIR}?.lua;{LUA_CDIR}?/init.lua;./?.lua")
}

pub fn default_cpath() -> String {
    format!("{LUA_CDIR}?.so;{LUA_CDIR}loadall.so;./?.so")
}

pub fn create_package_lib() -> LibraryModule {
    crate::lib_module!("package", {
        "loadlib" => ll_loadlib,
        "searchpath" => ll_searchpath,
    })
    .with_initializer(init_package)
}

/// Fill the package table (on top of the stack) and register `require`
fn init_package(l: &mut LuaState) -> LuaResult<()> {
    const SEARCHERS: [crate::lua_value::CFunction; 4] = [searcher_preload, searcher_lua, searcher_c, searcher_croot];
    l.create_table(SEARCHERS.len(), 0)?;
    for (i, searcher) in SEARCHERS.iter().enumerate() {
        // every searcher sees the package table as its upvalue
        l.push_index(-2)?;
        l.push_rust_closure(*searcher, 1)?;
        l.raw_set_int(-2, i as i64 + 1)?;
    }
    l.push_index(-1)?;
    l.set_field(-3, "loaders")?;
    l.set_field(-2, "searchers")?;

    let noenv = no_env(l)?;
    let path = env_path("LUA_PATH_5_2", "LUA_PATH", &default_path(), noenv);
    l.push_string(path)?;
    l.set_field(-2, "path")?;
    let cpath = env_path("LUA_CPATH_5_2", "LUA_CPATH", &default_cpath(), noenv);
    l.push_string(cpath)?;
    l.set_field(-2, "cpath")?;

    let config = [LUA_DIRSEP, LUA_PATH_SEP, LUA_PATH_MARK, LUA_EXEC_DIR, LUA_IGMARK].join("\n") + "\n";
    l.push_string(config)?;
    l.set_field(-2, "config")?;

    let loaded = loaded_table(l)?;
    l.push_value(loaded)?;
    l.set_field(-2, "loaded")?;

    l.get_field(LUA_REGISTRYINDEX, "_PRELOAD")?;
    if !l.value_at(-1).is_table() {
        l.pop(1);
        l.new_table()?;
        l.push_index(-1)?;
        l.set_field(LUA_REGISTRYINDEX, "_PRELOAD")?;
    }
    l.set_field(-2, "preload")?;

    l.push_index(-1)?;
    l.push_rust_closure(ll_require, 1)?;
    l.set_global("require")?;
    Ok(())
}

/// `registry.LUA_NOENV` is set by hosts asked to ignore environment
/// variables
fn no_env(l: &mut LuaState) -> LuaResult<bool> {
    l.get_field(LUA_REGISTRYINDEX, "LUA_NOENV")?;
    let b = l.to_boolean(-1);
    l.pop(1);
    Ok(b)
}

/// Search path from the environment; ";;" stands for the default path
fn env_path(envname52: &str, envname: &str, default: &str, noenv: bool) -> String {
    if noenv {
        return default.to_string();
    }
    let Some(path) = std::env::var(envname52).ok().or_else(|| std::env::var(envname).ok()) else {
        return default.to_string();
    };
    const AUXMARK: &str = "\u{1}";
    path.replace(";;", &format!(";{AUXMARK};")).replace(AUXMARK, default)
}

fn readable(filename: &str) -> bool {
    std::fs::File::open(filename).is_ok()
}

/// Find `name` along `path`. Returns the first readable file or the list
/// of tried files, formatted for an error message.
pub fn search_path(name: &str, path: &str, sep: &str, dirsep: &str) -> Result<String, String> {
    let name = if sep.is_empty() { name.to_string() } else { name.replace(sep, dirsep) };
    let mut msg = String::new();
    for template in path.split(';').filter(|t| !t.is_empty()) {
        let filename = template.replace(LUA_PATH_MARK, &name);
        if readable(&filename) {
            return Ok(filename);
        }
        msg.push_str(&format!("\n\tno file '{filename}'"));
    }
    Err(msg)
}

/// Look up `package[pname]` (through the searcher's upvalue) and search it
fn find_file(l: &mut LuaState, name: &str, pname: &str, dirsep: &str) -> LuaResult<Result<String, String>> {
    l.get_field(lua_upvalueindex(1), pname)?;
    let Some(path) = l.to_lstring(-1) else {
        return Err(l.error(format!("'package.{pname}' must be a string")));
    };
    l.pop(1);
    Ok(search_path(name, &path.to_str_lossy(), ".", dirsep))
}

/// Results of a searcher that found a file: the loader and the file name
fn check_load(l: &mut LuaState, ok: bool, filename: &str) -> LuaResult<usize> {
    if ok {
        l.push_string(filename)?;
        return Ok(2);
    }
    let name = l.value_at(1).to_plain_string();
    let err = l.value_at(-1).to_plain_string();
    Err(l.error(format!(
        "error loading module '{}' from file '{}':\n\t{}",
        name, filename, err
    )))
}

fn searcher_preload(l: &mut LuaState) -> LuaResult<usize> {
    let name = l.check_lstring(1)?;
    l.get_field(LUA_REGISTRYINDEX, "_PRELOAD")?;
    l.get_field(-1, &name.to_str_lossy())?;
    if l.value_at(-1).is_nil() {
        l.push_string(format!("\n\tno field package.preload['{}']", name))?;
    }
    Ok(1)
}

fn searcher_lua(l: &mut LuaState) -> LuaResult<usize> {
    let name = l.check_lstring(1)?;
    match find_file(l, &name.to_str_lossy(), "path", LUA_DIRSEP)? {
        Ok(filename) => {
            debug!(module = %name, file = %filename, "loading Lua module");
            let ok = l.load_file(Some(&filename), None).is_ok();
            check_load(l, ok, &filename)
        }
        Err(msg) => {
            l.push_string(msg)?;
            Ok(1)
        }
    }
}

/// Native modules cannot be loaded: a found file is a load error
fn searcher_c(l: &mut LuaState) -> LuaResult<usize> {
    let name = l.check_lstring(1)?;
    match find_file(l, &name.to_str_lossy(), "cpath", LUA_DIRSEP)? {
        Ok(filename) => {
            l.push_string(DLMSG)?;
            check_load(l, false, &filename)
        }
        Err(msg) => {
            l.push_string(msg)?;
            Ok(1)
        }
    }
}

fn searcher_croot(l: &mut LuaState) -> LuaResult<usize> {
    let name = l.check_lstring(1)?;
    let name = name.to_str_lossy().into_owned();
    let Some(dot) = name.find('.') else {
        // is root
        return Ok(0);
    };
    match find_file(l, &name[..dot], "cpath", LUA_DIRSEP)? {
        Ok(filename) => {
            l.push_string(DLMSG)?;
            check_load(l, false, &filename)
        }
        Err(msg) => {
            l.push_string(msg)?;
            Ok(1)
        }
    }
}

/// package.loadlib(path, funcname): always fails with "absent"
fn ll_loadlib(l: &mut LuaState) -> LuaResult<usize> {
    l.check_lstring(1)?;
    l.check_lstring(2)?;
    l.push_nil()?;
    l.push_string(DLMSG)?;
    l.push_string("absent")?;
    Ok(3)
}

fn ll_searchpath(l: &mut LuaState) -> LuaResult<usize> {
    let name = l.check_lstring(1)?.to_str_lossy().into_owned();
    let path = l.check_lstring(2)?.to_str_lossy().into_owned();
    let sep = l.opt_lstring(3, ".")?.to_str_lossy().into_owned();
    let dirsep = l.opt_lstring(4, LUA_DIRSEP)?.to_str_lossy().into_owned();
    match search_path(&name, &path, &sep, &dirsep) {
        Ok(filename) => {
            l.push_string(filename)?;
            Ok(1)
        }
        Err(msg) => {
            l.push_nil()?;
            l.push_string(msg)?;
            Ok(2)
        }
    }
}

/// Run the searchers until one returns a loader; leaves the loader and its
/// extra value on the stack
fn find_loader(l: &mut LuaState, name: &str) -> LuaResult<()> {
    l.get_field(lua_upvalueindex(1), "searchers")?;
    if !l.value_at(3).is_table() {
        return Err(l.error("'package.searchers' must be a table"));
    }
    let mut msg = Vec::new();
    let mut i = 1;
    loop {
        l.raw_get_int(3, i)?;
        if l.value_at(-1).is_nil() {
            l.pop(1);
            let tried = String::from_utf8_lossy(&msg).into_owned();
            return Err(l.error(format!("module '{name}' not found:{tried}")));
        }
        l.push_string(name)?;
        l.call(1, 2)?;
        if l.value_at(-2).is_function() {
            return Ok(());
        }
        if l.is_string(-2) {
            // searcher returned an error message
            let s = l.value_at(-2).to_plain_string();
            msg.extend_from_slice(s.as_bytes());
        }
        l.pop(2);
        i += 1;
    }
}

/// require(modname)
fn ll_require(l: &mut LuaState) -> LuaResult<usize> {
    let name = l.check_lstring(1)?.to_str_lossy().into_owned();
    l.set_top(1);
    // _LOADED table will be at index 2
    let loaded = loaded_table(l)?;
    l.push_value(loaded)?;
    l.get_field(2, &name)?;
    if l.to_boolean(-1) {
        return Ok(1);
    }
    l.pop(1);
    find_loader(l, &name)?;
    debug!(module = %name, "running module loader");
    // name is the loader's first argument, before the search data
    l.push_string(name.as_str())?;
    l.insert(-2);
    l.call(2, 1)?;
    if !l.value_at(-1).is_nil() {
        l.set_field(2, &name)?;
    }
    l.get_field(2, &name)?;
    if l.value_at(-1).is_nil() {
        // module did not set a value: use true
        l.push_boolean(true)?;
        l.push_index(-1)?;
        l.set_field(2, &name)?;
    }
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_path_default_marker() {
        // SAFETY: test-only environment mutation of a private variable name
        unsafe {
            std::env::set_var("LUA52_TEST_PATH", "./x/?.lua;;");
        }
        let p = env_path("LUA52_TEST_PATH_UNSET", "LUA52_TEST_PATH", "D", false);
        assert_eq!(p, "./x/?.lua;D;");
        assert_eq!(env_path("LUA52_TEST_PATH", "X", "D", true), "D");
    }

    #[test]
    fn test_search_path_lists_tried_files() {
        let err = search_path("a.b", "/nonexistent/?.lua;/nonexistent/?/init.lua", ".", "/").unwrap_err();
        assert_eq!(
            err,
            "\n\tno file '/nonexistent/a/b.lua'\n\tno file '/nonexistent/a/b/init.lua'"
        );
    }
}
