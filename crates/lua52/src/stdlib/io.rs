// IO library
// Implements: close, flush, input, lines, open, output, read, write, type
// and the file methods close, flush, lines, read, write

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};

use crate::lib_registry::LibraryModule;
use crate::lua_value::{LuaUserdata, LuaValue, UserdataRef, str_to_number};
use crate::lua_vm::io_error_message;
use crate::lua_vm::lua_limits::{LUA_REGISTRYINDEX, lua_upvalueindex};
use crate::lua_vm::{LuaResult, LuaState};

/// Registry name of the file handle metatable
pub const LUA_FILEHANDLE: &str = "FILE*";

const IO_INPUT: &str = "_IO_input";
const IO_OUTPUT: &str = "_IO_output";

/// Longest numeral accepted by `read("*n")`
const L_MAXLENNUM: usize = 200;

pub fn create_io_lib() -> LibraryModule {
    crate::lib_module!("io", {
        "close" => io_close,
        "flush" => io_flush,
        "input" => io_input,
        "lines" => io_lines,
        "open" => io_open,
        "output" => io_output,
        "read" => io_read,
        "type" => io_type,
        "write" => io_write,
    })
    .with_initializer(init_io)
}

/// File handle stored in a "FILE*" userdata
pub struct LuaFile {
    inner: FileInner,
}

enum FileInner {
    Read(BufReader<File>),
    Write(BufWriter<File>),
    Stdin,
    Stdout,
    Stderr,
    Closed,
}

impl LuaFile {
    fn new(inner: FileInner) -> Self {
        LuaFile { inner }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.inner, FileInner::Closed)
    }

    fn is_std_stream(&self) -> bool {
        matches!(self.inner, FileInner::Stdin | FileInner::Stdout | FileInner::Stderr)
    }

    fn with_reader<R>(&mut self, f: impl FnOnce(&mut dyn BufRead) -> io::Result<R>) -> io::Result<R> {
        match &mut self.inner {
            FileInner::Read(reader) => f(reader),
            FileInner::Stdin => f(&mut io::stdin().lock()),
            _ => Err(io::Error::from_raw_os_error(9)),
        }
    }

    /// Next line, with or without its newline; None at end of file
    fn read_line(&mut self, keep_newline: bool) -> io::Result<Option<Vec<u8>>> {
        self.with_reader(|r| {
            let mut line = Vec::new();
            if r.read_until(b'\n', &mut line)? == 0 {
                return Ok(None);
            }
            if !keep_newline && line.last() == Some(&b'\n') {
                line.pop();
            }
            Ok(Some(line))
        })
    }

    fn read_all(&mut self) -> io::Result<Vec<u8>> {
        self.with_reader(|r| {
            let mut buf = Vec::new();
            r.read_to_end(&mut buf)?;
            Ok(buf)
        })
    }

    /// Up to `n` bytes; None at end of file. `n == 0` tests for end of file.
    fn read_chars(&mut self, n: usize) -> io::Result<Option<Vec<u8>>> {
        self.with_reader(|r| {
            if n == 0 {
                return Ok(if r.fill_buf()?.is_empty() { None } else { Some(Vec::new()) });
            }
            let mut buf = Vec::with_capacity(n.min(8192));
            r.take(n as u64).read_to_end(&mut buf)?;
            Ok(if buf.is_empty() { None } else { Some(buf) })
        })
    }

    /// Skip whitespace and read the longest prefix that can be a numeral
    fn read_number(&mut self) -> io::Result<Option<f64>> {
        self.with_reader(|r| {
            let mut buf = Vec::new();
            loop {
                let Some(&c) = r.fill_buf()?.first() else { break };
                if buf.is_empty() && c.is_ascii_whitespace() {
                    r.consume(1);
                } else if buf.len() < L_MAXLENNUM && is_numeral_char(c) {
                    buf.push(c);
                    r.consume(1);
                } else {
                    break;
                }
            }
            Ok(str_to_number(&buf))
        })
    }

    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        match &mut self.inner {
            FileInner::Write(w) => w.write_all(data),
            FileInner::Stdout => io::stdout().write_all(data),
            FileInner::Stderr => io::stderr().write_all(data),
            _ => Err(io::Error::from_raw_os_error(9)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.inner {
            FileInner::Write(w) => w.flush(),
            FileInner::Stdout => io::stdout().flush(),
            FileInner::Stderr => io::stderr().flush(),
            _ => Ok(()),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        let result = self.flush();
        self.inner = FileInner::Closed;
        result
    }
}

fn is_numeral_char(c: u8) -> bool {
    c.is_ascii_hexdigit() || matches!(c, b'x' | b'X' | b'.' | b'+' | b'-' | b'p' | b'P')
}

/// Push `true` on success, or `nil, message, errno` on failure
pub(crate) fn file_result(l: &mut LuaState, result: io::Result<()>, fname: Option<&str>) -> LuaResult<usize> {
    match result {
        Ok(()) => {
            l.push_boolean(true)?;
            Ok(1)
        }
        Err(e) => {
            let msg = io_error_message(&e);
            l.push_nil()?;
            match fname {
                Some(name) => l.push_string(format!("{}: {}", name, msg))?,
                None => l.push_string(msg)?,
            }
            l.push_integer(e.raw_os_error().unwrap_or(0) as i64)?;
            Ok(3)
        }
    }
}

fn init_io(l: &mut LuaState) -> LuaResult<()> {
    // the io table is on top of the stack
    l.new_metatable(LUA_FILEHANDLE)?;
    l.push_index(-1)?;
    l.set_field(-2, "__index")?;
    let methods: [(&str, crate::lua_value::CFunction); 5] = [
        ("close", io_close),
        ("flush", f_flush),
        ("lines", f_lines),
        ("read", f_read),
        ("write", f_write),
    ];
    for (name, f) in methods {
        l.push_cfunction(f)?;
        l.set_field(-2, name)?;
    }
    l.push_cfunction(f_tostring)?;
    l.set_field(-2, "__tostring")?;
    l.pop(1);

    for (field, inner, reg) in [
        ("stdin", FileInner::Stdin, Some(IO_INPUT)),
        ("stdout", FileInner::Stdout, Some(IO_OUTPUT)),
        ("stderr", FileInner::Stderr, None),
    ] {
        new_file(l, LuaFile::new(inner))?;
        if let Some(reg) = reg {
            l.push_index(-1)?;
            l.set_field(LUA_REGISTRYINDEX, reg)?;
        }
        l.set_field(-2, field)?;
    }
    Ok(())
}

/// Push a new file handle
fn new_file(l: &mut LuaState, file: LuaFile) -> LuaResult<UserdataRef> {
    l.new_userdata(LuaUserdata::new(file))?;
    l.new_metatable(LUA_FILEHANDLE)?;
    l.set_metatable(-2)?;
    match l.value_at(-1) {
        LuaValue::Userdata(u) => Ok(u),
        _ => Err(l.error("cannot create file handle")),
    }
}

/// The open file at argument 1
fn to_file(l: &mut LuaState) -> LuaResult<UserdataRef> {
    let u = l.check_udata(1, LUA_FILEHANDLE)?;
    let closed = u.borrow().downcast_ref::<LuaFile>().is_none_or(LuaFile::is_closed);
    if closed {
        return Err(l.error("attempt to use a closed file"));
    }
    Ok(u)
}

fn with_file<R>(u: &UserdataRef, f: impl FnOnce(&mut LuaFile) -> R) -> Option<R> {
    let mut data = u.borrow_mut();
    data.downcast_mut::<LuaFile>().map(f)
}

fn open_mode(mode: &[u8]) -> Option<OpenOptions> {
    let (first, rest) = mode.split_first()?;
    let plus = rest.first() == Some(&b'+');
    let rest = if plus { &rest[1..] } else { rest };
    if !(rest.is_empty() || rest == b"b") {
        return None;
    }
    let mut options = OpenOptions::new();
    match first {
        b'r' => options.read(true).write(plus),
        b'w' => options.write(true).create(true).truncate(true).read(plus),
        b'a' => options.append(true).create(true).read(plus),
        _ => return None,
    };
    Some(options)
}

fn io_open(l: &mut LuaState) -> LuaResult<usize> {
    let filename = l.check_lstring(1)?.to_str_lossy().into_owned();
    let mode = l.opt_lstring(2, "r")?;
    let Some(options) = open_mode(mode.as_bytes()) else {
        return Err(l.arg_error(2, "invalid mode"));
    };
    let reading = mode.as_bytes()[0] == b'r';
    match options.open(&filename) {
        Ok(f) => {
            let inner = if reading { FileInner::Read(BufReader::new(f)) } else { FileInner::Write(BufWriter::new(f)) };
            new_file(l, LuaFile::new(inner))?;
            Ok(1)
        }
        Err(e) => file_result(l, Err(e), Some(&filename)),
    }
}

fn io_close(l: &mut LuaState) -> LuaResult<usize> {
    if l.is_none(1) {
        l.get_field(LUA_REGISTRYINDEX, IO_OUTPUT)?;
    }
    let u = to_file(l)?;
    let std_stream = with_file(&u, |f| f.is_std_stream()).unwrap_or(false);
    if std_stream {
        l.push_nil()?;
        l.push_string("cannot close standard file")?;
        return Ok(2);
    }
    let result = with_file(&u, LuaFile::close).unwrap_or(Ok(()));
    file_result(l, result, None)
}

/// Default file `reg`, or replace it with the file or file name at argument 1
fn g_iofile(l: &mut LuaState, reg: &str, mode: &str) -> LuaResult<usize> {
    if !l.is_none_or_nil(1) {
        if l.is_string(1) {
            let filename = l.check_lstring(1)?.to_str_lossy().into_owned();
            let Some(options) = open_mode(mode.as_bytes()) else {
                return Err(l.error("invalid mode"));
            };
            match options.open(&filename) {
                Ok(f) => {
                    let inner = if mode == "r" { FileInner::Read(BufReader::new(f)) } else { FileInner::Write(BufWriter::new(f)) };
                    new_file(l, LuaFile::new(inner))?;
                }
                Err(e) => {
                    let msg = io_error_message(&e);
                    return Err(l.error(format!("cannot open file '{}' ({})", filename, msg)));
                }
            }
        } else {
            to_file(l)?;
            l.push_index(1)?;
        }
        l.set_field(LUA_REGISTRYINDEX, reg)?;
    }
    l.get_field(LUA_REGISTRYINDEX, reg)?;
    Ok(1)
}

fn io_input(l: &mut LuaState) -> LuaResult<usize> {
    g_iofile(l, IO_INPUT, "r")
}

fn io_output(l: &mut LuaState) -> LuaResult<usize> {
    g_iofile(l, IO_OUTPUT, "w")
}

/// Default file `reg`, which must still be open
fn get_iofile(l: &mut LuaState, reg: &str) -> LuaResult<UserdataRef> {
    let v = l.global().registry().borrow().get_str(reg);
    let file = v.as_userdata().cloned();
    match file {
        Some(u) if with_file(&u, |f| !f.is_closed()).unwrap_or(false) => Ok(u),
        _ => Err(l.error(format!("standard {} file is closed", &reg[4..]))),
    }
}

fn io_type(l: &mut LuaState) -> LuaResult<usize> {
    l.check_any(1)?;
    match l.test_udata(1, LUA_FILEHANDLE) {
        None => l.push_nil()?,
        Some(u) => {
            let closed = with_file(&u, |f| f.is_closed()).unwrap_or(true);
            l.push_string(if closed { "closed file" } else { "file" })?;
        }
    }
    Ok(1)
}

/// Read the formats at stack positions `first..=top` from `u`
fn g_read(l: &mut LuaState, u: &UserdataRef, first: usize) -> LuaResult<usize> {
    let nargs = l.get_top().saturating_sub(first - 1);
    let formats = if nargs == 0 {
        vec![LuaValue::from("*l")]
    } else {
        (first..first + nargs).map(|i| l.value_at(i as i32)).collect()
    };
    l.check_stack_msg(formats.len() + 20, "too many arguments")?;
    let mut n = 0;
    for (i, fmt) in formats.iter().enumerate() {
        let narg = first + i;
        let result = if let LuaValue::Number(count) = fmt {
            let count = *count as usize;
            with_file(u, |f| f.read_chars(count)).unwrap_or(Ok(None)).map(|v| v.map(LuaValue::string))
        } else {
            let Some(spec) = fmt.as_string() else {
                return Err(l.arg_error(narg, "invalid option"));
            };
            let spec = spec.as_bytes();
            let spec = spec.strip_prefix(b"*").unwrap_or(spec);
            match spec.first() {
                Some(b'n') => with_file(u, |f| f.read_number()).unwrap_or(Ok(None)).map(|v| v.map(LuaValue::from)),
                Some(b'l') => with_file(u, |f| f.read_line(false)).unwrap_or(Ok(None)).map(|v| v.map(LuaValue::string)),
                Some(b'L') => with_file(u, |f| f.read_line(true)).unwrap_or(Ok(None)).map(|v| v.map(LuaValue::string)),
                Some(b'a') => with_file(u, |f| f.read_all()).unwrap_or(Ok(Vec::new())).map(|v| Some(LuaValue::string(v))),
                _ => return Err(l.arg_error(narg, "invalid format")),
            }
        };
        match result {
            Ok(Some(v)) => {
                l.push_value(v)?;
                n += 1;
            }
            Ok(None) => {
                // the first failed read ends the results
                l.push_nil()?;
                return Ok(n + 1);
            }
            Err(e) => return file_result(l, Err(e), None),
        }
    }
    Ok(n)
}

fn io_read(l: &mut LuaState) -> LuaResult<usize> {
    let u = get_iofile(l, IO_INPUT)?;
    g_read(l, &u, 1)
}

fn f_read(l: &mut LuaState) -> LuaResult<usize> {
    let u = to_file(l)?;
    g_read(l, &u, 2)
}

/// Write the arguments from `first` on; returns the file
fn g_write(l: &mut LuaState, u: &UserdataRef, first: usize, file_arg: i32) -> LuaResult<usize> {
    let top = l.get_top();
    let mut result = Ok(());
    for arg in first..=top {
        let data = l.check_lstring(arg)?;
        if result.is_ok() {
            result = with_file(u, |f| f.write_bytes(data.as_bytes())).unwrap_or(Ok(()));
        }
    }
    match result {
        Ok(()) => {
            if file_arg == 0 {
                l.push_value(LuaValue::Userdata(u.clone()))?;
            } else {
                l.push_index(file_arg)?;
            }
            Ok(1)
        }
        Err(e) => file_result(l, Err(e), None),
    }
}

fn io_write(l: &mut LuaState) -> LuaResult<usize> {
    let u = get_iofile(l, IO_OUTPUT)?;
    g_write(l, &u, 1, 0)
}

fn f_write(l: &mut LuaState) -> LuaResult<usize> {
    let u = to_file(l)?;
    g_write(l, &u, 2, 1)
}

fn io_flush(l: &mut LuaState) -> LuaResult<usize> {
    let u = get_iofile(l, IO_OUTPUT)?;
    let result = with_file(&u, LuaFile::flush).unwrap_or(Ok(()));
    file_result(l, result, None)
}

fn f_flush(l: &mut LuaState) -> LuaResult<usize> {
    let u = to_file(l)?;
    let result = with_file(&u, LuaFile::flush).unwrap_or(Ok(()));
    file_result(l, result, None)
}

fn f_tostring(l: &mut LuaState) -> LuaResult<usize> {
    let u = l.check_udata(1, LUA_FILEHANDLE)?;
    let closed = with_file(&u, |f| f.is_closed()).unwrap_or(true);
    if closed {
        l.push_string("file (closed)")?;
    } else {
        let p = l.to_pointer(1);
        l.push_string(format!("file ({:#x})", p))?;
    }
    Ok(1)
}

/// Push the line iterator over the file at `idx`. Upvalues: the file,
/// whether to close it at end of file, then the read formats.
fn aux_lines(l: &mut LuaState, idx: i32, to_close: bool) -> LuaResult<()> {
    let first_format = idx + 1;
    let nformats = (l.get_top() as i32 - idx).max(0) as usize;
    l.check_stack_msg(nformats + 2, "too many arguments")?;
    let formats: Vec<LuaValue> = (0..nformats).map(|i| l.value_at(first_format + i as i32)).collect();
    l.push_index(idx)?;
    l.push_boolean(to_close)?;
    for f in formats {
        l.push_value(f)?;
    }
    l.push_rust_closure(io_readline, 2 + nformats)
}

fn io_readline(l: &mut LuaState) -> LuaResult<usize> {
    let Some(u) = l.value_at(lua_upvalueindex(1)).as_userdata().cloned() else {
        return Err(l.error("file is already closed"));
    };
    if with_file(&u, |f| f.is_closed()).unwrap_or(true) {
        return Err(l.error("file is already closed"));
    }
    let to_close = l.value_at(lua_upvalueindex(2)).is_truthy();
    // formats live in upvalues 3..
    let mut formats = Vec::new();
    let mut i = 3;
    loop {
        let v = l.value_at(lua_upvalueindex(i));
        if v.is_nil() {
            break;
        }
        formats.push(v);
        i += 1;
    }
    l.set_top(0);
    for f in formats {
        l.push_value(f)?;
    }
    let n = g_read(l, &u, 1)?;
    let first = l.value_at(-(n as i32));
    if !first.is_nil() {
        return Ok(n);
    }
    if n > 1 {
        // an error message follows the nil
        let msg = l.value_at(-(n as i32) + 1).to_plain_string();
        return Err(l.error(msg.to_str_lossy().into_owned()));
    }
    if to_close {
        let _ = with_file(&u, LuaFile::close);
    }
    Ok(0)
}

fn f_lines(l: &mut LuaState) -> LuaResult<usize> {
    to_file(l)?;
    aux_lines(l, 1, false)?;
    Ok(1)
}

fn io_lines(l: &mut LuaState) -> LuaResult<usize> {
    if l.is_none(1) {
        l.push_nil()?;
    }
    if l.value_at(1).is_nil() {
        // iterate over the default input
        l.get_field(LUA_REGISTRYINDEX, IO_INPUT)?;
        l.replace(1);
        to_file(l)?;
        aux_lines(l, 1, false)?;
    } else {
        let filename = l.check_lstring(1)?.to_str_lossy().into_owned();
        match File::open(&filename) {
            Ok(f) => {
                new_file(l, LuaFile::new(FileInner::Read(BufReader::new(f))))?;
                l.replace(1);
            }
            Err(e) => {
                let msg = io_error_message(&e);
                return Err(l.error(format!("{}: {}", filename, msg)));
            }
        }
        aux_lines(l, 1, true)?;
    }
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua_vm::{LuaVM, SafeOption};

    #[test]
    fn test_open_mode() {
        assert!(open_mode(b"r").is_some());
        assert!(open_mode(b"w+").is_some());
        assert!(open_mode(b"ab").is_some());
        assert!(open_mode(b"r+b").is_some());
        assert!(open_mode(b"").is_none());
        assert!(open_mode(b"x").is_none());
        assert!(open_mode(b"rw").is_none());
    }

    #[test]
    fn test_write_then_read_back() {
        let mut vm = LuaVM::new(SafeOption::default());
        vm.open_libs();
        let result = vm.execute_string(
            r#"
            local name = os.tmpname()
            local f = assert(io.open(name, "w"))
            assert(io.type(f) == "file")
            assert(f:write("first line\n", 42, " 0x10 3.5\n", "last") == f)
            f:close()
            assert(io.type(f) == "closed file")
            assert(tostring(f) == "file (closed)")
            assert(io.type(42) == nil)

            f = assert(io.open(name))
            assert(f:read() == "first line")
            assert(f:read("*n") == 42)
            local a, b = f:read("*n", "n")
            assert(a == 16 and b == 3.5)
            assert(f:read("*L") == "\n")
            assert(f:read(2) == "la")
            assert(f:read("*a") == "st")
            assert(f:read("*a") == "")
            assert(f:read() == nil)
            f:close()

            local lines = {}
            for line in io.lines(name) do lines[#lines + 1] = line end
            assert(#lines == 3 and lines[3] == "last")

            local ok, msg = pcall(f.read, f)
            assert(not ok and msg:find("attempt to use a closed file", 1, true))
            os.remove(name)
            "#,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_open_failures() {
        let mut vm = LuaVM::new(SafeOption::default());
        vm.open_libs();
        let result = vm.execute_string(
            r#"
            local f, msg, code = io.open("/nonexistent/dir/file.txt")
            assert(f == nil and msg:find("/nonexistent/dir/file.txt", 1, true) and code == 2)
            local ok, err = pcall(io.open, "x", "rw")
            assert(not ok and err:find("invalid mode", 1, true))
            ok, err = pcall(io.lines, "/nonexistent/dir/file.txt")
            assert(not ok)
            local ok2, msg2 = io.close(io.stdout)
            assert(ok2 == nil and msg2 == "cannot close standard file")
            assert(io.write("") == io.stdout)
            "#,
        );
        assert!(result.is_ok());
    }
}
