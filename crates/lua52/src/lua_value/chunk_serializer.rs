// Precompiled chunk format: dumper and verifying loader.
//
// Header (18 bytes): signature, version, format, endianness, sizes of int,
// size_t, instruction and number, integral flag, and a conversion-detecting
// tail. Function bodies follow recursively; see `write_function`.

use std::rc::Rc;

use thiserror::Error;
use tracing::debug;

use super::{Chunk, LocVar, LuaString, LuaValue, UpvalueDesc};
use crate::lua_vm::lua_limits::LUAI_MAXCCALLS;
use crate::lua_vm::{Instruction, OpCode};

pub const LUA_SIGNATURE: &[u8; 4] = b"\x1bLua";
pub const LUAC_VERSION: u8 = 0x52;
pub const LUAC_FORMAT: u8 = 0;
pub const LUAC_TAIL: &[u8; 6] = b"\x19\x93\r\n\x1a\n";
pub const LUAC_HEADERSIZE: usize = 18;

const TAG_NIL: u8 = 0;
const TAG_BOOLEAN: u8 = 1;
const TAG_NUMBER: u8 = 3;
const TAG_STRING: u8 = 4;

/// Why a precompiled chunk was refused. Displayed as the middle part of
/// `<chunk>: <why> precompiled chunk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UndumpError {
    #[error("not a")]
    NotPrecompiled,
    #[error("version mismatch in")]
    VersionMismatch,
    #[error("incompatible")]
    Incompatible,
    #[error("corrupted")]
    Corrupted,
    #[error("truncated")]
    Truncated,
}

/// The header this host writes and accepts
pub fn header() -> [u8; LUAC_HEADERSIZE] {
    let mut h = [0u8; LUAC_HEADERSIZE];
    h[..4].copy_from_slice(LUA_SIGNATURE);
    h[4] = LUAC_VERSION;
    h[5] = LUAC_FORMAT;
    h[6] = u8::from(cfg!(target_endian = "little"));
    h[7] = std::mem::size_of::<i32>() as u8;
    h[8] = std::mem::size_of::<usize>() as u8;
    h[9] = std::mem::size_of::<u32>() as u8;
    h[10] = std::mem::size_of::<f64>() as u8;
    h[11] = 0; // numbers are floating point
    h[12..].copy_from_slice(LUAC_TAIL);
    h
}

/// Chunk name as it appears in loader messages
pub fn display_name(chunkname: &[u8]) -> String {
    match chunkname.first() {
        Some(b'@') | Some(b'=') => String::from_utf8_lossy(&chunkname[1..]).into_owned(),
        Some(0x1b) => "binary string".to_string(),
        _ => String::from_utf8_lossy(chunkname).into_owned(),
    }
}

// ===== Dump =====

/// Serialize a prototype. With `strip` the debug information is left out.
pub fn dump_chunk(chunk: &Chunk, strip: bool) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);
    buf.extend_from_slice(&header());
    write_function(&mut buf, chunk, strip);
    buf
}

fn write_int(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_ne_bytes());
}

fn write_size(buf: &mut Vec<u8>, v: usize) {
    buf.extend_from_slice(&v.to_ne_bytes());
}

fn write_string(buf: &mut Vec<u8>, s: Option<&LuaString>) {
    match s {
        None => write_size(buf, 0),
        Some(s) => {
            write_size(buf, s.len() + 1);
            buf.extend_from_slice(s.as_bytes());
            buf.push(0);
        }
    }
}

fn write_function(buf: &mut Vec<u8>, f: &Chunk, strip: bool) {
    write_int(buf, f.line_defined);
    write_int(buf, f.last_line_defined);
    buf.push(f.param_count);
    buf.push(f.is_vararg);
    buf.push(f.max_stack_size);

    write_int(buf, f.code.len() as i32);
    for i in &f.code {
        buf.extend_from_slice(&i.as_u32().to_ne_bytes());
    }

    write_int(buf, f.constants.len() as i32);
    for k in &f.constants {
        match k {
            LuaValue::Boolean(b) => {
                buf.push(TAG_BOOLEAN);
                buf.push(u8::from(*b));
            }
            LuaValue::Number(n) => {
                buf.push(TAG_NUMBER);
                buf.extend_from_slice(&n.to_ne_bytes());
            }
            LuaValue::String(s) => {
                buf.push(TAG_STRING);
                write_string(buf, Some(s));
            }
            // only nil is left in a constant pool
            _ => buf.push(TAG_NIL),
        }
    }
    write_int(buf, f.child_protos.len() as i32);
    for p in &f.child_protos {
        write_function(buf, p, strip);
    }

    write_int(buf, f.upvalue_descs.len() as i32);
    for uv in &f.upvalue_descs {
        buf.push(u8::from(uv.in_stack));
        buf.push(uv.index);
    }

    // debug information
    write_string(buf, if strip { None } else { f.source.as_ref() });
    let lines: &[i32] = if strip { &[] } else { &f.line_info };
    write_int(buf, lines.len() as i32);
    for l in lines {
        write_int(buf, *l);
    }
    let locals: &[LocVar] = if strip { &[] } else { &f.locals };
    write_int(buf, locals.len() as i32);
    for var in locals {
        write_string(buf, var.name.as_ref());
        write_int(buf, var.start_pc as i32);
        write_int(buf, var.end_pc as i32);
    }
    let has_names = f.upvalue_descs.iter().any(|uv| uv.name.is_some());
    let nnames = if strip || !has_names { 0 } else { f.upvalue_descs.len() };
    write_int(buf, nnames as i32);
    for uv in &f.upvalue_descs[..nnames] {
        write_string(buf, uv.name.as_ref());
    }
}

// ===== Load =====

struct LoadState<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> LoadState<'a> {
    fn block(&mut self, n: usize) -> Result<&'a [u8], UndumpError> {
        let end = self.pos.checked_add(n).ok_or(UndumpError::Truncated)?;
        let bytes = self.data.get(self.pos..end).ok_or(UndumpError::Truncated)?;
        self.pos = end;
        Ok(bytes)
    }

    fn byte(&mut self) -> Result<u8, UndumpError> {
        Ok(self.block(1)?[0])
    }

    fn int(&mut self) -> Result<i32, UndumpError> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.block(4)?);
        Ok(i32::from_ne_bytes(raw))
    }

    /// A non-negative count
    fn count(&mut self) -> Result<usize, UndumpError> {
        let n = self.int()?;
        if n < 0 {
            return Err(UndumpError::Corrupted);
        }
        Ok(n as usize)
    }

    fn size(&mut self) -> Result<usize, UndumpError> {
        const N: usize = std::mem::size_of::<usize>();
        let mut raw = [0u8; N];
        raw.copy_from_slice(self.block(N)?);
        Ok(usize::from_ne_bytes(raw))
    }

    fn number(&mut self) -> Result<f64, UndumpError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.block(8)?);
        Ok(f64::from_ne_bytes(raw))
    }

    fn string(&mut self) -> Result<Option<LuaString>, UndumpError> {
        let size = self.size()?;
        if size == 0 {
            return Ok(None);
        }
        let bytes = self.block(size)?;
        // the stored size counts a trailing NUL
        Ok(Some(LuaString::from(&bytes[..size - 1])))
    }

    fn header(&mut self) -> Result<(), UndumpError> {
        let expected = header();
        let got = self.block(LUAC_HEADERSIZE).map_err(|_| {
            if self.data.starts_with(LUA_SIGNATURE) {
                UndumpError::Truncated
            } else {
                UndumpError::NotPrecompiled
            }
        })?;
        if got == expected {
            return Ok(());
        }
        if got[..4] != expected[..4] {
            Err(UndumpError::NotPrecompiled)
        } else if got[..6] != expected[..6] {
            Err(UndumpError::VersionMismatch)
        } else if got[..12] != expected[..12] {
            Err(UndumpError::Incompatible)
        } else {
            Err(UndumpError::Corrupted)
        }
    }

    fn function(&mut self) -> Result<Chunk, UndumpError> {
        self.depth += 1;
        if self.depth > LUAI_MAXCCALLS {
            return Err(UndumpError::Corrupted);
        }
        let mut f = Chunk {
            line_defined: self.int()?,
            last_line_defined: self.int()?,
            param_count: self.byte()?,
            is_vararg: self.byte()?,
            max_stack_size: self.byte()?,
            ..Chunk::default()
        };

        let ncode = self.count()?;
        f.code.reserve(ncode.min(self.data.len() / 4));
        for _ in 0..ncode {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(self.block(4)?);
            let i = Instruction::from_u32(u32::from_ne_bytes(raw));
            if OpCode::from_u8(i.raw_opcode()).is_none() {
                return Err(UndumpError::Corrupted);
            }
            f.code.push(i);
        }

        let nk = self.count()?;
        for _ in 0..nk {
            let k = match self.byte()? {
                TAG_NIL => LuaValue::Nil,
                TAG_BOOLEAN => LuaValue::Boolean(self.byte()? != 0),
                TAG_NUMBER => LuaValue::Number(self.number()?),
                TAG_STRING => match self.string()? {
                    Some(s) => LuaValue::String(s),
                    None => return Err(UndumpError::Corrupted),
                },
                _ => return Err(UndumpError::Corrupted),
            };
            f.constants.push(k);
        }
        let np = self.count()?;
        for _ in 0..np {
            let child = self.function()?;
            f.child_protos.push(Rc::new(child));
        }

        let nup = self.count()?;
        for _ in 0..nup {
            let in_stack = self.byte()? != 0;
            let index = self.byte()?;
            f.upvalue_descs.push(UpvalueDesc {
                name: None,
                in_stack,
                index,
            });
        }

        f.source = self.string()?;
        let nlines = self.count()?;
        for _ in 0..nlines {
            f.line_info.push(self.int()?);
        }
        let nlocals = self.count()?;
        for _ in 0..nlocals {
            let name = self.string()?;
            let start_pc = self.int()? as u32;
            let end_pc = self.int()? as u32;
            f.locals.push(LocVar {
                name,
                start_pc,
                end_pc,
            });
        }
        let nnames = self.count()?;
        if nnames > f.upvalue_descs.len() {
            return Err(UndumpError::Corrupted);
        }
        for i in 0..nnames {
            f.upvalue_descs[i].name = self.string()?;
        }
        self.depth -= 1;
        Ok(f)
    }
}

/// Load a precompiled chunk
pub fn undump_chunk(data: &[u8]) -> Result<Chunk, UndumpError> {
    let mut state = LoadState {
        data,
        pos: 0,
        depth: 0,
    };
    state.header()?;
    let chunk = state.function()?;
    debug!(size = data.len(), upvalues = chunk.upvalue_descs.len(), "loaded precompiled chunk");
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Chunk {
        let child = Chunk {
            code: vec![Instruction::create_abc(OpCode::Return, 0, 1, 0)],
            line_info: vec![3],
            source: Some(LuaString::from("=test")),
            line_defined: 2,
            last_line_defined: 4,
            max_stack_size: 2,
            upvalue_descs: vec![UpvalueDesc {
                name: Some(LuaString::from("x")),
                in_stack: true,
                index: 0,
            }],
            ..Chunk::default()
        };
        Chunk {
            code: vec![
                Instruction::create_abx(OpCode::LoadK, 0, 0),
                Instruction::create_abx(OpCode::Closure, 1, 0),
                Instruction::create_abc(OpCode::Return, 0, 1, 0),
            ],
            constants: vec![
                LuaValue::Nil,
                LuaValue::Boolean(true),
                LuaValue::Number(1.5),
                LuaValue::from("hello"),
            ],
            child_protos: vec![Rc::new(child)],
            line_info: vec![1, 2, 5],
            locals: vec![LocVar {
                name: Some(LuaString::from("x")),
                start_pc: 1,
                end_pc: 3,
            }],
            upvalue_descs: vec![UpvalueDesc {
                name: Some(LuaString::from("_ENV")),
                in_stack: true,
                index: 0,
            }],
            source: Some(LuaString::from("=test")),
            is_vararg: 1,
            max_stack_size: 2,
            ..Chunk::default()
        }
    }

    #[test]
    fn test_dump_load_dump_is_stable() {
        let bytes = dump_chunk(&sample(), false);
        let loaded = undump_chunk(&bytes).unwrap();
        assert_eq!(loaded.constants.len(), 4);
        assert_eq!(loaded.child_protos[0].line_defined, 2);
        assert_eq!(dump_chunk(&loaded, false), bytes);
    }

    #[test]
    fn test_sized_strings_survive_loading() {
        let bytes = dump_chunk(&sample(), false);
        let loaded = undump_chunk(&bytes).unwrap();
        assert_eq!(loaded.constants[3], LuaValue::from("hello"));
        assert_eq!(loaded.source, Some(LuaString::from("=test")));
        assert_eq!(loaded.locals[0].name, Some(LuaString::from("x")));
    }

    #[test]
    fn test_strip() {
        let bytes = dump_chunk(&sample(), true);
        let loaded = undump_chunk(&bytes).unwrap();
        assert!(loaded.source.is_none());
        assert!(loaded.line_info.is_empty());
        assert!(loaded.upvalue_descs[0].name.is_none());
        assert_eq!(dump_chunk(&loaded, false), bytes);
    }

    #[test]
    fn test_header_errors() {
        assert_eq!(undump_chunk(b"print(1)").unwrap_err(), UndumpError::NotPrecompiled);
        let mut bytes = dump_chunk(&sample(), false);
        bytes[4] = 0x51;
        assert_eq!(undump_chunk(&bytes).unwrap_err(), UndumpError::VersionMismatch);
        let mut bytes = dump_chunk(&sample(), false);
        bytes[10] = 4;
        assert_eq!(undump_chunk(&bytes).unwrap_err(), UndumpError::Incompatible);
        let mut bytes = dump_chunk(&sample(), false);
        bytes[15] = b'x';
        assert_eq!(undump_chunk(&bytes).unwrap_err(), UndumpError::Corrupted);
        let bytes = dump_chunk(&sample(), false);
        assert_eq!(undump_chunk(&bytes[..30]).unwrap_err(), UndumpError::Truncated);
    }
}
