use std::fs;
use std::io::{self, Write};
use std::rc::Rc;

use anyhow::{Context, bail};
use clap::{ArgAction, Parser};
use lua52::lua_value::chunk_serializer::{dump_chunk, undump_chunk};
use lua52::lua_value::{UpvalueDesc, number_to_string};
use lua52::lua_vm::{OpArgMask, OpMode};
use lua52::{Chunk, Instruction, LuaFunction, LuaString, LuaVM, LuaValue, OpCode, SafeOption};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const VERSION: &str = "Lua 5.2 (lua52 runtime)";
const COPYRIGHT: &str = "Copyright (C) 2026 lua52 contributors";

/// Lua 5.2 compiler: precompiles chunks and lists their bytecode
#[derive(Parser, Debug)]
#[command(name = "luac", disable_version_flag = true, override_usage = "luac [options] [filenames]")]
struct Cli {
    /// List (use -l -l for full listing)
    #[arg(short = 'l', action = ArgAction::Count)]
    list: u8,

    /// Output to file 'name' (default is "luac.out", '-' is stdout)
    #[arg(short = 'o', value_name = "name", default_value = "luac.out")]
    output: String,

    /// Parse only
    #[arg(short = 'p')]
    parse_only: bool,

    /// Strip debug information
    #[arg(short = 's')]
    strip: bool,

    /// Show version information
    #[arg(short = 'v')]
    version: bool,

    /// Input files ('-' is stdin)
    #[arg(allow_hyphen_values = true)]
    files: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env("LUA52_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();

    let cli = Cli::parse();
    if cli.version {
        println!("{}  {}", VERSION, COPYRIGHT);
        if cli.files.is_empty() {
            return Ok(());
        }
    }
    if cli.files.is_empty() {
        bail!("no input files given");
    }
    if let Err(e) = run(&cli) {
        eprintln!("luac: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let mut vm = LuaVM::new(SafeOption::default());
    let mut protos = Vec::with_capacity(cli.files.len());
    for file in &cli.files {
        protos.push(load_proto(&mut vm, file)?);
    }
    let main = if protos.len() == 1 {
        protos.remove(0)
    } else {
        Rc::new(combine(protos)?)
    };

    if cli.list > 0 {
        let mut out = io::stdout().lock();
        print_function(&mut out, &main, cli.list > 1)?;
        out.flush()?;
    }
    if cli.parse_only {
        return Ok(());
    }
    let bytes = dump_chunk(&main, cli.strip);
    debug!(output = %cli.output, size = bytes.len(), "writing precompiled chunk");
    if cli.output == "-" {
        let mut out = io::stdout().lock();
        out.write_all(&bytes).context("cannot write stdout")?;
        out.flush()?;
    } else {
        fs::write(&cli.output, &bytes).with_context(|| format!("cannot open {}", cli.output))?;
    }
    Ok(())
}

/// Compile (or undump) one input and return its main prototype
fn load_proto(vm: &mut LuaVM, file: &str) -> anyhow::Result<Rc<Chunk>> {
    let mut l = vm.main_state();
    let name = if file == "-" { None } else { Some(file) };
    if l.load_file(name, None).is_err() {
        let msg = l.value_at(-1).to_plain_string().to_string();
        l.pop(1);
        bail!(msg);
    }
    let proto = match l.value_at(-1) {
        LuaValue::Function(LuaFunction::Lua(c)) => c.proto.clone(),
        _ => bail!("{}: not a Lua function", file),
    };
    l.pop(1);
    Ok(proto)
}

/// Main function that runs every input chunk in order
fn combine(protos: Vec<Rc<Chunk>>) -> anyhow::Result<Chunk> {
    let n = protos.len() as u32;
    let mut main = Chunk::default();
    main.source = Some(LuaString::from("=(luac)"));
    main.is_vararg = 1;
    main.max_stack_size = 1;
    main.upvalue_descs.push(UpvalueDesc { name: Some(LuaString::from("_ENV")), in_stack: true, index: 0 });
    for (i, p) in protos.iter().enumerate() {
        // an owned copy whose _ENV comes from the new main function
        let mut child = undump_chunk(&dump_chunk(p, false)).context("cannot combine chunks")?;
        if let Some(env) = child.upvalue_descs.first_mut() {
            env.in_stack = false;
        }
        main.child_protos.push(Rc::new(child));
        main.code.push(Instruction::create_abx(OpCode::Closure, 0, i as u32));
        main.code.push(Instruction::create_abc(OpCode::Call, 0, 1, 1));
    }
    main.code.push(Instruction::create_abc(OpCode::Return, 0, 1, 0));
    main.line_info = vec![0; main.code.len()];
    debug!(chunks = n, "combined input chunks");
    Ok(main)
}

fn quoted(s: &[u8]) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for &c in s {
        match c {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x07 => out.push_str("\\a"),
            0x08 => out.push_str("\\b"),
            0x0c => out.push_str("\\f"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x0b => out.push_str("\\v"),
            c if c.is_ascii_graphic() || c == b' ' => out.push(c as char),
            c => out.push_str(&format!("\\{:03}", c)),
        }
    }
    out.push('"');
    out
}

fn constant(f: &Chunk, i: usize) -> String {
    match f.constants.get(i) {
        Some(LuaValue::Nil) => "nil".to_string(),
        Some(LuaValue::Boolean(b)) => b.to_string(),
        Some(LuaValue::Number(n)) => number_to_string(*n),
        Some(LuaValue::String(s)) => quoted(s.as_bytes()),
        // unreachable for a well-formed prototype
        _ => "?".to_string(),
    }
}

fn upvalue_name(f: &Chunk, i: usize) -> String {
    f.upvalue_descs
        .get(i)
        .and_then(|u| u.name.as_ref())
        .map(|n| n.to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Operand printed for an RK argument: constants are negative
fn rk(x: u32) -> i64 {
    if Instruction::is_k(x) { -1 - Instruction::index_k(x) as i64 } else { x as i64 }
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

fn print_header(out: &mut impl Write, f: &Chunk) -> io::Result<()> {
    let source = f.source_name();
    let name = match source.first() {
        Some(b'@') | Some(b'=') => String::from_utf8_lossy(&source[1..]).into_owned(),
        Some(0x1b) => "(bstring)".to_string(),
        _ => "(string)".to_string(),
    };
    let kind = if f.line_defined == 0 { "main" } else { "function" };
    let ncode = f.code.len();
    writeln!(
        out,
        "\n{} <{}:{},{}> ({} instruction{} at {:p})",
        kind,
        name,
        f.line_defined,
        f.last_line_defined,
        ncode,
        plural(ncode),
        f
    )?;
    let nparams = f.param_count as usize;
    let nups = f.upvalue_descs.len();
    let nlocals = f.locals.len();
    let nk = f.constants.len();
    let np = f.child_protos.len();
    writeln!(
        out,
        "{}{} param{}, {} slot{}, {} upvalue{}, {} local{}, {} constant{}, {} function{}",
        nparams,
        if f.is_vararg != 0 { "+" } else { "" },
        plural(nparams),
        f.max_stack_size,
        plural(f.max_stack_size as usize),
        nups,
        plural(nups),
        nlocals,
        plural(nlocals),
        nk,
        plural(nk),
        np,
        plural(np)
    )
}

fn print_code(out: &mut impl Write, f: &Chunk) -> io::Result<()> {
    let mut pc = 0;
    while pc < f.code.len() {
        let i = f.code[pc];
        let op = i.get_opcode();
        let (a, b, c) = (i.get_a(), i.get_b(), i.get_c());
        let (bx, sbx, ax) = (i.get_bx(), i.get_sbx(), i.get_ax());
        let line = f.line_at(pc);
        write!(out, "\t{}\t", pc + 1)?;
        if line > 0 {
            write!(out, "[{}]\t", line)?;
        } else {
            write!(out, "[-]\t")?;
        }
        write!(out, "{:<9}\t", op.name())?;
        match op.get_mode() {
            OpMode::IABC => {
                write!(out, "{}", a)?;
                if op.b_mode() != OpArgMask::N {
                    write!(out, " {}", rk(b))?;
                }
                if op.c_mode() != OpArgMask::N {
                    write!(out, " {}", rk(c))?;
                }
            }
            OpMode::IABx => {
                write!(out, "{}", a)?;
                match op.b_mode() {
                    OpArgMask::K => write!(out, " {}", -1 - bx as i64)?,
                    OpArgMask::U => write!(out, " {}", bx)?,
                    _ => {}
                }
            }
            OpMode::IAsBx => write!(out, "{} {}", a, sbx)?,
            OpMode::IAx => write!(out, "{}", -1 - ax as i64)?,
        }
        match op {
            OpCode::LoadK => write!(out, "\t; {}", constant(f, bx as usize))?,
            OpCode::GetUpval | OpCode::SetUpval => write!(out, "\t; {}", upvalue_name(f, b as usize))?,
            OpCode::GetTabUp => {
                write!(out, "\t; {}", upvalue_name(f, b as usize))?;
                if Instruction::is_k(c) {
                    write!(out, " {}", constant(f, Instruction::index_k(c) as usize))?;
                }
            }
            OpCode::SetTabUp => {
                write!(out, "\t; {}", upvalue_name(f, a as usize))?;
                for x in [b, c] {
                    if Instruction::is_k(x) {
                        write!(out, " {}", constant(f, Instruction::index_k(x) as usize))?;
                    }
                }
            }
            OpCode::GetTable | OpCode::Self_ => {
                if Instruction::is_k(c) {
                    write!(out, "\t; {}", constant(f, Instruction::index_k(c) as usize))?;
                }
            }
            OpCode::SetTable
            | OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Pow
            | OpCode::Mod
            | OpCode::Eq
            | OpCode::Lt
            | OpCode::Le => {
                if Instruction::is_k(b) || Instruction::is_k(c) {
                    let side = |x: u32| {
                        if Instruction::is_k(x) {
                            constant(f, Instruction::index_k(x) as usize)
                        } else {
                            "-".to_string()
                        }
                    };
                    write!(out, "\t; {} {}", side(b), side(c))?;
                }
            }
            OpCode::Jmp | OpCode::ForLoop | OpCode::ForPrep | OpCode::TForLoop => {
                write!(out, "\t; to {}", sbx as i64 + pc as i64 + 2)?;
            }
            OpCode::Closure => {
                if let Some(p) = f.child_protos.get(bx as usize) {
                    write!(out, "\t; {:p}", Rc::as_ptr(p))?;
                }
            }
            OpCode::SetList => {
                if c == 0 {
                    pc += 1;
                    let extra = f.code.get(pc).map(|i| i.as_u32()).unwrap_or(0);
                    write!(out, "\t; {}", extra)?;
                } else {
                    write!(out, "\t; {}", c)?;
                }
            }
            OpCode::ExtraArg => write!(out, "\t; {}", constant(f, ax as usize))?,
            _ => {}
        }
        writeln!(out)?;
        pc += 1;
    }
    Ok(())
}

fn print_debug(out: &mut impl Write, f: &Chunk) -> io::Result<()> {
    writeln!(out, "constants ({}) for {:p}:", f.constants.len(), f)?;
    for i in 0..f.constants.len() {
        writeln!(out, "\t{}\t{}", i + 1, constant(f, i))?;
    }
    writeln!(out, "locals ({}) for {:p}:", f.locals.len(), f)?;
    for (i, var) in f.locals.iter().enumerate() {
        let name = var.name.as_ref().map(|n| n.to_string()).unwrap_or_default();
        writeln!(out, "\t{}\t{}\t{}\t{}", i, name, var.start_pc + 1, var.end_pc + 1)?;
    }
    writeln!(out, "upvalues ({}) for {:p}:", f.upvalue_descs.len(), f)?;
    for (i, uv) in f.upvalue_descs.iter().enumerate() {
        writeln!(out, "\t{}\t{}\t{}\t{}", i, upvalue_name(f, i), uv.in_stack as u8, uv.index)?;
    }
    Ok(())
}

fn print_function(out: &mut impl Write, f: &Chunk, full: bool) -> io::Result<()> {
    print_header(out, f)?;
    print_code(out, f)?;
    if full {
        print_debug(out, f)?;
    }
    for child in &f.child_protos {
        print_function(out, child, full)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(src: &str) -> Rc<Chunk> {
        let mut vm = LuaVM::new(SafeOption::default());
        let mut l = vm.main_state();
        l.load(src.as_bytes(), "=test", None).unwrap();
        match l.value_at(-1) {
            LuaValue::Function(LuaFunction::Lua(c)) => c.proto.clone(),
            _ => panic!("expected a Lua function"),
        }
    }

    #[test]
    fn test_quoted() {
        assert_eq!(quoted(b"a\"b\\c\n"), "\"a\\\"b\\\\c\\n\"");
        assert_eq!(quoted(b"\x01"), "\"\\001\"");
    }

    #[test]
    fn test_listing() {
        let p = compile("local x = 1\nprint(\"hi\", x)\nreturn function() return x end");
        let mut out = Vec::new();
        print_function(&mut out, &p, true).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("main <test:0,0>"));
        assert!(text.contains("GETTABUP"));
        assert!(text.contains("; _ENV \"print\""));
        assert!(text.contains("function <test:3,3>"));
        assert!(text.contains("locals (1) for"));
    }

    #[test]
    fn test_combine_runs_chunks_in_order() {
        let a = compile("order = (order or '') .. 'a'");
        let b = compile("order = (order or '') .. 'b'");
        let main = combine(vec![a, b]).unwrap();
        assert_eq!(main.source, Some(LuaString::from("=(luac)")));
        assert_eq!(main.code.len(), 5);
        assert!(main.upvalue_descs[0].in_stack);
        assert!(!main.child_protos[1].upvalue_descs[0].in_stack);
        let bytes = dump_chunk(&main, false);

        let mut vm = LuaVM::new(SafeOption::default());
        vm.open_libs();
        vm.execute_named(&bytes, "=combined").unwrap();
        assert_eq!(vm.get_global("order").to_plain_string().to_string(), "ab");
    }
}
