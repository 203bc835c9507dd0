use std::env;
use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Context, bail};
use clap::{ArgAction, CommandFactory, FromArgMatches, Parser};
use lua52::lua_vm::lua_limits::{LUA_MULTRET, LUA_REGISTRYINDEX};
use lua52::{LuaError, LuaResult, LuaState, LuaVM, LuaValue, SafeOption, ThreadStatus};
use tracing_subscriber::EnvFilter;

const VERSION: &str = "Lua 5.2 (lua52 runtime)";
const COPYRIGHT: &str = "Copyright (C) 2026 lua52 contributors";
const PROGNAME: &str = "lua";

/// Stand-alone Lua 5.2 interpreter
#[derive(Parser, Debug)]
#[command(
    name = "lua",
    disable_version_flag = true,
    override_usage = "lua [options] [script [args]]"
)]
struct Cli {
    /// Execute string 'stat'
    #[arg(short = 'e', value_name = "stat", action = ArgAction::Append)]
    execute: Vec<String>,

    /// Require library 'mod'
    #[arg(short = 'l', value_name = "mod", action = ArgAction::Append)]
    require: Vec<String>,

    /// Enter interactive mode after executing 'script'
    #[arg(short = 'i')]
    interactive: bool,

    /// Show version information
    #[arg(short = 'v')]
    version: bool,

    /// Ignore environment variables
    #[arg(short = 'E')]
    ignore_env: bool,

    /// Script to run ('-' reads stdin) followed by its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "script [args]")]
    script: Vec<String>,
}

/// One `-e` or `-l` option, in command-line order
enum Action {
    Execute(String),
    Require(String),
}

struct Options {
    cli: Cli,
    actions: Vec<Action>,
    /// Index of the script in the raw argument list (`argv.len()` if none)
    script_index: usize,
}

fn parse_args(argv: &[String]) -> Result<Options, clap::Error> {
    let matches = Cli::command().try_get_matches_from(argv)?;
    let cli = Cli::from_arg_matches(&matches)?;

    let mut ordered: Vec<(usize, Action)> = Vec::new();
    if let Some(indices) = matches.indices_of("execute") {
        ordered.extend(indices.zip(cli.execute.iter()).map(|(i, s)| (i, Action::Execute(s.clone()))));
    }
    if let Some(indices) = matches.indices_of("require") {
        ordered.extend(indices.zip(cli.require.iter()).map(|(i, s)| (i, Action::Require(s.clone()))));
    }
    ordered.sort_by_key(|(i, _)| *i);
    let actions = ordered.into_iter().map(|(_, a)| a).collect();

    let script_index = argv.len() - cli.script.len();
    Ok(Options { cli, actions, script_index })
}

fn print_version() {
    println!("{}  {}", VERSION, COPYRIGHT);
    let _ = io::stdout().flush();
}

fn report_message(msg: &str) {
    eprintln!("{}: {}", PROGNAME, msg);
    let _ = io::stderr().flush();
}

/// Print the error message on top of the stack and pop it
fn report(l: &mut LuaState, status: ThreadStatus) -> bool {
    if let ThreadStatus::Error(_) = status {
        let msg = match l.value_at(-1) {
            LuaValue::Nil => "(error object is a nil value)".to_string(),
            v => match v.to_lua_string() {
                Some(s) => s.to_string(),
                None => format!("(error object is a {} value)", v.type_name()),
            },
        };
        report_message(&msg);
        l.pop(1);
        return false;
    }
    true
}

/// Message handler: adds a traceback to the error message
fn msghandler(l: &mut LuaState) -> LuaResult<usize> {
    let msg = match l.value_at(1) {
        LuaValue::String(s) => s.to_string(),
        v => {
            if l.call_meta(&v, "__tostring")? && l.is_string(-1) {
                return Ok(1);
            }
            format!("(error object is a {} value)", v.type_name())
        }
    };
    let tb = l.traceback(Some(&msg), 1);
    l.push_string(tb)?;
    Ok(1)
}

/// Call the function below the `narg` arguments on top of the stack with
/// the traceback handler installed
fn docall(l: &mut LuaState, narg: usize, nres: i32) -> ThreadStatus {
    let base = (l.get_top() - narg) as i32;
    if l.push_cfunction(msghandler).is_err() {
        return ThreadStatus::Error(LuaError::MemoryError);
    }
    l.insert(base);
    let status = match l.pcall(narg, nres, base) {
        Ok(status) => status,
        Err(e) => ThreadStatus::Error(e),
    };
    l.remove(base);
    status
}

fn load_status(result: LuaResult<()>) -> ThreadStatus {
    match result {
        Ok(()) => ThreadStatus::Ok,
        Err(e) => ThreadStatus::Error(e),
    }
}

fn dochunk(l: &mut LuaState, loaded: LuaResult<()>) -> bool {
    let mut status = load_status(loaded);
    if status == ThreadStatus::Ok {
        status = docall(l, 0, 0);
    }
    report(l, status)
}

fn dostring(l: &mut LuaState, code: &str, name: &str) -> bool {
    let loaded = l.load(code.as_bytes(), name, None);
    dochunk(l, loaded)
}

fn dofile(l: &mut LuaState, filename: &str) -> bool {
    let loaded = l.load_file(Some(filename), None);
    dochunk(l, loaded)
}

fn dolibrary(l: &mut LuaState, name: &str) -> bool {
    let pushed = l.get_global("require").and_then(|_| l.push_string(name));
    if pushed.is_err() {
        return report(l, ThreadStatus::Error(LuaError::MemoryError));
    }
    let status = docall(l, 1, 1);
    if status == ThreadStatus::Ok {
        // global[name] = require result
        return l.set_global(name).is_ok();
    }
    report(l, status)
}

/// `arg` table: the script at index 0, its arguments at positive indices
/// and the interpreter options at negative ones
fn create_arg_table(l: &mut LuaState, argv: &[String], script: usize) -> LuaResult<()> {
    l.create_table(argv.len().saturating_sub(script + 1), script + 1)?;
    for (i, a) in argv.iter().enumerate() {
        l.push_string(a.as_str())?;
        l.raw_set_int(-2, i as i64 - script as i64)?;
    }
    l.set_global("arg")
}

fn handle_script(l: &mut LuaState, argv: &[String], script: usize) -> bool {
    let fname = argv[script].as_str();
    // a lone '-' after '--' is still a file name
    let stdin = fname == "-" && argv[script - 1] != "--";
    let loaded = l.load_file(if stdin { None } else { Some(fname) }, None);
    let mut status = load_status(loaded);
    if status == ThreadStatus::Ok {
        let args = &argv[script + 1..];
        if l.check_stack_msg(args.len() + 3, "too many arguments to script").is_err() {
            return report(l, ThreadStatus::Error(LuaError::RuntimeError));
        }
        for a in args {
            if l.push_string(a.as_str()).is_err() {
                return report(l, ThreadStatus::Error(LuaError::MemoryError));
            }
        }
        status = docall(l, args.len(), LUA_MULTRET);
    }
    report(l, status)
}

/// Run LUA_INIT_5_2 (or LUA_INIT): '@file' runs a file, anything else is code
fn handle_luainit(l: &mut LuaState) -> bool {
    let (name, init) = match env::var("LUA_INIT_5_2") {
        Ok(v) => ("=LUA_INIT_5_2", v),
        Err(_) => match env::var("LUA_INIT") {
            Ok(v) => ("=LUA_INIT", v),
            Err(_) => return true,
        },
    };
    match init.strip_prefix('@') {
        Some(file) => dofile(l, file),
        None => dostring(l, &init, name),
    }
}

fn get_prompt(l: &mut LuaState, first: bool) -> String {
    let (var, default) = if first { ("_PROMPT", "> ") } else { ("_PROMPT2", ">> ") };
    if l.get_global(var).is_err() {
        return default.to_string();
    }
    let prompt = l.to_lstring(-1).map(|s| s.to_string());
    l.pop(1);
    prompt.unwrap_or_else(|| default.to_string())
}

/// A syntax error caused by input ending early: the REPL asks for more
fn incomplete(l: &mut LuaState, status: &ThreadStatus) -> bool {
    if *status != ThreadStatus::Error(LuaError::SyntaxError) {
        return false;
    }
    let unfinished = l
        .to_lstring(-1)
        .is_some_and(|msg| msg.as_bytes().ends_with(b"<eof>"));
    if unfinished {
        l.pop(1);
    }
    unfinished
}

/// Read one statement, asking for continuation lines while it is
/// incomplete. Returns None at end of input.
fn load_line(l: &mut LuaState, lines: &mut impl Iterator<Item = io::Result<String>>) -> Option<ThreadStatus> {
    let mut buffer = String::new();
    let mut first = true;
    loop {
        print!("{}", get_prompt(l, first));
        let _ = io::stdout().flush();
        let line = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(_)) | None => {
                return if first { None } else { Some(ThreadStatus::Error(LuaError::SyntaxError)) };
            }
        };
        if first {
            // '=expr' prints the value of expr
            buffer = match line.strip_prefix('=') {
                Some(expr) => format!("return {}", expr),
                None => line,
            };
        } else {
            buffer.push('\n');
            buffer.push_str(&line);
        }
        first = false;
        let status = load_status(l.load(buffer.as_bytes(), "=stdin", None));
        if !incomplete(l, &status) {
            return Some(status);
        }
    }
}

fn do_repl(l: &mut LuaState) {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    while let Some(mut status) = load_line(l, &mut lines) {
        if status == ThreadStatus::Ok {
            status = docall(l, 0, LUA_MULTRET);
        }
        report(l, status);
        let n = l.get_top();
        if status == ThreadStatus::Ok && n > 0 {
            // print any results
            let printed = l
                .check_stack_msg(20, "too many results to print")
                .and_then(|_| l.get_global("print"));
            if printed.is_ok() {
                l.insert(1);
                let failed = !matches!(l.pcall(n, 0, 0), Ok(ThreadStatus::Ok));
                if failed && l.get_top() > 0 {
                    let msg = l.value_at(-1).to_plain_string().to_string();
                    report_message(&format!("error calling 'print' ({})", msg));
                }
            }
        }
        l.set_top(0);
    }
    println!();
    let _ = io::stdout().flush();
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("LUA52_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn lua_main(argv: Vec<String>) -> anyhow::Result<bool> {
    let opts = match parse_args(&argv) {
        Ok(opts) => opts,
        Err(e) if e.kind() == clap::error::ErrorKind::DisplayHelp => {
            e.print().context("cannot print help")?;
            return Ok(true);
        }
        Err(e) => {
            // usage errors carry their own usage text
            let _ = e.print();
            return Ok(false);
        }
    };
    let cli = &opts.cli;
    let has_script = !cli.script.is_empty();

    if cli.version {
        print_version();
    }

    let mut vm = LuaVM::new(SafeOption::default());
    let ok = {
        let mut l = vm.main_state();
        if cli.ignore_env {
            l.push_boolean(true)?;
            l.set_field(LUA_REGISTRYINDEX, "LUA_NOENV")?;
        }
        drop(l);
        vm.open_libs();
        let mut l = vm.main_state();
        run(&mut l, &argv, &opts, has_script)
    };
    Ok(ok)
}

fn run(l: &mut LuaState, argv: &[String], opts: &Options, has_script: bool) -> bool {
    let cli = &opts.cli;
    if !cli.ignore_env && !handle_luainit(l) {
        return false;
    }
    for action in &opts.actions {
        let ok = match action {
            Action::Execute(code) => dostring(l, code, "=(command line)"),
            Action::Require(name) => dolibrary(l, name),
        };
        if !ok {
            return false;
        }
    }
    if has_script {
        if create_arg_table(l, argv, opts.script_index).is_err() {
            return report(l, ThreadStatus::Error(LuaError::MemoryError));
        }
        if !handle_script(l, argv, opts.script_index) {
            return false;
        }
    }
    if cli.interactive {
        do_repl(l);
    } else if !has_script && opts.actions.is_empty() && !cli.version {
        if io::stdin().is_terminal() {
            print_version();
            do_repl(l);
        } else {
            return dofile_stdin(l);
        }
    }
    true
}

fn dofile_stdin(l: &mut LuaState) -> bool {
    let loaded = l.load_file(None, None);
    dochunk(l, loaded)
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let argv: Vec<String> = env::args().collect();

    // The compiler and the call machinery recurse on the host stack, so
    // run on a thread with room for deep nesting.
    let stack_size = 16 * 1024 * 1024;
    let handle = std::thread::Builder::new()
        .name("lua-main".into())
        .stack_size(stack_size)
        .spawn(move || lua_main(argv))
        .context("failed to spawn the interpreter thread")?;

    match handle.join() {
        Ok(Ok(true)) => Ok(()),
        Ok(Ok(false)) => std::process::exit(1),
        Ok(Err(e)) => Err(e),
        Err(_) => bail!("internal error (interpreter thread panicked)"),
    }
}
