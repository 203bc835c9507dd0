// OS library
// Implements: clock, date, difftime, execute, exit, getenv, remove, rename,
// setlocale, time, tmpname

use std::fmt::Write;
use std::sync::OnceLock;
use std::time::Instant;

use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};

use crate::lib_registry::LibraryModule;
use crate::lua_value::LuaValueKind;
use crate::lua_vm::{LuaResult, LuaState};
use crate::stdlib::io::file_result;

pub fn create_os_lib() -> LibraryModule {
    crate::lib_module!("os", {
        "clock" => os_clock,
        "date" => os_date,
        "difftime" => os_difftime,
        "execute" => os_execute,
        "exit" => os_exit,
        "getenv" => os_getenv,
        "remove" => os_remove,
        "rename" => os_rename,
        "setlocale" => os_setlocale,
        "time" => os_time,
        "tmpname" => os_tmpname,
    })
    .with_initializer(|_| {
        // start the clock when the library is opened
        process_start();
        Ok(())
    })
}

fn process_start() -> Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    *START.get_or_init(Instant::now)
}

fn os_clock(l: &mut LuaState) -> LuaResult<usize> {
    l.push_number(process_start().elapsed().as_secs_f64())?;
    Ok(1)
}

/// Conversions accepted by `os.date`, with their optional `E`/`O`
/// modifier forms
const STRFTIME_OPTIONS: &str = "aAbBcCdDeFgGhHIjmMnprRStTuUVwWxXyYzZ%";
const STRFTIME_E: &str = "cCxXyY";
const STRFTIME_O: &str = "deHImMSuUVwWy";

/// Length of the conversion specifier at the start of `s`, if valid
fn check_option(s: &[u8]) -> Option<usize> {
    match s.first().copied()? {
        b'E' => s.get(1).filter(|c| STRFTIME_E.as_bytes().contains(c)).map(|_| 2),
        b'O' => s.get(1).filter(|c| STRFTIME_O.as_bytes().contains(c)).map(|_| 2),
        c if STRFTIME_OPTIONS.as_bytes().contains(&c) => Some(1),
        _ => None,
    }
}

/// A broken-down time, as stored in the date tables
struct DateFields {
    sec: i64,
    min: i64,
    hour: i64,
    day: i64,
    month: i64,
    year: i64,
    wday: i64,
    yday: i64,
}

impl DateFields {
    fn from_datetime<Tz: TimeZone>(dt: &DateTime<Tz>) -> Self {
        DateFields {
            sec: dt.second() as i64,
            min: dt.minute() as i64,
            hour: dt.hour() as i64,
            day: dt.day() as i64,
            month: dt.month() as i64,
            year: dt.year() as i64,
            wday: dt.weekday().num_days_from_sunday() as i64 + 1,
            yday: dt.ordinal() as i64,
        }
    }

    /// Fill the table on top of the stack
    fn set_all_fields(&self, l: &mut LuaState) -> LuaResult<()> {
        let fields = [
            ("sec", self.sec),
            ("min", self.min),
            ("hour", self.hour),
            ("day", self.day),
            ("month", self.month),
            ("year", self.year),
            ("wday", self.wday),
            ("yday", self.yday),
        ];
        for (key, value) in fields {
            l.push_integer(value)?;
            l.set_field(-2, key)?;
        }
        // daylight saving information is not tracked
        l.push_boolean(false)?;
        l.set_field(-2, "isdst")
    }
}

/// Expand a strftime-style format for `dt`
fn format_date<Tz: TimeZone>(l: &mut LuaState, fmt: &[u8], dt: &DateTime<Tz>) -> LuaResult<Vec<u8>>
where
    Tz::Offset: std::fmt::Display,
{
    let mut out = Vec::with_capacity(fmt.len() * 2);
    let mut i = 0;
    while i < fmt.len() {
        if fmt[i] != b'%' {
            out.push(fmt[i]);
            i += 1;
            continue;
        }
        let rest = &fmt[i + 1..];
        let Some(n) = check_option(rest) else {
            let shown = String::from_utf8_lossy(&rest[..rest.len().min(2)]).into_owned();
            return Err(l.arg_error(1, &format!("invalid conversion specifier '%{}'", shown)));
        };
        // the E and O modifiers select alternative forms; the C locale has none
        let conv = rest[n - 1] as char;
        let mut piece = String::new();
        if write!(piece, "{}", dt.format(&format!("%{}", conv))).is_err() {
            return Err(l.arg_error(1, &format!("invalid conversion specifier '%{}'", conv)));
        }
        out.extend_from_slice(piece.as_bytes());
        i += 1 + n;
    }
    Ok(out)
}

fn os_date(l: &mut LuaState) -> LuaResult<usize> {
    let fmt = l.opt_lstring(1, "%c")?;
    let t = if l.is_none_or_nil(2) { Utc::now().timestamp() } else { l.check_number(2)? as i64 };
    let (utc, fmt) = match fmt.as_bytes().strip_prefix(b"!") {
        Some(rest) => (true, rest),
        None => (false, fmt.as_bytes()),
    };
    if utc {
        let Some(dt) = Utc.timestamp_opt(t, 0).single() else {
            l.push_nil()?;
            return Ok(1);
        };
        push_date(l, fmt, &dt)
    } else {
        let Some(dt) = Local.timestamp_opt(t, 0).single() else {
            l.push_nil()?;
            return Ok(1);
        };
        push_date(l, fmt, &dt)
    }
}

fn push_date<Tz: TimeZone>(l: &mut LuaState, fmt: &[u8], dt: &DateTime<Tz>) -> LuaResult<usize>
where
    Tz::Offset: std::fmt::Display,
{
    if fmt == b"*t" {
        l.create_table(0, 9)?;
        DateFields::from_datetime(dt).set_all_fields(l)?;
    } else {
        let s = format_date(l, fmt, dt)?;
        l.push_string(s)?;
    }
    Ok(1)
}

/// Integer field `key` of the table at index 1; `default` of None makes
/// it mandatory
fn get_field(l: &mut LuaState, key: &str, default: Option<i64>) -> LuaResult<i64> {
    l.get_field(1, key)?;
    let v = l.value_at(-1).to_number();
    l.pop(1);
    match (v, default) {
        (Some(n), _) => Ok(n as i64),
        (None, Some(d)) => Ok(d),
        (None, None) => Err(l.error(format!("field '{}' missing in date table", key))),
    }
}

/// Normalise out-of-range fields the way `mktime` does
fn normalize(year: i64, month0: i64, day: i64, hour: i64, min: i64, sec: i64) -> Option<NaiveDateTime> {
    let year = year.checked_add(month0.div_euclid(12))?;
    let month = month0.rem_euclid(12) as u32 + 1;
    let first = NaiveDate::from_ymd_opt(i32::try_from(year).ok()?, month, 1)?;
    let base = first.and_hms_opt(0, 0, 0)?;
    base.checked_add_signed(Duration::try_days(day - 1)?)?
        .checked_add_signed(Duration::try_hours(hour)?)?
        .checked_add_signed(Duration::try_minutes(min)?)?
        .checked_add_signed(Duration::try_seconds(sec)?)
}

fn os_time(l: &mut LuaState) -> LuaResult<usize> {
    if l.is_none_or_nil(1) {
        l.push_number(Utc::now().timestamp() as f64)?;
        return Ok(1);
    }
    l.check_type(1, LuaValueKind::Table)?;
    l.set_top(1);
    let sec = get_field(l, "sec", Some(0))?;
    let min = get_field(l, "min", Some(0))?;
    let hour = get_field(l, "hour", Some(12))?;
    let day = get_field(l, "day", None)?;
    let month = get_field(l, "month", None)? - 1;
    let year = get_field(l, "year", None)?;
    let local = normalize(year, month, day, hour, min, sec)
        .and_then(|ndt| Local.from_local_datetime(&ndt).earliest());
    match local {
        Some(dt) => {
            // update fields with normalized values
            DateFields::from_datetime(&dt).set_all_fields(l)?;
            l.push_number(dt.timestamp() as f64)?;
        }
        None => l.push_nil()?,
    }
    Ok(1)
}

fn os_difftime(l: &mut LuaState) -> LuaResult<usize> {
    let t1 = l.check_number(1)?;
    let t2 = l.opt_number(2, 0.0)?;
    l.push_number(t1 - t2)?;
    Ok(1)
}

fn os_execute(l: &mut LuaState) -> LuaResult<usize> {
    use std::process::Command;

    if l.is_none_or_nil(1) {
        // a shell is available
        l.push_boolean(true)?;
        return Ok(1);
    }
    let cmd = l.check_lstring(1)?.to_str_lossy().into_owned();
    let status = Command::new("sh").arg("-c").arg(&cmd).status();
    match status {
        Ok(status) => {
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                if let Some(sig) = status.signal() {
                    l.push_nil()?;
                    l.push_string("signal")?;
                    l.push_integer(sig as i64)?;
                    return Ok(3);
                }
            }
            let code = status.code().unwrap_or(-1);
            if code == 0 {
                l.push_boolean(true)?;
            } else {
                l.push_nil()?;
            }
            l.push_string("exit")?;
            l.push_integer(code as i64)?;
            Ok(3)
        }
        Err(e) => file_result(l, Err(e), None),
    }
}

fn os_exit(l: &mut LuaState) -> LuaResult<usize> {
    let status = match l.value_at(1).as_boolean() {
        Some(b) => {
            if b {
                0
            } else {
                1
            }
        }
        None => l.opt_integer(1, 0)? as i32,
    };
    tracing::debug!(status, "os.exit");
    std::process::exit(status);
}

fn os_getenv(l: &mut LuaState) -> LuaResult<usize> {
    let name = l.check_lstring(1)?;
    match std::env::var_os(&*name.to_str_lossy()) {
        Some(value) => l.push_string(value.to_string_lossy().into_owned())?,
        None => l.push_nil()?,
    }
    Ok(1)
}

fn os_remove(l: &mut LuaState) -> LuaResult<usize> {
    let filename = l.check_lstring(1)?.to_str_lossy().into_owned();
    let path = std::path::Path::new(&filename);
    let result = if path.is_dir() { std::fs::remove_dir(path) } else { std::fs::remove_file(path) };
    file_result(l, result, Some(&filename))
}

fn os_rename(l: &mut LuaState) -> LuaResult<usize> {
    let from = l.check_lstring(1)?.to_str_lossy().into_owned();
    let to = l.check_lstring(2)?.to_str_lossy().into_owned();
    let result = std::fs::rename(&from, &to);
    file_result(l, result, Some(&from))
}

/// Only the "C" locale is available
fn os_setlocale(l: &mut LuaState) -> LuaResult<usize> {
    const CATEGORIES: [&str; 6] = ["all", "collate", "ctype", "monetary", "numeric", "time"];
    let locale = if l.is_none_or_nil(1) { None } else { Some(l.check_lstring(1)?) };
    l.check_option(2, Some("all"), &CATEGORIES)?;
    match locale {
        None => l.push_string("C")?,
        Some(name) if matches!(name.as_bytes(), b"" | b"C" | b"POSIX") => l.push_string("C")?,
        Some(_) => l.push_nil()?,
    }
    Ok(1)
}

fn os_tmpname(l: &mut LuaState) -> LuaResult<usize> {
    use rand::Rng;

    let dir = std::env::temp_dir();
    for _ in 0..100 {
        let suffix: u32 = rand::thread_rng().r#gen();
        let path = dir.join(format!("lua_{:06x}", suffix & 0xff_ffff));
        if std::fs::OpenOptions::new().write(true).create_new(true).open(&path).is_ok() {
            l.push_string(path.to_string_lossy().into_owned())?;
            return Ok(1);
        }
    }
    Err(l.error("unable to generate a unique filename"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua_vm::{LuaVM, SafeOption};

    #[test]
    fn test_check_option() {
        assert_eq!(check_option(b"Y"), Some(1));
        assert_eq!(check_option(b"Ey"), Some(2));
        assert_eq!(check_option(b"Od"), Some(2));
        assert_eq!(check_option(b"Ez"), None);
        assert_eq!(check_option(b"q"), None);
        assert_eq!(check_option(b""), None);
    }

    #[test]
    fn test_normalize() {
        let a = normalize(2000, 0, 32, 12, 0, 0).unwrap();
        let b = normalize(2000, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(a, b);
        let c = normalize(2000, 12, 1, 0, -1, 0).unwrap();
        assert_eq!(c, NaiveDate::from_ymd_opt(2000, 12, 31).unwrap().and_hms_opt(23, 59, 0).unwrap());
    }

    #[test]
    fn test_date_and_time() {
        let mut vm = LuaVM::new(SafeOption::default());
        vm.open_libs();
        let result = vm.execute_string(
            r#"
            assert(os.date("!%Y-%m-%d %H:%M:%S", 0) == "1970-01-01 00:00:00")
            local t = os.date("!*t", 86400 * 365)
            assert(t.year == 1971 and t.month == 1 and t.day == 1 and t.yday == 1)
            assert(t.wday == 6 and t.isdst == false)
            local now = os.time()
            local back = os.time(os.date("*t", now))
            assert(back == now)
            local n = {year = 2000, month = 1, day = 32}
            assert(os.time(n) == os.time({year = 2000, month = 2, day = 1}))
            assert(n.month == 2 and n.day == 1)
            local ok, msg = pcall(os.time, {year = 2000})
            assert(not ok and msg:find("field 'day' missing in date table", 1, true))
            ok, msg = pcall(os.date, "%Ez")
            assert(not ok and msg:find("invalid conversion specifier '%Ez'", 1, true))
            assert(os.difftime(10, 4) == 6)
            assert(type(os.clock()) == "number")
            assert(os.getenv("LUA52_SURELY_UNSET_VARIABLE") == nil)
            assert(os.setlocale() == "C" and os.setlocale("xx_YY") == nil)
            "#,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_file_operations() {
        let mut vm = LuaVM::new(SafeOption::default());
        vm.open_libs();
        let result = vm.execute_string(
            r#"
            local name = os.tmpname()
            local renamed = name .. ".moved"
            assert(os.rename(name, renamed) == true)
            assert(os.remove(renamed) == true)
            local ok, msg = os.remove(renamed)
            assert(ok == nil and msg:find(renamed, 1, true))
            "#,
        );
        assert!(result.is_ok());
    }
}
