// Table library
// Implements: concat, insert, maxn, pack, remove, sort, unpack

use crate::lib_registry::LibraryModule;
use crate::lua_value::LuaValueKind;
use crate::lua_vm::{CompareOp, LuaResult, LuaState};

pub fn create_table_lib() -> LibraryModule {
    crate::lib_module!("table", {
        "concat" => table_concat,
        "insert" => table_insert,
        "maxn" => table_maxn,
        "pack" => table_pack,
        "remove" => table_remove,
        "sort" => table_sort,
        "unpack" => table_unpack,
    })
    .with_initializer(|l| {
        // `unpack` is also a global
        l.get_field(-1, "unpack")?;
        l.set_global("unpack")
    })
}

/// Length of the table argument `n`, honouring `__len`
fn aux_getn(l: &mut LuaState, n: usize) -> LuaResult<i64> {
    l.check_table(n)?;
    l.len_of(n as i32)
}

fn table_insert(l: &mut LuaState) -> LuaResult<usize> {
    // first empty element
    let e = aux_getn(l, 1)? + 1;
    let pos = match l.get_top() {
        2 => e,
        3 => {
            let pos = l.check_integer(2)?;
            l.arg_check(1 <= pos && pos <= e, 2, "position out of bounds")?;
            // move up elements
            for i in (pos + 1..=e).rev() {
                l.raw_get_int(1, i - 1)?;
                l.raw_set_int(1, i)?;
            }
            pos
        }
        _ => return Err(l.error("wrong number of arguments to 'insert'")),
    };
    l.raw_set_int(1, pos)?;
    Ok(0)
}

fn table_remove(l: &mut LuaState) -> LuaResult<usize> {
    let size = aux_getn(l, 1)?;
    let mut pos = l.opt_integer(2, size)?;
    if pos != size {
        l.arg_check(1 <= pos && pos <= size + 1, 1, "position out of bounds")?;
    }
    l.raw_get_int(1, pos)?;
    while pos < size {
        l.raw_get_int(1, pos + 1)?;
        l.raw_set_int(1, pos)?;
        pos += 1;
    }
    l.push_nil()?;
    l.raw_set_int(1, pos)?;
    Ok(1)
}

fn add_field(l: &mut LuaState, out: &mut Vec<u8>, i: i64) -> LuaResult<()> {
    l.raw_get_int(1, i)?;
    if !l.is_string(-1) {
        return Err(l.error(format!("invalid value (at index {}) in table for 'concat'", i)));
    }
    let v = l.pop_value();
    out.extend_from_slice(v.to_plain_string().as_bytes());
    Ok(())
}

fn table_concat(l: &mut LuaState) -> LuaResult<usize> {
    let sep = l.opt_lstring(2, "")?;
    l.check_table(1)?;
    let mut i = l.opt_integer(3, 1)?;
    let last = if l.is_none_or_nil(4) { l.len_of(1)? } else { l.check_integer(4)? };
    let mut out = Vec::new();
    while i < last {
        add_field(l, &mut out, i)?;
        out.extend_from_slice(sep.as_bytes());
        i += 1;
    }
    if i == last {
        add_field(l, &mut out, i)?;
    }
    l.push_string(out)?;
    Ok(1)
}

fn table_maxn(l: &mut LuaState) -> LuaResult<usize> {
    let t = l.check_table(1)?;
    let max = t
        .borrow()
        .iter()
        .filter_map(|(k, _)| k.as_number())
        .fold(0.0, f64::max);
    l.push_number(max)?;
    Ok(1)
}

fn table_pack(l: &mut LuaState) -> LuaResult<usize> {
    let n = l.get_top();
    l.create_table(n, 1)?;
    l.push_integer(n as i64)?;
    l.set_field(-2, "n")?;
    if n > 0 {
        l.push_index(1)?;
        l.raw_set_int(-2, 1)?;
        // the table takes the place of the first argument
        l.replace(1);
        for i in (2..=n as i64).rev() {
            l.raw_set_int(1, i)?;
        }
    }
    Ok(1)
}

fn table_unpack(l: &mut LuaState) -> LuaResult<usize> {
    l.check_table(1)?;
    let i = l.opt_integer(2, 1)?;
    let e = if l.is_none_or_nil(3) { l.len_of(1)? } else { l.check_integer(3)? };
    if i > e {
        return Ok(0);
    }
    let n = e.abs_diff(i).saturating_add(1);
    if n >= i32::MAX as u64 || !l.ensure_stack(n as usize) {
        return Err(l.error("too many results to unpack"));
    }
    for k in i..=e {
        l.raw_get_int(1, k)?;
    }
    Ok(n as usize)
}

// ===== sort =====

/// Is the value at `a` less than the value at `b`? Both are negative
/// indices, valid before the comparator is pushed.
fn sort_comp(l: &mut LuaState, a: i32, b: i32) -> LuaResult<bool> {
    if l.value_at(2).is_nil() {
        return l.compare(a, b, CompareOp::Lt);
    }
    l.push_index(2)?;
    l.push_index(a - 1)?;
    l.push_index(b - 2)?;
    l.call(2, 1)?;
    let res = l.to_boolean(-1);
    l.pop(1);
    Ok(res)
}

/// Pop two values into `t[i]` and `t[j]`
fn set2(l: &mut LuaState, i: i64, j: i64) -> LuaResult<()> {
    l.raw_set_int(1, i)?;
    l.raw_set_int(1, j)
}

fn invalid_order(l: &mut LuaState) -> crate::lua_vm::LuaError {
    l.error("invalid order function for sorting")
}

/// Quicksort of `t[lo..=up]` with median-of-three pivots. Recurses on the
/// smaller half and loops on the larger one.
fn aux_sort(l: &mut LuaState, mut lo: i64, mut up: i64) -> LuaResult<()> {
    while lo < up {
        // sort elements a[lo], a[(lo+up)/2] and a[up]
        l.raw_get_int(1, lo)?;
        l.raw_get_int(1, up)?;
        if sort_comp(l, -1, -2)? {
            set2(l, lo, up)?;
        } else {
            l.pop(2);
        }
        if up - lo == 1 {
            break;
        }
        let mut i = (lo + up) / 2;
        l.raw_get_int(1, i)?;
        l.raw_get_int(1, lo)?;
        if sort_comp(l, -2, -1)? {
            set2(l, i, lo)?;
        } else {
            l.pop(1);
            l.raw_get_int(1, up)?;
            if sort_comp(l, -1, -2)? {
                set2(l, i, up)?;
            } else {
                l.pop(2);
            }
        }
        if up - lo == 2 {
            break;
        }
        // pivot
        l.raw_get_int(1, i)?;
        l.push_index(-1)?;
        l.raw_get_int(1, up - 1)?;
        set2(l, i, up - 1)?;
        // a[lo] <= P == a[up-1] <= a[up]; only lo+1..up-2 is left
        i = lo;
        let mut j = up - 1;
        loop {
            // repeat ++i until a[i] >= P
            loop {
                i += 1;
                l.raw_get_int(1, i)?;
                if !sort_comp(l, -1, -2)? {
                    break;
                }
                if i >= up {
                    return Err(invalid_order(l));
                }
                l.pop(1);
            }
            // repeat --j until a[j] <= P
            loop {
                j -= 1;
                l.raw_get_int(1, j)?;
                if !sort_comp(l, -3, -1)? {
                    break;
                }
                if j <= lo {
                    return Err(invalid_order(l));
                }
                l.pop(1);
            }
            if j < i {
                // pop pivot, a[i] and a[j]
                l.pop(3);
                break;
            }
            set2(l, i, j)?;
        }
        // swap pivot (a[up-1]) with a[i]
        l.raw_get_int(1, up - 1)?;
        l.raw_get_int(1, i)?;
        set2(l, up - 1, i)?;
        // recurse into the smaller half
        let (sub_lo, sub_up);
        if i - lo < up - i {
            sub_lo = lo;
            sub_up = i - 1;
            lo = i + 1;
        } else {
            sub_lo = i + 1;
            sub_up = up;
            up = i - 1;
        }
        aux_sort(l, sub_lo, sub_up)?;
    }
    Ok(())
}

fn table_sort(l: &mut LuaState) -> LuaResult<usize> {
    let n = aux_getn(l, 1)?;
    l.check_stack_msg(40, "")?;
    if !l.is_none_or_nil(2) {
        l.check_type(2, LuaValueKind::Function)?;
    }
    // make sure there are two arguments
    l.set_top(2);
    aux_sort(l, 1, n)?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use crate::lua_vm::{LuaVM, SafeOption};

    #[test]
    fn test_insert_remove() {
        let mut vm = LuaVM::new(SafeOption::default());
        vm.open_libs();
        let result = vm.execute_string(
            r#"
            local t = {1, 2, 3}
            table.insert(t, 4)
            table.insert(t, 1, 0)
            assert(table.concat(t, ",") == "0,1,2,3,4")
            assert(table.remove(t) == 4)
            assert(table.remove(t, 1) == 0)
            assert(table.concat(t, ",") == "1,2,3")
            assert(table.remove({}) == nil)
            local ok, msg = pcall(table.insert, t, 1, 2, 3)
            assert(not ok and msg:find("wrong number of arguments to 'insert'", 1, true))
            ok, msg = pcall(table.insert, t, 10, 1)
            assert(not ok and msg:find("position out of bounds", 1, true))
            "#,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_concat_pack_unpack() {
        let mut vm = LuaVM::new(SafeOption::default());
        vm.open_libs();
        let result = vm.execute_string(
            r##"
            assert(table.concat({1, 2, 3}) == "123")
            assert(table.concat({"a", "b", "c"}, "-", 2, 3) == "b-c")
            assert(table.concat({}, "x") == "")
            local ok, msg = pcall(table.concat, {1, {}, 3})
            assert(not ok and msg:find("invalid value (at index 2) in table for 'concat'", 1, true))
            local p = table.pack(1, nil, 3)
            assert(p.n == 3 and p[1] == 1 and p[2] == nil and p[3] == 3)
            local a, b, c = table.unpack({1, 2, 3})
            assert(a == 1 and b == 2 and c == 3)
            assert(select("#", table.unpack({}, 1, 3)) == 3)
            assert(unpack == table.unpack)
            assert(table.maxn({1, 2, [10] = 5}) == 10)
            "##,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_sort() {
        let mut vm = LuaVM::new(SafeOption::default());
        vm.open_libs();
        let result = vm.execute_string(
            r#"
            local t = {5, 2, 8, 1, 9, 3, 7, 4, 6, 10}
            table.sort(t)
            assert(table.concat(t, " ") == "1 2 3 4 5 6 7 8 9 10")
            table.sort(t, function(a, b) return a > b end)
            assert(table.concat(t, " ") == "10 9 8 7 6 5 4 3 2 1")
            local words = {"pear", "apple", "fig"}
            table.sort(words)
            assert(table.concat(words, ",") == "apple,fig,pear")
            local big = {}
            for i = 1, 500 do big[i] = (i * 7919) % 1000 end
            table.sort(big)
            for i = 2, 500 do assert(big[i - 1] <= big[i]) end
            local ok, msg = pcall(table.sort, {3, 1, 2, 5, 4, 7, 6}, function() return true end)
            assert(not ok and msg:find("invalid order function for sorting", 1, true))
            ok, msg = pcall(table.sort, {1, "x"})
            assert(not ok and msg:find("attempt to compare", 1, true))
            "#,
        );
        assert!(result.is_ok());
    }
}
