use std::fs::File;
use std::io::{BufReader, BufWriter, Write};

use crate::error::{AtomError, AtomResult};
use crate::eval::{FormKind, Interp, NativeFn};
use crate::heap::{Heap, InPort, Object, OutPort};
use crate::printer;
use crate::value::{ObjId, SymbolId, Value};

/// Install the special forms and native procedures into the global frame.
pub fn install(interp: &mut Interp) {
    const FORMS: &[(&str, FormKind)] = &[
        ("quote", FormKind::Quote),
        ("if", FormKind::If),
        ("set!", FormKind::Set),
        ("define", FormKind::Define),
        ("lambda", FormKind::Lambda),
        ("begin", FormKind::Begin),
        ("let", FormKind::Let),
        ("let*", FormKind::LetStar),
        ("cond", FormKind::Cond),
        ("case", FormKind::Case),
        ("and", FormKind::And),
        ("or", FormKind::Or),
        ("quasiquote", FormKind::Quasiquote),
    ];

    for &(name, kind) in FORMS {
        let symbol = interp.symbols.intern(name);
        let value = interp.heap.alloc_form(kind);
        interp.envs.define(interp.global, symbol, value);
    }

    for &(name, f) in NATIVES {
        let symbol = interp.symbols.intern(name);
        let value = interp.heap.alloc_native(name, f);
        interp.envs.define(interp.global, symbol, value);
    }
}

const NATIVES: &[(&str, NativeFn)] = &[
    ("eqv?", eqv_q),
    ("eq?", eq_q),
    ("equal?", equal_q),
    ("number?", number_q),
    ("complex?", always_false),
    ("real?", number_q),
    ("rational?", always_false),
    ("integer?", integer_q),
    ("+", plus),
    ("*", mul),
    ("-", sub),
    ("/", div),
    ("modulo", modulo),
    ("exact?", exact_q),
    ("inexact?", inexact_q),
    ("=", compare_equal),
    ("<", compare_less),
    (">", compare_greater),
    ("<=", compare_less_equal),
    (">=", compare_greater_equal),
    ("zero?", zero_q),
    ("positive?", positive_q),
    ("negative?", negative_q),
    ("odd?", odd_q),
    ("even?", even_q),
    ("min", min),
    ("max", max),
    ("not", not),
    ("boolean?", boolean_q),
    ("pair?", pair_q),
    ("cons", cons),
    ("car", car),
    ("cdr", cdr),
    ("set-car!", set_car_b),
    ("set-cdr!", set_cdr_b),
    ("null?", null_q),
    ("list?", list_q),
    ("list", list),
    ("length", length),
    ("append", append),
    ("char?", char_q),
    ("char->integer", char_to_integer),
    ("integer->char", integer_to_char),
    ("string?", string_q),
    ("make-string", make_string),
    ("string-length", string_length),
    ("string-ref", string_ref),
    ("string-set!", string_set_b),
    ("vector?", vector_q),
    ("make-vector", make_vector),
    ("vector", vector),
    ("vector-length", vector_length),
    ("vector-ref", vector_ref),
    ("vector->list", vector_to_list),
    ("list->vector", list_to_vector),
    ("vector-set!", vector_set_b),
    ("vector-fill!", vector_fill_b),
    ("symbol?", symbol_q),
    ("symbol->string", symbol_to_string),
    ("string->symbol", string_to_symbol),
    ("procedure?", procedure_q),
    ("apply", apply),
    ("close-input-port", close_input_port),
    ("close-output-port", close_output_port),
    ("open-input-file", open_input_file),
    ("open-output-file", open_output_file),
    ("input-port?", input_port_q),
    ("output-port?", output_port_q),
    ("current-input-port", current_input_port),
    ("current-output-port", current_output_port),
    ("write", write),
    ("display", display),
    ("newline", newline),
    ("write-char", write_char),
    ("load", load),
    ("error", error),
];

// ============================================================================
// Positional argument helpers (1-based, like the error messages)
// ============================================================================

fn want(args: &[Value], n: usize) -> AtomResult<Value> {
    args.get(n - 1)
        .copied()
        .ok_or(AtomError::Arity { expected: n })
}

fn opt(args: &[Value], n: usize) -> Option<Value> {
    args.get(n - 1).copied()
}

fn type_err(expected: &'static str, actual: Value) -> AtomError {
    AtomError::Type {
        expected,
        actual: actual.type_name(),
    }
}

fn number_arg(args: &[Value], n: usize) -> AtomResult<f64> {
    match want(args, n)? {
        Value::Number(x) => Ok(x),
        other => Err(type_err("number", other)),
    }
}

fn integer_arg(args: &[Value], n: usize) -> AtomResult<i64> {
    let x = number_arg(args, n)?;
    if x != x.trunc() {
        return Err(AtomError::Domain("Not an integer".to_string()));
    }
    Ok(x as i64)
}

fn char_arg(args: &[Value], n: usize) -> AtomResult<u8> {
    match want(args, n)? {
        Value::Char(c) => Ok(c),
        other => Err(type_err("character", other)),
    }
}

fn symbol_arg(args: &[Value], n: usize) -> AtomResult<SymbolId> {
    match want(args, n)? {
        Value::Symbol(id) => Ok(id),
        other => Err(type_err("symbol", other)),
    }
}

fn pair_arg(args: &[Value], n: usize) -> AtomResult<ObjId> {
    match want(args, n)? {
        Value::Pair(id) => Ok(id),
        other => Err(type_err("pair", other)),
    }
}

fn string_arg(args: &[Value], n: usize) -> AtomResult<ObjId> {
    match want(args, n)? {
        Value::Str(id) => Ok(id),
        other => Err(type_err("string", other)),
    }
}

fn vector_arg(args: &[Value], n: usize) -> AtomResult<ObjId> {
    match want(args, n)? {
        Value::Vector(id) => Ok(id),
        other => Err(type_err("vector", other)),
    }
}

fn string_text(interp: &Interp, id: ObjId) -> String {
    String::from_utf8_lossy(interp.heap.str_bytes(id)).into_owned()
}

// ============================================================================
// Equality
// ============================================================================

/// The shared comparator behind eq?, eqv? and equal?. `recurse_strings`
/// admits content comparison of strings; `recurse_compound` descends into
/// pairs and vectors. Does not terminate on cyclic structures.
pub(crate) fn eq_helper(
    heap: &Heap,
    a: Value,
    b: Value,
    recurse_strings: bool,
    recurse_compound: bool,
) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::Char(x), Value::Char(y)) => x == y,
        (Value::Symbol(x), Value::Symbol(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => {
            x == y || (recurse_strings && heap.str_bytes(x) == heap.str_bytes(y))
        }
        (Value::Pair(x), Value::Pair(y)) => pair_equal(heap, x, y, recurse_compound),
        (Value::Vector(x), Value::Vector(y)) => vector_equal(heap, x, y, recurse_compound),
        (Value::Procedure(x), Value::Procedure(y)) => x == y,
        (Value::InputPort(x), Value::InputPort(y)) => x == y,
        (Value::OutputPort(x), Value::OutputPort(y)) => x == y,
        _ => false,
    }
}

fn pair_equal(heap: &Heap, mut x: ObjId, mut y: ObjId, recursive: bool) -> bool {
    loop {
        if x == y {
            return true;
        }
        if !recursive {
            return false;
        }
        if !eq_helper(heap, heap.car(x), heap.car(y), true, true) {
            return false;
        }
        match (heap.cdr(x), heap.cdr(y)) {
            (Value::Pair(nx), Value::Pair(ny)) => {
                x = nx;
                y = ny;
            }
            (dx, dy) => return eq_helper(heap, dx, dy, true, true),
        }
    }
}

fn vector_equal(heap: &Heap, x: ObjId, y: ObjId, recursive: bool) -> bool {
    if x == y {
        return true;
    }
    if !recursive {
        return false;
    }
    let a = heap.vector_elems(x);
    let b = heap.vector_elems(y);
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .all(|(&ea, &eb)| eq_helper(heap, ea, eb, true, true))
}

fn eqv_q(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let a = want(args, 1)?;
    let b = want(args, 2)?;
    Ok(Value::Bool(eq_helper(&interp.heap, a, b, true, false)))
}

fn eq_q(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let a = want(args, 1)?;
    let b = want(args, 2)?;
    Ok(Value::Bool(eq_helper(&interp.heap, a, b, false, false)))
}

fn equal_q(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let a = want(args, 1)?;
    let b = want(args, 2)?;
    Ok(Value::Bool(eq_helper(&interp.heap, a, b, true, true)))
}

// ============================================================================
// Numbers
// ============================================================================

fn plus(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let mut result = 0.0;
    for n in 1..=args.len() {
        result += number_arg(args, n)?;
    }
    Ok(Value::Number(result))
}

fn mul(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let mut result = 1.0;
    for n in 1..=args.len() {
        result *= number_arg(args, n)?;
    }
    Ok(Value::Number(result))
}

fn sub(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let mut result = number_arg(args, 1)?;
    if args.len() == 1 {
        return Ok(Value::Number(-result));
    }
    for n in 2..=args.len() {
        result -= number_arg(args, n)?;
    }
    Ok(Value::Number(result))
}

fn div(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let mut result = number_arg(args, 1)?;
    if args.len() == 1 {
        return Ok(Value::Number(1.0 / result));
    }
    for n in 2..=args.len() {
        result /= number_arg(args, n)?;
    }
    Ok(Value::Number(result))
}

fn modulo(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let a = number_arg(args, 1)?;
    let b = number_arg(args, 2)?;
    Ok(Value::Number(a % b))
}

fn compare_helper(args: &[Value], compare: fn(f64, f64) -> bool) -> AtomResult<Value> {
    let mut a = number_arg(args, 1)?;
    if args.len() < 2 {
        return Err(AtomError::Arity { expected: 2 });
    }
    for n in 2..=args.len() {
        let b = number_arg(args, n)?;
        if !compare(a, b) {
            return Ok(Value::Bool(false));
        }
        a = b;
    }
    Ok(Value::Bool(true))
}

fn compare_equal(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    compare_helper(args, |a, b| a == b)
}

fn compare_less(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    compare_helper(args, |a, b| a < b)
}

fn compare_greater(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    compare_helper(args, |a, b| a > b)
}

fn compare_less_equal(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    compare_helper(args, |a, b| a <= b)
}

fn compare_greater_equal(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    compare_helper(args, |a, b| a >= b)
}

fn zero_q(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    Ok(Value::Bool(number_arg(args, 1)? == 0.0))
}

fn positive_q(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    Ok(Value::Bool(number_arg(args, 1)? > 0.0))
}

fn negative_q(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    Ok(Value::Bool(number_arg(args, 1)? < 0.0))
}

fn odd_q(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    Ok(Value::Bool(integer_arg(args, 1)? & 1 == 1))
}

fn even_q(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    Ok(Value::Bool(integer_arg(args, 1)? & 1 == 0))
}

fn min_max_helper(args: &[Value], is_min: bool) -> AtomResult<Value> {
    let mut result = number_arg(args, 1)?;
    for n in 2..=args.len() {
        let x = number_arg(args, n)?;
        result = if is_min { result.min(x) } else { result.max(x) };
    }
    Ok(Value::Number(result))
}

fn min(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    min_max_helper(args, true)
}

fn max(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    min_max_helper(args, false)
}

fn number_q(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    Ok(Value::Bool(matches!(want(args, 1)?, Value::Number(_))))
}

fn integer_q(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let x = want(args, 1)?;
    Ok(Value::Bool(matches!(x, Value::Number(n) if n == n.trunc())))
}

/// All numbers are inexact; exactness predicates are stubs over one
/// floating-point type.
fn exact_q(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    number_arg(args, 1)?;
    Ok(Value::Bool(false))
}

fn inexact_q(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    number_arg(args, 1)?;
    Ok(Value::Bool(true))
}

/// Stands in for predicates like complex? that never hold here.
fn always_false(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    want(args, 1)?;
    Ok(Value::Bool(false))
}

// ============================================================================
// Booleans
// ============================================================================

fn not(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    Ok(Value::Bool(!want(args, 1)?.is_truthy()))
}

fn boolean_q(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    Ok(Value::Bool(matches!(want(args, 1)?, Value::Bool(_))))
}

// ============================================================================
// Pairs and lists
// ============================================================================

fn pair_q(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    Ok(Value::Bool(want(args, 1)?.is_pair()))
}

fn cons(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let first = want(args, 1)?;
    let second = want(args, 2)?;
    Ok(interp.heap.alloc_pair(first, second))
}

fn car(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let id = pair_arg(args, 1)?;
    Ok(interp.heap.car(id))
}

fn cdr(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let id = pair_arg(args, 1)?;
    Ok(interp.heap.cdr(id))
}

fn set_car_b(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let id = pair_arg(args, 1)?;
    let obj = want(args, 2)?;
    interp.heap.set_car(id, obj);
    Ok(args[0])
}

fn set_cdr_b(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let id = pair_arg(args, 1)?;
    let obj = want(args, 2)?;
    interp.heap.set_cdr(id, obj);
    Ok(args[0])
}

fn null_q(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    Ok(Value::Bool(want(args, 1)?.is_nil()))
}

fn list_q(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let obj = want(args, 1)?;
    Ok(Value::Bool(interp.heap.is_proper_list(obj)))
}

fn list(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    Ok(interp.heap.list(args))
}

fn length(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let mut count = 0usize;
    let mut current = want(args, 1)?;
    loop {
        match current {
            Value::Nil => return Ok(Value::Number(count as f64)),
            Value::Pair(id) => {
                count += 1;
                current = interp.heap.cdr(id);
            }
            other => return Err(type_err("pair", other)),
        }
    }
}

fn append(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let mut items = Vec::new();
    for &list in args {
        match interp.heap.list_to_vec(list) {
            Some(elems) => items.extend(elems),
            None => return Err(type_err("pair", list)),
        }
    }
    Ok(interp.heap.list(&items))
}

// ============================================================================
// Symbols
// ============================================================================

fn symbol_q(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    Ok(Value::Bool(want(args, 1)?.is_symbol()))
}

fn symbol_to_string(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let id = symbol_arg(args, 1)?;
    let bytes = interp.symbols.name(id).as_bytes().to_vec();
    Ok(interp.heap.alloc_str(bytes))
}

fn string_to_symbol(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let id = string_arg(args, 1)?;
    let name = string_text(interp, id);
    Ok(Value::Symbol(interp.symbols.intern(&name)))
}

// ============================================================================
// Characters
// ============================================================================

fn char_q(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    Ok(Value::Bool(matches!(want(args, 1)?, Value::Char(_))))
}

fn char_to_integer(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    Ok(Value::Number(f64::from(char_arg(args, 1)?)))
}

fn integer_to_char(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let n = integer_arg(args, 1)?;
    if !(0..=255).contains(&n) {
        return Err(AtomError::Domain("character out of range".to_string()));
    }
    Ok(Value::Char(n as u8))
}

// ============================================================================
// Strings
// ============================================================================

fn string_q(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    Ok(Value::Bool(matches!(want(args, 1)?, Value::Str(_))))
}

fn make_string(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let k = integer_arg(args, 1)?;
    if k < 0 {
        return Err(AtomError::Domain(
            "positive integer length required".to_string(),
        ));
    }
    let fill = match opt(args, 2) {
        Some(Value::Char(c)) => c,
        Some(other) => return Err(type_err("character", other)),
        None => 0,
    };
    Ok(interp.heap.alloc_str(vec![fill; k as usize]))
}

fn string_length(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let id = string_arg(args, 1)?;
    Ok(Value::Number(interp.heap.str_bytes(id).len() as f64))
}

fn string_ref(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let id = string_arg(args, 1)?;
    let k = integer_arg(args, 2)?;
    let bytes = interp.heap.str_bytes(id);
    if k < 0 || k as usize >= bytes.len() {
        return Err(AtomError::Domain(
            "k is not a valid index of the given string".to_string(),
        ));
    }
    Ok(Value::Char(bytes[k as usize]))
}

fn string_set_b(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let id = string_arg(args, 1)?;
    let k = integer_arg(args, 2)?;
    let c = char_arg(args, 3)?;
    let bytes = interp.heap.str_bytes_mut(id);
    if k < 0 || k as usize >= bytes.len() {
        return Err(AtomError::Domain("invalid string index".to_string()));
    }
    bytes[k as usize] = c;
    Ok(args[0])
}

// ============================================================================
// Vectors
// ============================================================================

fn vector_q(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    Ok(Value::Bool(matches!(want(args, 1)?, Value::Vector(_))))
}

fn make_vector(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let k = integer_arg(args, 1)?;
    if k < 0 {
        return Err(AtomError::Domain(
            "positive integer length required".to_string(),
        ));
    }
    let fill = opt(args, 2).unwrap_or(Value::Nil);
    Ok(interp.heap.alloc_vector(vec![fill; k as usize]))
}

fn vector(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    Ok(interp.heap.alloc_vector(args.to_vec()))
}

fn vector_length(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let id = vector_arg(args, 1)?;
    Ok(Value::Number(interp.heap.vector_elems(id).len() as f64))
}

fn vector_index(interp: &Interp, id: ObjId, k: i64) -> AtomResult<usize> {
    if k < 0 || k as usize >= interp.heap.vector_elems(id).len() {
        return Err(AtomError::Domain("Invalid vector index".to_string()));
    }
    Ok(k as usize)
}

fn vector_ref(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let id = vector_arg(args, 1)?;
    let k = integer_arg(args, 2)?;
    let k = vector_index(interp, id, k)?;
    Ok(interp.heap.vector_elems(id)[k])
}

fn vector_set_b(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let id = vector_arg(args, 1)?;
    let k = integer_arg(args, 2)?;
    let obj = want(args, 3)?;
    let k = vector_index(interp, id, k)?;
    interp.heap.vector_elems_mut(id)[k] = obj;
    Ok(obj)
}

fn vector_to_list(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let id = vector_arg(args, 1)?;
    let elems = interp.heap.vector_elems(id).to_vec();
    Ok(interp.heap.list(&elems))
}

fn list_to_vector(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let list = want(args, 1)?;
    match interp.heap.list_to_vec(list) {
        Some(elems) => Ok(interp.heap.alloc_vector(elems)),
        None => Err(type_err("pair", list)),
    }
}

fn vector_fill_b(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let id = vector_arg(args, 1)?;
    let fill = want(args, 2)?;
    for slot in interp.heap.vector_elems_mut(id) {
        *slot = fill;
    }
    Ok(fill)
}

// ============================================================================
// Control
// ============================================================================

fn procedure_q(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    Ok(Value::Bool(matches!(want(args, 1)?, Value::Procedure(_))))
}

fn apply(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let proc = want(args, 1)?;
    let list = want(args, 2)?;
    let call_args = match interp.heap.list_to_vec(list) {
        Some(elems) => elems,
        None => return Err(type_err("pair", list)),
    };
    interp.apply_procedure(proc, &call_args)
}

// ============================================================================
// Ports and I/O
// ============================================================================

fn input_port_q(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    Ok(Value::Bool(matches!(want(args, 1)?, Value::InputPort(_))))
}

fn output_port_q(_interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    Ok(Value::Bool(matches!(want(args, 1)?, Value::OutputPort(_))))
}

fn open_input_file(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let id = string_arg(args, 1)?;
    let path = string_text(interp, id);
    let file = File::open(&path)
        .map_err(|_| AtomError::Domain(format!("Error opening file: {}", path)))?;
    Ok(interp.heap.alloc_input(InPort::File(BufReader::new(file))))
}

fn open_output_file(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let id = string_arg(args, 1)?;
    let path = string_text(interp, id);
    let file = File::create(&path)
        .map_err(|_| AtomError::Domain(format!("Error opening file: {}", path)))?;
    Ok(interp.heap.alloc_output(OutPort::File(BufWriter::new(file))))
}

fn close_input_port(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let id = match want(args, 1)? {
        Value::InputPort(id) => id,
        other => return Err(type_err("input port", other)),
    };
    if let Object::Input(port) = interp.heap.object_mut(id) {
        *port = InPort::Closed;
    }
    Ok(Value::Bool(false))
}

fn close_output_port(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let id = match want(args, 1)? {
        Value::OutputPort(id) => id,
        other => return Err(type_err("output port", other)),
    };
    if let Object::Output(port) = interp.heap.object_mut(id) {
        if let OutPort::File(w) = port {
            let _ = w.flush();
        }
        *port = OutPort::Closed;
    }
    Ok(Value::Bool(false))
}

/// The standard streams are externally owned; the ports returned here wrap
/// them without taking ownership, so finalization never closes them.
fn current_input_port(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let _ = args;
    Ok(interp.heap.alloc_input(InPort::Stdin))
}

fn current_output_port(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let _ = args;
    Ok(interp.heap.alloc_output(OutPort::Stdout))
}

/// Resolve the optional port argument at position `n`: absent means the
/// interpreter's current output (the process stdout).
fn output_target(args: &[Value], n: usize) -> AtomResult<Option<ObjId>> {
    match opt(args, n) {
        None => Ok(None),
        Some(Value::OutputPort(id)) => Ok(Some(id)),
        Some(other) => Err(type_err("output port", other)),
    }
}

fn emit(interp: &mut Interp, target: Option<ObjId>, text: &str) -> AtomResult<()> {
    match target {
        None => {
            print!("{}", text);
            Ok(())
        }
        Some(id) => match interp.heap.object_mut(id) {
            Object::Output(OutPort::Stdout) => {
                print!("{}", text);
                Ok(())
            }
            Object::Output(OutPort::File(w)) => w
                .write_all(text.as_bytes())
                .map_err(|e| AtomError::Io(e.to_string())),
            Object::Output(OutPort::Closed) => {
                Err(AtomError::Io("write to closed port".to_string()))
            }
            _ => unreachable!("output port cell expected"),
        },
    }
}

fn write(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let obj = want(args, 1)?;
    let target = output_target(args, 2)?;
    let mut text = printer::write_value(obj, &interp.heap, &interp.symbols);
    text.push('\n');
    emit(interp, target, &text)?;
    Ok(Value::Bool(false))
}

fn display(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let obj = want(args, 1)?;
    let target = output_target(args, 2)?;
    let mut text = printer::display_value(obj, &interp.heap, &interp.symbols);
    text.push('\n');
    emit(interp, target, &text)?;
    Ok(Value::Bool(false))
}

fn newline(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let target = output_target(args, 1)?;
    emit(interp, target, "\n")?;
    Ok(Value::Bool(false))
}

fn write_char(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let c = char_arg(args, 1)?;
    let target = output_target(args, 2)?;
    emit(interp, target, &(c as char).to_string())?;
    Ok(Value::Bool(false))
}

// ============================================================================
// System
// ============================================================================

fn load(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let id = string_arg(args, 1)?;
    let path = string_text(interp, id);
    interp.load_file(&path)?;
    Ok(Value::Bool(true))
}

fn error(interp: &mut Interp, args: &[Value]) -> AtomResult<Value> {
    let message = match want(args, 1)? {
        Value::Str(id) => string_text(interp, id),
        _ => "Error".to_string(),
    };
    Err(AtomError::User(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> String {
        let mut interp = Interp::new();
        let value = interp.eval_str(source).unwrap();
        printer::write_value(value, &interp.heap, &interp.symbols)
    }

    fn run_err(source: &str) -> AtomError {
        let mut interp = Interp::new();
        interp.eval_str(source).unwrap_err()
    }

    #[test]
    fn numeric_predicates() {
        assert_eq!(run("(zero? 0)"), "#t");
        assert_eq!(run("(positive? 3)"), "#t");
        assert_eq!(run("(negative? 3)"), "#f");
        assert_eq!(run("(odd? 3)"), "#t");
        assert_eq!(run("(even? 3)"), "#f");
        assert_eq!(run("(integer? 3)"), "#t");
        assert_eq!(run("(integer? (/ 1 2))"), "#f");
        assert_eq!(run("(number? 'a)"), "#f");
        assert_eq!(run("(exact? 1)"), "#f");
        assert_eq!(run("(inexact? 1)"), "#t");
        assert_eq!(run("(complex? 1)"), "#f");
        assert_eq!(run("(real? 1)"), "#t");
        assert!(matches!(run_err("(odd? (/ 1 2))"), AtomError::Domain(_)));
    }

    #[test]
    fn comparisons_chain() {
        assert_eq!(run("(= 1 1 1)"), "#t");
        assert_eq!(run("(< 1 2 3)"), "#t");
        assert_eq!(run("(< 1 3 2)"), "#f");
        assert_eq!(run("(>= 3 3 2)"), "#t");
        assert!(matches!(run_err("(= 1)"), AtomError::Arity { .. }));
    }

    #[test]
    fn min_max() {
        assert_eq!(run("(min 3 1 2)"), "1");
        assert_eq!(run("(max 3 1 2)"), "3");
    }

    #[test]
    fn equality_ladder() {
        // eq? compares strings by identity only.
        assert_eq!(run("(eq? \"a\" \"a\")"), "#f");
        assert_eq!(run("(eqv? \"a\" \"a\")"), "#t");
        assert_eq!(run("(define s \"a\") (eq? s s)"), "#t");
        // eqv? does not descend into compounds; equal? does.
        assert_eq!(run("(eqv? '(1 2) '(1 2))"), "#f");
        assert_eq!(run("(equal? '(1 2) '(1 2))"), "#t");
        assert_eq!(run("(equal? '(1 (2 3)) '(1 (2 3)))"), "#t");
        assert_eq!(run("(equal? #(1 2) #(1 2))"), "#t");
        assert_eq!(run("(equal? #(1 2) #(1 3))"), "#f");
        assert_eq!(run("(eq? 'a 'a)"), "#t");
        assert_eq!(run("(eq? '() '())"), "#t");
        assert_eq!(run("(equal? 1 1)"), "#t");
    }

    #[test]
    fn list_operations() {
        assert_eq!(run("(list 1 2 3)"), "(1 2 3)");
        assert_eq!(run("(list)"), "()");
        assert_eq!(run("(length '(1 2 3))"), "3");
        assert_eq!(run("(length '())"), "0");
        assert_eq!(run("(append '(1 2) '(3) '() '(4))"), "(1 2 3 4)");
        assert_eq!(run("(append)"), "()");
        assert_eq!(run("(pair? '(1))"), "#t");
        assert_eq!(run("(pair? '())"), "#f");
        assert_eq!(run("(null? '())"), "#t");
        assert_eq!(run("(null? 0)"), "#f");
        assert_eq!(run("(list? '(1 2))"), "#t");
        assert_eq!(run("(list? '())"), "#t");
        assert_eq!(run("(list? '(1 . 2))"), "#f");
        assert_eq!(run("(car '(1 2))"), "1");
        assert_eq!(run("(cdr '(1 2))"), "(2)");
        assert_eq!(
            run("(define p (cons 1 2)) (set-car! p 9) p"),
            "(9 . 2)"
        );
        assert!(matches!(run_err("(car 1)"), AtomError::Type { .. }));
        assert!(matches!(run_err("(length '(1 . 2))"), AtomError::Type { .. }));
    }

    #[test]
    fn symbol_string_conversions() {
        assert_eq!(run("(symbol? 'a)"), "#t");
        assert_eq!(run("(symbol->string 'abc)"), "\"abc\"");
        assert_eq!(run("(string->symbol \"abc\")"), "abc");
        assert_eq!(run("(eq? 'abc (string->symbol \"abc\"))"), "#t");
    }

    #[test]
    fn character_conversions() {
        assert_eq!(run("(char? #\\a)"), "#t");
        assert_eq!(run("(char->integer #\\a)"), "97");
        assert_eq!(run("(integer->char 97)"), "#\\a");
        assert!(matches!(
            run_err("(integer->char 1000)"),
            AtomError::Domain(_)
        ));
    }

    #[test]
    fn string_operations() {
        assert_eq!(run("(string? \"x\")"), "#t");
        assert_eq!(run("(make-string 3 #\\a)"), "\"aaa\"");
        assert_eq!(run("(string-length \"hello\")"), "5");
        assert_eq!(run("(string-ref \"abc\" 1)"), "#\\b");
        assert_eq!(
            run("(define s (make-string 2 #\\a)) (string-set! s 1 #\\b) s"),
            "\"ab\""
        );
        assert!(matches!(
            run_err("(string-ref \"abc\" 3)"),
            AtomError::Domain(_)
        ));
        assert!(matches!(
            run_err("(string-ref \"abc\" (- 1))"),
            AtomError::Domain(_)
        ));
        assert!(matches!(run_err("(make-string (- 2))"), AtomError::Domain(_)));
    }

    #[test]
    fn vector_operations() {
        assert_eq!(run("(vector? #(1))"), "#t");
        assert_eq!(run("(vector 1 2 3)"), "#(1 2 3)");
        assert_eq!(run("(make-vector 2 7)"), "#(7 7)");
        assert_eq!(run("(make-vector 2)"), "#(() ())");
        assert_eq!(run("(vector-length #(1 2 3))"), "3");
        assert_eq!(run("(vector-ref #(1 2 3) 0)"), "1");
        assert_eq!(run("(list->vector '(1 2))"), "#(1 2)");
        assert_eq!(run("(list->vector '())"), "#()");
        assert_eq!(run("(vector->list #(1 2))"), "(1 2)");
        assert_eq!(
            run("(define v (make-vector 3 0)) (vector-fill! v 9) v"),
            "#(9 9 9)"
        );
        assert!(matches!(
            run_err("(vector-ref #(1) 1)"),
            AtomError::Domain(_)
        ));
        assert!(matches!(
            run_err("(vector-set! #(1) 5 0)"),
            AtomError::Domain(_)
        ));
    }

    #[test]
    fn procedure_predicate_covers_all_three_kinds() {
        assert_eq!(run("(procedure? car)"), "#t");
        assert_eq!(run("(procedure? (lambda (x) x))"), "#t");
        assert_eq!(run("(procedure? 'car)"), "#f");
    }

    #[test]
    fn port_predicates_and_current_ports() {
        assert_eq!(run("(input-port? (current-input-port))"), "#t");
        assert_eq!(run("(output-port? (current-output-port))"), "#t");
        assert_eq!(run("(input-port? 5)"), "#f");
        assert_eq!(run("(output-port? (current-input-port))"), "#f");
    }

    #[test]
    fn file_ports_round_trip() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("atom-port-test-{}.txt", std::process::id()));
        let path = path.to_string_lossy().into_owned();

        let mut interp = Interp::new();
        let program = format!(
            "(define out (open-output-file \"{path}\"))\
             (write-char #\\h out) (write-char #\\i out)\
             (close-output-port out)"
        );
        interp.eval_str(&program).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hi");

        let opened = interp
            .eval_str(&format!(
                "(define in (open-input-file \"{path}\")) (close-input-port in) (input-port? in)"
            ))
            .unwrap();
        assert_eq!(opened, Value::Bool(true));

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(
            interp
                .eval_str(&format!("(open-input-file \"{path}\")"))
                .unwrap_err(),
            AtomError::Domain(_)
        ));
    }

    #[test]
    fn load_evaluates_a_file_into_the_global_frame() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("atom-load-test-{}.scm", std::process::id()));
        std::fs::write(&path, "(define loaded-value 42)").unwrap();
        let path = path.to_string_lossy().into_owned();

        let mut interp = Interp::new();
        let result = interp
            .eval_str(&format!("(load \"{path}\") loaded-value"))
            .unwrap();
        assert_eq!(result, Value::Number(42.0));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn user_errors_carry_their_message() {
        match run_err("(error \"custom failure\")") {
            AtomError::User(msg) => assert_eq!(msg, "custom failure"),
            other => panic!("expected user error, got {:?}", other),
        }
        assert!(matches!(run_err("(error 'sym)"), AtomError::User(_)));
    }

    #[test]
    fn round_trip_write_then_parse() {
        // parse(write(d)) == d under equal? for procedure- and port-free
        // data.
        for source in [
            "'(1 2 3)",
            "''x",
            "'(a . 5)",
            "#(1 #(2) \"three\")",
            "'(#t #f #\\a #\\space \"s\\\\t\\\"u\")",
            "'()",
            "12345",
        ] {
            let mut interp = Interp::new();
            let value = interp.eval_str(source).unwrap();
            let written = printer::write_value(value, &interp.heap, &interp.symbols);
            let reparsed = interp.eval_str(&format!("'{}", written)).unwrap();
            assert!(
                eq_helper(&interp.heap, value, reparsed, true, true),
                "round trip failed for {}: wrote {}",
                source,
                written
            );
        }
    }
}
