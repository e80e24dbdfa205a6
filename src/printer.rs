use crate::heap::{Heap, Object};
use crate::symbol::SymbolTable;
use crate::value::Value;

/// Rendering past this nesting depth emits "..." instead of recursing, so
/// cyclic structures built with set-car!/set-cdr! cannot hang the printer.
const MAX_DEPTH: usize = 1000;

/// Cdr chains longer than this are cut off with "..." for the same reason.
const MAX_LENGTH: usize = 100_000;

/// Render a value in read-back-able form: strings quoted and escaped,
/// characters in #\ notation.
pub fn write_value(val: Value, heap: &Heap, symbols: &SymbolTable) -> String {
    let mut out = String::new();
    print_inner(val, heap, symbols, false, &mut out, 0);
    out
}

/// Render a value for humans: strings raw, characters as their literal
/// byte. Differs from `write_value` in nothing else.
pub fn display_value(val: Value, heap: &Heap, symbols: &SymbolTable) -> String {
    let mut out = String::new();
    print_inner(val, heap, symbols, true, &mut out, 0);
    out
}

fn print_inner(
    val: Value,
    heap: &Heap,
    symbols: &SymbolTable,
    human: bool,
    out: &mut String,
    depth: usize,
) {
    if depth > MAX_DEPTH {
        out.push_str("...");
        return;
    }

    match val {
        Value::Nil => out.push_str("()"),
        Value::Bool(b) => out.push_str(if b { "#t" } else { "#f" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::Char(c) => {
            if human {
                out.push(c as char);
            } else {
                match c {
                    b' ' => out.push_str("#\\space"),
                    b'\n' => out.push_str("#\\newline"),
                    _ => {
                        out.push_str("#\\");
                        out.push(c as char);
                    }
                }
            }
        }
        Value::Symbol(id) => out.push_str(symbols.name(id)),
        Value::Str(id) => {
            let bytes = heap.str_bytes(id);
            if human {
                for &b in bytes {
                    out.push(b as char);
                }
            } else {
                out.push('"');
                for &b in bytes {
                    match b {
                        b'"' => out.push_str("\\\""),
                        b'\\' => out.push_str("\\\\"),
                        _ => out.push(b as char),
                    }
                }
                out.push('"');
            }
        }
        Value::Pair(id) => {
            out.push('(');
            print_inner(heap.car(id), heap, symbols, human, out, depth + 1);
            let mut current = heap.cdr(id);
            let mut length = 0;
            loop {
                if length > MAX_LENGTH {
                    out.push_str(" ...");
                    break;
                }
                match current {
                    Value::Nil => break,
                    Value::Pair(next) => {
                        out.push(' ');
                        print_inner(heap.car(next), heap, symbols, human, out, depth + 1);
                        current = heap.cdr(next);
                        length += 1;
                    }
                    tail => {
                        out.push_str(" . ");
                        print_inner(tail, heap, symbols, human, out, depth + 1);
                        break;
                    }
                }
            }
            out.push(')');
        }
        Value::Vector(id) => {
            out.push_str("#(");
            for (i, &elem) in heap.vector_elems(id).iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                print_inner(elem, heap, symbols, human, out, depth + 1);
            }
            out.push(')');
        }
        Value::Procedure(id) => match heap.object(id) {
            Object::Native { name, .. } => {
                out.push_str("#<procedure ");
                out.push_str(name);
                out.push('>');
            }
            _ => out.push_str("#<procedure>"),
        },
        Value::InputPort(id) => {
            out.push_str(&format!("#<input port {}>", id.0));
        }
        Value::OutputPort(id) => {
            out.push_str(&format!("#<output port {}>", id.0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;
    use crate::symbol::SymbolTable;

    #[test]
    fn scalars() {
        let heap = Heap::new();
        let symbols = SymbolTable::new();
        assert_eq!(write_value(Value::Bool(true), &heap, &symbols), "#t");
        assert_eq!(write_value(Value::Bool(false), &heap, &symbols), "#f");
        assert_eq!(write_value(Value::Number(6.0), &heap, &symbols), "6");
        assert_eq!(write_value(Value::Number(1.5), &heap, &symbols), "1.5");
        assert_eq!(write_value(Value::Nil, &heap, &symbols), "()");
    }

    #[test]
    fn characters_write_and_display_differently() {
        let heap = Heap::new();
        let symbols = SymbolTable::new();
        assert_eq!(write_value(Value::Char(b'x'), &heap, &symbols), "#\\x");
        assert_eq!(write_value(Value::Char(b' '), &heap, &symbols), "#\\space");
        assert_eq!(
            write_value(Value::Char(b'\n'), &heap, &symbols),
            "#\\newline"
        );
        assert_eq!(display_value(Value::Char(b'x'), &heap, &symbols), "x");
        assert_eq!(display_value(Value::Char(b' '), &heap, &symbols), " ");
    }

    #[test]
    fn strings_escape_on_write_only() {
        let mut heap = Heap::new();
        let symbols = SymbolTable::new();
        let s = heap.alloc_str(b"a\"b\\c".to_vec());
        assert_eq!(write_value(s, &heap, &symbols), "\"a\\\"b\\\\c\"");
        assert_eq!(display_value(s, &heap, &symbols), "a\"b\\c");
    }

    #[test]
    fn dotted_pairs_and_lists() {
        let mut heap = Heap::new();
        let symbols = SymbolTable::new();
        let dotted = heap.alloc_pair(Value::Number(1.0), Value::Number(2.0));
        assert_eq!(write_value(dotted, &heap, &symbols), "(1 . 2)");

        let list = heap.list(&[Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]);
        assert_eq!(write_value(list, &heap, &symbols), "(1 2 3)");

        let improper = heap.alloc_pair(Value::Number(2.0), Value::Number(3.0));
        let improper = heap.alloc_pair(Value::Number(1.0), improper);
        assert_eq!(write_value(improper, &heap, &symbols), "(1 2 . 3)");
    }

    #[test]
    fn vectors() {
        let mut heap = Heap::new();
        let symbols = SymbolTable::new();
        let v = heap.alloc_vector(vec![Value::Number(1.0), Value::Nil]);
        assert_eq!(write_value(v, &heap, &symbols), "#(1 ())");
    }

    #[test]
    fn cyclic_structures_are_bounded() {
        let mut heap = Heap::new();
        let symbols = SymbolTable::new();
        let cell = heap.alloc_pair(Value::Number(1.0), Value::Nil);
        if let Value::Pair(id) = cell {
            heap.set_cdr(id, cell);
        }
        // Must terminate; the exact cutoff rendering is unimportant.
        let rendered = write_value(cell, &heap, &symbols);
        assert!(rendered.ends_with("...)"));
    }
}
