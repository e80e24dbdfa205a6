use std::fs::File;
use std::io::{BufReader, BufWriter, Write};

use crate::eval::{FormKind, NativeFn};
use crate::value::{EnvId, ObjId, Value};

/// The inner state of an input port. Standard input is externally owned and
/// never closed; file ports own their handle until closed or collected.
pub enum InPort {
    Stdin,
    File(BufReader<File>),
    Closed,
}

/// The inner state of an output port.
pub enum OutPort {
    Stdout,
    File(BufWriter<File>),
    Closed,
}

/// A heap object. Every variant except `Free` is a live cell; `Free` slots
/// are threaded onto the free list.
pub enum Object {
    Free,
    Pair { car: Value, cdr: Value },
    /// Owned mutable byte buffer.
    Str(Vec<u8>),
    /// Owned element array; entries reference other cells.
    Vector(Vec<Value>),
    /// A procedure created by `lambda`: formals, body, captured environment.
    Closure {
        formals: Value,
        body: Value,
        env: EnvId,
    },
    /// A built-in with no captured data.
    Native { name: &'static str, f: NativeFn },
    /// A special form marker; bound like a procedure, dispatched by the
    /// evaluator on raw syntax.
    Form(FormKind),
    Input(InPort),
    Output(OutPort),
}

struct Cell {
    obj: Object,
    mark: bool,
}

/// The cell heap. All pairs, strings, vectors, procedures and ports are
/// allocated here; ObjId is an index into `cells`. Cells never move.
pub struct Heap {
    cells: Vec<Cell>,
    free_list: Vec<ObjId>,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            cells: Vec::with_capacity(1024),
            free_list: Vec::new(),
        }
    }

    /// Allocate a fresh cell, reusing a swept slot when one is available.
    pub fn alloc(&mut self, obj: Object) -> ObjId {
        if let Some(id) = self.free_list.pop() {
            let cell = &mut self.cells[id.0 as usize];
            cell.obj = obj;
            cell.mark = false;
            return id;
        }
        let id = ObjId(self.cells.len() as u32);
        self.cells.push(Cell { obj, mark: false });
        id
    }

    pub fn alloc_pair(&mut self, car: Value, cdr: Value) -> Value {
        Value::Pair(self.alloc(Object::Pair { car, cdr }))
    }

    pub fn alloc_str(&mut self, bytes: Vec<u8>) -> Value {
        Value::Str(self.alloc(Object::Str(bytes)))
    }

    pub fn alloc_vector(&mut self, elements: Vec<Value>) -> Value {
        Value::Vector(self.alloc(Object::Vector(elements)))
    }

    pub fn alloc_closure(&mut self, formals: Value, body: Value, env: EnvId) -> Value {
        Value::Procedure(self.alloc(Object::Closure { formals, body, env }))
    }

    pub fn alloc_native(&mut self, name: &'static str, f: NativeFn) -> Value {
        Value::Procedure(self.alloc(Object::Native { name, f }))
    }

    pub fn alloc_form(&mut self, kind: FormKind) -> Value {
        Value::Procedure(self.alloc(Object::Form(kind)))
    }

    pub fn alloc_input(&mut self, port: InPort) -> Value {
        Value::InputPort(self.alloc(Object::Input(port)))
    }

    pub fn alloc_output(&mut self, port: OutPort) -> Value {
        Value::OutputPort(self.alloc(Object::Output(port)))
    }

    pub fn object(&self, id: ObjId) -> &Object {
        &self.cells[id.0 as usize].obj
    }

    pub fn object_mut(&mut self, id: ObjId) -> &mut Object {
        &mut self.cells[id.0 as usize].obj
    }

    /// Get the car of a pair.
    #[inline]
    pub fn car(&self, id: ObjId) -> Value {
        match self.object(id) {
            Object::Pair { car, .. } => *car,
            _ => unreachable!("car of non-pair cell"),
        }
    }

    /// Get the cdr of a pair.
    #[inline]
    pub fn cdr(&self, id: ObjId) -> Value {
        match self.object(id) {
            Object::Pair { cdr, .. } => *cdr,
            _ => unreachable!("cdr of non-pair cell"),
        }
    }

    /// Set the car of a pair (set-car!).
    #[inline]
    pub fn set_car(&mut self, id: ObjId, val: Value) {
        match self.object_mut(id) {
            Object::Pair { car, .. } => *car = val,
            _ => unreachable!("set-car! of non-pair cell"),
        }
    }

    /// Set the cdr of a pair (set-cdr!).
    #[inline]
    pub fn set_cdr(&mut self, id: ObjId, val: Value) {
        match self.object_mut(id) {
            Object::Pair { cdr, .. } => *cdr = val,
            _ => unreachable!("set-cdr! of non-pair cell"),
        }
    }

    pub fn str_bytes(&self, id: ObjId) -> &[u8] {
        match self.object(id) {
            Object::Str(bytes) => bytes,
            _ => unreachable!("string cell expected"),
        }
    }

    pub fn str_bytes_mut(&mut self, id: ObjId) -> &mut Vec<u8> {
        match self.object_mut(id) {
            Object::Str(bytes) => bytes,
            _ => unreachable!("string cell expected"),
        }
    }

    pub fn vector_elems(&self, id: ObjId) -> &[Value] {
        match self.object(id) {
            Object::Vector(elems) => elems,
            _ => unreachable!("vector cell expected"),
        }
    }

    pub fn vector_elems_mut(&mut self, id: ObjId) -> &mut Vec<Value> {
        match self.object_mut(id) {
            Object::Vector(elems) => elems,
            _ => unreachable!("vector cell expected"),
        }
    }

    /// Build a proper list from a slice of values.
    pub fn list(&mut self, values: &[Value]) -> Value {
        self.list_with_tail(values, Value::Nil)
    }

    /// Build a list from a slice of values ending in `tail` (a dotted pair
    /// chain when the tail is not the empty list).
    pub fn list_with_tail(&mut self, values: &[Value], tail: Value) -> Value {
        let mut result = tail;
        for &val in values.iter().rev() {
            result = self.alloc_pair(val, result);
        }
        result
    }

    /// Collect a proper list into a Vec. Returns None if not a proper list.
    pub fn list_to_vec(&self, val: Value) -> Option<Vec<Value>> {
        let mut result = Vec::new();
        let mut current = val;
        loop {
            match current {
                Value::Nil => return Some(result),
                Value::Pair(id) => {
                    result.push(self.car(id));
                    current = self.cdr(id);
                }
                _ => return None,
            }
        }
    }

    /// Returns true if this value is a proper list.
    pub fn is_proper_list(&self, val: Value) -> bool {
        let mut current = val;
        loop {
            match current {
                Value::Nil => return true,
                Value::Pair(id) => current = self.cdr(id),
                _ => return false,
            }
        }
    }

    /// Number of live cells (slots not on the free list).
    pub fn live_count(&self) -> usize {
        self.cells.len() - self.free_list.len()
    }

    // === GC methods ===

    /// Mark a value as reachable. Heap values are added to the worklist the
    /// first time they are seen; the mark bit makes the visit idempotent.
    pub fn mark_value(&mut self, val: Value, worklist: &mut Vec<ObjId>) {
        let id = match val {
            Value::Pair(id)
            | Value::Str(id)
            | Value::Vector(id)
            | Value::Procedure(id)
            | Value::InputPort(id)
            | Value::OutputPort(id) => id,
            _ => return,
        };
        let cell = &mut self.cells[id.0 as usize];
        if !cell.mark {
            cell.mark = true;
            worklist.push(id);
        }
    }

    /// Drain the object worklist, marking children. Captured environments
    /// of closures are pushed onto `env_worklist` for the frame arena to
    /// process.
    pub fn process_worklist(&mut self, worklist: &mut Vec<ObjId>, env_worklist: &mut Vec<EnvId>) {
        while let Some(id) = worklist.pop() {
            match &self.cells[id.0 as usize].obj {
                Object::Pair { car, cdr } => {
                    let (car, cdr) = (*car, *cdr);
                    self.mark_value(car, worklist);
                    self.mark_value(cdr, worklist);
                }
                Object::Vector(elems) => {
                    let elems = elems.clone();
                    for v in elems {
                        self.mark_value(v, worklist);
                    }
                }
                Object::Closure { formals, body, env } => {
                    let (formals, body, env) = (*formals, *body, *env);
                    self.mark_value(formals, worklist);
                    self.mark_value(body, worklist);
                    env_worklist.push(env);
                }
                // Scalars, strings, ports and natives have no references
                // to trace.
                _ => {}
            }
        }
    }

    /// Sweep phase: unmarked cells are finalized and their slots returned
    /// to the free list; marked cells have their bit cleared for the next
    /// cycle. Returns the number of cells collected.
    pub fn sweep(&mut self) -> usize {
        let mut collected = 0;
        for i in 0..self.cells.len() {
            let cell = &mut self.cells[i];
            if cell.mark {
                cell.mark = false;
                continue;
            }
            if matches!(cell.obj, Object::Free) {
                continue;
            }
            // Finalize: flush owned writers before the handle is dropped.
            // Standard-stream ports have nothing of ours to release.
            if let Object::Output(OutPort::File(w)) = &mut cell.obj {
                let _ = w.flush();
            }
            cell.obj = Object::Free;
            collected += 1;
            self.free_list.push(ObjId(i as u32));
        }
        collected
    }
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_round_trips_through_the_heap() {
        let mut heap = Heap::new();
        let list = heap.list(&[Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]);
        assert!(heap.is_proper_list(list));
        let back = heap.list_to_vec(list).unwrap();
        assert_eq!(
            back,
            vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]
        );
    }

    #[test]
    fn dotted_tail_is_not_a_proper_list() {
        let mut heap = Heap::new();
        let pair = heap.alloc_pair(Value::Number(1.0), Value::Number(2.0));
        assert!(!heap.is_proper_list(pair));
        assert_eq!(heap.list_to_vec(pair), None);
    }

    #[test]
    fn sweep_reclaims_unmarked_cells_and_reuses_slots() {
        let mut heap = Heap::new();
        let keep = heap.alloc_pair(Value::Number(1.0), Value::Nil);
        let _lose = heap.alloc_pair(Value::Number(2.0), Value::Nil);
        assert_eq!(heap.live_count(), 2);

        let mut objs = Vec::new();
        let mut envs = Vec::new();
        heap.mark_value(keep, &mut objs);
        heap.process_worklist(&mut objs, &mut envs);
        let collected = heap.sweep();
        assert_eq!(collected, 1);
        assert_eq!(heap.live_count(), 1);

        // The freed slot is recycled before the arena grows.
        let reused = heap.alloc_pair(Value::Number(3.0), Value::Nil);
        assert_eq!(heap.live_count(), 2);
        match (keep, reused) {
            (Value::Pair(a), Value::Pair(b)) => assert_ne!(a, b),
            _ => unreachable!(),
        }
    }

    #[test]
    fn marking_handles_cycles() {
        let mut heap = Heap::new();
        let a = heap.alloc_pair(Value::Number(1.0), Value::Nil);
        let b = heap.alloc_pair(Value::Number(2.0), a);
        if let Value::Pair(aid) = a {
            heap.set_cdr(aid, b);
        }

        let mut objs = Vec::new();
        let mut envs = Vec::new();
        heap.mark_value(a, &mut objs);
        heap.process_worklist(&mut objs, &mut envs);
        assert_eq!(heap.sweep(), 0);
        assert_eq!(heap.live_count(), 2);
    }
}
