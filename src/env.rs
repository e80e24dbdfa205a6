use std::collections::HashMap;

use crate::heap::Heap;
use crate::value::{EnvId, ObjId, SymbolId, Value};

/// One lexical frame: hashed bindings plus a parent link. The parent chain
/// is acyclic and terminates at the root frame.
struct Frame {
    bindings: HashMap<SymbolId, Value>,
    parent: Option<EnvId>,
    mark: bool,
    free: bool,
}

/// Arena of environment frames. Frames are created by `lambda`
/// application, `let`/`let*`, and the interpreter root; they are reclaimed
/// by the collector together with the cells they reference.
pub struct Environments {
    frames: Vec<Frame>,
    free_list: Vec<EnvId>,
}

impl Environments {
    pub fn new() -> Self {
        Environments {
            frames: Vec::with_capacity(64),
            free_list: Vec::new(),
        }
    }

    /// Create a frame with no parent (the interpreter root).
    pub fn new_root(&mut self) -> EnvId {
        self.new_frame(None)
    }

    /// Create a child frame of `parent`.
    pub fn new_child(&mut self, parent: EnvId) -> EnvId {
        self.new_frame(Some(parent))
    }

    fn new_frame(&mut self, parent: Option<EnvId>) -> EnvId {
        if let Some(id) = self.free_list.pop() {
            let frame = &mut self.frames[id.0 as usize];
            frame.bindings.clear();
            frame.parent = parent;
            frame.mark = false;
            frame.free = false;
            return id;
        }
        let id = EnvId(self.frames.len() as u32);
        self.frames.push(Frame {
            bindings: HashMap::new(),
            parent,
            mark: false,
            free: false,
        });
        id
    }

    /// Install or replace a binding in the given frame.
    pub fn define(&mut self, env: EnvId, name: SymbolId, value: Value) {
        self.frames[env.0 as usize].bindings.insert(name, value);
    }

    /// Update the nearest binding of `name`, walking the parent chain.
    /// Returns false if no frame binds it.
    pub fn set(&mut self, env: EnvId, name: SymbolId, value: Value) -> bool {
        let mut current = Some(env);
        while let Some(id) = current {
            let frame = &mut self.frames[id.0 as usize];
            if let Some(slot) = frame.bindings.get_mut(&name) {
                *slot = value;
                return true;
            }
            current = frame.parent;
        }
        false
    }

    /// Look up `name`, walking the parent chain. Returns None if unbound.
    pub fn get(&self, env: EnvId, name: SymbolId) -> Option<Value> {
        let mut current = Some(env);
        while let Some(id) = current {
            let frame = &self.frames[id.0 as usize];
            if let Some(&value) = frame.bindings.get(&name) {
                return Some(value);
            }
            current = frame.parent;
        }
        None
    }

    /// Number of live frames.
    pub fn live_count(&self) -> usize {
        self.frames.len() - self.free_list.len()
    }

    // === GC methods ===

    /// Set the mark bit on a frame. Returns true if it was newly marked.
    pub fn mark(&mut self, env: EnvId) -> bool {
        let frame = &mut self.frames[env.0 as usize];
        if frame.mark {
            false
        } else {
            frame.mark = true;
            true
        }
    }

    /// Drain the frame worklist: mark each candidate frame, feed every
    /// binding's value into the cell worklist, and follow parent links.
    /// Frames that were already marked (closures can share frames) are
    /// skipped, which also terminates on shared parent chains.
    pub fn process_worklist(
        &mut self,
        worklist: &mut Vec<EnvId>,
        obj_worklist: &mut Vec<ObjId>,
        heap: &mut Heap,
    ) {
        while let Some(id) = worklist.pop() {
            if !self.mark(id) {
                continue;
            }
            let parent = {
                let frame = &self.frames[id.0 as usize];
                for &value in frame.bindings.values() {
                    heap.mark_value(value, obj_worklist);
                }
                frame.parent
            };
            if let Some(p) = parent {
                worklist.push(p);
            }
        }
    }

    /// Sweep unmarked frames back onto the free list; clear marks on the
    /// survivors. Returns the number of frames reclaimed.
    pub fn sweep(&mut self) -> usize {
        let mut collected = 0;
        for i in 0..self.frames.len() {
            let frame = &mut self.frames[i];
            if frame.mark {
                frame.mark = false;
                continue;
            }
            if frame.free {
                continue;
            }
            frame.bindings.clear();
            frame.parent = None;
            frame.free = true;
            collected += 1;
            self.free_list.push(EnvId(i as u32));
        }
        collected
    }
}

impl Default for Environments {
    fn default() -> Self {
        Environments::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::SymbolId;

    const X: SymbolId = SymbolId(100);
    const Y: SymbolId = SymbolId(101);

    #[test]
    fn define_then_get() {
        let mut envs = Environments::new();
        let root = envs.new_root();
        envs.define(root, X, Value::Number(1.0));
        assert_eq!(envs.get(root, X), Some(Value::Number(1.0)));
        assert_eq!(envs.get(root, Y), None);
    }

    #[test]
    fn child_frames_shadow_and_fall_back() {
        let mut envs = Environments::new();
        let root = envs.new_root();
        let child = envs.new_child(root);
        envs.define(root, X, Value::Number(1.0));
        envs.define(child, X, Value::Number(2.0));
        assert_eq!(envs.get(child, X), Some(Value::Number(2.0)));
        assert_eq!(envs.get(root, X), Some(Value::Number(1.0)));

        envs.define(root, Y, Value::Bool(true));
        assert_eq!(envs.get(child, Y), Some(Value::Bool(true)));
    }

    #[test]
    fn set_updates_the_nearest_binding() {
        let mut envs = Environments::new();
        let root = envs.new_root();
        let child = envs.new_child(root);
        envs.define(root, X, Value::Number(1.0));

        // x is bound in the parent, so set! through the child updates it.
        assert!(envs.set(child, X, Value::Number(5.0)));
        assert_eq!(envs.get(root, X), Some(Value::Number(5.0)));

        // An unbound name reports failure and changes nothing.
        assert!(!envs.set(child, Y, Value::Number(9.0)));
        assert_eq!(envs.get(child, Y), None);
    }

    #[test]
    fn sweep_reclaims_unmarked_frames() {
        let mut heap = Heap::new();
        let mut envs = Environments::new();
        let root = envs.new_root();
        let _dead = envs.new_child(root);
        envs.define(root, X, Value::Number(1.0));

        let mut env_wl = vec![root];
        let mut obj_wl = Vec::new();
        envs.process_worklist(&mut env_wl, &mut obj_wl, &mut heap);
        assert_eq!(envs.sweep(), 1);
        assert_eq!(envs.live_count(), 1);
        assert_eq!(envs.get(root, X), Some(Value::Number(1.0)));
    }
}
