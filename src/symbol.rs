use crate::value::SymbolId;
use std::collections::HashMap;

/// Interned symbol table. Each unique symbol name maps to a unique
/// SymbolId, so `(eq? 'foo 'foo)` is identity on ids.
pub struct SymbolTable {
    name_to_id: HashMap<String, SymbolId>,
    id_to_name: Vec<String>,
}

/// Symbols the reader and evaluator consult by identity, pre-interned at
/// startup. These must match the order of interning in SymbolTable::new().
pub mod sym {
    use crate::value::SymbolId;

    pub const QUOTE: SymbolId = SymbolId(0);
    pub const QUASIQUOTE: SymbolId = SymbolId(1);
    pub const UNQUOTE: SymbolId = SymbolId(2);
    pub const UNQUOTE_SPLICING: SymbolId = SymbolId(3);
    pub const ELSE: SymbolId = SymbolId(4);
}

impl SymbolTable {
    /// Create a new symbol table with the well-known symbols pre-interned.
    /// The order MUST match the constants in the `sym` module above.
    pub fn new() -> Self {
        let names = ["quote", "quasiquote", "unquote", "unquote-splicing", "else"];

        let mut name_to_id = HashMap::new();
        let mut id_to_name = Vec::new();

        for (i, name) in names.iter().enumerate() {
            let id = SymbolId(i as u32);
            name_to_id.insert(name.to_string(), id);
            id_to_name.push(name.to_string());
        }

        SymbolTable {
            name_to_id,
            id_to_name,
        }
    }

    /// Intern a symbol name. Returns the existing ID if already interned,
    /// or creates a new one.
    pub fn intern(&mut self, name: &str) -> SymbolId {
        if let Some(&id) = self.name_to_id.get(name) {
            return id;
        }
        let id = SymbolId(self.id_to_name.len() as u32);
        self.name_to_id.insert(name.to_string(), id);
        self.id_to_name.push(name.to_string());
        id
    }

    /// Look up a symbol name by its ID.
    pub fn name(&self, id: SymbolId) -> &str {
        &self.id_to_name[id.0 as usize]
    }

    /// Look up a symbol ID by name, without interning.
    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.name_to_id.get(name).copied()
    }

    /// Total number of interned symbols.
    pub fn count(&self) -> usize {
        self.id_to_name.len()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        SymbolTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable() {
        let mut t = SymbolTable::new();
        let a = t.intern("foo");
        let b = t.intern("bar");
        let c = t.intern("foo");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(t.name(a), "foo");
        assert_eq!(t.name(b), "bar");
    }

    #[test]
    fn well_known_symbols_match_their_constants() {
        let t = SymbolTable::new();
        assert_eq!(t.lookup("quote"), Some(sym::QUOTE));
        assert_eq!(t.lookup("quasiquote"), Some(sym::QUASIQUOTE));
        assert_eq!(t.lookup("unquote"), Some(sym::UNQUOTE));
        assert_eq!(t.lookup("unquote-splicing"), Some(sym::UNQUOTE_SPLICING));
        assert_eq!(t.lookup("else"), Some(sym::ELSE));
    }
}
