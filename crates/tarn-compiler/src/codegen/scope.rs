//! Local-variable scope and slot allocation

use rustc_hash::FxHashMap;

struct Scope {
    start: u16,
    names: FxHashMap<String, u16>,
}

/// Lexical scope stack mapping names to local slots.
///
/// `push_scope`/`pop_scope` are symmetric: leaving a scope releases its
/// slots for reuse. `max_locals` tracks the high-water mark across the
/// whole body.
pub struct ScopeStack {
    scopes: Vec<Scope>,
    next_slot: u16,
    max_locals: u16,
}

impl ScopeStack {
    pub fn new() -> Self {
        ScopeStack {
            scopes: Vec::new(),
            next_slot: 0,
            max_locals: 0,
        }
    }

    /// Reset for a new method body, reserving `reserved` leading slots
    /// (`this` and parameters)
    pub fn reset(&mut self, reserved: u16) {
        self.scopes.clear();
        self.scopes.push(Scope {
            start: 0,
            names: FxHashMap::default(),
        });
        self.next_slot = reserved;
        self.max_locals = reserved;
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope {
            start: self.next_slot,
            names: FxHashMap::default(),
        });
    }

    pub fn pop_scope(&mut self) {
        if let Some(scope) = self.scopes.pop() {
            self.next_slot = scope.start;
        }
    }

    /// Allocate a slot for a named local in the current scope
    pub fn declare(&mut self, name: impl Into<String>) -> u16 {
        let slot = self.bump();
        if let Some(scope) = self.scopes.last_mut() {
            scope.names.insert(name.into(), slot);
        }
        slot
    }

    /// Bind a name to an already reserved slot (parameters)
    pub fn bind(&mut self, name: impl Into<String>, slot: u16) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.names.insert(name.into(), slot);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<u16> {
        self.scopes
            .iter()
            .rev()
            .find_map(|s| s.names.get(name).copied())
    }

    /// Anonymous slot for intermediate values; release in reverse order
    pub fn acquire_temp(&mut self) -> u16 {
        self.bump()
    }

    pub fn release_temp(&mut self, slot: u16) {
        debug_assert_eq!(slot + 1, self.next_slot);
        self.next_slot = slot;
    }

    pub fn max_locals(&self) -> u16 {
        self.max_locals
    }

    fn bump(&mut self) -> u16 {
        let slot = self.next_slot;
        self.next_slot += 1;
        if self.next_slot > self.max_locals {
            self.max_locals = self.next_slot;
        }
        slot
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        let mut s = ScopeStack::new();
        s.reset(0);
        s
    }
}
