use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::bytecode::symbol::Sym;
use crate::runtime::channel::{Channel, Direction};
use crate::runtime::value::{Ref, Value};

/// Number of input and output channel slots per environment.
pub const CHANNEL_SLOTS: usize = 8;

/// A lexical environment: named bindings plus positional channel slots,
/// chained to a parent.
///
/// Bindings are [`Ref`] cells, so a name captured by two closures is one cell.
/// Name lookup walks the chain, nearest binding wins. Channel slots resolve
/// per index: an unset slot falls through to the parent, a set slot shadows
/// it, so a child can redirect output 0 while inheriting input 0.
///
/// `Env` is a handle; clones share state.
#[derive(Clone)]
pub struct Env {
    state: Rc<RefCell<EnvState>>,
}

struct EnvState {
    parent: Option<Env>,
    bindings: HashMap<Sym, Ref>,
    inputs: [Option<Value>; CHANNEL_SLOTS],
    outputs: [Option<Value>; CHANNEL_SLOTS],
}

impl EnvState {
    fn fresh(parent: Option<Env>) -> EnvState {
        EnvState {
            parent,
            bindings: HashMap::new(),
            inputs: std::array::from_fn(|_| None),
            outputs: std::array::from_fn(|_| None),
        }
    }
}

impl Env {
    /// A parentless environment.
    pub fn root() -> Env {
        Env {
            state: Rc::new(RefCell::new(EnvState::fresh(None))),
        }
    }

    /// A child environment chained to this one.
    pub fn extend(&self) -> Env {
        Env {
            state: Rc::new(RefCell::new(EnvState::fresh(Some(self.clone())))),
        }
    }

    /// A parentless environment holding every binding visible from here,
    /// flattened. Channel slots are not carried over: the unhinged env starts
    /// with no channel plumbing of its own.
    pub fn unhinge(&self) -> Env {
        let flat = Env::root();
        let mut chain = Vec::new();
        let mut cursor = Some(self.clone());
        while let Some(env) = cursor {
            cursor = env.parent();
            chain.push(env);
        }
        // Deepest ancestor first so nearer bindings overwrite farther ones.
        for env in chain.iter().rev() {
            let theirs = env.state.borrow();
            let mut mine = flat.state.borrow_mut();
            for (sym, cell) in &theirs.bindings {
                mine.bindings.insert(*sym, cell.clone());
            }
        }
        flat
    }

    /// Copies the other env's own bindings and own set channel slots into
    /// this env, sharing the cells. The other env's values win on collision.
    /// Returns self for chaining.
    pub fn merge(&self, other: &Env) -> Env {
        if !Rc::ptr_eq(&self.state, &other.state) {
            let mut mine = self.state.borrow_mut();
            let theirs = other.state.borrow();
            for (sym, cell) in &theirs.bindings {
                mine.bindings.insert(*sym, cell.clone());
            }
            for idx in 0..CHANNEL_SLOTS {
                if let Some(value) = &theirs.inputs[idx] {
                    mine.inputs[idx] = Some(value.clone());
                }
                if let Some(value) = &theirs.outputs[idx] {
                    mine.outputs[idx] = Some(value.clone());
                }
            }
        }
        self.clone()
    }

    pub fn parent(&self) -> Option<Env> {
        self.state.borrow().parent.clone()
    }

    /// Creates a fresh cell for `sym` in this env's own bindings, shadowing
    /// any inherited one, and returns the cell.
    pub fn bind(&self, sym: Sym, value: Value) -> Ref {
        let cell = Ref::new(value);
        self.state.borrow_mut().bindings.insert(sym, cell.clone());
        cell
    }

    /// The cell bound to `sym`, searching the chain.
    pub fn lookup_ref(&self, sym: Sym) -> Option<Ref> {
        let state = self.state.borrow();
        if let Some(cell) = state.bindings.get(&sym) {
            return Some(cell.clone());
        }
        let parent = state.parent.clone();
        drop(state);
        parent.and_then(|p| p.lookup_ref(sym))
    }

    pub fn get(&self, sym: Sym) -> Option<Value> {
        self.lookup_ref(sym).map(|cell| cell.get())
    }

    /// Writes through the nearest existing cell for `sym`. Returns false when
    /// no binding exists anywhere in the chain.
    pub fn mutate(&self, sym: Sym, value: Value) -> bool {
        match self.lookup_ref(sym) {
            Some(cell) => {
                cell.set(value);
                true
            }
            None => false,
        }
    }

    pub fn set_input(&self, idx: usize, value: Value) {
        self.state.borrow_mut().inputs[idx] = Some(value);
    }

    pub fn set_output(&self, idx: usize, value: Value) {
        self.state.borrow_mut().outputs[idx] = Some(value);
    }

    /// Effective input for `idx`: this env's slot, or the nearest ancestor's.
    pub fn input(&self, idx: usize) -> Option<Value> {
        let state = self.state.borrow();
        if let Some(value) = &state.inputs[idx] {
            return Some(value.clone());
        }
        let parent = state.parent.clone();
        drop(state);
        parent.and_then(|p| p.input(idx))
    }

    /// Effective output for `idx`: this env's slot, or the nearest ancestor's.
    pub fn output(&self, idx: usize) -> Option<Value> {
        let state = self.state.borrow();
        if let Some(value) = &state.outputs[idx] {
            return Some(value.clone());
        }
        let parent = state.parent.clone();
        drop(state);
        parent.and_then(|p| p.output(idx))
    }

    /// Every set effective input, as (slot, value) pairs.
    pub fn inputs(&self) -> Vec<(usize, Value)> {
        (0..CHANNEL_SLOTS)
            .filter_map(|idx| self.input(idx).map(|value| (idx, value)))
            .collect()
    }

    /// Every set effective output, as (slot, value) pairs.
    pub fn outputs(&self) -> Vec<(usize, Value)> {
        (0..CHANNEL_SLOTS)
            .filter_map(|idx| self.output(idx).map(|value| (idx, value)))
            .collect()
    }

    /// Whether `channel` appears in any slot on the given side, anywhere in
    /// the chain. Identity comparison; used when unwinding close interrupts.
    pub fn has_channel(&self, channel: &Channel, direction: Direction) -> bool {
        let state = self.state.borrow();
        let slots = match direction {
            Direction::Input => &state.inputs,
            Direction::Output => &state.outputs,
        };
        for slot in slots.iter().flatten() {
            if let Value::Channel(other) = slot {
                if other.ptr_eq(channel) {
                    return true;
                }
            }
        }
        let parent = state.parent.clone();
        drop(state);
        parent.is_some_and(|p| p.has_channel(channel, direction))
    }

    pub fn ptr_eq(&self, other: &Env) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

// Shallow by hand: a derived Debug would walk the parent chain and every
// bound closure, and a recursive function bound in its own env is a cycle.
impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Env")
            .field("bindings", &state.bindings.len())
            .field("has_parent", &state.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::symbol::SymbolTable;

    fn syms() -> SymbolTable {
        SymbolTable::new()
    }

    #[test]
    fn test_bind_get_shadow() {
        let mut table = syms();
        let x = table.sym("x");
        let root = Env::root();
        root.bind(x, Value::int(1));
        let child = root.extend();
        assert_eq!(child.get(x).unwrap().to_string(), "1");
        child.bind(x, Value::int(2));
        assert_eq!(child.get(x).unwrap().to_string(), "2");
        assert_eq!(root.get(x).unwrap().to_string(), "1");
    }

    #[test]
    fn test_lookup_ref_shares_cell() {
        let mut table = syms();
        let x = table.sym("x");
        let root = Env::root();
        root.bind(x, Value::int(1));
        let child = root.extend();
        let cell = child.lookup_ref(x).unwrap();
        cell.set(Value::int(9));
        assert_eq!(root.get(x).unwrap().to_string(), "9");
    }

    #[test]
    fn test_mutate_writes_nearest() {
        let mut table = syms();
        let x = table.sym("x");
        let y = table.sym("y");
        let root = Env::root();
        root.bind(x, Value::int(1));
        let child = root.extend();
        assert!(child.mutate(x, Value::int(5)));
        assert_eq!(root.get(x).unwrap().to_string(), "5");
        assert!(!child.mutate(y, Value::int(0)));
    }

    #[test]
    fn test_merge_copies_own_only() {
        let mut table = syms();
        let a = table.sym("a");
        let b = table.sym("b");
        let base = Env::root();
        base.bind(a, Value::int(1));

        let other_root = Env::root();
        other_root.bind(a, Value::int(7));
        let other = other_root.extend();
        other.bind(b, Value::int(2));

        let target = Env::root();
        target.bind(a, Value::int(0));
        target.merge(&other);
        // other's own binding b lands, but a stays: the a=7 binding lives in
        // other's parent and merge only takes own bindings.
        assert_eq!(target.get(b).unwrap().to_string(), "2");
        assert_eq!(target.get(a).unwrap().to_string(), "0");

        // Merged cells are shared, not copied.
        other.mutate(b, Value::int(3));
        assert_eq!(target.get(b).unwrap().to_string(), "3");
    }

    #[test]
    fn test_merge_takes_set_slots() {
        let target = Env::root();
        target.set_input(0, Value::string("old"));
        let other = Env::root();
        other.set_input(0, Value::string("new"));
        other.set_output(2, Value::string("out"));
        target.merge(&other);
        assert_eq!(target.input(0).unwrap().to_string(), "new");
        assert_eq!(target.output(2).unwrap().to_string(), "out");
        assert!(target.output(0).is_none());
    }

    #[test]
    fn test_merge_self_is_noop() {
        let env = Env::root();
        env.set_input(0, Value::int(1));
        let merged = env.merge(&env.clone());
        assert!(merged.ptr_eq(&env));
        assert_eq!(env.input(0).unwrap().to_string(), "1");
    }

    #[test]
    fn test_unhinge_flattens_bindings_drops_slots() {
        let mut table = syms();
        let x = table.sym("x");
        let y = table.sym("y");
        let root = Env::root();
        root.bind(x, Value::int(1));
        root.bind(y, Value::int(2));
        root.set_input(0, Value::string("chan"));
        let child = root.extend();
        child.bind(x, Value::int(10));

        let flat = child.unhinge();
        assert!(flat.parent().is_none());
        assert_eq!(flat.get(x).unwrap().to_string(), "10");
        assert_eq!(flat.get(y).unwrap().to_string(), "2");
        assert!(flat.input(0).is_none());
        assert!(flat.inputs().is_empty());
    }

    #[test]
    fn test_slot_fallthrough_per_index() {
        let root = Env::root();
        root.set_input(0, Value::string("in0"));
        root.set_input(1, Value::string("in1"));
        let child = root.extend();
        child.set_input(1, Value::string("shadowed"));
        assert_eq!(child.input(0).unwrap().to_string(), "in0");
        assert_eq!(child.input(1).unwrap().to_string(), "shadowed");
        assert!(child.input(2).is_none());
        let pairs: Vec<String> = child
            .inputs()
            .into_iter()
            .map(|(idx, v)| format!("{idx}:{v}"))
            .collect();
        assert_eq!(pairs, vec!["0:in0", "1:shadowed"]);
    }
}
