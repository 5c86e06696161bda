use std::collections::HashMap;
use std::fmt;

/// A named code address. `trace` is an optional source location string
/// carried through from the compiler for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
    pub addr: usize,
    pub trace: Option<String>,
}

impl Label {
    pub fn new(name: &str, addr: usize) -> Label {
        Label {
            name: name.to_string(),
            addr,
            trace: None,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.trace {
            Some(trace) => write!(f, "{}@{}", self.name, trace),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Debug, Default)]
pub struct LabelTable {
    labels: Vec<Label>,
    by_name: HashMap<String, usize>,
    by_addr: HashMap<usize, usize>,
}

impl LabelTable {
    pub fn new() -> LabelTable {
        LabelTable::default()
    }

    /// Registers a label. Later labels win name collisions, which is what
    /// linking a patched image over an older one wants.
    pub fn register(&mut self, label: Label) {
        let idx = self.labels.len();
        self.by_name.insert(label.name.clone(), idx);
        self.by_addr.insert(label.addr, idx);
        self.labels.push(label);
    }

    pub fn get(&self, name: &str) -> Option<&Label> {
        self.by_name.get(name).map(|&idx| &self.labels[idx])
    }

    pub fn at_addr(&self, addr: usize) -> Option<&Label> {
        self.by_addr.get(&addr).map(|&idx| &self.labels[idx])
    }

    /// The label covering `addr`: the nearest label at or before it.
    pub fn covering(&self, addr: usize) -> Option<&Label> {
        self.labels
            .iter()
            .filter(|label| label.addr <= addr)
            .max_by_key(|label| label.addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
