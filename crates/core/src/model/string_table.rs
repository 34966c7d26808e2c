use hangscope_protocol::SharedStr;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Interned strings shared by every thread and snapshot of a profile.
///
/// Reads take a shared lock, interning takes the write lock. An index handed
/// out by [`StringTable::intern`] stays valid for the table's lifetime.
#[derive(Debug, Default)]
pub struct StringTable {
    inner: RwLock<Interned>,
}

#[derive(Debug, Default)]
struct Interned {
    strings: Vec<SharedStr>,
    index: FxHashMap<SharedStr, usize>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from a profile's flat string array, preserving indices.
    /// Duplicate entries keep their own index; lookups resolve to the first.
    pub fn from_strings<I, S>(strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SharedStr>,
    {
        let mut interned = Interned::default();
        for s in strings {
            let s = s.into();
            let i = interned.strings.len();
            interned.index.entry(s.clone()).or_insert(i);
            interned.strings.push(s);
        }
        Self {
            inner: RwLock::new(interned),
        }
    }

    pub fn intern(&self, s: &str) -> usize {
        if let Some(&i) = self.inner.read().index.get(s) {
            return i;
        }
        let mut inner = self.inner.write();
        // Another writer may have interned it between the two locks.
        if let Some(&i) = inner.index.get(s) {
            return i;
        }
        let i = inner.strings.len();
        let shared = SharedStr::from(s);
        inner.strings.push(shared.clone());
        inner.index.insert(shared, i);
        i
    }

    /// The string at `index`, or an empty string for an unknown index.
    pub fn get_string(&self, index: usize) -> SharedStr {
        self.inner
            .read()
            .strings
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    pub fn index_of(&self, s: &str) -> Option<usize> {
        self.inner.read().index.get(s).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.read().strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
