//! Open-addressing hash table keyed by interned strings.
//!
//! Linear probing over a power-of-two capacity, load factor capped at 3/4.
//! Keys are [`ObjRef`] handles compared by identity, which interning makes
//! equivalent to string equality; callers supply the key's stored FNV hash
//! so the table itself never touches the heap. Deleted slots become
//! tombstones (`key: None, value: true`) that probes walk through and
//! insertions reclaim; a rebuild on growth drops them.

use crate::Value;
use crate::heap::ObjRef;

#[derive(Debug, Clone, Copy)]
pub struct Entry {
    key: Option<ObjRef>,
    hash: u32,
    value: Value,
}

const EMPTY: Entry = Entry {
    key: None,
    hash: 0,
    value: Value::NIL,
};

#[derive(Debug, Default, Clone)]
pub struct Table {
    entries: Vec<Entry>,
    /// Live entries plus tombstones. Tombstones count toward the load
    /// factor so a probe can never cycle through a full table.
    count: usize,
}

impl Table {
    pub fn new() -> Table {
        Table::default()
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Live entries plus tombstones, the figure the load factor is
    /// measured against.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn get(&self, key: ObjRef, hash: u32) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let entry = &self.entries[Self::find_entry(&self.entries, key, hash)];
        entry.key.map(|_| entry.value)
    }

    /// Insert or overwrite. Returns true when the key was not already
    /// present. Filling a tombstone does not bump `count`; the tombstone
    /// was already counted.
    pub fn set(&mut self, key: ObjRef, hash: u32, value: Value) -> bool {
        if (self.count + 1) * 4 > self.entries.len() * 3 {
            self.grow();
        }

        let index = Self::find_entry(&self.entries, key, hash);
        let entry = &mut self.entries[index];
        let is_new = entry.key.is_none();
        if is_new && entry.value.is_nil() {
            self.count += 1;
        }
        *entry = Entry {
            key: Some(key),
            hash,
            value,
        };
        is_new
    }

    /// Remove a key by writing a tombstone. Returns false if the key was
    /// not present.
    pub fn delete(&mut self, key: ObjRef, hash: u32) -> bool {
        if self.count == 0 {
            return false;
        }
        let index = Self::find_entry(&self.entries, key, hash);
        let entry = &mut self.entries[index];
        if entry.key.is_none() {
            return false;
        }
        *entry = Entry {
            key: None,
            hash: 0,
            value: Value::bool(true),
        };
        true
    }

    /// The interning probe: find a live key whose contents equal `chars`,
    /// resolving candidate handles to their text through `resolve`.
    pub fn find_string<'a>(
        &self,
        hash: u32,
        chars: &str,
        resolve: impl Fn(ObjRef) -> &'a str,
    ) -> Option<ObjRef> {
        if self.count == 0 {
            return None;
        }
        let mask = self.entries.len() - 1;
        let mut index = hash as usize & mask;
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None => {
                    // Stop at a truly empty slot; probe through tombstones.
                    if entry.value.is_nil() {
                        return None;
                    }
                }
                Some(key) => {
                    if entry.hash == hash && resolve(key) == chars {
                        return Some(key);
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    /// Live `(key, value)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjRef, Value)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.key.map(|k| (k, e.value)))
    }

    /// Tombstone every entry whose key fails the predicate. Used by the
    /// collector to drop about-to-be-swept keys from the intern table.
    pub fn retain_keys(&mut self, mut keep: impl FnMut(ObjRef) -> bool) {
        for entry in &mut self.entries {
            if let Some(key) = entry.key
                && !keep(key)
            {
                *entry = Entry {
                    key: None,
                    hash: 0,
                    value: Value::bool(true),
                };
            }
        }
    }

    /// Bytes of table storage, for heap accounting.
    pub fn byte_size(&self) -> usize {
        self.entries.len() * size_of::<Entry>()
    }

    /// Probe for `key`, returning the index of its entry, or of the slot an
    /// insertion should use: the first tombstone seen, else the empty slot
    /// that ended the probe.
    fn find_entry(entries: &[Entry], key: ObjRef, hash: u32) -> usize {
        let mask = entries.len() - 1;
        let mut index = hash as usize & mask;
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            match entry.key {
                None => {
                    if entry.value.is_nil() {
                        return tombstone.unwrap_or(index);
                    }
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Some(k) if k == key => return index,
                Some(_) => {}
            }
            index = (index + 1) & mask;
        }
    }

    /// Double the capacity (min 8) and reinsert live entries, dropping
    /// tombstones and recomputing `count`.
    fn grow(&mut self) {
        let capacity = (self.entries.len() * 2).max(8);
        let mut entries = vec![EMPTY; capacity];
        let mut count = 0;
        for entry in &self.entries {
            if let Some(key) = entry.key {
                let index = Self::find_entry(&entries, key, entry.hash);
                entries[index] = *entry;
                count += 1;
            }
        }
        self.entries = entries;
        self.count = count;
    }
}
