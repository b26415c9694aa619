use std::collections::{BTreeMap, HashMap, VecDeque};

use parking_lot::Mutex;
use tracing::trace;

use crate::error::Result;

use super::backend::{KvBackend, KvTransaction};

#[derive(Default)]
struct MemoryState {
    hashes: HashMap<String, BTreeMap<String, String>>,
    lists: HashMap<String, VecDeque<String>>,
}

/// Process-local [`KvBackend`].
///
/// Scripts run under a single mutex. Writes are staged while the script runs
/// and applied only when it returns `Ok`, so an aborted script leaves the
/// state untouched.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryBackend {
    fn transaction(
        &self,
        script: &mut dyn FnMut(&mut dyn KvTransaction) -> Result<()>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let staged = {
            let mut txn = MemoryTxn::new(&state);
            script(&mut txn)?;
            txn.staged
        };
        trace!(
            hashes = staged.hashes.len(),
            lists = staged.lists.len(),
            "cache.memory.commit"
        );
        staged.apply(&mut state);
        Ok(())
    }
}

#[derive(Default)]
struct Staged {
    // `None` marks a deleted field.
    hashes: HashMap<String, BTreeMap<String, Option<String>>>,
    lists: HashMap<String, StagedList>,
}

#[derive(Default)]
struct StagedList {
    popped: usize,
    pushed: VecDeque<String>,
}

impl Staged {
    fn apply(self, state: &mut MemoryState) {
        for (key, fields) in self.hashes {
            let hash = state.hashes.entry(key.clone()).or_default();
            for (field, value) in fields {
                match value {
                    Some(value) => {
                        hash.insert(field, value);
                    }
                    None => {
                        hash.remove(&field);
                    }
                }
            }
            if hash.is_empty() {
                state.hashes.remove(&key);
            }
        }
        for (name, staged) in self.lists {
            let list = state.lists.entry(name.clone()).or_default();
            list.drain(..staged.popped.min(list.len()));
            list.extend(staged.pushed);
            if list.is_empty() {
                state.lists.remove(&name);
            }
        }
    }
}

struct MemoryTxn<'a> {
    base: &'a MemoryState,
    staged: Staged,
}

impl<'a> MemoryTxn<'a> {
    fn new(base: &'a MemoryState) -> Self {
        Self {
            base,
            staged: Staged::default(),
        }
    }

    fn base_list_len(&self, list: &str) -> usize {
        self.base.lists.get(list).map_or(0, VecDeque::len)
    }
}

impl KvTransaction for MemoryTxn<'_> {
    fn hget(&mut self, key: &str, field: &str) -> Result<Option<String>> {
        if let Some(value) = self.staged.hashes.get(key).and_then(|h| h.get(field)) {
            return Ok(value.clone());
        }
        Ok(self
            .base
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field))
            .cloned())
    }

    fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<()> {
        self.staged
            .hashes
            .entry(key.to_owned())
            .or_default()
            .insert(field.to_owned(), Some(value.to_owned()));
        Ok(())
    }

    fn hdel(&mut self, key: &str, field: &str) -> Result<bool> {
        let existed = self.hget(key, field)?.is_some();
        if existed {
            self.staged
                .hashes
                .entry(key.to_owned())
                .or_default()
                .insert(field.to_owned(), None);
        }
        Ok(existed)
    }

    fn hgetall(&mut self, key: &str) -> Result<Vec<(String, String)>> {
        let mut merged = self.base.hashes.get(key).cloned().unwrap_or_default();
        if let Some(staged) = self.staged.hashes.get(key) {
            for (field, value) in staged {
                match value {
                    Some(value) => {
                        merged.insert(field.clone(), value.clone());
                    }
                    None => {
                        merged.remove(field);
                    }
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    fn rpush(&mut self, list: &str, value: &str) -> Result<usize> {
        self.staged
            .lists
            .entry(list.to_owned())
            .or_default()
            .pushed
            .push_back(value.to_owned());
        self.llen(list)
    }

    fn lpop(&mut self, list: &str, count: usize) -> Result<Vec<String>> {
        let base = self.base.lists.get(list);
        let base_len = base.map_or(0, VecDeque::len);
        let staged = self.staged.lists.entry(list.to_owned()).or_default();

        let from_base = count.min(base_len - staged.popped);
        let mut out = Vec::with_capacity(count.min(base_len - staged.popped + staged.pushed.len()));
        if let Some(base) = base {
            out.extend(base.iter().skip(staged.popped).take(from_base).cloned());
        }
        staged.popped += from_base;

        let from_pushed = (count - from_base).min(staged.pushed.len());
        out.extend(staged.pushed.drain(..from_pushed));
        Ok(out)
    }

    fn llen(&mut self, list: &str) -> Result<usize> {
        let base_len = self.base_list_len(list);
        Ok(match self.staged.lists.get(list) {
            Some(staged) => base_len - staged.popped + staged.pushed.len(),
            None => base_len,
        })
    }
}
