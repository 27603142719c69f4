use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::dehydrator::error::Error;
use crate::dehydrator::store::{Batch, Op, Reply, Store};

/// In-process store with Redis reply semantics. Clones share state, so a
/// clone behaves like a second connection to the same server. A batch is
/// applied under one lock.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>
}

#[derive(Default)]
struct State {
    hashes: HashMap<String, HashMap<String, Vec<u8>>>,
    lists: HashMap<String, VecDeque<Vec<u8>>>,
    flags: HashMap<String, Vec<u8>>
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl State {
    fn apply(&mut self, op: Op) -> Reply {
        match op {
            Op::Set { map, field, value } => {
                let fresh = self.hashes.entry(map).or_default().insert(field, value).is_none();
                Reply::Int(fresh as i64)
            }
            Op::SetIfAbsent { map, field, value } => {
                let hash = self.hashes.entry(map).or_default();
                if hash.contains_key(&field) {
                    Reply::Int(0)
                } else {
                    hash.insert(field, value);
                    Reply::Int(1)
                }
            }
            Op::Get { map, field } => self.hashes
                .get(&map)
                .and_then(|h| h.get(&field))
                .map(|v| Reply::Bytes(v.clone()))
                .unwrap_or(Reply::Nil),
            Op::Delete { map, field } => {
                let removed = match self.hashes.get_mut(&map) {
                    Some(hash) => hash.remove(&field).is_some(),
                    None => false
                };
                if self.hashes.get(&map).is_some_and(|h| h.is_empty()) {
                    self.hashes.remove(&map);
                }
                Reply::Int(removed as i64)
            }
            Op::Append { list, value } => {
                let l = self.lists.entry(list).or_default();
                l.push_back(value);
                Reply::Int(l.len() as i64)
            }
            Op::PushFront { list, value } => {
                let l = self.lists.entry(list).or_default();
                l.push_front(value);
                Reply::Int(l.len() as i64)
            }
            Op::PopFront { list } => {
                let popped = self.lists.get_mut(&list).and_then(|l| l.pop_front());
                self.drop_if_empty(&list);
                popped.map(Reply::Bytes).unwrap_or(Reply::Nil)
            }
            Op::Remove { list, value } => {
                let removed = match self.lists.get_mut(&list) {
                    Some(l) => {
                        let before = l.len();
                        l.retain(|v| *v != value);
                        before - l.len()
                    }
                    None => 0
                };
                self.drop_if_empty(&list);
                Reply::Int(removed as i64)
            }
            Op::Head { list } => self.lists
                .get(&list)
                .and_then(|l| l.front())
                .map(|v| Reply::Bytes(v.clone()))
                .unwrap_or(Reply::Nil),
            Op::Exists { key } => Reply::Int(self.contains(&key) as i64),
            Op::TrySet { key, value } => {
                if self.contains(&key) {
                    Reply::Nil
                } else {
                    self.flags.insert(key, value);
                    Reply::Ok
                }
            }
            Op::Fetch { key } => self.flags
                .get(&key)
                .map(|v| Reply::Bytes(v.clone()))
                .unwrap_or(Reply::Nil),
            Op::Replace { map, field, value } => match self.hashes.get_mut(&map).and_then(|h| h.get_mut(&field)) {
                Some(current) => Reply::Bytes(std::mem::replace(current, value)),
                None => Reply::Nil
            },
            Op::Del { key } => {
                let removed = self.hashes.remove(&key).is_some()
                    | self.lists.remove(&key).is_some()
                    | self.flags.remove(&key).is_some();
                Reply::Int(removed as i64)
            }
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.hashes.contains_key(key) || self.lists.contains_key(key) || self.flags.contains_key(key)
    }

    // Redis deletes a list once its last element is gone.
    fn drop_if_empty(&mut self, list: &str) {
        if self.lists.get(list).is_some_and(|l| l.is_empty()) {
            self.lists.remove(list);
        }
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn execute(&mut self, batch: Batch) -> Result<Vec<Reply>, Error> {
        let mut state = self.state
            .lock()
            .map_err(|_| Error::UnexpectedReply("memory store lock poisoned".to_string()))?;

        Ok(batch.into_ops().into_iter().map(|op| state.apply(op)).collect())
    }

    async fn keys(&mut self, pattern: &str) -> Result<Vec<String>, Error> {
        let state = self.state
            .lock()
            .map_err(|_| Error::UnexpectedReply("memory store lock poisoned".to_string()))?;

        let keys = state.hashes.keys()
            .chain(state.lists.keys())
            .chain(state.flags.keys())
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();

        Ok(keys)
    }
}

/// Glob matching restricted to `*` wildcards, which is all key
/// enumeration needs.
fn glob_match(pattern: &str, key: &str) -> bool {
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or("");
    let Some(mut rest) = key.strip_prefix(first) else {
        return false;
    };

    let parts: Vec<&str> = parts.collect();
    let Some((last, middle)) = parts.split_last() else {
        return rest.is_empty();
    };

    for part in middle {
        match rest.find(part) {
            Some(at) => rest = &rest[at + part.len()..],
            None => return false
        }
    }

    rest.len() >= last.len() && rest.ends_with(last)
}
