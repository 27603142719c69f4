pub mod memory;
pub mod redis;

use crate::dehydrator::error::Error;

/// A single store primitive. Hash, list and flag operations follow the
/// semantics of the Redis command named alongside each variant.
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    /// HSET
    Set { map: String, field: String, value: Vec<u8> },
    /// HSETNX
    SetIfAbsent { map: String, field: String, value: Vec<u8> },
    /// HGET
    Get { map: String, field: String },
    /// HDEL
    Delete { map: String, field: String },
    /// RPUSH
    Append { list: String, value: Vec<u8> },
    /// LPOP
    PopFront { list: String },
    /// LPUSH
    PushFront { list: String, value: Vec<u8> },
    /// LREM with count 0
    Remove { list: String, value: Vec<u8> },
    /// LINDEX 0
    Head { list: String },
    /// EXISTS
    Exists { key: String },
    /// SET NX
    TrySet { key: String, value: Vec<u8> },
    /// GET
    Fetch { key: String },
    /// HGET then HSET, only if the field exists, as one atomic step.
    /// Replies with the previous value.
    Replace { map: String, field: String, value: Vec<u8> },
    /// DEL
    Del { key: String }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Nil,
    Ok,
    Int(i64),
    Bytes(Vec<u8>)
}

/// Operations that are sent to the store in one round trip. Replies come
/// back in submission order.
#[derive(Clone, Debug, Default)]
pub struct Batch {
    ops: Vec<Op>
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<Op> {
        self.ops
    }

    pub fn set(&mut self, map: &str, field: &str, value: impl Into<Vec<u8>>) -> &mut Self {
        self.push(Op::Set { map: map.to_string(), field: field.to_string(), value: value.into() })
    }

    pub fn set_if_absent(&mut self, map: &str, field: &str, value: impl Into<Vec<u8>>) -> &mut Self {
        self.push(Op::SetIfAbsent { map: map.to_string(), field: field.to_string(), value: value.into() })
    }

    pub fn get(&mut self, map: &str, field: &str) -> &mut Self {
        self.push(Op::Get { map: map.to_string(), field: field.to_string() })
    }

    pub fn delete(&mut self, map: &str, field: &str) -> &mut Self {
        self.push(Op::Delete { map: map.to_string(), field: field.to_string() })
    }

    pub fn append(&mut self, list: &str, value: impl Into<Vec<u8>>) -> &mut Self {
        self.push(Op::Append { list: list.to_string(), value: value.into() })
    }

    pub fn pop_front(&mut self, list: &str) -> &mut Self {
        self.push(Op::PopFront { list: list.to_string() })
    }

    pub fn push_front(&mut self, list: &str, value: impl Into<Vec<u8>>) -> &mut Self {
        self.push(Op::PushFront { list: list.to_string(), value: value.into() })
    }

    pub fn remove(&mut self, list: &str, value: impl Into<Vec<u8>>) -> &mut Self {
        self.push(Op::Remove { list: list.to_string(), value: value.into() })
    }

    pub fn head(&mut self, list: &str) -> &mut Self {
        self.push(Op::Head { list: list.to_string() })
    }

    pub fn exists(&mut self, key: &str) -> &mut Self {
        self.push(Op::Exists { key: key.to_string() })
    }

    pub fn try_set(&mut self, key: &str, value: impl Into<Vec<u8>>) -> &mut Self {
        self.push(Op::TrySet { key: key.to_string(), value: value.into() })
    }

    pub fn fetch(&mut self, key: &str) -> &mut Self {
        self.push(Op::Fetch { key: key.to_string() })
    }

    pub fn replace(&mut self, map: &str, field: &str, value: impl Into<Vec<u8>>) -> &mut Self {
        self.push(Op::Replace { map: map.to_string(), field: field.to_string(), value: value.into() })
    }

    pub fn del(&mut self, key: &str) -> &mut Self {
        self.push(Op::Del { key: key.to_string() })
    }

    fn push(&mut self, op: Op) -> &mut Self {
        self.ops.push(op);
        self
    }
}

impl Reply {
    pub fn into_bytes(self) -> Result<Option<Vec<u8>>, Error> {
        match self {
            Self::Nil => Ok(None),
            Self::Bytes(b) => Ok(Some(b)),
            other => Err(Error::UnexpectedReply(format!("expected bulk string, got {other:?}")))
        }
    }

    pub fn into_string(self) -> Result<Option<String>, Error> {
        self.into_bytes()?
            .map(|b| String::from_utf8(b).map_err(|e| Error::UnexpectedReply(e.to_string())))
            .transpose()
    }

    /// Integer replies, and bulk strings holding a decimal integer (hash
    /// values written by `Batch::set` come back as bulk strings).
    pub fn into_int(self) -> Result<Option<i64>, Error> {
        match self {
            Self::Nil => Ok(None),
            Self::Int(i) => Ok(Some(i)),
            Self::Bytes(b) => std::str::from_utf8(&b)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .map(Some)
                .ok_or_else(|| Error::UnexpectedReply(format!("expected integer, got {b:?}"))),
            Self::Ok => Err(Error::UnexpectedReply("expected integer, got OK".to_string()))
        }
    }

    /// Truthiness of HSETNX/EXISTS/SET NX style replies.
    pub fn into_bool(self) -> Result<bool, Error> {
        match self {
            Self::Ok => Ok(true),
            Self::Nil => Ok(false),
            Self::Int(i) => Ok(i > 0),
            Self::Bytes(b) => Err(Error::UnexpectedReply(format!("expected flag, got {b:?}")))
        }
    }
}

/// The persistence substrate of a dehydrator. Implementations only need to
/// execute batches and enumerate keys; single-operation helpers are built
/// on top of `execute`.
///
/// Nothing is retried here: a failed round trip surfaces as
/// `Error::StoreUnavailable`.
#[async_trait::async_trait]
pub trait Store: Clone + Send + Sync {
    async fn execute(&mut self, batch: Batch) -> Result<Vec<Reply>, Error>;
    async fn keys(&mut self, pattern: &str) -> Result<Vec<String>, Error>;

    async fn execute_one(&mut self, batch: Batch) -> Result<Reply, Error> {
        self.execute(batch)
            .await?
            .pop()
            .ok_or_else(|| Error::UnexpectedReply("empty reply".to_string()))
    }

    async fn set_if_absent(&mut self, map: &str, field: &str, value: Vec<u8>) -> Result<bool, Error> {
        let mut batch = Batch::new();
        batch.set_if_absent(map, field, value);
        self.execute_one(batch).await?.into_bool()
    }

    async fn set(&mut self, map: &str, field: &str, value: Vec<u8>) -> Result<(), Error> {
        let mut batch = Batch::new();
        batch.set(map, field, value);
        self.execute_one(batch).await.map(|_| ())
    }

    async fn get(&mut self, map: &str, field: &str) -> Result<Option<Vec<u8>>, Error> {
        let mut batch = Batch::new();
        batch.get(map, field);
        self.execute_one(batch).await?.into_bytes()
    }

    async fn delete(&mut self, map: &str, field: &str) -> Result<(), Error> {
        let mut batch = Batch::new();
        batch.delete(map, field);
        self.execute_one(batch).await.map(|_| ())
    }

    async fn append(&mut self, list: &str, id: &str) -> Result<(), Error> {
        let mut batch = Batch::new();
        batch.append(list, id);
        self.execute_one(batch).await.map(|_| ())
    }

    async fn pop_front(&mut self, list: &str) -> Result<Option<String>, Error> {
        let mut batch = Batch::new();
        batch.pop_front(list);
        self.execute_one(batch).await?.into_string()
    }

    async fn push_front(&mut self, list: &str, id: &str) -> Result<(), Error> {
        let mut batch = Batch::new();
        batch.push_front(list, id);
        self.execute_one(batch).await.map(|_| ())
    }

    async fn remove(&mut self, list: &str, id: &str) -> Result<(), Error> {
        let mut batch = Batch::new();
        batch.remove(list, id);
        self.execute_one(batch).await.map(|_| ())
    }

    async fn flag_exists(&mut self, key: &str) -> Result<bool, Error> {
        let mut batch = Batch::new();
        batch.exists(key);
        self.execute_one(batch).await?.into_bool()
    }

    /// True only if the flag did not exist before.
    async fn try_set_flag(&mut self, key: &str, value: Vec<u8>) -> Result<bool, Error> {
        let mut batch = Batch::new();
        batch.try_set(key, value);
        self.execute_one(batch).await?.into_bool()
    }

    async fn clear_flag(&mut self, key: &str) -> Result<(), Error> {
        let mut batch = Batch::new();
        batch.del(key);
        self.execute_one(batch).await.map(|_| ())
    }
}
