use ::redis::AsyncCommands;

use crate::dehydrator::error::Error;
use crate::dehydrator::store::{Batch, Op, Reply, Store};

/// Redis-backed store. Each batch is sent as one pipeline, so its commands
/// run in order but may interleave with other connections' batches.
#[derive(Clone)]
pub struct RedisStore {
    redis: ::redis::aio::ConnectionManager
}

impl RedisStore {
    pub async fn connect(redis_connection_string: &str) -> Result<Self, Error> {
        let redis = ::redis::Client::open(redis_connection_string)?;
        let redis = ::redis::aio::ConnectionManager::new(redis).await?;

        Ok(Self::new(redis))
    }

    pub fn new(redis: ::redis::aio::ConnectionManager) -> Self {
        Self { redis }
    }

    pub fn connection(&self) -> ::redis::aio::ConnectionManager {
        self.redis.clone()
    }
}

const REPLACE_SCRIPT: &str = r#"
local previous = redis.call('HGET', KEYS[1], ARGV[1])
if previous then
    redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
end
return previous
"#;

fn to_pipeline(batch: Batch) -> ::redis::Pipeline {
    let mut pipe = ::redis::pipe();

    for op in batch.into_ops() {
        match op {
            Op::Set { map, field, value } => pipe.cmd("HSET").arg(map).arg(field).arg(value),
            Op::SetIfAbsent { map, field, value } => pipe.cmd("HSETNX").arg(map).arg(field).arg(value),
            Op::Get { map, field } => pipe.cmd("HGET").arg(map).arg(field),
            Op::Delete { map, field } => pipe.cmd("HDEL").arg(map).arg(field),
            Op::Append { list, value } => pipe.cmd("RPUSH").arg(list).arg(value),
            Op::PopFront { list } => pipe.cmd("LPOP").arg(list),
            Op::PushFront { list, value } => pipe.cmd("LPUSH").arg(list).arg(value),
            Op::Remove { list, value } => pipe.cmd("LREM").arg(list).arg(0).arg(value),
            Op::Head { list } => pipe.cmd("LINDEX").arg(list).arg(0),
            Op::Exists { key } => pipe.cmd("EXISTS").arg(key),
            Op::TrySet { key, value } => pipe.cmd("SET").arg(key).arg(value).arg("NX"),
            Op::Fetch { key } => pipe.cmd("GET").arg(key),
            Op::Replace { map, field, value } => pipe.cmd("EVAL").arg(REPLACE_SCRIPT).arg(1).arg(map).arg(field).arg(value),
            Op::Del { key } => pipe.cmd("DEL").arg(key)
        };
    }

    pipe
}

fn to_reply(value: ::redis::Value) -> Result<Reply, Error> {
    match value {
        ::redis::Value::Nil => Ok(Reply::Nil),
        ::redis::Value::Okay => Ok(Reply::Ok),
        ::redis::Value::Int(i) => Ok(Reply::Int(i)),
        ::redis::Value::Boolean(b) => Ok(Reply::Int(b as i64)),
        ::redis::Value::BulkString(b) => Ok(Reply::Bytes(b)),
        ::redis::Value::SimpleString(s) if s == "OK" => Ok(Reply::Ok),
        ::redis::Value::SimpleString(s) => Ok(Reply::Bytes(s.into_bytes())),
        other => Err(Error::UnexpectedReply(format!("{other:?}")))
    }
}

#[async_trait::async_trait]
impl Store for RedisStore {
    async fn execute(&mut self, batch: Batch) -> Result<Vec<Reply>, Error> {
        if batch.is_empty() {
            return Ok(vec![]);
        }

        let values: Vec<::redis::Value> = to_pipeline(batch)
            .query_async(&mut self.redis)
            .await?;

        values.into_iter().map(to_reply).collect()
    }

    async fn keys(&mut self, pattern: &str) -> Result<Vec<String>, Error> {
        let keys: Vec<String> = self.redis.keys(pattern).await?;
        Ok(keys)
    }
}
