use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::dehydrator::error::Error;
use crate::dehydrator::keys::Keys;
use crate::dehydrator::store::{Batch, Reply, Store};
use crate::dehydrator::store::redis::RedisStore;

const STALE_FLAG: Duration = Duration::from_secs(30);

/// A delay queue kept entirely in a `Store`. Elements pushed with a
/// duration stay invisible until their deadline and are then handed out
/// by `poll`, once.
///
/// Every element id sits in the bucket list of its duration. Buckets are
/// FIFO and duration-homogeneous, so the head of a bucket is always the
/// next element of that bucket to expire.
#[derive(Clone)]
pub struct Dehydrator<S: Store> {
    store: S,
    keys: Keys
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// The id was already dehydrating; nothing was changed.
    AlreadyDehydrating
}

pub struct DehydratorBuilder {
    redis_connection_string: String,
    name: String
}

impl DehydratorBuilder {
    pub fn new(
        redis_connection_string: impl Into<String>,
        name: impl Into<String>
    ) -> Self {
        Self {
            redis_connection_string: redis_connection_string.into(),
            name: name.into()
        }
    }

    pub async fn build(self) -> Result<Dehydrator<RedisStore>, Error> {
        let keys = Keys::new(self.name)?;
        let store = RedisStore::connect(&self.redis_connection_string).await?;

        Ok(Dehydrator { store, keys })
    }
}

impl<S: Store> Dehydrator<S> {
    pub fn new(store: S, name: impl Into<String>) -> Result<Self, Error> {
        Ok(Self {
            store,
            keys: Keys::new(name)?
        })
    }

    pub fn name(&self) -> &str {
        self.keys.name()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Admit `id` for `duration`. An id that is still dehydrating is not
    /// re-admitted, so its deadline and bucket stay as they were.
    pub async fn push(
        &mut self,
        id: &str,
        payload: &[u8],
        duration: Duration
    ) -> Result<Admission, Error> {
        validate_id(id)?;
        let duration_ms = duration_ms(duration)?;
        let now = now_ms();
        let deadline = deadline_ms(now, duration_ms)?;

        let flag = self.keys.dehydrating(id);
        if !self.store.try_set_flag(&flag, now.to_string().into_bytes()).await?
            && !self.reclaim_flag(id, &flag, now).await?
        {
            tracing::debug!(dehydrator = self.name(), id, "already dehydrating, push ignored");
            return Ok(Admission::AlreadyDehydrating);
        }

        let mut batch = Batch::new();
        batch
            .set(&self.keys.durations(), id, duration_ms.to_string())
            .set(&self.keys.payloads(), id, payload)
            .set_if_absent(&self.keys.deadlines(), id, deadline.to_string())
            .append(&self.keys.bucket(duration_ms), id);

        if let Err(e) = self.store.execute(batch).await {
            if let Err(clear) = self.store.clear_flag(&flag).await {
                tracing::warn!(dehydrator = self.name(), id, "failed to release admission flag: {}", clear);
            }
            return Err(e);
        }

        tracing::debug!(dehydrator = self.name(), id, duration_ms, "dehydrating");
        Ok(Admission::Admitted)
    }

    // A flag with no deadline behind it that is older than `STALE_FLAG`
    // belongs to an admission that never completed.
    async fn reclaim_flag(
        &mut self,
        id: &str,
        flag: &str,
        now: u64
    ) -> Result<bool, Error> {
        let mut lookup = Batch::new();
        lookup
            .fetch(flag)
            .get(&self.keys.deadlines(), id);

        let mut replies = self.store.execute(lookup).await?.into_iter();
        // Unreadable flag values count as infinitely old.
        let set_at = next_reply(&mut replies)?.into_int().unwrap_or(Some(0));
        if next_reply(&mut replies)? != Reply::Nil {
            return Ok(false);
        }

        let stale_after = STALE_FLAG.as_millis() as u64;
        match set_at {
            // Released since our attempt.
            None => self.store.try_set_flag(flag, now.to_string().into_bytes()).await,
            Some(set_at) if u64::try_from(set_at).unwrap_or(0).saturating_add(stale_after) > now => Ok(false),
            Some(_) => {
                tracing::warn!(dehydrator = self.name(), id, "reclaiming stale admission flag");
                self.store.clear_flag(flag).await?;
                self.store.try_set_flag(flag, now.to_string().into_bytes()).await
            }
        }
    }

    /// Admit a payload under a fresh V4 UUID and return the id.
    pub async fn push_generated(
        &mut self,
        payload: &[u8],
        duration: Duration
    ) -> Result<String, Error> {
        let id = uuid::Uuid::new_v4().to_string();
        self.push(&id, payload, duration).await?;

        Ok(id)
    }

    /// Remove `id` whether or not its deadline has passed, returning its
    /// payload. `None` if it is not dehydrating, or if a concurrent poll
    /// finalized it first.
    pub async fn pull(
        &mut self,
        id: &str
    ) -> Result<Option<Vec<u8>>, Error> {
        validate_id(id)?;

        let mut lookup = Batch::new();
        lookup
            .get(&self.keys.payloads(), id)
            .get(&self.keys.durations(), id);

        let mut replies = self.store.execute(lookup).await?.into_iter();
        let payload = next_reply(&mut replies)?.into_bytes()?;
        let duration_ms = next_reply(&mut replies)?.into_int()?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let mut batch = Batch::new();
        self.finalize(&mut batch, id);
        if let Some(duration_ms) = duration_ms {
            batch.remove(&self.keys.bucket(duration_ms as u64), id);
        }

        let removed = self.store.execute(batch).await?;
        let owned = removed
            .into_iter()
            .next()
            .map(Reply::into_bool)
            .transpose()?
            .unwrap_or(false);

        if !owned {
            tracing::debug!(dehydrator = self.name(), id, "finalized concurrently, pull yields nothing");
            return Ok(None);
        }

        Ok(Some(payload))
    }

    /// Hand out every element whose deadline has passed, each exactly once
    /// across concurrent pollers.
    ///
    /// Each round pops the head of every active bucket in one batch. An
    /// expired head is finalized and its bucket scanned again next round;
    /// an unexpired head goes back to the front of its bucket, and since
    /// nothing behind it can be due earlier the bucket is done.
    ///
    /// If a round fails after its pops, the popped heads are pushed back.
    /// Elements finalized by earlier rounds are still returned; an error is
    /// only surfaced when nothing was delivered.
    pub async fn poll(&mut self) -> Result<Vec<Vec<u8>>, Error> {
        let mut active = self.store.keys(&self.keys.buckets()).await?;
        let mut expired = vec![];
        let mut rounds = 0;

        while !active.is_empty() {
            rounds += 1;

            let mut pops = Batch::new();
            for bucket in active.iter() {
                pops.pop_front(bucket);
            }

            let popped = match self.store.execute(pops).await {
                Ok(popped) => popped,
                Err(e) if expired.is_empty() => return Err(e),
                Err(e) => {
                    tracing::warn!(dehydrator = self.name(), delivered = expired.len(), "poll cut short: {}", e);
                    break;
                }
            };

            let mut heads = vec![];
            for (bucket, reply) in active.into_iter().zip(popped) {
                match reply.into_string() {
                    Ok(Some(id)) => heads.push((bucket, id)),
                    Ok(None) => (),
                    Err(e) => tracing::warn!(dehydrator = self.name(), bucket = %bucket, "dropping unreadable bucket entry: {}", e)
                }
            }

            if heads.is_empty() {
                break;
            }

            match self.settle(&heads).await {
                Ok((mut due, next)) => {
                    expired.append(&mut due);
                    active = next;
                }
                Err(e) => {
                    self.restore(&heads).await;
                    if expired.is_empty() {
                        return Err(e);
                    }
                    tracing::warn!(dehydrator = self.name(), delivered = expired.len(), "poll cut short: {}", e);
                    break;
                }
            }
        }

        tracing::debug!(dehydrator = self.name(), rounds, expired = expired.len(), "polled");
        Ok(expired)
    }

    // Decide every popped head of one round: finalize, requeue or discard.
    // Returns the delivered payloads and the buckets worth another round.
    async fn settle(
        &mut self,
        heads: &[(String, String)]
    ) -> Result<(Vec<Vec<u8>>, Vec<String>), Error> {
        let mut lookup = Batch::new();
        for (_, id) in heads.iter() {
            lookup
                .get(&self.keys.deadlines(), id)
                .get(&self.keys.payloads(), id);
        }
        let mut found = self.store.execute(lookup).await?.into_iter();

        let now = now_ms();
        let mut decisions = Batch::new();
        let mut finalized = vec![];
        let mut next = vec![];

        for (bucket, id) in heads.iter() {
            let deadline = next_reply(&mut found)?.into_int();
            let payload = next_reply(&mut found)?.into_bytes();

            match (deadline, payload) {
                (Ok(Some(deadline)), Ok(payload)) if u64::try_from(deadline).unwrap_or(0) <= now => {
                    finalized.push((decisions.len(), payload));
                    self.finalize(&mut decisions, id);
                    next.push(bucket.clone());
                }
                (Ok(Some(_)), Ok(_)) => {
                    decisions.push_front(bucket, id.as_str());
                }
                (Ok(None), _) => {
                    // Pulled while we held it; the pop already dropped it.
                    tracing::debug!(dehydrator = self.name(), id = %id, "orphaned bucket entry discarded");
                    next.push(bucket.clone());
                }
                (Err(e), _) | (_, Err(e)) => {
                    tracing::warn!(dehydrator = self.name(), id = %id, "unreadable element left in place: {}", e);
                    decisions.push_front(bucket, id.as_str());
                }
            }
        }

        let replies = self.store.execute(decisions).await?;
        let mut due = vec![];
        for (at, payload) in finalized.into_iter() {
            let owned = replies
                .get(at)
                .and_then(|reply| reply.clone().into_bool().ok())
                .unwrap_or(false);

            if let (true, Some(payload)) = (owned, payload) {
                due.push(payload);
            }
        }

        Ok((due, next))
    }

    // Best effort. A head that was finalized before the failure comes back
    // as an orphaned entry, which the next poll discards.
    async fn restore(&mut self, heads: &[(String, String)]) {
        let mut batch = Batch::new();
        for (bucket, id) in heads.iter() {
            batch.push_front(bucket, id.as_str());
        }

        if let Err(e) = self.store.execute(batch).await {
            tracing::warn!(dehydrator = self.name(), heads = heads.len(), "failed to restore popped heads: {}", e);
        }
    }

    /// Current payload of `id` without touching it.
    pub async fn look(&mut self, id: &str) -> Result<Option<Vec<u8>>, Error> {
        validate_id(id)?;
        self.store.get(&self.keys.payloads(), id).await
    }

    /// Replace the payload of an element that is still dehydrating and
    /// return the previous one. Deadline and bucket are unchanged.
    pub async fn update(
        &mut self,
        id: &str,
        payload: &[u8]
    ) -> Result<Option<Vec<u8>>, Error> {
        validate_id(id)?;

        let mut batch = Batch::new();
        batch.replace(&self.keys.payloads(), id, payload);
        self.store.execute_one(batch).await?.into_bytes()
    }

    pub async fn is_dehydrating(&mut self, id: &str) -> Result<bool, Error> {
        validate_id(id)?;
        self.store.flag_exists(&self.keys.dehydrating(id)).await
    }

    /// Time until the earliest bucket head expires: zero if something is
    /// already due or a bucket needs cleaning, `None` if nothing is
    /// dehydrating.
    pub async fn time_to_next(&mut self) -> Result<Option<Duration>, Error> {
        let buckets = self.store.keys(&self.keys.buckets()).await?;

        let mut heads = Batch::new();
        for bucket in buckets.iter() {
            heads.head(bucket);
        }

        let mut lookup = Batch::new();
        for reply in self.store.execute(heads).await? {
            if let Some(id) = reply.into_string()? {
                lookup.get(&self.keys.deadlines(), &id);
            }
        }

        let now = now_ms();
        let mut earliest: Option<u64> = None;
        for reply in self.store.execute(lookup).await? {
            let remaining = match reply.into_int() {
                Ok(Some(deadline)) => u64::try_from(deadline).unwrap_or(0).saturating_sub(now),
                // An orphaned head, which the next poll clears.
                Ok(None) => 0,
                Err(e) => {
                    tracing::warn!(dehydrator = self.name(), "unreadable deadline ignored: {}", e);
                    continue;
                }
            };
            earliest = Some(earliest.map_or(remaining, |e| e.min(remaining)));
        }

        Ok(earliest.map(Duration::from_millis))
    }

    /// Delete every key of this dehydrator. Other dehydrators sharing the
    /// store are left alone.
    pub async fn clear(&mut self) -> Result<(), Error> {
        let keys = self.store.keys(&self.keys.all()).await?;

        let mut batch = Batch::new();
        for key in keys.iter() {
            batch.del(key);
        }
        self.store.execute(batch).await?;

        tracing::debug!(dehydrator = self.name(), keys = keys.len(), "cleared");
        Ok(())
    }

    // The deadline delete goes first: its reply tells whether this caller
    // is the one that finalized the element.
    fn finalize(&self, batch: &mut Batch, id: &str) {
        batch
            .delete(&self.keys.deadlines(), id)
            .delete(&self.keys.durations(), id)
            .delete(&self.keys.payloads(), id)
            .del(&self.keys.dehydrating(id));
    }
}

fn validate_id(id: &str) -> Result<(), Error> {
    if id.is_empty() {
        return Err(Error::InvalidArgument("element id is empty".to_string()));
    }

    Ok(())
}

fn duration_ms(duration: Duration) -> Result<u64, Error> {
    match u64::try_from(duration.as_millis()) {
        Ok(0) => Err(Error::InvalidArgument(format!("duration {duration:?} is not positive"))),
        Ok(ms) => Ok(ms),
        Err(_) => Err(Error::InvalidArgument(format!("duration {duration:?} is out of range")))
    }
}

// Deadlines are read back as i64.
fn deadline_ms(now: u64, duration_ms: u64) -> Result<u64, Error> {
    now.checked_add(duration_ms)
        .filter(|deadline| *deadline <= i64::MAX as u64)
        .ok_or_else(|| Error::InvalidArgument(format!("a {duration_ms}ms duration puts the deadline out of range")))
}

fn next_reply(replies: &mut impl Iterator<Item = Reply>) -> Result<Reply, Error> {
    replies
        .next()
        .ok_or_else(|| Error::UnexpectedReply("batch returned fewer replies than commands".to_string()))
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
