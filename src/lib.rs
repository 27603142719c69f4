pub mod dehydrator;
pub mod poller;

pub use dehydrator::{Admission, Dehydrator, DehydratorBuilder};
pub use dehydrator::{Batch, Op, Reply, Store};
pub use dehydrator::{MemoryStore, RedisStore};
pub use dehydrator::error::Error;
pub use dehydrator::payload::{Json, Payload};
pub use poller::{Poller, Sink};
pub use poller::sink::{Forward, Publish};
