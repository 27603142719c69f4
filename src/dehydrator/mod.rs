pub mod dehydrator;
pub mod error;
pub mod keys;
pub mod payload;
pub mod store;

pub use dehydrator::{Admission, Dehydrator, DehydratorBuilder};
pub use error::Error;
pub use payload::{Json, Payload};
pub use store::{Batch, Op, Reply, Store};
pub use store::memory::MemoryStore;
pub use store::redis::RedisStore;
