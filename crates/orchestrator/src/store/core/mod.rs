pub(crate) mod context;
pub(crate) mod redis;

pub use context::StoreContext;
pub use redis::RedisStore;
