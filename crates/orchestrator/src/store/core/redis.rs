use anyhow::{Context, Result};
use redis::Client;

#[derive(Clone)]
pub struct RedisStore {
    pub client: Client,
}

impl RedisStore {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .with_context(|| format!("failed to open redis store at {redis_url}"))?;
        Ok(Self { client })
    }

    #[cfg(test)]
    pub fn new_test() -> Self {
        let url = std::env::var("REDIS_TEST_URL")
            .unwrap_or_else(|_| "redis://localhost:6379/15".to_string());
        Self {
            client: Client::open(url).expect("test redis url should parse"),
        }
    }
}
