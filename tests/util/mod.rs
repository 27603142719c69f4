use dehydrator::{Dehydrator, DehydratorBuilder, RedisStore};
use rand::Rng;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::redis::Redis;

/// Starts a throwaway Redis and hands `f` its connection string.
pub async fn with_redis<F: Fn(String) -> Fut, Fut: Future<Output = ()>>(f: F) {
    let rd = Redis::default().with_tag("alpine").start().await.unwrap();
    tokio::time::sleep(tokio::time::Duration::from_millis(250)).await;
    let rd_port = rd.get_host_port_ipv4(6379).await.unwrap();
    let rd_url = format!("redis://127.0.0.1:{rd_port}");

    f(rd_url).await;
}

pub fn random_name() -> String {
    rand::rng()
        .sample_iter(rand::distr::Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

pub async fn create_dehydrator(redis_url: &str) -> Dehydrator<RedisStore> {
    DehydratorBuilder::new(redis_url, random_name())
        .build()
        .await
        .unwrap()
}

pub fn strings(payloads: Vec<Vec<u8>>) -> Vec<String> {
    payloads.into_iter().map(|p| String::from_utf8(p).unwrap()).collect()
}
