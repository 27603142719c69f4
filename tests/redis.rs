mod util;

use std::collections::HashSet;
use std::time::Duration;

use dehydrator::{Admission, Batch, Json, Poller, Publish, RedisStore, Reply, Store};
use tokio_stream::StreamExt;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[tokio::test]
async fn store_replies_match_redis() {
    util::with_redis(|url| async move {
        let mut store = RedisStore::connect(&url).await.unwrap();

        let mut batch = Batch::new();
        batch
            .set_if_absent("m", "a", "1")
            .set_if_absent("m", "a", "2")
            .get("m", "a")
            .append("l", "x")
            .append("l", "y")
            .pop_front("l")
            .head("l")
            .try_set("f", "1")
            .try_set("f", "2")
            .exists("f")
            .fetch("f")
            .replace("m", "a", "3")
            .replace("m", "b", "3")
            .get("m", "a");

        let replies = store.execute(batch).await.unwrap();
        assert_eq!(replies, vec![
            Reply::Int(1),
            Reply::Int(0),
            Reply::Bytes(b"1".to_vec()),
            Reply::Int(1),
            Reply::Int(2),
            Reply::Bytes(b"x".to_vec()),
            Reply::Bytes(b"y".to_vec()),
            Reply::Ok,
            Reply::Nil,
            Reply::Int(1),
            Reply::Bytes(b"1".to_vec()),
            Reply::Bytes(b"1".to_vec()),
            Reply::Nil,
            Reply::Bytes(b"3".to_vec())
        ]);

        let mut keys = store.keys("*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["f", "l", "m"]);
    }).await;
}

#[tokio::test]
async fn hello_world() {
    util::with_redis(|url| async move {
        let mut d = util::create_dehydrator(&url).await;

        d.push("x", b"world", ms(100)).await.unwrap();
        d.push("y", b"goodbye", ms(200)).await.unwrap();
        d.push("z", b"hello", ms(300)).await.unwrap();

        assert_eq!(d.pull("y").await.unwrap(), Some(b"goodbye".to_vec()));
        assert_eq!(d.is_dehydrating("y").await.unwrap(), false);
        assert_eq!(d.is_dehydrating("x").await.unwrap(), true);

        tokio::time::sleep(ms(150)).await;
        let t1 = util::strings(d.poll().await.unwrap());

        tokio::time::sleep(ms(200)).await;
        let t3 = util::strings(d.poll().await.unwrap());

        assert_eq!(t1, vec!["world"]);
        assert_eq!(t3, vec!["hello"]);
    }).await;
}

#[tokio::test]
async fn no_premature_delivery() {
    util::with_redis(|url| async move {
        let mut d = util::create_dehydrator(&url).await;

        d.push("a", b"test_element a", ms(200)).await.unwrap();
        d.push("b", b"test_element b", ms(600)).await.unwrap();
        d.push("c", b"test_element c", ms(1_400)).await.unwrap();
        d.pull("b").await.unwrap();

        assert_eq!(d.poll().await.unwrap().is_empty(), true);

        tokio::time::sleep(ms(300)).await;
        assert_eq!(util::strings(d.poll().await.unwrap()), vec!["test_element a"]);

        tokio::time::sleep(ms(200)).await;
        assert_eq!(d.poll().await.unwrap().is_empty(), true);

        tokio::time::sleep(ms(1_100)).await;
        assert_eq!(util::strings(d.poll().await.unwrap()), vec!["test_element c"]);

        assert_eq!(d.time_to_next().await.unwrap(), None);
    }).await;
}

#[tokio::test]
async fn duplicate_push_keeps_deadline() {
    util::with_redis(|url| async move {
        let mut d = util::create_dehydrator(&url).await;

        assert_eq!(d.push("id", b"p1", ms(200)).await.unwrap(), Admission::Admitted);
        tokio::time::sleep(ms(100)).await;
        assert_eq!(d.push("id", b"p2", ms(200)).await.unwrap(), Admission::AlreadyDehydrating);

        tokio::time::sleep(ms(150)).await;
        assert_eq!(util::strings(d.poll().await.unwrap()), vec!["p1"]);
    }).await;
}

#[tokio::test]
async fn fifo_across_many_buckets() {
    util::with_redis(|url| async move {
        let mut d = util::create_dehydrator(&url).await;

        for bucket in [50, 60, 70] {
            for i in 0..5 {
                let id = format!("{bucket}-{i}");
                d.push(&id, id.as_bytes(), ms(bucket)).await.unwrap();
            }
        }
        d.push("late", b"late", ms(10_000)).await.unwrap();

        tokio::time::sleep(ms(150)).await;
        let polled = util::strings(d.poll().await.unwrap());
        assert_eq!(polled.len(), 15);

        for bucket in [50, 60, 70] {
            let order: Vec<&String> = polled.iter().filter(|p| p.starts_with(&format!("{bucket}-"))).collect();
            let expected: Vec<String> = (0..5).map(|i| format!("{bucket}-{i}")).collect();
            assert_eq!(order, expected.iter().collect::<Vec<&String>>());
        }

        assert_eq!(d.look("late").await.unwrap(), Some(b"late".to_vec()));
    }).await;
}

#[tokio::test]
async fn concurrent_connections_deliver_once() {
    util::with_redis(|url| async move {
        let mut d = util::create_dehydrator(&url).await;
        let name = d.name().to_string();

        for i in 0..100 {
            let id = format!("e{i}");
            d.push(&id, id.as_bytes(), ms(10 + (i % 4) * 10)).await.unwrap();
        }
        tokio::time::sleep(ms(100)).await;

        let mut pollers = vec![];
        for _ in 0..4 {
            let store = RedisStore::connect(&url).await.unwrap();
            let mut poller = dehydrator::Dehydrator::new(store, name.clone()).unwrap();
            pollers.push(tokio::spawn(async move { poller.poll().await.unwrap() }));
        }

        let mut delivered = vec![];
        for poller in pollers {
            delivered.extend(util::strings(poller.await.unwrap()));
        }

        let unique: HashSet<&String> = delivered.iter().collect();
        assert_eq!(delivered.len(), 100);
        assert_eq!(unique.len(), 100);
    }).await;
}

#[tokio::test]
async fn publish_relays_expired_payloads() {
    util::with_redis(|url| async move {
        let mut d = util::create_dehydrator(&url).await;

        let client = redis::Client::open(url.as_str()).unwrap();
        let mut pubsub = client.get_async_pubsub().await.unwrap();
        pubsub.subscribe("rehydrated").await.unwrap();

        let publisher = redis::aio::ConnectionManager::new(client.clone()).await.unwrap();
        let mut poller: Poller<Json<serde_json::Value>, _, _> =
            Poller::new(d.clone(), Publish::new(publisher, "rehydrated"), ms(10));

        d.push("a", br#"{"id":"a"}"#, ms(20)).await.unwrap();
        d.push("b", b"not json", ms(20)).await.unwrap();
        tokio::time::sleep(ms(50)).await;

        assert_eq!(poller.tick().await.unwrap(), 1);

        let mut messages = Box::pin(pubsub.on_message());
        let msg = messages.next().await.unwrap();
        let payload: serde_json::Value = serde_json::from_slice(msg.get_payload_bytes()).unwrap();
        assert_eq!(payload["id"], "a");
    }).await;
}

#[tokio::test]
async fn clear_removes_everything() {
    util::with_redis(|url| async move {
        let mut d = util::create_dehydrator(&url).await;

        d.push("a", b"1", ms(10_000)).await.unwrap();
        d.push("b", b"2", ms(20_000)).await.unwrap();
        d.clear().await.unwrap();

        let mut store = d.store().clone();
        assert_eq!(store.keys(&format!("{}:*", d.name())).await.unwrap().is_empty(), true);
        assert_eq!(d.poll().await.unwrap().is_empty(), true);
        assert_eq!(d.push("a", b"3", ms(10_000)).await.unwrap(), Admission::Admitted);
    }).await;
}
