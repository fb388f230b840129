//! Behaviour every `MessageQueue` implementation must show.
//!
//! None of these depend on the passage of time, so they run unchanged against
//! the in-process engine and a real database.

use chrono::{Duration as ChronoDuration, Utc};
use futures::future::join_all;
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use tonga::{ChannelOpts, MessageQueue, SendOpts};

use super::unique;

const LONG_HIDE: Duration = Duration::from_secs(300);

pub async fn fan_out_to_every_subscribed_channel<Q: MessageQueue>(queue: &Q) {
    let topic = unique("orders");
    let billing = unique("billing");
    let shipping = unique("shipping");
    let unrelated = unique("audit");

    queue
        .create_channel(&billing, &topic, ChannelOpts::default())
        .await
        .unwrap();
    queue
        .create_channel(&shipping, &topic, ChannelOpts::default())
        .await
        .unwrap();
    queue
        .create_channel(&unrelated, &unique("other"), ChannelOpts::default())
        .await
        .unwrap();

    let deliveries = queue
        .send_json(&topic, &json!({"order_id": 42}), SendOpts::default())
        .await
        .unwrap();
    assert_eq!(deliveries, 2);

    let from_billing = queue.read(&billing, 10, LONG_HIDE).await.unwrap();
    let from_shipping = queue.read(&shipping, 10, LONG_HIDE).await.unwrap();
    let from_unrelated = queue.read(&unrelated, 10, LONG_HIDE).await.unwrap();

    assert_eq!(from_billing.len(), 1);
    assert_eq!(from_shipping.len(), 1);
    assert!(from_unrelated.is_empty());

    assert_eq!(from_billing[0].id, from_shipping[0].id);
    assert_eq!(from_billing[0].topic, topic);
    assert_eq!(from_billing[0].body, json!({"order_id": 42}));
    assert_eq!(from_billing[0].deliver_at, from_billing[0].created_at);

    for name in [&billing, &shipping, &unrelated] {
        assert!(queue.delete_channel(name).await.unwrap());
    }
}

pub async fn send_without_subscribers_is_dropped<Q: MessageQueue>(queue: &Q) {
    let deliveries = queue
        .send_json(&unique("nobody"), &json!("hello"), SendOpts::default())
        .await
        .unwrap();
    assert_eq!(deliveries, 0);
}

pub async fn read_hides_messages_until_deleted<Q: MessageQueue>(queue: &Q) {
    let topic = unique("jobs");
    let channel = unique("workers");
    queue
        .create_channel(&channel, &topic, ChannelOpts::default())
        .await
        .unwrap();

    for n in 0..5 {
        queue
            .send_json(&topic, &json!({ "n": n }), SendOpts::default())
            .await
            .unwrap();
    }

    let first = queue.read(&channel, 3, LONG_HIDE).await.unwrap();
    assert_eq!(first.len(), 3);
    assert!(first.windows(2).all(|pair| pair[0].id < pair[1].id));

    let second = queue.read(&channel, 3, LONG_HIDE).await.unwrap();
    assert_eq!(second.len(), 2);
    assert!(first
        .iter()
        .all(|m| second.iter().all(|other| other.id != m.id)));

    assert!(queue.read(&channel, 3, LONG_HIDE).await.unwrap().is_empty());

    for message in first.iter().chain(second.iter()) {
        assert!(queue.delete(&channel, message.id).await.unwrap());
        assert!(!queue.delete(&channel, message.id).await.unwrap());
    }

    let metrics = queue.metrics(&channel).await.unwrap();
    assert_eq!(metrics.total, 0);

    queue.delete_channel(&channel).await.unwrap();
}

pub async fn zero_hide_for_redelivers_immediately<Q: MessageQueue>(queue: &Q) {
    let topic = unique("retry");
    let channel = unique("retry_q");
    queue
        .create_channel(&channel, &topic, ChannelOpts::default())
        .await
        .unwrap();
    queue
        .send_json(&topic, &json!("again"), SendOpts::default())
        .await
        .unwrap();

    let first = queue.read(&channel, 1, Duration::ZERO).await.unwrap();
    let second = queue.read(&channel, 1, Duration::ZERO).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(first[0].id, second[0].id);

    queue.delete_channel(&channel).await.unwrap();
}

pub async fn deferred_messages_are_not_visible<Q: MessageQueue>(queue: &Q) {
    let topic = unique("later");
    let channel = unique("later_q");
    queue
        .create_channel(&channel, &topic, ChannelOpts::default())
        .await
        .unwrap();

    let deliver_at = Utc::now() + ChronoDuration::hours(1);
    queue
        .send_json(&topic, &json!("future"), SendOpts::new().with_deliver_at(deliver_at))
        .await
        .unwrap();
    queue
        .send_json(&topic, &json!("now"), SendOpts::default())
        .await
        .unwrap();

    let batch = queue.read(&channel, 10, LONG_HIDE).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].body, json!("now"));

    let metrics = queue.metrics(&channel).await.unwrap();
    assert_eq!(metrics.total, 2);
    assert_eq!(metrics.deferred, 1);
    assert_eq!(metrics.hidden, 1);
    assert_eq!(metrics.visible, 0);
    assert_eq!(metrics.oldest_visible_age_seconds, None);

    queue.delete_channel(&channel).await.unwrap();
}

pub async fn concurrent_readers_never_share_a_message<Q: MessageQueue>(queue: &Q) {
    let topic = unique("fanin");
    let channel = unique("fanin_q");
    queue
        .create_channel(&channel, &topic, ChannelOpts::default())
        .await
        .unwrap();

    for n in 0..20 {
        queue
            .send_json(&topic, &json!(n), SendOpts::default())
            .await
            .unwrap();
    }

    let reads = (0..8).map(|_| queue.read(&channel, 3, LONG_HIDE));
    let batches = join_all(reads).await;

    let mut seen = HashSet::new();
    let mut total = 0;
    for batch in batches {
        for message in batch.unwrap() {
            assert!(seen.insert(message.id), "message {} delivered twice", message.id);
            total += 1;
        }
    }
    assert_eq!(total, 20);

    queue.delete_channel(&channel).await.unwrap();
}

pub async fn channel_lifecycle<Q: MessageQueue>(queue: &Q) {
    let channel = unique("lifecycle");
    let topic = unique("topic_a");
    let rebound = unique("topic_b");

    queue
        .create_channel(&channel, &topic, ChannelOpts::default())
        .await
        .unwrap();
    queue
        .send_json(&topic, &json!("kept"), SendOpts::default())
        .await
        .unwrap();

    // Re-creating rebinds the topic and keeps stored messages
    queue
        .create_channel(&channel, &rebound, ChannelOpts::default())
        .await
        .unwrap();
    assert_eq!(
        queue
            .send_json(&topic, &json!("ignored"), SendOpts::default())
            .await
            .unwrap(),
        0
    );
    queue
        .send_json(&rebound, &json!("routed"), SendOpts::default())
        .await
        .unwrap();

    let listed = queue.list_channels().await.unwrap();
    let entry = listed.iter().find(|c| c.name == channel).unwrap();
    assert_eq!(entry.topic, rebound);

    let bodies: Vec<_> = queue
        .read(&channel, 10, LONG_HIDE)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.body)
        .collect();
    assert_eq!(bodies, vec![json!("kept"), json!("routed")]);

    assert!(queue.delete_channel(&channel).await.unwrap());
    assert!(!queue.delete_channel(&channel).await.unwrap());
    assert!(!queue.delete(&channel, 1).await.unwrap());

    let err = queue.read(&channel, 1, LONG_HIDE).await.unwrap_err();
    assert!(err.is_channel_not_found(), "unexpected error: {err}");
    assert!(queue.metrics(&channel).await.unwrap_err().is_channel_not_found());
}

pub async fn gc_reclaims_only_expired_channels<Q: MessageQueue>(queue: &Q) {
    let topic = unique("gc");
    let expired = unique("expired");
    let scheduled = unique("scheduled");
    let permanent = unique("permanent");

    queue
        .create_channel(
            &expired,
            &topic,
            ChannelOpts::new().with_delete_at(Utc::now() - ChronoDuration::minutes(1)),
        )
        .await
        .unwrap();
    queue
        .create_channel(
            &scheduled,
            &topic,
            ChannelOpts::new().with_delete_at(Utc::now() + ChronoDuration::hours(1)),
        )
        .await
        .unwrap();
    queue
        .create_channel(&permanent, &topic, ChannelOpts::new().with_unlogged(true))
        .await
        .unwrap();

    // Expired channels keep working until collected
    assert_eq!(
        queue
            .send_json(&topic, &json!("before gc"), SendOpts::default())
            .await
            .unwrap(),
        3
    );

    assert!(queue.gc().await.unwrap() >= 1);

    let names: HashSet<_> = queue
        .list_channels()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert!(!names.contains(&expired));
    assert!(names.contains(&scheduled));
    assert!(names.contains(&permanent));

    assert!(queue
        .read(&expired, 1, LONG_HIDE)
        .await
        .unwrap_err()
        .is_channel_not_found());

    queue.delete_channel(&scheduled).await.unwrap();
    queue.delete_channel(&permanent).await.unwrap();
}

pub async fn zero_quantity_never_touches_the_channel<Q: MessageQueue>(queue: &Q) {
    let missing = unique("missing");
    assert!(queue.read(&missing, 0, LONG_HIDE).await.unwrap().is_empty());

    let topic = unique("idle");
    let channel = unique("idle_q");
    queue
        .create_channel(&channel, &topic, ChannelOpts::default())
        .await
        .unwrap();
    queue
        .send_json(&topic, &json!("untouched"), SendOpts::default())
        .await
        .unwrap();

    assert!(queue.read(&channel, 0, LONG_HIDE).await.unwrap().is_empty());
    assert_eq!(queue.metrics(&channel).await.unwrap().visible, 1);

    queue.delete_channel(&channel).await.unwrap();
}

pub async fn invalid_names_are_rejected<Q: MessageQueue>(queue: &Q) {
    for name in ["", "Has Space", "semi;colon", "UPPER"] {
        assert!(
            queue
                .create_channel(name, "topic", ChannelOpts::default())
                .await
                .is_err(),
            "{name:?} should be rejected"
        );
    }
    assert!(queue
        .create_channel(&unique("valid"), "  ", ChannelOpts::default())
        .await
        .is_err());
}
