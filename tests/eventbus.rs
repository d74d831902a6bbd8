//! Event bus behavior across contexts.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use reactive_transport::{
    Context, DeliveryOptions, Error, EventBus, EventBusOptions, ReadStream, ReplyFailure,
    WriteStream,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

// ============================================================================
// Helpers
// ============================================================================

const WAIT: Duration = Duration::from_secs(5);

/// Registers a consumer that counts its deliveries.
fn counting_consumer(bus: &EventBus, address: &str) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    bus.consumer_with_handler(address, move |_msg| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    count
}

// ============================================================================
// Request / Reply
// ============================================================================

#[tokio::test]
async fn test_request_receives_reply() -> anyhow::Result<()> {
    let bus = EventBus::new();
    bus.consumer_with_handler("calc.double", |msg| {
        let value = msg.body().as_i64().unwrap_or_default();
        msg.reply(value * 2);
    });

    let reply = timeout(WAIT, bus.request("calc.double", 21)).await??;
    assert_eq!(reply.body().as_i64(), Some(42));
    assert_eq!(bus.pending_replies(), 0);
    Ok(())
}

#[tokio::test]
async fn test_reply_chain() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    bus.consumer_with_handler("chat", move |msg| {
        let tx = tx.clone();
        let follow_up = msg.reply_and_request("first");
        tokio::spawn(async move {
            if let Ok(answer) = follow_up.await {
                let _ = tx.send(answer.body().to_string());
            }
        });
    });

    let first = timeout(WAIT, bus.request("chat", "hi")).await??;
    assert_eq!(first.body(), &"first");
    first.reply("second");

    let answer = timeout(WAIT, rx.recv()).await?;
    assert_eq!(answer.as_deref(), Some("second"));
    Ok(())
}

#[tokio::test]
async fn test_request_timeout() -> anyhow::Result<()> {
    let bus = EventBus::new();
    bus.consumer_with_handler("silent", |_msg| {});

    let options = DeliveryOptions::new().with_send_timeout_ms(50);
    let err = timeout(WAIT, bus.request_with_options("silent", "ping", &options))
        .await?
        .expect_err("no reply was sent");

    assert!(err.is_timeout());
    assert_eq!(err.reply_failure(), Some(ReplyFailure::Timeout));
    assert_eq!(bus.pending_replies(), 0);
    Ok(())
}

#[tokio::test]
async fn test_recipient_failure() -> anyhow::Result<()> {
    let bus = EventBus::new();
    bus.consumer_with_handler("strict", |msg| msg.fail(7, "rejected"));

    let err = timeout(WAIT, bus.request("strict", "x"))
        .await?
        .expect_err("recipient failed");

    match err {
        Error::RecipientFailure { code, message } => {
            assert_eq!(code, 7);
            assert_eq!(message, "rejected");
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_reply_handler_no_handlers() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    bus.send_with_reply_handler("nobody", "hello", &DeliveryOptions::new(), move |result| {
        let _ = tx.send(result.err().and_then(|e| e.reply_failure()));
    });

    let failure = timeout(WAIT, rx.recv()).await?;
    assert_eq!(failure, Some(Some(ReplyFailure::NoHandlers)));
    Ok(())
}

#[tokio::test]
async fn test_reply_handler_runs_on_caller_context() -> anyhow::Result<()> {
    let bus = EventBus::new();
    bus.consumer_with_handler("echo", |msg| msg.reply(msg.body().clone()));

    let caller = Context::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let sender = bus.clone();
    let expected = caller.clone();
    caller.execute(move || {
        sender.send_with_reply_handler("echo", "hi", &DeliveryOptions::new(), move |result| {
            let on_caller = Context::current().is_some_and(|c| c == expected);
            let _ = tx.send((result.is_ok(), on_caller));
        });
    });

    let (ok, on_caller) = timeout(WAIT, rx.recv()).await?.expect("reply handler ran");
    assert!(ok);
    assert!(on_caller);
    Ok(())
}

// ============================================================================
// Send / Publish
// ============================================================================

#[tokio::test]
async fn test_publish_reaches_every_consumer() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let counts: Vec<_> = (0..3).map(|_| counting_consumer(&bus, "news")).collect();

    bus.publish("news", "headline")?;

    timeout(WAIT, async {
        while counts.iter().any(|c| c.load(Ordering::SeqCst) == 0) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;

    for count in &counts {
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
    Ok(())
}

#[tokio::test]
async fn test_send_round_robin() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let counts: Vec<_> = (0..3).map(|_| counting_consumer(&bus, "work")).collect();

    for i in 0..9 {
        bus.send("work", i)?;
    }

    timeout(WAIT, async {
        while counts.iter().map(|c| c.load(Ordering::SeqCst)).sum::<usize>() < 9 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;

    for count in &counts {
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
    Ok(())
}

#[tokio::test]
async fn test_send_without_consumers() {
    let bus = EventBus::new();

    let err = bus.send("void", "x").expect_err("no consumer registered");
    assert_eq!(err.reply_failure(), Some(ReplyFailure::NoHandlers));

    assert!(bus.publish("void", "x").is_ok());
}

#[tokio::test]
async fn test_unregistered_consumer_stops_receiving() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let consumer = bus.consumer_with_handler("temp", |msg| msg.reply("here"));

    timeout(WAIT, bus.request("temp", "1")).await??;
    consumer.unregister();

    assert_eq!(bus.consumer_count("temp"), 0);
    let err = timeout(WAIT, bus.request("temp", "2"))
        .await?
        .expect_err("consumer is gone");
    assert_eq!(err.reply_failure(), Some(ReplyFailure::NoHandlers));
    Ok(())
}

// ============================================================================
// Consumer Flow Control
// ============================================================================

#[tokio::test]
async fn test_paused_consumer_buffers_then_replays() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let received = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&received);
    let consumer = bus.consumer("queue");
    consumer.handler(move |msg| sink.lock().push(msg.body().to_string()));
    consumer.pause();

    bus.send("queue", "a")?;
    bus.send("queue", "b")?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(received.lock().is_empty());

    consumer.resume();
    timeout(WAIT, async {
        while received.lock().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;

    assert_eq!(*received.lock(), vec!["a".to_string(), "b".to_string()]);
    Ok(())
}

// ============================================================================
// Producers and Lifecycle
// ============================================================================

#[tokio::test]
async fn test_producer_write_stream() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let count = counting_consumer(&bus, "metrics");

    let producer = bus.publisher("metrics");
    producer.write("a".into())?;
    producer.write("b".into())?;
    assert!(!producer.write_queue_full());

    timeout(WAIT, async {
        while count.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn test_close_fails_pending_requests() -> anyhow::Result<()> {
    let bus = EventBus::with_options(EventBusOptions::new().with_default_send_timeout_ms(60_000));
    bus.consumer_with_handler("slow", |_msg| {});

    let pending = bus.request("slow", "x");
    tokio::time::sleep(Duration::from_millis(20)).await;
    bus.close();

    let err = timeout(WAIT, pending).await?.expect_err("bus closed");
    assert!(matches!(err, Error::BusClosed));
    assert!(matches!(bus.send("slow", "y"), Err(Error::BusClosed)));
    Ok(())
}
