//! TCP endpoints over real localhost connections.

use std::sync::Once;
use std::time::Duration;

use reactive_transport::transport::DEFAULT_BIND_IP;
use reactive_transport::{
    Buffer, EventBus, HandlerId, NetClient, NetServer, NetSocketOptions, Pump, ReadStream,
    WriteStream,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

static TRACING: Once = Once::new();

/// Installs a test subscriber honoring `RUST_LOG`.
fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pump_echo_with_small_watermark() -> anyhow::Result<()> {
    init_tracing();
    let bus = EventBus::new();
    let options = NetSocketOptions::new()
        .with_read_buffer_size(512)
        .with_write_queue_max_size(1024);

    let server = NetServer::bind_with_options(DEFAULT_BIND_IP, 0, &bus, options, |socket| {
        Pump::new(socket.clone(), socket).start();
    })
    .await?;

    let payload: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
    let stream = TcpStream::connect(server.local_address()).await?;
    let (mut reader, mut writer) = stream.into_split();

    let outgoing = payload.clone();
    let write_task = tokio::spawn(async move {
        writer.write_all(&outgoing).await?;
        writer.flush().await?;
        Ok::<_, std::io::Error>(writer)
    });

    let mut echoed = vec![0u8; payload.len()];
    timeout(WAIT, reader.read_exact(&mut echoed)).await??;
    assert_eq!(echoed, payload);

    drop(write_task.await??);
    server.close();
    Ok(())
}

#[tokio::test]
async fn test_bus_relay_between_connections() -> anyhow::Result<()> {
    init_tracing();
    let bus = EventBus::new();

    let (id_tx, mut id_rx) = mpsc::unbounded_channel::<HandlerId>();
    let relay_bus = bus.clone();
    let server = NetServer::bind(DEFAULT_BIND_IP, 0, &bus, move |socket| {
        let _ = id_tx.send(socket.write_handler_id().clone());
        let bus = relay_bus.clone();
        socket.handler(move |data| {
            let _ = bus.publish("relay", data);
        });
    })
    .await?;

    // Connections are accepted one at a time, so handler ids arrive in
    // connect order.
    let mut sender = TcpStream::connect(server.local_address()).await?;
    let _sender_id = timeout(WAIT, id_rx.recv()).await?.expect("sender accepted");
    let mut receiver = TcpStream::connect(server.local_address()).await?;
    let receiver_id = timeout(WAIT, id_rx.recv()).await?.expect("receiver accepted");

    let forward_bus = bus.clone();
    bus.consumer_with_handler("relay", move |msg| {
        let _ = forward_bus.send(receiver_id.as_str(), msg.body().clone());
    });

    sender.write_all(b"over the bus").await?;

    let mut received = [0u8; 12];
    timeout(WAIT, receiver.read_exact(&mut received)).await??;
    assert_eq!(&received, b"over the bus");

    server.close();
    Ok(())
}

#[tokio::test]
async fn test_client_connect_and_server_count() -> anyhow::Result<()> {
    init_tracing();
    let bus = EventBus::new();
    let server = NetServer::bind(DEFAULT_BIND_IP, 0, &bus, |socket| {
        let greeter = socket.clone();
        socket.handler(move |data| {
            let mut reply = Buffer::from("hello ");
            reply.append_buffer(&data);
            let _ = greeter.write(reply);
        });
    })
    .await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = NetClient::new(&bus)
        .connect(server.local_address(), move |socket| {
            socket.handler(move |data| {
                let _ = tx.send(data);
            });
        })
        .await?;

    client.write_str("ferris")?;

    let mut received = Buffer::new();
    while received.length() < "hello ferris".len() {
        let chunk = timeout(WAIT, rx.recv()).await?.expect("server replied");
        received.append_buffer(&chunk);
    }
    assert_eq!(received.to_string(), "hello ferris");
    assert_eq!(server.connection_count(), 1);

    client.close();
    timeout(WAIT, async {
        while server.connection_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    server.close();
    Ok(())
}
