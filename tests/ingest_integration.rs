use spaceprobe_broker::{
    listener, BroadcastHub, BroadcastPayload, InMemorySensorStore, ObserverHandle,
    ReadingPipeline, SensorStore, VarianceRatio,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn start_listener(store: Arc<InMemorySensorStore>, hub: BroadcastHub) -> SocketAddr {
    let pipeline = Arc::new(ReadingPipeline::new(
        store,
        Arc::new(VarianceRatio::default()),
        hub,
    ));
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    tokio::spawn(listener::serve(tcp, pipeline));
    addr
}

async fn next_payload(observer: &mut ObserverHandle) -> BroadcastPayload {
    let update = timeout(RECV_TIMEOUT, observer.updates.recv())
        .await
        .expect("timed out waiting for broadcast")
        .expect("observer queue closed");
    serde_json::from_str(&update).unwrap()
}

#[tokio::test]
async fn test_malformed_line_does_not_end_stream() {
    let store = Arc::new(InMemorySensorStore::new());
    let hub = BroadcastHub::default();
    let mut observer = hub.connect();
    hub.subscribe(&observer.id, None);
    let addr = start_listener(store, hub).await;

    let mut producer = TcpStream::connect(addr).await.unwrap();
    producer.write_all(b"{not json\n").await.unwrap();
    producer
        .write_all(b"{\"sensor_id\":\"sensor-1\",\"temperature\":22.5,\"humidity\":55.0,\"pressure\":1005.0,\"visibility\":9.0,\"aqi\":100,\"occupancy\":200}\n")
        .await
        .unwrap();

    let payload = next_payload(&mut observer).await;
    assert_eq!(payload.sensor_id, "sensor-1");
    assert_eq!(payload.temperature, 22.5);
    assert_eq!(payload.aqi, 100);
    assert_eq!(payload.occupancy, 200);
    assert_eq!(payload.reliability_score, 1.0);
}

#[tokio::test]
async fn test_three_readings_over_tcp() {
    let store = Arc::new(InMemorySensorStore::new());
    let hub = BroadcastHub::default();
    let mut observer = hub.connect();
    hub.subscribe(&observer.id, Some("sensor-1"));
    let addr = start_listener(store.clone(), hub).await;

    let mut producer = TcpStream::connect(addr).await.unwrap();
    for temperature in [20, 22, 18] {
        let line = format!("{{\"sensor_id\":\"sensor-1\",\"temperature\":{}}}\n", temperature);
        producer.write_all(line.as_bytes()).await.unwrap();
    }

    let mut last = None;
    for _ in 0..3 {
        last = Some(next_payload(&mut observer).await);
    }
    assert_eq!(last.unwrap().temperature, 18.0);

    let stats = store
        .get_reliability(&"sensor-1".to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats.count, 3);
    assert!((stats.mean - 20.0).abs() < 1e-12);
}

#[tokio::test]
async fn test_concurrent_producers() {
    let store = Arc::new(InMemorySensorStore::new());
    let hub = BroadcastHub::default();
    let mut observer = hub.connect();
    hub.subscribe(&observer.id, None);
    let addr = start_listener(store.clone(), hub).await;

    let mut producers = Vec::new();
    for p in 0..4 {
        producers.push(tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            for i in 0..10 {
                let line = format!(
                    "{{\"sensor_id\":\"sensor-{}\",\"temperature\":{}}}\n",
                    p % 2,
                    20 + i
                );
                stream.write_all(line.as_bytes()).await.unwrap();
            }
            stream.shutdown().await.unwrap();
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }

    for _ in 0..40 {
        next_payload(&mut observer).await;
    }

    for sensor in ["sensor-0", "sensor-1"] {
        let stats = store
            .get_reliability(&sensor.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.count, 20);
        assert!((stats.mean - 24.5).abs() < 1e-9);
    }
    assert_eq!(store.readings_saved(), 40);
}

#[tokio::test]
async fn test_disconnected_observer_skipped() {
    let store = Arc::new(InMemorySensorStore::new());
    let hub = BroadcastHub::default();
    let leaving = hub.connect();
    let mut staying = hub.connect();
    hub.subscribe(&leaving.id, None);
    hub.subscribe(&staying.id, None);
    let addr = start_listener(store, hub.clone()).await;

    let mut producer = TcpStream::connect(addr).await.unwrap();
    producer
        .write_all(b"{\"sensor_id\":\"sensor-1\",\"temperature\":20.0}\n")
        .await
        .unwrap();
    next_payload(&mut staying).await;

    hub.disconnect(&leaving.id);
    drop(leaving);

    producer
        .write_all(b"{\"sensor_id\":\"sensor-1\",\"temperature\":21.0}\n")
        .await
        .unwrap();
    let payload = next_payload(&mut staying).await;
    assert_eq!(payload.temperature, 21.0);
    assert_eq!(hub.observer_count(), 1);
}

#[tokio::test]
async fn test_extreme_temperatures_rejected_at_ingest() {
    let store = Arc::new(InMemorySensorStore::new());
    let hub = BroadcastHub::default();
    let mut observer = hub.connect();
    hub.subscribe(&observer.id, None);
    let addr = start_listener(store.clone(), hub).await;

    let mut producer = TcpStream::connect(addr).await.unwrap();
    producer
        .write_all(b"{\"sensor_id\":\"sensor-1\",\"temperature\":1e200}\n{\"sensor_id\":\"sensor-1\",\"temperature\":-1e200}\n{\"sensor_id\":\"sensor-1\",\"temperature\":20.0}\n")
        .await
        .unwrap();

    let update = timeout(RECV_TIMEOUT, observer.updates.recv())
        .await
        .expect("timed out waiting for broadcast")
        .expect("observer queue closed");
    assert!(!update.contains("null"));
    let payload: BroadcastPayload = serde_json::from_str(&update).unwrap();
    assert_eq!(payload.temperature, 20.0);
    assert_eq!(payload.reliability_score, 1.0);

    let stats = store
        .get_reliability(&"sensor-1".to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats.count, 1);
    assert_eq!(store.readings_saved(), 1);
}
