use chrono::Utc;
use clap::Parser;
use rand::Rng;
use spaceprobe_broker::Reading;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Spaceprobe mock producer - streams random sensor readings to the broker
#[derive(Parser)]
#[command(name = "spaceprobe-mock")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Broker ingestion address
    #[arg(short, long, env = "MOCK_TARGET", default_value = "localhost:9000")]
    target: String,

    /// Number of distinct sensors (sensor-0 .. sensor-N-1)
    #[arg(short, long, default_value = "3")]
    sensors: u32,

    /// Delay between readings in milliseconds
    #[arg(short, long, default_value = "5000")]
    interval_ms: u64,

    /// Stop after sending this many readings
    #[arg(short, long)]
    count: Option<u64>,
}

fn random_reading<R: Rng>(rng: &mut R, sensors: u32) -> Reading {
    Reading {
        sensor_id: format!("sensor-{}", rng.gen_range(0..sensors.max(1))),
        temperature: 15.0 + rng.gen::<f64>() * 20.0,
        humidity: rng.gen::<f64>() * 100.0,
        pressure: 950.0 + rng.gen::<f64>() * 50.0,
        visibility: rng.gen::<f64>() * 10.0,
        aqi: rng.gen_range(0..500),
        occupancy: rng.gen_range(0..5000),
        created_at: Utc::now(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spaceprobe_mock=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut stream = TcpStream::connect(&cli.target).await?;
    info!("Connected to {}", cli.target);

    let mut sent = 0u64;
    let mut interval = tokio::time::interval(Duration::from_millis(cli.interval_ms.max(1)));

    while cli.count.map_or(true, |count| sent < count) {
        interval.tick().await;

        let reading = random_reading(&mut rand::thread_rng(), cli.sensors);
        let mut line = serde_json::to_vec(&reading)?;
        line.push(b'\n');

        if let Err(e) = stream.write_all(&line).await {
            warn!("Failed to send reading: {}", e);
            break;
        }

        sent += 1;
        info!(
            "Sent reading #{} for {} ({:.2}°C)",
            sent, reading.sensor_id, reading.temperature
        );
    }

    info!("Mock producer finished after {} readings", sent);
    Ok(())
}
