// Ingestion listener
//
// Accepts producer connections and reads newline-delimited JSON readings.
// Every connection runs in its own task and feeds the shared pipeline.

use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::pipeline::ReadingPipeline;
use crate::types::decode_reading;

/// Longest accepted producer line, excluding the newline
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Per-connection line counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStats {
    pub processed: u64,
    pub malformed: u64,
    pub failed: u64,
}

/// Accept producer connections forever
pub async fn serve(listener: TcpListener, pipeline: Arc<ReadingPipeline>) {
    match listener.local_addr() {
        Ok(addr) => info!("📥 Ingestion listener on tcp://{}", addr),
        Err(e) => warn!("Ingestion listener started, local address unknown: {}", e),
    }

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Failed to accept producer connection: {}", e);
                continue;
            }
        };

        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            handle_producer(stream, peer, pipeline).await;
        });
    }
}

async fn handle_producer<R>(stream: R, peer: SocketAddr, pipeline: Arc<ReadingPipeline>)
where
    R: AsyncRead + Unpin,
{
    info!("Producer connected: {}", peer);
    let stats = read_readings(stream, &pipeline).await;
    info!(
        "Producer {} disconnected ({} processed, {} malformed, {} failed)",
        peer, stats.processed, stats.malformed, stats.failed
    );
}

/// Drive the pipeline from one producer stream until EOF or a read error
pub async fn read_readings<R>(stream: R, pipeline: &ReadingPipeline) -> ConnectionStats
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    let mut stats = ConnectionStats::default();

    loop {
        line.clear();

        let limit = MAX_LINE_BYTES as u64 + 1;
        match (&mut reader).take(limit).read_until(b'\n', &mut line).await {
            Ok(0) => {
                debug!("Producer stream reached EOF");
                break;
            }
            Ok(_) if line.len() > MAX_LINE_BYTES && line.last() != Some(&b'\n') => {
                warn!("Skipping line longer than {} bytes", MAX_LINE_BYTES);
                stats.malformed += 1;
                if let Err(e) = discard_line(&mut reader).await {
                    error!("Producer read error: {}", e);
                    break;
                }
            }
            Ok(_) => {
                let trimmed = line.trim_ascii();
                if trimmed.is_empty() {
                    continue;
                }

                let reading = match decode_reading(trimmed, Utc::now()) {
                    Ok(reading) => reading,
                    Err(e) => {
                        warn!("Skipping line: {}", e);
                        stats.malformed += 1;
                        continue;
                    }
                };

                let sensor_id = reading.sensor_id.clone();
                match pipeline.process(reading).await {
                    Ok(outcome) => {
                        debug!("Reading from {} handled: {:?}", sensor_id, outcome);
                        stats.processed += 1;
                    }
                    Err(e) => {
                        error!("Pipeline failed for reading from {}: {}", sensor_id, e);
                        stats.failed += 1;
                    }
                }
            }
            Err(e) => {
                error!("Producer read error: {}", e);
                break;
            }
        }
    }

    stats
}

/// Consume input up to and including the next newline
async fn discard_line<R>(reader: &mut R) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(());
        }

        let (consumed, found) = match buf.iter().position(|&b| b == b'\n') {
            Some(end) => (end + 1, true),
            None => (buf.len(), false),
        };
        reader.consume(consumed);
        if found {
            return Ok(());
        }
    }
}
