use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::traits::{BrokerResult, SensorStore};
use crate::types::{Reading, ReliabilityStats, SensorId};

/// PostgreSQL implementation of SensorStore
pub struct PostgresSensorStore {
    pool: PgPool,
}

impl PostgresSensorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Initialize database schema
    pub async fn initialize(&self) -> BrokerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sensor_data (
                id BIGSERIAL PRIMARY KEY,
                sensor_id TEXT NOT NULL,
                temperature DOUBLE PRECISION NOT NULL,
                humidity DOUBLE PRECISION NOT NULL,
                pressure DOUBLE PRECISION NOT NULL,
                visibility DOUBLE PRECISION NOT NULL,
                aqi INTEGER NOT NULL,
                occupancy INTEGER NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_sensor_data_latest
                ON sensor_data(sensor_id, created_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sensor_reliability (
                sensor_id TEXT PRIMARY KEY,
                count BIGINT NOT NULL,
                mean DOUBLE PRECISION NOT NULL,
                variance DOUBLE PRECISION NOT NULL,
                reliability DOUBLE PRECISION NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_sensor_reliability_updated
                ON sensor_reliability(updated_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn stats_from_row(row: &PgRow) -> ReliabilityStats {
        ReliabilityStats {
            sensor_id: row.get("sensor_id"),
            count: row.get::<i64, _>("count").max(0) as u64,
            mean: row.get("mean"),
            variance: row.get("variance"),
            reliability: row.get("reliability"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl SensorStore for PostgresSensorStore {
    async fn save_reading(&self, reading: &Reading) -> BrokerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sensor_data
                (sensor_id, temperature, humidity, pressure, visibility, aqi, occupancy, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&reading.sensor_id)
        .bind(reading.temperature)
        .bind(reading.humidity)
        .bind(reading.pressure)
        .bind(reading.visibility)
        .bind(reading.aqi)
        .bind(reading.occupancy)
        .bind(reading.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_reliability(
        &self,
        sensor_id: &SensorId,
    ) -> BrokerResult<Option<ReliabilityStats>> {
        let row = sqlx::query(
            r#"
            SELECT sensor_id, count, mean, variance, reliability, updated_at
            FROM sensor_reliability
            WHERE sensor_id = $1
            "#,
        )
        .bind(sensor_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::stats_from_row))
    }

    async fn put_reliability(&self, stats: &ReliabilityStats) -> BrokerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sensor_reliability
                (sensor_id, count, mean, variance, reliability, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (sensor_id) DO UPDATE SET
                count = EXCLUDED.count,
                mean = EXCLUDED.mean,
                variance = EXCLUDED.variance,
                reliability = EXCLUDED.reliability,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&stats.sensor_id)
        .bind(stats.count as i64)
        .bind(stats.mean)
        .bind(stats.variance)
        .bind(stats.reliability)
        .bind(stats.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query_best_candidate(
        &self,
        since: DateTime<Utc>,
    ) -> BrokerResult<Option<ReliabilityStats>> {
        let row = sqlx::query(
            r#"
            SELECT sensor_id, count, mean, variance, reliability, updated_at
            FROM sensor_reliability
            WHERE updated_at > $1
            ORDER BY reliability DESC, count DESC, updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::stats_from_row))
    }

    async fn latest_reading(&self, sensor_id: &SensorId) -> BrokerResult<Option<Reading>> {
        let row = sqlx::query(
            r#"
            SELECT sensor_id, temperature, humidity, pressure, visibility, aqi, occupancy, created_at
            FROM sensor_data
            WHERE sensor_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(sensor_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Reading {
            sensor_id: row.get("sensor_id"),
            temperature: row.get("temperature"),
            humidity: row.get("humidity"),
            pressure: row.get("pressure"),
            visibility: row.get("visibility"),
            aqi: row.get("aqi"),
            occupancy: row.get("occupancy"),
            created_at: row.get("created_at"),
        }))
    }
}
