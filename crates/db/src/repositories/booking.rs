use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;

use rollwise_core::domain::agent::AgentId;
use rollwise_core::domain::booking::{BookedInterval, BookingRecord};

use super::{
    column, decode_timestamp, encode_timestamp, parse_column, BookingRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlBookingRepository {
    pool: DbPool,
}

impl SqlBookingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_booking(row: &SqliteRow) -> Result<BookingRecord, RepositoryError> {
    let start_time: String = column(row, "start_time")?;
    let end_time: String = column(row, "end_time")?;
    Ok(BookingRecord {
        id: column(row, "id")?,
        agent_id: AgentId(column(row, "agent_id")?),
        external_event_id: column(row, "external_event_id")?,
        summary: column(row, "summary")?,
        start_time: decode_timestamp(&start_time)?,
        end_time: decode_timestamp(&end_time)?,
        phone_number: column(row, "phone_number")?,
        status: parse_column(row, "status")?,
    })
}

#[async_trait::async_trait]
impl BookingRepository for SqlBookingRepository {
    async fn record(&self, booking: &BookingRecord) -> Result<(), RepositoryError> {
        let now = encode_timestamp(&Utc::now());
        sqlx::query(
            "INSERT INTO bookings (id, agent_id, external_event_id, summary, start_time, end_time,
                                   phone_number, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(external_event_id) DO UPDATE SET
                 summary = excluded.summary,
                 start_time = excluded.start_time,
                 end_time = excluded.end_time,
                 phone_number = COALESCE(excluded.phone_number, bookings.phone_number),
                 status = excluded.status,
                 updated_at = excluded.updated_at",
        )
        .bind(&booking.id)
        .bind(&booking.agent_id.0)
        .bind(&booking.external_event_id)
        .bind(&booking.summary)
        .bind(encode_timestamp(&booking.start_time))
        .bind(encode_timestamp(&booking.end_time))
        .bind(&booking.phone_number)
        .bind(booking.status.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_external_id(
        &self,
        external_event_id: &str,
    ) -> Result<Option<BookingRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, agent_id, external_event_id, summary, start_time, end_time, phone_number,
                    status
             FROM bookings WHERE external_event_id = ?",
        )
        .bind(external_event_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_booking).transpose()
    }

    async fn mark_cancelled(&self, external_event_id: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE bookings SET status = 'cancelled', updated_at = ?
             WHERE external_event_id = ? AND status = 'confirmed'",
        )
        .bind(encode_timestamp(&Utc::now()))
        .bind(external_event_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upcoming_for_phone(
        &self,
        agent_id: &AgentId,
        phone_number: &str,
        after: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<BookingRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, agent_id, external_event_id, summary, start_time, end_time, phone_number,
                    status
             FROM bookings
             WHERE agent_id = ? AND phone_number = ? AND status = 'confirmed' AND start_time > ?
             ORDER BY start_time ASC
             LIMIT ?",
        )
        .bind(&agent_id.0)
        .bind(phone_number)
        .bind(encode_timestamp(&after))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_booking).collect()
    }

    async fn booked_intervals(
        &self,
        agent_id: &AgentId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BookedInterval>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT start_time, end_time FROM bookings
             WHERE agent_id = ? AND status = 'confirmed' AND start_time < ? AND end_time > ?
             ORDER BY start_time ASC",
        )
        .bind(&agent_id.0)
        .bind(encode_timestamp(&end))
        .bind(encode_timestamp(&start))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let start_time: String = column(row, "start_time")?;
                let end_time: String = column(row, "end_time")?;
                Ok(BookedInterval::new(decode_timestamp(&start_time)?, decode_timestamp(&end_time)?))
            })
            .collect()
    }
}
