use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{guest_not_found, DeliveryAttempt, Guest, GuestStore, NewGuest};
use crate::artifact::color::ArtifactColors;
use crate::artifact::lifecycle::ArtifactState;
use crate::error::PipelineError;

const GUEST_COLUMNS: &str = "id, event_id, name, table_no, others, email, phone, \
     color_background, color_center, color_edge, artifact_state, created_at";

pub struct PgGuestStore {
    pool: PgPool,
}

impl PgGuestStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct GuestRow {
    id: Uuid,
    event_id: String,
    name: String,
    table_no: String,
    others: String,
    email: Option<String>,
    phone: Option<String>,
    color_background: String,
    color_center: String,
    color_edge: String,
    artifact_state: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<GuestRow> for Guest {
    type Error = PipelineError;

    fn try_from(row: GuestRow) -> Result<Self, Self::Error> {
        Ok(Guest {
            id: row.id,
            event_id: row.event_id,
            name: row.name,
            table_no: row.table_no,
            others: row.others,
            email: row.email,
            phone: row.phone,
            colors: ArtifactColors {
                background: row.color_background.parse()?,
                center: row.color_center.parse()?,
                edge: row.color_edge.parse()?,
            },
            artifact_state: row.artifact_state.parse()?,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl GuestStore for PgGuestStore {
    async fn create_guest(&self, guest: NewGuest) -> Result<Guest, PipelineError> {
        let guest = guest.into_guest();
        sqlx::query(
            r#"
INSERT INTO guests
    (id, event_id, name, table_no, others, email, phone,
     color_background, color_center, color_edge, artifact_state, created_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(guest.id)
        .bind(&guest.event_id)
        .bind(&guest.name)
        .bind(&guest.table_no)
        .bind(&guest.others)
        .bind(&guest.email)
        .bind(&guest.phone)
        .bind(guest.colors.background.to_hex())
        .bind(guest.colors.center.to_hex())
        .bind(guest.colors.edge.to_hex())
        .bind(guest.artifact_state.as_str())
        .bind(guest.created_at)
        .execute(&self.pool)
        .await?;

        Ok(guest)
    }

    async fn get_guest(&self, event_id: &str, guest_id: Uuid) -> Result<Guest, PipelineError> {
        let row: Option<GuestRow> = sqlx::query_as(&format!(
            "SELECT {GUEST_COLUMNS} FROM guests WHERE id = $1 AND event_id = $2"
        ))
        .bind(guest_id)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| guest_not_found(event_id, guest_id))?
            .try_into()
    }

    async fn update_colors(
        &self,
        guest_id: Uuid,
        colors: &ArtifactColors,
    ) -> Result<(), PipelineError> {
        let result = sqlx::query(
            "UPDATE guests SET color_background = $2, color_center = $3, color_edge = $4 WHERE id = $1",
        )
        .bind(guest_id)
        .bind(colors.background.to_hex())
        .bind(colors.center.to_hex())
        .bind(colors.edge.to_hex())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::not_found(format!("guest:{guest_id}")));
        }
        Ok(())
    }

    async fn set_artifact_state(
        &self,
        guest_id: Uuid,
        state: ArtifactState,
    ) -> Result<(), PipelineError> {
        let result = sqlx::query("UPDATE guests SET artifact_state = $2 WHERE id = $1")
            .bind(guest_id)
            .bind(state.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::not_found(format!("guest:{guest_id}")));
        }
        Ok(())
    }

    async fn delete_guest(&self, event_id: &str, guest_id: Uuid) -> Result<(), PipelineError> {
        let result = sqlx::query("DELETE FROM guests WHERE id = $1 AND event_id = $2")
            .bind(guest_id)
            .bind(event_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(guest_not_found(event_id, guest_id));
        }
        Ok(())
    }

    async fn record_delivery(&self, attempt: &DeliveryAttempt) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
INSERT INTO guest_deliveries
    (guest_id, channel, template_id, status, provider_message_id, detail, attempted_at)
VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(attempt.guest_id)
        .bind(attempt.channel.as_str())
        .bind(&attempt.template_id)
        .bind(attempt.status.as_str())
        .bind(&attempt.provider_message_id)
        .bind(&attempt.detail)
        .bind(attempt.attempted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), PipelineError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
