use anyhow::Result;

use super::{DbClient, NewWebhookDelivery};

impl DbClient {
    /// Records a webhook delivery id. Returns false when the id was already seen.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn record_webhook_delivery(&self, delivery: &NewWebhookDelivery) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO webhook_deliveries (delivery_id, event_type, project_id, pull_request_number, action) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&delivery.delivery_id)
        .bind(&delivery.event_type)
        .bind(&delivery.project_id)
        .bind(delivery.pull_request_number)
        .bind(&delivery.action)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Drops a delivery record so the sender's redelivery is processed again.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn forget_webhook_delivery(&self, delivery_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM webhook_deliveries WHERE delivery_id = ?1")
            .bind(delivery_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
