use anyhow::Result;

use super::{DbClient, NewUser, UserRecord};

#[allow(clippy::missing_errors_doc)]
impl DbClient {
    pub async fn insert_user(&self, user: &NewUser) -> Result<()> {
        sqlx::query("INSERT INTO users (id, username, api_token) VALUES (?1, ?2, ?3)")
            .bind(&user.id)
            .bind(&user.username)
            .bind(&user.api_token)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let row = sqlx::query_as::<_, (String, String, String)>(
            "SELECT id, username, api_token FROM users WHERE username = ?1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, username, api_token)| UserRecord {
            id,
            username,
            api_token,
        }))
    }

    pub async fn get_user_api_token(&self, user_id: &str) -> Result<Option<String>> {
        let token = sqlx::query_scalar::<_, String>("SELECT api_token FROM users WHERE id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(token)
    }
}
