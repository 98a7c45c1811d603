use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};

use crate::{
    clients::token_store::TokenStore,
    models::{packet::Jid, token::DeviceToken},
};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS apns_device_tokens (
        device_token TEXT PRIMARY KEY,
        jid TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS apns_device_tokens_jid_idx ON apns_device_tokens (jid);
    CREATE TABLE IF NOT EXISTS muc_room_members (
        room_id BIGINT NOT NULL,
        jid TEXT NOT NULL,
        PRIMARY KEY (room_id, jid)
    );
"#;

pub struct PostgresTokenStore {
    client: Client,
}

impl PostgresTokenStore {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        info!("Connecting to PostgreSQL database");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection terminated");
            }
        });

        info!("PostgreSQL connection established");

        Ok(Self { client })
    }

    pub async fn ensure_schema(&self) -> Result<(), Error> {
        self.client
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| anyhow!("Failed to create token store schema: {}", e))?;

        debug!("Token store schema ready");
        Ok(())
    }

    pub async fn add_room_member(&self, room_id: i64, jid: &Jid) -> Result<(), Error> {
        self.client
            .execute(
                "INSERT INTO muc_room_members (room_id, jid) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                &[&room_id, &jid.bare()],
            )
            .await
            .map_err(|e| anyhow!("Failed to add room member: {}", e))?;

        Ok(())
    }
}

#[async_trait]
impl TokenStore for PostgresTokenStore {
    async fn device_tokens(&self, jid: &Jid) -> Result<Vec<DeviceToken>, Error> {
        let rows = self
            .client
            .query(
                "SELECT device_token FROM apns_device_tokens WHERE jid = $1 ORDER BY device_token",
                &[&jid.bare()],
            )
            .await
            .map_err(|e| anyhow!("Device token lookup failed: {}", e))?;

        Ok(rows
            .iter()
            .map(|row| DeviceToken::new(row.get::<_, String>(0)))
            .collect())
    }

    async fn device_tokens_for_room(&self, room_id: i64) -> Result<Vec<DeviceToken>, Error> {
        let rows = self
            .client
            .query(
                r#"
                SELECT t.device_token
                FROM apns_device_tokens t
                JOIN muc_room_members m ON m.jid = t.jid
                WHERE m.room_id = $1
                ORDER BY t.device_token
                "#,
                &[&room_id],
            )
            .await
            .map_err(|e| anyhow!("Room device token lookup failed: {}", e))?;

        Ok(rows
            .iter()
            .map(|row| DeviceToken::new(row.get::<_, String>(0)))
            .collect())
    }

    async fn set_device_token(&self, jid: &Jid, token: &DeviceToken) -> Result<(), Error> {
        self.client
            .execute(
                r#"
                INSERT INTO apns_device_tokens (device_token, jid)
                VALUES ($1, $2)
                ON CONFLICT (device_token) DO UPDATE SET jid = EXCLUDED.jid
                "#,
                &[&token.as_str(), &jid.bare()],
            )
            .await
            .map_err(|e| anyhow!("Device token write failed: {}", e))?;

        debug!(jid = %jid.bare(), token = %token, "Device token stored");
        Ok(())
    }

    async fn delete_device_token(&self, token: &DeviceToken) -> Result<bool, Error> {
        let deleted = self
            .client
            .execute(
                "DELETE FROM apns_device_tokens WHERE device_token = $1",
                &[&token.as_str()],
            )
            .await
            .map_err(|e| anyhow!("Device token delete failed: {}", e))?;

        Ok(deleted > 0)
    }

    async fn delete_device_tokens_for(&self, jid: &Jid) -> Result<usize, Error> {
        let deleted = self
            .client
            .execute(
                "DELETE FROM apns_device_tokens WHERE jid = $1",
                &[&jid.bare()],
            )
            .await
            .map_err(|e| anyhow!("Device token delete failed: {}", e))?;

        Ok(deleted as usize)
    }

    async fn health_check(&self) -> Result<(), Error> {
        self.client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| anyhow!("Database health check failed: {}", e))?;

        Ok(())
    }
}
