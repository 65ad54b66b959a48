//! The durable repository tier over SQLite. The schema is created on open;
//! batch saves are transactional and merge by device key.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error};
use sqlx::{Connection, Row, SqliteConnection};
use tokio::sync::Mutex;

use crate::model::{DeviceOwnership, StoredDeviceInformation};
use crate::repository::DeviceRepository;

const CREATE_DEVICE_TABLE: &str = "CREATE TABLE IF NOT EXISTS Device (\
    Id INTEGER PRIMARY KEY AUTOINCREMENT, \
    DeviceKey TEXT NOT NULL UNIQUE, \
    BelongsTo TEXT CHECK( BelongsTo IN ('Platform', 'Gateway') ), \
    Timestamp INTEGER NOT NULL)";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Sqlite(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct SqliteDeviceRepository {
    conn: Arc<Mutex<SqliteConnection>>,
}

impl SqliteDeviceRepository {
    /// Opens (creating if necessary) the database file and ensures the
    /// schema exists.
    pub async fn open(path: &Path) -> Result<SqliteDeviceRepository, Error> {
        if !path.exists() {
            debug!("Creating the device repository database file.");
            std::fs::File::create(path)?;
        }
        let conn = SqliteConnection::connect(&path.as_os_str().to_string_lossy()).await;
        let conn = match conn {
            Ok(conn) => {
                debug!("Connection to the device repository established.");
                conn
            }
            Err(e) => {
                error!(
                    "Unable to open the device repository in file `{path:?}`. \
                    Make sure that the current process can read from the file and write to it, \
                    and that no other process accesses the file. Error details: {e:?}"
                );
                return Err(e.into());
            }
        };
        Self::init(conn).await
    }

    /// An in-memory database, used by tests and the PERSISTENT policy
    /// without a configured path.
    pub async fn open_in_memory() -> Result<SqliteDeviceRepository, Error> {
        let conn = SqliteConnection::connect("sqlite::memory:").await?;
        Self::init(conn).await
    }

    async fn init(mut conn: SqliteConnection) -> Result<SqliteDeviceRepository, Error> {
        sqlx::query(CREATE_DEVICE_TABLE).execute(&mut conn).await?;
        Ok(SqliteDeviceRepository {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn try_save(&self, devices: &[StoredDeviceInformation]) -> Result<(), sqlx::Error> {
        let mut conn = self.conn.lock().await;
        let mut tx = conn.begin().await?;
        for device in devices {
            sqlx::query(
                "INSERT INTO Device (DeviceKey, BelongsTo, Timestamp) VALUES (?, ?, ?) \
                 ON CONFLICT(DeviceKey) DO UPDATE SET \
                 BelongsTo = excluded.BelongsTo, Timestamp = excluded.Timestamp",
            )
            .bind(&device.device_key)
            .bind(device.owned_by.as_str())
            .bind(device.timestamp_ms)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn try_remove(&self, device_keys: &[String]) -> Result<(), sqlx::Error> {
        let mut conn = self.conn.lock().await;
        let mut tx = conn.begin().await?;
        for key in device_keys {
            sqlx::query("DELETE FROM Device WHERE DeviceKey = ?")
                .bind(key)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn try_get(
        &self,
        device_key: &str,
    ) -> Result<Option<StoredDeviceInformation>, sqlx::Error> {
        let mut conn = self.conn.lock().await;
        let row = sqlx::query("SELECT DeviceKey, BelongsTo, Timestamp FROM Device WHERE DeviceKey = ?")
            .bind(device_key)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.and_then(row_to_device))
    }
}

fn row_to_device(row: sqlx::sqlite::SqliteRow) -> Option<StoredDeviceInformation> {
    let device_key: String = row.try_get("DeviceKey").ok()?;
    let belongs_to: String = row.try_get("BelongsTo").ok()?;
    let timestamp: i64 = row.try_get("Timestamp").ok()?;
    let owned_by = DeviceOwnership::parse(&belongs_to)?;
    Some(StoredDeviceInformation::new(device_key, owned_by, timestamp))
}

#[async_trait]
impl DeviceRepository for SqliteDeviceRepository {
    async fn save(&self, devices: Vec<StoredDeviceInformation>) -> bool {
        match self.try_save(&devices).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to save devices in the database: {e:?}");
                false
            }
        }
    }

    async fn remove(&self, device_keys: Vec<String>) -> bool {
        match self.try_remove(&device_keys).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to remove devices from the database: {e:?}");
                false
            }
        }
    }

    async fn remove_all(&self) -> bool {
        let mut conn = self.conn.lock().await;
        match sqlx::query("DELETE FROM Device").execute(&mut *conn).await {
            Ok(_) => true,
            Err(e) => {
                error!("Failed to remove all devices from the database: {e:?}");
                false
            }
        }
    }

    async fn contains_device(&self, device_key: &str) -> bool {
        match self.try_get(device_key).await {
            Ok(device) => device.is_some(),
            Err(e) => {
                error!("Failed to query the database for device '{device_key}': {e:?}");
                false
            }
        }
    }

    async fn get(&self, device_key: &str) -> Option<StoredDeviceInformation> {
        match self.try_get(device_key).await {
            Ok(device) => device,
            Err(e) => {
                error!("Failed to query the database for device '{device_key}': {e:?}");
                None
            }
        }
    }

    async fn gateway_devices(&self) -> Vec<StoredDeviceInformation> {
        let mut conn = self.conn.lock().await;
        let rows = sqlx::query(
            "SELECT DeviceKey, BelongsTo, Timestamp FROM Device WHERE BelongsTo = 'Gateway'",
        )
        .fetch_all(&mut *conn)
        .await;
        match rows {
            Ok(rows) => rows.into_iter().filter_map(row_to_device).collect(),
            Err(e) => {
                error!("Failed to list gateway devices from the database: {e:?}");
                Vec::new()
            }
        }
    }

    async fn latest_platform_timestamp(&self) -> i64 {
        let mut conn = self.conn.lock().await;
        let row = sqlx::query(
            "SELECT MAX(Timestamp) AS Latest FROM Device WHERE BelongsTo = 'Platform'",
        )
        .fetch_one(&mut *conn)
        .await;
        match row {
            Ok(row) => row.try_get::<Option<i64>, _>("Latest").ok().flatten().unwrap_or(0),
            Err(e) => {
                error!("Failed to read the latest platform timestamp from the database: {e:?}");
                0
            }
        }
    }
}
