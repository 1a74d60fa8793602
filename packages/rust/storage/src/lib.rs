//! Record persistence: a CSV flat file or an embedded libSQL database.
//!
//! Both sinks implement [`RecordSink`]. The [`Storage`] struct additionally
//! keeps one row per harvest run and upserts listings by URL, so repeated
//! runs refresh existing rows instead of duplicating them.

mod csv_sink;
mod migrations;

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database, Row, params};
use listingscout_shared::{ListingRecord, ListingScoutError, RecordId, Result};
use tracing::{debug, info};

pub use csv_sink::CsvSink;

/// Destination for extracted records.
#[async_trait]
pub trait RecordSink: Send {
    /// Write `records`, returning how many were written.
    async fn persist(&mut self, records: &[ListingRecord]) -> Result<usize>;
}

/// Whether `path` names a database (`.db`, `.sqlite`, `.sqlite3`) rather than a CSV file.
pub fn is_database_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "db" | "sqlite" | "sqlite3"))
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    active_run: Option<String>,
}

impl Storage {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ListingScoutError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_error)?;
        let conn = db.connect().map_err(storage_error)?;

        let storage = Self {
            db,
            conn,
            active_run: None,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        ListingScoutError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Run operations
    // -----------------------------------------------------------------------

    /// Record the start of a run. Listings persisted afterwards are linked to it.
    pub async fn insert_run(&mut self, id: &str, listing_url: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO runs (id, listing_url, started_at) VALUES (?1, ?2, ?3)",
                params![id, listing_url, now.as_str()],
            )
            .await
            .map_err(storage_error)?;
        self.active_run = Some(id.to_string());
        Ok(())
    }

    /// Mark a run finished with its summary statistics.
    pub async fn finish_run(&mut self, id: &str, stats_json: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, id],
            )
            .await
            .map_err(storage_error)?;
        if self.active_run.as_deref() == Some(id) {
            self.active_run = None;
        }
        Ok(())
    }

    /// Get a run's `(listing_url, finished_at, stats_json)`.
    pub async fn get_run(
        &self,
        id: &str,
    ) -> Result<Option<(String, Option<String>, Option<String>)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT listing_url, finished_at, stats_json FROM runs WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(storage_error)?;

        match rows.next().await.map_err(storage_error)? {
            Some(row) => Ok(Some((
                row.get::<String>(0).map_err(storage_error)?,
                row.get::<Option<String>>(1).map_err(storage_error)?,
                row.get::<Option<String>>(2).map_err(storage_error)?,
            ))),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Listing operations
    // -----------------------------------------------------------------------

    /// Insert a listing, or refresh the existing row with the same URL.
    pub async fn upsert_listing(&self, record: &ListingRecord, run_id: Option<&str>) -> Result<()> {
        let [id, url, title, price, location, publication_time, seller, category, description, breadcrumb, properties, equipments, images] =
            record.to_row();
        let now = Utc::now().to_rfc3339();

        self.conn
            .execute(
                "INSERT INTO listings (id, url, title, price, location, publication_time, seller,
                                       category, description, breadcrumb, properties, equipments,
                                       images, run_id, scraped_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(url) DO UPDATE SET
                   title = excluded.title,
                   price = excluded.price,
                   location = excluded.location,
                   publication_time = excluded.publication_time,
                   seller = excluded.seller,
                   category = excluded.category,
                   description = excluded.description,
                   breadcrumb = excluded.breadcrumb,
                   properties = excluded.properties,
                   equipments = excluded.equipments,
                   images = excluded.images,
                   run_id = excluded.run_id,
                   scraped_at = excluded.scraped_at",
                params![
                    id,
                    url,
                    title,
                    price,
                    location,
                    publication_time,
                    seller,
                    category,
                    description,
                    breadcrumb,
                    properties,
                    equipments,
                    images,
                    run_id,
                    now,
                ],
            )
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    /// All listings, ordered by URL.
    pub async fn list_listings(&self) -> Result<Vec<ListingRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, url, title, price, location, publication_time, seller, category,
                        description, breadcrumb, properties, equipments, images
                 FROM listings ORDER BY url",
                params![],
            )
            .await
            .map_err(storage_error)?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_error)? {
            records.push(record_from_row(&row)?);
        }
        Ok(records)
    }

    /// Number of stored listings.
    pub async fn count_listings(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM listings", params![])
            .await
            .map_err(storage_error)?;

        match rows.next().await.map_err(storage_error)? {
            Some(row) => row.get::<u64>(0).map_err(storage_error),
            None => Ok(0),
        }
    }
}

#[async_trait]
impl RecordSink for Storage {
    async fn persist(&mut self, records: &[ListingRecord]) -> Result<usize> {
        let run_id = self.active_run.clone();
        for record in records {
            self.upsert_listing(record, run_id.as_deref()).await?;
        }
        debug!(rows = records.len(), "listings upserted");
        Ok(records.len())
    }
}

fn record_from_row(row: &Row) -> Result<ListingRecord> {
    let text = |idx: i32| row.get::<String>(idx).map_err(storage_error);
    let id: RecordId = text(0)?
        .parse()
        .map_err(|e| ListingScoutError::Storage(format!("bad listing id: {e}")))?;

    Ok(ListingRecord {
        id,
        url: text(1)?,
        title: text(2)?,
        price: text(3)?,
        location: text(4)?,
        publication_time: text(5)?,
        seller: text(6)?,
        category: text(7)?,
        description: text(8)?,
        breadcrumb: json_column(&text(9)?)?,
        properties: json_column::<BTreeMap<String, String>>(&text(10)?)?,
        equipments: json_column(&text(11)?)?,
        images: json_column(&text(12)?)?,
    })
}

fn json_column<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| ListingScoutError::parse(format!("bad JSON column: {e}")))
}

fn storage_error(e: libsql::Error) -> ListingScoutError {
    ListingScoutError::Storage(e.to_string())
}
