//! RecordStoreActor - durable processing records keyed by conversation id
//!
//! Records are plain values: every write replaces the whole row, so the
//! controller computes the next record with the transitions on
//! [`ProcessingRecord`] and stores the result. The actor serializes access;
//! the last write for an id wins.
//!
//! Backed by SQLite through sqlx. File databases survive restarts; the
//! in-memory variant is for tests.
//!
//! ```rust,ignore
//! let (store, _handle) = Actor::spawn(
//!     None,
//!     RecordStoreActor,
//!     RecordStoreArguments::File("sqlite:./data/convo-sync.db".to_string()),
//! ).await?;
//!
//! let record = ensure_record(&store, "conv-1").await?;
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use shared_types::{ProcessingRecord, ProcessingStatus, SimilarUserMatch, TransitionError};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

#[derive(Debug, Default)]
pub struct RecordStoreActor;

#[derive(Debug, Clone)]
pub enum RecordStoreArguments {
    /// `sqlite:` URL or bare path of a database file
    File(String),
    /// In-memory database (for testing)
    InMemory,
}

pub struct RecordStoreState {
    pool: SqlitePool,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
    #[error("no attempt running for {id} with content {hash}")]
    NoAttempt { id: String, hash: String },
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug)]
pub enum RecordStoreMsg {
    Get {
        id: String,
        reply: RpcReplyPort<Result<Option<ProcessingRecord>, StoreError>>,
    },
    /// Insert or fully replace the record with `record.id`.
    Put {
        record: ProcessingRecord,
        reply: RpcReplyPort<Result<(), StoreError>>,
    },
    /// All records, most recently written first.
    List {
        reply: RpcReplyPort<Result<Vec<ProcessingRecord>, StoreError>>,
    },
}

impl RecordStoreActor {
    async fn open(args: RecordStoreArguments) -> Result<SqlitePool, StoreError> {
        let pool = match args {
            RecordStoreArguments::File(url) => {
                let file_path = PathBuf::from(url.strip_prefix("sqlite:").unwrap_or(&url));
                if let Some(parent) = file_path.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent)
                            .await
                            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
                    }
                }
                tracing::info!(database_path = %file_path.display(), "Opening file-based database");
                SqlitePool::connect_with(
                    SqliteConnectOptions::new()
                        .filename(&file_path)
                        .create_if_missing(true),
                )
                .await?
            }
            RecordStoreArguments::InMemory => {
                tracing::info!("Opening in-memory database");
                // A single connection that is never recycled; each new
                // connection to `:memory:` would see an empty database.
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect("sqlite::memory:")
                    .await?
            }
        };

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("migration failed: {e}")))?;
        Ok(pool)
    }
}

#[async_trait]
impl Actor for RecordStoreActor {
    type Msg = RecordStoreMsg;
    type State = RecordStoreState;
    type Arguments = RecordStoreArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            "RecordStoreActor starting"
        );

        let pool = Self::open(args)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("Failed to open database: {e}")))?;

        Ok(RecordStoreState { pool })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            "RecordStoreActor started successfully"
        );
        Ok(())
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            RecordStoreMsg::Get { id, reply } => {
                let result = self.handle_get(&id, state).await;
                let _ = reply.send(result);
            }
            RecordStoreMsg::Put { record, reply } => {
                let result = self.handle_put(&record, state).await;
                let _ = reply.send(result);
            }
            RecordStoreMsg::List { reply } => {
                let result = self.handle_list(state).await;
                let _ = reply.send(result);
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.pool.close().await;
        tracing::info!(
            actor_id = %myself.get_id(),
            "RecordStoreActor stopped"
        );
        Ok(())
    }
}

impl RecordStoreActor {
    async fn handle_get(
        &self,
        id: &str,
        state: &mut RecordStoreState,
    ) -> Result<Option<ProcessingRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, status, content_hash, last_processed, similar_users, error
             FROM processing_records WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&state.pool)
        .await?;

        row.map(|row| record_from_row(&row)).transpose()
    }

    async fn handle_put(
        &self,
        record: &ProcessingRecord,
        state: &mut RecordStoreState,
    ) -> Result<(), StoreError> {
        let similar_users = record
            .similar_users
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO processing_records
                (id, status, content_hash, last_processed, similar_users, error, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                content_hash = excluded.content_hash,
                last_processed = excluded.last_processed,
                similar_users = excluded.similar_users,
                error = excluded.error,
                updated_at = excluded.updated_at",
        )
        .bind(&record.id)
        .bind(record.status.as_str())
        .bind(&record.content_hash)
        .bind(record.last_processed.map(|ts| ts.to_rfc3339()))
        .bind(similar_users)
        .bind(&record.error)
        .bind(Utc::now().to_rfc3339())
        .execute(&state.pool)
        .await?;

        tracing::debug!(
            conversation_id = %record.id,
            status = %record.status,
            content_hash = ?record.content_hash,
            "Processing record written"
        );
        Ok(())
    }

    async fn handle_list(
        &self,
        state: &mut RecordStoreState,
    ) -> Result<Vec<ProcessingRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, status, content_hash, last_processed, similar_users, error
             FROM processing_records ORDER BY updated_at DESC, id ASC",
        )
        .fetch_all(&state.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: &SqliteRow) -> Result<ProcessingRecord, StoreError> {
    let id: String = row.get("id");

    let status_raw: String = row.get("status");
    let status = ProcessingStatus::parse(&status_raw).ok_or_else(|| StoreError::Corrupt {
        id: id.clone(),
        reason: format!("unknown status '{status_raw}'"),
    })?;

    let last_processed = row
        .get::<Option<String>, _>("last_processed")
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| StoreError::Corrupt {
                    id: id.clone(),
                    reason: format!("bad timestamp '{raw}': {e}"),
                })
        })
        .transpose()?;

    let similar_users = row
        .get::<Option<String>, _>("similar_users")
        .map(|raw| serde_json::from_str::<Vec<SimilarUserMatch>>(&raw))
        .transpose()?;

    Ok(ProcessingRecord {
        id,
        status,
        content_hash: row.get("content_hash"),
        last_processed,
        similar_users,
        error: row.get("error"),
    })
}

// ============================================================================
// Helper Functions
// ============================================================================

fn unavailable(e: ractor::RactorErr<RecordStoreMsg>) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

pub async fn get_record(
    store: &ActorRef<RecordStoreMsg>,
    id: impl Into<String>,
) -> Result<Option<ProcessingRecord>, StoreError> {
    let id = id.into();
    ractor::call!(store, |reply| RecordStoreMsg::Get { id, reply }).map_err(unavailable)?
}

pub async fn put_record(
    store: &ActorRef<RecordStoreMsg>,
    record: ProcessingRecord,
) -> Result<(), StoreError> {
    ractor::call!(store, |reply| RecordStoreMsg::Put { record, reply }).map_err(unavailable)?
}

pub async fn list_records(
    store: &ActorRef<RecordStoreMsg>,
) -> Result<Vec<ProcessingRecord>, StoreError> {
    ractor::call!(store, |reply| RecordStoreMsg::List { reply }).map_err(unavailable)?
}

/// Existing record for `id`, or a freshly written idle one.
pub async fn ensure_record(
    store: &ActorRef<RecordStoreMsg>,
    id: impl Into<String>,
) -> Result<ProcessingRecord, StoreError> {
    let id = id.into();
    if let Some(existing) = get_record(store, id.clone()).await? {
        return Ok(existing);
    }
    let record = ProcessingRecord::idle(id);
    put_record(store, record.clone()).await?;
    Ok(record)
}

/// Move `id` to `Processing` for `hash`. Returns the stored record.
pub async fn mark_processing(
    store: &ActorRef<RecordStoreMsg>,
    id: impl Into<String>,
    hash: impl Into<String>,
) -> Result<ProcessingRecord, StoreError> {
    let id = id.into();
    let current = get_record(store, id.clone())
        .await?
        .unwrap_or_else(|| ProcessingRecord::idle(id));
    let next = current.begin(hash, Utc::now());
    put_record(store, next.clone()).await?;
    Ok(next)
}

/// The stored attempt for `id`, which must be `Processing` for `hash`.
async fn running_attempt(
    store: &ActorRef<RecordStoreMsg>,
    id: String,
    hash: &str,
) -> Result<ProcessingRecord, StoreError> {
    match get_record(store, id.clone()).await? {
        Some(record) if record.content_hash.as_deref() == Some(hash) => Ok(record),
        _ => Err(StoreError::NoAttempt {
            id,
            hash: hash.to_string(),
        }),
    }
}

pub async fn mark_completed(
    store: &ActorRef<RecordStoreMsg>,
    id: impl Into<String>,
    hash: &str,
    matches: Vec<SimilarUserMatch>,
) -> Result<ProcessingRecord, StoreError> {
    let current = running_attempt(store, id.into(), hash).await?;
    let next = current.complete(matches, Utc::now())?;
    put_record(store, next.clone()).await?;
    Ok(next)
}

pub async fn mark_failed(
    store: &ActorRef<RecordStoreMsg>,
    id: impl Into<String>,
    hash: &str,
    error: impl Into<String>,
) -> Result<ProcessingRecord, StoreError> {
    let current = running_attempt(store, id.into(), hash).await?;
    let next = current.fail(error, Utc::now())?;
    put_record(store, next.clone()).await?;
    Ok(next)
}

// ============================================================================
// Tests
// ============================================================================
