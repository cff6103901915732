//! Postgres room store.
//!
//! Worker threads are plain OS threads, so the store owns a small tokio
//! runtime and blocks on it for each statement. Free rooms are claimed with
//! `FOR UPDATE SKIP LOCKED`, so concurrent transactions never wait on or
//! double-book each other's candidate rows.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tokio::runtime::{Builder, Runtime};
use tracing::{info, instrument};

use super::{
    AssignmentKey, Room, RoomKind, RoomStore, STORE_TARGET, StoreError, StoreTransaction,
};

const MAX_CONNECTIONS: u32 = 16;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
const RUNTIME_THREADS: usize = 2;

const CREATE_ROOMS: &str = r#"
    CREATE TABLE IF NOT EXISTS rooms (
        id SERIAL PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        kind TEXT NOT NULL CHECK (kind IN ('classroom', 'laboratory')),
        adapted BOOLEAN NOT NULL DEFAULT FALSE,
        semester TEXT,
        faculty TEXT,
        program TEXT,
        confirmed BOOLEAN NOT NULL DEFAULT FALSE
    )
"#;

const CREATE_ASSIGNMENT_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS rooms_assignment_idx ON rooms (semester, faculty, program)
"#;

const SEED_ROOMS: &str = r#"
    INSERT INTO rooms (name, kind, adapted)
    SELECT $1 || '-' || lpad(n::text, 4, '0'), $2, $3 AND n % 10 = 0
    FROM generate_series(1, $4::bigint) AS n
"#;

const CLAIM_ROOMS: &str = r#"
    WITH candidates AS (
        SELECT id FROM rooms
        WHERE kind = $1 AND semester IS NULL
        ORDER BY id
        LIMIT $2
        FOR UPDATE SKIP LOCKED
    )
    UPDATE rooms
    SET semester = $3, faculty = $4, program = $5, confirmed = FALSE
    FROM candidates
    WHERE rooms.id = candidates.id
    RETURNING rooms.name
"#;

const ROOMS_FOR: &str = r#"
    SELECT name, kind, adapted FROM rooms
    WHERE semester = $1 AND faculty = $2 AND program = $3
    ORDER BY id
"#;

const CONFIRM_ROOMS: &str = r#"
    UPDATE rooms SET confirmed = TRUE
    WHERE semester = $1 AND faculty = $2
"#;

const RELEASE_ROOMS: &str = r#"
    UPDATE rooms SET semester = NULL, faculty = NULL, program = NULL, confirmed = FALSE
    WHERE semester = $1 AND faculty = $2
"#;

/// [`RoomStore`] backed by a Postgres `rooms` table.
#[derive(Clone)]
pub struct PgRoomStore {
    pool: PgPool,
    runtime: Arc<Runtime>,
}

impl PgRoomStore {
    /// Connects to `database_url` and verifies the database answers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Runtime`] if the runtime cannot start and
    /// [`StoreError::Database`] if the database is unreachable.
    pub fn connect(database_url: &str) -> Result<Self, StoreError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(RUNTIME_THREADS)
            .thread_name("centrald-store")
            .enable_all()
            .build()
            .map_err(StoreError::Runtime)?;
        let pool = runtime.block_on(
            PgPoolOptions::new()
                .max_connections(MAX_CONNECTIONS)
                .acquire_timeout(ACQUIRE_TIMEOUT)
                .connect(database_url),
        )?;
        runtime.block_on(sqlx::query("SELECT 1").execute(&pool))?;
        info!(target: STORE_TARGET, "database connection established");
        Ok(Self {
            pool,
            runtime: Arc::new(runtime),
        })
    }

    /// Creates the `rooms` table and its index when missing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a statement fails.
    pub fn migrate(&self) -> Result<(), StoreError> {
        self.runtime.block_on(async {
            sqlx::query(CREATE_ROOMS).execute(&self.pool).await?;
            sqlx::query(CREATE_ASSIGNMENT_INDEX)
                .execute(&self.pool)
                .await?;
            Ok::<_, sqlx::Error>(())
        })?;
        Ok(())
    }

    /// Seeds an empty `rooms` table, returning the number of rows inserted.
    ///
    /// Nothing is inserted when the table already holds rooms.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a statement fails.
    #[instrument(skip(self), target = "centrald::store")]
    pub fn populate(&self, classrooms: u32, laboratories: u32) -> Result<u64, StoreError> {
        if classrooms == 0 && laboratories == 0 {
            return Ok(0);
        }
        let inserted = self.runtime.block_on(async {
            let mut tx = self.pool.begin().await?;
            let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rooms")
                .fetch_one(&mut *tx)
                .await?;
            if existing > 0 {
                tx.rollback().await?;
                return Ok::<_, sqlx::Error>(0);
            }
            let mut inserted = 0;
            for (prefix, kind, adaptable, count) in [
                ("C", RoomKind::Classroom, true, classrooms),
                ("L", RoomKind::Laboratory, false, laboratories),
            ] {
                inserted += sqlx::query(SEED_ROOMS)
                    .bind(prefix)
                    .bind(kind.as_str())
                    .bind(adaptable)
                    .bind(i64::from(count))
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
            }
            tx.commit().await?;
            Ok::<u64, sqlx::Error>(inserted)
        })?;
        info!(target: STORE_TARGET, inserted, "room table populated");
        Ok(inserted)
    }
}

impl RoomStore for PgRoomStore {
    fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.runtime.block_on(self.pool.begin())?;
        Ok(Box::new(PgTransaction {
            tx: Some(tx),
            runtime: Arc::clone(&self.runtime),
        }))
    }
}

#[derive(sqlx::FromRow)]
struct RoomRow {
    name: String,
    kind: String,
    adapted: bool,
}

/// Open database transaction.
///
/// Dropping one that was neither committed nor rolled back queues sqlx's
/// rollback and hands the connection back to the pool on the store's
/// runtime, so it is safe to drop from a plain worker thread.
struct PgTransaction {
    tx: Option<Transaction<'static, Postgres>>,
    runtime: Arc<Runtime>,
}

impl PgTransaction {
    fn open(&mut self) -> Result<&mut Transaction<'static, Postgres>, StoreError> {
        self.tx.as_mut().ok_or(StoreError::Finished)
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            // Returning the connection spawns onto the ambient runtime.
            let _runtime = self.runtime.enter();
            drop(tx);
        }
    }
}

impl StoreTransaction for PgTransaction {
    fn allocate_rooms(
        &mut self,
        key: &AssignmentKey,
        kind: RoomKind,
        count: u32,
    ) -> Result<(), StoreError> {
        if count == 0 {
            return Ok(());
        }
        let runtime = Arc::clone(&self.runtime);
        let tx = self.open()?;
        let claimed: Vec<String> = runtime.block_on(
            sqlx::query_scalar(CLAIM_ROOMS)
                .bind(kind.as_str())
                .bind(i64::from(count))
                .bind(&key.semester)
                .bind(&key.faculty)
                .bind(&key.program)
                .fetch_all(&mut **tx),
        )?;
        if claimed.len() < usize::try_from(count).unwrap_or(usize::MAX) {
            return Err(StoreError::InsufficientRooms {
                kind,
                requested: count,
                available: u32::try_from(claimed.len()).unwrap_or(u32::MAX),
            });
        }
        Ok(())
    }

    fn rooms_for(&mut self, key: &AssignmentKey) -> Result<Vec<Room>, StoreError> {
        let runtime = Arc::clone(&self.runtime);
        let tx = self.open()?;
        let rows: Vec<RoomRow> = runtime.block_on(
            sqlx::query_as(ROOMS_FOR)
                .bind(&key.semester)
                .bind(&key.faculty)
                .bind(&key.program)
                .fetch_all(&mut **tx),
        )?;
        rows.into_iter()
            .map(|row| -> Result<Room, StoreError> {
                Ok(Room {
                    kind: row.kind.parse()?,
                    name: row.name,
                    adapted: row.adapted,
                })
            })
            .collect()
    }

    fn confirm(&mut self, semester: &str, faculty: &str, accept: bool) -> Result<u32, StoreError> {
        let runtime = Arc::clone(&self.runtime);
        let tx = self.open()?;
        let statement = if accept { CONFIRM_ROOMS } else { RELEASE_ROOMS };
        let affected = runtime
            .block_on(
                sqlx::query(statement)
                    .bind(semester)
                    .bind(faculty)
                    .execute(&mut **tx),
            )?
            .rows_affected();
        if affected == 0 {
            return Err(StoreError::NoAllocation {
                semester: semester.to_owned(),
                faculty: faculty.to_owned(),
            });
        }
        Ok(u32::try_from(affected).unwrap_or(u32::MAX))
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::Finished)?;
        self.runtime.block_on(tx.commit())?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::Finished)?;
        self.runtime.block_on(tx.rollback())?;
        Ok(())
    }
}
