//! Room stores backing the allocation engine.
//!
//! A store hands out [`StoreTransaction`]s. Everything done through one
//! transaction becomes visible to others only after [`StoreTransaction::commit`];
//! rooms claimed by an open transaction are skipped by concurrent ones, which
//! keeps concurrent reservations disjoint. Dropping a transaction without
//! committing rolls it back.

mod memory;
mod postgres;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

pub use self::memory::MemoryRoomStore;
pub use self::postgres::PgRoomStore;

const STORE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::store");

/// Physical category of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomKind {
    /// Ordinary classroom; may be accessibility-adapted.
    Classroom,
    /// Laboratory.
    Laboratory,
}

impl RoomKind {
    /// Canonical lowercase label, also used as the database value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classroom => "classroom",
            Self::Laboratory => "laboratory",
        }
    }

    fn name_prefix(self) -> char {
        match self {
            Self::Classroom => 'C',
            Self::Laboratory => 'L',
        }
    }
}

impl fmt::Display for RoomKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Error returned when parsing a room kind fails.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unsupported room kind: {0}")]
pub struct RoomKindParseError(String);

impl FromStr for RoomKind {
    type Err = RoomKindParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "classroom" => Ok(Self::Classroom),
            "laboratory" => Ok(Self::Laboratory),
            _ => Err(RoomKindParseError(value.to_owned())),
        }
    }
}

/// A bookable room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub name: String,
    pub kind: RoomKind,
    pub adapted: bool,
}

impl Room {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: RoomKind, adapted: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            adapted,
        }
    }

    /// The `number`-th seeded room of `kind`. Every tenth classroom is
    /// adapted.
    #[must_use]
    pub fn seeded(kind: RoomKind, number: u32) -> Self {
        let adapted = kind == RoomKind::Classroom && number % 10 == 0;
        Self::new(format!("{}-{number:04}", kind.name_prefix()), kind, adapted)
    }
}

/// Owner of an assigned room.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssignmentKey {
    pub semester: String,
    pub faculty: String,
    pub program: String,
}

impl AssignmentKey {
    #[must_use]
    pub fn new(
        semester: impl Into<String>,
        faculty: impl Into<String>,
        program: impl Into<String>,
    ) -> Self {
        Self {
            semester: semester.into(),
            faculty: faculty.into(),
            program: program.into(),
        }
    }
}

/// Errors surfaced by room stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Fewer free rooms than requested.
    #[error("insufficient free {kind} rooms: requested {requested}, available {available}")]
    InsufficientRooms {
        kind: RoomKind,
        requested: u32,
        available: u32,
    },
    /// Nothing is assigned to the faculty in the semester.
    #[error("no allocation found for faculty {faculty} in semester {semester}")]
    NoAllocation { semester: String, faculty: String },
    /// The transaction was already committed or rolled back.
    #[error("transaction already finished")]
    Finished,
    /// A stored row holds an unknown room kind.
    #[error("corrupt room row: {0}")]
    CorruptRow(#[from] RoomKindParseError),
    /// The database rejected an operation.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// The store runtime could not be created.
    #[error("failed to start store runtime: {0}")]
    Runtime(#[source] std::io::Error),
    /// Shared state was poisoned by a panicking thread.
    #[error("room store lock poisoned")]
    Poisoned,
}

/// Source of transactions over the room pool.
#[cfg_attr(test, mockall::automock)]
pub trait RoomStore: Send + Sync {
    /// Opens a transaction.
    fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

/// One unit of work against the room pool.
#[cfg_attr(test, mockall::automock)]
pub trait StoreTransaction: Send {
    /// Claims `count` free rooms of `kind` and tags them with `key`.
    ///
    /// Fails with [`StoreError::InsufficientRooms`] without claiming anything
    /// when fewer than `count` rooms are free.
    fn allocate_rooms(
        &mut self,
        key: &AssignmentKey,
        kind: RoomKind,
        count: u32,
    ) -> Result<(), StoreError>;

    /// Rooms tagged with `key`, including this transaction's own claims.
    fn rooms_for(&mut self, key: &AssignmentKey) -> Result<Vec<Room>, StoreError>;

    /// Confirms (`accept`) or releases every room assigned to the faculty in
    /// the semester, returning how many rooms were affected.
    fn confirm(&mut self, semester: &str, faculty: &str, accept: bool) -> Result<u32, StoreError>;

    /// Publishes the transaction's changes.
    fn commit(&mut self) -> Result<(), StoreError>;

    /// Discards the transaction's changes.
    fn rollback(&mut self) -> Result<(), StoreError>;
}

impl<T> RoomStore for Arc<T>
where
    T: RoomStore + ?Sized,
{
    fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        (**self).begin()
    }
}

impl<T> RoomStore for Box<T>
where
    T: RoomStore + ?Sized,
{
    fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        (**self).begin()
    }
}

fn seed_rooms(classrooms: u32, laboratories: u32) -> impl Iterator<Item = Room> {
    let classrooms = (1..=classrooms).map(|number| Room::seeded(RoomKind::Classroom, number));
    let laboratories = (1..=laboratories).map(|number| Room::seeded(RoomKind::Laboratory, number));
    classrooms.chain(laboratories)
}
