//! Process-local room store.
//!
//! Rows live behind one mutex. An open transaction claims the rows it touches
//! so concurrent transactions skip them, and its changes are buffered until
//! commit, which gives the same read-committed, skip-locked behaviour the
//! Postgres store relies on.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::{
    AssignmentKey, Room, RoomKind, RoomStore, STORE_TARGET, StoreError, StoreTransaction,
    seed_rooms,
};

#[derive(Debug, Clone)]
struct Assignment {
    key: AssignmentKey,
    confirmed: bool,
}

#[derive(Debug)]
struct Row {
    room: Room,
    assignment: Option<Assignment>,
    claimed_by: Option<u64>,
}

#[derive(Debug, Default)]
struct State {
    rows: Vec<Row>,
    next_transaction: u64,
}

/// In-memory [`RoomStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryRoomStore {
    state: Arc<Mutex<State>>,
}

impl MemoryRoomStore {
    /// Creates a store holding `rooms`, all free.
    #[must_use]
    pub fn with_rooms(rooms: impl IntoIterator<Item = Room>) -> Self {
        let rows = rooms
            .into_iter()
            .map(|room| Row {
                room,
                assignment: None,
                claimed_by: None,
            })
            .collect();
        Self {
            state: Arc::new(Mutex::new(State {
                rows,
                next_transaction: 1,
            })),
        }
    }

    /// Creates a store seeded with numbered classrooms and laboratories.
    #[must_use]
    pub fn populated(classrooms: u32, laboratories: u32) -> Self {
        Self::with_rooms(seed_rooms(classrooms, laboratories))
    }

    /// Committed free rooms of `kind`.
    pub fn free_count(&self, kind: RoomKind) -> Result<usize, StoreError> {
        let state = self.lock()?;
        Ok(state
            .rows
            .iter()
            .filter(|row| row.room.kind == kind && row.assignment.is_none())
            .count())
    }

    /// Names of the committed rooms assigned to `key`.
    pub fn assigned_to(&self, key: &AssignmentKey) -> Result<Vec<String>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .rows
            .iter()
            .filter(|row| row.assignment.as_ref().is_some_and(|a| &a.key == key))
            .map(|row| row.room.name.clone())
            .collect())
    }

    /// Names of the committed, confirmed rooms held by the faculty.
    pub fn confirmed_rooms(&self, semester: &str, faculty: &str) -> Result<Vec<String>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .rows
            .iter()
            .filter(|row| {
                row.assignment.as_ref().is_some_and(|a| {
                    a.confirmed && a.key.semester == semester && a.key.faculty == faculty
                })
            })
            .map(|row| row.room.name.clone())
            .collect())
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl RoomStore for MemoryRoomStore {
    fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let id = {
            let mut state = self.lock()?;
            let id = state.next_transaction;
            state.next_transaction += 1;
            id
        };
        Ok(Box::new(MemoryTransaction {
            id,
            state: Arc::clone(&self.state),
            pending: Vec::new(),
            finished: false,
        }))
    }
}

#[derive(Debug)]
enum Change {
    Assign { row: usize, key: AssignmentKey },
    Confirm { row: usize },
    Release { row: usize },
}

impl Change {
    fn row(&self) -> usize {
        match self {
            Self::Assign { row, .. } | Self::Confirm { row } | Self::Release { row } => *row,
        }
    }
}

struct MemoryTransaction {
    id: u64,
    state: Arc<Mutex<State>>,
    pending: Vec<Change>,
    finished: bool,
}

impl MemoryTransaction {
    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        if self.finished {
            return Err(StoreError::Finished);
        }
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    fn claimable(&self, row: &Row) -> bool {
        row.claimed_by.is_none_or(|owner| owner == self.id)
    }

    /// The assignment this transaction currently sees for `index`.
    fn visible_assignment(&self, state: &State, index: usize) -> Option<AssignmentKey> {
        let mut key = state
            .rows
            .get(index)
            .and_then(|row| row.assignment.as_ref())
            .map(|assignment| assignment.key.clone());
        for change in self.pending.iter().filter(|change| change.row() == index) {
            match change {
                Change::Assign { key: assigned, .. } => key = Some(assigned.clone()),
                Change::Release { .. } => key = None,
                Change::Confirm { .. } => {}
            }
        }
        key
    }

    fn release_claims(&mut self) -> Result<(), StoreError> {
        let id = self.id;
        let mut state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        for row in &mut state.rows {
            if row.claimed_by == Some(id) {
                row.claimed_by = None;
            }
        }
        Ok(())
    }
}

impl StoreTransaction for MemoryTransaction {
    fn allocate_rooms(
        &mut self,
        key: &AssignmentKey,
        kind: RoomKind,
        count: u32,
    ) -> Result<(), StoreError> {
        if count == 0 {
            return Ok(());
        }
        let mut state = self.lock()?;
        let wanted = usize::try_from(count).unwrap_or(usize::MAX);
        let candidates: Vec<usize> = state
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| {
                row.room.kind == kind && row.assignment.is_none() && row.claimed_by.is_none()
            })
            .map(|(index, _)| index)
            .take(wanted)
            .collect();
        if candidates.len() < wanted {
            return Err(StoreError::InsufficientRooms {
                kind,
                requested: count,
                available: u32::try_from(candidates.len()).unwrap_or(u32::MAX),
            });
        }
        for &index in &candidates {
            if let Some(row) = state.rows.get_mut(index) {
                row.claimed_by = Some(self.id);
            }
        }
        drop(state);
        self.pending
            .extend(candidates.into_iter().map(|row| Change::Assign {
                row,
                key: key.clone(),
            }));
        Ok(())
    }

    fn rooms_for(&mut self, key: &AssignmentKey) -> Result<Vec<Room>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .rows
            .iter()
            .enumerate()
            .filter(|(index, _)| self.visible_assignment(&state, *index).as_ref() == Some(key))
            .map(|(_, row)| row.room.clone())
            .collect())
    }

    fn confirm(&mut self, semester: &str, faculty: &str, accept: bool) -> Result<u32, StoreError> {
        let mut state = self.lock()?;
        let matching: Vec<usize> = state
            .rows
            .iter()
            .enumerate()
            .filter(|(index, row)| {
                self.claimable(row)
                    && self
                        .visible_assignment(&state, *index)
                        .is_some_and(|key| key.semester == semester && key.faculty == faculty)
            })
            .map(|(index, _)| index)
            .collect();
        if matching.is_empty() {
            return Err(StoreError::NoAllocation {
                semester: semester.to_owned(),
                faculty: faculty.to_owned(),
            });
        }
        for &index in &matching {
            if let Some(row) = state.rows.get_mut(index) {
                row.claimed_by = Some(self.id);
            }
        }
        drop(state);
        let affected = u32::try_from(matching.len()).unwrap_or(u32::MAX);
        self.pending.extend(matching.into_iter().map(|row| {
            if accept {
                Change::Confirm { row }
            } else {
                Change::Release { row }
            }
        }));
        Ok(affected)
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::Finished);
        }
        let mut state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        for change in self.pending.drain(..) {
            let Some(row) = state.rows.get_mut(change.row()) else {
                continue;
            };
            match change {
                Change::Assign { key, .. } => {
                    row.assignment = Some(Assignment {
                        key,
                        confirmed: false,
                    });
                }
                Change::Confirm { .. } => {
                    if let Some(assignment) = row.assignment.as_mut() {
                        assignment.confirmed = true;
                    }
                }
                Change::Release { .. } => row.assignment = None,
            }
        }
        let id = self.id;
        for row in &mut state.rows {
            if row.claimed_by == Some(id) {
                row.claimed_by = None;
            }
        }
        drop(state);
        self.finished = true;
        debug!(target: STORE_TARGET, transaction = id, "memory transaction committed");
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::Finished);
        }
        self.pending.clear();
        self.finished = true;
        self.release_claims()
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.rollback();
        }
    }
}
