//! Transactional room allocation.
//!
//! Each operation runs in exactly one store transaction. Any failure rolls
//! that transaction back explicitly before the error is returned, so a
//! request either lands completely or leaves no trace. Repeating an identical
//! `allocate` claims further rooms; callers must not retry blindly after a
//! successful reply.

use thiserror::Error;
use tracing::{debug, instrument, warn};

use central_protocol::{
    AllocateRequest, AllocateResponse, ConfirmRequest, ConfirmResponse, ProgramAllocation,
    ProgramDemand,
};

use crate::store::{AssignmentKey, Room, RoomKind, RoomStore, StoreError, StoreTransaction};

const ALLOCATION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::allocation");

/// Errors surfaced by the allocation engine.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// Reserving rooms for one program failed.
    #[error("allocation for program {program} failed: {source}")]
    Program {
        program: String,
        #[source]
        source: StoreError,
    },
    /// The store failed outside a program reservation.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AllocationError {
    fn program(program: &str, source: StoreError) -> Self {
        Self::Program {
            program: program.to_owned(),
            source,
        }
    }
}

/// Reserves and confirms rooms against a [`RoomStore`].
#[derive(Debug)]
pub struct AllocationEngine<S> {
    store: S,
}

impl<S> AllocationEngine<S>
where
    S: RoomStore,
{
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reserves the demanded rooms for every program in `request`.
    ///
    /// Programs are answered in request order. Adapted classrooms are
    /// reported under `adapted` and never repeated in `classrooms`.
    ///
    /// # Errors
    ///
    /// Returns an error, with nothing persisted, when any demand cannot be
    /// met or the store fails.
    #[instrument(
        skip_all,
        target = "centrald::allocation",
        fields(semester = %request.semester, faculty = %request.faculty, programs = request.programs.len())
    )]
    pub fn allocate(&self, request: &AllocateRequest) -> Result<AllocateResponse, AllocationError> {
        let programs = self.in_transaction(|tx| {
            for demand in &request.programs {
                let key = AssignmentKey::new(&request.semester, &request.faculty, &demand.name);
                reserve(tx, &key, demand)
                    .map_err(|source| AllocationError::program(&demand.name, source))?;
            }

            let mut programs = Vec::with_capacity(request.programs.len());
            for demand in &request.programs {
                let key = AssignmentKey::new(&request.semester, &request.faculty, &demand.name);
                let rooms = tx
                    .rooms_for(&key)
                    .map_err(|source| AllocationError::program(&demand.name, source))?;
                programs.push(partition(&demand.name, rooms));
            }
            Ok(programs)
        })?;

        debug!(
            target: ALLOCATION_TARGET,
            rooms = programs.iter().map(|p| p.rooms().count()).sum::<usize>(),
            "allocation committed"
        );
        Ok(AllocateResponse {
            semester: request.semester.clone(),
            faculty: request.faculty.clone(),
            programs,
        })
    }

    /// Accepts or releases the faculty's rooms for the semester.
    ///
    /// # Errors
    ///
    /// Returns an error when the faculty holds no rooms in the semester or
    /// the store fails.
    #[instrument(
        skip_all,
        target = "centrald::allocation",
        fields(semester = %request.semester, faculty = %request.faculty, accept = request.accept)
    )]
    pub fn confirm(&self, request: &ConfirmRequest) -> Result<ConfirmResponse, AllocationError> {
        let rooms = self.in_transaction(|tx| {
            Ok(tx.confirm(&request.semester, &request.faculty, request.accept)?)
        })?;
        Ok(ConfirmResponse {
            semester: request.semester.clone(),
            faculty: request.faculty.clone(),
            accepted: request.accept,
            rooms,
        })
    }

    fn in_transaction<T>(
        &self,
        work: impl FnOnce(&mut dyn StoreTransaction) -> Result<T, AllocationError>,
    ) -> Result<T, AllocationError> {
        let mut tx = self.store.begin()?;
        match work(tx.as_mut()) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback) = tx.rollback() {
                    warn!(
                        target: ALLOCATION_TARGET,
                        error = %rollback,
                        "rollback failed"
                    );
                }
                Err(error)
            }
        }
    }
}

fn reserve(
    tx: &mut dyn StoreTransaction,
    key: &AssignmentKey,
    demand: &ProgramDemand,
) -> Result<(), StoreError> {
    tx.allocate_rooms(key, RoomKind::Classroom, demand.classrooms)?;
    tx.allocate_rooms(key, RoomKind::Laboratory, demand.laboratories)
}

fn partition(program: &str, rooms: Vec<Room>) -> ProgramAllocation {
    let mut allocation = ProgramAllocation::empty(program);
    for room in rooms {
        match (room.kind, room.adapted) {
            (RoomKind::Classroom, true) => allocation.adapted.push(room.name),
            (RoomKind::Classroom, false) => allocation.classrooms.push(room.name),
            (RoomKind::Laboratory, _) => allocation.laboratories.push(room.name),
        }
    }
    allocation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MockRoomStore, MockStoreTransaction};
    use rstest::rstest;

    fn request(programs: &[(&str, u32, u32)]) -> AllocateRequest {
        AllocateRequest {
            semester: "2025-1".to_owned(),
            faculty: "Ciencias".to_owned(),
            programs: programs
                .iter()
                .map(|(name, classrooms, laboratories)| ProgramDemand {
                    name: (*name).to_owned(),
                    classrooms: *classrooms,
                    laboratories: *laboratories,
                })
                .collect(),
        }
    }

    fn store_with(tx: MockStoreTransaction) -> MockRoomStore {
        let mut store = MockRoomStore::new();
        let mut slot = Some(tx);
        store.expect_begin().times(1).returning(move || {
            let tx = slot.take().ok_or(StoreError::Finished)?;
            Ok(Box::new(tx) as Box<dyn StoreTransaction>)
        });
        store
    }

    #[rstest]
    fn partition_separates_adapted_classrooms() {
        let rooms = vec![
            Room::new("C-0009", RoomKind::Classroom, false),
            Room::new("C-0010", RoomKind::Classroom, true),
            Room::new("L-0001", RoomKind::Laboratory, false),
        ];
        let allocation = partition("Física", rooms);
        assert_eq!(allocation.classrooms, vec!["C-0009"]);
        assert_eq!(allocation.adapted, vec!["C-0010"]);
        assert_eq!(allocation.laboratories, vec!["L-0001"]);
    }

    #[rstest]
    fn failed_demand_rolls_back_without_commit() {
        let mut tx = MockStoreTransaction::new();
        tx.expect_allocate_rooms()
            .withf(|key, kind, _| key.program == "Física" && *kind == RoomKind::Classroom)
            .returning(|_, _, _| Ok(()));
        tx.expect_allocate_rooms()
            .withf(|key, kind, _| key.program == "Física" && *kind == RoomKind::Laboratory)
            .returning(|_, kind, count| {
                Err(StoreError::InsufficientRooms {
                    kind,
                    requested: count,
                    available: 0,
                })
            });
        tx.expect_rooms_for().never();
        tx.expect_commit().never();
        tx.expect_rollback().times(1).returning(|| Ok(()));

        let engine = AllocationEngine::new(store_with(tx));
        let error = engine
            .allocate(&request(&[("Física", 2, 1)]))
            .expect_err("laboratory shortage");
        assert!(matches!(error, AllocationError::Program { ref program, .. } if program == "Física"));
        assert!(error.to_string().contains("insufficient free laboratory rooms"));
    }

    #[rstest]
    fn commit_failure_is_reported() {
        let mut tx = MockStoreTransaction::new();
        tx.expect_confirm()
            .times(1)
            .returning(|_, _, _| Ok(4));
        tx.expect_commit()
            .times(1)
            .returning(|| Err(StoreError::Poisoned));
        tx.expect_rollback().never();

        let engine = AllocationEngine::new(store_with(tx));
        let error = engine
            .confirm(&ConfirmRequest {
                semester: "2025-1".to_owned(),
                faculty: "Ciencias".to_owned(),
                accept: true,
            })
            .expect_err("commit fails");
        assert!(matches!(error, AllocationError::Store(StoreError::Poisoned)));
    }

    #[rstest]
    fn results_follow_request_order() {
        let mut tx = MockStoreTransaction::new();
        tx.expect_allocate_rooms().returning(|_, _, _| Ok(()));
        tx.expect_rooms_for().returning(|key| {
            Ok(vec![Room::new(
                format!("{}-room", key.program),
                RoomKind::Classroom,
                false,
            )])
        });
        tx.expect_commit().times(1).returning(|| Ok(()));
        tx.expect_rollback().never();

        let engine = AllocationEngine::new(store_with(tx));
        let response = engine
            .allocate(&request(&[("Zoología", 1, 0), ("Astronomía", 1, 0)]))
            .expect("allocate");
        let names: Vec<_> = response.programs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Zoología", "Astronomía"]);
        assert_eq!(
            response.programs.first().map(|p| p.classrooms.clone()),
            Some(vec!["Zoología-room".to_owned()])
        );
    }
}
