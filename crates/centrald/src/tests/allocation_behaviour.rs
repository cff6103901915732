//! Transactional guarantees of the allocation engine over the in-memory store.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use rstest::{fixture, rstest};

use central_protocol::{AllocateRequest, ConfirmRequest, ProgramDemand};

use crate::allocation::{AllocationEngine, AllocationError};
use crate::store::{AssignmentKey, MemoryRoomStore, RoomKind, StoreError};

const SEMESTER: &str = "2025-2";

fn demand(name: &str, classrooms: u32, laboratories: u32) -> ProgramDemand {
    ProgramDemand {
        name: name.to_owned(),
        classrooms,
        laboratories,
    }
}

fn allocate(faculty: &str, programs: Vec<ProgramDemand>) -> AllocateRequest {
    AllocateRequest {
        semester: SEMESTER.to_owned(),
        faculty: faculty.to_owned(),
        programs,
    }
}

fn confirm(faculty: &str, accept: bool) -> ConfirmRequest {
    ConfirmRequest {
        semester: SEMESTER.to_owned(),
        faculty: faculty.to_owned(),
        accept,
    }
}

#[fixture]
fn engine() -> AllocationEngine<MemoryRoomStore> {
    AllocationEngine::new(MemoryRoomStore::populated(40, 8))
}

fn free(engine: &AllocationEngine<MemoryRoomStore>, kind: RoomKind) -> usize {
    engine.store().free_count(kind).expect("free count")
}

#[rstest]
fn concurrent_allocations_never_share_a_room() {
    let engine = Arc::new(AllocationEngine::new(MemoryRoomStore::populated(40, 8)));
    let handles: Vec<_> = (0..8)
        .map(|index| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let faculty = format!("Facultad {index}");
                engine.allocate(&allocate(&faculty, vec![demand("Programa", 5, 1)]))
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        let response = handle
            .join()
            .expect("allocation thread")
            .expect("allocation succeeds");
        for room in response.programs.iter().flat_map(|p| p.rooms()) {
            assert!(seen.insert(room.to_owned()), "room {room} allocated twice");
        }
    }
    assert_eq!(seen.len(), 48);
    assert_eq!(free(&engine, RoomKind::Classroom), 0);
    assert_eq!(free(&engine, RoomKind::Laboratory), 0);
}

#[rstest]
fn a_shortfall_in_any_program_leaves_nothing_behind(engine: AllocationEngine<MemoryRoomStore>) {
    let error = engine
        .allocate(&allocate(
            "Ingeniería",
            vec![demand("Sistemas", 10, 2), demand("Química", 5, 7)],
        ))
        .expect_err("laboratory shortfall");

    assert!(matches!(
        error,
        AllocationError::Program {
            ref program,
            source: StoreError::InsufficientRooms {
                kind: RoomKind::Laboratory,
                requested: 7,
                available: 6,
            },
        } if program == "Química"
    ));
    assert_eq!(free(&engine, RoomKind::Classroom), 40);
    assert_eq!(free(&engine, RoomKind::Laboratory), 8);
    let sistemas = AssignmentKey::new(SEMESTER, "Ingeniería", "Sistemas");
    assert!(engine.store().assigned_to(&sistemas).expect("assigned").is_empty());
}

#[rstest]
fn repeating_an_allocation_accumulates_rooms(engine: AllocationEngine<MemoryRoomStore>) {
    let request = allocate("Medicina", vec![demand("Enfermería", 6, 1)]);
    let first = engine.allocate(&request).expect("first allocation");
    let second = engine.allocate(&request).expect("second allocation");

    let first: HashSet<_> = first.programs.iter().flat_map(|p| p.rooms()).map(str::to_owned).collect();
    let second: HashSet<_> = second.programs.iter().flat_map(|p| p.rooms()).map(str::to_owned).collect();
    // The response lists every room now held by the tuple, old and new.
    assert_eq!(first.len(), 7);
    assert_eq!(second.len(), 14);
    assert!(first.is_subset(&second));
    assert_eq!(free(&engine, RoomKind::Classroom), 28);
    assert_eq!(free(&engine, RoomKind::Laboratory), 6);

    let key = AssignmentKey::new(SEMESTER, "Medicina", "Enfermería");
    assert_eq!(engine.store().assigned_to(&key).expect("assigned").len(), 14);
}

#[rstest]
fn programs_keep_request_order_and_adapted_rooms_are_separate(
    engine: AllocationEngine<MemoryRoomStore>,
) {
    let response = engine
        .allocate(&allocate(
            "Humanidades",
            vec![demand("Filosofía", 10, 0), demand("Historia", 0, 2), demand("Letras", 0, 0)],
        ))
        .expect("allocation");

    let names: Vec<_> = response.programs.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["Filosofía", "Historia", "Letras"]);

    let filosofia = response.programs.first().expect("first program");
    assert_eq!(filosofia.classrooms.len() + filosofia.adapted.len(), 10);
    assert!(filosofia.adapted.iter().all(|room| !filosofia.classrooms.contains(room)));

    let letras = response.programs.get(2).expect("third program");
    assert_eq!(letras.rooms().count(), 0);
}

#[rstest]
fn confirm_accept_keeps_rooms(engine: AllocationEngine<MemoryRoomStore>) {
    engine
        .allocate(&allocate("Derecho", vec![demand("Penal", 3, 1)]))
        .expect("allocation");
    let response = engine.confirm(&confirm("Derecho", true)).expect("confirm");
    assert!(response.accepted);
    assert_eq!(response.rooms, 4);
    assert_eq!(
        engine
            .store()
            .confirmed_rooms(SEMESTER, "Derecho")
            .expect("confirmed")
            .len(),
        4
    );
    assert_eq!(free(&engine, RoomKind::Classroom), 37);
}

#[rstest]
fn confirm_reject_returns_rooms_to_the_pool(engine: AllocationEngine<MemoryRoomStore>) {
    engine
        .allocate(&allocate("Economía", vec![demand("Finanzas", 5, 2)]))
        .expect("allocation");
    let response = engine.confirm(&confirm("Economía", false)).expect("reject");
    assert!(!response.accepted);
    assert_eq!(response.rooms, 7);
    assert_eq!(free(&engine, RoomKind::Classroom), 40);
    assert_eq!(free(&engine, RoomKind::Laboratory), 8);
}

#[rstest]
fn confirm_without_allocation_fails(engine: AllocationEngine<MemoryRoomStore>) {
    let error = engine
        .confirm(&confirm("Arquitectura", true))
        .expect_err("nothing to confirm");
    assert_eq!(
        error.to_string(),
        "no allocation found for faculty Arquitectura in semester 2025-2"
    );
}
