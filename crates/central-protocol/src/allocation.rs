//! Typed payloads for the `allocate` and `confirm` routes.

use serde::{Deserialize, Serialize};

/// Rooms a single program needs for the semester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramDemand {
    /// Program name; becomes part of the assignment tuple.
    pub name: String,
    /// Number of ordinary classrooms requested.
    #[serde(default)]
    pub classrooms: u32,
    /// Number of laboratories requested.
    #[serde(default)]
    pub laboratories: u32,
}

/// Content of an `allocate` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateRequest {
    /// Academic semester, e.g. `2025-1`.
    pub semester: String,
    /// Requesting faculty.
    pub faculty: String,
    /// Per-program demands, answered in the same order.
    #[serde(default)]
    pub programs: Vec<ProgramDemand>,
}

/// Rooms reserved for one program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramAllocation {
    /// Program name.
    pub name: String,
    /// Ordinary classrooms.
    #[serde(default)]
    pub classrooms: Vec<String>,
    /// Laboratories.
    #[serde(default)]
    pub laboratories: Vec<String>,
    /// Accessibility-adapted classrooms; never repeated in `classrooms`.
    #[serde(default)]
    pub adapted: Vec<String>,
}

impl ProgramAllocation {
    /// Creates an empty allocation for `name`.
    #[must_use]
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Iterates every room name in the allocation.
    pub fn rooms(&self) -> impl Iterator<Item = &str> {
        self.classrooms
            .iter()
            .chain(&self.laboratories)
            .chain(&self.adapted)
            .map(String::as_str)
    }
}

/// Content of a successful `allocate` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateResponse {
    /// Echoed semester.
    pub semester: String,
    /// Echoed faculty.
    pub faculty: String,
    /// One entry per requested program, in request order.
    #[serde(default)]
    pub programs: Vec<ProgramAllocation>,
}

/// Content of a `confirm` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmRequest {
    /// Semester of the allocation being confirmed.
    pub semester: String,
    /// Faculty that owns the allocation.
    pub faculty: String,
    /// `true` keeps the rooms; `false` returns them to the free pool.
    pub accept: bool,
}

/// Content of a successful `confirm` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmResponse {
    /// Echoed semester.
    pub semester: String,
    /// Echoed faculty.
    pub faculty: String,
    /// Echoed decision.
    pub accepted: bool,
    /// Number of rooms confirmed or released.
    pub rooms: u32,
}
