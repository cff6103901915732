//! Behavioural suites for the central server.

mod allocation_behaviour;
mod support;
