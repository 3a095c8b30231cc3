//! The guest-task and synchronization core: task table, futex engine, and
//! `/proc` projection (see each module's docs for the component it
//! implements).
//!
//! Every process-wide piece of state here (the task table, a given
//! [`futex::FutexTable`]) is a plain value a caller constructs and owns —
//! there is no hidden global/static initialization to worry about in
//! tests.

pub mod collab;
pub mod config;
pub mod futex;
pub mod mm;
pub mod procfs;
pub mod resources;
pub mod session;
pub mod task;
