//! Domain model (IDs, status, task records, decisions, creation contract).

pub mod creation;
pub mod decision;
pub mod ids;
pub mod state;
pub mod task;

pub use creation::{CreateRequest, CreateResponse};
pub use decision::{decide, StatusReport, Transition, DEFAULT_COMPLETED_MESSAGE, TIMEOUT_MESSAGE};
pub use ids::{GraphId, TaskId};
pub use state::{StatusTag, TaskStatus, Tone};
pub use task::{Task, TaskKind, TaskPatch};
