//! Pipelit Config
//!
//! This crate contains the serializable entity and enum definitions shared
//! by every other crate in the workspace: workflow/node/edge shapes, the
//! execution and scheduled-job records, and the cross-cutting `ErrorCode`
//! taxonomy. None of these types know how to execute anything — they are
//! the data the rest of the workspace operates on.

mod edge;
mod entities;
mod error_code;
mod node;

pub use edge::{Edge, EdgeLabel, EdgeType};
pub use entities::{
  Epic, Execution, ExecutionLog, ExecutionStatus, ScheduledJob, ScheduledJobStatus, Workflow,
};
pub use error_code::ErrorCode;
pub use node::{ComponentType, Node, PortType};
