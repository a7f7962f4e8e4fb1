//! Agent runtime: drives a chat turn from the model stream through tool
//! calls to its terminal state, pushing every step to the session.

pub mod confirm;
pub mod dispatch;
pub mod runtime;
pub mod tasks;

pub use confirm::{ConfirmationBroker, ConfirmationOutcome, ConfirmationRequest, Resolution};
pub use dispatch::{DispatchOutcome, ToolDispatcher, ToolError, ToolResult, TurnScope};
pub use runtime::{AgentRuntime, TurnRequest};
pub use tasks::{StreamTaskRegistry, TaskError};
