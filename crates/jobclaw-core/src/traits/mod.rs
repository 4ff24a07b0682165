pub mod handler;
pub mod store;
pub mod tool;

pub use handler::{Handler, HandlerError, HandlerOutput, InputValidator};
pub use store::{Store, StreamEntry};
pub use tool::{Tool, ToolError};
