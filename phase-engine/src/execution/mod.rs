// Execution Module
// Stage loader driving phase lists, and the progress events it publishes

pub mod driver;
pub mod events;

// Re-export key types
pub use driver::{DriverConfig, StageLoader};
pub use events::{progress_channel, EventSender, ExecutionEvent, ProgressReceiver, ProgressSender};
