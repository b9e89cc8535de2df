//! Video projects and the in-process render queue.
//!
//! The queue is a process-local FIFO drained by one worker task. Pending
//! renders are lost on restart; only the project rows persist.

pub mod project;
pub mod queue;

pub use project::{InMemoryVideoProjectStore, VideoProject, VideoProjectStore, VideoStatus};
pub use queue::{
    RenderError, RenderJob, RenderQueue, RenderWorkerHandle, Renderer, SimulatedRenderer,
};
