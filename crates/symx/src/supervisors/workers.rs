//! 🧵 Workers: the ones who actually do the work while the Supervisor takes all
//! the credit in the sprint retro.
//!
//! - [`SourceWorker`]: feed → decode → translate → inbound channel.
//! - [`SinkWorker`]: outbound queue → resolve stream → post.
//!
//! ⚠️ Private to the supervisor. Nobody else spawns these.

use anyhow::Result;
use tokio::task::JoinHandle;

mod sink_worker;
mod source_worker;

pub(crate) use sink_worker::{FailurePolicy, SinkWorker};
pub(crate) use source_worker::SourceWorker;

/// 🏗️ A background worker, that does work. duh.
///
/// `start` consumes the worker and hands back its task. The task's `Result` is
/// how a worker tells its owner it died, instead of taking the process down with it.
pub(crate) trait Worker {
    fn start(self) -> JoinHandle<Result<()>>;
}
