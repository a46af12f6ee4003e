use thiserror::Error;

use crate::function::CallError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("method `{name}` not found on receiver")]
    MethodNotFound { name: String },

    #[error("a tick is already running")]
    TickInProgress,

    #[error("call in queue `{queue}` failed: {source}")]
    CallFailed {
        queue: String,
        #[source]
        source: CallError,
    },
}
