use std::io;

#[derive(Debug, thiserror::Error)]
pub enum PublisherError {
    #[error("publisher is bound to a run loop on another thread")]
    ForeignRunLoop,

    #[error("unknown event publisher `{0}`")]
    UnknownPublisher(String),

    #[error("event publisher `{0}` is already running")]
    AlreadyRunning(&'static str),

    #[error("failed to spawn publisher thread: {0}")]
    Spawn(#[from] io::Error),
}
