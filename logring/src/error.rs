use thiserror::Error;

#[derive(Error, Debug)]
pub enum LogringError {
    #[error("ring buffer setup failed: {0}")]
    Ring(#[from] spscbuf::RingError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
