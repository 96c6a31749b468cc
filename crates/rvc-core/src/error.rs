use thiserror::Error;

pub type Result<T> = std::result::Result<T, RvcError>;

#[derive(Debug, Error)]
pub enum RvcError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("audio backend error: {0}")]
    Audio(String),
    #[error("chunk of {len} samples exceeds rolling buffer capacity {capacity}")]
    BufferOverflow { len: usize, capacity: usize },
    #[error("unsupported sample rate: {0} Hz")]
    UnsupportedRate(u32),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("converted segment too short: got {got} samples, need at least {need}")]
    InsufficientSegmentLength { got: usize, need: usize },
    #[error("device write failed: {0}")]
    DeviceWrite(String),
}
