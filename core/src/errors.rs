use thiserror::Error;

#[derive(Error, Debug)]
pub enum UdpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode message: {0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),
    #[error("Failed to decode message: {0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),
}
