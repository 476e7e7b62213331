use thiserror::Error;

#[derive(Error, Debug)]
pub enum CardError {
    #[error("Corrupt volume: no valid copy of the header, directory or allocation table")]
    CorruptVolume,

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Directory full: all {0} entry slots are in use")]
    DirectoryFull(usize),

    #[error("Insufficient space: {needed} blocks requested, {free} free")]
    InsufficientSpace { needed: u16, free: u16 },

    #[error("Invalid block chain starting at block {first}: expected {expected} blocks")]
    InvalidChain { first: u16, expected: u16 },

    #[error("Invalid handle: {0} no longer resolves to a directory entry")]
    InvalidHandle(String),

    #[error("Index out of range: {0}")]
    OutOfRange(u16),

    #[error("File already exists: {0}")]
    FileExists(String),

    #[error("File name too long: {0} bytes (max 32)")]
    NameTooLong(usize),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid card geometry: {0}")]
    InvalidGeometry(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, CardError>;
