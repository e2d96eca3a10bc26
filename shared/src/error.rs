use thiserror::Error;

/// Failures while reading a payload. Every variant means the packet is malformed and must be
/// dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload ended after {available} bits, {requested} more were requested")]
    UnexpectedEnd { requested: u32, available: u32 },
    #[error("value {value} is not a defined {name}")]
    InvalidEnum { name: &'static str, value: u32 },
    #[error("string length {len} exceeds the maximum of {max}")]
    StringTooLong { len: usize, max: usize },
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
}

/// Failures while building a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("string of {len} bytes exceeds the maximum of {max}")]
    StringTooLong { len: usize, max: usize },
    #[error("list of {len} entries exceeds the maximum of {max}")]
    ListTooLong { len: usize, max: usize },
}
