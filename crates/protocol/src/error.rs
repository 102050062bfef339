use thiserror::Error;

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while encoding, decoding or validating protocol messages.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to serialize a message.
    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    /// Failed to deserialize a message.
    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),

    /// The envelope carried a protocol version this build does not speak.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),

    /// A topic message did not have the `topic:publisher:payload:timestamp` shape.
    #[error("malformed topic message: {0}")]
    MalformedMessage(String),

    /// A topic or publisher id contained the field separator.
    #[error("invalid field `{field}`: {value:?} must be non-empty and must not contain ':'")]
    InvalidField {
        /// Which field was rejected.
        field: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A strategy name could not be parsed.
    #[error("unknown strategy `{0}`")]
    UnknownStrategy(String),
}
