//! CBOR codec with a versioned envelope.

use crate::error::{Error, Result};

use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Version written into every envelope.
pub const PROTOCOL_VERSION: u16 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u16,
    body: &'a T,
}

#[derive(Deserialize)]
struct Envelope<T> {
    version: u16,
    body: T,
}

/// Encode a value as plain CBOR bytes.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    let mut writer = Vec::new();
    ciborium::ser::into_writer(value, &mut writer)
        .map_err(|e| Error::SerializationFailed(e.to_string()))?;
    Ok(Bytes::from(writer))
}

/// Decode plain CBOR bytes.
///
/// # Errors
///
/// Returns an error if the data is not valid CBOR for `T`.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    ciborium::de::from_reader(data).map_err(|e| Error::DeserializationFailed(e.to_string()))
}

/// Encode a value inside a `{version, body}` envelope.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn encode_enveloped<T: Serialize>(value: &T) -> Result<Bytes> {
    encode(&EnvelopeRef {
        version: PROTOCOL_VERSION,
        body: value,
    })
}

/// Decode a value from a `{version, body}` envelope, rejecting unknown versions.
///
/// # Errors
///
/// Returns an error if the data is malformed or the version is unsupported.
pub fn decode_enveloped<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    let envelope: Envelope<T> = decode(data)?;

    if envelope.version != PROTOCOL_VERSION {
        return Err(Error::UnsupportedVersion(envelope.version));
    }

    Ok(envelope.body)
}
