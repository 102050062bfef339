use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::error::{Error, Result};

const SEPARATOR: char = ':';

/// A message on a publish channel, framed as `topic:publisherId:payload:timestamp`.
///
/// The timestamp is milliseconds since the unix epoch. The payload may contain
/// the separator; the topic and publisher id may not.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TopicMessage {
    /// Topic tag, also the subscription prefix.
    pub topic: String,

    /// Id of the originating publisher.
    pub publisher_id: String,

    /// Application payload.
    pub payload: String,

    /// Send time as written by the publisher.
    pub timestamp: String,
}

impl TopicMessage {
    /// Builds a message, validating the tag fields.
    ///
    /// # Errors
    ///
    /// Returns an error if `topic` or `publisher_id` is empty or contains ':'.
    pub fn new(
        topic: impl Into<String>,
        publisher_id: impl Into<String>,
        payload: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Result<Self> {
        let topic = validate_field("topic", topic.into())?;
        let publisher_id = validate_field("publisher_id", publisher_id.into())?;

        Ok(Self {
            topic,
            publisher_id,
            payload: payload.into(),
            timestamp: timestamp.into(),
        })
    }

    /// Builds a message stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if `topic` or `publisher_id` is invalid.
    pub fn stamped(
        topic: impl Into<String>,
        publisher_id: impl Into<String>,
        payload: impl Into<String>,
    ) -> Result<Self> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();

        Self::new(topic, publisher_id, payload, millis.to_string())
    }

    /// The prefix a subscribe channel filters on for `topic`.
    #[must_use]
    pub fn topic_filter(topic: &str) -> Bytes {
        Bytes::from(format!("{topic}{SEPARATOR}"))
    }

    /// Frames the message for the wire.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        Bytes::from(format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}",
            self.topic, self.publisher_id, self.payload, self.timestamp
        ))
    }

    /// Parses a framed message.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not UTF-8 or lack one of the four fields.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::MalformedMessage(format!("not utf-8: {e}")))?;

        let mut head = text.splitn(3, SEPARATOR);
        let (Some(topic), Some(publisher_id), Some(rest)) = (head.next(), head.next(), head.next())
        else {
            return Err(Error::MalformedMessage(text.to_string()));
        };

        let Some((payload, timestamp)) = rest.rsplit_once(SEPARATOR) else {
            return Err(Error::MalformedMessage(text.to_string()));
        };

        Self::new(topic, publisher_id, payload, timestamp)
    }

    /// When the publisher sent the message, if the timestamp is numeric.
    #[must_use]
    pub fn sent_at(&self) -> Option<SystemTime> {
        let millis = self.timestamp.parse::<u64>().ok()?;
        UNIX_EPOCH.checked_add(Duration::from_millis(millis))
    }

    /// Time elapsed since the message was sent.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        SystemTime::now().duration_since(self.sent_at()?).ok()
    }
}

fn validate_field(field: &'static str, value: String) -> Result<String> {
    if value.is_empty() || value.contains(SEPARATOR) {
        return Err(Error::InvalidField { field, value });
    }

    Ok(value)
}
