use relay_protocol::{Identity, LookupResponse, RegisterResponse, TopicMessage};

/// Application callbacks, invoked synchronously from a participant's event
/// loop. Every method has a no-op default.
pub trait ParticipantHandler: Send + 'static {
    /// Discovery answered a registration.
    fn on_register_response(&mut self, _response: &RegisterResponse) {}

    /// A readiness poll completed.
    fn on_ready_response(&mut self, _ready: bool) {}

    /// A lookup completed.
    fn on_lookup_response(&mut self, _response: &LookupResponse) {}

    /// The set of publishers this participant is connected to changed.
    fn on_publisher_set_changed(&mut self, _publishers: &[Identity]) {}

    /// A subscriber received, or a broker relayed, a message.
    fn on_message(&mut self, _message: &TopicMessage) {}

    /// Payload a publisher sends for `topic` in round `iteration`.
    fn payload_for(&mut self, topic: &str, iteration: u64) -> String {
        format!("{topic}-{iteration}")
    }
}

/// Handler that ignores every callback.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHandler;

impl ParticipantHandler for NoopHandler {}
