use relay_protocol::Role;
use thiserror::Error;

/// Why a registration was refused.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Rejection {
    /// Another participant already uses this id within the role.
    #[error("The {role} name `{id}` is not unique.")]
    DuplicateId {
        /// Role registered under.
        role: Role,
        /// The clashing id.
        id: String,
    },

    /// A broker is already registered.
    #[error("There should be only one broker; `{existing}` is already registered.")]
    BrokerAlreadyRegistered {
        /// Id of the registered broker.
        existing: String,
    },
}
