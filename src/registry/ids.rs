//! Resource identifiers
//!
//! Every resource id is a random UUID wrapped in its own newtype so a
//! consumer id can never be passed where a producer id is expected. Sessions
//! use a plain counter allocated by the listener.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one signaling connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! resource_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Allocate a fresh random id
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

resource_id!(
    /// Identifier of a negotiated transport
    TransportId
);
resource_id!(
    /// Identifier of an outbound media flow
    ProducerId
);
resource_id!(
    /// Identifier of an inbound media flow
    ConsumerId
);
resource_id!(
    /// Identifier of an outbound data channel
    DataProducerId
);
resource_id!(
    /// Identifier of an inbound data channel
    DataConsumerId
);

/// Kind of resource tracked by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Session,
    Transport,
    Producer,
    Consumer,
    DataProducer,
    DataConsumer,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Session => "session",
            ResourceKind::Transport => "transport",
            ResourceKind::Producer => "producer",
            ResourceKind::Consumer => "consumer",
            ResourceKind::DataProducer => "data producer",
            ResourceKind::DataConsumer => "data consumer",
        };
        f.write_str(name)
    }
}
