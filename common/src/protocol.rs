use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Handle to a payload parked on the holder side for bulk reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelayToken(Uuid);

impl RelayToken {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RelayToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Messages exchanged over a bound, trusted channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelMessage {
    /// Ask the holder for its opaque credential payload
    RequestPayload {
        /// Unique identifier for the request
        id: u32,
    },
    /// Payload small enough to travel inline
    Payload {
        /// Identifier matching the request
        id:   u32,
        /// Opaque payload bytes
        data: Vec<u8>,
    },
    /// Payload parked for bulk reading through a relay
    PayloadRelayed {
        /// Identifier matching the request
        id:    u32,
        /// Token to open the relay with
        token: RelayToken,
    },
    /// The caller is not a trusted sibling
    Denied {
        /// Identifier matching the request
        id: u32,
    },
    /// The request could not be served
    Error {
        /// Identifier matching the request
        id:      u32,
        /// Error message describing what went wrong
        message: String,
    },
}

impl ChannelMessage {
    /// Request identifier carried by every message kind.
    pub fn id(&self) -> u32 {
        match self {
            ChannelMessage::RequestPayload { id }
            | ChannelMessage::Payload { id, .. }
            | ChannelMessage::PayloadRelayed { id, .. }
            | ChannelMessage::Denied { id }
            | ChannelMessage::Error { id, .. } => *id,
        }
    }

    /// Size of this message on the wire.
    pub fn encoded_len(&self) -> usize {
        match bincode::serialized_size(self) {
            Ok(size) => usize::try_from(size).unwrap_or(usize::MAX),
            Err(_) => usize::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_len_tracks_payload_size() {
        let small = ChannelMessage::Payload { id: 1, data: vec![0; 16] };
        let large = ChannelMessage::Payload { id: 1, data: vec![0; 4096] };

        assert!(small.encoded_len() >= 16);
        assert_eq!(large.encoded_len() - small.encoded_len(), 4096 - 16);
        assert_eq!(large.id(), 1);
    }
}
