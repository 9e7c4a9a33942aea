//! Message codes carried in the envelope `code` field.
//!
//! The integers are a client/server contract; never renumber an existing code.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MessageCode {
    SessionIdIssued,
    InvalidSessionId,
    CreateGame,
    JoinGame,
    SelectGrid,
    Ready,
    StartGame,
    Attack,
    EndGame,
    InvalidSignal,
    SignalAbsent,
    PeerDisconnected,
    PeerReconnected,
    PeerGracePeriod,
    RematchCall,
    RematchAccepted,
    RematchRejected,
}

impl MessageCode {
    pub const ALL: [MessageCode; 17] = [
        MessageCode::SessionIdIssued,
        MessageCode::InvalidSessionId,
        MessageCode::CreateGame,
        MessageCode::JoinGame,
        MessageCode::SelectGrid,
        MessageCode::Ready,
        MessageCode::StartGame,
        MessageCode::Attack,
        MessageCode::EndGame,
        MessageCode::InvalidSignal,
        MessageCode::SignalAbsent,
        MessageCode::PeerDisconnected,
        MessageCode::PeerReconnected,
        MessageCode::PeerGracePeriod,
        MessageCode::RematchCall,
        MessageCode::RematchAccepted,
        MessageCode::RematchRejected,
    ];

    pub const fn as_u8(self) -> u8 {
        match self {
            MessageCode::SessionIdIssued => 0,
            MessageCode::InvalidSessionId => 1,
            MessageCode::CreateGame => 2,
            MessageCode::JoinGame => 3,
            MessageCode::SelectGrid => 4,
            MessageCode::Ready => 5,
            MessageCode::StartGame => 6,
            MessageCode::Attack => 7,
            MessageCode::EndGame => 8,
            MessageCode::InvalidSignal => 9,
            MessageCode::SignalAbsent => 10,
            MessageCode::PeerDisconnected => 11,
            MessageCode::PeerReconnected => 12,
            MessageCode::PeerGracePeriod => 13,
            MessageCode::RematchCall => 14,
            MessageCode::RematchAccepted => 15,
            MessageCode::RematchRejected => 16,
        }
    }

    /// Whether clients may send this code.
    pub const fn is_inbound(self) -> bool {
        matches!(
            self,
            MessageCode::CreateGame
                | MessageCode::JoinGame
                | MessageCode::Ready
                | MessageCode::Attack
                | MessageCode::RematchCall
                | MessageCode::RematchAccepted
                | MessageCode::RematchRejected
        )
    }
}

impl From<MessageCode> for u8 {
    fn from(code: MessageCode) -> Self {
        code.as_u8()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown message code {0}")]
pub struct UnknownCode(pub u8);

impl TryFrom<u8> for MessageCode {
    type Error = UnknownCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        MessageCode::ALL
            .iter()
            .copied()
            .find(|code| code.as_u8() == value)
            .ok_or(UnknownCode(value))
    }
}
