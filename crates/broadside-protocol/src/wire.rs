use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::codes::MessageCode;
use crate::envelope::Envelope;
use crate::request::Request;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why an inbound frame could not become a [`Request`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not a JSON object: {0}")]
    Malformed(String),
    #[error("frame has no code field")]
    MissingCode,
    #[error("unknown message code {0}")]
    UnknownCode(Value),
    #[error("code {0:?} cannot be sent by clients")]
    NotInbound(MessageCode),
    #[error("code {0:?} requires a payload")]
    MissingPayload(MessageCode),
    #[error("invalid payload for {code:?}: {source}")]
    InvalidPayload {
        code: MessageCode,
        #[source]
        source: serde_json::Error,
    },
}

impl DecodeError {
    /// Code under which the failure is reported back to the client.
    pub fn reply_code(&self) -> MessageCode {
        match self {
            DecodeError::MissingCode => MessageCode::SignalAbsent,
            DecodeError::Malformed(_) | DecodeError::UnknownCode(_) | DecodeError::NotInbound(_) => {
                MessageCode::InvalidSignal
            }
            DecodeError::MissingPayload(code) | DecodeError::InvalidPayload { code, .. } => *code,
        }
    }

    /// Short machine-readable tag for the envelope error field.
    pub fn details(&self) -> &'static str {
        match self {
            DecodeError::Malformed(_) => "MalformedFrame",
            DecodeError::MissingCode => "SignalAbsent",
            DecodeError::UnknownCode(_) => "UnknownSignal",
            DecodeError::NotInbound(_) => "UnexpectedSignal",
            DecodeError::MissingPayload(_) => "MissingPayload",
            DecodeError::InvalidPayload { .. } => "InvalidPayload",
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        Envelope::error(self.reply_code(), self.details(), self.to_string())
    }
}

pub fn encode_envelope(envelope: &Envelope) -> Result<String, WireError> {
    Ok(serde_json::to_string(envelope)?)
}

pub fn decode_envelope(text: &str) -> Result<Envelope, WireError> {
    Ok(serde_json::from_str(text)?)
}

/// Decodes one client frame.
pub fn decode_request(text: &str) -> Result<Request, DecodeError> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| DecodeError::Malformed(err.to_string()))?;
    let Value::Object(mut object) = value else {
        return Err(DecodeError::Malformed("expected an object".into()));
    };

    let raw_code = object.remove("code").ok_or(DecodeError::MissingCode)?;
    let code = raw_code
        .as_u64()
        .and_then(|raw| u8::try_from(raw).ok())
        .and_then(|raw| MessageCode::try_from(raw).ok())
        .ok_or_else(|| DecodeError::UnknownCode(raw_code.clone()))?;

    match code {
        MessageCode::CreateGame => Ok(Request::CreateGame(payload(code, &mut object)?)),
        MessageCode::JoinGame => Ok(Request::JoinGame(payload(code, &mut object)?)),
        MessageCode::Ready => Ok(Request::Ready(payload(code, &mut object)?)),
        MessageCode::Attack => Ok(Request::Attack(payload(code, &mut object)?)),
        MessageCode::RematchCall => Ok(Request::RematchCall(payload(code, &mut object)?)),
        MessageCode::RematchAccepted => Ok(Request::RematchAccepted(payload(code, &mut object)?)),
        MessageCode::RematchRejected => Ok(Request::RematchRejected(payload(code, &mut object)?)),
        other => Err(DecodeError::NotInbound(other)),
    }
}

fn payload<T: DeserializeOwned>(
    code: MessageCode,
    object: &mut Map<String, Value>,
) -> Result<T, DecodeError> {
    let value = match object.remove("payload") {
        Some(Value::Null) | None => return Err(DecodeError::MissingPayload(code)),
        Some(value) => value,
    };
    serde_json::from_value(value).map_err(|source| DecodeError::InvalidPayload { code, source })
}
