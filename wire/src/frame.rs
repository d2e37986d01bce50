use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::envelope::{RequestMessage, ResponseMessage};
use crate::error::ProtocolError;

/// Default cap on a single envelope frame's body size. Enforced before the read buffer is
/// allocated so a corrupt or hostile peer cannot force an unbounded allocation; exceeding it is
/// fatal to the connection (`ProtocolError::FrameTooLarge`), matching "malformed envelope → fatal;
/// close."
pub const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// Which side of the identification handshake a peer claimed to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// `MX-CLIENT`: the peer drives one or more request/response pairs.
    Client,
    /// `MX-SUBSCRIBER`: the peer is polling; it delivers responses to requests the local side
    /// hands it, inverting who sends and who receives on this connection.
    Subscriber,
}

/// The identification preamble exchanged exactly once, before any envelope frame, at the start of
/// every connection. ASCII, line-terminated: `MX-CLIENT\n` or `MX-SUBSCRIBER <uri>\n`.
#[derive(Debug, Clone)]
pub struct Identification {
    pub role: Role,
    pub subscription_uri: Option<String>,
}

impl Identification {
    pub fn client() -> Identification {
        Identification {
            role: Role::Client,
            subscription_uri: None,
        }
    }

    pub fn subscriber(subscription_uri: impl Into<String>) -> Identification {
        Identification {
            role: Role::Subscriber,
            subscription_uri: Some(subscription_uri.into()),
        }
    }

    fn encode(&self) -> String {
        match (&self.role, &self.subscription_uri) {
            (Role::Client, _) => "MX-CLIENT\n".to_string(),
            (Role::Subscriber, Some(uri)) => format!("MX-SUBSCRIBER {uri}\n"),
            (Role::Subscriber, None) => {
                debug_assert!(false, "subscriber identification missing a subscription uri");
                "MX-SUBSCRIBER\n".to_string()
            }
        }
    }

    fn decode(line: &str) -> Result<Identification, ProtocolError> {
        let line = line.trim_end_matches(['\n', '\r']);

        if line == "MX-CLIENT" {
            return Ok(Identification::client());
        }

        if let Some(rest) = line.strip_prefix("MX-SUBSCRIBER ") {
            if rest.is_empty() {
                return Err(ProtocolError::BadIdentification(line.to_string()));
            }
            return Ok(Identification::subscriber(rest));
        }

        Err(ProtocolError::BadIdentification(line.to_string()))
    }
}

/// Writes the identification preamble. Must be the first thing written on a fresh connection, on
/// both the dialing and accepting side.
pub async fn write_identification<W: AsyncWrite + Unpin>(
    writer: &mut W,
    identification: &Identification,
) -> Result<(), ProtocolError> {
    writer.write_all(identification.encode().as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the identification preamble. Fatal (closes the connection) on any pattern other than
/// `MX-CLIENT` / `MX-SUBSCRIBER <uri>`.
pub async fn read_identification<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Identification, ProtocolError> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        let n = reader.read(&mut byte).await?;
        if n == 0 {
            if line.is_empty() {
                return Err(ProtocolError::UnexpectedEof);
            }
            break;
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() > 256 {
            return Err(ProtocolError::BadIdentification(
                "identification preamble exceeded 256 bytes without a newline".to_string(),
            ));
        }
    }

    let text = String::from_utf8(line).map_err(|e| ProtocolError::BadIdentification(e.to_string()))?;
    Identification::decode(&text)
}

/// An envelope frame: either direction of a request/response pair. What the length-prefixed body
/// actually carries once the 4-byte big-endian length prefix has been stripped off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Envelope {
    Request(RequestMessage),
    Response(ResponseMessage),
}

/// Writes one length-prefixed envelope frame: a `u32` big-endian byte count, then the
/// `bincode`-encoded body.
pub async fn write_envelope<W: AsyncWrite + Unpin>(
    writer: &mut W,
    envelope: &Envelope,
) -> Result<(), ProtocolError> {
    let body = bincode::serialize(envelope)?;
    let len: u32 = body
        .len()
        .try_into()
        .map_err(|_| ProtocolError::FrameTooLarge { size: u32::MAX, max: MAX_FRAME_BYTES })?;

    if len > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge { size: len, max: MAX_FRAME_BYTES });
    }

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed envelope frame, rejecting (fatally) any frame whose declared length
/// exceeds [`MAX_FRAME_BYTES`] before allocating the read buffer.
pub async fn read_envelope<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Envelope, ProtocolError> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::UnexpectedEof
        } else {
            ProtocolError::Io(e)
        }
    })?;
    let len = u32::from_be_bytes(len_bytes);

    if len > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge { size: len, max: MAX_FRAME_BYTES });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;

    Ok(bincode::deserialize(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::envelope::{ActivityId, RequestMessage, ResponseMessage};
    use crate::value::Value;

    #[tokio::test]
    async fn identification_round_trips_client() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_identification(&mut a, &Identification::client()).await.unwrap();
        let got = read_identification(&mut b).await.unwrap();
        assert_eq!(got.role, Role::Client);
        assert!(got.subscription_uri.is_none());
    }

    #[tokio::test]
    async fn identification_round_trips_subscriber() {
        let (mut a, mut b) = tokio::io::duplex(128);
        write_identification(&mut a, &Identification::subscriber("poll://SQ-1")).await.unwrap();
        let got = read_identification(&mut b).await.unwrap();
        assert_eq!(got.role, Role::Subscriber);
        assert_eq!(got.subscription_uri.as_deref(), Some("poll://SQ-1"));
    }

    #[tokio::test]
    async fn identification_rejects_garbage() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(b"GARBAGE\n").await.unwrap();
        let err = read_identification(&mut b).await.unwrap_err();
        assert!(matches!(err, ProtocolError::BadIdentification(_)));
    }

    #[tokio::test]
    async fn envelope_round_trips() {
        let (mut a, mut b) = tokio::io::duplex(4096);

        let endpoint = Endpoint::poll("poll://SQ-1");
        let request = RequestMessage::new(
            ActivityId::new(),
            endpoint,
            "IEchoService",
            "SayHello",
            vec![Value::Str("Paul".to_string())],
        );
        let request_id = request.request_id();

        write_envelope(&mut a, &Envelope::Request(request)).await.unwrap();
        match read_envelope(&mut b).await.unwrap() {
            Envelope::Request(got) => {
                assert_eq!(got.request_id(), request_id);
                assert_eq!(got.method_name(), "SayHello");
            }
            Envelope::Response(_) => panic!("expected a request envelope"),
        }

        let response = ResponseMessage::success(request_id, Value::Str("Paul...".to_string()));
        write_envelope(&mut a, &Envelope::Response(response)).await.unwrap();
        match read_envelope(&mut b).await.unwrap() {
            Envelope::Response(got) => assert_eq!(got.request_id(), request_id),
            Envelope::Request(_) => panic!("expected a response envelope"),
        }
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_before_allocating() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(MAX_FRAME_BYTES + 1).to_be_bytes()).await.unwrap();
        let err = read_envelope(&mut b).await.unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
    }
}
