//! TCP/IP gate driver.
//!
//! One short-lived connection per command. Wire format, both directions:
//!
//! ```text
//! ┌──────────┬─────────┬─────────────┬──────────────┐
//! │ "MG" (2B)│ ver (1B)│ len u16 BE  │ payload      │
//! └──────────┴─────────┴─────────────┴──────────────┘
//! command payload:  opcode u8 │ duration u16 BE │ reason UTF-8
//! response payload: status u8 │ detail UTF-8 (optional)
//! ```

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::command::{DoorStatus, GateAction, GateCommand, GateProtocol, GateResponse};
use crate::driver::{GateDriver, bounded};
use crate::error::Error;

pub const MAGIC: [u8; 2] = *b"MG";
pub const VERSION: u8 = 1;
const HEADER_SIZE: usize = 5;
/// Frames larger than this are treated as garbage.
pub const MAX_PAYLOAD: usize = 1024;

// ── Frame codec ─────────────────────────────────────────────────────

fn frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_slice(&MAGIC);
    buf.put_u8(VERSION);
    // Callers cap payloads well below u16::MAX.
    buf.put_u16(u16::try_from(payload.len()).unwrap_or(u16::MAX));
    buf.put_slice(payload);
    buf.freeze()
}

/// Encode a command frame as sent by the driver.
pub fn encode_command(command: &GateCommand) -> Bytes {
    let reason = command.wire_reason().as_bytes();
    let mut payload = BytesMut::with_capacity(3 + reason.len());
    payload.put_u8(command.action.opcode());
    payload.put_u16(command.duration_secs.unwrap_or(0));
    payload.put_slice(reason);
    frame(&payload)
}

/// Encode a response frame as sent by a device.
pub fn encode_response(status: DoorStatus, detail: &str) -> Bytes {
    let detail = detail.as_bytes();
    let detail = detail.get(..detail.len().min(MAX_PAYLOAD - 1)).unwrap_or_default();
    let mut payload = BytesMut::with_capacity(1 + detail.len());
    payload.put_u8(status.code());
    payload.put_slice(detail);
    frame(&payload)
}

/// Decode a command payload (device side).
pub fn decode_command(mut payload: &[u8]) -> Result<GateCommand, Error> {
    if payload.len() < 3 {
        return Err(Error::protocol("command payload shorter than 3 bytes"));
    }
    let op = payload.get_u8();
    let action = GateAction::from_opcode(op)
        .ok_or_else(|| Error::protocol(format!("unknown opcode 0x{op:02x}")))?;
    let duration = payload.get_u16();
    let reason = String::from_utf8_lossy(payload).into_owned();
    Ok(GateCommand {
        action,
        duration_secs: (duration > 0).then_some(duration),
        reason: (!reason.is_empty()).then_some(reason),
    })
}

/// Decode a response payload (driver side).
pub fn decode_response(payload: &[u8]) -> Result<GateResponse, Error> {
    let (&code, detail) = payload
        .split_first()
        .ok_or_else(|| Error::protocol("empty response payload"))?;
    let status = DoorStatus::from_code(code)
        .ok_or_else(|| Error::protocol(format!("unknown status byte 0x{code:02x}")))?;
    let detail = String::from_utf8_lossy(detail);
    let raw = if detail.is_empty() {
        status.to_string()
    } else {
        format!("{status} {detail}")
    };
    Ok(GateResponse { status, raw })
}

/// Read one frame from `reader` and return its payload.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, Error> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await?;
    let mut hdr = &header[..];
    let magic = [hdr.get_u8(), hdr.get_u8()];
    if magic != MAGIC {
        return Err(Error::protocol(format!("bad frame magic {magic:02x?}")));
    }
    let version = hdr.get_u8();
    if version != VERSION {
        return Err(Error::protocol(format!("unsupported frame version {version}")));
    }
    let len = usize::from(hdr.get_u16());
    if len == 0 || len > MAX_PAYLOAD {
        return Err(Error::protocol(format!("frame length {len} out of range")));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

// ── Driver ──────────────────────────────────────────────────────────

/// Driver for gates controlled over a raw TCP socket.
pub struct TcpDriver {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl TcpDriver {
    pub fn new(host: String, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host,
            port,
            connect_timeout,
        }
    }

    async fn round_trip(&self, command: &GateCommand) -> Result<GateResponse, Error> {
        let addr = format!("{}:{}", self.host, self.port);
        let mut stream = bounded(self.connect_timeout, async {
            TcpStream::connect(&addr).await.map_err(Error::from)
        })
        .await?;
        stream.set_nodelay(true)?;

        let frame = encode_command(command);
        trace!(bytes = frame.len(), %addr, "writing command frame");
        stream.write_all(&frame).await?;
        stream.flush().await?;

        let payload = read_frame(&mut stream).await?;
        let response = decode_response(&payload)?;
        // Best effort; the device may already have closed its side.
        let _ = stream.shutdown().await;
        Ok(response)
    }
}

#[async_trait]
impl GateDriver for TcpDriver {
    fn protocol(&self) -> GateProtocol {
        GateProtocol::TcpIp
    }

    async fn send(
        &self,
        gate_id: &str,
        command: &GateCommand,
        timeout: Duration,
    ) -> Result<GateResponse, Error> {
        debug!(gate_id, action = %command.action, host = %self.host, port = self.port, "tcp send");
        bounded(timeout, self.round_trip(command)).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn command_frame_layout() {
        let cmd = GateCommand::new(GateAction::Open)
            .with_duration(5)
            .with_reason("ok");
        let bytes = encode_command(&cmd);
        assert_eq!(&bytes[..], &[b'M', b'G', 1, 0, 5, 0x01, 0, 5, b'o', b'k']);
    }

    #[test]
    fn command_payload_decodes_back() {
        let cmd = GateCommand::new(GateAction::EmergencyOpen).with_reason("fire drill");
        let bytes = encode_command(&cmd);
        let decoded = decode_command(&bytes[HEADER_SIZE..]).unwrap();
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn unknown_status_byte_is_protocol_error() {
        assert!(matches!(decode_response(&[9]), Err(Error::Protocol { .. })));
        assert!(matches!(decode_response(&[]), Err(Error::Protocol { .. })));
    }

    #[test]
    fn response_raw_includes_detail() {
        let resp = decode_response(&[1, b'h', b'i']).unwrap();
        assert_eq!(resp.status, DoorStatus::Open);
        assert_eq!(resp.raw, "OPEN hi");
    }

    #[tokio::test]
    async fn read_frame_rejects_bad_magic() {
        let data: &[u8] = &[b'X', b'G', 1, 0, 1, 0];
        let mut reader = data;
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test]
    async fn round_trip_against_loopback_device() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let device = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let payload = read_frame(&mut sock).await.unwrap();
            let cmd = decode_command(&payload).unwrap();
            assert_eq!(cmd.action, GateAction::Close);
            sock.write_all(&encode_response(DoorStatus::Closed, ""))
                .await
                .unwrap();
        });

        let driver = TcpDriver::new("127.0.0.1".into(), port, Duration::from_secs(1));
        let resp = driver
            .send("g1", &GateCommand::new(GateAction::Close), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(resp.status, DoorStatus::Closed);
        device.await.unwrap();
    }

    #[tokio::test]
    async fn silent_device_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _device = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(sock);
        });

        let driver = TcpDriver::new("127.0.0.1".into(), port, Duration::from_secs(1));
        let err = driver
            .send("g1", &GateCommand::status(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
