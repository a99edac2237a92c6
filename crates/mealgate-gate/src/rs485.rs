//! RS485 gate driver.
//!
//! The bus is half-duplex: a command and its reply must never interleave
//! with traffic for another gate on the same wire. Every serial port path
//! therefore gets exactly one lock in the shared [`SerialBus`], and a
//! driver holds that lock for the full write-then-read exchange.
//!
//! ```text
//! command: STX 0x02 │ addr │ opcode │ duration u16 BE │ CRC16 LE │ ETX 0x03
//! reply:   STX 0x02 │ addr │ status │ CRC16 LE        │ ETX 0x03
//! ```
//!
//! The CRC is CRC-16/MODBUS over the bytes between STX and the CRC.
//! Reasons are not transmitted; they stay in the control log.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, StopBits};
use tracing::{debug, warn};

use crate::command::{DoorStatus, GateCommand, GateProtocol, GateResponse};
use crate::driver::{GateDriver, bounded};
use crate::error::Error;

pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
const COMMAND_LEN: usize = 8;
const REPLY_LEN: usize = 6;
/// Noise bytes tolerated before a reply's STX.
const MAX_SYNC_SKIP: usize = 64;

// ── CRC ─────────────────────────────────────────────────────────────

/// CRC-16/MODBUS (poly 0xA001 reflected, init 0xFFFF).
pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 == 1 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

// ── Framing ─────────────────────────────────────────────────────────

pub fn encode_command(address: u8, command: &GateCommand) -> [u8; COMMAND_LEN] {
    let [dur_hi, dur_lo] = command.duration_secs.unwrap_or(0).to_be_bytes();
    let body = [address, command.action.opcode(), dur_hi, dur_lo];
    let [crc_lo, crc_hi] = crc16_modbus(&body).to_le_bytes();
    [STX, address, body[1], dur_hi, dur_lo, crc_lo, crc_hi, ETX]
}

pub fn encode_reply(address: u8, status: DoorStatus) -> [u8; REPLY_LEN] {
    let body = [address, status.code()];
    let [crc_lo, crc_hi] = crc16_modbus(&body).to_le_bytes();
    [STX, address, body[1], crc_lo, crc_hi, ETX]
}

/// Validate a complete reply frame addressed to `address`.
pub fn decode_reply(address: u8, frame: &[u8; REPLY_LEN]) -> Result<GateResponse, Error> {
    let [stx, addr, code, crc_lo, crc_hi, etx] = *frame;
    if stx != STX || etx != ETX {
        return Err(Error::protocol("reply not delimited by STX/ETX"));
    }
    let expected = crc16_modbus(&[addr, code]);
    if u16::from_le_bytes([crc_lo, crc_hi]) != expected {
        return Err(Error::protocol("reply CRC mismatch"));
    }
    if addr != address {
        return Err(Error::protocol(format!(
            "reply from bus address {addr}, expected {address}"
        )));
    }
    let status = DoorStatus::from_code(code)
        .ok_or_else(|| Error::protocol(format!("unknown status byte 0x{code:02x}")))?;
    Ok(GateResponse {
        status,
        raw: format!("{frame:02x?}"),
    })
}

/// Skip line noise up to the next STX, then read the rest of a reply.
async fn read_reply<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> Result<[u8; REPLY_LEN], Error> {
    let mut skipped = 0usize;
    loop {
        let byte = reader.read_u8().await?;
        if byte == STX {
            break;
        }
        skipped += 1;
        if skipped > MAX_SYNC_SKIP {
            return Err(Error::protocol("no STX found in reply"));
        }
    }
    let mut frame = [0u8; REPLY_LEN];
    frame[0] = STX;
    reader.read_exact(&mut frame[1..]).await?;
    Ok(frame)
}

// ── Ports ───────────────────────────────────────────────────────────

/// Byte stream to a serial device.
pub trait SerialLink: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialLink for T {}

/// Opens serial ports. Swapped out in tests for in-memory links.
pub trait PortOpener: Send + Sync {
    fn open(&self, path: &str, baud_rate: u32) -> Result<Box<dyn SerialLink>, Error>;
}

/// Opens real ports through `tokio-serial` (8N1).
#[derive(Debug, Default)]
pub struct NativePortOpener;

impl PortOpener for NativePortOpener {
    fn open(&self, path: &str, baud_rate: u32) -> Result<Box<dyn SerialLink>, Error> {
        let stream = tokio_serial::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .open_native_async()
            .map_err(|e| Error::Serial {
                port: path.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(stream))
    }
}

#[derive(Default)]
struct PortSlot {
    link: Option<Box<dyn SerialLink>>,
    baud_rate: u32,
    /// Set while an exchange is in flight. Still set on entry means the
    /// previous exchange was abandoned mid-way and the line may hold a
    /// stale reply, so the port is reopened.
    dirty: bool,
}

struct SerialBusInner {
    opener: Arc<dyn PortOpener>,
    ports: DashMap<String, Arc<Mutex<PortSlot>>>,
}

/// Registry of serial ports shared by every RS485 driver.
///
/// Cheaply cloneable; all clones share the same per-port locks.
#[derive(Clone)]
pub struct SerialBus {
    inner: Arc<SerialBusInner>,
}

impl SerialBus {
    pub fn new(opener: Arc<dyn PortOpener>) -> Self {
        Self {
            inner: Arc::new(SerialBusInner {
                opener,
                ports: DashMap::new(),
            }),
        }
    }

    pub fn native() -> Self {
        Self::new(Arc::new(NativePortOpener))
    }

    fn slot(&self, path: &str) -> Arc<Mutex<PortSlot>> {
        Arc::clone(
            self.inner
                .ports
                .entry(path.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(PortSlot::default())))
                .value(),
        )
    }

    /// Number of distinct ports seen so far.
    pub fn port_count(&self) -> usize {
        self.inner.ports.len()
    }
}

// ── Driver ──────────────────────────────────────────────────────────

/// Driver for one gate controller board on an RS485 bus.
pub struct Rs485Driver {
    bus: SerialBus,
    port: String,
    baud_rate: u32,
    address: u8,
}

impl Rs485Driver {
    pub fn new(bus: SerialBus, port: String, baud_rate: u32, address: u8) -> Self {
        Self {
            bus,
            port,
            baud_rate,
            address,
        }
    }

    async fn exchange(&self, command: &GateCommand) -> Result<GateResponse, Error> {
        let slot = self.bus.slot(&self.port);
        let mut port = slot.lock().await;

        if port.dirty || port.baud_rate != self.baud_rate {
            if port.dirty {
                warn!(port = %self.port, "previous exchange abandoned; reopening port");
            }
            port.link = None;
        }
        if port.link.is_none() {
            port.link = Some(self.bus.inner.opener.open(&self.port, self.baud_rate)?);
            port.baud_rate = self.baud_rate;
        }

        port.dirty = true;
        let frame = encode_command(self.address, command);
        let result = match port.link.as_mut() {
            Some(link) => transact(&mut **link, &frame, self.address).await,
            None => Err(Error::Serial {
                port: self.port.clone(),
                reason: "port not open".into(),
            }),
        };

        match &result {
            Ok(_) => port.dirty = false,
            Err(e) => {
                debug!(port = %self.port, error = %e, "dropping serial link after failure");
                port.link = None;
                port.dirty = false;
            }
        }
        result
    }
}

async fn transact(
    link: &mut dyn SerialLink,
    frame: &[u8; COMMAND_LEN],
    address: u8,
) -> Result<GateResponse, Error> {
    link.write_all(frame).await?;
    link.flush().await?;
    let reply = read_reply(link).await?;
    decode_reply(address, &reply)
}

#[async_trait]
impl GateDriver for Rs485Driver {
    fn protocol(&self) -> GateProtocol {
        GateProtocol::Rs485
    }

    async fn send(
        &self,
        gate_id: &str,
        command: &GateCommand,
        timeout: Duration,
    ) -> Result<GateResponse, Error> {
        debug!(
            gate_id,
            action = %command.action,
            port = %self.port,
            address = self.address,
            "rs485 send"
        );
        bounded(timeout, self.exchange(command)).await
    }
}
