//! Async drivers for meal-gate turnstiles.
//!
//! Three wire protocols sit behind one [`GateDriver`] trait:
//!
//! - **[`TcpDriver`]**: length-prefixed binary frames over a short-lived TCP connection.
//! - **[`Rs485Driver`]**: CRC-checked frames on a half-duplex serial bus,
//!   serialized per port through a shared [`SerialBus`].
//! - **[`HttpDriver`]**: JSON over a REST controller.
//!
//! Every driver normalizes its result into a [`GateResponse`], so callers
//! stay protocol-agnostic. [`build_driver`] picks the implementation from a
//! [`GateEndpoint`].

pub mod command;
pub mod driver;
pub mod error;
pub mod http;
pub mod rs485;
pub mod tcp;
pub mod transport;

pub use command::{
    DoorStatus, GateAction, GateCommand, GateEndpoint, GateProtocol, GateResponse, MAX_REASON_LEN,
};
pub use driver::{GateDriver, build_driver};
pub use error::Error;
pub use http::HttpDriver;
pub use rs485::{NativePortOpener, PortOpener, Rs485Driver, SerialBus, SerialLink};
pub use tcp::TcpDriver;
pub use transport::{TlsMode, TransportConfig};
