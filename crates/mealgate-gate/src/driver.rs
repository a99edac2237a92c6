//! The protocol-agnostic driver seam.
//!
//! A [`GateDriver`] is resolved once per gate from its [`GateEndpoint`] and
//! then reused for every command and status poll against that gate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::command::{GateCommand, GateEndpoint, GateProtocol, GateResponse};
use crate::error::Error;
use crate::http::HttpDriver;
use crate::rs485::{Rs485Driver, SerialBus};
use crate::tcp::TcpDriver;
use crate::transport::TransportConfig;

/// Translate an abstract [`GateCommand`] into protocol traffic.
///
/// Implementations must bound every I/O step by `timeout` and return
/// [`Error::Timeout`] when it elapses.
#[async_trait]
pub trait GateDriver: Send + Sync {
    fn protocol(&self) -> GateProtocol;

    async fn send(
        &self,
        gate_id: &str,
        command: &GateCommand,
        timeout: Duration,
    ) -> Result<GateResponse, Error>;
}

/// Pick the driver implementation for an endpoint.
///
/// RS485 drivers share `bus` so that gates on the same serial port are
/// serialized against each other.
pub fn build_driver(
    endpoint: &GateEndpoint,
    transport: &TransportConfig,
    bus: &SerialBus,
) -> Result<Arc<dyn GateDriver>, Error> {
    let driver: Arc<dyn GateDriver> = match endpoint {
        GateEndpoint::Tcp { host, port } => {
            Arc::new(TcpDriver::new(host.clone(), *port, transport.connect_timeout))
        }
        GateEndpoint::Rs485 {
            port,
            baud_rate,
            address,
        } => Arc::new(Rs485Driver::new(bus.clone(), port.clone(), *baud_rate, *address)),
        GateEndpoint::Http { base_url, api_key } => {
            let client = transport.build_http_client(api_key.as_ref())?;
            Arc::new(HttpDriver::new(client, base_url.clone()))
        }
    };
    Ok(driver)
}

/// Run `fut` under `timeout`, mapping elapsed time to [`Error::Timeout`].
pub(crate) async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T, Error>
where
    F: std::future::Future<Output = Result<T, Error>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout { timeout }),
    }
}
