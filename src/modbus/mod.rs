//! Modbus protocol engine
//!
//! Address classification, raw ADU framing, the transaction runner used for
//! probing and diagnostics, and a tokio-modbus backed client for typed
//! reads and writes.

use tokio::net::lookup_host;
use tokio::time::timeout;
use tokio_modbus::prelude::*;
use tracing::{debug, info};

use crate::config::TcpTarget;

pub mod address;
pub mod client;
pub mod codec;
pub mod tables;
pub mod transport;

pub use address::{classify, AddressError, AddressRange, ModbusAddress};
pub use client::ModbusError;
pub use codec::{ExceptionResponse, FrameError, ParsedResponse};
pub use transport::{Transport, TransportError};

/// Typed Modbus client for one device
///
/// Owns its connection; dropping the client closes the socket.
pub struct ModbusClient {
    target: String,
    context: client::Context,
}

impl ModbusClient {
    /// Connect to the device described by `target`
    pub async fn connect(target: &TcpTarget) -> Result<Self, TransportError> {
        let endpoint = format!("{}:{}", target.host, target.port);
        let connect_failed = |reason: String| TransportError::ConnectFailed {
            target: endpoint.clone(),
            reason,
        };

        let addr = lookup_host(&endpoint)
            .await
            .map_err(|e| connect_failed(e.to_string()))?
            .next()
            .ok_or_else(|| connect_failed("host did not resolve".to_string()))?;

        info!("Connecting to Modbus TCP: {} (unit {})", addr, target.unit_id);

        let ctx = match timeout(
            target.connect_timeout,
            tcp::connect_slave(addr, Slave(target.unit_id)),
        )
        .await
        {
            Ok(Ok(ctx)) => ctx,
            Ok(Err(e)) => return Err(connect_failed(e.to_string())),
            Err(_) => {
                return Err(connect_failed(format!(
                    "no answer within {:?}",
                    target.connect_timeout
                )))
            }
        };

        Ok(Self {
            target: endpoint,
            context: client::Context::new(ctx, target.timeout),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl crate::executor::DataAccess for ModbusClient {
    async fn read_coils(&mut self, addr: u16, cnt: u16) -> Result<Vec<bool>, ModbusError> {
        debug!("Reading {} coils from address {}", cnt, addr);
        self.context.read_coils(addr, cnt).await
    }

    async fn read_discrete_inputs(
        &mut self,
        addr: u16,
        cnt: u16,
    ) -> Result<Vec<bool>, ModbusError> {
        debug!("Reading {} discrete inputs from address {}", cnt, addr);
        self.context.read_discrete_inputs(addr, cnt).await
    }

    async fn read_input_registers(
        &mut self,
        addr: u16,
        cnt: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        debug!("Reading {} input registers from address {}", cnt, addr);
        self.context.read_input_registers(addr, cnt).await
    }

    async fn read_holding_registers(
        &mut self,
        addr: u16,
        cnt: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        debug!("Reading {} holding registers from address {}", cnt, addr);
        self.context.read_holding_registers(addr, cnt).await
    }

    async fn write_multiple_coils(&mut self, addr: u16, values: &[bool]) -> Result<(), ModbusError> {
        debug!("Writing {} coils at address {}", values.len(), addr);
        self.context.write_multiple_coils(addr, values).await
    }

    async fn write_multiple_registers(
        &mut self,
        addr: u16,
        values: &[u16],
    ) -> Result<(), ModbusError> {
        debug!("Writing {} holding registers at address {}", values.len(), addr);
        self.context.write_multiple_registers(addr, values).await
    }
}
