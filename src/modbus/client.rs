//! Modbus client context types

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tokio_modbus::client::Context as TcpContext;
use tokio_modbus::prelude::*;
use tokio_modbus::ExceptionCode;

/// Error type for Modbus operations
#[derive(Debug, thiserror::Error)]
pub enum ModbusError {
    #[error("Modbus exception: {0}")]
    Exception(ExceptionCode),
    #[error("Transport error: {0}")]
    Transport(#[from] tokio_modbus::Error),
    #[error("No response within {0:?}")]
    Timeout(Duration),
}

/// tokio-modbus TCP context with a per-request deadline
pub struct Context {
    inner: TcpContext,
    timeout: Duration,
}

async fn bounded<T, F>(limit: Duration, request: F) -> Result<T, ModbusError>
where
    F: Future<Output = tokio_modbus::Result<T>>,
{
    match timeout(limit, request).await {
        Ok(result) => result?.map_err(ModbusError::Exception),
        Err(_) => Err(ModbusError::Timeout(limit)),
    }
}

impl Context {
    pub fn new(inner: TcpContext, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub async fn read_holding_registers(
        &mut self,
        addr: u16,
        cnt: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        bounded(self.timeout, self.inner.read_holding_registers(addr, cnt)).await
    }

    pub async fn read_input_registers(
        &mut self,
        addr: u16,
        cnt: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        bounded(self.timeout, self.inner.read_input_registers(addr, cnt)).await
    }

    pub async fn read_coils(&mut self, addr: u16, cnt: u16) -> Result<Vec<bool>, ModbusError> {
        bounded(self.timeout, self.inner.read_coils(addr, cnt)).await
    }

    pub async fn read_discrete_inputs(
        &mut self,
        addr: u16,
        cnt: u16,
    ) -> Result<Vec<bool>, ModbusError> {
        bounded(self.timeout, self.inner.read_discrete_inputs(addr, cnt)).await
    }

    pub async fn write_multiple_coils(
        &mut self,
        addr: u16,
        values: &[bool],
    ) -> Result<(), ModbusError> {
        bounded(self.timeout, self.inner.write_multiple_coils(addr, values)).await
    }

    pub async fn write_multiple_registers(
        &mut self,
        addr: u16,
        values: &[u16],
    ) -> Result<(), ModbusError> {
        bounded(self.timeout, self.inner.write_multiple_registers(addr, values)).await
    }
}
