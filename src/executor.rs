//! Typed reads and chunked writes against a classified address
//!
//! Large requests are split into independent transactions. A failed write
//! chunk stops the operation but chunks already written stay written.

use std::fmt;

use tracing::{debug, info, warn};

use crate::modbus::{AddressRange, ModbusAddress, ModbusError};

/// Largest value list sent in one write transaction
pub const MAX_WRITE_CHUNK: usize = 125;
/// Largest register count per read transaction
pub const MAX_REGISTER_READ: usize = 125;
/// Largest bit count per read transaction
pub const MAX_BIT_READ: usize = 2000;

/// Device operations the executor needs
#[allow(async_fn_in_trait)]
pub trait DataAccess {
    async fn read_coils(&mut self, addr: u16, cnt: u16) -> Result<Vec<bool>, ModbusError>;
    async fn read_discrete_inputs(&mut self, addr: u16, cnt: u16)
        -> Result<Vec<bool>, ModbusError>;
    async fn read_input_registers(&mut self, addr: u16, cnt: u16)
        -> Result<Vec<u16>, ModbusError>;
    async fn read_holding_registers(
        &mut self,
        addr: u16,
        cnt: u16,
    ) -> Result<Vec<u16>, ModbusError>;
    async fn write_multiple_coils(&mut self, addr: u16, values: &[bool]) -> Result<(), ModbusError>;
    async fn write_multiple_registers(&mut self, addr: u16, values: &[u16])
        -> Result<(), ModbusError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("Count must be positive")]
    ZeroCount,
    #[error("Reading {count} {range} from {start} runs past the end of the address window")]
    WindowOverflow {
        range: AddressRange,
        start: u32,
        count: usize,
    },
    #[error("Error reading {range} at address {address}: {source}")]
    Modbus {
        range: AddressRange,
        address: u32,
        #[source]
        source: ModbusError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("No values provided for write operation")]
    Empty,
    #[error("Cannot write {0}: the range is read-only")]
    ReadOnly(AddressRange),
    #[error("Invalid value {value:?}: {range} expect {expected}")]
    TypeMismatch {
        range: AddressRange,
        value: String,
        expected: &'static str,
    },
    #[error("Writing {count} {range} from {start} runs past the end of the address window")]
    WindowOverflow {
        range: AddressRange,
        start: u32,
        count: usize,
    },
    #[error("Error writing {range} starting at address {address}: {source} ({written} earlier values stay written)")]
    Chunk {
        range: AddressRange,
        address: u32,
        /// Values already written by earlier chunks
        written: usize,
        #[source]
        source: ModbusError,
    },
}

/// One transaction's share of a larger request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Protocol address of the first item
    pub start: u16,
    /// Index of the first item in the full value list
    pub offset: usize,
    pub len: usize,
}

/// Split `total` items starting at `start` into contiguous chunks of at most `max`
pub fn plan_chunks(start: u16, total: usize, max: usize) -> Vec<Chunk> {
    (0..total)
        .step_by(max.max(1))
        .map(|offset| Chunk {
            start: start.wrapping_add(offset as u16),
            offset,
            len: max.min(total - offset),
        })
        .collect()
}

/// The last item of `count` items must still have a user address in the window
fn fits_window(address: &ModbusAddress, count: usize) -> bool {
    let Ok(count) = i64::try_from(count) else {
        return false;
    };
    let last = i64::from(address.display_at(0)) + count - 1;
    last <= address.range.span().1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Bit(bool),
    Word(u16),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bit(bit) => write!(f, "{}", u8::from(*bit)),
            Value::Word(word) => write!(f, "{}", word),
        }
    }
}

/// A value with its operator-facing address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadItem {
    pub address: u32,
    pub value: Value,
}

impl fmt::Display for ReadItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06}      {}", self.address, self.value)
    }
}

/// Reject a read that cannot be sent, before any I/O
pub fn check_read(address: &ModbusAddress, count: usize) -> Result<(), ReadError> {
    if count == 0 {
        return Err(ReadError::ZeroCount);
    }
    if !fits_window(address, count) {
        return Err(ReadError::WindowOverflow {
            range: address.range,
            start: address.display_at(0),
            count,
        });
    }
    Ok(())
}

/// Read `count` items starting at `address`
pub async fn read<C: DataAccess>(
    client: &mut C,
    address: ModbusAddress,
    count: usize,
) -> Result<Vec<ReadItem>, ReadError> {
    check_read(&address, count)?;

    let max = if address.range.is_bit() {
        MAX_BIT_READ
    } else {
        MAX_REGISTER_READ
    };

    let mut items = Vec::with_capacity(count);
    for chunk in plan_chunks(address.protocol_address, count, max) {
        debug!(
            "Reading {} {} at protocol address {}",
            chunk.len, address.range, chunk.start
        );
        let cnt = chunk.len as u16;
        let values: Result<Vec<Value>, ModbusError> = match address.range {
            AddressRange::Coil => client
                .read_coils(chunk.start, cnt)
                .await
                .map(|bits| bits.into_iter().map(Value::Bit).collect()),
            AddressRange::Discrete => client
                .read_discrete_inputs(chunk.start, cnt)
                .await
                .map(|bits| bits.into_iter().map(Value::Bit).collect()),
            AddressRange::InputRegister => client
                .read_input_registers(chunk.start, cnt)
                .await
                .map(|words| words.into_iter().map(Value::Word).collect()),
            AddressRange::HoldingRegister => client
                .read_holding_registers(chunk.start, cnt)
                .await
                .map(|words| words.into_iter().map(Value::Word).collect()),
        };

        let values = values.map_err(|source| ReadError::Modbus {
            range: address.range,
            address: address.display_at(chunk.offset),
            source,
        })?;

        // Bit replies are padded to whole bytes
        items.extend(
            values
                .into_iter()
                .take(chunk.len)
                .enumerate()
                .map(|(i, value)| ReadItem {
                    address: address.display_at(chunk.offset + i),
                    value,
                }),
        );
    }

    Ok(items)
}

/// Values ready to be written to one data class
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteValues {
    Coils(Vec<bool>),
    Registers(Vec<u16>),
}

impl WriteValues {
    pub fn len(&self) -> usize {
        match self {
            WriteValues::Coils(values) => values.len(),
            WriteValues::Registers(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of a completed write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    pub written: usize,
    pub transactions: usize,
}

/// Turn operator tokens into values for `range`
///
/// Coils accept integers (non-zero is on) and `true/false/on/off`.
/// Registers accept integers between 0 and 65535.
pub fn coerce_values<S: AsRef<str>>(
    range: AddressRange,
    raw: &[S],
) -> Result<WriteValues, WriteError> {
    if raw.is_empty() {
        return Err(WriteError::Empty);
    }
    if !range.is_writable() {
        return Err(WriteError::ReadOnly(range));
    }

    let mismatch = |token: &str, expected: &'static str| WriteError::TypeMismatch {
        range,
        value: token.to_string(),
        expected,
    };

    match range {
        AddressRange::Coil => raw
            .iter()
            .map(|token| {
                let token = token.as_ref().trim();
                match token.to_ascii_lowercase().as_str() {
                    "true" | "on" => Ok(true),
                    "false" | "off" => Ok(false),
                    other => other
                        .parse::<i64>()
                        .map(|n| n != 0)
                        .map_err(|_| mismatch(token, "boolean values (1/0)")),
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map(WriteValues::Coils),
        _ => raw
            .iter()
            .map(|token| {
                let token = token.as_ref().trim();
                token
                    .parse::<i64>()
                    .ok()
                    .and_then(|n| u16::try_from(n).ok())
                    .ok_or_else(|| mismatch(token, "integer values (0-65535)"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(WriteValues::Registers),
    }
}

/// Reject a write that cannot be sent, before any I/O
pub fn check_write(address: &ModbusAddress, values: &WriteValues) -> Result<(), WriteError> {
    if values.is_empty() {
        return Err(WriteError::Empty);
    }
    if !address.range.is_writable() {
        return Err(WriteError::ReadOnly(address.range));
    }
    let expected_range = match values {
        WriteValues::Coils(_) => AddressRange::Coil,
        WriteValues::Registers(_) => AddressRange::HoldingRegister,
    };
    if expected_range != address.range {
        return Err(WriteError::TypeMismatch {
            range: address.range,
            value: format!("{:?}", values),
            expected: match address.range {
                AddressRange::Coil => "boolean values (1/0)",
                _ => "integer values (0-65535)",
            },
        });
    }
    if !fits_window(address, values.len()) {
        return Err(WriteError::WindowOverflow {
            range: address.range,
            start: address.display_at(0),
            count: values.len(),
        });
    }
    Ok(())
}

/// Write `values` starting at `address`, at most [`MAX_WRITE_CHUNK`] per transaction
pub async fn write<C: DataAccess>(
    client: &mut C,
    address: ModbusAddress,
    values: &WriteValues,
) -> Result<WriteSummary, WriteError> {
    check_write(&address, values)?;

    let chunks = plan_chunks(address.protocol_address, values.len(), MAX_WRITE_CHUNK);
    let mut written = 0;

    for chunk in &chunks {
        let span = chunk.offset..chunk.offset + chunk.len;
        let result = match values {
            WriteValues::Coils(bits) => client.write_multiple_coils(chunk.start, &bits[span]).await,
            WriteValues::Registers(words) => {
                client.write_multiple_registers(chunk.start, &words[span]).await
            }
        };

        if let Err(source) = result {
            warn!(
                "Write aborted at {} after {} of {} values",
                address.display_at(chunk.offset),
                written,
                values.len()
            );
            return Err(WriteError::Chunk {
                range: address.range,
                address: address.display_at(chunk.offset),
                written,
                source,
            });
        }
        written += chunk.len;
    }

    info!(
        "Wrote {} {} in {} transaction(s)",
        written,
        address.range,
        chunks.len()
    );

    Ok(WriteSummary {
        written,
        transactions: chunks.len(),
    })
}
