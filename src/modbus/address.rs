//! Modbus user address classification
//!
//! Operators speak in six-digit "user addresses" (400001, 300231, ...). Each
//! window maps to one data class and a zero-based protocol address.

use std::fmt;

/// The four addressable data classes of the Modbus data model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressRange {
    Coil,
    Discrete,
    InputRegister,
    HoldingRegister,
}

impl AddressRange {
    /// Lookup order used by [`classify`]
    pub const ALL: [AddressRange; 4] = [
        AddressRange::HoldingRegister,
        AddressRange::InputRegister,
        AddressRange::Discrete,
        AddressRange::Coil,
    ];

    /// Inclusive user-address window
    pub const fn span(self) -> (i64, i64) {
        match self {
            AddressRange::Coil => (1, 65_535),
            AddressRange::Discrete => (100_001, 165_535),
            AddressRange::InputRegister => (300_001, 365_535),
            AddressRange::HoldingRegister => (400_001, 465_535),
        }
    }

    /// Value subtracted from a user address to get the protocol address
    pub const fn offset(self) -> i64 {
        self.span().0
    }

    /// Single-bit classes (coils, discrete inputs)
    pub const fn is_bit(self) -> bool {
        matches!(self, AddressRange::Coil | AddressRange::Discrete)
    }

    /// Classes a client may write to
    pub const fn is_writable(self) -> bool {
        matches!(self, AddressRange::Coil | AddressRange::HoldingRegister)
    }

    pub fn contains(self, address: i64) -> bool {
        let (start, end) = self.span();
        (start..=end).contains(&address)
    }

    /// Rebuild the operator-facing address for a protocol address
    pub fn display_address(self, protocol_address: u16) -> u32 {
        (self.offset() + i64::from(protocol_address)) as u32
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AddressRange::Coil => "coils",
            AddressRange::Discrete => "discrete inputs",
            AddressRange::InputRegister => "input registers",
            AddressRange::HoldingRegister => "holding registers",
        };
        f.write_str(name)
    }
}

/// A classified address ready for the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModbusAddress {
    pub protocol_address: u16,
    pub range: AddressRange,
}

impl ModbusAddress {
    /// Operator-facing address of the `index`-th item starting here
    pub fn display_at(&self, index: usize) -> u32 {
        self.range.display_address(self.protocol_address) + index as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("Address out of valid range: {0}")]
    OutOfRange(i64),
}

/// Map a user address to its data class and protocol address
pub fn classify(address: i64) -> Result<ModbusAddress, AddressError> {
    AddressRange::ALL
        .into_iter()
        .find(|range| range.contains(address))
        .map(|range| ModbusAddress {
            protocol_address: (address - range.offset()) as u16,
            range,
        })
        .ok_or(AddressError::OutOfRange(address))
}
