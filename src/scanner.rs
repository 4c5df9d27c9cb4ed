//! Function code capability discovery
//!
//! Sends a minimal read-style probe (address 0, quantity 1) for every
//! function code from 0 to 126 and classifies what comes back. A device that
//! answers "Illegal function" does not implement the code; any other answer,
//! exceptions included, means the code is recognised.

use std::fmt;

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::TcpTarget;
use crate::modbus::transport::{Transport, TransportError};
use crate::modbus::{codec, tables};

/// Codes probed per scan: 0..=126
pub const MAX_FUNCTION_CODES: u8 = 127;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionCodeResult {
    /// Recognised by the device, with its well-known name if any
    Supported(Option<String>),
    Unsupported,
    NoResponse,
    Timeout,
    Error(String),
}

impl FunctionCodeResult {
    pub fn is_supported(&self) -> bool {
        matches!(self, FunctionCodeResult::Supported(_))
    }
}

/// One probe and everything observed about it
#[derive(Debug, Clone)]
pub struct Probe {
    pub function_code: u8,
    pub request: Bytes,
    pub response: Option<Vec<u8>>,
    pub result: FunctionCodeResult,
}

impl Probe {
    /// Supported Diagnostics (0x08) gets its sub-functions listed
    pub fn lists_sub_functions(&self) -> bool {
        self.function_code == tables::DIAGNOSTICS_FUNCTION_CODE && self.result.is_supported()
    }

    /// Echoed function code and exception byte, as decoded from the reply
    pub fn return_codes(&self) -> Option<(u8, u8)> {
        let raw = self.response.as_deref()?;
        let parsed = codec::decode(raw).ok()?;
        Some((parsed.function_code, parsed.data[0]))
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.function_code;
        match &self.result {
            FunctionCodeResult::Supported(Some(name)) => {
                write!(f, "Function Code {} ({}) is supported.", code, name)
            }
            FunctionCodeResult::Supported(None) => {
                write!(f, "Function Code {} is supported.", code)
            }
            FunctionCodeResult::Unsupported => {
                write!(f, "Function Code {} is not supported.", code)
            }
            FunctionCodeResult::NoResponse => write!(f, "No response for Function Code {}.", code),
            FunctionCodeResult::Timeout => write!(f, "Timeout for Function Code {}.", code),
            FunctionCodeResult::Error(e) => {
                write!(f, "Error testing function code {}: {}", code, e)
            }
        }
    }
}

/// Classify a probe reply
pub fn classify_response(function_code: u8, raw: &[u8], transaction_id: u16) -> FunctionCodeResult {
    let parsed = match codec::decode(raw) {
        Ok(parsed) => parsed,
        Err(e) => return FunctionCodeResult::Error(e.to_string()),
    };
    if let Err(e) = parsed.check_transaction(transaction_id) {
        return FunctionCodeResult::Error(e.to_string());
    }

    match parsed.exception() {
        Some(exception) if exception.is_illegal_function() => FunctionCodeResult::Unsupported,
        _ => FunctionCodeResult::Supported(
            tables::function_code_name(function_code).map(str::to_string),
        ),
    }
}

/// Transaction id used for the probe of `function_code`
pub fn probe_transaction_id(function_code: u8) -> u16 {
    u16::from(function_code) + 2
}

/// Probes one device over an exclusively owned connection
pub struct Scanner<S = TcpStream> {
    transport: Transport<S>,
    unit_id: u8,
}

impl Scanner<TcpStream> {
    pub async fn connect(target: &TcpTarget) -> Result<Self, TransportError> {
        let transport = Transport::connect(
            &target.host,
            target.port,
            target.connect_timeout,
            target.timeout,
        )
        .await?;
        Ok(Self::new(transport, target.unit_id))
    }
}

impl<S> Scanner<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(transport: Transport<S>, unit_id: u8) -> Self {
        Self { transport, unit_id }
    }

    /// Probe a single function code
    pub async fn probe(&mut self, function_code: u8) -> Probe {
        let transaction_id = probe_transaction_id(function_code);
        let request = codec::encode(transaction_id, self.unit_id, function_code, 0x0000, 0x0001);

        let (response, result) = match self.transport.send_recv(&request, transaction_id).await {
            Ok(raw) => {
                let result = classify_response(function_code, &raw, transaction_id);
                (Some(raw), result)
            }
            Err(TransportError::Timeout(_)) => (None, FunctionCodeResult::Timeout),
            Err(TransportError::EmptyResponse) => (None, FunctionCodeResult::NoResponse),
            Err(e) => (None, FunctionCodeResult::Error(e.to_string())),
        };

        debug!("Function code {} classified as {:?}", function_code, result);

        Probe {
            function_code,
            request,
            response,
            result,
        }
    }

    /// Lazily probe every function code in order; consumes the scanner
    pub fn into_stream(self) -> impl Stream<Item = Probe> {
        stream::unfold((self, 0u8), |(mut scanner, code)| async move {
            if code >= MAX_FUNCTION_CODES {
                return None;
            }
            let probe = scanner.probe(code).await;
            Some((probe, (scanner, code + 1)))
        })
    }
}

/// Connect and return the probe sequence for `target`
///
/// Connection failure is returned before any probe is sent.
pub async fn scan(target: &TcpTarget) -> Result<impl Stream<Item = Probe>, TransportError> {
    Ok(Scanner::connect(target).await?.into_stream())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn reply(transaction_id: u16, function_code: u8, data: &[u8]) -> Vec<u8> {
        let mut pdu = vec![function_code];
        pdu.extend_from_slice(data);
        codec::encode_pdu(transaction_id, 1, &pdu).to_vec()
    }

    #[test]
    fn test_illegal_function_is_unsupported() {
        let raw = reply(45, 0xAB, &[0x01]);
        assert_eq!(classify_response(43, &raw, 45), FunctionCodeResult::Unsupported);
    }

    #[test]
    fn test_other_exceptions_are_supported() {
        let raw = reply(5, 0x83, &[0x02]);
        assert_eq!(
            classify_response(3, &raw, 5),
            FunctionCodeResult::Supported(Some("Read Multiple Holding Registers".into()))
        );
    }

    #[test]
    fn test_unnamed_code_is_supported() {
        let raw = reply(102, 100, &[0x00]);
        assert_eq!(classify_response(100, &raw, 102), FunctionCodeResult::Supported(None));
    }

    #[test]
    fn test_truncated_reply_is_error() {
        let result = classify_response(3, &[0x00, 0x05, 0x00], 5);
        assert!(matches!(result, FunctionCodeResult::Error(_)));
    }

    #[test]
    fn test_stale_reply_is_error() {
        let raw = reply(11, 0x03, &[0x02, 0x00, 0x01]);
        assert!(matches!(
            classify_response(3, &raw, 5),
            FunctionCodeResult::Error(_)
        ));
    }

    #[test]
    fn test_transaction_ids_start_at_two() {
        assert_eq!(probe_transaction_id(0), 2);
        assert_eq!(probe_transaction_id(126), 128);
    }

    #[test]
    fn test_probe_display() {
        let probe = Probe {
            function_code: 3,
            request: codec::encode(5, 0, 3, 0, 1),
            response: None,
            result: FunctionCodeResult::Supported(Some("Read Multiple Holding Registers".into())),
        };
        assert_eq!(
            probe.to_string(),
            "Function Code 3 (Read Multiple Holding Registers) is supported."
        );
        assert!(!probe.lists_sub_functions());
    }

    #[tokio::test]
    async fn test_stream_covers_every_code() {
        let (client, mut device) = duplex(1024);

        // Only function code 3 is implemented
        tokio::spawn(async move {
            let mut request = [0u8; 12];
            while device.read_exact(&mut request).await.is_ok() {
                let tid = u16::from_be_bytes([request[0], request[1]]);
                let fc = request[7];
                let frame = if fc == 3 {
                    reply(tid, 3, &[0x02, 0x00, 0x00])
                } else {
                    reply(tid, fc | 0x80, &[0x01])
                };
                if device.write_all(&frame).await.is_err() {
                    break;
                }
            }
        });

        let scanner = Scanner::new(Transport::new(client, Duration::from_secs(1)), 1);
        let probes: Vec<Probe> = scanner.into_stream().collect().await;

        assert_eq!(probes.len(), MAX_FUNCTION_CODES as usize);
        for (i, probe) in probes.iter().enumerate() {
            assert_eq!(probe.function_code as usize, i);
            if i == 3 {
                assert!(probe.result.is_supported());
                assert_eq!(probe.return_codes(), Some((0x03, 0x02)));
            } else {
                assert_eq!(probe.result, FunctionCodeResult::Unsupported);
            }
        }
    }

    #[tokio::test]
    async fn test_late_reply_does_not_shift_later_codes() {
        let (client, mut device) = duplex(1024);

        // Code 9 is answered after the client has given up on it
        tokio::spawn(async move {
            let mut request = [0u8; 12];
            while device.read_exact(&mut request).await.is_ok() {
                let tid = u16::from_be_bytes([request[0], request[1]]);
                let fc = request[7];
                if fc == 9 {
                    tokio::time::sleep(Duration::from_millis(150)).await;
                }
                let frame = if fc == 3 {
                    reply(tid, 3, &[0x02, 0x00, 0x00])
                } else {
                    reply(tid, fc | 0x80, &[0x01])
                };
                if device.write_all(&frame).await.is_err() {
                    break;
                }
            }
        });

        let scanner = Scanner::new(Transport::new(client, Duration::from_millis(100)), 1);
        let probes: Vec<Probe> = scanner.into_stream().collect().await;

        assert_eq!(probes[9].result, FunctionCodeResult::Timeout);
        assert_eq!(probes[10].result, FunctionCodeResult::Unsupported);
        assert!(probes[3].result.is_supported());
        assert!(probes
            .iter()
            .all(|p| !matches!(p.result, FunctionCodeResult::Error(_))));
        assert_eq!(
            probes
                .iter()
                .filter(|p| p.result == FunctionCodeResult::Unsupported)
                .count(),
            MAX_FUNCTION_CODES as usize - 2
        );
    }
}
