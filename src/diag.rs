//! Serial-line diagnostics over Modbus TCP
//!
//! Thirteen read-only queries make up the default sweep. Five operations
//! change device state and only run when explicitly selected; the two sets
//! never run in the same invocation.

use std::fmt;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::config::TcpTarget;
use crate::modbus::codec::{self, FrameError};
use crate::modbus::tables::DIAGNOSTICS_FUNCTION_CODE;
use crate::modbus::transport::{Transport, TransportError};

const GET_COMM_EVENT_COUNTER: u8 = 0x0B;
const GET_COMM_EVENT_LOG: u8 = 0x0C;

/// Delimiter written by Change ASCII Input Delimiter
const ASCII_DELIMITER: u8 = b'\n';
/// Restart Communications data word that also clears the event log
const RESTART_CLEAR_LOG: u16 = 0xFF00;
/// Get/Clear Modbus Plus operation: get statistics
const MODBUS_PLUS_GET_STATISTICS: u16 = 0x0003;

/// Non-disruptive diagnostic queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticQuery {
    DiagnosticRegister,
    ChangeAsciiInputDelimiter,
    BusMessageCount,
    BusCommErrorCount,
    BusExceptionErrorCount,
    SlaveMessageCount,
    SlaveNoResponseCount,
    SlaveNakCount,
    SlaveBusyCount,
    BusCharOverrunCount,
    IopOverrunCount,
    CommEventCounter,
    CommEventLog,
}

impl DiagnosticQuery {
    pub const ALL: [DiagnosticQuery; 13] = [
        DiagnosticQuery::DiagnosticRegister,
        DiagnosticQuery::ChangeAsciiInputDelimiter,
        DiagnosticQuery::BusMessageCount,
        DiagnosticQuery::BusCommErrorCount,
        DiagnosticQuery::BusExceptionErrorCount,
        DiagnosticQuery::SlaveMessageCount,
        DiagnosticQuery::SlaveNoResponseCount,
        DiagnosticQuery::SlaveNakCount,
        DiagnosticQuery::SlaveBusyCount,
        DiagnosticQuery::BusCharOverrunCount,
        DiagnosticQuery::IopOverrunCount,
        DiagnosticQuery::CommEventCounter,
        DiagnosticQuery::CommEventLog,
    ];

    pub fn description(self) -> &'static str {
        match self {
            DiagnosticQuery::DiagnosticRegister => "Diagnostic Register",
            DiagnosticQuery::ChangeAsciiInputDelimiter => "Change ASCII Input Delimiter",
            DiagnosticQuery::BusMessageCount => "Bus Message Count",
            DiagnosticQuery::BusCommErrorCount => "Bus Communication Error Count",
            DiagnosticQuery::BusExceptionErrorCount => "Bus Exception Error Count",
            DiagnosticQuery::SlaveMessageCount => "Slave Message Count",
            DiagnosticQuery::SlaveNoResponseCount => "Slave No Response Count",
            DiagnosticQuery::SlaveNakCount => "Slave NAK Count",
            DiagnosticQuery::SlaveBusyCount => "Slave Busy Count",
            DiagnosticQuery::BusCharOverrunCount => "Bus Character Overrun Count",
            DiagnosticQuery::IopOverrunCount => "IOP Overrun Count",
            DiagnosticQuery::CommEventCounter => "Communication Event Counter",
            DiagnosticQuery::CommEventLog => "Communication Event Log",
        }
    }

    fn request(self) -> DiagnosticRequest {
        let sub = |sub_function| DiagnosticRequest::SubFunction {
            sub_function,
            data: 0x0000,
        };
        match self {
            DiagnosticQuery::DiagnosticRegister => sub(0x02),
            DiagnosticQuery::ChangeAsciiInputDelimiter => DiagnosticRequest::SubFunction {
                sub_function: 0x03,
                data: u16::from(ASCII_DELIMITER) << 8,
            },
            DiagnosticQuery::BusMessageCount => sub(0x0B),
            DiagnosticQuery::BusCommErrorCount => sub(0x0C),
            DiagnosticQuery::BusExceptionErrorCount => sub(0x0D),
            DiagnosticQuery::SlaveMessageCount => sub(0x0E),
            DiagnosticQuery::SlaveNoResponseCount => sub(0x0F),
            DiagnosticQuery::SlaveNakCount => sub(0x10),
            DiagnosticQuery::SlaveBusyCount => sub(0x11),
            DiagnosticQuery::BusCharOverrunCount => sub(0x12),
            DiagnosticQuery::IopOverrunCount => sub(0x13),
            DiagnosticQuery::CommEventCounter => DiagnosticRequest::EventCounter,
            DiagnosticQuery::CommEventLog => DiagnosticRequest::EventLog,
        }
    }
}

/// State-changing diagnostic operations, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DisruptiveOp {
    RestartComm,
    ForceListenOnly,
    ClearCounters,
    ClearOverrun,
    GetClearModbusPlus,
}

impl DisruptiveOp {
    pub fn description(self) -> &'static str {
        match self {
            DisruptiveOp::RestartComm => "Restart Communication",
            DisruptiveOp::ForceListenOnly => "Force Listen-Only Mode",
            DisruptiveOp::ClearCounters => "Clear Counters",
            DisruptiveOp::ClearOverrun => "Clear Overrun Counter",
            DisruptiveOp::GetClearModbusPlus => "Get/Clear modbus plus",
        }
    }

    fn request(self) -> DiagnosticRequest {
        let (sub_function, data) = match self {
            DisruptiveOp::RestartComm => (0x01, RESTART_CLEAR_LOG),
            DisruptiveOp::ForceListenOnly => (0x04, 0x0000),
            DisruptiveOp::ClearCounters => (0x0A, 0x0000),
            DisruptiveOp::ClearOverrun => (0x14, 0x0000),
            DisruptiveOp::GetClearModbusPlus => (0x15, MODBUS_PLUS_GET_STATISTICS),
        };
        DiagnosticRequest::SubFunction { sub_function, data }
    }
}

/// What one `diag` invocation runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticMode {
    NonDisruptive,
    /// Never empty; sorted and deduplicated
    Disruptive(Vec<DisruptiveOp>),
}

impl DiagnosticMode {
    /// Any selected disruptive operation suppresses the default sweep
    pub fn from_flags(flags: impl IntoIterator<Item = DisruptiveOp>) -> Self {
        let mut ops: Vec<DisruptiveOp> = flags.into_iter().collect();
        ops.sort();
        ops.dedup();
        if ops.is_empty() {
            DiagnosticMode::NonDisruptive
        } else {
            DiagnosticMode::Disruptive(ops)
        }
    }

    pub fn operations(&self) -> Vec<Operation> {
        match self {
            DiagnosticMode::NonDisruptive => DiagnosticQuery::ALL
                .into_iter()
                .map(Operation::Query)
                .collect(),
            DiagnosticMode::Disruptive(ops) => ops.iter().copied().map(Operation::Disruptive).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Query(DiagnosticQuery),
    Disruptive(DisruptiveOp),
}

impl Operation {
    pub fn description(self) -> &'static str {
        match self {
            Operation::Query(q) => q.description(),
            Operation::Disruptive(op) => op.description(),
        }
    }

    fn request(self) -> DiagnosticRequest {
        match self {
            Operation::Query(q) => q.request(),
            Operation::Disruptive(op) => op.request(),
        }
    }
}

/// Wire form of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiagnosticRequest {
    SubFunction { sub_function: u16, data: u16 },
    EventCounter,
    EventLog,
}

impl DiagnosticRequest {
    fn function_code(self) -> u8 {
        match self {
            DiagnosticRequest::SubFunction { .. } => DIAGNOSTICS_FUNCTION_CODE,
            DiagnosticRequest::EventCounter => GET_COMM_EVENT_COUNTER,
            DiagnosticRequest::EventLog => GET_COMM_EVENT_LOG,
        }
    }

    fn pdu(self) -> BytesMut {
        let mut pdu = BytesMut::with_capacity(5);
        pdu.put_u8(self.function_code());
        if let DiagnosticRequest::SubFunction { sub_function, data } = self {
            pdu.put_u16(sub_function);
            pdu.put_u16(data);
        }
        pdu
    }

    /// Render a normal response payload (bytes after the function code)
    fn interpret(self, payload: &[u8]) -> Result<String, FrameError> {
        let short = || FrameError::ShortPayload {
            function_code: self.function_code(),
            len: payload.len(),
        };
        let word = |i: usize| u16::from_be_bytes([payload[i], payload[i + 1]]);

        match self {
            DiagnosticRequest::SubFunction { sub_function, .. } => {
                if payload.len() < 4 || payload.len() % 2 != 0 {
                    return Err(short());
                }
                let echoed = word(0);
                if echoed != sub_function {
                    return Err(FrameError::UnexpectedSubFunction {
                        expected: sub_function,
                        received: echoed,
                    });
                }
                let words: Vec<u16> = (2..payload.len()).step_by(2).map(word).collect();
                Ok(match words.as_slice() {
                    [value] => format!("value {}", value),
                    many => format!("{} words {:?}", many.len(), many),
                })
            }
            DiagnosticRequest::EventCounter => {
                if payload.len() < 4 {
                    return Err(short());
                }
                Ok(format!("status {:#06x}, event count {}", word(0), word(2)))
            }
            DiagnosticRequest::EventLog => {
                if payload.len() < 7 {
                    return Err(short());
                }
                let byte_count = usize::from(payload[0]);
                let events = payload
                    .get(7..1 + byte_count.max(6))
                    .unwrap_or(&payload[7..]);
                Ok(format!(
                    "status {:#06x}, event count {}, message count {}, events [{}]",
                    word(1),
                    word(3),
                    word(5),
                    hex::encode(events)
                ))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticStatus {
    Success(String),
    Unsupported(String),
    CommError(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticOutcome {
    pub description: String,
    pub status: DiagnosticStatus,
    pub response: Option<Vec<u8>>,
}

impl DiagnosticOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, DiagnosticStatus::Success(_))
    }
}

impl fmt::Display for DiagnosticOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            DiagnosticStatus::Success(payload) => write!(f, "{}: {}", self.description, payload),
            DiagnosticStatus::Unsupported(reason) => {
                write!(f, "{}: Not supported ({})", self.description, reason)
            }
            DiagnosticStatus::CommError(detail) => {
                write!(f, "{}: Communication error: {}", self.description, detail)
            }
        }
    }
}

/// Runs diagnostic operations over an exclusively owned connection
pub struct DiagnosticExecutor<S = TcpStream> {
    transport: Transport<S>,
    unit_id: u8,
    next_transaction: u16,
}

impl DiagnosticExecutor<TcpStream> {
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

impl<S> DiagnosticExecutor<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(transport: Transport<S>, unit_id: u8) -> Self {
        Self {
            transport,
            unit_id,
            next_transaction: 1,
        }
    }

    fn transaction_id(&mut self) -> u16 {
        let id = self.next_transaction;
        self.next_transaction = self.next_transaction.wrapping_add(1);
        id
    }

    /// Run one operation; failures become outcomes, never errors
    pub async fn execute(&mut self, operation: Operation) -> DiagnosticOutcome {
        let description = operation.description().to_string();
        let request = operation.request();
        let transaction_id = self.transaction_id();
        let adu = codec::encode_pdu(transaction_id, self.unit_id, &request.pdu());

        debug!("{}: sending {}", description, hex::encode(&adu));

        let raw = match self.transport.send_recv(&adu, transaction_id).await {
            Ok(raw) => raw,
            Err(TransportError::Timeout(_))
                if operation == Operation::Disruptive(DisruptiveOp::ForceListenOnly) =>
            {
                return DiagnosticOutcome {
                    description,
                    status: DiagnosticStatus::Success(
                        "no response expected, device is now in listen-only mode".to_string(),
                    ),
                    response: None,
                };
            }
            Err(e) => {
                warn!("{}: {}", description, e);
                return DiagnosticOutcome {
                    description,
                    status: DiagnosticStatus::CommError(e.to_string()),
                    response: None,
                };
            }
        };

        let status = interpret_response(request, &raw, transaction_id);
        DiagnosticOutcome {
            description,
            status,
            response: Some(raw),
        }
    }

    pub async fn run_nondisruptive<F>(&mut self, observe: F) -> Vec<DiagnosticOutcome>
    where
        F: FnMut(DiagnosticEvent<'_>),
    {
        self.run(&DiagnosticMode::NonDisruptive, observe).await
    }

    /// Run only the selected state-changing operations; nothing when none is selected
    pub async fn run_disruptive<F>(
        &mut self,
        flags: impl IntoIterator<Item = DisruptiveOp>,
        observe: F,
    ) -> Vec<DiagnosticOutcome>
    where
        F: FnMut(DiagnosticEvent<'_>),
    {
        match DiagnosticMode::from_flags(flags) {
            DiagnosticMode::NonDisruptive => Vec::new(),
            mode => self.run(&mode, observe).await,
        }
    }

    /// Run every operation of `mode` in order, reporting each to `observe`
    pub async fn run<F>(&mut self, mode: &DiagnosticMode, mut observe: F) -> Vec<DiagnosticOutcome>
    where
        F: FnMut(DiagnosticEvent<'_>),
    {
        let mut outcomes = Vec::new();
        for operation in mode.operations() {
            observe(DiagnosticEvent::Starting(operation));
            let outcome = self.execute(operation).await;
            observe(DiagnosticEvent::Finished(&outcome));
            outcomes.push(outcome);
        }
        outcomes
    }
}

/// Progress reported while a diagnostic run is under way
#[derive(Debug, Clone, Copy)]
pub enum DiagnosticEvent<'a> {
    Starting(Operation),
    Finished(&'a DiagnosticOutcome),
}

fn interpret_response(request: DiagnosticRequest, raw: &[u8], transaction_id: u16) -> DiagnosticStatus {
    let parsed = match codec::decode(raw).and_then(|p| p.check_transaction(transaction_id).map(|_| p)) {
        Ok(parsed) => parsed,
        Err(e) => return DiagnosticStatus::CommError(e.to_string()),
    };

    if let Some(exception) = parsed.exception() {
        let reason = exception.description().unwrap_or("unknown error");
        return DiagnosticStatus::Unsupported(reason.to_string());
    }

    match parsed
        .payload_for(request.function_code())
        .and_then(|payload| request.interpret(payload))
    {
        Ok(payload) => DiagnosticStatus::Success(payload),
        Err(e) => DiagnosticStatus::CommError(e.to_string()),
    }
}
