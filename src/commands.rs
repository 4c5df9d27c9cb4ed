//! The four operator commands
//!
//! Each command owns one connection from open to close and renders its
//! results through a [`Console`]. Validation happens before any network I/O.

use std::io::Write;
use std::pin::pin;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tracing::info;

use crate::config::TcpTarget;
use crate::diag::{
    DiagnosticEvent, DiagnosticExecutor, DiagnosticMode, DiagnosticStatus, DisruptiveOp, Operation,
};
use crate::executor::{self, WriteError};
use crate::modbus::{classify, tables, ModbusClient};
use crate::output::Console;
use crate::scanner::{self, FunctionCodeResult, MAX_FUNCTION_CODES};

fn announce<W: Write>(console: &mut Console<W>, target: &TcpTarget) {
    console.verbose(format_args!(
        "Connecting to {}:{} as slave {}",
        target.host, target.port, target.unit_id
    ));
}

/// `read <host> <address> <count>`
pub async fn read<W: Write>(
    console: &mut Console<W>,
    target: &TcpTarget,
    address: i64,
    count: usize,
) -> Result<()> {
    announce(console, target);
    console.verbose(format_args!(
        "Reading {} values starting at Modbus address {}",
        count, address
    ));

    let address = classify(address)?;
    executor::check_read(&address, count)?;

    let mut client = ModbusClient::connect(target).await?;
    let items = executor::read(&mut client, address, count).await?;
    info!("Read {} values from {}", items.len(), client.target());

    for item in &items {
        console.plain(item);
    }
    Ok(())
}

/// `write <host> <address> <values...>`
pub async fn write<W: Write, S: AsRef<str>>(
    console: &mut Console<W>,
    target: &TcpTarget,
    address: i64,
    values: &[S],
) -> Result<()> {
    announce(console, target);
    console.verbose(format_args!(
        "Writing values {:?} starting at Modbus address {}",
        values.iter().map(AsRef::as_ref).collect::<Vec<_>>(),
        address
    ));

    if values.is_empty() {
        return Err(WriteError::Empty.into());
    }
    let address = classify(address)?;
    let values = executor::coerce_values(address.range, values)?;
    executor::check_write(&address, &values)?;

    let mut client = ModbusClient::connect(target).await?;
    let summary = executor::write(&mut client, address, &values).await?;

    console.success(format_args!(
        "Wrote {} {} starting at address {}",
        summary.written,
        address.range,
        address.display_at(0)
    ));
    if summary.transactions > 1 {
        console.plain(format_args!(
            "    sent as {} separate transactions; chunks are not applied atomically",
            summary.transactions
        ));
    }
    Ok(())
}

/// `getfunctions <host>`
///
/// Returns the number of supported function codes.
pub async fn getfunctions<W: Write>(console: &mut Console<W>, target: &TcpTarget) -> Result<usize> {
    announce(console, target);

    let probes = scanner::scan(target)
        .await
        .with_context(|| format!("Modbus is not running on: {}", target.host))?;
    let mut probes = pin!(probes);

    console.success(format_args!(
        "Looking for supported function codes on {}",
        target.host
    ));

    let mut supported = 0;
    while let Some(probe) = probes.next().await {
        let code = probe.function_code;
        console.verbose(format_args!(
            "OutBound Raw Bytes for {}: {}",
            code,
            hex::encode(&probe.request)
        ));
        if let Some(raw) = &probe.response {
            console.verbose(format_args!("Inbound Raw Bytes for {}: {}", code, hex::encode(raw)));
        }
        if let Some((return_code, exception_code)) = probe.return_codes() {
            console.verbose(format_args!(
                "return_code: {}, exception_code: {}",
                return_code, exception_code
            ));
        }

        match &probe.result {
            FunctionCodeResult::Supported(_) => {
                supported += 1;
                console.success(&probe);
            }
            FunctionCodeResult::Unsupported => console.verbose(&probe),
            _ => console.failure(&probe),
        }

        if probe.lists_sub_functions() {
            console.plain("[└────────] Check for Diagnostic Sub-Functions:");
            for (sub_code, description) in tables::DIAGNOSTIC_SUB_FUNCTIONS {
                console.item(format_args!("Sub-Function 0x{:02X}: {}", sub_code, description));
            }
        }
    }

    console.success(format_args!(
        "{} of {} function codes supported",
        supported, MAX_FUNCTION_CODES
    ));
    Ok(supported)
}

/// `diag <host> [flags]`
///
/// Returns the number of operations that succeeded.
pub async fn diag<W: Write>(
    console: &mut Console<W>,
    target: &TcpTarget,
    flags: &[DisruptiveOp],
) -> Result<usize> {
    announce(console, target);

    let mode = DiagnosticMode::from_flags(flags.iter().copied());
    let mut executor = DiagnosticExecutor::connect(target).await?;

    let outcomes = match &mode {
        DiagnosticMode::NonDisruptive => {
            console.verbose("Running 13 non-disruptive diagnostic functions...");
            executor
                .run_nondisruptive(|event| report_diagnostic(console, event))
                .await
        }
        DiagnosticMode::Disruptive(ops) => {
            console.verbose("Dangerous flags detected, skipping regular diagnostic functions.");
            executor
                .run_disruptive(ops.iter().copied(), |event| report_diagnostic(console, event))
                .await
        }
    };

    let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
    Ok(succeeded)
}

fn report_diagnostic<W: Write>(console: &mut Console<W>, event: DiagnosticEvent<'_>) {
    match event {
        DiagnosticEvent::Starting(Operation::Disruptive(op)) => {
            console.plain(format_args!("Attempting To {}...", op.description()));
        }
        DiagnosticEvent::Starting(Operation::Query(_)) => {}
        DiagnosticEvent::Finished(outcome) => {
            if let Some(raw) = &outcome.response {
                console.verbose(format_args!(
                    "{}: Inbound Raw Bytes: {}",
                    outcome.description,
                    hex::encode(raw)
                ));
            }
            match outcome.status {
                DiagnosticStatus::Success(_) => console.success(outcome),
                _ => console.failure(outcome),
            }
        }
    }
}
