//! Function code discovery against a simulated device

mod common;

use std::time::Duration;

use futures_util::StreamExt;

use common::{closed_target, SimDevice};
use modbuster::commands;
use modbuster::output::Console;
use modbuster::scanner::{self, FunctionCodeResult, Probe, MAX_FUNCTION_CODES};

async fn scan_all(device: &SimDevice) -> Vec<Probe> {
    scanner::scan(&device.target())
        .await
        .expect("device should accept the connection")
        .collect()
        .await
}

#[tokio::test]
async fn test_classifies_supported_and_unsupported() {
    let device = SimDevice::start().await;
    let probes = scan_all(&device).await;

    assert_eq!(probes.len(), MAX_FUNCTION_CODES as usize);
    assert_eq!(
        probes[3].result,
        FunctionCodeResult::Supported(Some("Read Multiple Holding Registers".to_string()))
    );
    assert_eq!(probes[43].result, FunctionCodeResult::Unsupported);

    // write codes reject the minimal probe with "Illegal data value" but are recognised
    assert!(probes[15].result.is_supported());
    assert!(probes[16].result.is_supported());
    assert!(probes[8].lists_sub_functions());
}

#[tokio::test]
async fn test_probe_frames_on_the_wire() {
    let device = SimDevice::start().await;
    scan_all(&device).await;

    let log = device.log();
    assert_eq!(log.len(), MAX_FUNCTION_CODES as usize);
    for (code, seen) in log.iter().enumerate() {
        assert_eq!(seen.function_code as usize, code);
        assert_eq!(seen.transaction_id as usize, code + 2);
        assert_eq!(seen.words, (0x0000, 0x0001));
    }
}

#[tokio::test]
async fn test_scan_is_repeatable() {
    let device = SimDevice::start().await;

    let first: Vec<FunctionCodeResult> = scan_all(&device).await.into_iter().map(|p| p.result).collect();
    let second: Vec<FunctionCodeResult> = scan_all(&device).await.into_iter().map(|p| p.result).collect();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_timeout_does_not_abort_scan() {
    let device = SimDevice::start_with(|state| {
        state.silent.insert(9);
    })
    .await;

    let probes = scan_all(&device).await;

    assert_eq!(probes[9].result, FunctionCodeResult::Timeout);
    assert_eq!(probes[10].result, FunctionCodeResult::Unsupported);
    assert!(probes[11].result.is_supported());
    assert_eq!(probes.len(), MAX_FUNCTION_CODES as usize);
}

#[tokio::test]
async fn test_late_reply_is_discarded() {
    let device = SimDevice::start_with(|state| {
        state.late.insert(9, Duration::from_millis(450));
    })
    .await;

    let probes = scan_all(&device).await;

    assert_eq!(probes[9].result, FunctionCodeResult::Timeout);
    assert_eq!(probes[10].result, FunctionCodeResult::Unsupported);
    assert!(probes[11].result.is_supported());
    assert!(probes
        .iter()
        .all(|p| !matches!(p.result, FunctionCodeResult::Error(_))));

    let quiet = scan_all(&SimDevice::start().await).await;
    for (late, normal) in probes.iter().zip(&quiet).skip(10) {
        assert_eq!(late.result, normal.result, "function code {}", late.function_code);
    }
}

#[tokio::test]
async fn test_connect_failure_is_fatal() {
    assert!(scanner::scan(&closed_target()).await.is_err());
}

#[tokio::test]
async fn test_getfunctions_output() {
    let device = SimDevice::start().await;
    let mut console = Console::new(Vec::new(), false);

    let supported = commands::getfunctions(&mut console, &device.target())
        .await
        .unwrap();
    let text = String::from_utf8(console.into_inner()).unwrap();

    assert!(text.contains("[+] Function Code 3 (Read Multiple Holding Registers) is supported."));
    assert!(text.contains("[+] Function Code 8 (Diagnostic) is supported."));
    assert!(text.contains("[└────────] Check for Diagnostic Sub-Functions:"));
    assert!(text.contains("\t[*] Sub-Function 0x15: Get/Clear Modbus Plus Response"));
    // unsupported codes stay quiet outside verbose mode
    assert!(!text.contains("Function Code 43"));
    assert!(text.contains(&format!("[+] {} of 127 function codes supported", supported)));
}

#[tokio::test]
async fn test_getfunctions_verbose_shows_raw_bytes() {
    let device = SimDevice::start().await;
    let mut console = Console::new(Vec::new(), true);

    commands::getfunctions(&mut console, &device.target())
        .await
        .unwrap();
    let text = String::from_utf8(console.into_inner()).unwrap();

    assert!(text.contains("[VERBOSE] OutBound Raw Bytes for 3: 000500000006010300000001"));
    assert!(text.contains("[VERBOSE] Function Code 43 is not supported."));
    assert!(text.contains("[VERBOSE] return_code: 171, exception_code: 1"));
}

#[tokio::test]
async fn test_getfunctions_reports_unreachable_host() {
    let mut console = Console::new(Vec::new(), false);
    let err = commands::getfunctions(&mut console, &closed_target())
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("Modbus is not running on: 127.0.0.1"));
}
