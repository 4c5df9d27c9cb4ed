//! Static Modbus lookup tables

/// Public function codes known by name
pub const FUNCTION_CODE_NAMES: &[(u8, &str)] = &[
    (1, "Read Coils"),
    (2, "Read Discrete Inputs"),
    (3, "Read Multiple Holding Registers"),
    (4, "Read Input Registers"),
    (5, "Write Single Coil"),
    (6, "Write Single Holding Register"),
    (7, "Read Exception Status"),
    (8, "Diagnostic"),
    (11, "Get Com Event Counter"),
    (12, "Get Com Event Log"),
    (15, "Write Multiple Coils"),
    (16, "Write Multiple Holding Registers"),
    (17, "Report Slave ID"),
    (20, "Read File Record"),
    (21, "Write File Record"),
    (22, "Mask Write Register"),
    (23, "Read/Write Multiple Registers"),
    (24, "Read FIFO Queue"),
    (43, "Read Device Identification"),
];

/// Sub-functions of function code 0x08
pub const DIAGNOSTIC_SUB_FUNCTIONS: &[(u16, &str)] = &[
    (0x00, "Return Query Data"),
    (0x01, "Restart Communications Option"),
    (0x02, "Return Diagnostic Register"),
    (0x03, "Change ASCII Input Delimiter"),
    (0x04, "Force Listen Only Mode"),
    (0x0A, "Clear Counters and Diagnostic Register"),
    (0x0B, "Return Bus Message Count"),
    (0x0C, "Return Bus Communication Error Count"),
    (0x0D, "Return Bus Exception Error Count"),
    (0x0E, "Return Slave Message Count"),
    (0x0F, "Return Slave No Response Count"),
    (0x10, "Return Slave NAK Count"),
    (0x11, "Return Slave Busy Count"),
    (0x12, "Return Bus Character Overrun Count"),
    (0x13, "Return IOP Overrun Count"),
    (0x14, "Clear Overrun Counter and Flag"),
    (0x15, "Get/Clear Modbus Plus Response"),
];

/// Exception codes a device may answer with
pub const EXCEPTION_DESCRIPTIONS: &[(u8, &str)] = &[
    (1, "Illegal function"),
    (2, "Illegal data address"),
    (3, "Illegal data value"),
    (4, "Slave device failure"),
    (5, "Acknowledge"),
    (6, "Slave device busy"),
    (8, "Memory parity error"),
    (10, "Gateway path unavailable"),
    (11, "Gateway target device failed to respond"),
];

pub const DIAGNOSTICS_FUNCTION_CODE: u8 = 0x08;
pub const ILLEGAL_FUNCTION: u8 = 0x01;

pub fn function_code_name(code: u8) -> Option<&'static str> {
    lookup(FUNCTION_CODE_NAMES, code)
}

pub fn exception_description(code: u8) -> Option<&'static str> {
    lookup(EXCEPTION_DESCRIPTIONS, code)
}

pub fn sub_function_name(code: u16) -> Option<&'static str> {
    lookup(DIAGNOSTIC_SUB_FUNCTIONS, code)
}

fn lookup<K: PartialEq + Copy>(table: &'static [(K, &'static str)], key: K) -> Option<&'static str> {
    table
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, name)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_function_names() {
        assert_eq!(function_code_name(3), Some("Read Multiple Holding Registers"));
        assert_eq!(function_code_name(43), Some("Read Device Identification"));
        assert_eq!(function_code_name(9), None);
        assert_eq!(function_code_name(126), None);
    }

    #[test]
    fn test_exception_taxonomy() {
        assert_eq!(exception_description(1), Some("Illegal function"));
        assert_eq!(
            exception_description(11),
            Some("Gateway target device failed to respond")
        );
        // 7 and 9 are not assigned
        assert_eq!(exception_description(7), None);
        assert_eq!(exception_description(9), None);
    }

    #[test]
    fn test_sub_function_names() {
        assert_eq!(sub_function_name(0x04), Some("Force Listen Only Mode"));
        assert_eq!(sub_function_name(0x15), Some("Get/Clear Modbus Plus Response"));
        assert_eq!(sub_function_name(0x05), None);
    }

    #[test]
    fn test_tables_have_unique_keys() {
        let mut codes: Vec<u8> = FUNCTION_CODE_NAMES.iter().map(|(c, _)| *c).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), FUNCTION_CODE_NAMES.len());

        let mut subs: Vec<u16> = DIAGNOSTIC_SUB_FUNCTIONS.iter().map(|(c, _)| *c).collect();
        subs.sort_unstable();
        subs.dedup();
        assert_eq!(subs.len(), DIAGNOSTIC_SUB_FUNCTIONS.len());
    }
}
