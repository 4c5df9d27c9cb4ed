//! Operator-facing console lines
//!
//! `[+]` success, `[-]` failure, `[VERBOSE]` elaboration (only when enabled),
//! `[*]` informational sub-items.

use std::fmt::Display;
use std::io::{self, Stdout, Write};

pub struct Console<W: Write = Stdout> {
    out: W,
    verbose: bool,
}

impl Console<Stdout> {
    pub fn stdout(verbose: bool) -> Self {
        Self::new(io::stdout(), verbose)
    }
}

impl<W: Write> Console<W> {
    pub fn new(out: W, verbose: bool) -> Self {
        Self { out, verbose }
    }

    pub fn success(&mut self, message: impl Display) {
        self.line(format_args!("[+] {}", message));
    }

    pub fn failure(&mut self, message: impl Display) {
        self.line(format_args!("[-] {}", message));
    }

    pub fn verbose(&mut self, message: impl Display) {
        if self.verbose {
            self.line(format_args!("[VERBOSE] {}", message));
        }
    }

    pub fn item(&mut self, message: impl Display) {
        self.line(format_args!("\t[*] {}", message));
    }

    /// Unprefixed line
    pub fn plain(&mut self, message: impl Display) {
        self.line(format_args!("{}", message));
    }

    fn line(&mut self, args: std::fmt::Arguments<'_>) {
        // stdout going away (e.g. a closed pipe) is not worth aborting a scan for
        let _ = writeln!(self.out, "{}", args);
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
