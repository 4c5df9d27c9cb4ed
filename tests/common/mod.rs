//! In-process simulated Modbus TCP device for integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use modbuster::config::{Settings, TcpTarget};

/// One request as seen by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seen {
    pub transaction_id: u16,
    pub function_code: u8,
    /// First two data words (address/quantity or sub-function/data)
    pub words: (u16, u16),
}

#[derive(Default)]
pub struct State {
    pub coils: HashMap<u16, bool>,
    pub discrete: HashMap<u16, bool>,
    pub input: HashMap<u16, u16>,
    pub holding: HashMap<u16, u16>,
    /// Function codes the device never answers
    pub silent: HashSet<u8>,
    /// Function codes answered only after the given delay
    pub late: HashMap<u8, Duration>,
    /// Addresses at or above this answer "Illegal data address"
    pub limit: u32,
    pub log: Vec<Seen>,
    pub messages: u16,
}

pub struct SimDevice {
    pub addr: SocketAddr,
    pub state: Arc<Mutex<State>>,
    handle: JoinHandle<()>,
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl SimDevice {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(setup: impl FnOnce(&mut State)) -> Self {
        let mut state = State {
            limit: 65_536,
            ..Default::default()
        };
        setup(&mut state);
        let state = Arc::new(Mutex::new(state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let shared = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, shared.clone()));
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn target(&self) -> TcpTarget {
        let settings = Settings {
            port: self.addr.port(),
            unit_id: 1,
            timeout_ms: 300,
            connect_timeout_ms: 1000,
        };
        settings.target(self.addr.ip().to_string())
    }

    pub fn log(&self) -> Vec<Seen> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn holding(&self, addr: u16) -> Option<u16> {
        self.state.lock().unwrap().holding.get(&addr).copied()
    }
}

/// A port with nothing listening on it
pub fn closed_target() -> TcpTarget {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut target = Settings::default().target("127.0.0.1");
    target.port = port;
    target.connect_timeout = Duration::from_millis(500);
    target
}

async fn serve(mut socket: TcpStream, state: Arc<Mutex<State>>) {
    let mut header = [0u8; 7];
    loop {
        if socket.read_exact(&mut header).await.is_err() {
            return;
        }
        let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
        let mut pdu = vec![0u8; length.saturating_sub(1)];
        if socket.read_exact(&mut pdu).await.is_err() {
            return;
        }

        let (reply, delay) = {
            let mut state = state.lock().unwrap();
            let delay = pdu.first().and_then(|fc| state.late.get(fc).copied());
            let reply = handle(&mut state, u16::from_be_bytes([header[0], header[1]]), &pdu);
            (reply, delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(reply) = reply {
            let mut frame = header[..4].to_vec();
            frame.extend_from_slice(&((reply.len() + 1) as u16).to_be_bytes());
            frame.push(header[6]);
            frame.extend_from_slice(&reply);
            if socket.write_all(&frame).await.is_err() {
                return;
            }
        }
    }
}

fn word(data: &[u8], i: usize) -> u16 {
    u16::from_be_bytes([
        data.get(i).copied().unwrap_or(0),
        data.get(i + 1).copied().unwrap_or(0),
    ])
}

fn exception(fc: u8, code: u8) -> Option<Vec<u8>> {
    Some(vec![fc | 0x80, code])
}

fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

fn handle(state: &mut State, transaction_id: u16, pdu: &[u8]) -> Option<Vec<u8>> {
    let fc = *pdu.first()?;
    let data = &pdu[1..];
    state.log.push(Seen {
        transaction_id,
        function_code: fc,
        words: (word(data, 0), word(data, 2)),
    });
    state.messages = state.messages.wrapping_add(1);

    if state.silent.contains(&fc) {
        return None;
    }

    let (addr, qty) = (word(data, 0), word(data, 2));
    let in_range = |state: &State| u32::from(addr) + u32::from(qty) <= state.limit;

    match fc {
        0x01 | 0x02 => {
            if !in_range(state) {
                return exception(fc, 0x02);
            }
            let table = if fc == 0x01 { &state.coils } else { &state.discrete };
            let bits: Vec<bool> = (0..qty)
                .map(|i| table.get(&(addr + i)).copied().unwrap_or(false))
                .collect();
            let packed = pack_bits(&bits);
            let mut reply = vec![fc, packed.len() as u8];
            reply.extend_from_slice(&packed);
            Some(reply)
        }
        0x03 | 0x04 => {
            if !in_range(state) {
                return exception(fc, 0x02);
            }
            let table = if fc == 0x03 { &state.holding } else { &state.input };
            let mut reply = vec![fc, (qty * 2) as u8];
            for i in 0..qty {
                let value = table.get(&(addr + i)).copied().unwrap_or(0);
                reply.extend_from_slice(&value.to_be_bytes());
            }
            Some(reply)
        }
        0x0F => {
            if !in_range(state) {
                return exception(fc, 0x02);
            }
            let bytes = match data.get(5..) {
                Some(bytes) if bytes.len() >= usize::from(qty).div_ceil(8) => bytes,
                _ => return exception(fc, 0x03),
            };
            for i in 0..qty {
                let bit = bytes[usize::from(i / 8)] & (1 << (i % 8)) != 0;
                state.coils.insert(addr + i, bit);
            }
            Some(pdu[..5].to_vec())
        }
        0x10 => {
            if !in_range(state) {
                return exception(fc, 0x02);
            }
            if data.len() < 5 + usize::from(qty) * 2 {
                return exception(fc, 0x03);
            }
            for i in 0..qty {
                let value = word(data, 5 + usize::from(i) * 2);
                state.holding.insert(addr + i, value);
            }
            Some(pdu[..5].to_vec())
        }
        0x08 => {
            let sub = word(data, 0);
            match sub {
                // listen-only devices stop answering
                0x04 => None,
                0x13 | 0x15 => exception(fc, 0x01),
                0x00 | 0x01 | 0x03 | 0x0A | 0x14 => Some(pdu.to_vec()),
                0x0B | 0x0E => {
                    let mut reply = vec![fc];
                    reply.extend_from_slice(&sub.to_be_bytes());
                    reply.extend_from_slice(&state.messages.to_be_bytes());
                    Some(reply)
                }
                0x02 | 0x0C..=0x12 => {
                    let mut reply = vec![fc];
                    reply.extend_from_slice(&sub.to_be_bytes());
                    reply.extend_from_slice(&0u16.to_be_bytes());
                    Some(reply)
                }
                _ => exception(fc, 0x03),
            }
        }
        0x0B => {
            let mut reply = vec![fc, 0x00, 0x00];
            reply.extend_from_slice(&state.messages.to_be_bytes());
            Some(reply)
        }
        0x0C => {
            let mut reply = vec![fc, 8, 0x00, 0x00];
            reply.extend_from_slice(&state.messages.to_be_bytes());
            reply.extend_from_slice(&state.messages.to_be_bytes());
            reply.extend_from_slice(&[0x20, 0x00]);
            Some(reply)
        }
        _ => exception(fc, 0x01),
    }
}
