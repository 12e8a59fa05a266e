#![allow(dead_code)]

pub mod range_server;
pub mod socket_guard;

/// Deterministic test payload: `len` bytes cycling through 0..=250.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
