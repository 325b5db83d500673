//! Checksum calculation for command frames.
//!
//! Mode-select frames end with a single byte holding the running
//! exclusive-OR of every byte before it.

/// Calculate the XOR checksum of `data`.
///
/// # Example
///
/// ```
/// use dm40_rust_ble::protocol::xor_checksum;
///
/// assert_eq!(xor_checksum(&[0x0F, 0xF0]), 0xFF);
/// assert_eq!(xor_checksum(&[]), 0x00);
/// ```
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, &byte| acc ^ byte)
}

/// Verify that the last byte of `data` is the checksum of the bytes before it.
///
/// Returns `false` for frames shorter than two bytes.
pub fn verify_checksum(data: &[u8]) -> bool {
    match data.split_last() {
        Some((&checksum, body)) if !body.is_empty() => xor_checksum(body) == checksum,
        _ => false,
    }
}

/// Return a copy of `data` with its checksum appended.
pub fn append_checksum(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len() + 1);
    result.extend_from_slice(data);
    result.push(xor_checksum(data));
    result
}
