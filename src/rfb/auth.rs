//! VNC authentication (RFB security type 2).
//!
//! The server sends a 16-byte challenge; the client encrypts it with DES in
//! two ECB blocks, keyed by the password truncated/padded to 8 bytes with
//! each key byte bit-reversed (a VNC quirk dating back to the original
//! implementation).

use des::Des;
use des::cipher::{BlockEncrypt, KeyInit};

/// Compute the 16-byte response to a VNC authentication challenge.
pub fn challenge_response(challenge: &[u8; 16], password: &str) -> [u8; 16] {
    let key = make_des_key(password);
    let cipher = Des::new((&key).into());
    let mut blocks = [[0u8; 8]; 2];
    blocks[0].copy_from_slice(&challenge[..8]);
    blocks[1].copy_from_slice(&challenge[8..]);
    for block in &mut blocks {
        cipher.encrypt_block(block.into());
    }
    let mut response = [0u8; 16];
    response[..8].copy_from_slice(&blocks[0]);
    response[8..].copy_from_slice(&blocks[1]);
    response
}

/// Build the DES key: password null-padded to 8 bytes, bits of each byte
/// reversed.
fn make_des_key(password: &str) -> [u8; 8] {
    let mut key = [0u8; 8];
    let bytes = password.as_bytes();
    let len = bytes.len().min(8);
    key[..len].copy_from_slice(&bytes[..len]);
    for b in &mut key {
        *b = b.reverse_bits();
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_bit_reversed_and_padded() {
        // 'a' = 0x61 = 0b0110_0001, reversed = 0b1000_0110 = 0x86
        let key = make_des_key("a");
        assert_eq!(key[0], 0x86);
        assert_eq!(&key[1..], &[0u8; 7]);
    }

    #[test]
    fn long_passwords_are_truncated_to_eight_bytes() {
        let short = make_des_key("12345678");
        let long = make_des_key("123456789abcdef");
        assert_eq!(short, long);
    }

    #[test]
    fn response_is_deterministic_and_password_dependent() {
        let challenge = [0x5Au8; 16];
        let a = challenge_response(&challenge, "myroot");
        let b = challenge_response(&challenge, "myroot");
        let c = challenge_response(&challenge, "other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, challenge); // encryption actually happened
    }

    #[test]
    fn blocks_are_encrypted_independently() {
        // ECB: identical challenge halves produce identical response halves.
        let challenge = [0x33u8; 16];
        let response = challenge_response(&challenge, "secret");
        assert_eq!(&response[0..8], &response[8..16]);
    }
}
