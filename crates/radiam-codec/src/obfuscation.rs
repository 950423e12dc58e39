//! RADIUS authenticator computation and secret-based attribute hiding
//! (RFC 2865 §3/§5.2, RFC 2868 §3.5, RFC 3579 §3.2).

use hmac::{Hmac, Mac};
use md5::{Digest, Md5};

type HmacMd5 = Hmac<Md5>;

pub fn md5_parts(parts: &[&[u8]]) -> [u8; 16] {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Accounting/CoA/Disconnect Request Authenticator: MD5 over the packet with
/// a zeroed authenticator field, followed by the secret.
pub fn request_authenticator(packet: &[u8], secret: &[u8]) -> [u8; 16] {
    md5_parts(&[&packet[..4], &[0u8; 16], &packet[20..], secret])
}

/// Response Authenticator: MD5 over the packet with the request's
/// authenticator in the field, followed by the secret.
pub fn response_authenticator(
    packet: &[u8],
    request_auth: &[u8; 16],
    secret: &[u8],
) -> [u8; 16] {
    md5_parts(&[&packet[..4], request_auth, &packet[20..], secret])
}

/// Message-Authenticator HMAC-MD5 over the full packet; the caller zeroes
/// the attribute payload and substitutes the authenticator field first.
pub fn message_authenticator(packet: &[u8], secret: &[u8]) -> [u8; 16] {
    let mut mac = HmacMd5::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(packet);
    mac.finalize().into_bytes().into()
}

fn xor_block(block: &[u8], key: &[u8; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for (i, byte) in block.iter().enumerate() {
        out[i] = byte ^ key[i];
    }
    out
}

/// RFC 2865 §5.2 password hiding: pad to 16-byte blocks, XOR each block with
/// the MD5 of secret + previous ciphertext block (first block keyed by the
/// request authenticator).
pub fn encrypt_user_password(plain: &[u8], secret: &[u8], auth: &[u8; 16]) -> Vec<u8> {
    let mut padded = plain.to_vec();
    let target = padded.len().max(1).div_ceil(16) * 16;
    padded.resize(target, 0);

    let mut out = Vec::with_capacity(padded.len());
    let mut key_input: [u8; 16] = *auth;
    for block in padded.chunks(16) {
        let key = md5_parts(&[secret, &key_input]);
        let cipher = xor_block(block, &key);
        out.extend_from_slice(&cipher);
        key_input = cipher;
    }
    out
}

/// Inverse of `encrypt_user_password`; trailing padding NULs are stripped.
pub fn decrypt_user_password(cipher: &[u8], secret: &[u8], auth: &[u8; 16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(cipher.len());
    let mut key_input: [u8; 16] = *auth;
    for block in cipher.chunks(16) {
        let key = md5_parts(&[secret, &key_input]);
        out.extend_from_slice(&xor_block(block, &key));
        if block.len() == 16 {
            key_input.copy_from_slice(block);
        }
    }
    while out.last() == Some(&0) {
        out.pop();
    }
    out
}

/// RFC 2868 §3.5 salted hiding: a two-byte salt (high bit set on the first
/// byte) keys the first block together with the request authenticator, and
/// the plaintext is prefixed with its length.
pub fn encrypt_salted(plain: &[u8], secret: &[u8], auth: &[u8; 16], salt: [u8; 2]) -> Vec<u8> {
    let mut padded = Vec::with_capacity(plain.len() + 1);
    padded.push(plain.len() as u8);
    padded.extend_from_slice(plain);
    let target = padded.len().div_ceil(16) * 16;
    padded.resize(target, 0);

    let mut out = Vec::with_capacity(2 + padded.len());
    out.extend_from_slice(&salt);

    let mut first = true;
    let mut prev = [0u8; 16];
    for block in padded.chunks(16) {
        let key = if first {
            first = false;
            md5_parts(&[secret, auth, &salt])
        } else {
            md5_parts(&[secret, &prev])
        };
        let cipher = xor_block(block, &key);
        out.extend_from_slice(&cipher);
        prev = cipher;
    }
    out
}

/// Inverse of `encrypt_salted`. Returns `None` on malformed input.
pub fn decrypt_salted(data: &[u8], secret: &[u8], auth: &[u8; 16]) -> Option<Vec<u8>> {
    if data.len() < 18 || (data.len() - 2) % 16 != 0 {
        return None;
    }
    let salt = &data[..2];
    let cipher = &data[2..];

    let mut plain = Vec::with_capacity(cipher.len());
    let mut first = true;
    let mut prev = [0u8; 16];
    for block in cipher.chunks(16) {
        let key = if first {
            first = false;
            md5_parts(&[secret, auth, salt])
        } else {
            md5_parts(&[secret, &prev])
        };
        plain.extend_from_slice(&xor_block(block, &key));
        prev.copy_from_slice(block);
    }

    let len = plain[0] as usize;
    if len > plain.len() - 1 {
        return None;
    }
    Some(plain[1..=len].to_vec())
}

/// Fresh salt for an outgoing salted attribute; the high bit of the first
/// byte is always set per RFC 2868.
pub fn new_salt() -> [u8; 2] {
    let raw: [u8; 2] = rand::random();
    [raw[0] | 0x80, raw[1]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_password_round_trip() {
        let auth: [u8; 16] = rand::random();
        for password in [
            &b"x"[..],
            b"correct horse battery staple",
            &[0u8; 37],
            &[0xFFu8; 128],
        ] {
            let cipher = encrypt_user_password(password, b"secret", &auth);
            assert_eq!(cipher.len() % 16, 0);
            let plain = decrypt_user_password(&cipher, b"secret", &auth);
            let mut expected = password.to_vec();
            while expected.last() == Some(&0) {
                expected.pop();
            }
            assert_eq!(plain, expected);
        }
    }

    #[test]
    fn test_user_password_rfc_chaining() {
        // Two blocks must chain on ciphertext, not plaintext
        let auth = [7u8; 16];
        let password = b"0123456789abcdef0123456789abcdef";
        let cipher = encrypt_user_password(password, b"s", &auth);

        let b1 = md5_parts(&[b"s", &auth]);
        let expected_first = xor_block(&password[..16], &b1);
        assert_eq!(&cipher[..16], &expected_first);

        let b2 = md5_parts(&[b"s", &expected_first]);
        let expected_second = xor_block(&password[16..], &b2);
        assert_eq!(&cipher[16..], &expected_second);
    }

    #[test]
    fn test_salted_round_trip() {
        let auth: [u8; 16] = rand::random();
        let salt = new_salt();
        assert_ne!(salt[0] & 0x80, 0);

        let cipher = encrypt_salted(b"tunnel-pass", b"secret", &auth, salt);
        assert_eq!(&cipher[..2], &salt);
        let plain = decrypt_salted(&cipher, b"secret", &auth).unwrap();
        assert_eq!(plain, b"tunnel-pass");
    }

    #[test]
    fn test_salted_rejects_short_input() {
        assert!(decrypt_salted(&[0x80, 1, 2, 3], b"s", &[0u8; 16]).is_none());
    }

    #[test]
    fn test_request_authenticator_matches_manual_md5() {
        let mut packet = vec![4u8, 9, 0, 26];
        packet.extend_from_slice(&[0u8; 16]);
        packet.extend_from_slice(&[44, 6, 0, 0, 0, 1]); // Acct-Session-Id-ish filler

        let auth = request_authenticator(&packet, b"secret");
        let manual = md5_parts(&[&packet[..4], &[0u8; 16], &packet[20..], b"secret"]);
        assert_eq!(auth, manual);
    }
}
