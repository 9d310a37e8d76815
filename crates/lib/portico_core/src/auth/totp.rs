//! Time-based one-time passwords (RFC 6238, HMAC-SHA1) and backup codes.

use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use rand::{Rng, RngCore, rng};
use sha1::Sha1;
use subtle::{Choice, ConstantTimeEq};

use super::AuthError;
use super::jwt::hash_token;

type HmacSha1 = Hmac<Sha1>;

pub const DIGITS: u32 = 6;
pub const STEP_SECS: i64 = 30;
/// Raw secret length in bytes (160 bits).
pub const SECRET_LEN: usize = 20;

pub const BACKUP_CODE_COUNT: usize = 10;
pub const BACKUP_CODE_LEN: usize = 10;
const BACKUP_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Fresh base32 (unpadded) secret.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_LEN];
    rng().fill_bytes(&mut bytes);
    BASE32_NOPAD.encode(&bytes)
}

fn decode_secret(secret: &str) -> Result<Vec<u8>, AuthError> {
    let normalized: String = secret
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    BASE32_NOPAD
        .decode(normalized.as_bytes())
        .map_err(|e| AuthError::Internal(format!("invalid TOTP secret: {e}")))
}

/// HOTP value for `counter` (RFC 4226 dynamic truncation).
fn hotp(key: &[u8], counter: u64) -> Result<u32, AuthError> {
    let mut mac = HmacSha1::new_from_slice(key)
        .map_err(|e| AuthError::Internal(format!("hmac key: {e}")))?;
    mac.update(&counter.to_be_bytes());
    let hash = mac.finalize().into_bytes();
    let offset = (hash[hash.len() - 1] & 0x0f) as usize;
    let binary = (u32::from(hash[offset] & 0x7f) << 24)
        | (u32::from(hash[offset + 1]) << 16)
        | (u32::from(hash[offset + 2]) << 8)
        | u32::from(hash[offset + 3]);
    Ok(binary % 10u32.pow(DIGITS))
}

fn format_code(value: u32) -> String {
    format!("{value:0width$}", width = DIGITS as usize)
}

/// Code for `unix_time`.
pub fn generate_code(secret: &str, unix_time: i64) -> Result<String, AuthError> {
    let key = decode_secret(secret)?;
    let counter = (unix_time / STEP_SECS).max(0) as u64;
    Ok(format_code(hotp(&key, counter)?))
}

/// Accept `code` if it matches any step within `window` of `unix_time`.
/// Every candidate is compared in constant time.
pub fn verify_code(secret: &str, code: &str, unix_time: i64, window: u32) -> Result<bool, AuthError> {
    let code = code.trim();
    if code.len() != DIGITS as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(false);
    }
    let key = decode_secret(secret)?;
    let current = unix_time / STEP_SECS;
    let window = i64::from(window);

    let mut matched = Choice::from(0);
    for step in (current - window)..=(current + window) {
        if step < 0 {
            continue;
        }
        let candidate = format_code(hotp(&key, step as u64)?);
        matched |= candidate.as_bytes().ct_eq(code.as_bytes());
    }
    Ok(matched.into())
}

/// `otpauth://` provisioning URI for authenticator apps.
pub fn otpauth_uri(secret: &str, account: &str, issuer: &str) -> Result<String, AuthError> {
    let mut uri = url::Url::parse("otpauth://totp/")
        .map_err(|e| AuthError::Internal(format!("otpauth uri: {e}")))?;
    uri.set_path(&format!("{issuer}:{account}"));
    uri.query_pairs_mut()
        .append_pair("secret", secret)
        .append_pair("issuer", issuer)
        .append_pair("algorithm", "SHA1")
        .append_pair("digits", &DIGITS.to_string())
        .append_pair("period", &STEP_SECS.to_string());
    Ok(uri.to_string())
}

/// Fresh single-use recovery codes.
pub fn generate_backup_codes() -> Vec<String> {
    let mut r = rng();
    (0..BACKUP_CODE_COUNT)
        .map(|_| {
            (0..BACKUP_CODE_LEN)
                .map(|_| BACKUP_ALPHABET[r.random_range(0..BACKUP_ALPHABET.len())] as char)
                .collect()
        })
        .collect()
}

/// Storage hash for a backup code; input is normalised first.
pub fn hash_backup_code(code: &str) -> String {
    let normalized: String = code
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    hash_token(&normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// RFC 6238 appendix B seed, "12345678901234567890".
    fn rfc_secret() -> String {
        BASE32_NOPAD.encode(b"12345678901234567890")
    }

    #[test]
    fn rfc6238_vectors() {
        let s = rfc_secret();
        assert_eq!(generate_code(&s, 59).unwrap(), "287082");
        assert_eq!(generate_code(&s, 1_111_111_109).unwrap(), "081804");
        assert_eq!(generate_code(&s, 1_234_567_890).unwrap(), "005924");
    }

    #[test]
    fn window_tolerates_adjacent_steps() {
        let s = generate_secret();
        let now = 1_700_000_000;
        let previous = generate_code(&s, now - STEP_SECS).unwrap();
        assert!(verify_code(&s, &previous, now, 1).unwrap());
        assert!(!verify_code(&s, &previous, now, 0).unwrap());
        let far = generate_code(&s, now - 3 * STEP_SECS).unwrap();
        assert!(!verify_code(&s, &far, now, 1).unwrap());
    }

    #[test]
    fn malformed_codes_are_rejected() {
        let s = generate_secret();
        assert!(!verify_code(&s, "12345", 0, 1).unwrap());
        assert!(!verify_code(&s, "abcdef", 0, 1).unwrap());
    }

    #[test]
    fn secrets_decode_to_twenty_bytes() {
        let s = generate_secret();
        assert_eq!(s.len(), 32);
        assert_eq!(decode_secret(&s.to_lowercase()).unwrap().len(), SECRET_LEN);
    }

    #[test]
    fn uri_carries_secret_and_issuer() {
        let uri = otpauth_uri("JBSWY3DPEHPK3PXP", "ada@example.com", "Portico").unwrap();
        assert!(uri.starts_with("otpauth://totp/Portico:ada@example.com?"));
        assert!(uri.contains("secret=JBSWY3DPEHPK3PXP"));
        assert!(uri.contains("issuer=Portico"));
    }

    #[test]
    fn backup_codes_are_distinct_and_hash_normalised() {
        let codes = generate_backup_codes();
        assert_eq!(codes.len(), BACKUP_CODE_COUNT);
        assert!(codes.iter().all(|c| c.len() == BACKUP_CODE_LEN));
        let lower = codes[0].to_lowercase();
        assert_eq!(hash_backup_code(&lower), hash_backup_code(&codes[0]));
    }
}
