use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::keys::random_bytes;

const SCHEME: &str = "pbkdf2";
pub const ITERATIONS: u32 = 100_000;
const SALT_BYTES: usize = 16;
const KEY_BYTES: usize = 32;

// Upper bounds on what a stored credential may ask us to compute.
const MAX_ITERATIONS: u32 = 10_000_000;
const MAX_KEY_BYTES: usize = 64;

/// Hash a password into `pbkdf2$<iterations>$<salt>$<key>`.
/// Every call draws a fresh salt, so equal passwords never hash alike.
pub fn hash_password(password: &str) -> String {
    let salt = random_bytes::<SALT_BYTES>();
    let mut key = [0u8; KEY_BYTES];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, ITERATIONS, &mut key);

    format!(
        "{SCHEME}${ITERATIONS}${}${}",
        BASE64.encode(salt),
        BASE64.encode(key)
    )
}

/// Check a password against a stored credential.
///
/// Malformed or corrupt credentials simply fail to verify.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some(parsed) = parse_credential(stored) else {
        return false;
    };

    let mut actual = vec![0u8; parsed.key.len()];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &parsed.salt, parsed.iterations, &mut actual);

    actual.as_slice().ct_eq(parsed.key.as_slice()).into()
}

struct Credential {
    iterations: u32,
    salt: Vec<u8>,
    key: Vec<u8>,
}

fn parse_credential(stored: &str) -> Option<Credential> {
    let mut parts = stored.split('$');
    let scheme = parts.next()?;
    let iterations = parts.next()?;
    let salt = parts.next()?;
    let key = parts.next()?;

    if scheme != SCHEME || parts.next().is_some() {
        return None;
    }

    let iterations: u32 = iterations.parse().ok()?;
    if iterations == 0 || iterations > MAX_ITERATIONS {
        return None;
    }

    let salt = BASE64.decode(salt).ok()?;
    let key = BASE64.decode(key).ok()?;
    if salt.is_empty() || key.is_empty() || key.len() > MAX_KEY_BYTES {
        return None;
    }

    Some(Credential {
        iterations,
        salt,
        key,
    })
}
