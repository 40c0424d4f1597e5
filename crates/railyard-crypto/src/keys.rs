use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore;

/// Fill a fixed-size buffer from the thread-local CSPRNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    rand::rng().fill_bytes(&mut buf);
    buf
}

/// A 256-bit random secret, base64 encoded. Used for credentials nobody is
/// ever meant to type in.
pub fn random_secret() -> String {
    BASE64.encode(random_bytes::<32>())
}
