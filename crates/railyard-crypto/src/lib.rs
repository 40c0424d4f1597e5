/// Railyard Crypto Library
///
/// Password credentials (PBKDF2-HMAC-SHA256) and session tokens (HS256 JWT).
/// Verification functions never fail loudly: they answer `false` / `None` and
/// leave the status code decision to the caller.

pub mod keys;
pub mod password;
pub mod token;
