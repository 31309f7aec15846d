/// Request signing and id generation for the REST collaborator.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};

use crate::errors::Error;

type HmacSha512 = Hmac<Sha512>;

/// Compute the `API-Sign` header for a private REST request:
/// `base64(HMAC-SHA512(base64dec(secret), path + SHA256(nonce + postdata)))`.
pub(crate) fn sign_request(
    path: &str,
    nonce: u64,
    postdata: &str,
    api_secret: &str,
) -> Result<String, Error> {
    let secret = BASE64
        .decode(api_secret)
        .map_err(|err| Error::Validation(format!("API secret is not valid base64: {err}")))?;

    let mut hasher = Sha256::new();
    hasher.update(nonce.to_string().as_bytes());
    hasher.update(postdata.as_bytes());
    let digest = hasher.finalize();

    let mut mac = HmacSha512::new_from_slice(&secret)
        .map_err(|err| Error::Validation(format!("API secret rejected by HMAC: {err}")))?;
    mac.update(path.as_bytes());
    mac.update(&digest);
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Monotonically increasing 63-bit id source, shared by REST nonces and
/// request ids. Seeded from the wall clock so ids stay increasing across
/// client restarts, then strictly incremented per call.
#[derive(Debug)]
pub(crate) struct NonceSource {
    next: AtomicU64,
}

impl NonceSource {
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(1);
        Self {
            next: AtomicU64::new(seed.max(1)),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) & (i64::MAX as u64)
    }
}
