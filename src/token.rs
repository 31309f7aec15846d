/// Cache for the websocket authentication token.
///
/// Private operations are frequent relative to the token lifetime, so the
/// REST fetch is the rare path. A single lock around check-and-refresh
/// serializes refreshes; a read-write split would risk a double fetch on
/// the expiry boundary without buying anything at this call volume.
use std::time::{Duration, Instant};

use log::debug;
use tokio::sync::Mutex;

use crate::auth::NonceSource;
use crate::errors::Error;
use crate::rest::RestClient;

/// Subtracted from the server-reported lifetime so a token cannot expire
/// between the cache check and server-side validation.
const EXPIRY_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct TokenState {
    token: String,
    expires_at: Option<Instant>,
}

impl TokenState {
    fn live(&self) -> bool {
        !self.token.is_empty() && self.expires_at.is_some_and(|at| Instant::now() < at)
    }
}

#[derive(Debug, Default)]
pub(crate) struct TokenCache {
    state: Mutex<TokenState>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached token, refreshing through the REST collaborator
    /// if it is absent or expired. Failures are never cached.
    pub async fn get(&self, rest: &RestClient, nonces: &NonceSource) -> Result<String, Error> {
        let mut state = self.state.lock().await;
        if state.live() {
            return Ok(state.token.clone());
        }

        debug!("token.refresh");
        let minted = rest.get_websocket_token(nonces.next()).await?;
        let lifetime = Duration::from_secs(minted.expires).saturating_sub(EXPIRY_MARGIN);
        state.token = minted.token.clone();
        state.expires_at = Some(Instant::now() + lifetime);
        Ok(minted.token)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::rest::Credentials;

    const TEST_SECRET: &str =
        "kQH5HW/8p1uGOVjbgWA7FunAmGO8lsSUXNsu3eow76sz84Q18fWxnyRzBHCd3pd5nE9qa99HAZtuZuj6F1huXg==";

    /// Minimal HTTP endpoint minting numbered tokens; counts the fetches.
    async fn spawn_token_endpoint(expires: u64, fetches: Arc<AtomicUsize>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                if let Ok((mut stream, _)) = listener.accept().await {
                    let fetches = fetches.clone();
                    tokio::spawn(async move {
                        let mut buffer = Vec::new();
                        let mut chunk = [0u8; 1024];
                        loop {
                            match tokio::time::timeout(
                                Duration::from_millis(200),
                                stream.read(&mut chunk),
                            )
                            .await
                            {
                                Ok(Ok(0)) | Err(_) => break,
                                Ok(Ok(n)) => {
                                    buffer.extend_from_slice(&chunk[..n]);
                                    if buffer.windows(6).any(|w| w == b"nonce=") {
                                        break;
                                    }
                                }
                                Ok(Err(_)) => break,
                            }
                        }
                        let count = fetches.fetch_add(1, Ordering::SeqCst) + 1;
                        let body = format!(
                            r#"{{"error":[],"result":{{"token":"tok-{count}","expires":{expires}}}}}"#
                        );
                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                            body.len()
                        );
                        let _ = stream.write_all(response.as_bytes()).await;
                        let _ = stream.shutdown().await;
                    });
                }
            }
        });

        format!("http://{addr}")
    }

    #[tokio::test]
    async fn token_is_reused_inside_the_expiry_window() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let base = spawn_token_endpoint(900, fetches.clone()).await;
        let rest = RestClient::new(base, Credentials::new("key", TEST_SECRET));
        let nonces = NonceSource::new();
        let cache = TokenCache::new();

        let first = cache.get(&rest, &nonces).await.unwrap();
        let second = cache.get(&rest, &nonces).await.unwrap();
        assert_eq!(first, "tok-1");
        assert_eq!(second, "tok-1");
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_token_triggers_a_fresh_fetch() {
        // expires == margin leaves no usable lifetime, so every call
        // refetches.
        let fetches = Arc::new(AtomicUsize::new(0));
        let base = spawn_token_endpoint(5, fetches.clone()).await;
        let rest = RestClient::new(base, Credentials::new("key", TEST_SECRET));
        let nonces = NonceSource::new();
        let cache = TokenCache::new();

        let first = cache.get(&rest, &nonces).await.unwrap();
        let second = cache.get(&rest, &nonces).await.unwrap();
        assert_eq!(first, "tok-1");
        assert_eq!(second, "tok-2");
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let base = spawn_token_endpoint(900, fetches.clone()).await;
        let rest = RestClient::new(base, Credentials::new("key", TEST_SECRET));
        let nonces = NonceSource::new();
        let cache = TokenCache::new();

        let (a, b, c, d) = tokio::join!(
            cache.get(&rest, &nonces),
            cache.get(&rest, &nonces),
            cache.get(&rest, &nonces),
            cache.get(&rest, &nonces),
        );
        for token in [a.unwrap(), b.unwrap(), c.unwrap(), d.unwrap()] {
            assert_eq!(token, "tok-1");
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }
}
