//! Reconnect loop for long-lived streaming sessions

use std::future::Future;

use tracing::{debug, info, warn};

use crate::config::RetryConfig;
use crate::error::{ClientError, ClientResult};
use crate::streaming::StreamingClient;

/// Keep `client` connected until it is closed or fails for good.
///
/// `on_connected` runs after every successful connect, e.g. to subscribe.
/// A refused dial is retried with `retry`'s backoff until `max_attempts`
/// consecutive failures; a stream the peer ended is reconnected; any other
/// error ends the loop. Returns `Ok(())` once the client is closed locally.
pub async fn watch<F, Fut>(client: &StreamingClient, retry: &RetryConfig, mut on_connected: F) -> ClientResult<()>
where
    F: FnMut(StreamingClient) -> Fut,
    Fut: Future<Output = ClientResult<()>>,
{
    let mut failures = 0u32;
    loop {
        match client.connect().await {
            Ok(()) => {
                failures = 0;
                on_connected(client.clone()).await?;
                match client.wait().await {
                    Ok(()) => {
                        debug!(url = %client.server_url(), "client closed");
                        return Ok(());
                    }
                    Err(ClientError::TransportClosed) => {
                        info!(url = %client.server_url(), "stream ended, reconnecting");
                    }
                    Err(err) => {
                        warn!(url = %client.server_url(), error = %err, "client closed on error");
                        return Err(err);
                    }
                }
            }
            Err(err) if err.is_connect_failed() => {
                failures += 1;
                info!(url = %client.server_url(), failures, "connect refused");
                if !retry.should_retry(failures) {
                    return Err(err);
                }
                tokio::time::sleep(retry.delay_for_attempt(failures)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use url::Url;

    use super::*;
    use crate::config::ClientConfig;
    use crate::streaming::TransportFactory;
    use crate::transport::mock::mock_factory;

    fn retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: 0.0,
            ..RetryConfig::default()
        }
    }

    fn client(factory: TransportFactory) -> StreamingClient {
        StreamingClient::with_factory(Url::parse("ws://mock.test").unwrap(), ClientConfig::default(), factory)
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connects_retry_then_give_up() {
        let (factory, peers) = mock_factory();
        let client = client(factory);

        let started = tokio::time::Instant::now();
        let err = watch(&client, &retry(3), |_| async { Ok(()) }).await.unwrap_err();
        assert!(err.is_connect_failed());
        assert_eq!(peers.attempts(), 3);
        // 100ms then 200ms of backoff between the three attempts
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_close_reconnects() {
        let (factory, mut peers) = mock_factory();
        let client = client(factory);
        let first = peers.take_next();
        let second = peers.take_next();

        let connected = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connected);
        let hang_up = tokio::spawn(async move {
            // each connection is dropped by the server side in turn
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(first);
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(second);
        });

        let err = watch(&client, &retry(2), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await
        .unwrap_err();

        assert!(err.is_connect_failed());
        assert_eq!(connected.load(Ordering::SeqCst), 2);
        // two live connections, then two refused dials
        assert_eq!(peers.attempts(), 4);
        hang_up.await.unwrap();
    }

    #[tokio::test]
    async fn test_other_errors_abort_without_retry() {
        let (factory, mut peers) = mock_factory();
        let client = client(factory);
        let _peer = peers.take_next();

        let err = watch(&client, &retry(5), |_| async {
            Err(ClientError::config("subscribe rejected"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
        assert_eq!(peers.attempts(), 1);
    }

    #[tokio::test]
    async fn test_local_close_ends_watch() {
        let (factory, mut peers) = mock_factory();
        let client = client(factory);
        let _peer = peers.take_next();

        watch(&client, &retry(1), |client| async move {
            client.close().await;
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(peers.attempts(), 1);
    }
}
