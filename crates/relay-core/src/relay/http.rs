//! Relay — HTTP variant (§4.6).
//!
//! `Connecting -> Requesting -> ReadingResponse -> (Streaming | Closed)`, with
//! an `Idle` detour for `on_demand` relays: the task parks on
//! [`RelayHandle::wait_for_demand`] instead of connecting until a subscriber
//! nudges it awake (§4.6, realized via [`super::registry::ServerRegistry::wait_for_publisher`]
//! on the client side).

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::RelayError;
use crate::protocol_constants::{RESPONSE_MAX_SIZE, RETRY_DELAYS_MS};
use crate::relay::demuxer::DemuxerKind;
use crate::relay::publisher::Publisher;
use crate::relay::registry::ServerRegistry;
use crate::relay::relay::{RelayHandle, RelayState};
use crate::relay::response_parser::{MinimalResponseParser, ParseOutcome, ParsedResponse};
use crate::relay::sink::build_request_bytes;

/// Runs the HTTP relay's full lifecycle until its cancellation token fires.
/// Transient connect/protocol failures are retried on the fixed backoff
/// ladder [`RETRY_DELAYS_MS`]; a clean upstream EOF resets the ladder.
pub async fn run_http_relay(handle: Arc<RelayHandle>, registry: Arc<ServerRegistry>) {
    let cancel = handle.cancel_token();
    let mut attempt = 0usize;

    loop {
        if cancel.is_cancelled() {
            handle.set_state(RelayState::Closed);
            return;
        }

        if handle.on_demand {
            handle.set_state(RelayState::Idle);
            tokio::select! {
                _ = cancel.cancelled() => {
                    handle.set_state(RelayState::Closed);
                    return;
                }
                _ = handle.wait_for_demand() => {}
            }
        }

        match connect_and_stream(&handle, &registry).await {
            Ok(()) => attempt = 0,
            Err(e) => {
                log::warn!(
                    "[Relay] HTTP relay {} ({}) stopped: {}",
                    handle.key.url,
                    handle.key.path,
                    e
                );
            }
        }

        if cancel.is_cancelled() {
            handle.set_state(RelayState::Closed);
            return;
        }

        if handle.on_demand {
            // Re-arm: go back to idle and wait for the next subscriber
            // rather than backing off, since there was no connect failure
            // to back off from — the publisher simply drained out.
            continue;
        }

        let delay_ms = RETRY_DELAYS_MS[attempt.min(RETRY_DELAYS_MS.len() - 1)];
        attempt += 1;
        tokio::select! {
            _ = cancel.cancelled() => {
                handle.set_state(RelayState::Closed);
                return;
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
        }
    }
}

/// One full connect-request-response-stream attempt. Returns `Ok(())` on a
/// clean upstream EOF (the relay should reconnect from a reset backoff
/// ladder); returns `Err` for anything in the fatal dispositions of §4.6 and
/// §7 (connect refused/timeout, non-200, parse error, oversized headers).
async fn connect_and_stream(
    handle: &Arc<RelayHandle>,
    registry: &Arc<ServerRegistry>,
) -> Result<(), RelayError> {
    let url = handle.parsed_url()?;

    handle.set_state(RelayState::Connecting);
    let mut stream = match handle.key.addr {
        Some(addr) => TcpStream::connect(addr)
            .await
            .map_err(|e| connect_error(handle, e))?,
        None => TcpStream::connect((url.host.as_str(), url.port))
            .await
            .map_err(|e| connect_error(handle, e))?,
    };

    handle.set_state(RelayState::Requesting);
    let request = build_request_bytes(&url.selector(), &url.host);
    stream
        .write_all(&request)
        .await
        .map_err(|e| connect_error(handle, e))?;

    handle.set_state(RelayState::ReadingResponse);
    let parsed = read_response(handle, &mut stream).await?;

    if parsed.status != 200 {
        return Err(RelayError::UpstreamProtocol {
            url: handle.key.url.clone(),
            detail: format!("non-200 status: {}", parsed.status),
        });
    }

    transform_response(handle, registry, stream, parsed).await
}

fn connect_error(handle: &RelayHandle, e: std::io::Error) -> RelayError {
    RelayError::RelayConnect {
        url: handle.key.url.clone(),
        detail: e.to_string(),
    }
}

/// Reads up to [`RESPONSE_MAX_SIZE`] bytes, feeding each chunk to the
/// streaming response parser (§4.6 `ReadingResponse`).
async fn read_response(
    handle: &RelayHandle,
    stream: &mut TcpStream,
) -> Result<ParsedResponse, RelayError> {
    let mut parser = MinimalResponseParser::new();
    let mut total = 0usize;
    let mut buf = [0u8; 512];

    loop {
        let n = stream
            .read(&mut buf)
            .await
            .map_err(|e| connect_error(handle, e))?;
        if n == 0 {
            return Err(RelayError::UpstreamProtocol {
                url: handle.key.url.clone(),
                detail: "premature EOF while reading response headers".into(),
            });
        }
        total += n;
        if total > RESPONSE_MAX_SIZE {
            return Err(RelayError::UpstreamProtocol {
                url: handle.key.url.clone(),
                detail: format!("response headers exceeded {RESPONSE_MAX_SIZE} bytes"),
            });
        }
        match parser.feed(&buf[..n]).map_err(|e| match e {
            RelayError::UpstreamProtocol { detail, .. } => RelayError::UpstreamProtocol {
                url: handle.key.url.clone(),
                detail,
            },
            other => other,
        })? {
            ParseOutcome::Complete(parsed) => return Ok(parsed),
            ParseOutcome::Incomplete => continue,
        }
    }
}

/// Selects a demuxer from the parsed `Content-Type`, constructs the
/// Publisher, hands it the body prefix, registers it, then streams the
/// remainder of the connection into it until EOF or cancellation (§4.6
/// `transform_response`).
async fn transform_response(
    handle: &Arc<RelayHandle>,
    registry: &Arc<ServerRegistry>,
    mut stream: TcpStream,
    parsed: ParsedResponse,
) -> Result<(), RelayError> {
    let content_type = parsed
        .header("Content-Type")
        .unwrap_or("application/octet-stream")
        .to_string();
    let demuxer_kind = DemuxerKind::from_content_type(&content_type);
    let peer_addr = stream.peer_addr().ok();

    let publisher = Arc::new(Publisher::new(
        handle.key.path.clone(),
        peer_addr,
        content_type,
        demuxer_kind,
        handle.burst_bytes(),
        handle.keepalive(),
    ));
    publisher.on_upstream_bytes(&parsed.body_prefix);
    registry.add_publisher(Arc::clone(&publisher));
    handle.set_publisher(Some(Arc::clone(&publisher)));
    handle.set_state(RelayState::Streaming);
    log::info!(
        "[Relay] HTTP publisher registered for {} from {:?}",
        handle.key.path,
        peer_addr
    );

    let cancel = handle.cancel_token();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = stream.read(&mut buf) => {
                match result {
                    Ok(0) => break,
                    Ok(n) => publisher.on_upstream_bytes(&buf[..n]),
                    Err(e) => {
                        publisher.on_upstream_closed();
                        return Err(connect_error(handle, e));
                    }
                }
            }
        }
    }

    publisher.on_upstream_closed();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::relay::RelayKey;

    #[tokio::test]
    async fn on_demand_relay_parks_in_idle_until_demanded() {
        let handle = RelayHandle::new(
            RelayKey {
                url: "http://127.0.0.1:1/".into(),
                path: "/m".into(),
                addr: None,
            },
            1024,
            None,
            true,
            None,
        );
        let registry = ServerRegistry::new(None);
        let h = Arc::clone(&handle);
        let r = Arc::clone(&registry);
        let task = tokio::spawn(async move { run_http_relay(h, r).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.state(), RelayState::Idle);

        handle.close();
        let _ = task.await;
    }
}
