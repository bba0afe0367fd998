//! Relay — UDP variant (§4.5).
//!
//! `Bind -> Warmup -> Publishing -> Closed`. Filters dead sources by
//! requiring [`crate::protocol_constants::MIN_START_BUFFER`] bytes before a
//! publisher is registered; UDP transport is assumed MPEG-TS, so the
//! synthesized response always carries `Content-Type: video/MP2T`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::protocol_constants::MIN_START_BUFFER;
use crate::relay::demuxer::DemuxerKind;
use crate::relay::publisher::Publisher;
use crate::relay::registry::ServerRegistry;
use crate::relay::relay::{RelayHandle, RelayState};
use crate::relay::url::Scheme;

const RECV_BUF_SIZE: usize = 64 * 1024;

fn bind_udp_socket(addr: SocketAddr, multicast: bool) -> std::io::Result<UdpSocket> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true).ok();
    socket.set_nonblocking(true)?;

    let bind_addr = if multicast {
        // Per §4.5: for a `multicast://` URL, bind/join on INADDR_ANY.
        SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), addr.port())
    } else {
        addr
    };
    socket.bind(&bind_addr.into())?;

    let std_socket: std::net::UdpSocket = socket.into();
    let tokio_socket = UdpSocket::from_std(std_socket)?;

    if multicast {
        if let std::net::IpAddr::V4(group) = addr.ip() {
            tokio_socket.join_multicast_v4(group, std::net::Ipv4Addr::UNSPECIFIED)?;
        }
    }

    Ok(tokio_socket)
}

/// Runs the UDP relay's full lifecycle until its cancellation token fires or
/// the socket errors out.
pub async fn run_udp_relay(handle: Arc<RelayHandle>, registry: Arc<ServerRegistry>) {
    let cancel = handle.cancel_token();
    let url = match handle.parsed_url() {
        Ok(u) => u,
        Err(e) => {
            log::error!("[Relay] invalid UDP relay URL {}: {}", handle.key.url, e);
            handle.set_state(RelayState::Closed);
            return;
        }
    };
    let multicast = url.scheme == Scheme::Multicast;
    let addr = match format!("{}:{}", url.host, url.port).parse::<SocketAddr>() {
        Ok(a) => a,
        Err(e) => {
            log::error!("[Relay] cannot parse {}:{} as an address: {}", url.host, url.port, e);
            handle.set_state(RelayState::Closed);
            return;
        }
    };

    let socket = match bind_udp_socket(addr, multicast) {
        Ok(s) => s,
        Err(e) => {
            log::error!("[Relay] UDP bind failed for {}: {}", handle.key.url, e);
            handle.set_state(RelayState::Closed);
            registry.schedule_restart(handle.key.clone(), Duration::from_secs(1));
            return;
        }
    };

    handle.set_state(RelayState::Warmup);
    let mut prefix = BytesMut::new();
    let mut recv_buf = vec![0u8; RECV_BUF_SIZE];
    let mut peer_addr = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                handle.set_state(RelayState::Closed);
                return;
            }
            result = socket.recv_from(&mut recv_buf) => {
                match result {
                    Ok((n, peer)) => {
                        peer_addr.get_or_insert(peer);
                        prefix.extend_from_slice(&recv_buf[..n]);
                        if prefix.len() >= MIN_START_BUFFER {
                            break;
                        }
                    }
                    Err(e) => {
                        log::warn!("[Relay] UDP recv error on {}: {}", handle.key.url, e);
                        handle.set_state(RelayState::Closed);
                        registry.schedule_restart(handle.key.clone(), Duration::from_secs(1));
                        return;
                    }
                }
            }
        }
    }

    let publisher = Arc::new(Publisher::new(
        handle.key.path.clone(),
        peer_addr,
        "video/MP2T",
        DemuxerKind::MpegTs,
        handle.burst_bytes(),
        handle.keepalive(),
    ));
    publisher.on_upstream_bytes(&prefix);
    registry.add_publisher(Arc::clone(&publisher));
    handle.set_publisher(Some(Arc::clone(&publisher)));
    handle.set_state(RelayState::Streaming);
    log::info!(
        "[Relay] UDP publisher registered for {} from {:?} ({} byte warmup prefix)",
        handle.key.path,
        peer_addr,
        prefix.len()
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = socket.recv(&mut recv_buf) => {
                match result {
                    Ok(n) if n == 0 => break,
                    Ok(n) => publisher.on_upstream_bytes(&recv_buf[..n]),
                    Err(e) => {
                        log::warn!("[Relay] UDP relay {} stopped: {}", handle.key.url, e);
                        break;
                    }
                }
            }
        }
    }

    publisher.on_upstream_closed();
    handle.set_state(RelayState::Closed);
    if !cancel.is_cancelled() {
        registry.schedule_restart(handle.key.clone(), Duration::from_secs(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::relay::RelayKey;

    fn spawn_relay(port: u16, path: &str) -> (Arc<RelayHandle>, Arc<ServerRegistry>) {
        let registry = ServerRegistry::new(None);
        let handle = RelayHandle::new(
            RelayKey {
                url: format!("udp://127.0.0.1:{port}"),
                path: path.to_string(),
                addr: None,
            },
            MIN_START_BUFFER * 4,
            None,
            false,
            None,
        );
        let task_handle = Arc::clone(&handle);
        let task_registry = Arc::clone(&registry);
        tokio::spawn(async move {
            run_udp_relay(task_handle, task_registry).await;
        });
        (handle, registry)
    }

    async fn send_from_client(port: u16, total_bytes: usize) {
        let client = UdpSocket::bind("127.0.0.1:0").await.expect("bind client socket");
        client
            .connect(format!("127.0.0.1:{port}"))
            .await
            .expect("connect client socket");
        let mut remaining = total_bytes;
        while remaining > 0 {
            let chunk = remaining.min(8 * 1024);
            client.send(&vec![0xAAu8; chunk]).await.expect("send datagram");
            remaining -= chunk;
        }
    }

    // Spec scenario 4: below MIN_START_BUFFER, no publisher is ever registered.
    #[tokio::test]
    async fn warmup_below_threshold_registers_no_publisher() {
        let (handle, registry) = spawn_relay(18_241, "/below.ts");
        // Let the relay bind before the client starts sending.
        tokio::time::sleep(Duration::from_millis(20)).await;
        send_from_client(18_241, 50 * 1024).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(registry.pick_publisher("/below.ts").is_none());
        assert_eq!(handle.state(), RelayState::Warmup);
        handle.close();
    }

    // Spec scenario 4: at/above MIN_START_BUFFER, a publisher registers with
    // the synthesized MPEG-TS content type and the warmup bytes as its first
    // burst-queue chunk.
    #[tokio::test]
    async fn warmup_above_threshold_registers_publisher_with_prefix() {
        let (handle, registry) = spawn_relay(18_242, "/above.ts");
        tokio::time::sleep(Duration::from_millis(20)).await;
        send_from_client(18_242, 70 * 1024).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let publisher = registry
            .pick_publisher("/above.ts")
            .expect("publisher should be registered once warmup threshold is met");
        assert_eq!(publisher.content_type, "video/MP2T");

        let prefill_len: usize = publisher.attach(None).prefill.iter().map(|b| b.len()).sum();
        assert!(prefill_len >= MIN_START_BUFFER);

        handle.close();
    }
}
