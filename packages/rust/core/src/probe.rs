//! Reachability probing: a bounded-parallel TCP connect per node.
//!
//! A successful connect only shows the port is open; protocol handshakes are
//! out of scope.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument};

use nodeharvest_shared::NodeDescriptor;

/// Prober limits.
#[derive(Debug, Clone, Copy)]
pub struct ProbeSettings {
    pub concurrency: usize,
    pub timeout: Duration,
}

/// Nodes whose `server:port` accepted a TCP connection within the timeout,
/// in input order.
#[instrument(skip_all, fields(nodes = nodes.len(), concurrency = settings.concurrency))]
pub async fn probe_reachable(nodes: &[NodeDescriptor], settings: ProbeSettings) -> Vec<NodeDescriptor> {
    let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));
    let mut handles = Vec::with_capacity(nodes.len());

    for (i, node) in nodes.iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let server = node.server.clone();
        let port = node.port;
        let timeout = settings.timeout;
        handles.push(tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (i, false);
            };
            (i, is_reachable(&server, port, timeout).await)
        }));
    }

    let mut reachable = vec![false; nodes.len()];
    for handle in handles {
        match handle.await {
            Ok((i, ok)) => reachable[i] = ok,
            Err(e) => debug!(error = %e, "probe task failed"),
        }
    }

    let alive: Vec<NodeDescriptor> = nodes
        .iter()
        .zip(reachable)
        .filter_map(|(node, ok)| ok.then(|| node.clone()))
        .collect();
    info!(reachable = alive.len(), total = nodes.len(), "probe complete");
    alive
}

/// One connect attempt bounded by `timeout`.
pub async fn is_reachable(server: &str, port: u16, timeout: Duration) -> bool {
    // Bare IPv6 literals need brackets for address resolution.
    let addr = if server.contains(':') && !server.starts_with('[') {
        format!("[{server}]:{port}")
    } else {
        format!("{server}:{port}")
    };
    match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(addr = %addr, error = %e, "connect failed");
            false
        }
        Err(_) => {
            debug!(addr = %addr, "connect timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeharvest_shared::Protocol;
    use tokio::net::TcpListener;

    fn tcp(name: &str, port: u16) -> NodeDescriptor {
        NodeDescriptor::new(name, "127.0.0.1", port, Protocol::PlainTcp { tls: false }).unwrap()
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
        // listener dropped here, port is closed
    }

    #[tokio::test]
    async fn keeps_only_open_ports_in_order() {
        let open_a = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_b = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port_a = open_a.local_addr().unwrap().port();
        let port_b = open_b.local_addr().unwrap().port();
        let closed = closed_port().await;

        let nodes = vec![tcp("b", port_b), tcp("closed", closed), tcp("a", port_a)];
        let settings = ProbeSettings {
            concurrency: 2,
            timeout: Duration::from_secs(2),
        };
        let alive = probe_reachable(&nodes, settings).await;

        let names: Vec<&str> = alive.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn empty_input_is_empty() {
        let settings = ProbeSettings {
            concurrency: 4,
            timeout: Duration::from_millis(100),
        };
        assert!(probe_reachable(&[], settings).await.is_empty());
    }

    #[tokio::test]
    async fn ipv6_literals_are_bracketed() {
        let Ok(listener) = TcpListener::bind("[::1]:0").await else {
            // host without IPv6 loopback
            return;
        };
        let port = listener.local_addr().unwrap().port();
        assert!(is_reachable("::1", port, Duration::from_secs(2)).await);
    }
}
