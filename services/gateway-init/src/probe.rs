use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Whether something already accepts TCP connections on the loopback port.
pub async fn is_listening(port: u16, check_timeout: Duration) -> bool {
    let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port);

    match timeout(check_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => {
            debug!(port, "port probe succeeded");
            true
        }
        Ok(Err(e)) => {
            debug!(port, error = %e, "port probe failed: connection error");
            false
        }
        Err(_) => {
            debug!(port, "port probe failed: timeout");
            false
        }
    }
}
