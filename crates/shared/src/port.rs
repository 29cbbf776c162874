use std::net::{SocketAddr, TcpListener};

/// Finds a free localhost port in the given range. Used by integration tests
/// that spin up real listeners.
pub fn find_free_port(start: u16, end: u16) -> std::io::Result<u16> {
    for port in start..=end {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        if TcpListener::bind(addr).is_ok() {
            return Ok(port);
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No free ports found",
    ))
}
