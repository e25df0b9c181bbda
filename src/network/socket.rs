//! TCP socket setup
//!
//! Listener and client sockets are built through socket2 so buffer sizes
//! and address reuse can be set before bind/connect.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use crate::config::NetworkConfig;
use crate::error::NetworkError;

/// Listen backlog
const LISTEN_BACKLOG: i32 = 128;

/// Bind the relay listener
pub fn bind_listener(addr: SocketAddr, config: &NetworkConfig) -> Result<TcpListener, NetworkError> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    configure_socket(&socket, config).map_err(NetworkError::BindFailed)?;

    socket
        .bind(&addr.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;
    socket
        .listen(LISTEN_BACKLOG)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener).map_err(|e| NetworkError::BindFailed(e.to_string()))
}

/// Connect to the relay server
pub async fn connect(addr: SocketAddr, config: &NetworkConfig) -> Result<TcpStream, NetworkError> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| NetworkError::ConnectFailed(e.to_string()))?;

    configure_socket(&socket, config).map_err(NetworkError::ConnectFailed)?;
    socket
        .set_nonblocking(true)
        .map_err(|e| NetworkError::ConnectFailed(e.to_string()))?;

    let std_stream: std::net::TcpStream = socket.into();
    let stream = TcpSocket::from_std_stream(std_stream)
        .connect(addr)
        .await
        .map_err(|e| NetworkError::ConnectFailed(format!("{}: {}", addr, e)))?;

    configure_stream(&stream, config)?;
    Ok(stream)
}

/// Per-stream options applied after accept/connect
pub fn configure_stream(stream: &TcpStream, config: &NetworkConfig) -> Result<(), NetworkError> {
    stream.set_nodelay(config.nodelay)?;
    Ok(())
}

fn configure_socket(socket: &Socket, config: &NetworkConfig) -> Result<(), String> {
    if config.reuse_addr {
        socket
            .set_reuse_address(true)
            .map_err(|e| format!("Failed to set SO_REUSEADDR: {}", e))?;
    }

    socket
        .set_send_buffer_size(config.send_buffer_size)
        .map_err(|e| format!("Failed to set send buffer: {}", e))?;
    socket
        .set_recv_buffer_size(config.recv_buffer_size)
        .map_err(|e| format!("Failed to set recv buffer: {}", e))?;

    Ok(())
}
