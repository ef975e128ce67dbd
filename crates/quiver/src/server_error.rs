use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;

/// Failure to start the development server, with a message users can act on
#[derive(Debug, Error)]
pub enum ServerStartError {
  #[error("You don't have access to bind the server to port {port}.")]
  PermissionDenied { port: u16 },

  #[error("There is already a process listening on port {port}.")]
  AddrInUse { port: u16 },

  #[error("Error: {kind} occurred while setting up server on port {port}.")]
  Other {
    port: u16,
    kind: io::ErrorKind,
    #[source]
    source: io::Error,
  },
}

impl ServerStartError {
  pub fn from_io(source: io::Error, port: u16) -> Self {
    match source.kind() {
      io::ErrorKind::PermissionDenied => ServerStartError::PermissionDenied { port },
      io::ErrorKind::AddrInUse => ServerStartError::AddrInUse { port },
      kind => ServerStartError::Other { port, kind, source },
    }
  }
}

/// Binds the listener of a server
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerStartError> {
  TcpListener::bind(addr).await.map_err(|error| {
    let error = ServerStartError::from_io(error, addr.port());
    tracing::error!("{error}");
    error
  })
}
