//! Authenticated request and subscribe clients for upstream peers.
//!
//! One client wraps one CURVE-keyed socket. REQ sockets are poisoned by a
//! timed-out exchange, so every error marks the client disconnected and
//! the caller reconnects before the next use.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use updaterd_log::log_info;

const LOG_TARGET: &str = "client";

pub const KEY_SIZE: usize = 32;

pub type KeyBytes = [u8; KEY_SIZE];

#[derive(Debug)]
pub enum ClientError {
    ConnectingToSelfForbidden,
    NoConnectionsAvailable,
    NotConnected,
    InvalidPeerResponse,
    Remote(String),
    InvalidPublicKey(String),
    KeyFile(String),
    Transport(zmq::Error),
}

impl From<zmq::Error> for ClientError {
    fn from(error: zmq::Error) -> Self {
        ClientError::Transport(error)
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::ConnectingToSelfForbidden => write!(f, "connecting to self forbidden"),
            ClientError::NoConnectionsAvailable => write!(f, "no connections are available"),
            ClientError::NotConnected => write!(f, "client is not connected"),
            ClientError::InvalidPeerResponse => write!(f, "invalid peer response"),
            ClientError::Remote(message) => write!(f, "remote error: {message}"),
            ClientError::InvalidPublicKey(key) => write!(f, "invalid public key: {key:?}"),
            ClientError::KeyFile(message) => write!(f, "{message}"),
            ClientError::Transport(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for ClientError {}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SocketKind {
    Request,
    Subscribe,
}

pub struct Client {
    context: zmq::Context,
    kind: SocketKind,
    socket: Option<zmq::Socket>,
    address: String,
    server_public_key: KeyBytes,
    public_key: KeyBytes,
    private_key: KeyBytes,
    timeout: Option<Duration>,
    connected: bool,
}

impl Client {
    pub fn new(
        context: &zmq::Context,
        kind: SocketKind,
        private_key: KeyBytes,
        public_key: KeyBytes,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            context: context.clone(),
            kind,
            socket: None,
            address: String::new(),
            server_public_key: [0u8; KEY_SIZE],
            public_key,
            private_key,
            timeout,
            connected: false,
        }
    }

    pub fn connect(&mut self, address: &str, server_public_key: &KeyBytes) -> Result<(), ClientError> {
        self.address = format!("tcp://{address}");
        self.server_public_key = *server_public_key;
        self.open_socket()
    }

    fn open_socket(&mut self) -> Result<(), ClientError> {
        let socket = self.context.socket(match self.kind {
            SocketKind::Request => zmq::REQ,
            SocketKind::Subscribe => zmq::SUB,
        })?;
        socket.set_linger(0)?;
        socket.set_curve_secretkey(&self.private_key)?;
        socket.set_curve_publickey(&self.public_key)?;
        socket.set_curve_serverkey(&self.server_public_key)?;
        if let Some(timeout) = self.timeout {
            let millis = timeout.as_millis() as i32;
            socket.set_sndtimeo(millis)?;
            socket.set_rcvtimeo(millis)?;
        }
        if self.kind == SocketKind::Subscribe {
            // receive everything; the chain tag is checked per message
            socket.set_subscribe(b"")?;
        }
        socket.connect(&self.address)?;
        self.socket = Some(socket);
        self.connected = true;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected && self.socket.is_some()
    }

    /// One-letter command frame followed by binary parameter frames.
    pub fn send(&mut self, command: &str, parameters: &[&[u8]]) -> Result<(), ClientError> {
        let result = self.try_send(command, parameters);
        if result.is_err() {
            self.connected = false;
        }
        result
    }

    fn try_send(&mut self, command: &str, parameters: &[&[u8]]) -> Result<(), ClientError> {
        let socket = self.socket.as_ref().ok_or(ClientError::NotConnected)?;
        if parameters.is_empty() {
            socket.send(command.as_bytes(), 0)?;
            return Ok(());
        }
        socket.send(command.as_bytes(), zmq::SNDMORE)?;
        for (index, parameter) in parameters.iter().enumerate() {
            let flags = if index + 1 == parameters.len() {
                0
            } else {
                zmq::SNDMORE
            };
            socket.send(*parameter, flags)?;
        }
        Ok(())
    }

    pub fn receive(&mut self) -> Result<Vec<Vec<u8>>, ClientError> {
        let result = self.try_receive();
        if result.is_err() {
            self.connected = false;
        }
        result
    }

    fn try_receive(&mut self) -> Result<Vec<Vec<u8>>, ClientError> {
        let socket = self.socket.as_ref().ok_or(ClientError::NotConnected)?;
        Ok(socket.recv_multipart(0)?)
    }

    /// Drop the socket and open a fresh one on the same address and keys.
    pub fn reconnect(&mut self) -> Result<(), ClientError> {
        self.disconnect();
        self.open_socket()
    }

    pub fn disconnect(&mut self) {
        self.socket = None;
        self.connected = false;
    }

    /// The live socket for poller registration; `None` after an error
    /// until the next reconnect.
    pub fn poll_socket(&self) -> Option<&zmq::Socket> {
        self.socket.as_ref()
    }

    pub fn basic_info(&self) -> String {
        format!("{} ({})", self.address, hex::encode(self.server_public_key))
    }
}

/// One configured upstream peer.
#[derive(Clone, Debug)]
pub struct Connection {
    pub public_key: String,
    pub address: String,
}

/// Open one client per connection.
///
/// A peer whose key equals the local public key is rejected, and because
/// the partial pool is dropped on any failure every socket opened so far
/// is closed before the error is returned.
pub fn open_pool(
    context: &zmq::Context,
    kind: SocketKind,
    private_key: KeyBytes,
    public_key: KeyBytes,
    timeout: Option<Duration>,
    connections: &[Connection],
) -> Result<Vec<Client>, ClientError> {
    if connections.is_empty() {
        return Err(ClientError::NoConnectionsAvailable);
    }

    let mut clients = Vec::with_capacity(connections.len());
    for connection in connections {
        let server_public_key = decode_public_key(&connection.public_key)?;
        if server_public_key == public_key {
            return Err(ClientError::ConnectingToSelfForbidden);
        }

        let mut client = Client::new(context, kind, private_key, public_key, timeout);
        client.connect(&connection.address, &server_public_key)?;
        log_info!(
            LOG_TARGET,
            "public key: {}  at: {:?}",
            connection.public_key,
            connection.address
        );
        clients.push(client);
    }
    Ok(clients)
}

pub fn decode_public_key(text: &str) -> Result<KeyBytes, ClientError> {
    let bytes =
        hex::decode(text.trim()).map_err(|_| ClientError::InvalidPublicKey(text.to_string()))?;
    let key: KeyBytes = bytes
        .try_into()
        .map_err(|_| ClientError::InvalidPublicKey(text.to_string()))?;
    Ok(key)
}

/// Key files hold one hex-encoded 32-byte key.
pub fn read_key_file(path: &Path) -> Result<KeyBytes, ClientError> {
    let text = fs::read_to_string(path)
        .map_err(|error| ClientError::KeyFile(format!("read key file: {path:?}  error: {error}")))?;
    let bytes = hex::decode(text.trim())
        .map_err(|_| ClientError::KeyFile(format!("key file: {path:?} is not hex")))?;
    bytes
        .try_into()
        .map_err(|_| ClientError::KeyFile(format!("key file: {path:?} has wrong length")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_valid_public_key() {
        let text = "aa".repeat(32);
        let key = decode_public_key(&text).expect("valid key");
        assert_eq!(key, [0xaa; 32]);
    }

    #[test]
    fn decode_rejects_bad_keys() {
        assert!(decode_public_key("not-hex").is_err());
        assert!(decode_public_key("abcd").is_err());
    }
}
