// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::errors::ConnectionError;
use crate::traits::{ConnectionState, ProtocolAdapter, Response};

const STX: char = '\u{02}';
const ETB: char = '\u{17}';

/// Remove prompt and framing characters some controllers wrap replies in.
pub fn strip_framing(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(*c, '>' | '\r' | '\n' | STX | ETB))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Line-oriented TCP transport.
///
/// Each `send` writes one `\r\n`-terminated request and reads one reply line.
pub struct TcpAdapter {
    name: String,
    address: String,
    port: u16,
    timeout: Duration,
    stream: Option<BufReader<TcpStream>>,
    state: ConnectionState,
}

impl TcpAdapter {
    pub fn new(name: &str, address: &str, port: u16, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            port,
            timeout,
            stream: None,
            state: ConnectionState::Disconnected,
        }
    }

    fn io_error(&self, e: std::io::Error) -> ConnectionError {
        ConnectionError::Io {
            endpoint: self.endpoint(),
            reason: e.to_string(),
        }
    }

    fn fail(&mut self, err: ConnectionError) -> ConnectionError {
        self.stream = None;
        self.state = ConnectionState::Failed;
        err
    }
}

#[async_trait]
impl ProtocolAdapter for TcpAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> &'static str {
        "tcp"
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.stream.is_some() && self.state == ConnectionState::Connected {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        let endpoint = self.endpoint();
        match timeout(self.timeout, TcpStream::connect((self.address.as_str(), self.port))).await {
            Ok(Ok(stream)) => {
                // Request/reply traffic; don't wait to coalesce small writes
                let _ = stream.set_nodelay(true);
                self.stream = Some(BufReader::new(stream));
                self.state = ConnectionState::Connected;
                Ok(())
            }
            Ok(Err(e)) => Err(self.fail(ConnectionError::ConnectFailed {
                endpoint,
                reason: e.to_string(),
            })),
            Err(_) => Err(self.fail(ConnectionError::Timeout(self.timeout))),
        }
    }

    async fn disconnect(&mut self) -> Result<(), ConnectionError> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.get_mut().shutdown().await;
        }
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    async fn send(&mut self, payload: &[u8]) -> Result<Response, ConnectionError> {
        let call_timeout = self.timeout;
        let endpoint = self.endpoint();
        let Some(stream) = self.stream.as_mut() else {
            return Err(ConnectionError::NotConnected(self.name.clone()));
        };

        let mut request = payload.to_vec();
        if !request.ends_with(b"\n") {
            request.extend_from_slice(b"\r\n");
        }

        let exchange = async {
            // Drop anything a previous, abandoned call left unread
            let stale = stream.buffer().len();
            stream.consume(stale);

            stream.get_mut().write_all(&request).await?;
            stream.get_mut().flush().await?;

            let mut line = String::new();
            let read = stream.read_line(&mut line).await?;
            Ok::<_, std::io::Error>((read, line))
        };

        let outcome = timeout(call_timeout, exchange).await;
        match outcome {
            Ok(Ok((0, _))) => Err(self.fail(ConnectionError::Closed(endpoint))),
            Ok(Ok((_, line))) => Ok(Response::new(strip_framing(&line).into_bytes())),
            Ok(Err(e)) => {
                let err = self.io_error(e);
                Err(self.fail(err))
            }
            Err(_) => Err(self.fail(ConnectionError::Timeout(call_timeout))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn spawn_controller(replies: Vec<&'static str>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = BufReader::new(socket);
            for reply in replies {
                let mut line = String::new();
                if socket.read_line(&mut line).await.unwrap() == 0 {
                    return;
                }
                socket.get_mut().write_all(reply.as_bytes()).await.unwrap();
            }
        });
        port
    }

    #[test]
    fn test_strip_framing() {
        assert_eq!(strip_framing("\u{02}VAL 7\u{17}\r\n"), "VAL 7");
        assert_eq!(strip_framing("> OK\r\n"), "OK");
        assert_eq!(strip_framing("VAL two words\n"), "VAL two words");
    }

    #[tokio::test]
    async fn test_request_reply_over_tcp() {
        let port = spawn_controller(vec!["> VAL 1\r\n", "OK\r\n"]).await;
        let mut adapter = TcpAdapter::new("main", "127.0.0.1", port, Duration::from_secs(2));

        adapter.connect().await.unwrap();
        assert_eq!(adapter.state(), ConnectionState::Connected);
        assert_eq!(adapter.send(b"READ robot.mode").await.unwrap().text(), "VAL 1");
        assert_eq!(adapter.send(b"WRITE var.x 2").await.unwrap().text(), "OK");

        adapter.disconnect().await.unwrap();
        assert_eq!(adapter.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_peer_close_fails_the_adapter() {
        let port = spawn_controller(vec![]).await;
        let mut adapter = TcpAdapter::new("main", "127.0.0.1", port, Duration::from_secs(2));
        adapter.connect().await.unwrap();

        let err = adapter.send(b"PING").await.unwrap_err();
        assert!(err.is_transport(), "unexpected {:?}", err);
        assert_eq!(adapter.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut adapter = TcpAdapter::new("main", "127.0.0.1", port, Duration::from_secs(2));
        assert!(adapter.connect().await.is_err());
        assert_eq!(adapter.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_send_before_connect() {
        let mut adapter = TcpAdapter::new("main", "127.0.0.1", 1, Duration::from_secs(1));
        assert_eq!(
            adapter.send(b"PING").await.unwrap_err(),
            ConnectionError::NotConnected("main".into())
        );
    }
}
