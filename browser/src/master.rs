//! Master server endpoints and the server list probe.

use std::time::Duration;

use log::{debug, info};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::error::QueryError;
use crate::protocol::{self, LIST_RESPONSE_HEADER, SERVER_RECORD_LEN};
use crate::server::ServerAddress;

/// Well-known directory endpoints queried by default.
pub const DEFAULT_MASTERS: [(&str, u16); 2] = [
    ("master1.unvanquished.net", 27950),
    ("master2.unvanquished.net", 27950),
];

/// One configured master server, polled independently of the others.
#[derive(Debug)]
pub struct MasterServer {
    host: String,
    port: u16,
    last_error: Option<String>,
}

impl MasterServer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            last_error: None,
        }
    }

    /// The endpoint as a `host:port` string.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Error string of the last failed fetch, for repeat detection.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Requests the list of active game servers from this endpoint.
    pub async fn query_addresses(
        &self,
        protocol_version: u32,
        max_servers: usize,
        timeout_after: Duration,
    ) -> Result<Vec<ServerAddress>, QueryError> {
        debug!("Requesting server list from {}.", self.address());

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect((self.host.as_str(), self.port)).await?;
        socket.send(&protocol::list_query(protocol_version)).await?;

        let mut buffer = vec![0u8; LIST_RESPONSE_HEADER.len() + SERVER_RECORD_LEN * max_servers];
        let received = timeout(timeout_after, socket.recv(&mut buffer)).await??;

        let records = protocol::parse_list_response(&buffer[..received], max_servers)?;

        Ok(records
            .into_iter()
            .map(|(address, port)| ServerAddress::new(address.to_string(), port))
            .collect())
    }

    /// Like [`query_addresses`](Self::query_addresses), but converts every
    /// failure into an empty list so one unreachable master never blocks
    /// aggregation of addresses from the others.
    pub async fn fetch(
        &mut self,
        protocol_version: u32,
        max_servers: usize,
        timeout_after: Duration,
    ) -> Vec<ServerAddress> {
        match self
            .query_addresses(protocol_version, max_servers, timeout_after)
            .await
        {
            Ok(addresses) => {
                self.last_error = None;
                addresses
            }
            Err(error) => {
                let message = error.to_string();

                if self.last_error.as_deref() == Some(message.as_str()) {
                    debug!("Failed to fetch servers from {}: {}", self.address(), message);
                } else {
                    info!("Failed to fetch servers from {}: {}", self.address(), message);
                }

                self.last_error = Some(message);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DEFAULT_MAX_SERVERS, PROTOCOL_VERSION, RECORD_SEP};
    use tokio_test::assert_ok;

    #[test]
    fn test_endpoint_address_formatting() {
        let master = MasterServer::new("master1.unvanquished.net", 27950);
        assert_eq!(master.address(), "master1.unvanquished.net:27950");
    }

    #[tokio::test]
    async fn test_query_addresses_against_local_master() {
        let fake_master = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let master_addr = fake_master.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buffer = [0u8; 64];
            let (received, from) = fake_master.recv_from(&mut buffer).await.unwrap();
            assert_eq!(
                &buffer[..received],
                protocol::list_query(PROTOCOL_VERSION).as_slice()
            );

            let mut response = LIST_RESPONSE_HEADER.to_vec();
            for record in [[10u8, 0, 0, 1], [10, 0, 0, 2]] {
                response.extend_from_slice(&record);
                response.extend_from_slice(&27960u16.to_be_bytes());
                response.push(RECORD_SEP);
            }
            fake_master.send_to(&response, from).await.unwrap();
        });

        let master = MasterServer::new("127.0.0.1", master_addr.port());
        let addresses = assert_ok!(
            master
                .query_addresses(PROTOCOL_VERSION, DEFAULT_MAX_SERVERS, Duration::from_secs(1))
                .await
        );

        assert_eq!(
            addresses,
            vec![
                ServerAddress::new("10.0.0.1", 27960),
                ServerAddress::new("10.0.0.2", 27960),
            ]
        );
    }

    #[tokio::test]
    async fn test_fetch_swallows_failures() {
        // Bind and drop a socket so the port is known to be closed.
        let port = {
            let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            probe.local_addr().unwrap().port()
        };

        let mut master = MasterServer::new("127.0.0.1", port);
        let addresses = master
            .fetch(PROTOCOL_VERSION, DEFAULT_MAX_SERVERS, Duration::from_millis(200))
            .await;

        assert!(addresses.is_empty());
        assert!(master.last_error().is_some());
    }
}
