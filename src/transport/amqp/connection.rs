//! Broker endpoint and physical connection management
//!
//! Building the endpoint and the URI is pure and unit tested; only
//! [`ConnectionManager::connect`] touches the network.

use crate::config::AmqpSection;
use crate::error::RelayError;
use lapin::uri::{AMQPAuthority, AMQPScheme, AMQPUri, AMQPUserInfo};
use lapin::{Channel, Connection, ConnectionProperties};
use std::fmt;
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Name reported to the broker in the connection properties
const CONNECTION_NAME: &str = "broadcast-relay";

/// Immutable connection parameters, validated once at startup
#[derive(Clone, PartialEq)]
pub struct BrokerEndpoint {
    pub address: SocketAddrV4,
    pub vhost: String,
    pub username: String,
    password: String,
    pub broadcast_exchange: String,
    pub status_exchange: String,
    pub send_status_messages: bool,
}

impl BrokerEndpoint {
    /// Validate the `[amqp]` section
    ///
    /// A non-IPv4 endpoint is a [`RelayError::Configuration`]: it is checked
    /// before the first connect attempt and never retried.
    pub fn from_config(section: &AmqpSection) -> Result<Self, RelayError> {
        let address = section.socket_addr()?;
        let password = section.resolve_password()?;

        Ok(Self {
            address,
            vhost: section.vhost.clone(),
            username: section.username.clone(),
            password,
            broadcast_exchange: section.exchange.broadcast.clone(),
            status_exchange: section.exchange.status.clone(),
            send_status_messages: section.send_status_messages,
        })
    }

    /// Full AMQP URI including credentials
    pub fn amqp_uri(&self) -> AMQPUri {
        AMQPUri {
            scheme: AMQPScheme::AMQP,
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.username.clone(),
                    password: self.password.clone(),
                },
                host: self.address.ip().to_string(),
                port: self.address.port(),
            },
            vhost: self.vhost.clone(),
            query: Default::default(),
        }
    }

    /// Credential-free form for logs
    pub fn display_uri(&self) -> String {
        format!("amqp://{}@{}/{}", self.username, self.address, self.vhost)
    }
}

impl fmt::Debug for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerEndpoint")
            .field("address", &self.address)
            .field("vhost", &self.vhost)
            .field("username", &self.username)
            .field("password", &"***")
            .field("broadcast_exchange", &self.broadcast_exchange)
            .field("status_exchange", &self.status_exchange)
            .field("send_status_messages", &self.send_status_messages)
            .finish()
    }
}

/// One physical connection to the broker
///
/// There is no retry in here. Once a failure has been observed the manager
/// stays dead and the pump builds a new one.
pub struct ConnectionManager {
    connection: Connection,
    failed: Arc<AtomicBool>,
}

impl ConnectionManager {
    /// Open a connection with the endpoint's credentials and vhost
    pub async fn connect(endpoint: &BrokerEndpoint) -> Result<Self, RelayError> {
        debug!(broker = %endpoint.display_uri(), "opening broker connection");

        let properties =
            ConnectionProperties::default().with_connection_name(CONNECTION_NAME.into());
        let connection = Connection::connect_uri(endpoint.amqp_uri(), properties)
            .await
            .map_err(|e| {
                RelayError::connection(format!("{}: {e}", endpoint.display_uri()))
            })?;

        let failed = Arc::new(AtomicBool::new(false));
        let failed_flag = failed.clone();
        connection.on_error(move |error| {
            warn!(error = %error, "broker connection error");
            failed_flag.store(true, Ordering::SeqCst);
        });

        Ok(Self { connection, failed })
    }

    /// True until the connection has been observed to fail
    pub fn is_connected(&self) -> bool {
        !self.failed.load(Ordering::SeqCst) && self.connection.status().connected()
    }

    pub async fn create_channel(&self) -> Result<Channel, RelayError> {
        self.connection
            .create_channel()
            .await
            .map_err(|e| RelayError::connection(format!("failed to create channel: {e}")))
    }

    /// Close the connection, ignoring errors from an already dead socket
    pub async fn close(&self) {
        if !self.connection.status().connected() {
            return;
        }
        if let Err(e) = self.connection.close(200, "relay closing").await {
            debug!(error = %e, "error while closing broker connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;

    #[test]
    fn test_endpoint_from_config() {
        let section = AmqpSection::test_section();
        let endpoint = BrokerEndpoint::from_config(&section).unwrap();

        assert_eq!(endpoint.address, "127.0.0.1:5672".parse().unwrap());
        assert_eq!(endpoint.vhost, "/");
        assert_eq!(endpoint.broadcast_exchange, "broadcast");
        assert_eq!(endpoint.status_exchange, "status");
        assert!(endpoint.send_status_messages);
    }

    #[test]
    fn test_non_ipv4_endpoint_is_configuration_error() {
        let mut section = AmqpSection::test_section();
        section.endpoint = "[::1]:5672".to_string();

        let error = BrokerEndpoint::from_config(&section).unwrap_err();
        assert!(error.is_fatal());
        assert!(error
            .to_string()
            .contains(&ConfigError::InvalidEndpoint("[::1]:5672".to_string()).to_string()));
    }

    #[test]
    fn test_amqp_uri_carries_credentials_and_vhost() {
        let mut section = AmqpSection::test_section();
        section.endpoint = "10.0.0.7:5673".to_string();
        section.vhost = "relay".to_string();
        section.username = "relay-user".to_string();
        section.password = "p@ss:word".to_string();

        let uri = BrokerEndpoint::from_config(&section).unwrap().amqp_uri();
        assert_eq!(uri.scheme, AMQPScheme::AMQP);
        assert_eq!(uri.authority.host, "10.0.0.7");
        assert_eq!(uri.authority.port, 5673);
        assert_eq!(uri.authority.userinfo.username, "relay-user");
        assert_eq!(uri.authority.userinfo.password, "p@ss:word");
        assert_eq!(uri.vhost, "relay");
    }

    #[test]
    fn test_display_and_debug_hide_password() {
        let mut section = AmqpSection::test_section();
        section.password = "very-secret".to_string();
        let endpoint = BrokerEndpoint::from_config(&section).unwrap();

        assert_eq!(endpoint.display_uri(), "amqp://guest@127.0.0.1:5672//");
        assert!(!format!("{endpoint:?}").contains("very-secret"));
    }
}
