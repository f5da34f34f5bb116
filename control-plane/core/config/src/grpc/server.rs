// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use std::net::SocketAddr;
#[cfg(target_family = "unix")]
use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use display_error_chain::ErrorChainExt;
use duration_str::deserialize_duration;
use futures::FutureExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
#[cfg(target_family = "unix")]
use tokio::net::UnixListener;
use tokio_stream::wrappers::TcpListenerStream;
#[cfg(target_family = "unix")]
use tokio_stream::wrappers::UnixListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::service::Routes;
use tracing::debug;

use super::errors::ConfigError;
use crate::component::Configuration;

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, JsonSchema)]
pub struct KeepaliveServerParameters {
    /// max_connection_age sets the maximum amount of time a connection may exist before it will be closed.
    #[serde(
        default = "default_max_connection_age",
        deserialize_with = "deserialize_duration"
    )]
    #[schemars(with = "String")]
    pub max_connection_age: Duration,

    /// Time sets the frequency of the keepalive ping.
    #[serde(default = "default_time", deserialize_with = "deserialize_duration")]
    #[schemars(with = "String")]
    pub time: Duration,

    /// Timeout sets the amount of time the server waits for a keepalive ping ack.
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    #[schemars(with = "String")]
    pub timeout: Duration,
}

impl Default for KeepaliveServerParameters {
    fn default() -> Self {
        Self {
            max_connection_age: default_max_connection_age(),
            time: default_time(),
            timeout: default_timeout(),
        }
    }
}

fn default_max_connection_age() -> Duration {
    Duration::from_secs(2 * 3600)
}

fn default_time() -> Duration {
    Duration::from_secs(2 * 60)
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

/// Configuration for a serving gRPC endpoint.
///
/// The endpoint accepts `tcp://host:port`, a bare `host:port`, or
/// `unix:///path`; `serve` dispatches on the scheme.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, JsonSchema)]
pub struct ServerConfig {
    /// Endpoint is the address to listen on.
    pub endpoint: String,

    /// MaxConcurrentStreams sets the limit on the number of concurrent streams per connection.
    pub max_concurrent_streams: Option<u32>,

    /// Maximum size (in MiB) of frames accepted by the server.
    pub max_frame_size: Option<u32>,

    /// Keepalive anchor for all the settings related to keepalive.
    #[serde(default)]
    pub keepalive: KeepaliveServerParameters,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            max_concurrent_streams: Some(100),
            max_frame_size: Some(4),
            keepalive: KeepaliveServerParameters::default(),
        }
    }
}

impl std::fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ServerConfig {{ endpoint: {}, max_concurrent_streams: {:?}, max_frame_size: {:?}, keepalive: {:?} }}",
            self.endpoint, self.max_concurrent_streams, self.max_frame_size, self.keepalive
        )
    }
}

impl Configuration for ServerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.is_empty() {
            return Err(ConfigError::MissingEndpoint);
        }
        Ok(())
    }
}

/// ServerFuture is a type alias for a boxed future that returns a Result<(), tonic::transport::Error>.
type ServerFuture = Pin<Box<dyn Future<Output = Result<(), tonic::transport::Error>> + Send>>;

/// A running server: the bound address (for `tcp://host:0` endpoints) and a
/// token that shuts the acceptor down when cancelled.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    local_addr: Option<SocketAddr>,
    token: CancellationToken,
}

impl ServerHandle {
    /// Address the listener is bound to. None for unix sockets.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// `tcp://host:port` form of the bound address.
    pub fn local_url(&self) -> Option<String> {
        self.local_addr.map(|addr| format!("tcp://{}", addr))
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

enum BoundListener {
    Tcp(TcpListenerStream, SocketAddr),
    #[cfg(target_family = "unix")]
    Unix(UnixListenerStream),
}

impl ServerConfig {
    pub fn with_endpoint(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            ..Default::default()
        }
    }

    pub fn with_max_concurrent_streams(self, max_concurrent_streams: Option<u32>) -> Self {
        Self {
            max_concurrent_streams,
            ..self
        }
    }

    pub fn with_max_frame_size(self, max_frame_size: Option<u32>) -> Self {
        Self {
            max_frame_size,
            ..self
        }
    }

    pub fn with_keepalive(self, keepalive: KeepaliveServerParameters) -> Self {
        Self { keepalive, ..self }
    }

    #[cfg(target_family = "unix")]
    fn parse_unix_socket_path(endpoint: &str) -> Result<PathBuf, ConfigError> {
        let path = endpoint.strip_prefix("unix://").unwrap_or(endpoint);

        let without_query = path.split_once('?').map(|(p, _)| p).unwrap_or(path);
        let path_part = without_query
            .split_once('#')
            .map(|(p, _)| p)
            .unwrap_or(without_query);

        if path_part.is_empty() {
            return Err(ConfigError::UnixSocketMissingPath);
        }

        Ok(PathBuf::from(path_part))
    }

    fn create_server_builder(&self) -> tonic::transport::Server {
        let builder: tonic::transport::Server =
            tonic::transport::Server::builder().accept_http1(false);

        let builder = match self.max_concurrent_streams {
            Some(max_concurrent_streams) => {
                builder.concurrency_limit_per_connection(max_concurrent_streams as usize)
            }
            None => builder,
        };

        let builder = match self.max_frame_size {
            Some(max_frame_size) => builder.max_frame_size(max_frame_size * 1024 * 1024),
            None => builder,
        };

        let builder = builder.http2_keepalive_interval(Some(self.keepalive.time));
        let builder = builder.http2_keepalive_timeout(Some(self.keepalive.timeout));

        builder.max_connection_age(self.keepalive.max_connection_age)
    }

    async fn bind(&self) -> Result<BoundListener, ConfigError> {
        if self.endpoint.is_empty() {
            return Err(ConfigError::MissingEndpoint);
        }

        #[cfg(target_family = "unix")]
        if self.endpoint.starts_with("unix://") {
            let socket_path = Self::parse_unix_socket_path(self.endpoint.as_str())?;

            // Best-effort cleanup of any stale socket file
            let _ = std::fs::remove_file(&socket_path);

            let listener = UnixListener::bind(&socket_path)?;
            return Ok(BoundListener::Unix(UnixListenerStream::new(listener)));
        }

        #[cfg(not(target_family = "unix"))]
        if self.endpoint.starts_with("unix://") {
            return Err(ConfigError::UnixSocketUnsupported);
        }

        let raw = self
            .endpoint
            .strip_prefix("tcp://")
            .unwrap_or(self.endpoint.as_str());
        let addr = SocketAddr::from_str(raw)?;

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        Ok(BoundListener::Tcp(
            TcpListenerStream::new(listener),
            local_addr,
        ))
    }

    async fn to_server_future(
        &self,
        routes: Routes,
    ) -> Result<(Option<SocketAddr>, ServerFuture), ConfigError> {
        let bound = self.bind().await?;
        let mut builder = self.create_server_builder();
        let router = builder.add_routes(routes);

        match bound {
            BoundListener::Tcp(incoming, addr) => {
                Ok((Some(addr), router.serve_with_incoming(incoming).boxed()))
            }
            #[cfg(target_family = "unix")]
            BoundListener::Unix(incoming) => {
                Ok((None, router.serve_with_incoming(incoming).boxed()))
            }
        }
    }

    /// Binds the endpoint and spawns the acceptor loop. The server runs until
    /// the drain watch fires or the returned handle is cancelled.
    pub async fn run_server(
        &self,
        routes: Routes,
        drain_rx: drain::Watch,
    ) -> Result<ServerHandle, ConfigError> {
        debug!(%self, "server configured: setting it up");
        let (local_addr, server_future) = self.to_server_future(routes).await?;

        let token = CancellationToken::new();
        let token_clone = token.clone();

        tokio::spawn(async move {
            debug!("starting server main loop");
            let shutdown = drain_rx.signaled();

            tokio::select! {
                res = server_future => {
                    match res {
                        Ok(_) => {
                            debug!("server shutdown");
                        }
                        Err(e) => {
                            tracing::error!(error = %e.chain(), "server error");
                        }
                    }
                }
                _ = shutdown => {
                    debug!("shutting down server");
                }
                _ = token.cancelled() => {
                    debug!("cancellation token triggered: shutting down server");
                }
            }
        });

        Ok(ServerHandle {
            local_addr,
            token: token_clone,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_default_server_config() {
        let server = ServerConfig::default();
        assert_eq!(server.endpoint, String::new());
        assert_eq!(server.max_concurrent_streams, Some(100));
        assert_eq!(server.max_frame_size, Some(4));
        assert_eq!(
            server.keepalive.max_connection_age,
            Duration::from_secs(2 * 3600)
        );
    }

    #[cfg(target_family = "unix")]
    #[test]
    fn test_parse_unix_socket_path() {
        let path = ServerConfig::parse_unix_socket_path("unix:///tmp/weft.sock").unwrap();
        assert_eq!(path, PathBuf::from("/tmp/weft.sock"));

        let path =
            ServerConfig::parse_unix_socket_path("unix:///tmp/weft.sock?foo=bar#frag").unwrap();
        assert_eq!(path, PathBuf::from("/tmp/weft.sock"));

        assert!(matches!(
            ServerConfig::parse_unix_socket_path("unix://"),
            Err(ConfigError::UnixSocketMissingPath)
        ));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_run_server_binds_ephemeral_port() {
        let config = ServerConfig::with_endpoint("tcp://127.0.0.1:0");
        let (signal, watch) = drain::channel();

        let handle = config
            .run_server(tonic::service::RoutesBuilder::default().routes(), watch)
            .await
            .expect("server should bind");

        let addr = handle.local_addr().expect("tcp server has an address");
        assert_ne!(addr.port(), 0);
        assert!(handle.local_url().unwrap().starts_with("tcp://127.0.0.1:"));

        handle.cancel();
        drop(signal);
    }

    #[tokio::test]
    async fn test_run_server_missing_endpoint() {
        let config = ServerConfig::default();
        let (_signal, watch) = drain::channel();
        let res = config.run_server(tonic::service::RoutesBuilder::default().routes(), watch).await;
        assert!(matches!(res, Err(ConfigError::MissingEndpoint)));
    }
}
