// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
#[cfg(target_family = "unix")]
use std::path::PathBuf;

use duration_str::deserialize_duration;
use hyper_util::client::legacy::connect::HttpConnector;
#[cfg(target_family = "unix")]
use hyper_util::rt::TokioIo;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
#[cfg(target_family = "unix")]
use tokio::net::UnixStream;
use tonic::transport::{Channel, Uri};

use super::errors::ConfigError;
use crate::component::Configuration;

/// Keepalive configuration for outgoing channels: TCP and HTTP2 keepalive
/// periods, the ack timeout, and whether to ping while idle.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, JsonSchema)]
pub struct KeepaliveConfig {
    /// The duration of the keepalive time for TCP
    #[serde(
        default = "default_tcp_keepalive",
        deserialize_with = "deserialize_duration"
    )]
    #[schemars(with = "String")]
    pub tcp_keepalive: Duration,

    /// The duration of the keepalive time for HTTP2
    #[serde(
        default = "default_http2_keepalive",
        deserialize_with = "deserialize_duration"
    )]
    #[schemars(with = "String")]
    pub http2_keepalive: Duration,

    /// The timeout duration for the keepalive
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    #[schemars(with = "String")]
    pub timeout: Duration,

    /// Whether to permit keepalive without an active stream
    #[serde(default = "default_keep_alive_while_idle")]
    pub keep_alive_while_idle: bool,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        KeepaliveConfig {
            tcp_keepalive: default_tcp_keepalive(),
            http2_keepalive: default_http2_keepalive(),
            timeout: default_timeout(),
            keep_alive_while_idle: default_keep_alive_while_idle(),
        }
    }
}

fn default_tcp_keepalive() -> Duration {
    Duration::from_secs(60)
}

fn default_http2_keepalive() -> Duration {
    Duration::from_secs(60)
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_keep_alive_while_idle() -> bool {
    false
}

/// Where a client endpoint points after scheme dispatch.
#[derive(Debug, Clone, PartialEq)]
enum Target {
    Tcp(Uri),
    #[cfg(target_family = "unix")]
    Unix(PathBuf),
}

/// Configuration for an outgoing gRPC channel.
///
/// The endpoint accepts `tcp://host:port` (or plain `http://`) and
/// `unix:///path`. Channels are always constructed lazily: the underlying
/// connection is established on the first RPC and multiplexes every
/// subsequent request to the same endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct ClientConfig {
    /// The target the client will connect to.
    pub endpoint: String,

    /// Keepalive parameters.
    pub keepalive: Option<KeepaliveConfig>,

    /// Timeout for establishing the connection. Zero means no limit.
    #[serde(
        default = "default_connect_timeout",
        deserialize_with = "deserialize_duration"
    )]
    #[schemars(with = "String")]
    pub connect_timeout: Duration,

    /// Timeout per request. Zero means no limit.
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "deserialize_duration"
    )]
    #[schemars(with = "String")]
    pub request_timeout: Duration,

    /// ReadBufferSize.
    pub buffer_size: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            endpoint: String::new(),
            keepalive: None,
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            buffer_size: None,
        }
    }
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(0)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(0)
}

impl std::fmt::Display for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ClientConfig {{ endpoint: {}, keepalive: {:?}, connect_timeout: {:?}, request_timeout: {:?}, buffer_size: {:?} }}",
            self.endpoint, self.keepalive, self.connect_timeout, self.request_timeout, self.buffer_size
        )
    }
}

impl Configuration for ClientConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.parse_target().map(|_| ())
    }
}

impl ClientConfig {
    /// Creates a new client configuration with the given endpoint and all
    /// other fields set to default.
    pub fn with_endpoint(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            ..Self::default()
        }
    }

    pub fn with_keepalive(self, keepalive: KeepaliveConfig) -> Self {
        Self {
            keepalive: Some(keepalive),
            ..self
        }
    }

    pub fn with_connect_timeout(self, connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            ..self
        }
    }

    pub fn with_request_timeout(self, request_timeout: Duration) -> Self {
        Self {
            request_timeout,
            ..self
        }
    }

    pub fn with_buffer_size(self, buffer_size: usize) -> Self {
        Self {
            buffer_size: Some(buffer_size),
            ..self
        }
    }

    /// Same configuration pointed at a different endpoint. Used by the
    /// channel pool to stamp per-URL channels out of one template.
    pub fn for_endpoint(&self, endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            ..self.clone()
        }
    }

    /// Converts the client configuration to a lazy tonic channel, dispatching
    /// on the endpoint scheme.
    pub fn to_channel(&self) -> Result<Channel, ConfigError> {
        match self.parse_target()? {
            Target::Tcp(uri) => Ok(self.tcp_channel(uri)),
            #[cfg(target_family = "unix")]
            Target::Unix(path) => Ok(self.unix_channel(path)),
        }
    }

    fn parse_target(&self) -> Result<Target, ConfigError> {
        if self.endpoint.is_empty() {
            return Err(ConfigError::MissingEndpoint);
        }

        let uri: Uri = self
            .endpoint
            .parse()
            .map_err(|e: http::uri::InvalidUri| ConfigError::UriParseError(e.to_string()))?;

        match uri.scheme_str() {
            Some("http") => Ok(Target::Tcp(uri)),
            Some("tcp") => {
                let authority = uri
                    .authority()
                    .ok_or_else(|| ConfigError::UriParseError(self.endpoint.clone()))?;
                let rewritten = format!("http://{}", authority)
                    .parse()
                    .map_err(|e: http::uri::InvalidUri| ConfigError::UriParseError(e.to_string()))?;
                Ok(Target::Tcp(rewritten))
            }
            #[cfg(target_family = "unix")]
            Some("unix") => {
                if uri.path().is_empty() || uri.path() == "/" {
                    return Err(ConfigError::UnixSocketMissingPath);
                }
                Ok(Target::Unix(PathBuf::from(uri.path())))
            }
            #[cfg(not(target_family = "unix"))]
            Some("unix") => Err(ConfigError::UnixSocketUnsupported),
            other => Err(ConfigError::UnsupportedScheme(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }

    /// Creates the channel builder with all configuration settings.
    fn create_channel_builder(&self, uri: Uri) -> tonic::transport::Endpoint {
        let mut builder = Channel::builder(uri);

        // set the buffer size
        if let Some(size) = self.buffer_size {
            builder = builder.buffer_size(size);
        }

        // set keepalive settings
        if let Some(keepalive) = &self.keepalive {
            builder = builder
                .keep_alive_timeout(keepalive.timeout)
                .keep_alive_while_idle(keepalive.keep_alive_while_idle)
                // HTTP level keepalive
                .http2_keep_alive_interval(keepalive.http2_keepalive);
        }

        // set the request timeout
        if self.request_timeout.as_secs() > 0 {
            builder = builder.timeout(self.request_timeout);
        }

        builder
    }

    fn tcp_channel(&self, uri: Uri) -> Channel {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_nodelay(false);

        // set the connection timeout
        match self.connect_timeout.as_secs() {
            0 => http.set_connect_timeout(None),
            _ => http.set_connect_timeout(Some(self.connect_timeout)),
        }

        // set keepalive settings
        if let Some(keepalive) = &self.keepalive {
            http.set_keepalive(Some(keepalive.tcp_keepalive));
        }

        self.create_channel_builder(uri)
            .connect_with_connector_lazy(http)
    }

    #[cfg(target_family = "unix")]
    fn unix_channel(&self, path: PathBuf) -> Channel {
        // The authority is never dialed: the connector below ignores the URI
        // and opens the configured socket path.
        let mut builder = self.create_channel_builder(Uri::from_static("http://localhost"));

        if self.connect_timeout.as_secs() > 0 {
            builder = builder.connect_timeout(self.connect_timeout);
        }

        builder.connect_with_connector_lazy(tower::service_fn(move |_: Uri| {
            let path = path.clone();
            async move {
                let stream = UnixStream::connect(path).await?;
                Ok::<_, std::io::Error>(TokioIo::new(stream))
            }
        }))
    }
}

#[cfg(test)]
mod test {
    #[allow(unused_imports)]
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_default_keepalive_config() {
        let keepalive = KeepaliveConfig::default();
        assert_eq!(keepalive.tcp_keepalive, Duration::from_secs(60));
        assert_eq!(keepalive.http2_keepalive, Duration::from_secs(60));
        assert_eq!(keepalive.timeout, Duration::from_secs(10));
        assert!(!keepalive.keep_alive_while_idle);
    }

    #[test]
    fn test_default_client_config() {
        let client = ClientConfig::default();
        assert_eq!(client.endpoint, String::new());
        assert_eq!(client.keepalive, None);
        assert_eq!(client.connect_timeout, Duration::from_secs(0));
        assert_eq!(client.request_timeout, Duration::from_secs(0));
        assert_eq!(client.buffer_size, None);
    }

    #[test]
    fn test_parse_target() {
        let client = ClientConfig::with_endpoint("tcp://127.0.0.1:5001");
        assert!(matches!(client.parse_target(), Ok(Target::Tcp(_))));

        let client = ClientConfig::with_endpoint("http://localhost:8080");
        assert!(matches!(client.parse_target(), Ok(Target::Tcp(_))));

        let client = ClientConfig::with_endpoint("unix:///tmp/weft.sock");
        assert!(matches!(client.parse_target(), Ok(Target::Unix(_))));

        let client = ClientConfig::with_endpoint("unix://");
        assert!(matches!(
            client.parse_target(),
            Err(ConfigError::UnixSocketMissingPath)
        ));

        let client = ClientConfig::with_endpoint("ftp://example.com");
        assert!(matches!(
            client.parse_target(),
            Err(ConfigError::UnsupportedScheme(_))
        ));

        let client = ClientConfig::default();
        assert!(matches!(
            client.parse_target(),
            Err(ConfigError::MissingEndpoint)
        ));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_to_channel() {
        // as the endpoint is missing, this should fail
        let mut client = ClientConfig::default();
        assert!(client.to_channel().is_err());

        // a tcp endpoint builds lazily without a live server
        client.endpoint = "tcp://localhost:8080".to_string();
        assert!(client.to_channel().is_ok());

        // keepalive settings
        client.keepalive = Some(KeepaliveConfig::default());
        assert!(client.to_channel().is_ok());

        // timeout settings
        client.request_timeout = Duration::from_secs(10);
        client.connect_timeout = Duration::from_secs(1);
        assert!(client.to_channel().is_ok());

        // buffer size settings
        client.buffer_size = Some(1024);
        assert!(client.to_channel().is_ok());

        // unix endpoints build lazily as well
        let client = ClientConfig::with_endpoint("unix:///tmp/weft-test.sock");
        assert!(client.to_channel().is_ok());
    }

    #[test]
    fn test_for_endpoint_keeps_settings() {
        let template = ClientConfig::with_endpoint("tcp://127.0.0.1:1")
            .with_connect_timeout(Duration::from_secs(3))
            .with_buffer_size(512);
        let stamped = template.for_endpoint("tcp://127.0.0.1:2");
        assert_eq!(stamped.endpoint, "tcp://127.0.0.1:2");
        assert_eq!(stamped.connect_timeout, Duration::from_secs(3));
        assert_eq!(stamped.buffer_size, Some(512));
    }
}
