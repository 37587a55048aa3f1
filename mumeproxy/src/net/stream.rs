use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use socket2::{Socket, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::{info, instrument, Level};

use crate::config::Config;
use crate::error::{Error, ErrorKind};

/// A TCP stream to the game server that may be TLS encrypted.
#[derive(Debug)]
pub enum Stream {
    /// A vanilla TCP stream.
    Tcp(TcpStream),

    /// A TLS encrypted TCP stream. The server certificate must identify as
    /// the configured TLS host or the handshake fails before any game data
    /// flows.
    Tls(Box<TlsStream<TcpStream>>),
}

impl Stream {
    #[instrument(level = Level::TRACE, skip(config))]
    pub async fn connect(config: &Config) -> Result<Stream, Error> {
        info!("connecting");
        let tcp_stream =
            happy_eyeballs::tokio::connect((config.remote_host.as_str(), config.remote_port))
                .await?;

        let tcp_stream = configure_keepalive(tcp_stream)?;
        tcp_stream.set_nodelay(true)?;

        let ip_addr = tcp_stream
            .peer_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default();
        info!("connected to {ip_addr}:{}", config.remote_port);

        Ok(match config.no_ssl {
            true => Stream::Tcp(tcp_stream),
            false => Stream::Tls(Box::new(Self::connect_tls(config, tcp_stream).await?)),
        })
    }

    async fn connect_tls(
        config: &Config,
        tcp_stream: TcpStream,
    ) -> Result<TlsStream<TcpStream>, Error> {
        let tls_config = ClientConfig::builder()
            .with_root_certificates(RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.into(),
            })
            .with_no_client_auth();

        // The certificate is verified against the configured host name, not
        // whatever address the TCP connection was made to.
        let server_name = ServerName::try_from(config.tls_host.clone())
            .map_err(|e| ErrorKind::Tls(format!("invalid TLS host {:?}: {e}", config.tls_host)))?;

        TlsConnector::from(Arc::new(tls_config))
            .connect(server_name, tcp_stream)
            .await
            .map_err(Into::into)
    }
}

/// Configure the TCP keepalive behaviour of a socket.
pub(crate) fn configure_keepalive(tcp_stream: TcpStream) -> Result<TcpStream, Error> {
    // Convert the Tokio TCP stream into a std::net::TcpStream, and then a
    // socket2::Socket.
    let tcp_stream = tcp_stream.into_std()?;
    let sock = Socket::from(tcp_stream);

    #[allow(unused_mut)]
    let mut keepalive = TcpKeepalive::new()
        // How long will the connection be allowed to sit idle before the
        // first keepalive packet is sent?
        .with_time(Duration::from_secs(30))
        // How long should we wait between sending keepalive packets?
        .with_interval(Duration::from_secs(5));

    #[cfg(not(target_os = "windows"))]
    {
        // How many keepalive packets should we send before deciding a
        // connection is dead?
        keepalive = keepalive.with_retries(5);
    }

    sock.set_tcp_keepalive(&keepalive)?;

    // Convert the socket back into a std TCP stream, and then a Tokio TCP
    // stream.
    let tcp_stream: std::net::TcpStream = sock.into();
    TcpStream::from_std(tcp_stream).map_err(Into::into)
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(tcp_stream) => Pin::new(tcp_stream).poll_read(cx, buf),
            Stream::Tls(tls_stream) => Pin::new(tls_stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        match self.get_mut() {
            Stream::Tcp(tcp_stream) => Pin::new(tcp_stream).poll_write(cx, buf),
            Stream::Tls(tls_stream) => Pin::new(tls_stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        match self.get_mut() {
            Stream::Tcp(tcp_stream) => Pin::new(tcp_stream).poll_flush(cx),
            Stream::Tls(tls_stream) => Pin::new(tls_stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        match self.get_mut() {
            Stream::Tcp(tcp_stream) => Pin::new(tcp_stream).poll_shutdown(cx),
            Stream::Tls(tls_stream) => Pin::new(tls_stream).poll_shutdown(cx),
        }
    }
}
