//! Transport openers for the four broker URL schemes.
//!
//! Every opener yields independently owned read and write halves so the
//! incoming and outgoing pumps can run without sharing the stream. Ports
//! default per scheme: 1883 (tcp), 8883 (ssl), 80 (ws), 443 (wss).

use super::tls::{build_client_config, TlsOptions};
use super::ws::WsByteStream;
use crate::error::ClientError;
use rustls::pki_types::ServerName;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::Connector;
use url::Url;

pub type TransportReader = Box<dyn AsyncRead + Send + Unpin>;
pub type TransportWriter = Box<dyn AsyncWrite + Send + Unpin>;

fn transport_err(detail: impl std::fmt::Display) -> ClientError {
    ClientError::Transport(detail.to_string())
}

fn split_boxed<S>(stream: S) -> (TransportReader, TransportWriter)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    (Box::new(reader), Box::new(writer))
}

fn default_port(scheme: &str) -> u16 {
    match scheme {
        "tcp" => 1883,
        "ssl" => 8883,
        "ws" => 80,
        "wss" => 443,
        _ => 0,
    }
}

async fn dial(url: &Url) -> Result<TcpStream, ClientError> {
    let host = url
        .host_str()
        .ok_or_else(|| transport_err(format!("broker url {url} has no host")))?;
    let port = url.port().unwrap_or_else(|| default_port(url.scheme()));
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(transport_err)?;
    stream.set_nodelay(true).map_err(transport_err)?;
    Ok(stream)
}

fn server_name(url: &Url, tls: &TlsOptions) -> Result<ServerName<'static>, ClientError> {
    let name = tls
        .server_name
        .clone()
        .or_else(|| url.host_str().map(str::to_string))
        .ok_or_else(|| transport_err("no server name for tls verification"))?;
    ServerName::try_from(name).map_err(transport_err)
}

fn ws_request(url: &Url) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, ClientError> {
    let mut request = url.as_str().into_client_request().map_err(transport_err)?;
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("mqtt"));
    Ok(request)
}

/// Open one broker URL, returning split transport halves.
pub async fn open_connection(
    broker: &str,
    tls: Option<&TlsOptions>,
) -> Result<(TransportReader, TransportWriter), ClientError> {
    let url = Url::parse(broker).map_err(|err| transport_err(format!("{broker}: {err}")))?;
    match url.scheme() {
        "tcp" => {
            let stream = dial(&url).await?;
            Ok(split_boxed(stream))
        }
        "ssl" => {
            let tls = tls.ok_or_else(|| transport_err("ssl:// broker requires tls options"))?;
            let config = build_client_config(tls).map_err(transport_err)?;
            let connector = TlsConnector::from(Arc::new(config));
            let name = server_name(&url, tls)?;
            let stream = dial(&url).await?;
            let stream = connector.connect(name, stream).await.map_err(transport_err)?;
            Ok(split_boxed(stream))
        }
        "ws" => {
            let stream = dial(&url).await?;
            let (socket, _response) =
                tokio_tungstenite::client_async(ws_request(&url)?, stream)
                    .await
                    .map_err(transport_err)?;
            Ok(split_boxed(WsByteStream::new(socket)))
        }
        "wss" => {
            let tls = tls.ok_or_else(|| transport_err("wss:// broker requires tls options"))?;
            let config = build_client_config(tls).map_err(transport_err)?;
            let stream = dial(&url).await?;
            let (socket, _response) = tokio_tungstenite::client_async_tls_with_config(
                ws_request(&url)?,
                stream,
                None,
                Some(Connector::Rustls(Arc::new(config))),
            )
            .await
            .map_err(transport_err)?;
            Ok(split_boxed(WsByteStream::new(socket)))
        }
        other => Err(transport_err(format!("unsupported broker scheme {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_scheme_is_rejected() {
        let err = match open_connection("quic://localhost", None).await {
            Ok(_) => panic!("expected an error"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("unsupported broker scheme"));
    }

    #[tokio::test]
    async fn test_ssl_without_tls_options_is_rejected() {
        let err = match open_connection("ssl://localhost", None).await {
            Ok(_) => panic!("expected an error"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("requires tls options"));
    }

    #[tokio::test]
    async fn test_ws_transport_carries_bytes() {
        use futures_util::{SinkExt, StreamExt};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio_tungstenite::tungstenite::Message;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let callback = |_req: &tokio_tungstenite::tungstenite::handshake::server::Request,
                             mut response: tokio_tungstenite::tungstenite::handshake::server::Response| {
                response
                    .headers_mut()
                    .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("mqtt"));
                Ok(response)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(socket, callback)
                .await
                .unwrap();
            match ws.next().await.unwrap().unwrap() {
                Message::Binary(data) => {
                    assert_eq!(data, b"ping-bytes");
                    ws.send(Message::Binary(b"pong-bytes".to_vec())).await.unwrap();
                }
                other => panic!("expected binary frame, got {other:?}"),
            }
        });

        let (mut reader, mut writer) =
            open_connection(&format!("ws://127.0.0.1:{}", addr.port()), None)
                .await
                .unwrap();
        writer.write_all(b"ping-bytes").await.unwrap();
        writer.flush().await.unwrap();
        let mut echo = [0u8; 10];
        reader.read_exact(&mut echo).await.unwrap();
        assert_eq!(&echo, b"pong-bytes");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_round_trip_over_loopback() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let (mut reader, mut writer) =
            open_connection(&format!("tcp://127.0.0.1:{}", addr.port()), None)
                .await
                .unwrap();
        writer.write_all(b"hello").await.unwrap();
        writer.flush().await.unwrap();
        let mut echo = [0u8; 5];
        reader.read_exact(&mut echo).await.unwrap();
        assert_eq!(&echo, b"hello");
        server.await.unwrap();
    }
}
