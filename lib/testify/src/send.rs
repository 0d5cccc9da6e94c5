use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::codec::{FramedWrite, LinesCodec};

/// Writes every line, newline terminated, over one TCP connection and then
/// closes the write half.
pub async fn send_lines(
    addr: SocketAddr,
    lines: impl IntoIterator<Item = String>,
) -> std::io::Result<()> {
    let stream = TcpStream::connect(addr).await?;
    let mut sink = FramedWrite::new(stream, LinesCodec::new());

    let mut lines = futures::stream::iter(lines).map(Ok);
    sink.send_all(&mut lines)
        .await
        .map_err(|err| std::io::Error::other(err.to_string()))?;

    sink.get_mut().shutdown().await
}

/// Writes each chunk with its own `write_all` and flush, pausing between
/// chunks so they are likely to arrive as separate reads.
pub async fn send_bytes(
    addr: SocketAddr,
    chunks: impl IntoIterator<Item = Vec<u8>>,
) -> std::io::Result<()> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;

    for chunk in chunks {
        stream.write_all(&chunk).await?;
        stream.flush().await?;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    stream.shutdown().await
}

/// Sends every payload as one datagram.
pub async fn send_datagrams(
    addr: SocketAddr,
    payloads: impl IntoIterator<Item = Vec<u8>>,
) -> std::io::Result<usize> {
    let socket = UdpSocket::bind("127.0.0.1:0").await?;

    let mut sent = 0;
    for payload in payloads {
        socket.send_to(&payload, addr).await?;
        sent += 1;
    }

    Ok(sent)
}
