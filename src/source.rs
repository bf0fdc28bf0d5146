//! # Byte sources
//!
//! An input module reads from a [`Source`]: something that can report read
//! readiness and then accept a vectored, non-blocking read. Files, TCP
//! streams, UDP sockets and Unix stream sockets are supported, and
//! [`open`] builds one from a source name:
//!
//! - `file:movie.ts` or `movie.ts`: a regular file
//! - `tcp://host:port`: a TCP connection
//! - `udp://@239.1.1.1:1234` or `udp://:1234`: a bound UDP socket, joining
//!   the group when the address is IPv4 multicast (Unix only)
//! - `unix:/run/feed.sock`: a Unix stream socket (Unix only)

use async_trait::async_trait;
use log::{debug, info};
use std::fs::File;
use std::io::{self, IoSliceMut, Read};
use std::path::Path;
use tokio::net::TcpStream;
use url::Url;

use crate::error::{InputError, Result};

/// A readable, pollable byte source
#[async_trait]
pub trait Source: Send {
    /// Resolves once a read is expected to make progress.
    async fn readable(&mut self) -> io::Result<()>;

    /// Reads into `bufs` without blocking. `WouldBlock` means the readiness
    /// was spurious.
    fn try_read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize>;

    /// True for message-oriented sources: each read returns one whole
    /// datagram and bytes never continue into the next one.
    fn preserves_boundaries(&self) -> bool {
        false
    }
}

#[async_trait]
impl<S: Source + ?Sized> Source for Box<S> {
    async fn readable(&mut self) -> io::Result<()> {
        (**self).readable().await
    }

    fn try_read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        (**self).try_read_vectored(bufs)
    }

    fn preserves_boundaries(&self) -> bool {
        (**self).preserves_boundaries()
    }
}

/// A regular file. Always ready, like a file descriptor under `select`.
#[derive(Debug)]
pub struct FileSource {
    file: File,
}

impl FileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self {
            file: File::open(path)?,
        })
    }
}

impl From<File> for FileSource {
    fn from(file: File) -> Self {
        Self { file }
    }
}

#[async_trait]
impl Source for FileSource {
    async fn readable(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn try_read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        self.file.read_vectored(bufs)
    }
}

#[async_trait]
impl Source for TcpStream {
    async fn readable(&mut self) -> io::Result<()> {
        TcpStream::readable(self).await
    }

    fn try_read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        TcpStream::try_read_vectored(self, bufs)
    }
}

#[cfg(unix)]
#[async_trait]
impl Source for tokio::net::UnixStream {
    async fn readable(&mut self) -> io::Result<()> {
        tokio::net::UnixStream::readable(self).await
    }

    fn try_read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        tokio::net::UnixStream::try_read_vectored(self, bufs)
    }
}

#[cfg(unix)]
#[async_trait]
impl Source for tokio::net::UdpSocket {
    async fn readable(&mut self) -> io::Result<()> {
        tokio::net::UdpSocket::readable(self).await
    }

    fn try_read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        use std::os::fd::AsFd;
        use tokio::io::Interest;

        let socket = &*self;
        // One datagram, scattered over the buffers.
        socket.try_io(Interest::READABLE, || {
            nix::sys::uio::readv(socket.as_fd(), bufs).map_err(io::Error::from)
        })
    }

    fn preserves_boundaries(&self) -> bool {
        true
    }
}

/// Strips a leading, case-insensitive `file:` from names longer than the
/// prefix itself.
pub fn strip_file_scheme(name: &str) -> &str {
    const PREFIX: &str = "file:";
    match name.get(..PREFIX.len()) {
        Some(head) if name.len() > PREFIX.len() && head.eq_ignore_ascii_case(PREFIX) => {
            &name[PREFIX.len()..]
        }
        _ => name,
    }
}

/// Opens the source named `name`.
pub async fn open(name: &str) -> Result<Box<dyn Source>> {
    let is_url = name.contains("://") || name.to_ascii_lowercase().starts_with("unix:");
    if !is_url {
        let path = strip_file_scheme(name);
        debug!("opening file {}", path);
        return Ok(Box::new(FileSource::open(path)?));
    }

    let url = Url::parse(name).map_err(|e| InputError::InvalidSource(format!("{name}: {e}")))?;
    match url.scheme() {
        "tcp" => {
            let (host, port) = host_port(&url)?;
            info!("connecting to tcp {}:{}", host, port);
            let stream = TcpStream::connect((host.as_str(), port)).await?;
            Ok(Box::new(stream))
        }
        #[cfg(unix)]
        "udp" => open_udp(&url).await,
        #[cfg(unix)]
        "unix" => {
            info!("connecting to unix socket {}", url.path());
            let stream = tokio::net::UnixStream::connect(url.path()).await?;
            Ok(Box::new(stream))
        }
        scheme => Err(InputError::InvalidSource(format!(
            "unsupported scheme '{scheme}' in {name}"
        ))),
    }
}

fn host_port(url: &Url) -> Result<(String, u16)> {
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| InputError::InvalidSource(format!("missing host in {url}")))?;
    let port = url
        .port()
        .ok_or_else(|| InputError::InvalidSource(format!("missing port in {url}")))?;
    Ok((host.trim_matches(|c| c == '[' || c == ']').to_string(), port))
}

#[cfg(unix)]
async fn open_udp(url: &Url) -> Result<Box<dyn Source>> {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use tokio::net::UdpSocket;

    let port = url
        .port()
        .ok_or_else(|| InputError::InvalidSource(format!("missing port in {url}")))?;
    let ip: IpAddr = match url.host_str().filter(|h| !h.is_empty()) {
        Some(host) => host
            .trim_matches(|c| c == '[' || c == ']')
            .parse()
            .map_err(|_| InputError::InvalidSource(format!("bad address '{host}' in {url}")))?,
        None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
    };

    let socket = UdpSocket::bind(SocketAddr::new(ip, port)).await?;
    if let IpAddr::V4(group) = ip {
        if group.is_multicast() {
            socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)?;
            info!("joined multicast group {}", group);
        }
    }
    info!("listening on udp {}:{}", ip, port);
    Ok(Box::new(socket))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_strip_file_scheme() {
        assert_eq!(strip_file_scheme("file:/tmp/a.ts"), "/tmp/a.ts");
        assert_eq!(strip_file_scheme("FILE:a.ts"), "a.ts");
        assert_eq!(strip_file_scheme("file:"), "file:");
        assert_eq!(strip_file_scheme("/tmp/a.ts"), "/tmp/a.ts");
        assert_eq!(strip_file_scheme("fi"), "fi");
    }

    #[tokio::test]
    async fn test_open_file_and_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0x47; 10]).unwrap();
        let name = format!("file:{}", file.path().display());

        let mut source = open(&name).await.unwrap();
        source.readable().await.unwrap();
        let mut a = [0u8; 4];
        let mut b = [0u8; 8];
        let n = source
            .try_read_vectored(&mut [IoSliceMut::new(&mut a), IoSliceMut::new(&mut b)])
            .unwrap();
        assert_eq!(n, 10);
        assert_eq!(b[..6], [0x47; 6]);
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        assert!(matches!(
            open("/nonexistent/stream.ts").await,
            Err(InputError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_open_rejects_unknown_scheme() {
        assert!(matches!(
            open("rtsp://example.com/stream").await,
            Err(InputError::InvalidSource(_))
        ));
        assert!(matches!(
            open("tcp://127.0.0.1").await,
            Err(InputError::InvalidSource(_))
        ));
    }

    #[tokio::test]
    async fn test_tcp_source() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.unwrap();
            peer.write_all(&[1, 2, 3]).await.unwrap();
            peer
        });

        let mut source = open(&format!("tcp://{addr}")).await.unwrap();
        let _peer = server.await.unwrap();

        let mut buf = [0u8; 8];
        let n = loop {
            source.readable().await.unwrap();
            match source.try_read_vectored(&mut [IoSliceMut::new(&mut buf)]) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                other => break other.unwrap(),
            }
        };
        assert_eq!(&buf[..n], &[1, 2, 3]);
    }
}
