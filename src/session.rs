//! Transport session abstraction.
//!
//! A [`Transport`] is a byte-duplex connection, plain TCP or TLS, behind one
//! interface so the upgrade and HTTP/2 layers never care which one they run
//! over. [`NetSession`] adds poll-based timeouts on top.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::AsRawFd;
use std::time::Duration;

use openssl::ssl::SslStream;

use crate::dns;
use crate::error::ProbeError;
use crate::target::{Scheme, Target};
use crate::tls::TlsClientConfig;

/// Readiness events for [`SessionOps::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
}

/// Operations every session kind supports.
pub trait SessionOps {
    /// Wait until the session is ready for the requested operation.
    /// Returns false on timeout.
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> io::Result<bool>;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn close(&mut self);
}

fn poll_fd(fd: i32, events: PollEvents, timeout: Option<Duration>) -> io::Result<bool> {
    use libc::{poll, pollfd, POLLIN, POLLOUT};

    let mut pfd = pollfd {
        fd,
        events: match events {
            PollEvents::Read => POLLIN,
            PollEvents::Write => POLLOUT,
        },
        revents: 0,
    };

    let timeout_ms = timeout.map(|d| d.as_millis() as i32).unwrap_or(-1);
    let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(result > 0)
}

/// A plain or TLS-wrapped TCP connection.
pub enum Transport {
    Tcp(TcpStream),
    Tls(SslStream<TcpStream>),
}

impl Transport {
    fn tcp_stream(&self) -> &TcpStream {
        match self {
            Transport::Tcp(stream) => stream,
            Transport::Tls(stream) => stream.get_ref(),
        }
    }
}

impl SessionOps for Transport {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> io::Result<bool> {
        // TLS may have plaintext buffered that the fd knows nothing about.
        if events == PollEvents::Read {
            if let Transport::Tls(stream) = self {
                if stream.ssl().pending() > 0 {
                    return Ok(true);
                }
            }
        }
        poll_fd(self.tcp_stream().as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Tcp(stream) => stream.read(buf),
            Transport::Tls(stream) => match stream.read(buf) {
                Ok(n) => Ok(n),
                // A close_notify-less shutdown is an EOF as far as the
                // protocol layers are concerned.
                Err(err) if err.kind() == io::ErrorKind::Other => Ok(0),
                Err(err) => Err(err),
            },
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Tcp(stream) => stream.write(buf),
            Transport::Tls(stream) => stream.write(buf),
        }
    }

    fn close(&mut self) {
        match self {
            Transport::Tcp(stream) => {
                let _ = stream.shutdown(Shutdown::Both);
            }
            Transport::Tls(stream) => {
                let _ = stream.shutdown();
                let _ = stream.get_ref().shutdown(Shutdown::Both);
            }
        }
    }
}

/// A [`Transport`] with a configurable read/write timeout.
pub struct NetSession {
    transport: Transport,
    timeout: Option<Duration>,
}

impl NetSession {
    pub fn new(transport: Transport) -> Self {
        NetSession {
            transport,
            timeout: None,
        }
    }

    /// Set the timeout applied to each read and write. `None` blocks forever.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.transport.poll(PollEvents::Read, self.timeout)? {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
        }
        self.transport.read(buf)
    }

    /// Write the whole buffer, in one batch from the caller's perspective.
    pub fn write_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            if !self.transport.poll(PollEvents::Write, self.timeout)? {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out"));
            }
            let n = self.transport.write(buf)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "connection closed mid-write",
                ));
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    pub fn close(&mut self) {
        self.transport.close();
    }
}

/// Dial a target: resolve, connect with a bounded timeout, then wrap in TLS
/// for https. `tls` carries the client config to use for https targets; the
/// smuggling path passes one without ALPN, the control path one with.
pub fn dial(
    target: &Target,
    dial_timeout: Duration,
    tls: &TlsClientConfig,
) -> Result<Transport, ProbeError> {
    let addr = dns::resolve(target.host(), target.port(), dial_timeout)?;
    tracing::trace!(%target, %addr, "dialing");

    let stream = TcpStream::connect_timeout(&addr, dial_timeout)?;
    let _ = stream.set_nodelay(true);

    match target.scheme() {
        Scheme::Http => Ok(Transport::Tcp(stream)),
        Scheme::Https => {
            let stream = tls.connect(stream, target.host())?;
            Ok(Transport::Tls(stream))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn read_times_out_when_peer_is_silent() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(300));
        });

        let stream = TcpStream::connect(addr).unwrap();
        let mut session = NetSession::new(Transport::Tcp(stream));
        session.set_timeout(Some(Duration::from_millis(50)));

        let mut buf = [0u8; 8];
        let err = session.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        handle.join().unwrap();
    }

    #[test]
    fn write_then_read_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"ping");
            stream.write_all(b"pong").unwrap();
        });

        let stream = TcpStream::connect(addr).unwrap();
        let mut session = NetSession::new(Transport::Tcp(stream));
        session.set_timeout(Some(Duration::from_secs(2)));

        session.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        let n = session.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"pong");

        handle.join().unwrap();
    }
}
