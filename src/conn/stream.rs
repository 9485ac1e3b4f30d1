//! Byte stream under a connection: TCP, UNIX socket, or TLS.

use std::io::{BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::opts::Opts;

#[cfg(feature = "tls")]
use crate::opts::SslMode;

/// One live socket, buffered on the read side.
pub enum Stream {
    Tcp(BufReader<TcpStream>),
    Unix(BufReader<UnixStream>),
    #[cfg(feature = "tls")]
    Tls(BufReader<native_tls::TlsStream<TcpStream>>),
}

impl Stream {
    /// Open the socket named by the options (UNIX path wins over host).
    pub fn open(opts: &Opts) -> Result<Self> {
        if let Some(path) = &opts.socket {
            // A directory path gets the conventional socket file name
            let path = if path.contains(".s.PGSQL.") {
                path.clone()
            } else {
                format!("{}/.s.PGSQL.{}", path.trim_end_matches('/'), opts.port)
            };
            let stream = UnixStream::connect(&path)?;
            return Ok(Stream::Unix(BufReader::new(stream)));
        }

        let addrs = (opts.host.as_str(), opts.port)
            .to_socket_addrs()
            .map_err(Error::Io)?;

        let mut last_err = None;
        for addr in addrs {
            let attempt = match opts.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(Stream::Tcp(BufReader::new(stream)));
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(match last_err {
            Some(e) => Error::Io(e),
            None => Error::Config(format!("host resolved to no addresses: {}", opts.host)),
        })
    }

    /// Upgrade a TCP stream to TLS, handing the socket to the external
    /// TLS provider. Only the stream swap happens here; certificate
    /// policy comes from the options.
    #[cfg(feature = "tls")]
    pub fn upgrade_to_tls(self, opts: &Opts) -> Result<Self> {
        let Stream::Tcp(reader) = self else {
            return Err(Error::InvalidUsage(
                "only a plain TCP stream can be upgraded to TLS".into(),
            ));
        };
        let tcp = reader.into_inner();

        let mut builder = native_tls::TlsConnector::builder();
        match opts.ssl_mode {
            SslMode::VerifyFull => {}
            SslMode::VerifyCa => {
                builder.danger_accept_invalid_hostnames(true);
            }
            _ => {
                builder.danger_accept_invalid_certs(true);
                builder.danger_accept_invalid_hostnames(true);
            }
        }
        if let Some(path) = &opts.ssl_root_cert {
            let pem = std::fs::read(path)?;
            let cert = native_tls::Certificate::from_pem(&pem)?;
            builder.add_root_certificate(cert);
        }
        let connector = builder.build()?;

        let tls = connector.connect(&opts.host, tcp).map_err(|e| match e {
            native_tls::HandshakeError::Failure(e) => Error::Tls(e),
            native_tls::HandshakeError::WouldBlock(_) => Error::Io(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                "TLS handshake would block",
            )),
        })?;

        Ok(Stream::Tls(BufReader::new(tls)))
    }

    /// SHA-256 of the server certificate, for SCRAM channel binding.
    #[cfg(feature = "tls")]
    pub fn channel_binding(&self) -> Option<Vec<u8>> {
        use sha2::{Digest, Sha256};

        match self {
            Stream::Tls(reader) => {
                let cert = reader.get_ref().peer_certificate().ok()??;
                let der = cert.to_der().ok()?;
                Some(Sha256::digest(&der).to_vec())
            }
            _ => None,
        }
    }

    /// Set (or clear) the read deadline on the underlying socket.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match self {
            Stream::Tcp(reader) => reader.get_ref().set_read_timeout(timeout)?,
            Stream::Unix(reader) => reader.get_ref().set_read_timeout(timeout)?,
            #[cfg(feature = "tls")]
            Stream::Tls(reader) => reader.get_ref().get_ref().set_read_timeout(timeout)?,
        }
        Ok(())
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(reader) => reader.read_exact(buf),
            Stream::Unix(reader) => reader.read_exact(buf),
            #[cfg(feature = "tls")]
            Stream::Tls(reader) => reader.read_exact(buf),
        }
    }

    /// Read a single byte (the SSLRequest response).
    pub fn read_u8(&mut self) -> std::io::Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(reader) => reader.get_mut().write_all(buf),
            Stream::Unix(reader) => reader.get_mut().write_all(buf),
            #[cfg(feature = "tls")]
            Stream::Tls(reader) => reader.get_mut().write_all(buf),
        }
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Tcp(reader) => reader.get_mut().flush(),
            Stream::Unix(reader) => reader.get_mut().flush(),
            #[cfg(feature = "tls")]
            Stream::Tls(reader) => reader.get_mut().flush(),
        }
    }

    /// Read one framed message into the buffer set.
    ///
    /// The length field includes itself; lengths below 4 are rejected.
    pub fn read_message(&mut self, buffer_set: &mut BufferSet) -> Result<()> {
        let mut type_byte = [0u8; 1];
        self.read_exact(&mut type_byte)?;
        buffer_set.type_byte = type_byte[0];

        let mut length_bytes = [0u8; 4];
        self.read_exact(&mut length_bytes)?;
        let length = i32::from_be_bytes(length_bytes);

        if length < 4 {
            return Err(Error::Protocol(format!(
                "invalid message length: {}",
                length
            )));
        }

        let payload_len = (length - 4) as usize;
        buffer_set.read_buffer.clear();
        buffer_set.read_buffer.resize(payload_len, 0);
        self.read_exact(&mut buffer_set.read_buffer)?;

        Ok(())
    }

    /// Like [`Self::read_message`] but honoring a deadline for the FIRST
    /// byte only; once a message has started, the rest is read blocking so
    /// the framing never desynchronizes. Returns `Ok(false)` on deadline.
    pub fn read_message_deadline(
        &mut self,
        buffer_set: &mut BufferSet,
        timeout: Duration,
    ) -> Result<bool> {
        self.set_read_timeout(Some(timeout))?;
        let mut type_byte = [0u8; 1];
        let first = self.read_exact(&mut type_byte);
        self.set_read_timeout(None)?;

        match first {
            Ok(()) => {}
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Ok(false);
            }
            Err(e) => return Err(Error::Io(e)),
        }

        buffer_set.type_byte = type_byte[0];

        let mut length_bytes = [0u8; 4];
        self.read_exact(&mut length_bytes)?;
        let length = i32::from_be_bytes(length_bytes);

        if length < 4 {
            return Err(Error::Protocol(format!(
                "invalid message length: {}",
                length
            )));
        }

        let payload_len = (length - 4) as usize;
        buffer_set.read_buffer.clear();
        buffer_set.read_buffer.resize(payload_len, 0);
        self.read_exact(&mut buffer_set.read_buffer)?;

        Ok(true)
    }
}
