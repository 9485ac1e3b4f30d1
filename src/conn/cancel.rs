//! Side-channel query cancellation.

use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::frontend::write_cancel_request;

#[derive(Debug, Clone)]
enum Target {
    Tcp {
        host: String,
        port: u16,
        timeout: Option<Duration>,
    },
    Unix {
        path: String,
    },
}

/// Cancels an in-flight query over a fresh connection.
///
/// The token captures the backend pid and secret from the handshake. It
/// never writes to the primary socket, so it is safe to fire from another
/// thread while the owner is blocked reading. Cancellation is best-effort:
/// the server may have finished the query already.
#[derive(Debug, Clone)]
pub struct CancelToken {
    target: Target,
    pid: u32,
    secret: u32,
}

impl CancelToken {
    pub(crate) fn new(opts: &Opts, pid: u32, secret: u32) -> Self {
        let target = match &opts.socket {
            Some(path) => Target::Unix {
                path: if path.contains(".s.PGSQL.") {
                    path.clone()
                } else {
                    format!("{}/.s.PGSQL.{}", path.trim_end_matches('/'), opts.port)
                },
            },
            None => Target::Tcp {
                host: opts.host.clone(),
                port: opts.port,
                timeout: opts.connect_timeout,
            },
        };
        Self {
            target,
            pid,
            secret,
        }
    }

    /// Backend pid this token cancels.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Open a side connection, send CancelRequest, and hang up.
    pub fn cancel(&self) -> Result<()> {
        let mut request = Vec::with_capacity(16);
        write_cancel_request(&mut request, self.pid, self.secret);

        match &self.target {
            Target::Tcp {
                host,
                port,
                timeout,
            } => {
                let addrs = (host.as_str(), *port)
                    .to_socket_addrs()
                    .map_err(Error::Io)?;

                let mut last_err = None;
                for addr in addrs {
                    let attempt = match timeout {
                        Some(t) => TcpStream::connect_timeout(&addr, *t),
                        None => TcpStream::connect(addr),
                    };
                    match attempt {
                        Ok(mut stream) => {
                            stream.write_all(&request)?;
                            stream.flush()?;
                            // Server closes without replying
                            return Ok(());
                        }
                        Err(e) => last_err = Some(e),
                    }
                }
                Err(match last_err {
                    Some(e) => Error::Io(e),
                    None => Error::Config(format!("host resolved to no addresses: {}", host)),
                })
            }
            Target::Unix { path } => {
                let mut stream = UnixStream::connect(path)?;
                stream.write_all(&request)?;
                stream.flush()?;
                Ok(())
            }
        }
    }
}
