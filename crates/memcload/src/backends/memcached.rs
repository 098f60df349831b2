// ai
//! 📡 The memcached text protocol, spoken over one TCP connection per (file, shard).
//!
//! 🎬 *[a socket opens. four bytes of "set " leave the building. eight bytes of
//! "STORED\r\n" come back. repeat one thousand times. nobody claps.]*
//!
//! `set_multi` pipelines the whole batch: the `set`s go out on the write half while
//! the replies are read, in order, off the read half. Neither side waits for the
//! other to finish, so batch size is bounded by patience, not by socket buffers.
//!
//! ⚠️ A transport error or timeout drops the connection. The next `set_multi`
//! reconnects on demand — that's how the shard worker's retry loop gets a clean slate.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use super::{Connector, ShardSink, SinkBackend, SinkError};
use crate::common::Entry;

// -- 📏 memcached refuses keys longer than this. we refuse them first, cheaper.
const MAX_KEY_LEN: usize = 250;

/// 🔧 Knows how to dial a shard. Holds only timeouts, so sharing it is free.
#[derive(Debug, Clone)]
pub(crate) struct MemcachedConnector {
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl MemcachedConnector {
    pub(crate) fn new(connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            io_timeout,
        }
    }
}

#[async_trait]
impl Connector for MemcachedConnector {
    async fn connect(&self, shard: &str, addr: &str) -> Result<SinkBackend, SinkError> {
        debug!("🔌 dialing shard {shard} at {addr}");
        let sink = MemcachedSink::connect(addr, self.connect_timeout, self.io_timeout).await?;
        Ok(SinkBackend::Memcached(sink))
    }
}

#[derive(Debug)]
struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

/// 🚰 One shard, one socket, many pipelined `set`s.
#[derive(Debug)]
pub(crate) struct MemcachedSink {
    addr: String,
    conn: Option<Connection>,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl MemcachedSink {
    /// 🚀 Dial eagerly so an unreachable shard fails at worker start, not 1000 lines in.
    pub(crate) async fn connect(
        addr: &str,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Result<Self, SinkError> {
        let conn = open(addr, connect_timeout).await?;
        Ok(Self {
            addr: addr.to_string(),
            conn: Some(conn),
            connect_timeout,
            io_timeout,
        })
    }
}

async fn open(addr: &str, connect_timeout: Duration) -> Result<Connection, SinkError> {
    let stream = timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| SinkError::Timeout {
            addr: addr.to_string(),
            op: "connect",
            elapsed: connect_timeout,
        })?
        .map_err(|source| SinkError::Connect {
            addr: addr.to_string(),
            source,
        })?;
    // -- 🐢 Nagle would happily sit on our last `set` waiting for friends. No.
    if let Err(err) = stream.set_nodelay(true) {
        trace!("set_nodelay failed for {addr}: {err}");
    }
    let (read_half, write_half) = stream.into_split();
    Ok(Connection {
        reader: BufReader::new(read_half),
        writer: BufWriter::new(write_half),
    })
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.len() <= MAX_KEY_LEN && key.bytes().all(|b| b > b' ' && b != 0x7f)
}

impl Connection {
    /// 📬 Stream the `set`s out while the replies stream back in, one reply per entry.
    ///
    /// Both halves run at once: the server stops reading when its replies pile up
    /// unread, so a batch bigger than the socket buffers would otherwise wedge both ends.
    async fn pipeline_sets(&mut self, addr: &str, entries: &[&Entry]) -> Result<Vec<String>, SinkError> {
        let io_err = |source| SinkError::Io {
            addr: addr.to_string(),
            source,
        };
        let Connection { reader, writer } = self;

        let send = async {
            for entry in entries {
                let header = format!("set {} 0 0 {}\r\n", entry.key, entry.value.len());
                writer.write_all(header.as_bytes()).await.map_err(io_err)?;
                writer.write_all(&entry.value).await.map_err(io_err)?;
                writer.write_all(b"\r\n").await.map_err(io_err)?;
            }
            writer.flush().await.map_err(io_err)
        };

        let receive = async {
            let mut refused = Vec::new();
            let mut reply = String::new();
            for entry in entries {
                reply.clear();
                let bytes_read = reader.read_line(&mut reply).await.map_err(io_err)?;
                if bytes_read == 0 {
                    return Err(SinkError::Io {
                        addr: addr.to_string(),
                        source: std::io::ErrorKind::UnexpectedEof.into(),
                    });
                }
                match reply.trim_end() {
                    "STORED" => {}
                    "NOT_STORED" | "EXISTS" | "NOT_FOUND" => refused.push(entry.key.clone()),
                    other if other == "ERROR" || other.starts_with("SERVER_ERROR") || other.starts_with("CLIENT_ERROR") => {
                        warn!("⚠️ {addr} refused {}: {other}", entry.key);
                        refused.push(entry.key.clone());
                    }
                    other => {
                        return Err(SinkError::Protocol {
                            addr: addr.to_string(),
                            detail: format!("unexpected reply to set {}: {other:?}", entry.key),
                        });
                    }
                }
            }
            Ok(refused)
        };

        let ((), refused) = tokio::try_join!(send, receive)?;
        Ok(refused)
    }
}

#[async_trait]
impl ShardSink for MemcachedSink {
    async fn set_multi(&mut self, entries: &[Entry]) -> Result<Vec<String>, SinkError> {
        let (sendable, unsendable): (Vec<&Entry>, Vec<&Entry>) =
            entries.iter().partition(|entry| is_valid_key(&entry.key));
        let mut failed: Vec<String> = unsendable.into_iter().map(|entry| entry.key.clone()).collect();
        if !failed.is_empty() {
            warn!("⚠️ {} keys are not valid memcached keys, skipping them", failed.len());
        }
        if sendable.is_empty() {
            return Ok(failed);
        }

        // -- 🔁 the previous call may have torn the socket down; dial again if so
        let mut conn = match self.conn.take() {
            Some(conn) => conn,
            None => open(&self.addr, self.connect_timeout).await?,
        };

        let outcome = timeout(self.io_timeout, conn.pipeline_sets(&self.addr, &sendable)).await;
        match outcome {
            Ok(Ok(refused)) => {
                trace!("📬 {} wrote {} entries, {} refused", self.addr, sendable.len(), refused.len());
                self.conn = Some(conn);
                failed.extend(refused);
                Ok(failed)
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(SinkError::Timeout {
                addr: self.addr.clone(),
                op: "set_multi",
                elapsed: self.io_timeout,
            }),
        }
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        let io_err = |source| SinkError::Io {
            addr: self.addr.clone(),
            source,
        };
        conn.writer.write_all(b"quit\r\n").await.map_err(io_err)?;
        conn.writer.flush().await.map_err(io_err)?;
        conn.writer.shutdown().await.map_err(io_err)?;
        Ok(())
    }
}
