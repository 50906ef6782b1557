// JDWP connection plumbing
//
// Handshake and the serialized output side of a connection

use crate::protocol::*;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Answer the debugger's JDWP handshake by echoing it back
pub async fn accept_handshake<S>(stream: &mut S) -> JdwpResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!("Waiting for JDWP handshake");

    let mut buf = vec![0u8; JDWP_HANDSHAKE.len()];
    stream.read_exact(&mut buf).await?;

    if buf != JDWP_HANDSHAKE {
        warn!("Invalid handshake: {:?}", buf);
        return Err(JdwpError::InvalidHandshake);
    }

    stream.write_all(JDWP_HANDSHAKE).await?;
    stream.flush().await?;

    info!("JDWP handshake successful");
    Ok(())
}

/// Output half of a connection.
///
/// Clones share one lock, so a sequence written through a single
/// [`PacketWriterGuard`] is never interleaved with other writes.
#[derive(Debug)]
pub struct PacketWriter<W> {
    inner: Arc<Mutex<W>>,
}

impl<W> Clone for PacketWriter<W> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> PacketWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Lock the output for a multi-packet sequence
    pub async fn lock(&self) -> PacketWriterGuard<'_, W> {
        PacketWriterGuard {
            writer: self.inner.lock().await,
        }
    }

    pub async fn write_packet(&self, packet: &JdwpPacket) -> JdwpResult<()> {
        self.lock().await.write_packet(packet).await
    }

    /// Shut down the underlying writer
    pub async fn shutdown(&self) -> JdwpResult<()> {
        self.inner.lock().await.shutdown().await?;
        Ok(())
    }

    /// Direct access to the wrapped writer
    pub async fn get_ref(&self) -> MutexGuard<'_, W> {
        self.inner.lock().await
    }
}

pub struct PacketWriterGuard<'a, W> {
    writer: MutexGuard<'a, W>,
}

impl<W: AsyncWrite + Unpin + Send> PacketWriterGuard<'_, W> {
    pub async fn write_packet(&mut self, packet: &JdwpPacket) -> JdwpResult<()> {
        debug!(
            "Writing packet id={} reply={} len={}",
            packet.id,
            packet.is_reply(),
            packet.wire_len()
        );
        write_packet(&mut *self.writer, packet).await
    }
}
