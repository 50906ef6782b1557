// JDWP session loop
//
// One loop per connection: read a packet, dispatch it, repeat until the
// stream closes or a handler ends the session. Packets of one connection
// are never handled concurrently.

use crate::connection::PacketWriter;
use crate::dispatch::DispatchTable;
use crate::protocol::{read_packet, JdwpResult};
use crate::state::{ClientState, DeviceState};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

/// Why a session ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// A handler ended the session (the process exited)
    Terminated,
    /// The tool closed the connection
    StreamClosed,
}

pub struct JdwpSession<W> {
    device: Arc<DeviceState>,
    client: Arc<ClientState>,
    table: Arc<DispatchTable>,
    output: PacketWriter<W>,
}

impl<W: AsyncWrite + Unpin + Send> JdwpSession<W> {
    pub fn new(
        device: Arc<DeviceState>,
        client: Arc<ClientState>,
        table: Arc<DispatchTable>,
        output: PacketWriter<W>,
    ) -> Self {
        Self {
            device,
            client,
            table,
            output,
        }
    }

    pub fn client(&self) -> &Arc<ClientState> {
        &self.client
    }

    pub fn output(&self) -> &PacketWriter<W> {
        &self.output
    }

    /// Process packets until the stream closes or a handler terminates.
    ///
    /// Unknown commands and failed responses are logged and the loop goes
    /// on; framing and I/O errors on the input end it with an error.
    pub async fn run<R>(&self, reader: &mut R) -> JdwpResult<SessionEnd>
    where
        R: AsyncRead + Unpin,
    {
        info!("JDWP session started for pid={}", self.client.pid);

        loop {
            let packet = match read_packet(reader).await {
                Ok(Some(packet)) => packet,
                Ok(None) => {
                    info!("JDWP session for pid={} closed by peer", self.client.pid);
                    return Ok(SessionEnd::StreamClosed);
                }
                Err(e) => {
                    error!("Failed to read packet for pid={}: {}", self.client.pid, e);
                    return Err(e);
                }
            };

            match self
                .table
                .dispatch(&self.device, &self.client, &packet, &self.output)
                .await
            {
                Ok(outcome) if outcome.continue_session() => {
                    debug!("Packet id={} handled: {:?}", packet.id, outcome);
                }
                Ok(_) => {
                    info!("JDWP session for pid={} terminated", self.client.pid);
                    return Ok(SessionEnd::Terminated);
                }
                Err(e) if !e.is_fatal() => {
                    warn!("pid={}: {}", self.client.pid, e);
                }
                Err(e) => {
                    error!("JDWP session for pid={} failed: {}", self.client.pid, e);
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::ddms::{chunk_command, decode_chunk, ChunkType};
    use crate::protocol::{write_packet, JdwpError, JdwpPacket};
    use tokio::io::AsyncWriteExt;

    async fn session() -> (Arc<DeviceState>, JdwpSession<tokio::io::DuplexStream>, tokio::io::DuplexStream) {
        let device = Arc::new(DeviceState::new("emulator-5554"));
        let client = device.start_client(ClientConfig::new(10, "app")).await;
        let (tool, vm) = tokio::io::duplex(4096);
        let session = JdwpSession::new(
            device.clone(),
            client,
            Arc::new(DispatchTable::default()),
            PacketWriter::new(vm),
        );
        (device, session, tool)
    }

    #[tokio::test]
    async fn keeps_running_after_unknown_command_and_ends_on_exit() {
        let (device, session, mut tool) = session().await;

        let mut input = Vec::new();
        write_packet(&mut input, &JdwpPacket::command(1, 64, 1, Vec::new())).await.unwrap();
        write_packet(&mut input, &chunk_command(2, ChunkType::HELO, &[0, 0, 0, 1])).await.unwrap();
        write_packet(&mut input, &JdwpPacket::command(3, 1, 10, Vec::new())).await.unwrap();
        write_packet(&mut input, &JdwpPacket::command(4, 1, 1, Vec::new())).await.unwrap();

        let end = session.run(&mut input.as_slice()).await.unwrap();
        assert_eq!(end, SessionEnd::Terminated);
        assert!(device.client(10).await.is_none());

        // Only the HELO reply was written; the packet after VM.Exit was never read
        drop(session);
        let reply = read_packet(&mut tool).await.unwrap().unwrap();
        assert_eq!(reply.id, 2);
        assert_eq!(decode_chunk(&reply).unwrap().chunk_type, ChunkType::HELO);
        assert!(read_packet(&mut tool).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ends_when_stream_closes() {
        let (device, session, _tool) = session().await;
        assert_eq!(session.client().pid, 10);

        let end = session.run(&mut tokio::io::empty()).await.unwrap();
        assert_eq!(end, SessionEnd::StreamClosed);
        assert!(device.client(10).await.is_some());
    }

    #[tokio::test]
    async fn malformed_packet_ends_session() {
        let (_device, session, _tool) = session().await;

        let (mut tx, mut rx) = tokio::io::duplex(64);
        tx.write_all(&[0, 0, 0, 4, 0, 0, 0, 1, 0, 1, 1]).await.unwrap();
        drop(tx);

        assert!(matches!(
            session.run(&mut rx).await,
            Err(JdwpError::MalformedPacket(_))
        ));
    }
}
