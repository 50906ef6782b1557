// Command dispatch
//
// Two registries map incoming packets to handlers: JDWP (command set,
// command) pairs, and DDMS chunk types for packets in the DDMS command set.
// Handlers are plain enum variants carrying their configuration; dispatch
// is a match on the variant.

use crate::chunks;
use crate::commands::{error_codes, JdwpCommandId};
use crate::config::FeatureConfig;
use crate::connection::PacketWriter;
use crate::ddms::{decode_chunk, is_ddms_packet, ChunkType};
use crate::protocol::{JdwpError, JdwpPacket, JdwpResult};
use crate::state::{ClientState, DeviceState};
use crate::vm::{self, VmVersion};
use std::collections::HashMap;
use tokio::io::AsyncWrite;
use tracing::debug;

/// What a handler did with a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// At least one packet was written
    Replied,
    /// Handled without writing anything
    Ignored,
    /// The process is gone, the connection must end
    Terminate,
}

impl HandlerOutcome {
    pub fn continue_session(&self) -> bool {
        !matches!(self, HandlerOutcome::Terminate)
    }
}

/// Everything a handler may read or mutate
pub struct HandlerContext<'a, W> {
    pub device: &'a DeviceState,
    pub client: &'a ClientState,
    pub output: &'a PacketWriter<W>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandHandler {
    VmVersion(VmVersion),
    VmIdSizes,
    VmSuspend,
    VmResume,
    VmExit,
    /// Known command answered with NOT_IMPLEMENTED
    NotImplemented,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkHandler {
    Feat(FeatureConfig),
    Helo,
    Exit,
}

#[derive(Debug, Clone)]
pub struct DispatchTable {
    commands: HashMap<JdwpCommandId, CommandHandler>,
    chunks: HashMap<ChunkType, ChunkHandler>,
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::with_default_handlers(FeatureConfig::default())
    }
}

impl DispatchTable {
    /// Table without any handler
    pub fn empty() -> Self {
        Self {
            commands: HashMap::new(),
            chunks: HashMap::new(),
        }
    }

    pub fn with_default_handlers(features: FeatureConfig) -> Self {
        let mut table = Self::empty();
        table
            .register_command(
                JdwpCommandId::VM_VERSION,
                CommandHandler::VmVersion(VmVersion::default()),
            )
            .register_command(JdwpCommandId::VM_ID_SIZES, CommandHandler::VmIdSizes)
            .register_command(JdwpCommandId::VM_SUSPEND, CommandHandler::VmSuspend)
            .register_command(JdwpCommandId::VM_RESUME, CommandHandler::VmResume)
            .register_command(JdwpCommandId::VM_EXIT, CommandHandler::VmExit)
            .register_chunk(ChunkType::FEAT, ChunkHandler::Feat(features))
            .register_chunk(ChunkType::HELO, ChunkHandler::Helo)
            .register_chunk(ChunkType::EXIT, ChunkHandler::Exit);
        table
    }

    /// Register or replace the handler for a JDWP command
    pub fn register_command(&mut self, id: JdwpCommandId, handler: CommandHandler) -> &mut Self {
        self.commands.insert(id, handler);
        self
    }

    /// Register or replace the handler for a DDMS chunk type
    pub fn register_chunk(&mut self, chunk_type: ChunkType, handler: ChunkHandler) -> &mut Self {
        self.chunks.insert(chunk_type, handler);
        self
    }

    pub fn command_handler(&self, id: JdwpCommandId) -> Option<&CommandHandler> {
        self.commands.get(&id)
    }

    pub fn chunk_handler(&self, chunk_type: ChunkType) -> Option<&ChunkHandler> {
        self.chunks.get(&chunk_type)
    }

    pub fn command_ids(&self) -> impl Iterator<Item = JdwpCommandId> + '_ {
        self.commands.keys().copied()
    }

    pub fn chunk_types(&self) -> impl Iterator<Item = ChunkType> + '_ {
        self.chunks.keys().copied()
    }

    /// Route one packet from a tool to its handler.
    ///
    /// Unknown commands and chunk types fail with a non-fatal error; the
    /// caller decides what to do with the connection.
    pub async fn dispatch<W>(
        &self,
        device: &DeviceState,
        client: &ClientState,
        packet: &JdwpPacket,
        output: &PacketWriter<W>,
    ) -> JdwpResult<HandlerOutcome>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let Some(id) = packet.command_id() else {
            // Replies answer packets the VM sent on its own; nothing waits for them
            debug!("Ignoring reply packet id={}", packet.id);
            return Ok(HandlerOutcome::Ignored);
        };

        let ctx = HandlerContext {
            device,
            client,
            output,
        };

        if is_ddms_packet(packet) {
            let chunk = decode_chunk(packet)?;
            debug!(
                "DDMS chunk {} ({} bytes) id={} pid={}",
                chunk.chunk_type,
                chunk.data.len(),
                packet.id,
                client.pid
            );

            let handler = self
                .chunk_handler(chunk.chunk_type)
                .ok_or(JdwpError::UnsupportedChunk(chunk.chunk_type))?;

            return match handler {
                ChunkHandler::Feat(features) => chunks::handle_feat(&ctx, packet, features).await,
                ChunkHandler::Helo => chunks::handle_helo(&ctx, packet, &chunk).await,
                ChunkHandler::Exit => chunks::handle_exit(&ctx, &chunk).await,
            };
        }

        debug!("Command {} id={} pid={}", id, packet.id, client.pid);

        let handler = self
            .command_handler(id)
            .ok_or(JdwpError::UnsupportedCommand(id))?;

        match handler {
            CommandHandler::VmVersion(version) => vm::handle_version(&ctx, packet, version).await,
            CommandHandler::VmIdSizes => vm::handle_id_sizes(&ctx, packet).await,
            CommandHandler::VmSuspend => vm::handle_suspend(&ctx, packet).await,
            CommandHandler::VmResume => vm::handle_resume(&ctx, packet).await,
            CommandHandler::VmExit => vm::handle_exit(&ctx, packet).await,
            CommandHandler::NotImplemented => {
                output
                    .write_packet(&JdwpPacket::error_reply(
                        packet.id,
                        error_codes::NOT_IMPLEMENTED,
                        Vec::new(),
                    ))
                    .await?;
                Ok(HandlerOutcome::Replied)
            }
        }
    }
}
