// DDMS chunk handlers
//
// FEAT - feature negotiation, followed by WAIT for processes waiting for a debugger
// HELO - process identity
// EXIT - process exit requested through DDMS

use crate::config::FeatureConfig;
use crate::ddms::{chunk_event, chunk_reply, ChunkType, DdmsChunk};
use crate::dispatch::{HandlerContext, HandlerOutcome};
use crate::protocol::{JdwpPacket, JdwpResult};
use crate::reader::{put_utf16, put_utf16_string, read_i32, utf16_len};
use crate::vm::terminate_client;
use bytes::BufMut;
use tokio::io::AsyncWrite;
use tracing::{debug, warn};

/// HELO protocol version spoken by the fake VM
pub const SERVER_PROTOCOL_VERSION: i32 = 1;

/// FEAT. Nothing is sent when the process has no features to report, the
/// way older devices never answer.
pub async fn handle_feat<W>(
    ctx: &HandlerContext<'_, W>,
    packet: &JdwpPacket,
    features: &FeatureConfig,
) -> JdwpResult<HandlerOutcome>
where
    W: AsyncWrite + Unpin + Send,
{
    let list = features.features_for(ctx.client.pid);
    if list.is_empty() {
        debug!("No features for pid={}, leaving FEAT unanswered", ctx.client.pid);
        return Ok(HandlerOutcome::Ignored);
    }

    let mut data = Vec::new();
    data.put_i32(list.len() as i32);
    for feature in list {
        put_utf16_string(&mut data, feature);
    }

    // FEAT and WAIT go out back to back
    let mut output = ctx.output.lock().await;

    if let Err(e) = output.write_packet(&chunk_reply(packet.id, ChunkType::FEAT, &data)).await {
        warn!("Failed to write FEAT reply for pid={}: {}", ctx.client.pid, e);
        return Err(e);
    }
    ctx.client.set_features(list.iter().cloned());

    if ctx.client.is_waiting() {
        if let Err(e) = output.write_packet(&chunk_event(ChunkType::WAIT, &[0])).await {
            warn!("Failed to write WAIT for pid={}: {}", ctx.client.pid, e);
            return Err(e);
        }
    }

    Ok(HandlerOutcome::Replied)
}

/// HELO. The request carries the tool's protocol version, the reply
/// describes the process.
pub async fn handle_helo<W>(
    ctx: &HandlerContext<'_, W>,
    packet: &JdwpPacket,
    chunk: &DdmsChunk,
) -> JdwpResult<HandlerOutcome>
where
    W: AsyncWrite + Unpin + Send,
{
    if let Ok(version) = read_i32(&mut chunk.data.as_slice()) {
        debug!("HELO from tool protocol version {}", version);
    }

    let client = ctx.client;
    let mut data = Vec::new();
    data.put_i32(SERVER_PROTOCOL_VERSION);
    data.put_i32(client.pid);
    data.put_i32(utf16_len(&client.vm_identifier));
    data.put_i32(utf16_len(&client.process_name));
    put_utf16(&mut data, &client.vm_identifier);
    put_utf16(&mut data, &client.process_name);
    data.put_i32(client.uid);
    put_utf16_string(&mut data, &client.abi);
    put_utf16_string(&mut data, &client.jvm_flags);
    data.put_u8(client.native_debuggable as u8);
    put_utf16_string(&mut data, &client.package_name);

    ctx.output
        .write_packet(&chunk_reply(packet.id, ChunkType::HELO, &data))
        .await?;
    Ok(HandlerOutcome::Replied)
}

/// EXIT. Same effect as VirtualMachine.Exit.
pub async fn handle_exit<W>(
    ctx: &HandlerContext<'_, W>,
    chunk: &DdmsChunk,
) -> JdwpResult<HandlerOutcome> {
    let status = read_i32(&mut chunk.data.as_slice()).unwrap_or(0);
    terminate_client(ctx, status).await
}
