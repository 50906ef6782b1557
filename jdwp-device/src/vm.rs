// VirtualMachine command handlers
//
// The fake VM answers the handful of VirtualMachine commands tooling sends
// right after attaching, and simulates process death on VM.Exit.

use crate::dispatch::{HandlerContext, HandlerOutcome};
use crate::protocol::{JdwpPacket, JdwpResult};
use crate::reader::{put_string, read_i32};
use bytes::BufMut;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;
use tracing::{debug, info};

/// Reply to VirtualMachine.Version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmVersion {
    pub description: String,
    pub jdwp_major: i32,
    pub jdwp_minor: i32,
    pub vm_version: String,
    pub vm_name: String,
}

impl Default for VmVersion {
    fn default() -> Self {
        Self {
            description: "Android Runtime 2.1.0".to_string(),
            jdwp_major: 1,
            jdwp_minor: 6,
            vm_version: "2.1.0".to_string(),
            vm_name: "Dalvik".to_string(),
        }
    }
}

/// Size in bytes of every JDWP id type on ART
const ID_SIZE: i32 = 8;

/// VirtualMachine.Version
pub async fn handle_version<W>(
    ctx: &HandlerContext<'_, W>,
    packet: &JdwpPacket,
    version: &VmVersion,
) -> JdwpResult<HandlerOutcome>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut data = Vec::new();
    put_string(&mut data, &version.description);
    data.put_i32(version.jdwp_major);
    data.put_i32(version.jdwp_minor);
    put_string(&mut data, &version.vm_version);
    put_string(&mut data, &version.vm_name);

    ctx.output.write_packet(&JdwpPacket::reply(packet.id, data)).await?;
    Ok(HandlerOutcome::Replied)
}

/// VirtualMachine.IDSizes: field, method, object, reference type and frame ids
pub async fn handle_id_sizes<W>(
    ctx: &HandlerContext<'_, W>,
    packet: &JdwpPacket,
) -> JdwpResult<HandlerOutcome>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut data = Vec::with_capacity(20);
    for _ in 0..5 {
        data.put_i32(ID_SIZE);
    }

    ctx.output.write_packet(&JdwpPacket::reply(packet.id, data)).await?;
    Ok(HandlerOutcome::Replied)
}

/// VirtualMachine.Suspend
pub async fn handle_suspend<W>(
    ctx: &HandlerContext<'_, W>,
    packet: &JdwpPacket,
) -> JdwpResult<HandlerOutcome>
where
    W: AsyncWrite + Unpin + Send,
{
    debug!("Suspending VM of pid={}", ctx.client.pid);
    ctx.output
        .write_packet(&JdwpPacket::reply(packet.id, Vec::new()))
        .await?;
    Ok(HandlerOutcome::Replied)
}

/// VirtualMachine.Resume. A resumed process is no longer waiting for a debugger.
pub async fn handle_resume<W>(
    ctx: &HandlerContext<'_, W>,
    packet: &JdwpPacket,
) -> JdwpResult<HandlerOutcome>
where
    W: AsyncWrite + Unpin + Send,
{
    if ctx.client.is_waiting() {
        info!("pid={} resumed, clearing waiting state", ctx.client.pid);
        ctx.client.set_waiting(false);
    }

    ctx.output
        .write_packet(&JdwpPacket::reply(packet.id, Vec::new()))
        .await?;
    Ok(HandlerOutcome::Replied)
}

/// VirtualMachine.Exit: the process dies, no reply is sent
pub async fn handle_exit<W>(
    ctx: &HandlerContext<'_, W>,
    packet: &JdwpPacket,
) -> JdwpResult<HandlerOutcome>
where
    W: AsyncWrite + Unpin + Send,
{
    let exit_code = read_i32(&mut packet.payload.as_slice()).unwrap_or(0);
    terminate_client(ctx, exit_code).await
}

/// Remove the connection's process from its device and end the session.
/// A process that was already replaced under the same pid stays registered.
pub(crate) async fn terminate_client<W>(
    ctx: &HandlerContext<'_, W>,
    exit_code: i32,
) -> JdwpResult<HandlerOutcome> {
    info!(
        "pid={} exiting with code {} on {}",
        ctx.client.pid,
        exit_code,
        ctx.device.serial()
    );
    ctx.device.stop_client_if_current(ctx.client).await;
    Ok(HandlerOutcome::Terminate)
}
