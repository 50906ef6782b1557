// Fake ADB server
//
// Accepts host connections for one simulated device. Each connection
// selects the device transport and then asks for a JDWP connection to a
// process or for the stream of JDWP process ids.

use crate::adb::{self, AdbService};
use crate::connection::{accept_handshake, PacketWriter};
use crate::dispatch::DispatchTable;
use crate::protocol::JdwpResult;
use crate::session::JdwpSession;
use crate::state::{ClientState, DeviceState};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct FakeAdbServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    device: Arc<DeviceState>,
}

impl FakeAdbServer {
    /// Serve `device` on an ephemeral loopback port with the default handlers
    pub async fn spawn(device: Arc<DeviceState>) -> std::io::Result<Self> {
        let table = DispatchTable::with_default_handlers(device.features().clone());
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        Self::spawn_with(addr, device, table).await
    }

    pub async fn spawn_with(
        addr: SocketAddr,
        device: Arc<DeviceState>,
        table: DispatchTable,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();

        info!("Fake ADB server for {} listening on {}", device.serial(), addr);

        tokio::spawn(run(
            listener,
            device.clone(),
            Arc::new(table),
            shutdown.clone(),
        ));

        Ok(Self {
            addr,
            shutdown,
            device,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn device(&self) -> &Arc<DeviceState> {
        &self.device
    }

    /// Stop accepting and close every open connection
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Resolves once `shutdown` has been called
    pub async fn stopped(&self) {
        self.shutdown.cancelled().await
    }
}

impl Drop for FakeAdbServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run(
    listener: TcpListener,
    device: Arc<DeviceState>,
    table: Arc<DispatchTable>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accept = listener.accept() => {
                let (socket, peer) = match accept {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                };
                debug!("Accepted connection from {}", peer);

                let device = device.clone();
                let table = table.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(socket, device, table, shutdown).await {
                        warn!("Connection from {} failed: {}", peer, e);
                    }
                });
            }
        }
    }

    info!("Fake ADB server shutting down");
}

async fn handle_connection(
    mut socket: TcpStream,
    device: Arc<DeviceState>,
    table: Arc<DispatchTable>,
    shutdown: CancellationToken,
) -> JdwpResult<()> {
    let mut transport_selected = false;

    loop {
        let Some(request) = adb::read_request(&mut socket).await? else {
            return Ok(());
        };
        debug!("ADB request {:?}", request);

        let service = match request.parse::<AdbService>() {
            Ok(service) => service,
            Err(_) => {
                warn!("Unsupported ADB service {:?}", request);
                return adb::write_fail(&mut socket, "unknown service").await;
            }
        };

        match service {
            AdbService::Transport(serial) if serial != device.serial() => {
                return adb::write_fail(&mut socket, &format!("device '{}' not found", serial))
                    .await;
            }
            AdbService::Transport(_) | AdbService::TransportAny => {
                if !device.is_online().await {
                    return adb::write_fail(&mut socket, "device offline").await;
                }
                adb::write_okay(&mut socket).await?;
                transport_selected = true;
            }
            _ if !transport_selected => {
                return adb::write_fail(&mut socket, "no transport selected").await;
            }
            AdbService::Jdwp(pid) => {
                return serve_jdwp(socket, pid, device, table, shutdown).await;
            }
            AdbService::TrackJdwp => {
                return track_jdwp(socket, device, shutdown).await;
            }
        }
    }
}

async fn serve_jdwp(
    mut socket: TcpStream,
    pid: i32,
    device: Arc<DeviceState>,
    table: Arc<DispatchTable>,
    shutdown: CancellationToken,
) -> JdwpResult<()> {
    let Some(client) = device.client(pid).await else {
        return adb::write_fail(&mut socket, &format!("no process with pid {}", pid)).await;
    };

    // One JDWP connection per process
    if !client.try_attach_debugger() {
        return adb::write_fail(&mut socket, "connection refused").await;
    }

    let result = run_jdwp(socket, client.clone(), device, table, shutdown).await;
    client.detach_debugger();
    result
}

async fn run_jdwp(
    mut socket: TcpStream,
    client: Arc<ClientState>,
    device: Arc<DeviceState>,
    table: Arc<DispatchTable>,
    shutdown: CancellationToken,
) -> JdwpResult<()> {
    adb::write_okay(&mut socket).await?;
    accept_handshake(&mut socket).await?;

    let (mut reader, writer) = socket.into_split();
    let session = JdwpSession::new(device, client, table, PacketWriter::new(writer));

    tokio::select! {
        _ = shutdown.cancelled() => Ok(()),
        end = session.run(&mut reader) => {
            let end = end?;
            debug!("JDWP session for pid={} ended: {:?}", session.client().pid, end);
            session.output().shutdown().await
        }
    }
}

async fn track_jdwp(
    socket: TcpStream,
    device: Arc<DeviceState>,
    shutdown: CancellationToken,
) -> JdwpResult<()> {
    let (mut reader, mut writer) = socket.into_split();
    adb::write_okay(&mut writer).await?;

    let mut pids = device.subscribe_pids();
    let mut input = [0u8; 64];

    loop {
        let message = adb::format_pid_list(&pids.borrow_and_update());
        if let Err(e) = adb::write_message(&mut writer, &message).await {
            debug!("track-jdwp peer went away: {}", e);
            return Ok(());
        }

        // Wait for the next change; anything the peer sends is ignored
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                changed = pids.changed() => {
                    if changed.is_err() {
                        error!("Device {} dropped its pid channel", device.serial());
                        return Ok(());
                    }
                    break;
                }
                read = reader.read(&mut input) => match read {
                    Ok(0) | Err(_) => {
                        debug!("track-jdwp peer closed");
                        return Ok(());
                    }
                    Ok(n) => debug!("Ignoring {} byte(s) sent on track-jdwp", n),
                },
            }
        }
    }
}
