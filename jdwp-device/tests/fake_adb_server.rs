use jdwp_device::adb::{length_prefixed, read_message, read_status};
use jdwp_device::ddms::{chunk_command, decode_chunk, DDMS_EVENT_ID};
use jdwp_device::protocol::{read_packet, write_packet, JDWP_HANDSHAKE};
use jdwp_device::reader::read_i32;
use jdwp_device::{
    ChunkType, ClientConfig, DeviceConfig, DeviceState, FakeAdbServer, FeatureConfig, JdwpPacket,
};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn spawn_server() -> FakeAdbServer {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut config = DeviceConfig::new("emulator-5554");
    config.features = FeatureConfig {
        default_features: vec!["push_sync".to_string()],
        features_by_pid: Default::default(),
    };
    config
        .clients
        .push(ClientConfig::new(10, "com.example.app").waiting(true));

    FakeAdbServer::spawn(Arc::new(DeviceState::from_config(config)))
        .await
        .unwrap()
}

async fn request(socket: &mut TcpStream, service: &str) -> jdwp_device::JdwpResult<()> {
    socket
        .write_all(&length_prefixed(service).unwrap())
        .await
        .unwrap();
    read_status(socket).await
}

async fn open_service(server: &FakeAdbServer, service: &str) -> jdwp_device::JdwpResult<TcpStream> {
    let mut socket = TcpStream::connect(server.addr()).await.unwrap();
    request(&mut socket, "host:transport:emulator-5554").await?;
    request(&mut socket, service).await?;
    Ok(socket)
}

async fn attach(server: &FakeAdbServer, pid: i32) -> TcpStream {
    let mut socket = open_service(server, &format!("jdwp:{}", pid)).await.unwrap();
    socket.write_all(JDWP_HANDSHAKE).await.unwrap();
    let mut echo = vec![0u8; JDWP_HANDSHAKE.len()];
    socket.read_exact(&mut echo).await.unwrap();
    assert_eq!(echo, JDWP_HANDSHAKE);
    socket
}

#[tokio::test]
async fn feat_over_jdwp_connection() {
    let server = spawn_server().await;
    let mut socket = attach(&server, 10).await;

    write_packet(&mut socket, &chunk_command(1, ChunkType::FEAT, &[]))
        .await
        .unwrap();

    let feat = read_packet(&mut socket).await.unwrap().unwrap();
    assert_eq!(feat.id, 1);
    let chunk = decode_chunk(&feat).unwrap();
    assert_eq!(chunk.chunk_type, ChunkType::FEAT);
    assert_eq!(read_i32(&mut chunk.data.as_slice()).unwrap(), 1);

    let wait = read_packet(&mut socket).await.unwrap().unwrap();
    assert_eq!(wait.id, DDMS_EVENT_ID);
    assert_eq!(decode_chunk(&wait).unwrap().chunk_type, ChunkType::WAIT);

    // Resume clears the waiting state, a second FEAT is not followed by WAIT
    write_packet(&mut socket, &JdwpPacket::command(2, 1, 9, Vec::new()))
        .await
        .unwrap();
    assert_eq!(
        read_packet(&mut socket).await.unwrap().unwrap(),
        JdwpPacket::reply(2, Vec::new())
    );

    write_packet(&mut socket, &chunk_command(3, ChunkType::FEAT, &[]))
        .await
        .unwrap();
    write_packet(&mut socket, &JdwpPacket::command(4, 1, 7, Vec::new()))
        .await
        .unwrap();
    assert_eq!(read_packet(&mut socket).await.unwrap().unwrap().id, 3);
    assert_eq!(read_packet(&mut socket).await.unwrap().unwrap().id, 4);
}

#[tokio::test]
async fn unknown_command_keeps_connection_open() {
    let server = spawn_server().await;
    let mut socket = attach(&server, 10).await;

    write_packet(&mut socket, &JdwpPacket::command(1, 200, 1, Vec::new()))
        .await
        .unwrap();
    write_packet(&mut socket, &JdwpPacket::command(2, 1, 1, Vec::new()))
        .await
        .unwrap();

    let reply = read_packet(&mut socket).await.unwrap().unwrap();
    assert_eq!(reply.id, 2);
    assert!(reply.is_reply());
}

#[tokio::test]
async fn vm_exit_closes_connection_and_updates_track_jdwp() {
    let server = spawn_server().await;

    let mut tracker = open_service(&server, "track-jdwp").await.unwrap();
    assert_eq!(read_message(&mut tracker).await.unwrap(), "10\n");

    server
        .device()
        .start_client(ClientConfig::new(20, "com.example.other"))
        .await;
    assert_eq!(read_message(&mut tracker).await.unwrap(), "10\n20\n");

    let mut socket = attach(&server, 10).await;
    write_packet(&mut socket, &JdwpPacket::command(1, 1, 10, vec![0, 0, 0, 0]))
        .await
        .unwrap();

    assert!(read_packet(&mut socket).await.unwrap().is_none());
    assert_eq!(read_message(&mut tracker).await.unwrap(), "20\n");
    assert!(server.device().client(10).await.is_none());
}

#[tokio::test]
async fn track_jdwp_ignores_input_from_peer() {
    let server = spawn_server().await;

    let mut tracker = open_service(&server, "track-jdwp").await.unwrap();
    assert_eq!(read_message(&mut tracker).await.unwrap(), "10\n");

    tracker.write_all(b"stray").await.unwrap();
    server
        .device()
        .start_client(ClientConfig::new(30, "com.example.third"))
        .await;
    assert_eq!(read_message(&mut tracker).await.unwrap(), "10\n30\n");
}

#[tokio::test]
async fn replaced_process_survives_exit_of_old_connection() {
    let server = spawn_server().await;
    let mut socket = attach(&server, 10).await;

    server
        .device()
        .start_client(ClientConfig::new(10, "com.example.restarted"))
        .await;

    write_packet(&mut socket, &JdwpPacket::command(1, 1, 10, Vec::new()))
        .await
        .unwrap();
    assert!(read_packet(&mut socket).await.unwrap().is_none());

    let client = server.device().client(10).await.unwrap();
    assert_eq!(client.process_name, "com.example.restarted");
}

#[tokio::test]
async fn second_debugger_is_refused() {
    let server = spawn_server().await;
    let _first = attach(&server, 10).await;

    let err = open_service(&server, "jdwp:10").await.unwrap_err();
    assert!(err.to_string().contains("connection refused"));
}

#[tokio::test]
async fn unknown_pid_and_serial_fail() {
    let server = spawn_server().await;

    let err = open_service(&server, "jdwp:999").await.unwrap_err();
    assert!(err.to_string().contains("999"));

    let mut socket = TcpStream::connect(server.addr()).await.unwrap();
    let err = request(&mut socket, "host:transport:other").await.unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn offline_device_is_not_selectable() {
    let server = spawn_server().await;
    server.device().set_online(false).await;

    let mut socket = TcpStream::connect(server.addr()).await.unwrap();
    assert!(request(&mut socket, "host:transport-any").await.is_err());
}
