// Simulated Android device for host tooling tests
//
// Speaks enough of ADB, JDWP and DDMS for tools to discover debuggable
// processes and talk to them:
// - JDWP packet framing and handshake
// - DDMS chunks (FEAT, HELO, WAIT, EXIT)
// - Per-device registry of processes shared by all connections
// - ADB jdwp:<pid> and track-jdwp services over TCP

pub mod adb;
pub mod chunks;
pub mod commands;
pub mod config;
pub mod connection;
pub mod ddms;
pub mod dispatch;
pub mod protocol;
pub mod reader;
pub mod server;
pub mod session;
pub mod state;
pub mod vm;

pub use commands::JdwpCommandId;
pub use config::{ClientConfig, DeviceConfig, FeatureConfig};
pub use connection::PacketWriter;
pub use ddms::{ChunkType, DdmsChunk};
pub use dispatch::{DispatchTable, HandlerOutcome};
pub use protocol::{JdwpError, JdwpPacket, JdwpResult};
pub use server::FakeAdbServer;
pub use session::{JdwpSession, SessionEnd};
pub use state::{ClientState, DeviceState};
