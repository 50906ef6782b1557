// Fake ADB server - simulated Android device for tooling tests
//
// Serves one device whose debuggable processes answer JDWP and DDMS

use anyhow::{Context, Result};
use clap::Parser;
use jdwp_device::{DeviceConfig, DeviceState, DispatchTable, FakeAdbServer};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "fake-adb", version, about)]
struct Cli {
    /// JSON device description (serial, clients, FEAT features)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to listen on, 0 picks a free one
    #[arg(long, default_value_t = 0)]
    port: u16,

    /// Device serial, overrides the one in the config file
    #[arg(long)]
    serial: Option<String>,

    /// Print the effective device config and exit
    #[arg(long)]
    dump_config: bool,
}

fn load_config(cli: &Cli) -> Result<DeviceConfig> {
    let mut config = match &cli.config {
        Some(path) => DeviceConfig::load(path)
            .with_context(|| format!("Failed to load device config {}", path.display()))?,
        None => DeviceConfig::new("emulator-5554"),
    };

    if let Some(serial) = &cli.serial {
        config.serial = serial.clone();
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Tracing to stderr only - stdout carries the listening address
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fake_adb=info".parse()?)
                .add_directive("jdwp_device=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if cli.dump_config {
        println!("{}", config.to_json()?);
        return Ok(());
    }

    info!(
        "Starting fake ADB server for {} with {} client(s)",
        config.serial,
        config.clients.len()
    );

    let table = DispatchTable::with_default_handlers(config.features.clone());
    let device = Arc::new(DeviceState::from_config(config));
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), cli.port);

    let server = FakeAdbServer::spawn_with(addr, device, table)
        .await
        .context("Failed to start fake ADB server")?;

    println!("{}", server.addr());

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Interrupted");
        }
        _ = server.stopped() => {}
    }

    server.shutdown();
    info!("Fake ADB server shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn serial_flag_overrides_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "serial": "from-file", "clients": [] }}"#).unwrap();

        let cli = Cli::parse_from([
            "fake-adb",
            "--config",
            file.path().to_str().unwrap(),
            "--serial",
            "from-flag",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.serial, "from-flag");
    }

    #[test]
    fn defaults_without_config() {
        let cli = Cli::parse_from(["fake-adb"]);
        assert_eq!(cli.port, 0);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.serial, "emulator-5554");
        assert!(config.clients.is_empty());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let cli = Cli::parse_from(["fake-adb", "--config", "/nonexistent/device.json"]);
        assert!(load_config(&cli).is_err());
    }
}
