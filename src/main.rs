use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lsmd_link::{
    BleConfig, BleTransport, Command, ConnectionManager, ConnectionTarget, DeviceMessage,
    LinkConfig, LinkEvent, ReconnectSettings, SerialConfig, SerialTransport, Transport,
};
use lsmd_shared::defaults;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Operator console for LSMD measurement devices
#[derive(Parser, Debug)]
#[command(name = "lsmd-link", version, long_about = None)]
struct Args {
    /// Link backend
    #[arg(short, long, value_enum, default_value_t = Backend::Ble)]
    transport: Backend,

    /// Operation timeout in milliseconds
    #[arg(long, default_value_t = defaults::OPERATION_TIMEOUT_MS)]
    operation_timeout_ms: u64,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Ble,
    Serial,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// List reachable devices (BLE) or ports (serial)
    Scan {
        /// Scan duration in milliseconds
        #[arg(long, default_value_t = defaults::SCAN_TIMEOUT_MS)]
        timeout_ms: u64,
    },
    /// Connect and stream measurements until Ctrl-C
    Connect {
        /// BLE address or serial port
        target: String,

        /// Serial baud rate
        #[arg(short, long, default_value_t = defaults::BAUD_RATE)]
        baud: u32,

        /// Reconnect after an unplanned link loss
        #[arg(long, default_value_t = false)]
        auto_reconnect: bool,

        /// Reconnect attempts
        #[arg(long, default_value_t = defaults::RECONNECT_ATTEMPTS)]
        attempts: u32,

        /// Delay between reconnect attempts in milliseconds
        #[arg(long, default_value_t = defaults::RECONNECT_DELAY_MS)]
        delay_ms: u64,

        /// Send START once connected
        #[arg(long, default_value_t = false)]
        start: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let mut config = LinkConfig {
        operation_timeout: Duration::from_millis(args.operation_timeout_ms),
        ..Default::default()
    };

    match args.mode {
        Mode::Scan { timeout_ms } => {
            let scan_timeout = Duration::from_millis(timeout_ms);
            match args.transport {
                Backend::Ble => scan(BleTransport::new(BleConfig::default()), config, scan_timeout).await,
                Backend::Serial => {
                    scan(SerialTransport::new(SerialConfig::default()), config, scan_timeout).await
                }
            }
        }
        Mode::Connect {
            target,
            baud,
            auto_reconnect,
            attempts,
            delay_ms,
            start,
        } => {
            config.reconnect = ReconnectSettings {
                enabled: auto_reconnect,
                max_attempts: attempts,
                delay: Duration::from_millis(delay_ms),
            };
            match args.transport {
                Backend::Ble => {
                    let target = ConnectionTarget::ble(target);
                    stream(BleTransport::new(BleConfig::default()), config, target, start).await
                }
                Backend::Serial => {
                    let target = ConnectionTarget::serial(target, baud);
                    stream(SerialTransport::new(SerialConfig::default()), config, target, start).await
                }
            }
        }
    }
}

/// Run one scan and print what was found
async fn scan<T: Transport>(transport: T, config: LinkConfig, scan_timeout: Duration) -> Result<()> {
    let (mut manager, mut events) = ConnectionManager::new(transport, config);
    manager.scan(scan_timeout)?;

    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::DeviceFound(device) => {
                println!("{}\t{}", device.address_or_port, device.display_name);
            }
            LinkEvent::ScanComplete(devices) => {
                info!("Scan complete: {} device(s)", devices.len());
                break;
            }
            LinkEvent::Error(message) => warn!("{}", message),
            other => debug!("{:?}", other),
        }
    }
    Ok(())
}

/// Connect, log every frame, and shut down cleanly on Ctrl-C
async fn stream<T: Transport>(
    transport: T,
    config: LinkConfig,
    target: ConnectionTarget,
    start: bool,
) -> Result<()> {
    let (mut manager, mut events) = ConnectionManager::new(transport, config);
    info!("Connecting to {} over {}", target, manager.kind());
    manager.connect(target)?;

    let mut started = false;
    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing link");
                if started {
                    let _ = manager.send_command(Command::Stop).await;
                }
                manager.disconnect().await;
                return Ok(());
            }
            event = events.recv() => match event {
                Some(event) => event,
                None => return Ok(()),
            },
        };

        match event {
            LinkEvent::Connected(true) => {
                info!("Link up");
                if start {
                    started = manager.send_command(Command::Start).await.is_ok();
                }
            }
            LinkEvent::Connected(false) => bail!("could not connect"),
            LinkEvent::DataReceived(frame) => match DeviceMessage::parse(&frame) {
                DeviceMessage::Sample(value) => println!("{}", value),
                DeviceMessage::Ready => info!("Device ready"),
                DeviceMessage::Ack(command) => info!("Device acknowledged {}", command),
                DeviceMessage::Text(text) => info!("Device: {}", text),
            },
            LinkEvent::Reconnecting(attempt) => warn!("Link lost, reconnect attempt {}", attempt),
            LinkEvent::Error(message) => error!("{}", message),
            LinkEvent::Disconnected => {
                info!("Link closed");
                return Ok(());
            }
            LinkEvent::StateChanged { from, to } => debug!("{} -> {}", from, to),
            other => debug!("{:?}", other),
        }
    }
}
