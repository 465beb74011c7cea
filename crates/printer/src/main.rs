//! usb-printer
//!
//! Sends raw print data (text, base64 or binary files) to a USB printer's
//! bulk endpoint, and exposes the same operations to a host application as
//! a JSON-lines service on stdin/stdout.

use anyhow::{Context, Result, anyhow, bail};
use clap::{ArgGroup, Args as ClapArgs, Parser, Subcommand};
use common::{
    EventSender, LogSink, NotificationSink, NullSink, PlatformEvent, create_event_bridge,
    setup_logging,
};
use printer::config::{PrinterConfig, load_config, parse_usb_id};
use printer::usb::{EventLoopHandle, RusbSubsystem};
use printer::{ConnectionState, DeviceConnectionManager, Dispatcher, decode_base64, spawn_event_pump};
use protocol::PrinterCall;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "usb-printer")]
#[command(author, version, about = "Send raw print data to USB printers")]
#[command(long_about = "
Streams raw bytes to a USB printer over its bulk OUT endpoint. Printer
command languages are not interpreted; text is sent as UTF-8.

EXAMPLES:
    # List attached USB devices
    usb-printer list

    # Print a line of text
    usb-printer print --vendor-id 0x04b8 --product-id 0x0202 --text 'Hello'

    # Send a prepared ESC/POS job
    usb-printer print --vendor-id 1208 --product-id 514 --file receipt.bin

    # Serve JSON-lines calls from a host application
    usb-printer serve

CONFIGURATION:
    The configuration is looked up in the following order:
    1. Path specified with --config
    2. ~/.config/usb-printer/printer.toml
    3. /etc/usb-printer/printer.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached USB devices (default)
    List {
        /// Print the host-facing JSON listing
        #[arg(long)]
        json: bool,
    },

    /// Send one payload to a printer
    Print(PrintArgs),

    /// Answer JSON-lines calls on stdin until EOF or Ctrl+C
    Serve,
}

#[derive(ClapArgs, Debug)]
#[command(group(ArgGroup::new("payload").required(true).args(["text", "base64", "file"])))]
struct PrintArgs {
    /// Vendor ID, decimal or 0x hex (defaults to [device] in the config)
    #[arg(long, value_parser = parse_usb_id)]
    vendor_id: Option<u16>,

    /// Product ID, decimal or 0x hex (defaults to [device] in the config)
    #[arg(long, value_parser = parse_usb_id)]
    product_id: Option<u16>,

    /// UTF-8 text to send
    #[arg(long)]
    text: Option<String>,

    /// Base64-encoded binary to send
    #[arg(long)]
    base64: Option<String>,

    /// File whose raw contents are sent
    #[arg(long, value_name = "PATH")]
    file: Option<PathBuf>,
}

/// Threads and handles that live for the whole process
struct Runtime {
    manager: Arc<DeviceConnectionManager>,
    events: EventSender,
    pump: JoinHandle<()>,
    event_loop: Option<EventLoopHandle>,
}

impl Runtime {
    fn start(config: &PrinterConfig) -> Result<Self> {
        let sink: Arc<dyn NotificationSink> = if config.general.notifications {
            Arc::new(LogSink)
        } else {
            Arc::new(NullSink)
        };
        let settings = config.manager_settings();
        let (events, receiver) = create_event_bridge();

        let (manager, event_loop) = match RusbSubsystem::new(events.clone()) {
            Ok(subsystem) => {
                let event_loop = subsystem
                    .spawn_event_loop()
                    .context("Failed to start USB event loop")?;
                let manager = DeviceConnectionManager::new(Arc::new(subsystem), sink, settings)
                    .context("Failed to start printer manager")?;
                (manager, Some(event_loop))
            }
            Err(e) => {
                warn!("USB subsystem unavailable: {}", e);
                let manager = DeviceConnectionManager::without_subsystem(sink, settings)
                    .context("Failed to start printer manager")?;
                (manager, None)
            }
        };

        let manager = Arc::new(manager);
        let pump = spawn_event_pump(Arc::clone(&manager), receiver)
            .context("Failed to start platform event pump")?;

        Ok(Self {
            manager,
            events,
            pump,
            event_loop,
        })
    }

    /// Close the session, let queued transfers finish and stop all threads
    async fn shutdown(self) {
        info!("Shutting down USB subsystem...");

        let manager = Arc::clone(&self.manager);
        if let Err(e) = tokio::task::spawn_blocking(move || manager.shutdown()).await {
            error!("Manager shutdown panicked: {}", e);
        }

        if let Err(e) = self.events.send(PlatformEvent::Shutdown) {
            error!("Error stopping event pump: {}", e);
        }
        if self.pump.join().is_err() {
            error!("Event pump thread panicked");
        }

        if let Some(event_loop) = self.event_loop {
            event_loop.stop();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = PrinterConfig::default();
        let path = PrinterConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        load_config(&path.to_string_lossy()).context("Failed to load configuration")?
    } else {
        PrinterConfig::load_or_default()
    };

    // Use CLI log level if specified, otherwise use config value
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.general.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usb-printer v{}", env!("CARGO_PKG_VERSION"));

    let runtime = Runtime::start(&config)?;
    let dispatcher = Dispatcher::new(Arc::clone(&runtime.manager));

    let result = match args.command.unwrap_or(Command::List { json: false }) {
        Command::List { json } => list_mode(&dispatcher, json),
        Command::Print(print_args) => print_mode(&runtime.manager, &config, print_args).await,
        Command::Serve => serve_mode(dispatcher).await,
    };

    runtime.shutdown().await;
    result
}

/// List USB devices and exit
fn list_mode(dispatcher: &Dispatcher, json: bool) -> Result<()> {
    if json {
        let listings = dispatcher.list_devices();
        println!(
            "{}",
            serde_json::to_string_pretty(&listings).context("Failed to encode device list")?
        );
        return Ok(());
    }

    let devices = dispatcher.manager().list_devices();
    if devices.is_empty() {
        println!("No USB devices found.");
        return Ok(());
    }

    println!("Found {} USB device(s):\n", devices.len());
    for device in devices {
        println!(
            "  {:04x}:{:04x} - {} {}",
            device.vendor_id,
            device.product_id,
            device
                .manufacturer_name
                .as_deref()
                .unwrap_or("Unknown Manufacturer"),
            device.product_name.as_deref().unwrap_or("Unknown Product")
        );
        println!("      {} (device {})", device.device_name, device.device_id);
        println!();
    }

    Ok(())
}

/// Select the device, wait for access, send one payload
async fn print_mode(
    manager: &DeviceConnectionManager,
    config: &PrinterConfig,
    args: PrintArgs,
) -> Result<()> {
    let (vendor_id, product_id) = match (args.vendor_id, args.product_id) {
        (Some(vendor_id), Some(product_id)) => (vendor_id, product_id),
        (None, None) => config.device.target().ok_or_else(|| {
            anyhow!("No device given; pass --vendor-id and --product-id or set [device] in the config")
        })?,
        _ => bail!("--vendor-id and --product-id must be given together"),
    };

    let payload = if let Some(text) = args.text {
        text.into_bytes()
    } else if let Some(data) = args.base64 {
        decode_base64(&data)?
    } else if let Some(path) = args.file {
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?
    } else {
        bail!("No payload given");
    };

    if !manager.select_device(vendor_id, product_id) {
        bail!("Device {:04x}:{:04x} is not available", vendor_id, product_id);
    }

    wait_for_permission(manager, config.transfer.permission_wait()).await?;

    let len = payload.len();
    if !manager.send(payload) {
        bail!(
            "Failed to connect to device {:04x}:{:04x}",
            vendor_id,
            product_id
        );
    }

    info!("Queued {} bytes for {:04x}:{:04x}", len, vendor_id, product_id);
    Ok(())
}

/// Poll until the permission prompt for the selected device resolves
async fn wait_for_permission(manager: &DeviceConnectionManager, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;

    loop {
        match manager.state() {
            ConnectionState::Selected | ConnectionState::Connected => return Ok(()),
            ConnectionState::Idle => bail!("Access to the device was refused"),
            ConnectionState::AwaitingPermission => {}
        }

        if Instant::now() >= deadline {
            bail!(
                "Timed out after {}s waiting for device permission",
                timeout.as_secs()
            );
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Answer JSON-lines calls until stdin closes or Ctrl+C
async fn serve_mode(dispatcher: Dispatcher) -> Result<()> {
    info!("Serving calls on stdin, one JSON object per line");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read from stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down gracefully...");
                break;
            }
        };

        let Some(line) = line else {
            info!("Input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(&dispatcher, &line).await;
        stdout
            .write_all(format!("{}\n", response).as_bytes())
            .await
            .context("Failed to write reply")?;
        stdout.flush().await.context("Failed to flush reply")?;
    }

    Ok(())
}

/// Decode one call, run it off the async runtime and encode the reply
async fn handle_line(dispatcher: &Dispatcher, line: &str) -> serde_json::Value {
    let call: PrinterCall = match serde_json::from_str(line) {
        Ok(call) => call,
        Err(e) => {
            warn!("Rejecting malformed call: {}", e);
            return json!({ "error": format!("invalid call: {}", e) });
        }
    };

    let dispatcher = dispatcher.clone();
    match tokio::task::spawn_blocking(move || dispatcher.dispatch(call)).await {
        Ok(Ok(reply)) => json!({ "ok": reply }),
        Ok(Err(e)) => json!({ "error": e.to_string() }),
        Err(e) => {
            error!("Dispatch task failed: {}", e);
            json!({ "error": "internal error" })
        }
    }
}
