// Command-line interface: device-side `listen` and host-side `push`.

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueHint};
use log::info;

use crate::config::{DEFAULT_BLOCK_SIZE, DEFAULT_CHUNK_CAPACITY, DEFAULT_PORT, DeviceConfig};
use crate::net::discovery::Dialect;
use crate::net::push::{self, PushClient, TransferKind};
use crate::net::session::Receiver;

// ---------------------------------------------------------------------------
// Byte size parsing (supports K and M suffixes)
// ---------------------------------------------------------------------------

fn parse_byte_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".into());
    }
    let (num_part, multiplier) = match s.as_bytes().last() {
        Some(b'k' | b'K') => (&s[..s.len() - 1], 1024usize),
        Some(b'm' | b'M') => (&s[..s.len() - 1], 1024 * 1024),
        _ => (s, 1usize),
    };
    let num: usize = num_part
        .trim()
        .parse()
        .map_err(|e| format!("invalid size '{s}': {e}"))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size overflow: '{s}'"))
}

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// Network boot receiver/sender for DS-family handhelds.
#[derive(Parser, Debug)]
#[command(
    name = "bootlink",
    version,
    about = "Push and receive boot images over the local network",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Output the session result as JSON to stdout.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Wait for a host and receive one image (device side).
    Listen(ListenArgs),
    /// Send an image to a listening device (host side).
    Push(PushArgs),
}

#[derive(Args, Debug)]
struct ListenArgs {
    /// UDP/TCP port to listen on.
    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory received images are stored under.
    #[arg(long, value_hint = ValueHint::DirPath, default_value = ".")]
    prefix: PathBuf,

    /// Frame working-buffer capacity (supports K/M suffix).
    #[arg(long = "chunk-size", value_parser = parse_byte_size, default_value_t = DEFAULT_CHUNK_CAPACITY)]
    chunk_size: usize,

    /// Source block size for delta mode (supports K/M suffix).
    #[arg(long = "block-size", value_parser = parse_byte_size, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: usize,
}

#[derive(Args, Debug)]
struct PushArgs {
    /// Image file to send.
    #[arg(value_hint = ValueHint::FilePath)]
    image: PathBuf,

    /// Device address; discovered by broadcast when omitted.
    #[arg(long, short = 'a')]
    address: Option<IpAddr>,

    /// Device port.
    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Destination name on the device (default: the image file name).
    #[arg(long, short = 'n')]
    name: Option<String>,

    /// Previous version of the image; enables a delta push.
    #[arg(long, short = 's', value_hint = ValueHint::FilePath)]
    source: Option<PathBuf>,

    /// Trailing argument string passed to the device's loader.
    #[arg(long, default_value = "")]
    argument: String,

    /// Frame payload size (supports K/M suffix).
    #[arg(long = "chunk-size", value_parser = parse_byte_size, default_value_t = DEFAULT_CHUNK_CAPACITY)]
    chunk_size: usize,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_listen(args: &ListenArgs, json_output: bool) -> i32 {
    let config = DeviceConfig {
        port: args.port,
        mount_prefix: args.prefix.clone(),
        chunk_capacity: args.chunk_size,
        block_size: args.block_size,
        ..DeviceConfig::default()
    };

    let mut receiver = match Receiver::bind(&config) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("bootlink: cannot bind port {}: {e}", config.port);
            return 1;
        }
    };
    info!("listening on port {}", config.port);

    let result = receiver.run_with_progress(&config, |done, total| {
        if !json_output && total > 0 {
            eprint!("\rreceiving: {:>3}%", done * 100 / total);
        }
    });
    if !json_output {
        eprintln!();
    }

    match result {
        Ok(received) => {
            if json_output {
                let json = serde_json::json!({
                    "path": received.path,
                    "argument": received.argument,
                    "status": received.status,
                });
                println!("{}", serde_json::to_string_pretty(&json).unwrap());
            } else {
                println!("{}", received.path.display());
                if !received.argument.is_empty() {
                    println!("{}", received.argument);
                }
            }
            0
        }
        Err(e) => {
            eprintln!("bootlink: receive failed: {e}");
            1
        }
    }
}

fn cmd_push(args: &PushArgs, json_output: bool) -> i32 {
    let target = match fs::read(&args.image) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("bootlink: cannot read {}: {e}", args.image.display());
            return 1;
        }
    };

    let source = match &args.source {
        Some(path) => match fs::read(path) {
            Ok(data) => Some(data),
            Err(e) => {
                eprintln!("bootlink: cannot read {}: {e}", path.display());
                return 1;
            }
        },
        None => None,
    };

    let name = match &args.name {
        Some(name) => name.clone(),
        None => match args.image.file_name() {
            Some(n) => n.to_string_lossy().into_owned(),
            None => {
                eprintln!("bootlink: {} has no file name", args.image.display());
                return 1;
            }
        },
    };

    let dialect = if source.is_some() {
        Dialect::Delta
    } else {
        Dialect::Legacy
    };

    // The mode byte is only understood after the device has seen our
    // dialect's probe, so probe even when the address is known.
    let device: SocketAddr = match args.address {
        Some(ip) => {
            let device = SocketAddr::new(ip, args.port);
            if let Err(e) = std::net::UdpSocket::bind(("0.0.0.0", 0))
                .and_then(|s| push::send_probe(&s, device, dialect))
            {
                eprintln!("bootlink: discovery probe failed: {e}");
                return 1;
            }
            // Give the device one poll cycle to record the dialect.
            std::thread::sleep(Duration::from_millis(50));
            device
        }
        None => match push::discover(args.port, dialect, Duration::from_secs(3)) {
            Ok(Some(addr)) => SocketAddr::new(addr.ip(), args.port),
            Ok(None) => {
                eprintln!("bootlink: no device answered discovery");
                return 1;
            }
            Err(e) => {
                eprintln!("bootlink: discovery failed: {e}");
                return 1;
            }
        },
    };

    let mut client = match PushClient::connect(device, dialect, args.chunk_size) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("bootlink: cannot connect to {device}: {e}");
            return 1;
        }
    };

    let result = match &source {
        Some(source) => client.push_delta(&name, source, &target, &args.argument),
        None => client.push_full(&name, &target, &args.argument),
    };

    match result {
        Ok(report) => {
            if json_output {
                let json = serde_json::json!({
                    "device": device.to_string(),
                    "name": name,
                    "kind": match report.kind {
                        TransferKind::Full => "full",
                        TransferKind::Delta => "delta",
                        TransferKind::DeltaFallback => "delta-fallback",
                    },
                    "target_bytes": target.len(),
                    "bytes_sent": report.bytes_sent,
                    "status": report.final_status,
                });
                println!("{}", serde_json::to_string_pretty(&json).unwrap());
            } else {
                println!(
                    "sent {} as {:?}: {} bytes on the wire for {} bytes of image",
                    name,
                    report.kind,
                    report.bytes_sent,
                    target.len()
                );
            }
            0
        }
        Err(e) => {
            eprintln!("bootlink: push failed: {e}");
            1
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Main CLI entry point. Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let cli = Cli::parse();
    let exit_code = match &cli.command {
        Cmd::Listen(args) => cmd_listen(args, cli.json_output),
        Cmd::Push(args) => cmd_push(args, cli.json_output),
    };

    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
