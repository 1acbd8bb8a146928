use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use lambda_link::config::{Config, ConfigError, ConfigLoader};
use lambda_link::devices::{
    shutter, FilterWheel, LambdaHub, LambdaVf5, PropertyValue, Shutter, ShutterId, SubDevice,
    WheelId,
};
use lambda_link::logging::{self, LogOptions, LoggingError};
use lambda_link::port::{available_port_names, PortError, PortId, SerialPortTransport};
use lambda_link::protocol::{CommandEngine, Exchange, HexBytes};
use lambda_link::{ConnectError, DeviceError};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    name = "lambda-link",
    version,
    about = "Diagnostic tool for Sutter Lambda filter wheel, shutter and VF-5 controllers.",
    long_about = "Talks to a Lambda 10-2, 10-3 or SmartShutter controller over a serial port using the echo/terminator command protocol. Useful for checking wiring, identifying a controller and exercising individual devices."
)]
struct Cli {
    /// Serial port of the controller, or an alias from the config file
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Configuration file (default: resolved from LAMBDA_LINK_CONFIG and standard locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Per-phase answer timeout in milliseconds (at least 1)
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    timeout_ms: Option<u64>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List serial ports present on this system
    Ports,
    /// Switch the controller to on-line (serial) mode
    Online,
    /// Bring the controller online and report its type and id
    Identify,
    /// Read the controller status block
    Status,
    /// Send raw command bytes and verify the echo
    Send {
        /// Command bytes in hex, e.g. "AA" or "FC 35" or "0xDA,0x01"
        #[arg(required = true)]
        bytes: Vec<String>,
        /// Alternate echo bytes in hex
        #[arg(long)]
        alt: Option<String>,
        /// The controller sends no terminator for this command
        #[arg(long)]
        no_terminator: bool,
    },
    /// Read a device property
    Get { device: DeviceArg, property: String },
    /// Write a device property
    Set {
        device: DeviceArg,
        property: String,
        value: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DeviceArg {
    Hub,
    WheelA,
    WheelB,
    WheelC,
    ShutterA,
    ShutterB,
    Vf5,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error("{0}")]
    Usage(String),
}

impl CliError {
    fn user_message(&self) -> String {
        match self {
            Self::Device(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!("command failed: {e}");
            if cli.json {
                println!("{}", json!({ "status": "error", "message": e.user_message() }));
            } else {
                eprintln!("error: {}", e.user_message());
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), CliError> {
    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from(path)?.into_config(),
        None => ConfigLoader::load()?.into_config(),
    };
    logging::init(&LogOptions::from(&config.logging).with_verbosity(cli.verbose))?;

    if let Commands::Ports = cli.command {
        let ports = available_port_names()?;
        if cli.json {
            println!("{}", json!({ "status": "ok", "ports": ports }));
        } else if ports.is_empty() {
            println!("no serial ports found");
        } else {
            for port in ports {
                println!("{port}");
            }
        }
        return Ok(());
    }

    let hub = connect(cli, &config)?;

    match &cli.command {
        Commands::Ports => Ok(()),
        Commands::Online => {
            hub.go_online()?;
            report(cli, json!({ "status": "ok", "port": hub.port().as_str() }), || {
                format!("controller on {} is online", hub.port())
            });
            Ok(())
        }
        Commands::Identify => {
            let info = hub.initialize()?;
            report(cli, json!({ "status": "ok", "controller": info }), || {
                format!("{} controller, id \"{}\"", info.controller_type, info.id)
            });
            Ok(())
        }
        Commands::Status => {
            hub.go_online()?;
            let controller = hub.controller_type();
            let block = hub.status()?;
            let a = shutter::decode_status(controller, ShutterId::A, &block);
            let b = shutter::decode_status(controller, ShutterId::B, &block);
            report(
                cli,
                json!({
                    "status": "ok",
                    "controller": controller,
                    "raw": block,
                    "shutter_a": a,
                    "shutter_b": b,
                }),
                || {
                    format!(
                        "{controller} status: {}\nshutter A: {a:?}\nshutter B: {b:?}",
                        HexBytes(&block)
                    )
                },
            );
            Ok(())
        }
        Commands::Send {
            bytes,
            alt,
            no_terminator,
        } => {
            let command = parse_hex(&bytes.join(" "))?;
            let mut exchange = Exchange::new(command);
            if let Some(alt) = alt {
                exchange = exchange.alternate_echo(parse_hex(alt)?);
            }
            if *no_terminator {
                exchange = exchange.no_terminator();
            }
            let done = hub
                .engine()
                .send(hub.port(), &exchange)
                .map_err(DeviceError::from)?;
            report(
                cli,
                json!({
                    "status": "ok",
                    "response": done.response,
                    "alternate_echo": done.alternate_echo,
                    "elapsed_ms": done.elapsed.as_secs_f64() * 1000.0,
                }),
                || {
                    format!(
                        "completed in {:.1} ms{}; response: [{}]",
                        done.elapsed.as_secs_f64() * 1000.0,
                        if done.alternate_echo { " (alternate echo)" } else { "" },
                        HexBytes(&done.response)
                    )
                },
            );
            Ok(())
        }
        Commands::Get { device, property } => {
            hub.initialize()?;
            let device = build_device(*device, &hub, &config)?;
            let value = device.get_property(property)?;
            report(
                cli,
                json!({ "status": "ok", "device": device.name(), "property": property, "value": value }),
                || format!("{}.{property} = {value}", device.name()),
            );
            Ok(())
        }
        Commands::Set {
            device,
            property,
            value,
        } => {
            hub.initialize()?;
            let device = build_device(*device, &hub, &config)?;
            let value = PropertyValue::parse(value);
            device.set_property(property, value.clone())?;
            report(
                cli,
                json!({ "status": "ok", "device": device.name(), "property": property, "value": value }),
                || format!("{}.{property} set to {value}", device.name()),
            );
            Ok(())
        }
    }
}

/// Open the configured port and wrap it in a hub.
fn connect(cli: &Cli, config: &Config) -> Result<Arc<LambdaHub>, CliError> {
    let name = cli
        .port
        .clone()
        .or_else(|| config.hub.port.clone())
        .ok_or_else(|| CliError::Usage("no port given; use --port or set hub.port in the config".to_string()))?;
    let port = PortId::new(config.serial.resolve_port(&name));

    let transport = SerialPortTransport::new();
    transport
        .open(&port, &config.serial.port_configuration())
        .map_err(|source| {
            DeviceError::from(ConnectError::Open {
                port: port.clone(),
                source,
            })
        })?;

    let engine = CommandEngine::new(Arc::new(transport)).with_options(config.protocol.engine_options());
    let mut options = config.hub_options();
    if let Some(ms) = cli.timeout_ms {
        options.answer_timeout = Duration::from_millis(ms);
    }
    Ok(Arc::new(LambdaHub::with_options(port, engine, options)))
}

fn build_device(
    device: DeviceArg,
    hub: &Arc<LambdaHub>,
    config: &Config,
) -> Result<Box<dyn SubDevice>, CliError> {
    let wheel = |id: WheelId, settings: &lambda_link::config::WheelConfig| -> Result<Box<dyn SubDevice>, CliError> {
        let wheel = FilterWheel::new(Arc::clone(hub), id);
        wheel.set_speed(i64::from(settings.speed))?;
        wheel.set_closed_position(i64::from(settings.closed_position))?;
        Ok(Box::new(wheel))
    };

    match device {
        DeviceArg::Hub => Ok(Box::new(HubDevice(Arc::clone(hub)))),
        DeviceArg::WheelA => wheel(WheelId::A, &config.wheels.a),
        DeviceArg::WheelB => wheel(WheelId::B, &config.wheels.b),
        DeviceArg::WheelC => wheel(WheelId::C, &config.wheels.c),
        DeviceArg::ShutterA | DeviceArg::ShutterB => {
            let id = if matches!(device, DeviceArg::ShutterA) {
                ShutterId::A
            } else {
                ShutterId::B
            };
            let shutter = Shutter::new(Arc::clone(hub), id);
            shutter.sync_from_status()?;
            Ok(Box::new(shutter))
        }
        DeviceArg::Vf5 => Ok(Box::new(LambdaVf5::new(Arc::clone(hub)))),
    }
}

/// Shares the hub as a property device.
struct HubDevice(Arc<LambdaHub>);

impl SubDevice for HubDevice {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn property_names(&self) -> Vec<&'static str> {
        self.0.property_names()
    }

    fn get_property(&self, name: &str) -> lambda_link::DeviceResult<PropertyValue> {
        self.0.get_property(name)
    }

    fn set_property(&self, name: &str, value: PropertyValue) -> lambda_link::DeviceResult<()> {
        self.0.set_property(name, value)
    }

    fn busy(&self) -> bool {
        SubDevice::busy(&*self.0)
    }
}

fn report(cli: &Cli, value: serde_json::Value, text: impl FnOnce() -> String) {
    if cli.json {
        println!("{value}");
    } else {
        println!("{}", text());
    }
}

/// Parse hex bytes separated by spaces or commas, with optional `0x` prefixes.
/// Unseparated runs such as "FC35" are split into pairs.
fn parse_hex(input: &str) -> Result<Vec<u8>, CliError> {
    let mut bytes = Vec::new();
    for token in input.split(|c: char| c.is_whitespace() || c == ',').filter(|t| !t.is_empty()) {
        let digits = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CliError::Usage(format!("\"{token}\" is not a hex byte")));
        }
        if digits.len() <= 2 {
            bytes.push(hex_byte(digits)?);
        } else if digits.len() % 2 == 0 {
            for pair in digits.as_bytes().chunks(2) {
                let pair = std::str::from_utf8(pair)
                    .map_err(|_| CliError::Usage(format!("\"{token}\" is not a hex byte")))?;
                bytes.push(hex_byte(pair)?);
            }
        } else {
            return Err(CliError::Usage(format!("\"{token}\" has an odd number of hex digits")));
        }
    }
    if bytes.is_empty() {
        return Err(CliError::Usage("no command bytes given".to_string()));
    }
    Ok(bytes)
}

fn hex_byte(digits: &str) -> Result<u8, CliError> {
    u8::from_str_radix(digits, 16).map_err(|_| CliError::Usage(format!("\"{digits}\" is not a hex byte")))
}
