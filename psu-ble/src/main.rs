//! Command line tool for PSU power supplies
//!
//! Reads telemetry, changes settings and provisions Wi-Fi over BLE.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use psu_ble_controller::ble::{self, PsuDevice};
use psu_ble_controller::{
    BleTransport, ControllerConfig, Engine, Error, ProvisionOutcome, Provisioner, Psu,
};
use psu_proto::{Command, Field};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "psu-ble")]
#[command(about = "BLE tool for PSU power supplies")]
struct Cli {
    /// Device name or address to connect to
    #[arg(short, long, global = true)]
    device: Option<String>,
    /// Config file (default: $PSU_HOME/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Seconds to scan before picking a device
    #[arg(long, global = true, default_value = "5")]
    scan_secs: u64,
    /// Request timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for PSU devices
    Scan {
        /// Scan duration in seconds
        #[arg(short = 't', long, default_value = "5")]
        duration: u64,
        /// List every device, not only PSUs
        #[arg(short, long)]
        all: bool,
    },
    /// Read live measurements
    Telemetry,
    /// Read all settings
    Config,
    /// Read one field
    Get {
        /// Field name, e.g. voltage, voltage-setpoint, buzzer
        field: Field,
    },
    /// Change one setting
    Set {
        field: Field,
        value: String,
    },
    /// Send a command: output-on, output-off, reset-energy, reboot
    Command { command: Command },
    /// List Wi-Fi networks the device can see
    WifiScan {
        /// Proof of possession printed on the device
        #[arg(long)]
        pop: Option<String>,
    },
    /// Send Wi-Fi credentials to a device
    Provision {
        /// Proof of possession printed on the device
        #[arg(long)]
        pop: Option<String>,
        /// WiFi credentials file (SSID on line 1, password on line 2)
        #[arg(short, long, default_value = "wifi_credentials.txt")]
        file: PathBuf,
        /// SSID, instead of the credentials file
        #[arg(long, requires = "password")]
        ssid: Option<String>,
        #[arg(long)]
        password: Option<String>,
        /// Do not send ApplyConfig after the credentials
        #[arg(long)]
        no_apply: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("  {}", e.guidance());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, Error> {
    let mut config = ControllerConfig::load_or_default(cli.config.as_deref())?;
    if let Some(ms) = cli.timeout_ms {
        config.engine.request_timeout_ms = ms;
    }
    config.validate()?;

    let adapter = ble::get_adapter().await?;
    let prefix = config.gatt.device_name_prefix.clone();

    if let Commands::Scan { duration, all } = cli.command {
        println!("Scanning for PSU devices ({duration} seconds)...");
        let devices = ble::scan(&adapter, Duration::from_secs(duration), &prefix).await?;
        print_devices(&devices, all);
        return Ok(ExitCode::SUCCESS);
    }

    println!("Scanning for PSU devices...");
    let scan_window = Duration::from_secs(cli.scan_secs);
    let peripheral =
        ble::find_device(&adapter, cli.device.as_deref(), &prefix, scan_window).await?;
    let transport = Arc::new(BleTransport::new(adapter, peripheral));

    match cli.command {
        Commands::Scan { .. } => Ok(ExitCode::SUCCESS),
        Commands::WifiScan { pop } => {
            if pop.is_some() {
                config.provisioning.pop = pop;
            }
            let provisioner = Provisioner::new(transport, config.provisioning, config.gatt);
            let networks = provisioner.scan_networks().await?;
            println!("\nFound {} networks:", networks.len());
            for ap in networks {
                println!(
                    "  {:<32} {:>4} dBm  ch {:<3} {}",
                    ap.ssid, ap.rssi, ap.channel, ap.auth_mode
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Provision { pop, file, ssid, password, no_apply } => {
            if pop.is_some() {
                config.provisioning.pop = pop;
            }
            if no_apply {
                config.provisioning.apply_config = false;
            }
            let (ssid, password) = match (ssid, password) {
                (Some(ssid), Some(password)) => (ssid, password),
                _ => read_wifi_credentials(&file)?,
            };

            println!("Sending WiFi credentials...");
            println!("  SSID: {ssid}");
            let provisioner = Provisioner::new(transport, config.provisioning, config.gatt);
            match provisioner.provision(&ssid, &password).await {
                ProvisionOutcome::Unsupported => {
                    println!("This device does not support Wi-Fi provisioning.");
                    Ok(ExitCode::SUCCESS)
                }
                ProvisionOutcome::Finished(result) if result.success => {
                    println!("Done: {}", result.message);
                    Ok(ExitCode::SUCCESS)
                }
                ProvisionOutcome::Finished(result) => {
                    eprintln!("Provisioning failed: {}", result.message);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        command => {
            let engine = Engine::new(transport, config.engine.clone(), &config.gatt)?;
            let psu = Psu::new(engine, config.layout()?);
            psu.connect().await?;
            let result = run_psu(&psu, command).await;
            psu.disconnect().await?;
            result.map(|()| ExitCode::SUCCESS)
        }
    }
}

async fn run_psu(psu: &Psu<BleTransport>, command: Commands) -> Result<(), Error> {
    match command {
        Commands::Telemetry => {
            let t = psu.read_telemetry().await?;
            println!("Voltage:       {:.3} V", t.voltage);
            println!("Current:       {:.3} A", t.current);
            println!("Power:         {:.2} W", t.power);
            println!("Inlet temp:    {:.1} °C", t.inlet_temp);
            println!("Internal temp: {:.1} °C", t.internal_temp);
            println!("Energy:        {:.3} Wh", t.energy);
        }
        Commands::Config => {
            let config = psu.read_config().await?;
            for setting in psu_proto::FloatSetting::ALL {
                println!("{:<20} {}", setting.name(), config.float(setting));
            }
            for (setting, value) in &config.settings {
                println!("{:<20} {}", setting.name(), value);
            }
        }
        Commands::Get { field } => {
            let value = match field {
                Field::Measurement(m) => psu.read_measurement(m).await?.to_string(),
                Field::Float(s) => psu.read_float(s).await?.to_string(),
                Field::Byte(s) => psu.read_byte(s).await?.to_string(),
            };
            println!("{field} = {value}");
        }
        Commands::Set { field, value } => {
            match parse_setting(field, &value)? {
                Setting::Float(s, v) => psu.write_float(s, v).await?,
                Setting::Byte(s, v) => psu.write_byte(s, v).await?,
            }
            info!(%field, %value, "setting written");
            println!("{field} set to {value}");
        }
        Commands::Command { command } => {
            psu.command(command).await?;
            println!("{} sent", command.name());
        }
        Commands::Scan { .. } | Commands::WifiScan { .. } | Commands::Provision { .. } => {}
    }
    Ok(())
}

fn print_devices(devices: &[PsuDevice], all: bool) {
    let shown: Vec<&PsuDevice> = devices.iter().filter(|d| all || d.is_psu).collect();
    println!("\nFound {} devices:", shown.len());
    for device in shown {
        let rssi = device
            .rssi
            .map(|r| format!("{r} dBm"))
            .unwrap_or_else(|| "N/A".to_string());
        let marker = if device.is_psu { " [PSU]" } else { "" };
        println!("  {} ({}) RSSI: {}{}", device.name, device.address, rssi, marker);
    }
}

#[derive(Debug, PartialEq)]
enum Setting {
    Float(psu_proto::FloatSetting, f32),
    Byte(psu_proto::ByteSetting, u8),
}

fn parse_setting(field: Field, value: &str) -> Result<Setting, Error> {
    match field {
        Field::Measurement(_) => Err(Error::Config(format!("{field} is read-only"))),
        Field::Float(s) => value
            .parse()
            .map(|v| Setting::Float(s, v))
            .map_err(|_| Error::Config(format!("{field} needs a number, got {value:?}"))),
        Field::Byte(s) => value
            .parse()
            .map(|v| Setting::Byte(s, v))
            .map_err(|_| Error::Config(format!("{field} needs a value 0-255, got {value:?}"))),
    }
}

fn read_wifi_credentials(file: &std::path::Path) -> Result<(String, String), Error> {
    parse_credentials(&std::fs::read_to_string(file)?)
}

fn parse_credentials(content: &str) -> Result<(String, String), Error> {
    let mut lines = content.lines();
    let ssid = lines
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Config("missing SSID in credentials file".to_string()))?;
    // Open networks may leave the password line out
    let password = lines.next().map(str::trim).unwrap_or_default();
    Ok((ssid.to_string(), password.to_string()))
}
