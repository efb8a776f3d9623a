#[macro_use]
extern crate tracing;

use std::path::PathBuf;
use std::time::Duration;

use structopt::StructOpt;
use tokio::runtime::Builder;
use tokio::signal;

use ledmux::compositor::CompositorService;
use ledmux::connection::{ConnectionHandle, ConnectionService};
use ledmux::effects::RgbEffect;
use ledmux::manager::EffectManager;
use ledmux::models::Color;
use ledmux::protocol::DeviceInfo;

/// How long the one-shot subcommands wait for the server before giving up
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, StructOpt)]
struct Opts {
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u32,
    #[structopt(short, long = "config")]
    config_path: Option<PathBuf>,
    #[structopt(long)]
    dump_config: bool,
    #[structopt(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Connect to the OpenRGB server and print the detected devices
    ListDevices,
    /// Register a single effect and hold it for its duration
    Apply {
        /// Effect kind: static, flash, pulse, wave or rainbow
        kind: String,
        /// Effect color
        #[structopt(default_value = "#ff0000", parse(try_from_str = ledmux::color::parse))]
        color: Color,
        /// Effect priority
        #[structopt(short, long, default_value = "5")]
        priority: i32,
        /// Duration in milliseconds, 0 to hold until ctrl-c
        #[structopt(short, long)]
        duration: Option<u64>,
    },
}

fn build_effect(kind: &str, color: Color, priority: i32) -> color_eyre::eyre::Result<RgbEffect> {
    let effect = match kind {
        "static" => RgbEffect::static_color(color),
        "flash" => RgbEffect::flash(color),
        "pulse" => RgbEffect::pulse(color),
        "wave" => RgbEffect::wave(color, 1000),
        "rainbow" => RgbEffect::rainbow(3000),
        other => {
            return Err(color_eyre::eyre::eyre!("unknown effect kind: {}", other));
        }
    };

    Ok(effect.with_priority(priority))
}

async fn wait_connected(connection: &ConnectionHandle) -> color_eyre::eyre::Result<()> {
    let mut state = connection.subscribe();

    let wait = async move {
        while !state.borrow_and_update().connected {
            state.changed().await?;
        }

        Ok(())
    };

    match tokio::time::timeout(CONNECT_TIMEOUT, wait).await {
        Ok(result) => result,
        Err(_) => Err(color_eyre::eyre::eyre!(
            "no connection to the OpenRGB server within {:?}",
            CONNECT_TIMEOUT
        )),
    }
}

fn print_devices(devices: &[DeviceInfo]) {
    if devices.is_empty() {
        println!("no devices detected");
        return;
    }

    for (index, device) in devices.iter().enumerate() {
        println!("[{}] {} ({} LEDs)", index, device.name, device.num_leds);

        for (zone_index, zone) in device.zones.iter().enumerate() {
            println!(
                "    zone {}: {} ({} LEDs)",
                zone_index, zone.name, zone.leds_count
            );
        }
    }
}

async fn run(opts: Opts) -> color_eyre::eyre::Result<()> {
    // Load configuration
    let config = if let Some(config_path) = opts.config_path.as_deref() {
        ledmux::models::Config::load_file(config_path).await?
    } else {
        ledmux::models::Config::default()
    };

    // Dump configuration if this was asked
    if opts.dump_config {
        print!("{}", config.to_string()?);
        return Ok(());
    }

    // Spawn the connection actor
    let (service, connection) = ConnectionService::new(&config);
    tokio::spawn(service.run());

    match opts.command {
        Some(Command::ListDevices) => {
            connection.connect().await?;
            wait_connected(&connection).await?;
            print_devices(&connection.devices());
            connection.disconnect().await?;

            return Ok(());
        }
        Some(Command::Apply {
            kind,
            color,
            priority,
            duration,
        }) => {
            let (compositor_service, compositor) =
                CompositorService::new(config.compositor.clone(), connection.clone());
            tokio::spawn(compositor_service.run());

            let manager = EffectManager::new(&config.compositor, connection.clone(), compositor.clone());

            connection.connect().await?;
            wait_connected(&connection).await?;

            let effect = build_effect(&kind, color, priority)?;
            let hold_ms = duration.unwrap_or(config.compositor.effect_duration_ms);
            manager.apply_effect(effect, duration).await?;

            if hold_ms == 0 {
                info!("holding effect until ctrl-c");
                signal::ctrl_c().await?;
            } else {
                tokio::time::sleep(Duration::from_millis(hold_ms)).await;
            }

            compositor.stop().await?;
            connection.shutdown().await?;

            return Ok(());
        }
        None => {}
    }

    // Daemon mode: keep the idle frame painted and the link alive
    let (compositor_service, compositor) =
        CompositorService::new(config.compositor.clone(), connection.clone());
    tokio::spawn(compositor_service.run());

    if config.server.auto_connect {
        connection.connect().await?;
    }

    info!("ledmuxd running, ctrl-c to exit");

    // Should we continue running?
    let mut abort = false;

    while !abort {
        tokio::select! {
            _ = signal::ctrl_c() => {
                abort = true;
            }
        }
    }

    compositor.stop().await?;
    connection.shutdown().await?;

    Ok(())
}

fn install_tracing(opts: &Opts) -> Result<(), tracing_subscriber::util::TryInitError> {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let fmt_layer = fmt::layer();

    let filter_layer = EnvFilter::try_from_env("LEDMUX_LOG").unwrap_or_else(|_| {
        EnvFilter::new(match opts.verbose {
            0 => "ledmux=warn,ledmuxd=warn",
            1 => "ledmux=info,ledmuxd=info",
            2 => "ledmux=debug,ledmuxd=debug",
            _ => "ledmux=trace,ledmuxd=trace",
        })
    });

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .try_init()
}

#[paw::main]
fn main(opts: Opts) -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    install_tracing(&opts)?;

    // Create tokio runtime
    let thd_count = match num_cpus::get() {
        1 => 2,
        other => other.min(4),
    };

    let rt = Builder::new_multi_thread()
        .worker_threads(thd_count)
        .enable_all()
        .build()?;
    rt.block_on(run(opts))
}
