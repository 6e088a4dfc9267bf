// SoilLink node for Linux: one telemetry wake cycle (`send`) or the hub responder (`hub`).

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use soil_core::{device_id_for, LinkTransport, MacAddress, SensorReading, BATTERY_UNAVAILABLE};
use soil_node::air::{AirRole, AirTransport};
use soil_node::config::{self, NodeConfig};
use soil_node::hub::{publications, Hub};
use soil_node::sim::{SimHub, SimLink};
use soil_node::state::LinkState;
use soil_node::{SendOutcome, Sender};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "soil-node", version, about = "SoilLink sensor node and hub")]
struct Cli {
    /// Config file (default: ~/.config/soil-node/config.toml, then /etc/soil-node/config.toml).
    #[arg(long, global = true, env = "SOIL_NODE_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Deliver one reading to the hub and exit.
    Send(SendArgs),
    /// Ack readings and print them as JSON lines until interrupted.
    Hub(HubArgs),
}

#[derive(Args)]
struct SendArgs {
    #[arg(long, default_value_t = 0.0)]
    soil_voltage: f32,
    #[arg(long, default_value_t = 0.0)]
    moisture: f32,
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    raw: i32,
    #[arg(long, default_value_t = 0.0)]
    battery_voltage: f32,
    /// -1 when the node has no battery gauge.
    #[arg(long, default_value_t = BATTERY_UNAVAILABLE, allow_negative_numbers = true)]
    battery_pct: f32,
    /// Talk to scripted hubs (MAC@CHANNEL, repeatable) instead of the air.
    #[arg(long = "sim-hub")]
    sim_hubs: Vec<SimHub>,
}

#[derive(Args)]
struct HubArgs {
    /// Hub address (default: `hub` from config, else random).
    #[arg(long)]
    mac: Option<MacAddress>,
    /// Listening channel (default: `channel` from config).
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=13))]
    channel: Option<u8>,
}

impl HubArgs {
    fn channel_or(&self, cfg: &NodeConfig) -> u8 {
        self.channel.unwrap_or(cfg.channel)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load(cli.config.as_deref()).context("loading config")?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match cli.command {
            Command::Send(args) => run_send(cfg, args).await,
            Command::Hub(args) => run_hub(cfg, args).await,
        }
    })
}

async fn run_send(cfg: NodeConfig, args: SendArgs) -> anyhow::Result<()> {
    let mut state = LinkState::load(&cfg.state_path).context("loading link state")?;
    let mut dirty = false;
    let node_mac = match cfg.node_mac.or(state.node_mac) {
        Some(mac) => mac,
        None => {
            let mac = random_local_mac();
            info!(%mac, "generated node address");
            state.node_mac = Some(mac);
            dirty = true;
            mac
        }
    };
    let sender_cfg = cfg.sender_config(&state);
    let discovery = sender_cfg.is_discovery();
    let reading = SensorReading {
        device_id: device_id_for(&node_mac),
        timestamp_ms: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default(),
        soil_voltage: args.soil_voltage,
        soil_moisture_pct: args.moisture,
        soil_raw: args.raw,
        battery_voltage: args.battery_voltage,
        battery_pct: args.battery_pct,
    };

    let outcome: anyhow::Result<SendOutcome> = if args.sim_hubs.is_empty() {
        match AirTransport::bind(node_mac, cfg.air_port, AirRole::Node).await {
            Ok(link) => deliver(link, &cfg, sender_cfg, &reading).await,
            Err(e) => Err(anyhow::Error::new(e).context("opening air transport")),
        }
    } else {
        let link = args
            .sim_hubs
            .iter()
            .fold(SimLink::new(sender_cfg.starting_channel), |l, h| l.with_hub(*h));
        deliver(link, &cfg, sender_cfg, &reading).await
    };
    finish_cycle(&mut state, &cfg.state_path, dirty, discovery, outcome)
}

/// Persist the cycle's state changes, then report how delivery went. A generated node
/// address is saved even when the link never came up.
fn finish_cycle(
    state: &mut LinkState,
    path: &Path,
    mut dirty: bool,
    discovery: bool,
    outcome: anyhow::Result<SendOutcome>,
) -> anyhow::Result<()> {
    if let Ok(SendOutcome::Success { channel, responder }) = &outcome {
        dirty |= state.record_delivery(*channel, *responder, discovery);
    }
    if dirty {
        state
            .save(path)
            .with_context(|| format!("saving link state to {}", path.display()))?;
    }
    match outcome? {
        SendOutcome::Success { .. } => Ok(()),
        other => bail!("telemetry not delivered: {:?}", other),
    }
}

async fn deliver<T: LinkTransport>(
    mut link: T,
    cfg: &NodeConfig,
    sender_cfg: soil_core::SenderConfig,
    reading: &SensorReading,
) -> anyhow::Result<SendOutcome> {
    let mut sender = if cfg.fixed_channel {
        // Stand-in for the other connection that owns the channel.
        link.set_active_channel(sender_cfg.starting_channel)?;
        Sender::initialize_on_fixed_channel(link, sender_cfg)?
    } else {
        Sender::initialize(link, sender_cfg)?
    };
    let outcome = sender.send_telemetry(reading).await;
    sender.shutdown();
    match outcome {
        SendOutcome::Success { channel, responder } => {
            info!(channel, responder = ?responder, "delivered");
        }
        other => error!(outcome = ?other, "delivery failed"),
    }
    Ok(outcome)
}

async fn run_hub(cfg: NodeConfig, args: HubArgs) -> anyhow::Result<()> {
    let mac = match args.mac.or(cfg.hub) {
        Some(mac) => mac,
        None => {
            let mac = random_local_mac();
            warn!(%mac, "no hub address configured; using a random one");
            mac
        }
    };
    let mut link = AirTransport::bind(mac, cfg.air_port, AirRole::Hub)
        .await
        .context("opening air transport")?;
    let channel = args.channel_or(&cfg);
    link.set_active_channel(channel)?;
    let mut hub = Hub::new(link)?;
    info!(%mac, channel, port = cfg.air_port, "hub ready");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            res = &mut shutdown => {
                res?;
                break;
            }
            next = hub.recv() => {
                let Some((source, reading)) = next else { break };
                for p in publications(source, &reading) {
                    println!("{}", serde_json::to_string(&p)?);
                }
            }
        }
    }
    info!(acked = hub.acked(), "hub stopped");
    Ok(())
}

/// Random unicast, locally administered address.
fn random_local_mac() -> MacAddress {
    let mut b: [u8; 6] = rand::random();
    b[0] = (b[0] | 0x02) & 0xfe;
    MacAddress::new(b)
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
