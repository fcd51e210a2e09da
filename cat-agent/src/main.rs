//! Rig agent binary

use anyhow::{bail, Context};
use cat_agent::{run_audio_loop, run_control_loop, AgentSettings, Args};
use cat_sim::SimulatedRig;
use cat_transport::{autodetect, list_ports, CatLink, Transport};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cat_agent=info,cat_transport=info,cat_sim=info,cat_codec=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.list_ports {
        for port in list_ports().context("listing serial ports")? {
            match port.product {
                Some(product) => println!("{}\t{}", port.name, product),
                None => println!("{}", port.name),
            }
        }
        return Ok(());
    }

    let settings = AgentSettings::load(args.config.as_deref()).merge(&args);
    if !settings.has_credentials() {
        tracing::warn!("No --username/--password given, the relay will refuse the handshake");
    }

    let transport: Box<dyn Transport> =
        match autodetect::open(&settings.serial_port, settings.baudrate).await {
            Ok(detected) => detected.transport,
            Err(e) if settings.simulator_fallback => {
                tracing::warn!(
                    "No transceiver on {} ({}), using the FT-991A simulator",
                    settings.serial_port,
                    e
                );
                Box::new(SimulatedRig::from_config(settings.simulator.clone()))
            }
            Err(e) => {
                bail!("no transceiver on {}: {}", settings.serial_port, e);
            }
        };
    let link = CatLink::with_read_timeout(transport, settings.read_timeout());
    tracing::info!("Rig link: {}", link.describe());

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown requested");
                signal.cancel();
            }
            Err(e) => tracing::warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });

    let control = tokio::spawn(run_control_loop(
        link.clone(),
        settings.control_config(),
        shutdown.clone(),
    ));
    let audio = tokio::spawn(run_audio_loop(settings.audio_config(), shutdown.clone()));

    let (control, audio) = tokio::join!(control, audio);
    control.context("control loop panicked")?;
    audio.context("audio loop panicked")?;

    link.close().await;
    Ok(())
}
