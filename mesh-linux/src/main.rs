// Mesh node daemon: hosts the single instance over a simulated radio.

mod config;
mod scanner;
mod sim;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use log::{info, warn};
use mesh_core::{
    ActiveScanResult, ChangedFlags, Context, EnergyScanResult, MeshInterface, NetworkLayer,
    SingleInstance,
};

use crate::sim::{SimConfig, SimStack};

const VERSION: &str = env!("CARGO_PKG_VERSION");

static INSTANCE: SingleInstance<SimStack> = SingleInstance::new();

/// State-change notifications seen since start.
static NOTIFICATIONS: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Default)]
struct Flags {
    factory_reset: bool,
    erase: bool,
    scan: bool,
}

fn main() -> anyhow::Result<()> {
    let mut flags = Flags::default();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("mesh-linux {}", VERSION);
                return Ok(());
            }
            "--factory-reset" => flags.factory_reset = true,
            "--erase" => flags.erase = true,
            "--scan" => flags.scan = true,
            other => anyhow::bail!("unknown argument: {}", other),
        }
    }

    let cfg = config::load();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cfg.log_level))
        .init();

    sim::install(SimConfig {
        settings_dir: cfg.settings_dir.clone(),
        auto_start: cfg.auto_start,
        network_name: cfg.network_name.clone(),
        channel: cfg.channel,
        ..SimConfig::default()
    })?;

    {
        let mut instance = INSTANCE.init_single()?;
        info!(
            "mesh-linux {} up: settings in {}, {} message buffers, role {}",
            VERSION,
            instance.platform().dir().display(),
            instance.message_pool().capacity(),
            instance.mesh_interface().role()
        );

        instance.register_state_changed_callback(
            on_state_changed,
            Context::from_ptr(&NOTIFICATIONS as *const AtomicUsize),
        )?;
        instance.register_active_scan_callback(Some(on_active_scan), Context::NONE);
        instance.register_energy_scan_callback(Some(on_energy_scan), Context::NONE);

        if flags.erase {
            // Refused unless auto-start left the mesh protocol off.
            let res = instance.erase_persistent_info();
            instance.finalize();
            if let Err(e) = res {
                warn!("erase refused: {} (set MESHNODE_AUTO_START=false)", e);
            }
            return Ok(());
        }
        if flags.factory_reset {
            instance.factory_reset();
        }
        if flags.scan || cfg.scan_on_start {
            let mut rng = rand::thread_rng();
            let found = scanner::active_scan(&*instance, &mut rng);
            info!("active scan found {} networks", found);
            scanner::energy_scan(&*instance, &mut rng);
        }
        if !instance.network_layer().is_enabled() {
            info!("auto-start off; mesh protocol stays disabled");
        }
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(Duration::from_millis(cfg.tick_ms)))?;

    if let Some(mut instance) = INSTANCE.get() {
        instance.finalize();
        info!(
            "stopped after {} ms, {} state notifications",
            instance.timer_milli().now(),
            NOTIFICATIONS.load(Ordering::SeqCst)
        );
    }
    Ok(())
}

/// Drive the simulated mesh until Ctrl+C or SIGTERM.
async fn run(tick: Duration) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(tick);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(mut instance) = INSTANCE.get() {
                    instance.mesh_interface_mut().tick();
                }
            }
            res = &mut shutdown => return res,
        }
    }
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
    info!("shutting down");
    Ok(())
}

fn on_state_changed(flags: ChangedFlags, ctx: Context) {
    // SAFETY: registered with the address of NOTIFICATIONS, a static.
    let counter = unsafe { &*ctx.as_ptr::<AtomicUsize>() };
    counter.fetch_add(1, Ordering::Relaxed);
    info!("state changed: {:?}", flags);
}

fn on_active_scan(result: Option<&ActiveScanResult>, _ctx: Context) {
    match result {
        Some(r) => info!(
            "scan: '{}' pan {:#06x} xpan {} ch {} rssi {} from {}{}",
            r.network_name,
            r.pan_id,
            r.extended_pan_id,
            r.channel,
            r.rssi,
            r.ext_address,
            if r.is_joinable { " (joinable)" } else { "" }
        ),
        None => info!("active scan done"),
    }
}

fn on_energy_scan(result: Option<&EnergyScanResult>, _ctx: Context) {
    match result {
        Some(r) => info!("energy: ch {} max rssi {}", r.channel, r.max_rssi),
        None => info!("energy scan done"),
    }
}
