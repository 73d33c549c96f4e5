use crate::{
    config_manager::ConfigManager,
    event_bus,
    probe_manager::ProbeManager,
    signal_handler::{SignalEvent, SignalHandler},
    subscriber::event_printer::EventPrinter,
};
use anyhow::{Context, Result};
use tracing::{error, info};

pub fn async_runtime(config_manager: ConfigManager) -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("opentrace")
        .build()
        .context("building tokio runtime")?;

    rt.block_on(core_logic(config_manager))
}

async fn core_logic(config_manager: ConfigManager) -> Result<()> {
    info!("Core Logic: Starting up and initializing components...");
    let mut signals = SignalHandler::install().context("installing signal handlers")?;

    // 1. Event bus and the printer at its far end
    let event_sender = event_bus::create_event_sender();
    let printer_handle = tokio::spawn(EventPrinter::new(event_sender.subscribe()).run());

    // 2. Probe manager with every probe this build knows about
    let mut probe_manager = ProbeManager::with_builtin_probes(event_sender.clone());
    info!(
        registered = ?probe_manager.registered_names(),
        "Core Logic: Probe registry ready."
    );

    // 3. Initial reconcile
    let config = config_manager.shared();
    let snapshot = config.read().await.clone();
    probe_manager.reconcile(&snapshot).await;
    info!(
        active = ?probe_manager.active_probe_names(),
        "Core Logic: Tracing started."
    );

    // 4. Wait for signals
    loop {
        match signals.next().await {
            SignalEvent::ConfigReload => {
                if let Err(e) = config_manager.reload_config().await {
                    error!("Core Logic: Keeping previous configuration: {:#}", e);
                    continue;
                }
                let snapshot = config.read().await.clone();
                probe_manager.reconcile(&snapshot).await;
            }
            SignalEvent::Shutdown => {
                info!("Core Logic: Initiating graceful shutdown...");
                break;
            }
        }
    }

    // 5. Stop probes, then close the bus so the printer drains and exits
    probe_manager.shutdown().await;
    drop(probe_manager);
    drop(event_sender);
    let printed = printer_handle.await.context("event printer task failed")?;
    info!(printed, "Core Logic: Shutdown completed.");
    Ok(())
}
