use opentrace::config::{AppConfig, HEARTBEAT_PROBE, SYNTHETIC_PROBE};
use opentrace::config_manager::ConfigManager;
use opentrace::event_bus::{create_event_sender, EventPayload};
use opentrace::probe_manager::ProbeManager;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::RwLock;
use tokio::time::{timeout, Duration};

const SYNTHETIC_ONLY: &str = r#"
probes:
  synthetic: true
channel:
  capacity_bytes: 4096
  poll_interval_ms: 10
synthetic:
  interval_ms: 20
  processes:
    - pid: 4100
      comm: before
"#;

const HEARTBEAT_ONLY: &str = r#"
probes:
  synthetic: false
  heartbeat: true
heartbeat:
  interval_secs: 1
"#;

fn manager_for(path: &Path) -> anyhow::Result<ConfigManager> {
    let config = AppConfig::load_from_file(path)?;
    Ok(ConfigManager::new(
        Arc::new(RwLock::new(config)),
        Some(path.to_path_buf()),
    ))
}

#[tokio::test]
async fn reload_swaps_the_running_probes() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("opentrace.yaml");
    fs::write(&path, SYNTHETIC_ONLY)?;

    let config_manager = manager_for(&path)?;
    let shared = config_manager.shared();
    let bus = create_event_sender();
    let mut events = bus.subscribe();
    let mut probes = ProbeManager::with_builtin_probes(bus);

    let snapshot = shared.read().await.clone();
    assert!(probes.reconcile(&snapshot).await.is_empty());
    assert_eq!(probes.active_probe_names(), vec![SYNTHETIC_PROBE]);

    let first = timeout(Duration::from_secs(5), events.recv()).await??;
    assert_eq!(
        first.payload,
        EventPayload::FileOpen {
            pid: 4100,
            comm: "before".into()
        }
    );

    fs::write(&path, HEARTBEAT_ONLY)?;
    config_manager.reload_config().await?;
    let snapshot = shared.read().await.clone();
    assert_eq!(snapshot.heartbeat.interval_secs, 1);
    assert!(probes.reconcile(&snapshot).await.is_empty());
    assert_eq!(probes.active_probe_names(), vec![HEARTBEAT_PROBE]);

    let beat = timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await?;
            if event.probe == HEARTBEAT_PROBE {
                return Ok::<_, anyhow::Error>(event);
            }
        }
    })
    .await??;
    assert!(matches!(beat.payload, EventPayload::Message(ref m) if m.starts_with("heartbeat")));

    probes.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn broken_reload_keeps_previous_config() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("opentrace.yaml");
    fs::write(&path, SYNTHETIC_ONLY)?;
    let config_manager = manager_for(&path)?;

    fs::write(&path, "channel:\n  capacity_bytes: 1000\n")?;
    assert!(config_manager.reload_config().await.is_err());

    fs::write(&path, "probes: [not, a, map\n")?;
    assert!(config_manager.reload_config().await.is_err());

    let current = config_manager.shared().read().await.clone();
    assert_eq!(current.channel.capacity_bytes, 4096);
    assert_eq!(current.probes.get(SYNTHETIC_PROBE), Some(&true));
    Ok(())
}

#[tokio::test]
async fn probe_override_survives_reload() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("opentrace.yaml");
    fs::write(&path, SYNTHETIC_ONLY)?;
    let config_manager = manager_for(&path)?.with_probe_override(vec![HEARTBEAT_PROBE.into()]);

    fs::write(&path, HEARTBEAT_ONLY.replace("heartbeat: true", "heartbeat: false"))?;
    config_manager.reload_config().await?;

    let current = config_manager.shared().read().await.clone();
    assert_eq!(current.probes.len(), 1);
    assert_eq!(current.probes.get(HEARTBEAT_PROBE), Some(&true));
    Ok(())
}

#[tokio::test]
async fn reload_without_file_is_a_no_op() -> anyhow::Result<()> {
    let config_manager = ConfigManager::new(Arc::new(RwLock::new(AppConfig::default())), None);
    config_manager.reload_config().await?;
    let current = config_manager.shared().read().await.clone();
    assert_eq!(current.channel.capacity_bytes, 1 << 24);
    Ok(())
}
