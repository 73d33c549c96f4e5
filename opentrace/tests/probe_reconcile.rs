use anyhow::{anyhow, Result};
use async_trait::async_trait;
use opentrace::config::{AppConfig, HEARTBEAT_PROBE, SYNTHETIC_PROBE};
use opentrace::event_bus::{create_event_sender, EventPayload, TraceEvent};
use opentrace::probe::{synthetic::SyntheticProbe, Probe};
use opentrace::probe_manager::{ProbeError, ProbeManager};
use opentrace::publisher::{BusPublisher, Publisher};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Duration};

#[derive(Default)]
struct MockState {
    running: bool,
    closed: bool,
}

struct MockProbe {
    state: Arc<Mutex<MockState>>,
    fail_load: bool,
}

#[async_trait]
impl Probe for MockProbe {
    fn name(&self) -> &'static str {
        "mock_probe"
    }

    async fn load(&mut self) -> Result<()> {
        if self.fail_load {
            return Err(anyhow!("simulated load error"));
        }
        Ok(())
    }

    async fn run(&mut self, mut shutdown: watch::Receiver<bool>, publisher: BusPublisher) -> Result<()> {
        self.state.lock().unwrap().running = true;
        let _ = publisher.publish(TraceEvent::new(
            "mock_probe",
            EventPayload::Message("test-data".into()),
        ));
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.running = false;
        state.closed = true;
        Ok(())
    }
}

struct Registered {
    state: Arc<Mutex<MockState>>,
    created: Arc<AtomicUsize>,
}

fn register_mock(manager: &mut ProbeManager, name: &str, fail_load: bool) -> Registered {
    let state = Arc::new(Mutex::new(MockState::default()));
    let created = Arc::new(AtomicUsize::new(0));
    let (s, c) = (Arc::clone(&state), Arc::clone(&created));
    manager.register(
        name,
        Box::new(move |_config: &AppConfig| {
            c.fetch_add(1, Ordering::SeqCst);
            Box::new(MockProbe {
                state: Arc::clone(&s),
                fail_load,
            }) as Box<dyn Probe>
        }),
    );
    Registered { state, created }
}

fn config_with(probes: &[(&str, bool)]) -> AppConfig {
    AppConfig {
        probes: probes
            .iter()
            .map(|(name, on)| (name.to_string(), *on))
            .collect::<BTreeMap<_, _>>(),
        ..AppConfig::default()
    }
}

#[tokio::test]
async fn reconcile_starts_then_stops_probe() {
    let bus = create_event_sender();
    let mut events = bus.subscribe();
    let mut manager = ProbeManager::new(bus);
    let mock = register_mock(&mut manager, "mock_probe", false);

    let failures = manager.reconcile(&config_with(&[("mock_probe", true)])).await;
    assert!(failures.is_empty());
    assert_eq!(manager.active_probe_names(), vec!["mock_probe".to_string()]);

    let event = timeout(Duration::from_millis(500), events.recv())
        .await
        .expect("timed out waiting for data from probe")
        .unwrap();
    assert_eq!(event.payload, EventPayload::Message("test-data".into()));
    assert!(mock.state.lock().unwrap().running);

    manager.reconcile(&config_with(&[("mock_probe", false)])).await;
    assert!(manager.active_probe_names().is_empty());
    let state = mock.state.lock().unwrap();
    assert!(state.closed, "probe should be closed after being disabled");
    assert!(!state.running);
}

#[tokio::test]
async fn reconcile_is_idempotent() {
    let mut manager = ProbeManager::new(create_event_sender());
    let mock = register_mock(&mut manager, "mock_probe", false);
    let config = config_with(&[("mock_probe", true)]);

    manager.reconcile(&config).await;
    sleep(Duration::from_millis(10)).await;
    manager.reconcile(&config).await;

    assert_eq!(mock.created.load(Ordering::SeqCst), 1);
    manager.shutdown().await;
}

#[tokio::test]
async fn probe_missing_from_map_is_stopped() {
    let mut manager = ProbeManager::new(create_event_sender());
    let a = register_mock(&mut manager, "probe_a", false);
    let _b = register_mock(&mut manager, "probe_b", false);

    manager
        .reconcile(&config_with(&[("probe_a", true), ("probe_b", true)]))
        .await;
    assert_eq!(manager.active_probe_names(), vec!["probe_a", "probe_b"]);

    manager.reconcile(&config_with(&[("probe_b", true)])).await;
    assert_eq!(manager.active_probe_names(), vec!["probe_b"]);
    assert!(a.state.lock().unwrap().closed);
    manager.shutdown().await;
}

#[tokio::test]
async fn unknown_and_failing_probes_are_reported_not_started() {
    let mut manager = ProbeManager::new(create_event_sender());
    let broken = register_mock(&mut manager, "broken", true);

    let failures = manager
        .reconcile(&config_with(&[("broken", true), ("ghost", true)]))
        .await;

    assert_eq!(failures.len(), 2);
    assert!(failures
        .iter()
        .any(|e| matches!(e, ProbeError::NotRegistered(name) if name == "ghost")));
    assert!(failures
        .iter()
        .any(|e| matches!(e, ProbeError::Load { name, .. } if name == "broken")));
    assert!(manager.active_probe_names().is_empty());
    assert!(!broken.state.lock().unwrap().running);
}

#[tokio::test]
async fn shutdown_closes_every_probe() {
    let mut manager = ProbeManager::new(create_event_sender());
    let p1 = register_mock(&mut manager, "probe1", false);
    manager.reconcile(&config_with(&[("probe1", true)])).await;
    sleep(Duration::from_millis(10)).await;
    assert!(p1.state.lock().unwrap().running, "probe 1 failed to start");

    manager.shutdown().await;
    assert!(p1.state.lock().unwrap().closed);
    assert!(manager.active_probe_names().is_empty());
}

struct PanickingProbe {
    after_shutdown: bool,
}

#[async_trait]
impl Probe for PanickingProbe {
    fn name(&self) -> &'static str {
        "panicky"
    }

    async fn load(&mut self) -> Result<()> {
        Ok(())
    }

    async fn run(&mut self, mut shutdown: watch::Receiver<bool>, _publisher: BusPublisher) -> Result<()> {
        if self.after_shutdown {
            let _ = shutdown.changed().await;
        }
        panic!("probe task blew up");
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

fn register_panicking(manager: &mut ProbeManager, after_shutdown: bool) -> Arc<AtomicUsize> {
    let created = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&created);
    manager.register(
        "panicky",
        Box::new(move |_config: &AppConfig| {
            c.fetch_add(1, Ordering::SeqCst);
            Box::new(PanickingProbe { after_shutdown }) as Box<dyn Probe>
        }),
    );
    created
}

#[tokio::test]
async fn panicked_probe_is_reported_and_restarted() {
    let mut manager = ProbeManager::new(create_event_sender());
    let created = register_panicking(&mut manager, false);
    let config = config_with(&[("panicky", true)]);

    assert!(manager.reconcile(&config).await.is_empty());
    sleep(Duration::from_millis(50)).await;

    let failures = manager.reconcile(&config).await;
    assert_eq!(failures.len(), 1);
    assert!(matches!(&failures[0], ProbeError::Panicked(name) if name == "panicky"));
    assert_eq!(created.load(Ordering::SeqCst), 2, "probe is started again");
    manager.shutdown().await;
}

#[tokio::test]
async fn panic_while_stopping_is_not_reported_as_stopped() {
    let mut manager = ProbeManager::new(create_event_sender());
    register_panicking(&mut manager, true);

    assert!(manager
        .reconcile(&config_with(&[("panicky", true)]))
        .await
        .is_empty());
    sleep(Duration::from_millis(10)).await;

    let failures = manager.reconcile(&config_with(&[("panicky", false)])).await;
    assert_eq!(failures.len(), 1);
    assert!(matches!(&failures[0], ProbeError::Panicked(name) if name == "panicky"));
    assert!(manager.active_probe_names().is_empty());
}

#[tokio::test]
async fn builtin_synthetic_probe_feeds_the_bus() {
    let bus = create_event_sender();
    let mut events = bus.subscribe();
    let mut manager = ProbeManager::with_builtin_probes(bus);
    assert!(manager.registered_names().contains(&SYNTHETIC_PROBE.to_string()));
    assert!(manager.registered_names().contains(&HEARTBEAT_PROBE.to_string()));

    let mut config = config_with(&[(SYNTHETIC_PROBE, true)]);
    config.channel.capacity_bytes = 4096;
    config.channel.poll_interval_ms = 10;
    config.synthetic.interval_ms = 20;
    assert!(manager.reconcile(&config).await.is_empty());

    let mut seen = std::collections::HashSet::new();
    let collect = async {
        while seen.len() < 3 {
            let event = events.recv().await.unwrap();
            if let EventPayload::FileOpen { pid, comm } = event.payload {
                seen.insert((pid, comm));
            }
        }
    };
    timeout(Duration::from_secs(5), collect)
        .await
        .expect("synthetic events did not arrive");
    assert!(seen.contains(&(100, "ls".to_string())));
    assert!(seen.contains(&(200, "cat".to_string())));
    assert!(seen.contains(&(300, "vim".to_string())));

    manager.shutdown().await;
}

#[tokio::test]
async fn synthetic_probe_without_processes_waits_for_shutdown() -> Result<()> {
    let config = AppConfig::from_yaml("synthetic:\n  processes: []\nchannel:\n  capacity_bytes: 4096\n")?;
    let mut probe = SyntheticProbe::new(config.synthetic.clone(), config.channel.clone());
    probe.load().await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let publisher = BusPublisher::new(create_event_sender());
    let handle = tokio::spawn(async move { probe.run(stop_rx, publisher).await });

    sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished(), "idle probe must keep running until told to stop");

    stop_tx.send(true)?;
    timeout(Duration::from_secs(2), handle).await???;
    Ok(())
}
