use crate::{config::AppConfig, publisher::BusPublisher};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;

#[cfg(feature = "ebpf")]
pub mod file_open;
pub mod heartbeat;
pub mod synthetic;

/// A pluggable event source driven by the probe manager.
///
/// Lifecycle: `load` once, then `run` on its own task until the shutdown
/// signal flips, then `close`.
#[async_trait]
pub trait Probe: Send {
    fn name(&self) -> &'static str;

    async fn load(&mut self) -> Result<()>;

    // Must return promptly once `shutdown` becomes true.
    async fn run(&mut self, shutdown: watch::Receiver<bool>, publisher: BusPublisher)
        -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

pub type ProbeFactory = Box<dyn Fn(&AppConfig) -> Box<dyn Probe> + Send + Sync>;

/// The probes this build ships with.
#[allow(unused_mut)]
pub fn builtin_factories() -> Vec<(&'static str, ProbeFactory)> {
    let mut factories: Vec<(&'static str, ProbeFactory)> = vec![
        (
            crate::config::SYNTHETIC_PROBE,
            Box::new(|config: &AppConfig| {
                Box::new(synthetic::SyntheticProbe::new(
                    config.synthetic.clone(),
                    config.channel.clone(),
                )) as Box<dyn Probe>
            }),
        ),
        (
            crate::config::HEARTBEAT_PROBE,
            Box::new(|config: &AppConfig| {
                Box::new(heartbeat::HeartbeatProbe::new(config.heartbeat.clone()))
                    as Box<dyn Probe>
            }),
        ),
    ];
    #[cfg(feature = "ebpf")]
    factories.push((
        crate::config::FILE_OPEN_PROBE,
        Box::new(|_config: &AppConfig| Box::new(file_open::FileOpenProbe::new()) as Box<dyn Probe>),
    ));
    factories
}
