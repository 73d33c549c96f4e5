//! Traces `openat` entries through a bounded ring buffer.
//!
//! The capture path is [`capture::capture_openat`] writing into a
//! [`channel`]; the kernel flavour of the same path lives in
//! `opentrace-ebpf`. Everything else (probes, the event bus, config and
//! logging) is the agent that loads, drains and reports.

pub mod capture;
pub mod channel;
pub mod config;
pub mod config_manager;
pub mod core_logic;
pub mod drainer;
pub mod event_bus;
pub mod logger;
pub mod probe;
pub mod probe_manager;
pub mod publisher;
pub mod signal_handler;
pub mod subscriber;
