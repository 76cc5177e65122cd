//! Core library for the CryoLive live-processing orchestrator.
//!
//! Hosts everything in §4 of the specification except the thin HTTP/WebSocket
//! adapter (that lives in `cryolive-server`): the Command Executor, Stage
//! Builders, Job Store implementations, SLURM Monitor, Progress Bus, File
//! Watcher, Log Error Parser, and the Live Session Orchestrator itself.

pub mod command_executor;
pub mod error;
pub mod file_watcher;
pub mod job_store;
pub mod log_error_parser;
pub mod orchestrator;
pub mod progress_bus;
pub mod result_adapter;
pub mod scheduler_client;
pub mod slurm_monitor;
pub mod stage_builders;

pub use command_executor::{sanitize_scheduler_id, ProcessCommandExecutor};
pub use error::{CoreError, CoreResult};
pub use file_watcher::FileWatcher;
pub use orchestrator::{LiveOrchestrator, OrchestratorConfig, PassOutcome};
pub use progress_bus::{ProgressBus, ProgressChange, ProgressEvent, StatusChange, StatusSource};
pub use result_adapter::StatsFileResultAdapter;
pub use scheduler_client::SchedulerClient;
pub use slurm_monitor::SlurmMonitor;
