//! Trapline - closed-loop control for dual-trap force spectroscopy
//!
//! Trapline drives an optical-tweezers instrument through a trial: catch two
//! beads, fish a molecular tether between them, verify that exactly one
//! tether is attached, then record force-distance curves, kymographs or force
//! sequences. Every motion is a guarded convergence loop: measure, compare
//! against the target, step, pause, repeat until within tolerance or out of
//! budget.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): signals, guards, budgets, protocols, errors and ports
//! - **Service Layer** (`services`): control procedures written against the ports
//! - **Application Layer** (`application`): the trial orchestrator
//! - **Infrastructure Layer** (`infrastructure`): config, logging and the simulated instrument
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```no_run
//! use trapline::application::WorkflowOrchestrator;
//! use trapline::domain::models::{Config, Protocol};
//! use trapline::infrastructure::simulator::SimInstrument;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = Config::default();
//! let protocol = Protocol::fd_curves(&config);
//! let sim = SimInstrument::new(&config);
//! let orchestrator = WorkflowOrchestrator::new(sim.handles().await, config)?;
//! let summary = orchestrator.run(&protocol).await?;
//! println!("{} of {} trials succeeded", summary.successes(), summary.trials.len());
//! # Ok(())
//! # }
//! ```

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{TrialEvent, WorkflowOrchestrator};
pub use domain::errors::{ControlError, ControlResult, InstrumentError};
pub use domain::models::{Config, Protocol, ProtocolStep, RunSummary, Signal, WorkflowResult};
pub use domain::ports::{Actuator, InstrumentHandles, Telemetry};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use infrastructure::simulator::SimInstrument;
pub use services::{ConvergenceLoop, MotionService};
