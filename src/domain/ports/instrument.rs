//! Unguarded instrument actions: fluidics, microstage, shutters, markers and
//! the clock.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::errors::InstrumentError;

/// Pressure-driven laminar flow cell.
#[async_trait]
pub trait Fluidics: Send + Sync {
    async fn open(&self, channels: &[u8]) -> Result<(), InstrumentError>;

    async fn close(&self, channels: &[u8]) -> Result<(), InstrumentError>;

    /// Set the drive pressure in bar.
    async fn set_pressure(&self, bar: f64) -> Result<(), InstrumentError>;

    async fn pressure(&self) -> Result<f64, InstrumentError>;

    /// Release the pressure to ambient.
    async fn vent(&self) -> Result<(), InstrumentError>;
}

/// Microstage that moves the flow cell under the traps.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Move to a named waypoint; `None` uses the stage default speed.
    async fn move_to(&self, waypoint: &str, speed: Option<f64>) -> Result<(), InstrumentError>;
}

/// Trap shutters.
#[async_trait]
pub trait Shutters: Send + Sync {
    /// Briefly close the given traps, releasing whatever they hold.
    async fn clear(&self, traps: &[u8]) -> Result<(), InstrumentError>;
}

/// Timeline markers and confocal scans.
#[async_trait]
pub trait Recorder: Send + Sync {
    async fn start_scan(&self, name: &str) -> Result<(), InstrumentError>;

    /// Stop the running scan; a no-op when nothing is scanning.
    async fn abort_scan(&self) -> Result<(), InstrumentError>;

    async fn mark_begin(&self, label: &str) -> Result<(), InstrumentError>;

    /// Close the open marker and optionally export it. Returns the written
    /// path, `None` when no marker was open or nothing was exported.
    async fn mark_end(&self, export: Option<&Path>) -> Result<Option<PathBuf>, InstrumentError>;
}

/// Instrument clock. The only way procedures wait.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn pause(&self, duration: Duration) -> Result<(), InstrumentError>;
}
