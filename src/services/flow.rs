//! Flow control on the laminar flow cell.

use std::sync::Arc;
use tracing::{debug, info};

use super::measure::seconds;
use crate::domain::errors::{ControlResult, InstrumentError};
use crate::domain::models::Config;
use crate::domain::ports::InstrumentHandles;

/// Largest accepted difference between requested and read-back pressure, in bar.
const PRESSURE_TOLERANCE: f64 = 0.01;

#[derive(Clone)]
pub struct FlowController {
    handles: InstrumentHandles,
    config: Arc<Config>,
}

impl FlowController {
    pub fn new(handles: InstrumentHandles, config: Arc<Config>) -> Self {
        Self { handles, config }
    }

    /// Open the configured channels at `pressure` bar and wait for the flow
    /// to stabilise.
    pub async fn start_flow(&self, pressure: f64) -> ControlResult<()> {
        let channels = &self.config.instrument.flow_channels;
        self.handles.fluidics.open(channels).await?;
        self.handles.fluidics.set_pressure(pressure).await?;
        let actual = self.handles.fluidics.pressure().await?;
        if (actual - pressure).abs() > PRESSURE_TOLERANCE {
            return Err(InstrumentError::rejected(
                "fluidics",
                format!("pressure reads {actual:.3} bar, requested {pressure:.3} bar"),
            )
            .into());
        }
        info!(pressure, ?channels, "Flow started");
        self.handles
            .clock
            .pause(seconds(self.config.instrument.flow_wait_s))
            .await?;
        Ok(())
    }

    /// Close the configured channels.
    pub async fn stop_flow(&self) -> ControlResult<()> {
        self.handles
            .fluidics
            .close(&self.config.instrument.flow_channels)
            .await?;
        info!("Flow stopped");
        Ok(())
    }

    /// Release the drive pressure.
    pub async fn vent(&self) -> ControlResult<()> {
        self.handles.fluidics.vent().await?;
        debug!("Pressure vented");
        Ok(())
    }
}
