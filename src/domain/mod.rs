//! Domain layer for Trapline
//!
//! Signals, guards, budgets, convergence parameters, protocols and the
//! instrument ports every procedure is written against.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{BudgetLimit, ControlError, ControlResult, GuardTag, InstrumentError};
