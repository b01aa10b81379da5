//! trialswitch command line support
//!
//! Simulation harness behind the `trialswitch` binary.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod simulator;

pub use simulator::{
    run_simulator, run_sticky, SelectionChoice, SimulatorConfig, SimulatorReport, StickyReport,
};
