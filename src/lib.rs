//! Host for a braille dot embosser built from a 3D-printer controller.
//!
//! The pipeline is: braille symbols -> [`layout::PageLayoutEngine`] ->
//! [`gcode::GcodeTranslator`] -> [`job::PrintJobController`] ->
//! [`link::PrinterLink`] -> device. Status and control (pause/resume/stop)
//! flow back from the job controller to the caller.

pub mod braille;
pub mod config;
pub mod gcode;
pub mod job;
pub mod layout;
pub mod link;

pub use braille::{CellPattern, Dot, Symbol, parse_symbols};
pub use config::Config;
pub use gcode::{GcodeCommand, GcodeTranslator};
pub use job::{Connector, JobHandle, PrintJobController, PrintStatus, SerialConnector};
pub use layout::{DotPosition, PageLayoutEngine};
pub use link::{LinkError, LinkOptions, PrinterLink};
