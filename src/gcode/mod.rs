//! Translation of dot positions into the device command stream.

use crate::config::{GcodeConfig, LayoutConfig};
use crate::layout::DotPosition;

/// One opaque device instruction, optionally back-referencing the dot it
/// realizes (bookkeeping for "dots actually sent").
#[derive(Debug, Clone, PartialEq)]
pub struct GcodeCommand {
    pub raw: String,
    pub origin_dot: Option<DotPosition>,
}

impl GcodeCommand {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            origin_dot: None,
        }
    }

    pub fn for_dot(raw: impl Into<String>, dot: DotPosition) -> Self {
        Self {
            raw: raw.into(),
            origin_dot: Some(dot),
        }
    }
}

/// Converts ordered dot positions into motion/punch command pairs.
///
/// Command order is itself the travel path: dots are emitted exactly in
/// input order, with no batching, merging, or shortest-path reordering.
pub struct GcodeTranslator {
    offset_x: f64,
    offset_y: f64,
    lateral_feed: u32,
    punch_feed: u32,
    punch_amount: f64,
    mirror_x: bool,
    paper_width: f64,
}

impl GcodeTranslator {
    pub fn new(layout: &LayoutConfig, gcode: &GcodeConfig) -> Self {
        Self {
            offset_x: gcode.offset_x,
            offset_y: gcode.offset_y,
            lateral_feed: gcode.lateral_feed,
            punch_feed: gcode.punch_feed,
            punch_amount: gcode.punch_amount,
            mirror_x: gcode.mirror_x,
            paper_width: layout.paper_width,
        }
    }

    /// Emits a lateral move plus a punch stroke for every punched dot.
    /// Unpunched slots produce nothing.
    pub fn translate(&self, dots: &[DotPosition]) -> Vec<GcodeCommand> {
        let mut commands = Vec::new();
        for dot in dots.iter().filter(|d| d.punch) {
            let x = if self.mirror_x {
                self.paper_width - dot.x
            } else {
                dot.x
            };
            commands.push(GcodeCommand::new(format!(
                "G1 X{:.3} Y{:.3} F{}",
                x + self.offset_x,
                dot.y + self.offset_y,
                self.lateral_feed
            )));
            commands.push(GcodeCommand::for_dot(
                format!("G1 E{:.3} F{}", self.punch_amount, self.punch_feed),
                *dot,
            ));
        }
        commands
    }
}
