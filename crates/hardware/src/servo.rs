//! Servo and stepper control with the hardware safety envelope.
//!
//! Wire format: `s:<channel 0..15>:<value 0..100>\n` for absolute servo
//! positions, `step:<left|right>:<count>\n` for relative stepper rotation.
//! Servo values are clamped to [0, 100], the rotation accumulator to
//! [-180, +180], and per-call servo deltas to a configurable maximum.

use ha_domain::action::RobotState;
use ha_domain::config::HardwareConfig;
use ha_domain::error::Result;

use crate::link::CommandSink;

const MIN_STEPPER_DEG: f32 = -180.0;
const MAX_STEPPER_DEG: f32 = 180.0;

/// Direction of a stepper move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDirection {
    Left,
    Right,
}

impl StepDirection {
    fn wire_name(self) -> &'static str {
        match self {
            StepDirection::Left => "left",
            StepDirection::Right => "right",
        }
    }
}

/// Convert a rotation in degrees to stepper steps.
///
/// `steps = round(|deg| * microstep * full_steps / 360)`, floored to 1 when
/// the requested rotation is non-negligible, so tiny moves still move.
pub fn degrees_to_steps(degrees: f32, microstep: u32, full_steps_per_rev: u32) -> u32 {
    let steps_per_deg = (microstep * full_steps_per_rev) as f32 / 360.0;
    let steps = (degrees.abs() * steps_per_deg).round() as u32;
    if steps == 0 && degrees.abs() > 0.01 {
        1
    } else {
        steps
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ServoController
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tracks actuator state and emits wire commands through a [`CommandSink`].
pub struct ServoController {
    sink: Box<dyn CommandSink>,
    elevation_channel: u8,
    translation_channel: u8,
    max_servo_delta: i32,
    microstep: u32,
    full_steps_per_rev: u32,
    elevation_pos: i32,
    translation_pos: i32,
    rotation_deg: f32,
}

impl ServoController {
    pub fn new(sink: Box<dyn CommandSink>, cfg: &HardwareConfig) -> Self {
        Self {
            sink,
            elevation_channel: cfg.elevation_channel,
            translation_channel: cfg.translation_channel,
            max_servo_delta: cfg.max_servo_delta as i32,
            microstep: cfg.microstep,
            full_steps_per_rev: cfg.full_steps_per_rev,
            elevation_pos: 0,
            translation_pos: 0,
            rotation_deg: 0.0,
        }
    }

    /// Current actuator state, as fed to the model with each frame.
    pub fn state(&self) -> RobotState {
        RobotState {
            elevation_servo_pos: self.elevation_pos,
            translation_servo_pos: self.translation_pos,
            rotation_stepper_deg: self.rotation_deg.round() as i32,
        }
    }

    /// Send a raw servo command. Returns `Ok(false)` for out-of-range input
    /// (state unchanged) rather than touching the hardware.
    pub fn move_servo(&mut self, channel: u8, value: i32) -> Result<bool> {
        if channel > 15 || !(0..=100).contains(&value) {
            tracing::warn!(channel, value, "servo command out of range, skipping");
            return Ok(false);
        }
        self.sink.send_line(&format!("s:{channel}:{value}\n"))?;
        Ok(true)
    }

    /// Set absolute elevation, clamped to [0, 100] with the per-call delta cap.
    pub fn set_elevation(&mut self, value: i32) -> Result<bool> {
        let target = Self::step_toward(self.elevation_pos, value, self.max_servo_delta);
        if target == self.elevation_pos {
            return Ok(false);
        }
        let channel = self.elevation_channel;
        if self.move_servo(channel, target)? {
            self.elevation_pos = target;
            return Ok(true);
        }
        Ok(false)
    }

    /// Set absolute translation, clamped to [0, 100] with the per-call delta cap.
    pub fn set_translation(&mut self, value: i32) -> Result<bool> {
        let target = Self::step_toward(self.translation_pos, value, self.max_servo_delta);
        if target == self.translation_pos {
            return Ok(false);
        }
        let channel = self.translation_channel;
        if self.move_servo(channel, target)? {
            self.translation_pos = target;
            return Ok(true);
        }
        Ok(false)
    }

    /// Rotate left by `degrees`. Exceeding the [-180, 180] envelope is a
    /// silent no-op that leaves state unchanged.
    pub fn move_left(&mut self, degrees: f32) -> Result<bool> {
        self.move_stepper(StepDirection::Left, degrees.abs())
    }

    /// Rotate right by `degrees`, same envelope rule as [`Self::move_left`].
    pub fn move_right(&mut self, degrees: f32) -> Result<bool> {
        self.move_stepper(StepDirection::Right, degrees.abs())
    }

    fn move_stepper(&mut self, direction: StepDirection, degrees: f32) -> Result<bool> {
        if degrees <= 0.0 {
            return Ok(false);
        }
        let new_rotation = match direction {
            StepDirection::Left => self.rotation_deg - degrees,
            StepDirection::Right => self.rotation_deg + degrees,
        };
        if !(MIN_STEPPER_DEG..=MAX_STEPPER_DEG).contains(&new_rotation) {
            tracing::debug!(
                current = self.rotation_deg,
                requested = degrees,
                "rotation would leave envelope, ignoring"
            );
            return Ok(false);
        }

        let steps = degrees_to_steps(degrees, self.microstep, self.full_steps_per_rev);
        if steps == 0 {
            return Ok(false);
        }
        self.sink
            .send_line(&format!("step:{}:{}\n", direction.wire_name(), steps))?;
        self.rotation_deg = new_rotation;
        Ok(true)
    }

    /// Move from `current` toward `target` (clamped to the servo range) by at
    /// most `max_delta` units.
    fn step_toward(current: i32, target: i32, max_delta: i32) -> i32 {
        let clamped = target.clamp(0, 100);
        let delta = clamped - current;
        if delta.abs() > max_delta {
            tracing::warn!(
                current,
                target = clamped,
                max_delta,
                "servo delta capped for voltage safety"
            );
            current + max_delta * delta.signum()
        } else {
            clamped
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::RecordingSink;

    fn controller() -> (ServoController, RecordingSink) {
        let sink = RecordingSink::new();
        let cfg = HardwareConfig::default();
        (ServoController::new(Box::new(sink.clone()), &cfg), sink)
    }

    #[test]
    fn stepper_math_90_degrees() {
        // MICROSTEP=8, FS=200 → 1600 steps/rev → 90° = 400 steps.
        assert_eq!(degrees_to_steps(90.0, 8, 200), 400);
    }

    #[test]
    fn stepper_math_floors_tiny_moves_to_one_step() {
        assert_eq!(degrees_to_steps(0.05, 8, 200), 1);
        assert_eq!(degrees_to_steps(0.005, 8, 200), 0);
    }

    #[test]
    fn move_left_emits_wire_command_and_updates_rotation() {
        let (mut c, sink) = controller();
        assert!(c.move_left(90.0).unwrap());
        assert_eq!(sink.lines(), vec!["step:left:400\n"]);
        assert_eq!(c.state().rotation_stepper_deg, -90);
    }

    #[test]
    fn rotation_envelope_rejects_and_leaves_state() {
        let (mut c, sink) = controller();
        assert!(c.move_left(90.0).unwrap());
        // -90 - 120 = -210 would leave the envelope: silent no-op.
        assert!(!c.move_left(120.0).unwrap());
        assert_eq!(c.state().rotation_stepper_deg, -90);
        assert_eq!(sink.lines().len(), 1, "no second command emitted");
    }

    #[test]
    fn move_right_positive_rotation() {
        let (mut c, _sink) = controller();
        assert!(c.move_right(45.0).unwrap());
        assert_eq!(c.state().rotation_stepper_deg, 45);
    }

    #[test]
    fn servo_values_clamped_to_range() {
        let (mut c, sink) = controller();
        // Target 130 clamps to 100; delta capped at 20 per call.
        assert!(c.set_elevation(130).unwrap());
        assert_eq!(c.state().elevation_servo_pos, 20);
        assert_eq!(sink.lines(), vec!["s:8:20\n"]);
    }

    #[test]
    fn servo_delta_capped_each_call() {
        let (mut c, sink) = controller();
        assert!(c.set_translation(100).unwrap());
        assert_eq!(c.state().translation_servo_pos, 20);
        assert!(c.set_translation(100).unwrap());
        assert_eq!(c.state().translation_servo_pos, 40);
        assert_eq!(sink.lines(), vec!["s:0:20\n", "s:0:40\n"]);
    }

    #[test]
    fn servo_noop_when_already_at_target() {
        let (mut c, sink) = controller();
        assert!(!c.set_elevation(0).unwrap());
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn raw_servo_command_validates_input() {
        let (mut c, sink) = controller();
        assert!(!c.move_servo(16, 50).unwrap());
        assert!(!c.move_servo(4, 101).unwrap());
        assert!(!c.move_servo(4, -1).unwrap());
        assert!(sink.lines().is_empty());
        assert!(c.move_servo(4, 50).unwrap());
        assert_eq!(sink.lines(), vec!["s:4:50\n"]);
    }

    #[test]
    fn emitted_servo_values_always_in_range() {
        let (mut c, sink) = controller();
        for target in [-50, 0, 15, 37, 99, 100, 250] {
            let _ = c.set_elevation(target);
            let _ = c.set_translation(target);
        }
        for line in sink.lines() {
            let value: i32 = line
                .trim_end()
                .rsplit(':')
                .next()
                .unwrap()
                .parse()
                .unwrap();
            assert!((0..=100).contains(&value), "out-of-range servo value in {line}");
        }
    }

    #[test]
    fn rotation_never_leaves_envelope() {
        let (mut c, _sink) = controller();
        for _ in 0..10 {
            let _ = c.move_right(47.0);
        }
        assert!(c.state().rotation_stepper_deg <= 180);
        for _ in 0..20 {
            let _ = c.move_left(63.0);
        }
        assert!(c.state().rotation_stepper_deg >= -180);
    }
}
