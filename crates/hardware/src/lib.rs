//! Actuator control: serial command sink, servo/stepper controller with the
//! safety envelope, and the single-consumer motion dispatcher.

pub mod dispatch;
pub mod link;
pub mod servo;

pub use dispatch::{attention_gesture, translate_actions, MotionDispatcher, MotionStep};
pub use link::{CommandSink, NullSink, RecordingSink, SerialLink};
pub use servo::ServoController;
