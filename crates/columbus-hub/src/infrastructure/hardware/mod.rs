//! Hardware driver implementations.
//!
//! The module layer only sees the [`MotorDriver`](crate::modules::MotorDriver)
//! and [`CameraProbe`](crate::modules::CameraProbe) traits.  This directory
//! provides the implementations the binary wires in:
//!
//! - [`SimulatedMotorDriver`]: records every command in memory and computes
//!   the servo pulse width a real GPIO driver would emit.
//! - [`DevicePathProbe`]: the camera is present while its device node exists.
//! - [`FixedProbe`]: presence set by hand, for tests and headless runs.

pub mod probe;
pub mod simulated;

pub use probe::{DevicePathProbe, FixedProbe};
pub use simulated::{servo_pulse_width, MotorCommand, SimulatedMotorDriver, SERVO_MAX_ANGLE};
