//! In-memory motor driver.
//!
//! Behaves like the GPIO driver on the robot: commands are refused while the
//! controller is detached or before `initialise`, and steering is converted
//! to a servo pulse width.  Nothing is written to hardware; every accepted
//! command is recorded for inspection instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::modules::{HardwareError, MotorDriver};

/// Mechanical limit of the steering servo, in degrees.
pub const SERVO_MAX_ANGLE: f64 = 140.0;

const MIN_PULSE: Duration = Duration::from_micros(750);
const MAX_PULSE: Duration = Duration::from_micros(2250);

/// High time of the servo control pulse for `angle` degrees.
///
/// Linear from 0.75 ms at 0° to 2.25 ms at [`SERVO_MAX_ANGLE`]; angles
/// outside the range are clamped.
pub fn servo_pulse_width(angle: f64) -> Duration {
    let ratio = angle / SERVO_MAX_ANGLE;
    if !ratio.is_finite() {
        return MIN_PULSE;
    }
    let span = (MAX_PULSE - MIN_PULSE).as_nanos() as f64;
    MIN_PULSE + Duration::from_nanos((span * ratio.clamp(0.0, 1.0)).round() as u64)
}

/// A command accepted by [`SimulatedMotorDriver`].
#[derive(Debug, Clone, PartialEq)]
pub enum MotorCommand {
    Initialise,
    Speed(i64),
    Steer { degrees: f64, pulse: Duration },
    Release,
}

#[derive(Debug)]
pub struct SimulatedMotorDriver {
    connected: AtomicBool,
    initialised: AtomicBool,
    commands: Mutex<Vec<MotorCommand>>,
}

impl Default for SimulatedMotorDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedMotorDriver {
    /// A connected, uninitialised driver.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            initialised: AtomicBool::new(false),
            commands: Mutex::new(Vec::new()),
        }
    }

    /// Simulates plugging the controller in or out.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        if !connected {
            self.initialised.store(false, Ordering::SeqCst);
        }
    }

    /// Every command accepted so far, oldest first.
    pub fn commands(&self) -> Vec<MotorCommand> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, command: MotorCommand) {
        debug!("simulated motor: {command:?}");
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command);
    }

    fn ready(&self) -> Result<(), HardwareError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(HardwareError::NotConnected);
        }
        if !self.initialised.load(Ordering::SeqCst) {
            return Err(HardwareError::NotInitialised);
        }
        Ok(())
    }
}

impl MotorDriver for SimulatedMotorDriver {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn initialise(&self) -> Result<(), HardwareError> {
        if !self.is_connected() {
            return Err(HardwareError::NotConnected);
        }
        self.initialised.store(true, Ordering::SeqCst);
        self.record(MotorCommand::Initialise);
        Ok(())
    }

    fn set_speed(&self, speed: i64) -> Result<(), HardwareError> {
        self.ready()?;
        self.record(MotorCommand::Speed(speed));
        Ok(())
    }

    fn set_steering(&self, degrees: f64) -> Result<(), HardwareError> {
        self.ready()?;
        self.record(MotorCommand::Steer {
            degrees,
            pulse: servo_pulse_width(degrees),
        });
        Ok(())
    }

    fn release(&self) -> Result<(), HardwareError> {
        // Releasing a detached controller is a no-op.
        if self.initialised.swap(false, Ordering::SeqCst) {
            self.record(MotorCommand::Release);
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pulse_width_endpoints() {
        assert_eq!(servo_pulse_width(0.0), Duration::from_micros(750));
        assert_eq!(servo_pulse_width(SERVO_MAX_ANGLE), Duration::from_micros(2250));
    }

    #[test]
    fn test_pulse_width_midpoint_is_linear() {
        assert_eq!(servo_pulse_width(70.0), Duration::from_micros(1500));
    }

    #[test]
    fn test_pulse_width_clamps_out_of_range_angles() {
        assert_eq!(servo_pulse_width(-30.0), Duration::from_micros(750));
        assert_eq!(servo_pulse_width(500.0), Duration::from_micros(2250));
        assert_eq!(servo_pulse_width(f64::NAN), Duration::from_micros(750));
    }

    #[test]
    fn test_commands_require_initialise() {
        // Arrange
        let driver = SimulatedMotorDriver::new();

        // Act / Assert
        assert!(matches!(driver.set_speed(10), Err(HardwareError::NotInitialised)));
        driver.initialise().unwrap();
        driver.set_speed(10).unwrap();
        assert_eq!(
            driver.commands(),
            vec![MotorCommand::Initialise, MotorCommand::Speed(10)]
        );
    }

    #[test]
    fn test_steering_records_pulse_width() {
        let driver = SimulatedMotorDriver::new();
        driver.initialise().unwrap();

        driver.set_steering(140.0).unwrap();

        assert_eq!(
            driver.commands().last(),
            Some(&MotorCommand::Steer {
                degrees: 140.0,
                pulse: Duration::from_micros(2250),
            })
        );
    }

    #[test]
    fn test_unplugged_driver_refuses_commands() {
        // Arrange
        let driver = SimulatedMotorDriver::new();
        driver.initialise().unwrap();

        // Act
        driver.set_connected(false);

        // Assert
        assert!(!driver.is_connected());
        assert!(matches!(driver.set_speed(1), Err(HardwareError::NotConnected)));
        assert!(matches!(driver.initialise(), Err(HardwareError::NotConnected)));
    }

    #[test]
    fn test_release_is_recorded_once() {
        let driver = SimulatedMotorDriver::new();
        driver.initialise().unwrap();

        driver.release().unwrap();
        driver.release().unwrap();

        let releases = driver
            .commands()
            .into_iter()
            .filter(|c| *c == MotorCommand::Release)
            .count();
        assert_eq!(releases, 1);
    }
}
