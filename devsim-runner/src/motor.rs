//! Example motor
//!
//! A linear axis moving towards its target at constant speed. It is `idle`
//! while position and target agree and `moving` otherwise; a new target is
//! only accepted while idle.
//!
//! The motor is reachable through all front ends:
//!
//! - stream: `S?` status, `P?` position, `T?` target, `T=<mm>` new target,
//!   `H` halt; `\r\n` terminated
//! - Modbus: see [`registers`]; positions are in units of 0.1 mm
//! - control: the `device` object

use devsim_core::approaches::linear;
use devsim_core::{
    DeviceContext, DeviceError, Handlers, Registry, Setups, State, StateMachine,
    StateMachineDevice, Value,
};
use devsim_modbus::{DataBank, ModbusLayout};
use devsim_stream::{Cmd, ReturnMapping, StreamInterface, Var};
use tracing::{debug, info, warn};

/// Lower end of the travel range in mm
pub const MIN_TARGET: f64 = 0.0;
/// Upper end of the travel range in mm
pub const MAX_TARGET: f64 = 250.0;

/// Modbus addresses
pub mod registers {
    /// Input register: current position
    pub const IR_POSITION: u16 = 0;
    /// Input register: current target
    pub const IR_TARGET: u16 = 1;
    /// Holding register: target setpoint; writes request a new target
    pub const HR_TARGET: u16 = 0;
    /// Discrete input: set while moving
    pub const DI_MOVING: u16 = 0;
    /// Coil: writing 1 halts the motor; cleared by the device
    pub const CO_STOP: u16 = 0;
}

/// The simulated motor
pub type Motor = StateMachineDevice<MotorData>;

/// Motor data operated on by the state machine
#[derive(Debug, Clone)]
pub struct MotorData {
    /// Current position in mm
    pub position: f64,
    target: f64,
    /// Speed in mm/s
    pub speed: f64,
    banks: Option<ModbusLayout>,
    published_target: u16,
}

impl MotorData {
    /// Motor at rest at `position` with `target`, publishing to `banks` if given
    pub fn new(position: f64, target: f64, banks: Option<ModbusLayout>) -> Self {
        let mut data = Self {
            position,
            target,
            speed: 2.0,
            banks,
            published_target: 0,
        };
        data.publish(false);
        data
    }

    /// Current target in mm
    pub fn target(&self) -> f64 {
        self.target
    }

    /// Accept a new target unless moving or out of range
    pub fn set_target(&mut self, moving: bool, target: f64) -> Result<(), DeviceError> {
        if moving {
            return Err(DeviceError::Busy("can not set new target while moving".into()));
        }
        if !(MIN_TARGET..=MAX_TARGET).contains(&target) {
            return Err(DeviceError::LimitViolation(format!(
                "target {} is out of range [{}, {}]",
                target, MIN_TARGET, MAX_TARGET
            )));
        }
        self.target = target;
        Ok(())
    }

    /// Halt at the current position; returns target and position
    pub fn stop(&mut self) -> (f64, f64) {
        self.target = self.position;
        info!("Stopping movement at {} after user request", self.position);
        (self.target, self.position)
    }

    /// Apply requests written by Modbus clients since the last cycle
    fn apply_requests(&mut self, moving: bool) {
        let Some(banks) = self.banks.clone() else {
            return;
        };
        if banks
            .co
            .get_bits(registers::CO_STOP, 1)
            .is_some_and(|bits| bits[0])
        {
            self.stop();
            banks.co.set_bits(registers::CO_STOP, &[false]);
        }
        if let Some(word) = banks.hr.word(registers::HR_TARGET) {
            if word != self.published_target {
                let requested = f64::from(word) / 10.0;
                if let Err(e) = self.set_target(moving, requested) {
                    warn!("Rejected Modbus target {}: {}", requested, e);
                }
            }
        }
    }

    /// Mirror the motor into the Modbus banks
    fn publish(&mut self, moving: bool) {
        let Some(banks) = &self.banks else {
            return;
        };
        let target = tenths(self.target);
        banks.ir.set_word(registers::IR_POSITION, tenths(self.position));
        banks.ir.set_word(registers::IR_TARGET, target);
        banks.hr.set_word(registers::HR_TARGET, target);
        banks.di.set_bits(registers::DI_MOVING, &[moving]);
        self.published_target = target;
    }
}

fn tenths(mm: f64) -> u16 {
    (mm * 10.0).round().clamp(0.0, f64::from(u16::MAX)) as u16
}

struct Moving;

impl State<MotorData> for Moving {
    fn in_state(&mut self, motor: &mut MotorData, dt: f64) -> Result<(), DeviceError> {
        motor.apply_requests(true);
        let old = motor.position;
        motor.position = linear(old, motor.target, motor.speed, dt);
        debug!(
            "Moved position ({} -> {}), target={}, speed={}",
            old, motor.position, motor.target, motor.speed
        );
        motor.publish(true);
        Ok(())
    }
}

fn machine() -> Result<StateMachine<MotorData>, DeviceError> {
    let idle = Handlers::new().in_state(|motor: &mut MotorData, _| {
        motor.apply_requests(false);
        motor.publish(false);
        Ok(())
    });
    Ok(StateMachine::builder("idle")
        .state("idle", idle)
        .state("moving", Moving)
        .transition("idle", "moving", |m: &MotorData| m.position != m.target)
        .transition("moving", "idle", |m: &MotorData| m.position == m.target)
        .build()?)
}

impl DeviceContext for MotorData {
    fn members() -> Registry<Motor> {
        Registry::new("ExampleMotor")
            .read_only("position", |m: &Motor| m.context().position)
            .read_write(
                "target",
                |m: &Motor| m.context().target(),
                |m, target: f64| {
                    let moving = m.state() == "moving";
                    m.context_mut().set_target(moving, target)
                },
            )
            .read_write(
                "speed",
                |m: &Motor| m.context().speed,
                |m, speed: f64| {
                    if !(speed > 0.0 && speed.is_finite()) {
                        return Err(DeviceError::LimitViolation(format!(
                            "speed must be positive, got {}",
                            speed
                        )));
                    }
                    m.context_mut().speed = speed;
                    Ok(())
                },
            )
            .method0("stop", |m: &mut Motor| {
                let (target, position) = m.context_mut().stop();
                Ok(vec![target, position])
            })
    }
}

/// Build a motor in `state` from its data
pub fn build(data: MotorData, state: &str) -> Result<Motor, DeviceError> {
    let mut machine = machine()?;
    machine.override_initial(state)?;
    Ok(Motor::new(data, machine))
}

/// Separate banks for the four Modbus areas
pub fn layout() -> ModbusLayout {
    ModbusLayout::new(
        DataBank::full(0),
        DataBank::full(0),
        DataBank::full(0),
        DataBank::full(0),
    )
}

/// `default` (idle at 0 mm) and `moving` (from 20 mm towards 120 mm)
pub fn setups(banks: ModbusLayout) -> Setups<Motor> {
    let moving_banks = banks.clone();
    Setups::new()
        .with_default(move || build(MotorData::new(0.0, 0.0, Some(banks.clone())), "idle"))
        .with("moving", move || {
            build(MotorData::new(20.0, 120.0, Some(moving_banks.clone())), "moving")
        })
}

/// Telnet-style line protocol
pub fn stream_interface() -> StreamInterface<Motor> {
    let members = Registry::new("ExampleMotorStreamInterface").method1(
        "set_target",
        |m: &mut Motor, target: f64| {
            let moving = m.state() == "moving";
            Ok(match m.context_mut().set_target(moving, target) {
                Ok(()) => format!("T={}", Value::from(target)),
                Err(DeviceError::Busy(_)) => "err: not idle".to_string(),
                Err(_) => "err: not 0<=T<=250".to_string(),
            })
        },
    );

    StreamInterface::new()
        .doc(
            "TCP stream interface of the example motor.\n\n\
             The motor starts moving as soon as a new target is set. A moving \
             motor must be halted before it accepts another target.",
        )
        .members(members)
        .command(Var::new("state").read(r"^S\?$").doc("Status, 'idle' or 'moving'."))
        .command(Var::new("position").read(r"^P\?$").doc("Current position in mm."))
        .command(Var::new("target").read(r"^T\?$").doc("Current target in mm."))
        .command(
            Cmd::scanf("set_target", "T=%f")
                .doc("Set a new target in mm within [0, 250]; replies with the accepted target."),
        )
        .command(
            Cmd::new("stop", r"^H$")
                .return_mapping(ReturnMapping::custom(|value| match value {
                    Value::List(items) if items.len() == 2 => {
                        Ok(Some(format!("T={},P={}", items[0], items[1])))
                    }
                    other => Err(DeviceError::InvalidArgument(format!(
                        "unexpected stop result {}",
                        other
                    ))),
                }))
                .doc("Halt; replies with target and position, which are equal."),
        )
        .in_terminator("\r\n")
        .out_terminator("\r\n")
}
