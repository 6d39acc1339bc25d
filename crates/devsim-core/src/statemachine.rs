//! Cycle-driven finite state machine
//!
//! A [`StateMachine`] owns a set of named states and an ordered list of
//! transition rules. It does not own the data it operates on: the device
//! context is passed into every callback, so a state handler can mutate the
//! device and a transition condition can inspect it.
//!
//! Each [`StateMachine::tick`] performs at most one transition and fires
//! exactly one `in_state` event, always last:
//!
//! - first tick: `on_entry(initial)`, `in_state(initial)`, both with `dt = 0`
//! - transitioning tick: `on_exit(old)`, `on_entry(new)`, `in_state(new)`
//! - otherwise: `in_state(current)`
//!
//! Rules whose source is the current state are evaluated in definition order;
//! the first satisfied condition wins.
//!
//! # Example
//!
//! ```rust
//! use devsim_core::statemachine::{Handlers, StateMachine};
//!
//! struct Tank {
//!     level: f64,
//! }
//!
//! let mut machine = StateMachine::builder("filling")
//!     .state(
//!         "filling",
//!         Handlers::new().in_state(|tank: &mut Tank, dt| {
//!             tank.level += dt;
//!             Ok(())
//!         }),
//!     )
//!     .state("full", Handlers::new())
//!     .transition("filling", "full", |tank: &Tank| tank.level >= 1.0)
//!     .build()
//!     .unwrap();
//!
//! let mut tank = Tank { level: 0.0 };
//! machine.tick(&mut tank, 0.0).unwrap();
//! machine.tick(&mut tank, 1.0).unwrap();
//! machine.tick(&mut tank, 0.1).unwrap();
//! assert_eq!(machine.state(), "full");
//! ```

use std::collections::BTreeMap;

use tracing::debug;

use crate::device::Device;
use crate::error::{DeviceError, StateEvent, StateMachineError};
use crate::registry::Registry;

/// Event handlers of one state
///
/// All events default to doing nothing.
pub trait State<C>: Send {
    /// Called when the machine enters this state
    fn on_entry(&mut self, ctx: &mut C, dt: f64) -> Result<(), DeviceError> {
        let _ = (ctx, dt);
        Ok(())
    }

    /// Called once per cycle while the machine is in this state
    fn in_state(&mut self, ctx: &mut C, dt: f64) -> Result<(), DeviceError> {
        let _ = (ctx, dt);
        Ok(())
    }

    /// Called when the machine leaves this state
    fn on_exit(&mut self, ctx: &mut C, dt: f64) -> Result<(), DeviceError> {
        let _ = (ctx, dt);
        Ok(())
    }
}

type Callback<C> = Box<dyn FnMut(&mut C, f64) -> Result<(), DeviceError> + Send>;

/// Transition condition
pub type Condition<C> = Box<dyn FnMut(&C) -> Result<bool, DeviceError> + Send>;

/// A [`State`] assembled from closures
pub struct Handlers<C> {
    on_entry: Option<Callback<C>>,
    in_state: Option<Callback<C>>,
    on_exit: Option<Callback<C>>,
}

impl<C> Default for Handlers<C> {
    fn default() -> Self {
        Self {
            on_entry: None,
            in_state: None,
            on_exit: None,
        }
    }
}

impl<C> Handlers<C> {
    /// State without handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `on_entry` handler
    pub fn on_entry<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut C, f64) -> Result<(), DeviceError> + Send + 'static,
    {
        self.on_entry = Some(Box::new(f));
        self
    }

    /// Set the `in_state` handler
    pub fn in_state<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut C, f64) -> Result<(), DeviceError> + Send + 'static,
    {
        self.in_state = Some(Box::new(f));
        self
    }

    /// Set the `on_exit` handler
    pub fn on_exit<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut C, f64) -> Result<(), DeviceError> + Send + 'static,
    {
        self.on_exit = Some(Box::new(f));
        self
    }
}

fn run<C>(cb: &mut Option<Callback<C>>, ctx: &mut C, dt: f64) -> Result<(), DeviceError> {
    match cb {
        Some(f) => f(ctx, dt),
        None => Ok(()),
    }
}

impl<C> State<C> for Handlers<C> {
    fn on_entry(&mut self, ctx: &mut C, dt: f64) -> Result<(), DeviceError> {
        run(&mut self.on_entry, ctx, dt)
    }

    fn in_state(&mut self, ctx: &mut C, dt: f64) -> Result<(), DeviceError> {
        run(&mut self.in_state, ctx, dt)
    }

    fn on_exit(&mut self, ctx: &mut C, dt: f64) -> Result<(), DeviceError> {
        run(&mut self.on_exit, ctx, dt)
    }
}

struct Transition<C> {
    from: String,
    to: String,
    condition: Condition<C>,
}

fn push_transition<C>(transitions: &mut Vec<Transition<C>>, transition: Transition<C>) {
    transitions.retain(|t| !(t.from == transition.from && t.to == transition.to));
    transitions.push(transition);
}

/// Builder for [`StateMachine`]
pub struct StateMachineBuilder<C> {
    initial: String,
    states: Vec<(String, Box<dyn State<C>>)>,
    transitions: Vec<Transition<C>>,
}

impl<C: 'static> StateMachineBuilder<C> {
    /// Declare a state
    pub fn state(mut self, name: &str, handler: impl State<C> + 'static) -> Self {
        self.states.push((name.to_string(), Box::new(handler)));
        self
    }

    /// Add a transition rule with an infallible condition
    ///
    /// Redefining an existing `(from, to)` pair replaces the earlier rule and
    /// moves it to the end of the evaluation order.
    pub fn transition<F>(self, from: &str, to: &str, mut condition: F) -> Self
    where
        F: FnMut(&C) -> bool + Send + 'static,
    {
        self.try_transition(from, to, move |ctx| Ok(condition(ctx)))
    }

    /// Add a transition rule whose condition may fail
    pub fn try_transition<F>(mut self, from: &str, to: &str, condition: F) -> Self
    where
        F: FnMut(&C) -> Result<bool, DeviceError> + Send + 'static,
    {
        push_transition(
            &mut self.transitions,
            Transition {
                from: from.to_string(),
                to: to.to_string(),
                condition: Box::new(condition),
            },
        );
        self
    }

    /// Validate and build the machine
    pub fn build(self) -> Result<StateMachine<C>, StateMachineError> {
        let mut states = BTreeMap::new();
        for (name, handler) in self.states {
            if states.insert(name.clone(), handler).is_some() {
                return Err(StateMachineError::DuplicateState(name));
            }
        }

        let known = |name: &str, role: &'static str| {
            if states.contains_key(name) {
                Ok(())
            } else {
                Err(StateMachineError::UnknownState {
                    name: name.to_string(),
                    role,
                })
            }
        };

        known(&self.initial, "initial state")?;
        for t in &self.transitions {
            known(&t.from, "transition source")?;
            known(&t.to, "transition target")?;
        }

        Ok(StateMachine {
            states,
            transitions: self.transitions,
            initial: self.initial,
            current: None,
        })
    }
}

/// Finite state machine operating on a context `C`
pub struct StateMachine<C> {
    states: BTreeMap<String, Box<dyn State<C>>>,
    transitions: Vec<Transition<C>>,
    initial: String,
    current: Option<String>,
}

impl<C: 'static> StateMachine<C> {
    /// Start building a machine with the given initial state
    pub fn builder(initial: &str) -> StateMachineBuilder<C> {
        StateMachineBuilder {
            initial: initial.to_string(),
            states: Vec::new(),
            transitions: Vec::new(),
        }
    }

    /// Current state, or the initial state before the first tick
    pub fn state(&self) -> &str {
        self.current.as_deref().unwrap_or(&self.initial)
    }

    /// Whether the initial state has been entered
    pub fn is_started(&self) -> bool {
        self.current.is_some()
    }

    /// Names of all declared states, sorted
    pub fn states(&self) -> Vec<String> {
        self.states.keys().cloned().collect()
    }

    /// Whether `target` is reachable with a single rule from the current state
    ///
    /// Before the first tick only the initial state is reachable.
    pub fn can(&self, target: &str) -> bool {
        match &self.current {
            None => target == self.initial,
            Some(current) => self
                .transitions
                .iter()
                .any(|t| &t.from == current && t.to == target),
        }
    }

    /// Forget the current state; the next tick re-enters the initial state
    pub fn reset(&mut self) {
        self.current = None;
    }

    /// Replace the initial state (only meaningful before the first tick)
    pub fn override_initial(&mut self, name: &str) -> Result<(), StateMachineError> {
        if !self.states.contains_key(name) {
            return Err(StateMachineError::UnknownState {
                name: name.to_string(),
                role: "initial state override",
            });
        }
        self.initial = name.to_string();
        Ok(())
    }

    /// Replace the handlers of an existing state
    pub fn override_state(
        &mut self,
        name: &str,
        handler: impl State<C> + 'static,
    ) -> Result<(), StateMachineError> {
        match self.states.get_mut(name) {
            Some(slot) => {
                *slot = Box::new(handler);
                Ok(())
            }
            None => Err(StateMachineError::UnknownState {
                name: name.to_string(),
                role: "state override",
            }),
        }
    }

    /// Replace the condition of an existing transition, keeping its position
    pub fn override_transition<F>(
        &mut self,
        from: &str,
        to: &str,
        mut condition: F,
    ) -> Result<(), StateMachineError>
    where
        F: FnMut(&C) -> bool + Send + 'static,
    {
        match self
            .transitions
            .iter_mut()
            .find(|t| t.from == from && t.to == to)
        {
            Some(t) => {
                t.condition = Box::new(move |ctx| Ok(condition(ctx)));
                Ok(())
            }
            None => Err(StateMachineError::UnknownTransition {
                from: from.to_string(),
                to: to.to_string(),
            }),
        }
    }

    /// Process one cycle
    pub fn tick(&mut self, ctx: &mut C, dt: f64) -> Result<(), StateMachineError> {
        let current = match self.current.clone() {
            Some(current) => current,
            None => {
                let initial = self.initial.clone();
                debug!("Entering initial state '{}'", initial);
                self.current = Some(initial.clone());
                self.raise(&initial, StateEvent::OnEntry, ctx, 0.0)?;
                return self.raise(&initial, StateEvent::InState, ctx, 0.0);
            }
        };

        let mut target = None;
        for t in self.transitions.iter_mut().filter(|t| t.from == current) {
            let fire = (t.condition)(ctx).map_err(|source| StateMachineError::Callback {
                state: current.clone(),
                event: StateEvent::Transition,
                source,
            })?;
            if fire {
                target = Some(t.to.clone());
                break;
            }
        }

        match target {
            Some(next) => {
                debug!("Transition '{}' -> '{}'", current, next);
                self.raise(&current, StateEvent::OnExit, ctx, dt)?;
                self.current = Some(next.clone());
                self.raise(&next, StateEvent::OnEntry, ctx, dt)?;
                self.raise(&next, StateEvent::InState, ctx, dt)
            }
            None => self.raise(&current, StateEvent::InState, ctx, dt),
        }
    }

    fn raise(
        &mut self,
        name: &str,
        event: StateEvent,
        ctx: &mut C,
        dt: f64,
    ) -> Result<(), StateMachineError> {
        let state = self
            .states
            .get_mut(name)
            .ok_or_else(|| StateMachineError::UnknownState {
                name: name.to_string(),
                role: "current state",
            })?;
        let result = match event {
            StateEvent::OnEntry => state.on_entry(ctx, dt),
            StateEvent::InState => state.in_state(ctx, dt),
            StateEvent::OnExit => state.on_exit(ctx, dt),
            StateEvent::Transition => Ok(()),
        };
        result.map_err(|source| StateMachineError::Callback {
            state: name.to_string(),
            event,
            source,
        })
    }
}

/// Device data driven by a [`StateMachine`]
pub trait DeviceContext: Send + Sized + 'static {
    /// Members exposed by the device
    ///
    /// A read-only `state` property is added unless the context defines one.
    fn members() -> Registry<StateMachineDevice<Self>>;
}

/// A device made of a context and the state machine operating on it
pub struct StateMachineDevice<C> {
    context: C,
    machine: StateMachine<C>,
}

impl<C: 'static> StateMachineDevice<C> {
    /// Pair a context with its machine
    pub fn new(context: C, machine: StateMachine<C>) -> Self {
        Self { context, machine }
    }

    /// Device data
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Mutable device data
    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    /// The state machine
    pub fn machine(&self) -> &StateMachine<C> {
        &self.machine
    }

    /// Mutable state machine, for applying overrides at construction
    pub fn machine_mut(&mut self) -> &mut StateMachine<C> {
        &mut self.machine
    }

    /// Current state name
    pub fn state(&self) -> &str {
        self.machine.state()
    }
}

impl<C: DeviceContext> Device for StateMachineDevice<C> {
    fn members() -> Registry<Self> {
        let members = C::members();
        if members.contains("state") {
            members
        } else {
            members.read_only("state", |d: &Self| d.state().to_string())
        }
    }

    fn process(&mut self, dt: f64) -> Result<(), DeviceError> {
        self.machine
            .tick(&mut self.context, dt)
            .map_err(DeviceError::from)
    }
}
