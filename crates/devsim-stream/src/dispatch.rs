//! Command binding and dispatch
//!
//! [`Dispatcher::bind`] resolves every command of a [`StreamInterface`]
//! against the interface members first and the device members second, and
//! validates patterns, arities and mappings up front. A bound dispatcher never
//! fails to find a member at request time.
//!
//! Requests are handled in two steps so the device is only held for the call
//! itself: [`Dispatcher::prepare`] matches the request and converts its
//! arguments, [`Dispatcher::execute`] runs the member and formats the reply.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use devsim_core::{Arity, Device, Member, Registry, SimulationError, SimulationHandle, Value};
use tracing::debug;

use crate::command::{ArgumentMapping, Cmd, Command, ReturnMapping, Var};
use crate::error::{BindingError, StreamError};
use crate::interface::{ErrorHandler, StreamInterface};
use crate::pattern::Pattern;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Call,
    Get,
    Set,
}

struct Binding {
    member: String,
    action: Action,
    pattern: Pattern,
    mappings: Option<Vec<ArgumentMapping>>,
    return_mapping: ReturnMapping,
    doc: Option<String>,
}

impl Binding {
    fn convert(&self, index: usize, token: Option<String>) -> Result<Value, StreamError> {
        let Some(token) = token else {
            return Ok(Value::Null);
        };
        let explicit = self.mappings.as_ref().and_then(|m| m.get(index));
        let result = match (explicit, self.pattern.conversion(index)) {
            (Some(mapping), _) => mapping(&token),
            (None, Some(conversion)) => conversion.apply(&token),
            (None, None) => Ok(Value::Str(token)),
        };
        result.map_err(|source| StreamError::Argument { index, source })
    }
}

/// A matched request with converted arguments
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCall {
    binding: usize,
    args: Vec<Value>,
}

impl PreparedCall {
    /// Converted arguments
    pub fn args(&self) -> &[Value] {
        &self.args
    }
}

/// Bound command table for devices of type `D`
pub struct Dispatcher<D: Device> {
    registry: Registry<D>,
    bindings: Vec<Binding>,
    error_handler: ErrorHandler,
}

impl<D: Device> fmt::Debug for Dispatcher<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let patterns: Vec<&str> = self
            .bindings
            .iter()
            .map(|b| b.pattern.source().text.as_str())
            .collect();
        f.debug_struct("Dispatcher")
            .field("patterns", &patterns)
            .finish()
    }
}

impl<D: Device> Dispatcher<D> {
    /// Resolve and validate all commands of `interface`
    pub fn bind(interface: &StreamInterface<D>) -> Result<Self, BindingError> {
        // Interface members are inserted last and therefore shadow device members
        let registry = D::members().extend(interface.members.clone());

        let mut bindings = Vec::new();
        for command in &interface.commands {
            match command {
                Command::Cmd(cmd) => bindings.push(bind_cmd(&registry, cmd)?),
                Command::Var(var) => bindings.extend(bind_var(&registry, var)?),
            }
        }

        let mut seen = HashSet::new();
        for binding in &bindings {
            let text = &binding.pattern.source().text;
            if !seen.insert(text.clone()) {
                return Err(BindingError::DuplicatePattern(text.clone()));
            }
        }

        debug!(
            "Bound {} stream pattern(s) for {}",
            bindings.len(),
            registry.class()
        );
        Ok(Self {
            registry,
            bindings,
            error_handler: interface.error_handler.clone(),
        })
    }

    /// Match a request against the bound patterns in order and convert its arguments
    pub fn prepare(&self, request: &[u8]) -> Result<PreparedCall, StreamError> {
        for (index, binding) in self.bindings.iter().enumerate() {
            let Some(tokens) = binding.pattern.captures(request) else {
                continue;
            };
            let args = tokens
                .into_iter()
                .enumerate()
                .map(|(i, token)| binding.convert(i, token))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(PreparedCall {
                binding: index,
                args,
            });
        }
        Err(StreamError::UnknownCommand(
            String::from_utf8_lossy(request).into_owned(),
        ))
    }

    /// Run a prepared call on the device; `Ok(None)` means no reply
    pub fn execute(&self, device: &mut D, call: PreparedCall) -> Result<Option<String>, StreamError> {
        let binding = self
            .bindings
            .get(call.binding)
            .ok_or_else(|| StreamError::UnknownCommand(format!("#{}", call.binding)))?;

        match binding.action {
            Action::Call => {
                let value = self.registry.call(device, &binding.member, call.args)?;
                binding.return_mapping.apply(value).map_err(StreamError::Reply)
            }
            Action::Get => {
                let value = self.registry.get(device, &binding.member)?;
                binding.return_mapping.apply(value).map_err(StreamError::Reply)
            }
            Action::Set => {
                let value = call.args.into_iter().next().unwrap_or_default();
                self.registry.set(device, &binding.member, value)?;
                Ok(None)
            }
        }
    }

    /// Reply for a failed request, as decided by the error handler
    pub fn handle_error(&self, request: &[u8], error: &StreamError) -> Option<String> {
        debug!(
            "Request {:?} failed: {}",
            String::from_utf8_lossy(request),
            error
        );
        (self.error_handler)(request, error)
    }

    /// Prepare and execute in one go, routing errors through the error handler
    pub fn process(&self, device: &mut D, request: &[u8]) -> Option<String> {
        match self
            .prepare(request)
            .and_then(|call| self.execute(device, call))
        {
            Ok(reply) => reply,
            Err(e) => self.handle_error(request, &e),
        }
    }

    /// Bound patterns with their member and documentation, in matching order
    pub fn describe(&self) -> Vec<(String, String, Option<String>)> {
        self.bindings
            .iter()
            .map(|b| {
                (
                    b.pattern.source().text.clone(),
                    b.member.clone(),
                    b.doc.clone(),
                )
            })
            .collect()
    }
}

/// Handle one request against a running simulation
///
/// Matching and argument conversion happen on the caller's task; only the
/// member call runs on the simulation. Request errors are turned into replies
/// by the error handler, so the only error left is a stopped simulation.
pub async fn dispatch<D: Device>(
    dispatcher: &Arc<Dispatcher<D>>,
    simulation: &SimulationHandle<D>,
    request: &[u8],
) -> Result<Option<String>, SimulationError> {
    let result = match dispatcher.prepare(request) {
        Ok(call) => {
            let bound = Arc::clone(dispatcher);
            simulation
                .with_device(move |device| bound.execute(device, call))
                .await?
        }
        Err(e) => Err(e),
    };
    Ok(match result {
        Ok(reply) => reply,
        Err(e) => dispatcher.handle_error(request, &e),
    })
}

fn check_mappings(pattern: &Pattern, mappings: Option<usize>) -> Result<(), BindingError> {
    match mappings {
        Some(count) if count != pattern.groups() => Err(BindingError::MappingCount {
            pattern: pattern.source().text.clone(),
            groups: pattern.groups(),
            mappings: count,
        }),
        _ => Ok(()),
    }
}

fn check_groups(pattern: &Pattern, member: &str, arity: Arity) -> Result<(), BindingError> {
    if arity.accepts(pattern.groups()) {
        Ok(())
    } else {
        Err(BindingError::ArityMismatch {
            member: member.to_string(),
            pattern: pattern.source().text.clone(),
            groups: pattern.groups(),
            arity,
        })
    }
}

fn bind_cmd<D>(registry: &Registry<D>, cmd: &Cmd) -> Result<Binding, BindingError> {
    let pattern = cmd.pattern.compile()?;
    match registry.member(&cmd.member) {
        None => return Err(BindingError::UnknownMember(cmd.member.clone())),
        Some(Member::Property(_)) => return Err(BindingError::NotAMethod(cmd.member.clone())),
        Some(Member::Method(method)) => check_groups(&pattern, &cmd.member, method.arity())?,
    }
    check_mappings(&pattern, cmd.argument_mappings.as_ref().map(Vec::len))?;

    Ok(Binding {
        member: cmd.member.clone(),
        action: Action::Call,
        pattern,
        mappings: cmd.argument_mappings.clone(),
        return_mapping: cmd.return_mapping.clone(),
        doc: cmd.doc.clone(),
    })
}

fn bind_var<D>(registry: &Registry<D>, var: &Var) -> Result<Vec<Binding>, BindingError> {
    let writable = match registry.member(&var.member) {
        None => return Err(BindingError::UnknownMember(var.member.clone())),
        Some(Member::Method(_)) => return Err(BindingError::NotAProperty(var.member.clone())),
        Some(Member::Property(property)) => property.is_writable(),
    };
    if var.read_pattern.is_none() && var.write_pattern.is_none() {
        return Err(BindingError::EmptyVar(var.member.clone()));
    }

    let mut bindings = Vec::new();
    if let Some(source) = &var.read_pattern {
        let pattern = source.compile()?;
        check_groups(&pattern, &var.member, Arity::Exact(0))?;
        bindings.push(Binding {
            member: var.member.clone(),
            action: Action::Get,
            pattern,
            mappings: None,
            return_mapping: var.return_mapping.clone(),
            doc: var.doc.clone(),
        });
    }
    if let Some(source) = &var.write_pattern {
        if !writable {
            return Err(BindingError::ReadOnly(var.member.clone()));
        }
        let pattern = source.compile()?;
        check_groups(&pattern, &var.member, Arity::Exact(1))?;
        bindings.push(Binding {
            member: var.member.clone(),
            action: Action::Set,
            pattern,
            mappings: var.argument_mapping.clone().map(|m| vec![m]),
            return_mapping: ReturnMapping::Default,
            doc: var.doc.clone(),
        });
    }
    Ok(bindings)
}
