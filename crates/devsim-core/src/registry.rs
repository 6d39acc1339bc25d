//! Member tables
//!
//! A [`Registry`] is the explicit, startup-built list of the members a type
//! exposes to the outside world. Protocol front ends and the control plane look
//! members up by name here instead of reflecting on the type at runtime.
//!
//! ```rust
//! use devsim_core::{DeviceError, Registry, Value};
//!
//! struct Heater {
//!     power: f64,
//! }
//!
//! let registry = Registry::<Heater>::new("Heater")
//!     .read_write(
//!         "power",
//!         |h| h.power,
//!         |h, p: f64| {
//!             h.power = p;
//!             Ok(())
//!         },
//!     )
//!     .method0("off", |h| {
//!         h.power = 0.0;
//!         Ok(())
//!     });
//!
//! let mut heater = Heater { power: 0.0 };
//! registry.set(&mut heater, "power", Value::Float(2.5)).unwrap();
//! assert_eq!(registry.get(&heater, "power").unwrap(), Value::Float(2.5));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::error::{DeviceError, MemberError};
use crate::value::{FromValue, Value};

/// Property getter
pub type Getter<T> = Arc<dyn Fn(&T) -> Result<Value, DeviceError> + Send + Sync>;
/// Property setter
pub type Setter<T> = Arc<dyn Fn(&mut T, Value) -> Result<(), DeviceError> + Send + Sync>;
/// Method invoker, receives the positional arguments
pub type Invoker<T> = Arc<dyn Fn(&mut T, Vec<Value>) -> Result<Value, DeviceError> + Send + Sync>;

/// Number of positional arguments a method accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this many arguments
    Exact(usize),
    /// Any number of arguments
    Variadic,
}

impl Arity {
    /// Check an argument count
    pub fn accepts(&self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => *n == count,
            Arity::Variadic => true,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{}", n),
            Arity::Variadic => f.write_str("*"),
        }
    }
}

/// A readable (and possibly writable) attribute
pub struct Property<T> {
    getter: Getter<T>,
    setter: Option<Setter<T>>,
}

impl<T> Property<T> {
    /// Whether the property has a setter
    pub fn is_writable(&self) -> bool {
        self.setter.is_some()
    }
}

impl<T> Clone for Property<T> {
    fn clone(&self) -> Self {
        Self {
            getter: Arc::clone(&self.getter),
            setter: self.setter.clone(),
        }
    }
}

/// A callable operation
pub struct Method<T> {
    arity: Arity,
    invoker: Invoker<T>,
}

impl<T> Method<T> {
    /// Accepted argument count
    pub fn arity(&self) -> Arity {
        self.arity
    }
}

impl<T> Clone for Method<T> {
    fn clone(&self) -> Self {
        Self {
            arity: self.arity,
            invoker: Arc::clone(&self.invoker),
        }
    }
}

/// A registered member
pub enum Member<T> {
    /// Attribute with getter and optional setter
    Property(Property<T>),
    /// Operation with positional arguments
    Method(Method<T>),
}

impl<T> Clone for Member<T> {
    fn clone(&self) -> Self {
        match self {
            Member::Property(p) => Member::Property(p.clone()),
            Member::Method(m) => Member::Method(m.clone()),
        }
    }
}

impl<T> fmt::Debug for Member<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Member::Property(p) => f
                .debug_struct("Property")
                .field("writable", &p.is_writable())
                .finish(),
            Member::Method(m) => f.debug_struct("Method").field("arity", &m.arity).finish(),
        }
    }
}

/// Name → member table for type `T`
pub struct Registry<T> {
    class: String,
    members: BTreeMap<String, Member<T>>,
}

impl<T> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self {
            class: self.class.clone(),
            members: self.members.clone(),
        }
    }
}

impl<T> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("class", &self.class)
            .field("members", &self.members)
            .finish()
    }
}

impl<T: 'static> Registry<T> {
    /// Create an empty registry; `class` is reported by API listings
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            members: BTreeMap::new(),
        }
    }

    fn insert(mut self, name: &str, member: Member<T>) -> Self {
        if self.members.insert(name.to_string(), member).is_some() {
            warn!("{}: member '{}' registered twice, keeping the last one", self.class, name);
        }
        self
    }

    /// Register a read-only property
    pub fn read_only<V, G>(self, name: &str, get: G) -> Self
    where
        V: Into<Value>,
        G: Fn(&T) -> V + Send + Sync + 'static,
    {
        let getter: Getter<T> = Arc::new(move |t| Ok(get(t).into()));
        self.insert(name, Member::Property(Property { getter, setter: None }))
    }

    /// Register a read-write property; the setter receives a typed value
    pub fn read_write<V, A, G, S>(self, name: &str, get: G, set: S) -> Self
    where
        V: Into<Value>,
        A: FromValue,
        G: Fn(&T) -> V + Send + Sync + 'static,
        S: Fn(&mut T, A) -> Result<(), DeviceError> + Send + Sync + 'static,
    {
        let getter: Getter<T> = Arc::new(move |t| Ok(get(t).into()));
        let setter: Setter<T> = Arc::new(move |t, v| set(t, A::from_value(v)?));
        self.insert(
            name,
            Member::Property(Property {
                getter,
                setter: Some(setter),
            }),
        )
    }

    /// Register a property from raw getter and setter closures
    pub fn property(self, name: &str, getter: Getter<T>, setter: Option<Setter<T>>) -> Self {
        self.insert(name, Member::Property(Property { getter, setter }))
    }

    /// Register a method taking raw positional arguments
    pub fn method<F>(self, name: &str, arity: Arity, f: F) -> Self
    where
        F: Fn(&mut T, Vec<Value>) -> Result<Value, DeviceError> + Send + Sync + 'static,
    {
        let invoker: Invoker<T> = Arc::new(f);
        self.insert(name, Member::Method(Method { arity, invoker }))
    }

    /// Register a method without arguments
    pub fn method0<R, F>(self, name: &str, f: F) -> Self
    where
        R: Into<Value>,
        F: Fn(&mut T) -> Result<R, DeviceError> + Send + Sync + 'static,
    {
        self.method(name, Arity::Exact(0), move |t, _| f(t).map(Into::into))
    }

    /// Register a method with one typed argument
    pub fn method1<A, R, F>(self, name: &str, f: F) -> Self
    where
        A: FromValue,
        R: Into<Value>,
        F: Fn(&mut T, A) -> Result<R, DeviceError> + Send + Sync + 'static,
    {
        self.method(name, Arity::Exact(1), move |t, args| {
            let mut args = args.into_iter();
            let a = A::from_value(args.next().unwrap_or_default())?;
            f(t, a).map(Into::into)
        })
    }

    /// Register a method with two typed arguments
    pub fn method2<A, B, R, F>(self, name: &str, f: F) -> Self
    where
        A: FromValue,
        B: FromValue,
        R: Into<Value>,
        F: Fn(&mut T, A, B) -> Result<R, DeviceError> + Send + Sync + 'static,
    {
        self.method(name, Arity::Exact(2), move |t, args| {
            let mut args = args.into_iter();
            let a = A::from_value(args.next().unwrap_or_default())?;
            let b = B::from_value(args.next().unwrap_or_default())?;
            f(t, a, b).map(Into::into)
        })
    }

    /// Merge another registry's members into this one (later wins)
    pub fn extend(mut self, other: Registry<T>) -> Self {
        self.members.extend(other.members);
        self
    }
}

impl<T> Registry<T> {
    /// Class name reported by listings
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Look up a member
    pub fn member(&self, name: &str) -> Option<&Member<T>> {
        self.members.get(name)
    }

    /// Whether a member with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    /// All member names, sorted
    pub fn names(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    /// API listing: methods by name, properties as `name:get` / `name:set`
    pub fn api(&self) -> Vec<String> {
        let mut api = Vec::new();
        for (name, member) in &self.members {
            match member {
                Member::Method(_) => api.push(name.clone()),
                Member::Property(p) => {
                    api.push(format!("{}:get", name));
                    if p.is_writable() {
                        api.push(format!("{}:set", name));
                    }
                }
            }
        }
        api
    }

    /// Read a property
    pub fn get(&self, target: &T, name: &str) -> Result<Value, MemberError> {
        match self.members.get(name) {
            Some(Member::Property(p)) => (p.getter)(target).map_err(|source| MemberError::Device {
                name: name.to_string(),
                source,
            }),
            Some(Member::Method(_)) => Err(MemberError::NotAProperty(name.to_string())),
            None => Err(MemberError::Unknown(name.to_string())),
        }
    }

    /// Write a property
    pub fn set(&self, target: &mut T, name: &str, value: Value) -> Result<(), MemberError> {
        match self.members.get(name) {
            Some(Member::Property(Property {
                setter: Some(setter),
                ..
            })) => setter(target, value).map_err(|source| MemberError::Device {
                name: name.to_string(),
                source,
            }),
            Some(Member::Property(_)) => Err(MemberError::ReadOnly(name.to_string())),
            Some(Member::Method(_)) => Err(MemberError::NotAProperty(name.to_string())),
            None => Err(MemberError::Unknown(name.to_string())),
        }
    }

    /// Call a method with positional arguments
    pub fn call(&self, target: &mut T, name: &str, args: Vec<Value>) -> Result<Value, MemberError> {
        match self.members.get(name) {
            Some(Member::Method(m)) => {
                if let Arity::Exact(expected) = m.arity {
                    if expected != args.len() {
                        return Err(MemberError::Arity {
                            name: name.to_string(),
                            expected,
                            given: args.len(),
                        });
                    }
                }
                (m.invoker)(target, args).map_err(|source| MemberError::Device {
                    name: name.to_string(),
                    source,
                })
            }
            Some(Member::Property(_)) => Err(MemberError::NotAMethod(name.to_string())),
            None => Err(MemberError::Unknown(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        count: i64,
        label: String,
    }

    fn registry() -> Registry<Counter> {
        Registry::new("Counter")
            .read_only("count", |c: &Counter| c.count)
            .read_write("label", |c: &Counter| c.label.clone(), |c, l: String| {
                c.label = l;
                Ok(())
            })
            .method1("add", |c: &mut Counter, n: i64| {
                if n < 0 {
                    return Err(DeviceError::InvalidArgument("negative".into()));
                }
                c.count += n;
                Ok(c.count)
            })
            .method0("reset", |c: &mut Counter| {
                c.count = 0;
                Ok(())
            })
    }

    #[test]
    fn test_property_access() {
        let reg = registry();
        let mut c = Counter::default();
        reg.set(&mut c, "label", Value::from("x")).unwrap();
        assert_eq!(reg.get(&c, "label").unwrap(), Value::from("x"));
        assert_eq!(
            reg.set(&mut c, "count", Value::Int(1)),
            Err(MemberError::ReadOnly("count".into()))
        );
    }

    #[test]
    fn test_method_call() {
        let reg = registry();
        let mut c = Counter::default();
        assert_eq!(reg.call(&mut c, "add", vec![Value::Int(5)]).unwrap(), Value::Int(5));
        assert_eq!(reg.call(&mut c, "reset", vec![]).unwrap(), Value::Null);
        assert_eq!(c.count, 0);
    }

    #[test]
    fn test_arity_checked() {
        let reg = registry();
        let mut c = Counter::default();
        let err = reg.call(&mut c, "add", vec![]).unwrap_err();
        assert_eq!(
            err,
            MemberError::Arity {
                name: "add".into(),
                expected: 1,
                given: 0
            }
        );
    }

    #[test]
    fn test_errors_carry_member_name() {
        let reg = registry();
        let mut c = Counter::default();
        let err = reg.call(&mut c, "add", vec![Value::Int(-1)]).unwrap_err();
        assert!(matches!(err, MemberError::Device { ref name, .. } if name == "add"));
        let err = reg.call(&mut c, "add", vec![Value::from("one")]).unwrap_err();
        assert!(matches!(
            err,
            MemberError::Device {
                source: DeviceError::Conversion { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_kind_mismatch() {
        let reg = registry();
        let mut c = Counter::default();
        assert!(matches!(reg.get(&c, "reset"), Err(MemberError::NotAProperty(_))));
        assert!(matches!(reg.call(&mut c, "count", vec![]), Err(MemberError::NotAMethod(_))));
        assert!(matches!(reg.get(&c, "missing"), Err(MemberError::Unknown(_))));
    }

    #[test]
    fn test_api_listing() {
        let reg = registry();
        assert_eq!(
            reg.api(),
            vec!["add", "count:get", "label:get", "label:set", "reset"]
        );
        assert_eq!(reg.names(), vec!["add", "count", "label", "reset"]);
    }
}
