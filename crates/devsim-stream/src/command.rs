//! Command definitions
//!
//! [`Cmd`] binds a pattern to a method, [`Var`] exposes a property through a
//! read pattern and/or a write pattern. Capture groups become positional
//! arguments.

use std::fmt;
use std::sync::Arc;

use devsim_core::{DeviceError, Value};

use crate::pattern::PatternSource;

/// Converts a captured token into an argument value
pub type ArgumentMapping = Arc<dyn Fn(&str) -> Result<Value, DeviceError> + Send + Sync>;

/// Argument mappings for the common types
pub mod mapping {
    use super::*;

    /// Pass the token through as a string
    pub fn string() -> ArgumentMapping {
        Arc::new(|token| Ok(Value::Str(token.to_string())))
    }

    /// Parse a decimal integer
    pub fn int() -> ArgumentMapping {
        Arc::new(|token| {
            token
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| conversion("int", token))
        })
    }

    /// Parse a floating point number
    pub fn float() -> ArgumentMapping {
        Arc::new(|token| {
            token
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| conversion("float", token))
        })
    }

    /// Parse `1`/`0`/`true`/`false`/`on`/`off`, case-insensitive
    pub fn boolean() -> ArgumentMapping {
        Arc::new(|token| match token.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "on" => Ok(Value::Bool(true)),
            "0" | "false" | "off" => Ok(Value::Bool(false)),
            _ => Err(conversion("bool", token)),
        })
    }

    /// Custom mapping
    pub fn custom<F>(f: F) -> ArgumentMapping
    where
        F: Fn(&str) -> Result<Value, DeviceError> + Send + Sync + 'static,
    {
        Arc::new(f)
    }

    fn conversion(expected: &'static str, token: &str) -> DeviceError {
        DeviceError::Conversion {
            expected,
            found: format!("'{}'", token),
        }
    }
}

/// How a result is turned into a reply
#[derive(Clone, Default)]
pub enum ReturnMapping {
    /// Default wire representation; null writes no reply
    #[default]
    Default,
    /// Always reply with this text, whatever the result
    Constant(String),
    /// Custom formatter; `None` writes no reply
    Custom(Arc<dyn Fn(Value) -> Result<Option<String>, DeviceError> + Send + Sync>),
}

impl ReturnMapping {
    /// Custom formatter
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(Value) -> Result<Option<String>, DeviceError> + Send + Sync + 'static,
    {
        ReturnMapping::Custom(Arc::new(f))
    }

    /// Apply to a result
    pub fn apply(&self, value: Value) -> Result<Option<String>, DeviceError> {
        match self {
            ReturnMapping::Default if value.is_null() => Ok(None),
            ReturnMapping::Default => Ok(Some(value.to_string())),
            ReturnMapping::Constant(reply) => Ok(Some(reply.clone())),
            ReturnMapping::Custom(f) => f(value),
        }
    }
}

impl fmt::Debug for ReturnMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnMapping::Default => f.write_str("Default"),
            ReturnMapping::Constant(s) => f.debug_tuple("Constant").field(s).finish(),
            ReturnMapping::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Pattern bound to a method
#[derive(Clone)]
pub struct Cmd {
    pub(crate) member: String,
    pub(crate) pattern: PatternSource,
    pub(crate) argument_mappings: Option<Vec<ArgumentMapping>>,
    pub(crate) return_mapping: ReturnMapping,
    pub(crate) doc: Option<String>,
}

impl Cmd {
    /// Bind a regular expression to `member`
    pub fn new(member: &str, pattern: &str) -> Self {
        Self::with_pattern(member, PatternSource::regex(pattern))
    }

    /// Bind a scanf format to `member`
    pub fn scanf(member: &str, format: &str) -> Self {
        Self::with_pattern(member, PatternSource::scanf(format))
    }

    /// Bind an explicit pattern source
    pub fn with_pattern(member: &str, pattern: PatternSource) -> Self {
        Self {
            member: member.to_string(),
            pattern,
            argument_mappings: None,
            return_mapping: ReturnMapping::Default,
            doc: None,
        }
    }

    /// One mapping per capture group
    pub fn argument_mappings(mut self, mappings: Vec<ArgumentMapping>) -> Self {
        self.argument_mappings = Some(mappings);
        self
    }

    /// Reply formatting
    pub fn return_mapping(mut self, mapping: ReturnMapping) -> Self {
        self.return_mapping = mapping;
        self
    }

    /// Documentation shown in the adapter's documentation
    pub fn doc(mut self, doc: &str) -> Self {
        self.doc = Some(doc.to_string());
        self
    }

    /// Bound member name
    pub fn member(&self) -> &str {
        &self.member
    }
}

impl fmt::Debug for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cmd")
            .field("member", &self.member)
            .field("pattern", &self.pattern.text)
            .finish()
    }
}

/// Property exposed through read and write patterns
#[derive(Clone)]
pub struct Var {
    pub(crate) member: String,
    pub(crate) read_pattern: Option<PatternSource>,
    pub(crate) write_pattern: Option<PatternSource>,
    pub(crate) argument_mapping: Option<ArgumentMapping>,
    pub(crate) return_mapping: ReturnMapping,
    pub(crate) doc: Option<String>,
}

impl Var {
    /// Expose `member`; add at least one pattern
    pub fn new(member: &str) -> Self {
        Self {
            member: member.to_string(),
            read_pattern: None,
            write_pattern: None,
            argument_mapping: None,
            return_mapping: ReturnMapping::Default,
            doc: None,
        }
    }

    /// Regex without groups that reads the property
    pub fn read(mut self, pattern: &str) -> Self {
        self.read_pattern = Some(PatternSource::regex(pattern));
        self
    }

    /// Regex with one group that writes the property
    pub fn write(mut self, pattern: &str) -> Self {
        self.write_pattern = Some(PatternSource::regex(pattern));
        self
    }

    /// scanf format without conversions that reads the property
    pub fn read_scanf(mut self, format: &str) -> Self {
        self.read_pattern = Some(PatternSource::scanf(format));
        self
    }

    /// scanf format with one conversion that writes the property
    pub fn write_scanf(mut self, format: &str) -> Self {
        self.write_pattern = Some(PatternSource::scanf(format));
        self
    }

    /// Mapping for the written value
    pub fn argument_mapping(mut self, mapping: ArgumentMapping) -> Self {
        self.argument_mapping = Some(mapping);
        self
    }

    /// Reply formatting for reads
    pub fn return_mapping(mut self, mapping: ReturnMapping) -> Self {
        self.return_mapping = mapping;
        self
    }

    /// Documentation shown in the adapter's documentation
    pub fn doc(mut self, doc: &str) -> Self {
        self.doc = Some(doc.to_string());
        self
    }
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Var")
            .field("member", &self.member)
            .field("read", &self.read_pattern.as_ref().map(|p| &p.text))
            .field("write", &self.write_pattern.as_ref().map(|p| &p.text))
            .finish()
    }
}

/// A command definition
#[derive(Debug, Clone)]
pub enum Command {
    /// Method call
    Cmd(Cmd),
    /// Property access
    Var(Var),
}

impl From<Cmd> for Command {
    fn from(cmd: Cmd) -> Self {
        Command::Cmd(cmd)
    }
}

impl From<Var> for Command {
    fn from(var: Var) -> Self {
        Command::Var(var)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mappings() {
        assert_eq!(mapping::int()("42").unwrap(), Value::Int(42));
        assert_eq!(mapping::float()("-1.5").unwrap(), Value::Float(-1.5));
        assert_eq!(mapping::boolean()("ON").unwrap(), Value::Bool(true));
        assert!(mapping::int()("4.2").is_err());
        assert!(mapping::boolean()("maybe").is_err());
    }

    #[test]
    fn test_return_mapping() {
        assert_eq!(ReturnMapping::Default.apply(Value::Null).unwrap(), None);
        assert_eq!(
            ReturnMapping::Default.apply(Value::Float(1.0)).unwrap(),
            Some("1.0".to_string())
        );
        assert_eq!(
            ReturnMapping::Constant("OK".into()).apply(Value::Null).unwrap(),
            Some("OK".to_string())
        );
        let hex = ReturnMapping::custom(|v| {
            Ok(v.as_i64().map(|i| format!("{:04X}", i)))
        });
        assert_eq!(hex.apply(Value::Int(255)).unwrap(), Some("00FF".to_string()));
    }
}
