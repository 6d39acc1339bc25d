//! Fluent construction of regex commands
//!
//! ```rust
//! use devsim_stream::CmdBuilder;
//!
//! // "pres 12.5" -> set_pres(12.5)
//! let cmd = CmdBuilder::new("set_pres").escape("pres ").float().eos().build();
//! assert_eq!(cmd.member(), "set_pres");
//! ```

use crate::command::{mapping, ArgumentMapping, Cmd};
use crate::pattern::PatternSource;

/// Start of text
pub const STX: char = '\x02';
/// End of text
pub const ETX: char = '\x03';
/// End of transmission
pub const EOT: char = '\x04';
/// Enquiry
pub const ENQ: char = '\x05';
/// Acknowledge
pub const ACK: char = '\x06';

const FLOAT_REGEX: &str = r"[+-]?\d+\.?\d*";
const INT_REGEX: &str = r"[+-]?\d+";

/// Builder for a [`Cmd`] with a generated regular expression
pub struct CmdBuilder {
    member: String,
    arg_sep: String,
    current_sep: String,
    ignore: String,
    ignore_case: bool,
    regex: String,
    mappings: Vec<ArgumentMapping>,
}

impl std::fmt::Debug for CmdBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CmdBuilder")
            .field("member", &self.member)
            .field("regex", &self.regex)
            .field("arguments", &self.mappings.len())
            .finish()
    }
}

impl CmdBuilder {
    /// Build a command calling `member`
    pub fn new(member: &str) -> Self {
        Self {
            member: member.to_string(),
            arg_sep: String::new(),
            current_sep: String::new(),
            ignore: String::new(),
            ignore_case: false,
            regex: String::new(),
            mappings: Vec::new(),
        }
    }

    /// Separator inserted between adjacent arguments
    pub fn arg_sep(mut self, sep: &str) -> Self {
        self.arg_sep = regex::escape(sep);
        self
    }

    /// Characters ignored around every element
    pub fn ignore(mut self, chars: &str) -> Self {
        self.ignore = if chars.is_empty() {
            String::new()
        } else {
            format!("[{}]*", regex::escape(chars))
        };
        if self.regex.is_empty() {
            self.regex = self.ignore.clone();
        }
        self
    }

    /// Match case-insensitively
    pub fn ignore_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    fn push(mut self, expr: &str, is_arg: bool) -> Self {
        self.regex.push_str(expr);
        self.regex.push_str(&self.ignore);
        if !is_arg {
            self.current_sep.clear();
        }
        self
    }

    /// Literal text
    pub fn escape(self, text: &str) -> Self {
        self.push(&regex::escape(text), false)
    }

    /// Literal text that may be absent
    pub fn optional(self, text: &str) -> Self {
        self.push(&format!("(?:{})?", regex::escape(text)), false)
    }

    /// Raw regular expression that is not an argument
    pub fn regex(self, expr: &str) -> Self {
        self.push(expr, false)
    }

    /// Any number of spaces, or at least one
    pub fn spaces(self, at_least_one: bool) -> Self {
        self.push(if at_least_one { " +" } else { " *" }, false)
    }

    /// Argument matching `expr`, converted with `mapping`
    pub fn arg_with(mut self, expr: &str, mapping: ArgumentMapping) -> Self {
        let group = format!("{}({})", self.current_sep, expr);
        self.current_sep = self.arg_sep.clone();
        self.mappings.push(mapping);
        self.push(&group, true)
    }

    /// String argument matching `expr`
    pub fn arg(self, expr: &str) -> Self {
        self.arg_with(expr, mapping::string())
    }

    /// One of the given literals, as a string argument
    pub fn enum_of(self, values: &[&str]) -> Self {
        let alternatives: Vec<String> = values.iter().map(|v| regex::escape(v)).collect();
        self.arg(&alternatives.join("|"))
    }

    /// String argument of any length, or exactly `length` characters
    pub fn string(self, length: Option<usize>) -> Self {
        match length {
            Some(n) => self.arg(&format!(".{{{}}}", n)),
            None => self.arg(".+"),
        }
    }

    /// Float argument
    pub fn float(self) -> Self {
        self.arg_with(FLOAT_REGEX, mapping::float())
    }

    /// Match a float without passing it on
    pub fn ignore_float(self) -> Self {
        self.regex(FLOAT_REGEX)
    }

    /// Integer argument
    pub fn int(self) -> Self {
        self.arg_with(INT_REGEX, mapping::int())
    }

    /// Match an integer without passing it on
    pub fn ignore_int(self) -> Self {
        self.regex(INT_REGEX)
    }

    /// Single digit integer argument
    pub fn digit(self) -> Self {
        self.arg_with(r"\d", mapping::int())
    }

    /// Single character argument, optionally excluding some characters
    pub fn char(self, not_chars: Option<&str>) -> Self {
        match not_chars {
            Some(chars) => self.arg(&format!("[^{}]", regex::escape(chars))),
            None => self.arg("."),
        }
    }

    /// Argument matching anything
    pub fn any(self) -> Self {
        self.arg(".*")
    }

    /// Argument matching anything but `c`
    pub fn any_except(self, c: char) -> Self {
        self.arg(&format!("[^{}]*", regex::escape(&c.to_string())))
    }

    /// A character given by its code
    pub fn ascii(self, code: u8) -> Self {
        self.escape(&char::from(code).to_string())
    }

    /// STX control character
    pub fn stx(self) -> Self {
        self.escape(&STX.to_string())
    }

    /// ETX control character
    pub fn etx(self) -> Self {
        self.escape(&ETX.to_string())
    }

    /// EOT control character
    pub fn eot(self) -> Self {
        self.escape(&EOT.to_string())
    }

    /// ENQ control character
    pub fn enq(self) -> Self {
        self.escape(&ENQ.to_string())
    }

    /// ACK control character
    pub fn ack(self) -> Self {
        self.escape(&ACK.to_string())
    }

    /// Require the end of the request
    pub fn eos(mut self) -> Self {
        self.regex.push('$');
        self
    }

    /// Generated regular expression so far
    pub fn pattern(&self) -> &str {
        &self.regex
    }

    /// Finish the command
    pub fn build(self) -> Cmd {
        let mut source = PatternSource::regex(self.regex);
        source.ignore_case = self.ignore_case;
        Cmd::with_pattern(&self.member, source).argument_mappings(self.mappings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devsim_core::Value;

    #[test]
    fn test_float_argument() {
        let b = CmdBuilder::new("set_pres").escape("pres ").float();
        assert_eq!(b.pattern(), r"pres ([+-]?\d+\.?\d*)");
        let cmd = b.build();
        assert_eq!(cmd.argument_mappings.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_separator_between_arguments() {
        let b = CmdBuilder::new("move").arg_sep(",").escape("M").int().int();
        assert_eq!(b.pattern(), r"M([+-]?\d+),([+-]?\d+)");
    }

    #[test]
    fn test_literal_resets_separator() {
        let b = CmdBuilder::new("f").arg_sep(",").int().escape(";").int();
        assert_eq!(b.pattern(), r"([+-]?\d+);([+-]?\d+)");
    }

    #[test]
    fn test_ignore_and_case() {
        let cmd = CmdBuilder::new("get")
            .ignore(" ")
            .escape("get")
            .ignore_case()
            .eos()
            .build();
        let pattern = cmd.pattern.compile().unwrap();
        assert!(pattern.is_match(b"  GET  "));
    }

    #[test]
    fn test_enum_and_control_characters() {
        let cmd = CmdBuilder::new("mode").stx().enum_of(&["A", "B"]).etx().build();
        let pattern = cmd.pattern.compile().unwrap();
        let caps = pattern.captures(b"\x02B\x03").unwrap();
        assert_eq!(caps, vec![Some("B".to_string())]);
        let mappings = cmd.argument_mappings.unwrap();
        assert_eq!(mappings[0]("B").unwrap(), Value::from("B"));
    }
}
