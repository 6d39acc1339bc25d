//! Command patterns
//!
//! Commands are matched either with a regular expression or with a
//! scanf-style format. Both compile to a [`regex::bytes::Regex`]:
//!
//! - regex patterns are anchored at the start of the request only, so
//!   `S\?` also matches `S?x` unless the pattern ends with `$`
//! - scanf formats are anchored at both ends and carry the conversion type
//!   of every capture, so `%d` arrives at the device as an integer
//!
//! Supported scanf conversions: `%d %i %u %x %X %o %f %e %g %E %G %s %c %%`,
//! with an optional `*` (match but do not capture) and a field width.

use std::fmt;

use devsim_core::{DeviceError, Value};
use regex::bytes::{Regex, RegexBuilder};

use crate::error::BindingError;

/// How a pattern source is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    /// Regular expression
    Regex,
    /// scanf-style format
    Scanf,
}

/// Uncompiled pattern as written in a command definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternSource {
    /// Pattern text
    pub text: String,
    /// Interpretation
    pub kind: PatternKind,
    /// Case-insensitive matching
    pub ignore_case: bool,
}

impl PatternSource {
    /// Regular expression source
    pub fn regex(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: PatternKind::Regex,
            ignore_case: false,
        }
    }

    /// scanf format source
    pub fn scanf(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: PatternKind::Scanf,
            ignore_case: false,
        }
    }

    /// Compile into a matcher
    pub fn compile(&self) -> Result<Pattern, BindingError> {
        let (expression, conversions) = match self.kind {
            PatternKind::Regex => (format!("^(?:{})", self.text), Vec::new()),
            PatternKind::Scanf => {
                let (body, conversions) = translate_scanf(&self.text)?;
                (format!("^(?:{})$", body), conversions)
            }
        };
        let regex = RegexBuilder::new(&expression)
            .case_insensitive(self.ignore_case)
            .build()
            .map_err(|e| BindingError::InvalidPattern {
                pattern: self.text.clone(),
                message: e.to_string(),
            })?;
        Ok(Pattern {
            source: self.clone(),
            regex,
            conversions,
        })
    }
}

impl fmt::Display for PatternSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Typed conversion implied by a scanf directive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Integer in the given radix
    Int(u32),
    /// Integer with C-style prefix detection (`%i`)
    AutoInt,
    /// Floating point number
    Float,
    /// Text
    Str,
}

impl Conversion {
    /// Convert a captured token
    pub fn apply(&self, token: &str) -> Result<Value, DeviceError> {
        let invalid = |expected: &'static str| DeviceError::Conversion {
            expected,
            found: format!("'{}'", token),
        };
        match self {
            Conversion::Str => Ok(Value::Str(token.to_string())),
            Conversion::Float => token
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| invalid("float")),
            Conversion::Int(radix) => parse_int(token, *radix).ok_or_else(|| invalid("int")),
            Conversion::AutoInt => {
                let (negative, digits) = split_sign(token.trim());
                let (radix, digits) = if let Some(hex) = digits
                    .strip_prefix("0x")
                    .or_else(|| digits.strip_prefix("0X"))
                {
                    (16, hex)
                } else if digits.len() > 1 && digits.starts_with('0') {
                    (8, &digits[1..])
                } else {
                    (10, digits)
                };
                let value = i64::from_str_radix(digits, radix).map_err(|_| invalid("int"))?;
                Ok(Value::Int(if negative { -value } else { value }))
            }
        }
    }
}

fn split_sign(token: &str) -> (bool, &str) {
    if let Some(rest) = token.strip_prefix('-') {
        (true, rest)
    } else {
        (false, token.strip_prefix('+').unwrap_or(token))
    }
}

fn parse_int(token: &str, radix: u32) -> Option<Value> {
    let (negative, digits) = split_sign(token.trim());
    let digits = if radix == 16 {
        digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
            .unwrap_or(digits)
    } else {
        digits
    };
    let value = i64::from_str_radix(digits, radix).ok()?;
    Some(Value::Int(if negative { -value } else { value }))
}

/// Compiled pattern
#[derive(Debug, Clone)]
pub struct Pattern {
    source: PatternSource,
    regex: Regex,
    conversions: Vec<Conversion>,
}

impl Pattern {
    /// The pattern as written
    pub fn source(&self) -> &PatternSource {
        &self.source
    }

    /// Number of capture groups, i.e. arguments produced by a match
    pub fn groups(&self) -> usize {
        self.regex.captures_len() - 1
    }

    /// Conversion for the capture at `index`, if the pattern implies one
    pub fn conversion(&self, index: usize) -> Option<Conversion> {
        self.conversions.get(index).copied()
    }

    /// Whether the request matches
    pub fn is_match(&self, request: &[u8]) -> bool {
        self.regex.is_match(request)
    }

    /// Captured tokens of a matching request; `None` for groups that did not participate
    pub fn captures(&self, request: &[u8]) -> Option<Vec<Option<String>>> {
        let caps = self.regex.captures(request)?;
        Some(
            caps.iter()
                .skip(1)
                .map(|m| m.map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned()))
                .collect(),
        )
    }
}

fn translate_scanf(format: &str) -> Result<(String, Vec<Conversion>), BindingError> {
    let invalid = |message: String| BindingError::InvalidPattern {
        pattern: format.to_string(),
        message,
    };

    let mut regex = String::new();
    let mut conversions = Vec::new();
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_whitespace() {
            while chars.peek().is_some_and(|c| c.is_whitespace()) {
                chars.next();
            }
            regex.push_str(r"\s*");
            continue;
        }
        if c != '%' {
            regex.push_str(&regex::escape(&c.to_string()));
            continue;
        }

        if chars.peek() == Some(&'%') {
            chars.next();
            regex.push('%');
            continue;
        }
        let skip = chars.peek() == Some(&'*');
        if skip {
            chars.next();
        }
        let mut width = String::new();
        while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
            width.push(*d);
            chars.next();
        }
        let width: Option<usize> = if width.is_empty() {
            None
        } else {
            Some(width.parse().map_err(|_| invalid(format!("bad field width '{}'", width)))?)
        };
        let digits = |class: &str| match width {
            Some(w) => format!("{}{{1,{}}}", class, w),
            None => format!("{}+", class),
        };

        let conv = chars
            .next()
            .ok_or_else(|| invalid("format ends with '%'".to_string()))?;
        let (expr, conversion) = match conv {
            'd' => (format!("[+-]?{}", digits(r"\d")), Conversion::Int(10)),
            'u' => (digits(r"\d"), Conversion::Int(10)),
            'i' => (
                format!("[+-]?(?:0[xX][0-9a-fA-F]+|{})", digits(r"\d")),
                Conversion::AutoInt,
            ),
            'x' | 'X' => (
                format!("[+-]?(?:0[xX])?{}", digits("[0-9a-fA-F]")),
                Conversion::Int(16),
            ),
            'o' => (format!("[+-]?{}", digits("[0-7]")), Conversion::Int(8)),
            'f' | 'e' | 'g' | 'E' | 'G' => (
                r"[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?".to_string(),
                Conversion::Float,
            ),
            's' => (digits(r"\S"), Conversion::Str),
            'c' => (
                format!("(?s:.{{{}}})", width.unwrap_or(1)),
                Conversion::Str,
            ),
            other => return Err(invalid(format!("unsupported conversion '%{}'", other))),
        };

        if skip {
            regex.push_str(&format!("(?:{})", expr));
        } else {
            regex.push_str(&format!("({})", expr));
            conversions.push(conversion);
        }
    }

    Ok((regex, conversions))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regex_anchored_at_start() {
        let p = PatternSource::regex(r"S\?").compile().unwrap();
        assert!(p.is_match(b"S?"));
        assert!(p.is_match(b"S?trailing"));
        assert!(!p.is_match(b"xS?"));
        assert_eq!(p.groups(), 0);
    }

    #[test]
    fn test_regex_captures() {
        let p = PatternSource::regex(r"^P=([0-9]+)(?:,(\w+))?$").compile().unwrap();
        assert_eq!(p.groups(), 2);
        assert_eq!(
            p.captures(b"P=12").unwrap(),
            vec![Some("12".to_string()), None]
        );
    }

    #[test]
    fn test_invalid_regex() {
        let err = PatternSource::regex("(unclosed").compile().unwrap_err();
        assert!(matches!(err, BindingError::InvalidPattern { .. }));
    }

    #[test]
    fn test_scanf_typed_conversions() {
        let p = PatternSource::scanf("T=%d,%f,%s").compile().unwrap();
        let caps = p.captures(b"T=-12,2.5,abc").unwrap();
        let values: Vec<Value> = caps
            .iter()
            .enumerate()
            .map(|(i, c)| p.conversion(i).unwrap().apply(c.as_deref().unwrap()).unwrap())
            .collect();
        assert_eq!(
            values,
            vec![Value::Int(-12), Value::Float(2.5), Value::from("abc")]
        );
    }

    #[test]
    fn test_scanf_fully_anchored() {
        let p = PatternSource::scanf("V?").compile().unwrap();
        assert!(p.is_match(b"V?"));
        assert!(!p.is_match(b"V?x"));
    }

    #[test]
    fn test_scanf_skip_width_and_percent() {
        let p = PatternSource::scanf("%*s %2d%%").compile().unwrap();
        assert_eq!(p.groups(), 1);
        let caps = p.captures(b"POWER 42%").unwrap();
        assert_eq!(caps, vec![Some("42".to_string())]);
        assert!(!p.is_match(b"POWER 420%"));
    }

    #[test]
    fn test_scanf_hex_and_auto() {
        assert_eq!(Conversion::Int(16).apply("0x1F").unwrap(), Value::Int(31));
        assert_eq!(Conversion::AutoInt.apply("017").unwrap(), Value::Int(15));
        assert_eq!(Conversion::AutoInt.apply("-0x10").unwrap(), Value::Int(-16));
        assert!(Conversion::Int(10).apply("1.5").is_err());
    }

    #[test]
    fn test_scanf_unsupported_conversion() {
        let err = PatternSource::scanf("%q").compile().unwrap_err();
        assert!(err.to_string().contains("%q"));
    }
}
