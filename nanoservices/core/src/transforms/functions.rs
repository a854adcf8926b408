//! The function catalog: name → arity, shape, and implementation.
//!
//! Implementations receive argument values already resolved against the
//! record. For [`Shape::Mutate`] functions `args[0]` is the current value of
//! the mutated field; for [`Shape::Target`] functions the destination is not
//! passed at all.

use std::collections::HashMap;

use base64::Engine as _;
use chrono::{SecondsFormat, Utc};
use fieldflow_utils::{Number, TransformError, Value};
use md5::{Digest, Md5};
use once_cell::sync::Lazy;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use sha2::Sha256;

use super::dates::{self, Moment};
use super::parser::Operand;

pub type FunctionImpl = fn(&[Value]) -> Result<Value, TransformError>;
/// Implementation that also receives a pattern compiled at parse time.
pub type PatternImpl = fn(&[Value], &Regex) -> Result<Value, TransformError>;

/// Widest padding `PAD_LEFT` / `PAD_RIGHT` will produce, in characters.
pub const MAX_PAD_WIDTH: usize = 65_536;

#[derive(Clone, Copy)]
pub enum Eval {
    Plain(FunctionImpl),
    /// `index` is the input holding the pattern; it must be a literal.
    Pattern { index: usize, eval: PatternImpl },
}

/// How the first argument of the in-place form is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Reads the named field and writes the result back to it.
    Mutate,
    /// Names the destination only; the inputs are the remaining arguments.
    Target,
}

/// How bare identifiers after the first argument are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identifiers {
    /// As literal text (`REPLACE(name, old, new)`).
    Literal,
    /// As field references (`CONCAT(full, first, last)`).
    Field,
}

pub struct FunctionDef {
    pub name: &'static str,
    /// Arity of the in-place form, first argument included.
    pub min_args: usize,
    pub max_args: Option<usize>,
    pub shape: Shape,
    pub identifiers: Identifiers,
    pub eval: Eval,
    /// Parse-time validation of literal arguments.
    pub check: Option<fn(&[Operand]) -> Result<(), String>>,
}

impl std::fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionDef")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .field("shape", &self.shape)
            .finish()
    }
}

impl FunctionDef {
    /// Human-readable arity for error messages.
    pub fn arity_text(&self, offset: usize) -> String {
        let min = self.min_args.saturating_sub(offset);
        match self.max_args.map(|m| m.saturating_sub(offset)) {
            Some(max) if max == min => min.to_string(),
            Some(max) => format!("{min}..{max}"),
            None => format!("at least {min}"),
        }
    }

    pub fn accepts(&self, count: usize, offset: usize) -> bool {
        let min = self.min_args.saturating_sub(offset);
        count >= min && self.max_args.map_or(true, |m| count <= m.saturating_sub(offset))
    }

    /// Run against resolved inputs. `pattern` is the regex compiled when
    /// the line was parsed; pattern functions fail without one.
    pub fn evaluate(
        &self,
        args: &[Value],
        pattern: Option<&Regex>,
    ) -> Result<Value, TransformError> {
        match (self.eval, pattern) {
            (Eval::Plain(f), _) => f(args),
            (Eval::Pattern { eval, .. }, Some(re)) => eval(args, re),
            (Eval::Pattern { .. }, None) => Err(TransformError::Invalid {
                function: self.name.to_string(),
                reason: "pattern was not compiled".to_string(),
            }),
        }
    }

    /// Input index of the parse-time pattern, if any.
    pub fn pattern_index(&self) -> Option<usize> {
        match self.eval {
            Eval::Pattern { index, .. } => Some(index),
            Eval::Plain(_) => None,
        }
    }
}

const fn def(
    name: &'static str,
    min_args: usize,
    max_args: Option<usize>,
    shape: Shape,
    eval: Eval,
) -> FunctionDef {
    FunctionDef {
        name,
        min_args,
        max_args,
        shape,
        identifiers: match shape {
            Shape::Mutate => Identifiers::Literal,
            Shape::Target => Identifiers::Field,
        },
        eval,
        check: None,
    }
}

const fn mutate(name: &'static str, min: usize, max: usize, eval: FunctionImpl) -> FunctionDef {
    def(name, min, Some(max), Shape::Mutate, Eval::Plain(eval))
}

const fn target(
    name: &'static str,
    min: usize,
    max: Option<usize>,
    eval: FunctionImpl,
) -> FunctionDef {
    def(name, min, max, Shape::Target, Eval::Plain(eval))
}

const fn pattern(
    name: &'static str,
    min: usize,
    max: usize,
    index: usize,
    eval: PatternImpl,
) -> FunctionDef {
    def(name, min, Some(max), Shape::Mutate, Eval::Pattern { index, eval })
}

static CATALOG: [FunctionDef; 47] = [
    // case and whitespace
    mutate("UPPER", 1, 1, upper),
    mutate("LOWER", 1, 1, lower),
    mutate("TRIM", 1, 1, trim),
    mutate("LTRIM", 1, 1, ltrim),
    mutate("RTRIM", 1, 1, rtrim),
    mutate("NORMALIZE", 1, 1, normalize),
    mutate("TITLE_CASE", 1, 1, title_case),
    // substring and search
    mutate("LEFT", 2, 2, left),
    mutate("RIGHT", 2, 2, right),
    mutate("SUBSTRING", 2, 3, substring),
    mutate("REPLACE", 3, 3, replace),
    pattern("REGEX_REPLACE", 3, 3, 1, regex_replace),
    mutate("SPLIT", 3, 3, split),
    mutate("REVERSE", 1, 1, reverse),
    mutate("LEN", 1, 1, length),
    mutate("LENGTH", 1, 1, length),
    target("CONCAT", 2, None, concat),
    // padding and slug
    FunctionDef { check: Some(check_pad_width), ..mutate("PAD_LEFT", 2, 3, pad_left) },
    FunctionDef { check: Some(check_pad_width), ..mutate("PAD_RIGHT", 2, 3, pad_right) },
    mutate("SLUG", 1, 1, slug),
    // numeric
    mutate("ROUND", 1, 2, round),
    mutate("CEIL", 1, 1, ceil),
    mutate("CEILING", 1, 1, ceil),
    mutate("FLOOR", 1, 1, floor),
    mutate("ABS", 1, 1, abs),
    mutate("MOD", 2, 2, modulo),
    // conversion
    mutate("TO_INT", 1, 1, to_int),
    mutate("TO_FLOAT", 1, 1, to_float),
    mutate("TO_STRING", 1, 1, to_string),
    mutate("TO_BOOL", 1, 1, to_bool),
    // date and time
    target("NOW", 1, Some(1), now),
    target("TODAY", 1, Some(1), today),
    FunctionDef { check: Some(check_date_pattern), ..mutate("FORMAT_DATE", 2, 2, format_date) },
    mutate("ADD_DAYS", 2, 2, add_days),
    target("DATE_DIFF", 3, Some(3), date_diff),
    target("YEAR", 2, Some(2), year),
    target("MONTH", 2, Some(2), month),
    target("DAY", 2, Some(2), day),
    // null handling
    target("COALESCE", 2, None, coalesce),
    mutate("DEFAULT", 2, 2, default),
    mutate("NULLIF", 2, 2, null_if),
    // encoding and hashing
    mutate("MD5", 1, 1, md5_hex),
    mutate("SHA256", 1, 1, sha256_hex),
    mutate("BASE64_ENCODE", 1, 1, base64_encode),
    mutate("BASE64_DECODE", 1, 1, base64_decode),
    mutate("URL_ENCODE", 1, 1, url_encode),
    mutate("URL_DECODE", 1, 1, url_decode),
];

static BY_NAME: Lazy<HashMap<&'static str, &'static FunctionDef>> =
    Lazy::new(|| CATALOG.iter().map(|f| (f.name, f)).collect());

/// Case-insensitive catalog lookup.
pub fn lookup(name: &str) -> Option<&'static FunctionDef> {
    BY_NAME.get(name.to_ascii_uppercase().as_str()).copied()
}

/// Every catalog name, sorted.
pub fn names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = CATALOG.iter().map(|f| f.name).collect();
    names.sort_unstable();
    names
}

type Outcome = Result<Value, TransformError>;

static NULL: Value = Value::Null;

fn arg(args: &[Value], i: usize) -> &Value {
    args.get(i).unwrap_or(&NULL)
}

/// Apply a text function, passing null through.
fn text_op(args: &[Value], f: impl FnOnce(&str) -> String) -> Outcome {
    Ok(match arg(args, 0) {
        Value::Null => Value::Null,
        v => Value::String(f(&v.to_string())),
    })
}

fn not_numeric(function: &str, value: &Value) -> TransformError {
    TransformError::NotNumeric {
        function: function.to_string(),
        value: value.to_string(),
    }
}

fn number(function: &str, value: &Value) -> Result<Number, TransformError> {
    value.as_number().ok_or_else(|| not_numeric(function, value))
}

/// Integer argument; floats truncate toward zero.
fn int(function: &str, value: &Value) -> Result<i64, TransformError> {
    match number(function, value)? {
        Number::Int(i) => Ok(i),
        Number::Float(f) => Ok(f.trunc() as i64),
    }
}

fn upper(a: &[Value]) -> Outcome {
    text_op(a, |s| s.to_uppercase())
}

fn lower(a: &[Value]) -> Outcome {
    text_op(a, |s| s.to_lowercase())
}

fn trim(a: &[Value]) -> Outcome {
    text_op(a, |s| s.trim().to_string())
}

fn ltrim(a: &[Value]) -> Outcome {
    text_op(a, |s| s.trim_start().to_string())
}

fn rtrim(a: &[Value]) -> Outcome {
    text_op(a, |s| s.trim_end().to_string())
}

fn normalize(a: &[Value]) -> Outcome {
    text_op(a, |s| s.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn title_case(a: &[Value]) -> Outcome {
    text_op(a, |s| {
        let mut out = String::with_capacity(s.len());
        let mut at_word_start = true;
        for c in s.chars() {
            if c.is_whitespace() {
                at_word_start = true;
                out.push(c);
            } else if at_word_start {
                out.extend(c.to_uppercase());
                at_word_start = false;
            } else {
                out.extend(c.to_lowercase());
            }
        }
        out
    })
}

fn left(a: &[Value]) -> Outcome {
    let n = int("LEFT", arg(a, 1))?.max(0) as usize;
    text_op(a, |s| s.chars().take(n).collect())
}

fn right(a: &[Value]) -> Outcome {
    let n = int("RIGHT", arg(a, 1))?.max(0) as usize;
    text_op(a, |s| {
        let len = s.chars().count();
        s.chars().skip(len.saturating_sub(n)).collect()
    })
}

/// 1-indexed start; a missing length runs to the end.
fn substring(a: &[Value]) -> Outcome {
    let start = int("SUBSTRING", arg(a, 1))?.max(1) as usize - 1;
    let len = match a.get(2) {
        Some(v) => Some(int("SUBSTRING", v)?.max(0) as usize),
        None => None,
    };
    text_op(a, |s| {
        let rest = s.chars().skip(start);
        match len {
            Some(n) => rest.take(n).collect(),
            None => rest.collect(),
        }
    })
}

fn replace(a: &[Value]) -> Outcome {
    let from = arg(a, 1).to_string();
    let to = arg(a, 2).to_string();
    text_op(a, |s| if from.is_empty() { s.to_string() } else { s.replace(&from, &to) })
}

fn regex_replace(a: &[Value], re: &Regex) -> Outcome {
    let replacement = arg(a, 2).to_string();
    text_op(a, |s| re.replace_all(s, replacement.as_str()).into_owned())
}

/// 1-indexed piece; out of range yields the empty string.
fn split(a: &[Value]) -> Outcome {
    let sep = arg(a, 1).to_string();
    let index = int("SPLIT", arg(a, 2))?;
    text_op(a, |s| {
        if index < 1 {
            return String::new();
        }
        let idx = index as usize - 1;
        if sep.is_empty() {
            return if idx == 0 { s.to_string() } else { String::new() };
        }
        s.split(sep.as_str()).nth(idx).unwrap_or_default().to_string()
    })
}

fn reverse(a: &[Value]) -> Outcome {
    text_op(a, |s| s.chars().rev().collect())
}

fn length(a: &[Value]) -> Outcome {
    Ok(Value::Int(match arg(a, 0) {
        Value::Null => 0,
        v => v.to_string().chars().count() as i64,
    }))
}

fn concat(a: &[Value]) -> Outcome {
    Ok(Value::String(a.iter().map(Value::to_string).collect()))
}

fn pad_width(function: &str, value: &Value) -> Result<usize, TransformError> {
    let width = int(function, value)?.max(0) as usize;
    if width > MAX_PAD_WIDTH {
        return Err(TransformError::Invalid {
            function: function.to_string(),
            reason: format!("width {width} exceeds {MAX_PAD_WIDTH}"),
        });
    }
    Ok(width)
}

fn check_pad_width(args: &[Operand]) -> Result<(), String> {
    match args.get(1) {
        Some(Operand::Literal(v))
            if v.as_number().is_some_and(|n| n.as_f64() > MAX_PAD_WIDTH as f64) =>
        {
            Err(format!("width {v} exceeds {MAX_PAD_WIDTH}"))
        }
        _ => Ok(()),
    }
}

fn pad(a: &[Value], function: &str, at_start: bool) -> Outcome {
    let width = pad_width(function, arg(a, 1))?;
    let fill = arg(a, 2).to_string().chars().next().unwrap_or(' ');
    text_op(a, |s| {
        let missing = width.saturating_sub(s.chars().count());
        let padding: String = std::iter::repeat(fill).take(missing).collect();
        if at_start { padding + s } else { s.to_string() + &padding }
    })
}

fn pad_left(a: &[Value]) -> Outcome {
    pad(a, "PAD_LEFT", true)
}

fn pad_right(a: &[Value]) -> Outcome {
    pad(a, "PAD_RIGHT", false)
}

fn slug(a: &[Value]) -> Outcome {
    text_op(a, |s| {
        let mut out = String::with_capacity(s.len());
        let mut pending_dash = false;
        for c in s.chars() {
            if c.is_ascii_alphanumeric() {
                if pending_dash && !out.is_empty() {
                    out.push('-');
                }
                pending_dash = false;
                out.push(c.to_ascii_lowercase());
            } else {
                pending_dash = true;
            }
        }
        out
    })
}

/// Half away from zero, as `f64::round` does.
fn round(a: &[Value]) -> Outcome {
    let value = arg(a, 0);
    if value.is_null() {
        return Ok(Value::Null);
    }
    let digits = match a.get(1) {
        Some(d) => int("ROUND", d)?,
        None => 0,
    };
    match number("ROUND", value)? {
        Number::Int(i) if digits >= 0 => Ok(Value::Int(i)),
        n => {
            let factor = 10f64.powi(digits.clamp(-308, 308) as i32);
            Ok(Value::Float((n.as_f64() * factor).round() / factor))
        }
    }
}

fn float_op(a: &[Value], function: &str, f: fn(f64) -> f64) -> Outcome {
    match arg(a, 0) {
        Value::Null => Ok(Value::Null),
        v => match number(function, v)? {
            Number::Int(i) => Ok(Value::Int(i)),
            Number::Float(x) => Ok(Value::Float(f(x))),
        },
    }
}

fn ceil(a: &[Value]) -> Outcome {
    float_op(a, "CEIL", f64::ceil)
}

fn floor(a: &[Value]) -> Outcome {
    float_op(a, "FLOOR", f64::floor)
}

fn abs(a: &[Value]) -> Outcome {
    match arg(a, 0) {
        Value::Null => Ok(Value::Null),
        v => Ok(match number("ABS", v)? {
            Number::Int(i) => i.checked_abs().map_or(Value::Float((i as f64).abs()), Value::Int),
            Number::Float(x) => Value::Float(x.abs()),
        }),
    }
}

/// Remainder takes the dividend's sign; a zero divisor yields zero.
fn modulo(a: &[Value]) -> Outcome {
    let value = arg(a, 0);
    if value.is_null() {
        return Ok(Value::Null);
    }
    Ok(match (number("MOD", value)?, number("MOD", arg(a, 1))?) {
        (Number::Int(x), Number::Int(y)) => Value::Int(x.checked_rem(y).unwrap_or(0)),
        (_, y) if y.as_f64() == 0.0 => Value::Float(0.0),
        (x, y) => Value::Float(x.as_f64() % y.as_f64()),
    })
}

/// Unparsable input (null included) converts to 0.
fn to_int(a: &[Value]) -> Outcome {
    Ok(Value::Int(match arg(a, 0) {
        Value::Bool(b) => i64::from(*b),
        v => match v.as_number() {
            Some(Number::Int(i)) => i,
            Some(Number::Float(f)) => f.trunc() as i64,
            None => 0,
        },
    }))
}

fn to_float(a: &[Value]) -> Outcome {
    Ok(Value::Float(match arg(a, 0) {
        Value::Bool(b) => f64::from(u8::from(*b)),
        v => v.as_number().map_or(0.0, Number::as_f64),
    }))
}

fn to_string(a: &[Value]) -> Outcome {
    text_op(a, str::to_string)
}

fn to_bool(a: &[Value]) -> Outcome {
    let text = arg(a, 0).to_string().trim().to_ascii_lowercase();
    Ok(Value::Bool(matches!(text.as_str(), "1" | "true" | "yes" | "on")))
}

fn now(_: &[Value]) -> Outcome {
    Ok(Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)))
}

fn today(_: &[Value]) -> Outcome {
    Ok(Value::String(Utc::now().date_naive().format("%Y-%m-%d").to_string()))
}

fn moment(value: &Value) -> Option<Moment> {
    value.as_str().and_then(Moment::parse)
}

/// Unparsable dates pass through unchanged.
fn format_date(a: &[Value]) -> Outcome {
    let Some(m) = moment(arg(a, 0)) else {
        return Ok(arg(a, 0).clone());
    };
    let pattern = arg(a, 1).to_string();
    m.format(&dates::to_strftime(&pattern))
        .map(Value::String)
        .map_err(|reason| TransformError::InvalidPattern {
            function: "FORMAT_DATE".to_string(),
            pattern,
            reason,
        })
}

fn check_date_pattern(args: &[Operand]) -> Result<(), String> {
    match args.get(1) {
        Some(Operand::Literal(v)) => dates::validate_pattern(&v.to_string()),
        _ => Ok(()),
    }
}

fn add_days(a: &[Value]) -> Outcome {
    let days = int("ADD_DAYS", arg(a, 1))?;
    let Some(m) = moment(arg(a, 0)) else {
        return Ok(arg(a, 0).clone());
    };
    m.add_days(days)
        .map(|m| Value::String(m.render()))
        .ok_or_else(|| TransformError::Invalid {
            function: "ADD_DAYS".to_string(),
            reason: format!("adding {days} days leaves the supported date range"),
        })
}

fn date_diff(a: &[Value]) -> Outcome {
    Ok(match (moment(arg(a, 0)), moment(arg(a, 1))) {
        (Some(start), Some(end)) => Value::Int(dates::days_between(&start, &end)),
        _ => Value::Null,
    })
}

fn year(a: &[Value]) -> Outcome {
    Ok(moment(arg(a, 0)).map_or(Value::Null, |m| Value::Int(m.year())))
}

fn month(a: &[Value]) -> Outcome {
    Ok(moment(arg(a, 0)).map_or(Value::Null, |m| Value::Int(m.month())))
}

fn day(a: &[Value]) -> Outcome {
    Ok(moment(arg(a, 0)).map_or(Value::Null, |m| Value::Int(m.day())))
}

fn coalesce(a: &[Value]) -> Outcome {
    Ok(a.iter().find(|v| !v.is_empty()).cloned().unwrap_or(Value::Null))
}

fn default(a: &[Value]) -> Outcome {
    let value = arg(a, 0);
    Ok(if value.is_empty() { arg(a, 1).clone() } else { value.clone() })
}

fn null_if(a: &[Value]) -> Outcome {
    let value = arg(a, 0);
    Ok(if !value.is_null() && value.to_string() == arg(a, 1).to_string() {
        Value::Null
    } else {
        value.clone()
    })
}

fn md5_hex(a: &[Value]) -> Outcome {
    text_op(a, |s| hex::encode(Md5::digest(s.as_bytes())))
}

fn sha256_hex(a: &[Value]) -> Outcome {
    text_op(a, |s| hex::encode(Sha256::digest(s.as_bytes())))
}

fn base64_encode(a: &[Value]) -> Outcome {
    text_op(a, |s| base64::engine::general_purpose::STANDARD.encode(s.as_bytes()))
}

/// Invalid input (bad alphabet or non-UTF-8 bytes) decodes to "".
fn base64_decode(a: &[Value]) -> Outcome {
    text_op(a, |s| {
        base64::engine::general_purpose::STANDARD
            .decode(s.trim())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_default()
    })
}

/// Everything but RFC 3986 unreserved characters is escaped.
const URL_UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn url_encode(a: &[Value]) -> Outcome {
    text_op(a, |s| utf8_percent_encode(s, URL_UNRESERVED).to_string())
}

fn url_decode(a: &[Value]) -> Outcome {
    text_op(a, |s| percent_decode_str(&s.replace('+', " ")).decode_utf8_lossy().into_owned())
}
