//! Turns one transformation line into an [`Instruction`].
//!
//! Surface forms are tried most specific first, so a function call is never
//! read as a field copy and a quoted concatenation never as arithmetic.

use fieldflow_utils::{ParseError, Value};
use once_cell::sync::Lazy;
use regex::Regex;

use super::functions::{self, FunctionDef, Identifiers, Shape};

const IDENT: &str = r"[A-Za-z_][A-Za-z0-9_.]*";
const QUOTED: &str = r#"'[^']*'|"[^"]*""#;
const NUMBER: &str = r"-?\d+(?:\.\d+)?";

fn anchored(body: &str) -> Regex {
    Regex::new(&format!("^{body}$")).expect("transformation matcher compiles")
}

static ASSIGNED_CALL: Lazy<Regex> =
    Lazy::new(|| anchored(&format!(r"({IDENT})\s*=\s*([A-Za-z_][A-Za-z0-9_]*)\s*\((.*)\)")));
static IN_PLACE_CALL: Lazy<Regex> =
    Lazy::new(|| anchored(r"([A-Za-z_][A-Za-z0-9_]*)\s*\((.*)\)"));
static LITERAL: Lazy<Regex> =
    Lazy::new(|| anchored(&format!(r"({IDENT})\s*=\s*({QUOTED}|{NUMBER})")));
static CONCAT: Lazy<Regex> = Lazy::new(|| {
    anchored(&format!(
        r"({IDENT})\s*=\s*({IDENT}|{QUOTED})\s*\+\s*({IDENT}|{QUOTED})"
    ))
});
static BINARY: Lazy<Regex> = Lazy::new(|| {
    anchored(&format!(
        r"({IDENT})\s*=\s*({IDENT}|{NUMBER})\s*([-+*/])\s*({IDENT}|{NUMBER})"
    ))
});
static COPY: Lazy<Regex> = Lazy::new(|| anchored(&format!(r"({IDENT})\s*=\s*({IDENT})")));
static IDENTIFIER: Lazy<Regex> = Lazy::new(|| anchored(IDENT));

/// A value read at evaluation time.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Field(String),
    Literal(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "+" => Some(BinaryOp::Add),
            "-" => Some(BinaryOp::Sub),
            "*" => Some(BinaryOp::Mul),
            "/" => Some(BinaryOp::Div),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Instruction {
    /// `dest = 'literal'`
    Assign { dest: String, value: Value },
    /// `dest = field`
    Copy { dest: String, source: String },
    /// `dest = field + 'literal'`, either side may be quoted
    Concat { dest: String, left: Operand, right: Operand },
    /// `dest = a <op> b`
    Binary {
        dest: String,
        op: BinaryOp,
        left: Operand,
        right: Operand,
    },
    /// `FUNCTION(field, ...)` or `dest = FUNCTION(...)`.
    ///
    /// `inputs` excludes the destination of an in-place target function;
    /// for an in-place mutation `inputs[0]` reads `target`.
    Call {
        target: String,
        function: &'static FunctionDef,
        inputs: Vec<Operand>,
        in_place: bool,
        /// Compiled from the literal pattern argument of a pattern function.
        pattern: Option<Regex>,
    },
}

pub fn parse(line: &str) -> Result<Instruction, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    if let Some(c) = ASSIGNED_CALL.captures(line) {
        return call(line, Some(&c[1]), &c[2], &c[3]);
    }
    if let Some(c) = IN_PLACE_CALL.captures(line) {
        return call(line, None, &c[1], &c[2]);
    }
    if let Some(c) = LITERAL.captures(line) {
        return Ok(Instruction::Assign {
            dest: c[1].to_string(),
            value: literal(&c[2]).unwrap_or(Value::Null),
        });
    }
    if let Some(c) = CONCAT.captures(line) {
        if is_quoted(&c[2]) || is_quoted(&c[3]) {
            return Ok(Instruction::Concat {
                dest: c[1].to_string(),
                left: operand(&c[2]),
                right: operand(&c[3]),
            });
        }
    }
    if let Some(c) = BINARY.captures(line) {
        if let Some(op) = BinaryOp::from_symbol(&c[3]) {
            return Ok(Instruction::Binary {
                dest: c[1].to_string(),
                op,
                left: operand(&c[2]),
                right: operand(&c[4]),
            });
        }
    }
    if let Some(c) = COPY.captures(line) {
        return Ok(Instruction::Copy {
            dest: c[1].to_string(),
            source: c[2].to_string(),
        });
    }
    Err(ParseError::Unrecognized(line.to_string()))
}

fn call(
    line: &str,
    dest: Option<&str>,
    name: &str,
    raw_args: &str,
) -> Result<Instruction, ParseError> {
    let function =
        functions::lookup(name).ok_or_else(|| ParseError::UnknownFunction(name.to_string()))?;
    // calls do not nest
    let args = split_args(raw_args).ok_or_else(|| ParseError::Unrecognized(line.to_string()))?;

    let offset = match (dest, function.shape) {
        (Some(_), Shape::Target) => 1,
        _ => 0,
    };
    if !function.accepts(args.len(), offset) {
        return Err(ParseError::Arity {
            function: function.name.to_string(),
            expected: function.arity_text(offset),
            got: args.len(),
        });
    }

    let invalid = |reason: String| ParseError::InvalidArgument {
        function: function.name.to_string(),
        reason,
    };

    let (target, inputs, in_place): (String, Vec<Operand>, bool) = match dest {
        Some(dest) => {
            let inputs = args
                .iter()
                .enumerate()
                .map(|(i, a)| {
                    let field_first = i == 0 && function.shape == Shape::Mutate;
                    argument(a, field_first, function.identifiers)
                })
                .collect();
            (dest.to_string(), inputs, false)
        }
        None => {
            let first = args.first().map(|a| a.trim()).unwrap_or_default();
            if !IDENTIFIER.is_match(first) {
                return Err(invalid(format!("first argument must name a field, got '{first}'")));
            }
            let rest = args[1..].iter().map(|a| argument(a, false, function.identifiers));
            let inputs = match function.shape {
                Shape::Mutate => {
                    std::iter::once(Operand::Field(first.to_string())).chain(rest).collect()
                }
                Shape::Target => rest.collect(),
            };
            (first.to_string(), inputs, true)
        }
    };

    if let Some(check) = function.check {
        check(&inputs).map_err(invalid)?;
    }
    let pattern = match function.pattern_index() {
        Some(index) => match inputs.get(index) {
            Some(Operand::Literal(v)) => {
                let text = v.to_string();
                let re = Regex::new(&text)
                    .map_err(|e| invalid(format!("invalid pattern '{text}': {e}")))?;
                Some(re)
            }
            _ => return Err(invalid("pattern must be a literal".to_string())),
        },
        None => None,
    };
    Ok(Instruction::Call {
        target,
        function,
        inputs,
        in_place,
        pattern,
    })
}

/// Split on commas that sit outside quotes. `None` when an unquoted
/// parenthesis shows up.
fn split_args(raw: &str) -> Option<Vec<String>> {
    if raw.trim().is_empty() {
        return Some(Vec::new());
    }
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in raw.chars() {
        match (quote, c) {
            (None, '\'' | '"') => {
                quote = Some(c);
                current.push(c);
            }
            (Some(q), _) if c == q => {
                quote = None;
                current.push(c);
            }
            (None, ',') => args.push(std::mem::take(&mut current)),
            (None, '(' | ')') => return None,
            _ => current.push(c),
        }
    }
    args.push(current);
    Some(args)
}

fn is_quoted(text: &str) -> bool {
    text.len() >= 2
        && ((text.starts_with('\'') && text.ends_with('\''))
            || (text.starts_with('"') && text.ends_with('"')))
}

/// A quoted string or a number.
fn literal(text: &str) -> Option<Value> {
    if is_quoted(text) {
        return Some(Value::String(text[1..text.len() - 1].to_string()));
    }
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::Int(i));
    }
    text.parse::<f64>().ok().filter(|f| f.is_finite()).map(Value::Float)
}

fn operand(text: &str) -> Operand {
    literal(text).map_or_else(|| Operand::Field(text.to_string()), Operand::Literal)
}

fn argument(raw: &str, field_first: bool, identifiers: Identifiers) -> Operand {
    let text = raw.trim();
    if let Some(value) = literal(text) {
        return Operand::Literal(value);
    }
    if IDENTIFIER.is_match(text) && (field_first || identifiers == Identifiers::Field) {
        return Operand::Field(text.to_string());
    }
    Operand::Literal(Value::String(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str) -> Operand {
        Operand::Field(name.to_string())
    }

    fn lit(v: impl Into<Value>) -> Operand {
        Operand::Literal(v.into())
    }

    #[test]
    fn literal_assignment() {
        match parse("status = 'active'").unwrap() {
            Instruction::Assign { dest, value } => {
                assert_eq!(dest, "status");
                assert_eq!(value, Value::from("active"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            parse("n = 42").unwrap(),
            Instruction::Assign { value: Value::Int(42), .. }
        ));
    }

    #[test]
    fn copy_and_concat() {
        assert!(matches!(
            parse("b = a").unwrap(),
            Instruction::Copy { ref dest, ref source } if dest == "b" && source == "a"
        ));
        match parse("b = b + '_transformed'").unwrap() {
            Instruction::Concat { dest, left, right } => {
                assert_eq!(dest, "b");
                assert_eq!(left, field("b"));
                assert_eq!(right, lit("_transformed"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(parse(r#"x = "a+b" + y"#).unwrap(), Instruction::Concat { .. }));
    }

    #[test]
    fn arithmetic_between_fields_and_numbers() {
        match parse("total = price * 1.2").unwrap() {
            Instruction::Binary { op, left, right, .. } => {
                assert_eq!(op, BinaryOp::Mul);
                assert_eq!(left, field("price"));
                assert_eq!(right, lit(1.2));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            parse("c = a-b").unwrap(),
            Instruction::Binary { op: BinaryOp::Sub, .. }
        ));
        assert!(matches!(
            parse("c = a + b").unwrap(),
            Instruction::Binary { op: BinaryOp::Add, .. }
        ));
    }

    #[test]
    fn calls_win_over_copies() {
        match parse("upper_name = UPPER(name)").unwrap() {
            Instruction::Call { target, function, inputs, in_place, .. } => {
                assert_eq!(target, "upper_name");
                assert_eq!(function.name, "UPPER");
                assert_eq!(inputs, vec![field("name")]);
                assert!(!in_place);
            }
            other => panic!("unexpected {other:?}"),
        }
        match parse("replace(title, ' ', _)").unwrap() {
            Instruction::Call { target, inputs, in_place, .. } => {
                assert_eq!(target, "title");
                assert_eq!(inputs, vec![field("title"), lit(" "), lit("_")]);
                assert!(in_place);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn target_functions_read_fields() {
        match parse("CONCAT(full, first, ', ', last)").unwrap() {
            Instruction::Call { target, inputs, .. } => {
                assert_eq!(target, "full");
                assert_eq!(inputs, vec![field("first"), lit(", "), field("last")]);
            }
            other => panic!("unexpected {other:?}"),
        }
        match parse("age = DATE_DIFF(born, today)").unwrap() {
            Instruction::Call { target, inputs, .. } => {
                assert_eq!(target, "age");
                assert_eq!(inputs, vec![field("born"), field("today")]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(parse("NOW(loaded_at)").is_ok());
        assert!(parse("loaded_at = NOW()").is_ok());
    }

    #[test]
    fn parse_errors() {
        assert_eq!(parse("   ").unwrap_err(), ParseError::Empty);
        assert_eq!(parse("FROB(x)").unwrap_err(), ParseError::UnknownFunction("FROB".to_string()));
        assert!(matches!(parse("this is not valid").unwrap_err(), ParseError::Unrecognized(_)));
        assert_eq!(
            parse("LEFT(name)").unwrap_err().to_string(),
            "LEFT expects 2 argument(s), got 1"
        );
        assert_eq!(
            parse("x = NOW(y)").unwrap_err().to_string(),
            "NOW expects 0 argument(s), got 1"
        );
        assert!(matches!(parse("UPPER('abc')").unwrap_err(), ParseError::InvalidArgument { .. }));
        assert!(matches!(
            parse("REGEX_REPLACE(name, '([a-z', '')").unwrap_err(),
            ParseError::InvalidArgument { .. }
        ));
    }

    #[test]
    fn regex_pattern_is_compiled_once_at_parse() {
        match parse(r"digits = REGEX_REPLACE(phone, '\D', '')").unwrap() {
            Instruction::Call { target, pattern, .. } => {
                assert_eq!(target, "digits");
                assert_eq!(pattern.unwrap().as_str(), r"\D");
            }
            other => panic!("unexpected {other:?}"),
        }
        match parse("UPPER(name)").unwrap() {
            Instruction::Call { pattern, .. } => assert!(pattern.is_none()),
            other => panic!("unexpected {other:?}"),
        }
        let err = parse("REGEX_REPLACE(name, '([a-z', '')").unwrap_err();
        assert!(
            err.to_string()
                .starts_with("invalid argument for REGEX_REPLACE: invalid pattern '([a-z'"),
            "{err}"
        );
    }

    #[test]
    fn oversized_literal_pad_width_is_rejected() {
        assert_eq!(
            parse("PAD_LEFT(code, 4611686018427387903, '0')").unwrap_err().to_string(),
            "invalid argument for PAD_LEFT: width 4611686018427387903 exceeds 65536"
        );
        assert!(parse("PAD_LEFT(code, 8, '0')").is_ok());
        assert!(parse("PAD_RIGHT(code, width)").is_ok());
    }

    #[test]
    fn commas_inside_quotes_do_not_split() {
        assert_eq!(
            split_args("a, 'b, c', \"d,e\"").unwrap(),
            vec!["a", " 'b, c'", " \"d,e\""]
        );
        assert_eq!(split_args("  ").unwrap().len(), 0);
        assert!(split_args("a), LOWER(b").is_none());
        assert!(matches!(
            parse("x = UPPER(a) + LOWER(b)").unwrap_err(),
            ParseError::Unrecognized(_)
        ));
    }
}
