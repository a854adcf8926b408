//! Parsed transformation lines and their evaluation against a record.

use std::fmt;
use std::str::FromStr;

use fieldflow_utils::{Number, ParseError, Record, TransformError, Value};

use super::parser::{self, BinaryOp, Instruction, Operand};
use super::traits::Transform;

/// One compiled transformation line.
#[derive(Debug, Clone)]
pub struct Expression {
    text: String,
    instruction: Instruction,
}

impl Expression {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let instruction = parser::parse(text)?;
        Ok(Self {
            text: text.trim().to_string(),
            instruction,
        })
    }

    pub fn instruction(&self) -> &Instruction {
        &self.instruction
    }
}

impl FromStr for Expression {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Expression::parse(s)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Parse every line up front; the first bad line fails the lot.
pub fn compile_all<S: AsRef<str>>(lines: &[S]) -> Result<Vec<Expression>, ParseError> {
    lines.iter().map(|l| Expression::parse(l.as_ref())).collect()
}

fn resolve(record: &Record, operand: &Operand) -> Value {
    match operand {
        Operand::Field(name) => record.get(name).cloned().unwrap_or(Value::Null),
        Operand::Literal(value) => value.clone(),
    }
}

impl Transform for Expression {
    fn expression(&self) -> &str {
        &self.text
    }

    fn apply(&self, record: &mut Record) -> Result<(), TransformError> {
        match &self.instruction {
            Instruction::Assign { dest, value } => {
                record.insert(dest.as_str(), value.clone());
            }
            Instruction::Copy { dest, source } => {
                if let Some(value) = record.get(source).cloned() {
                    record.insert(dest.as_str(), value);
                }
            }
            Instruction::Concat { dest, left, right } => {
                let joined = format!("{}{}", resolve(record, left), resolve(record, right));
                record.insert(dest.as_str(), joined);
            }
            Instruction::Binary { dest, op, left, right } => {
                let value = arithmetic(*op, &resolve(record, left), &resolve(record, right));
                record.insert(dest.as_str(), value);
            }
            Instruction::Call {
                target,
                function,
                inputs,
                in_place,
                pattern,
            } => {
                let args: Vec<Value> = inputs.iter().map(|o| resolve(record, o)).collect();
                let value = function.evaluate(&args, pattern.as_ref())?;
                // an in-place call never conjures a null field out of nothing
                if *in_place && value.is_null() && !record.contains(target) {
                    return Ok(());
                }
                record.insert(target.as_str(), value);
            }
        }
        Ok(())
    }
}

/// Numeric when both sides are numeric; `+` otherwise concatenates and the
/// other operators give null. Integer overflow promotes to float and
/// division by zero yields zero.
pub fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Value {
    let (Some(a), Some(b)) = (left.as_number(), right.as_number()) else {
        return match op {
            BinaryOp::Add => Value::String(format!("{left}{right}")),
            _ => Value::Null,
        };
    };
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => {
            let checked = match op {
                BinaryOp::Add => x.checked_add(y),
                BinaryOp::Sub => x.checked_sub(y),
                BinaryOp::Mul => x.checked_mul(y),
                BinaryOp::Div if y == 0 => Some(0),
                BinaryOp::Div => x.checked_div(y),
            };
            checked.map_or_else(|| float_op(op, x as f64, y as f64), Value::Int)
        }
        (a, b) => float_op(op, a.as_f64(), b.as_f64()),
    }
}

fn float_op(op: BinaryOp, x: f64, y: f64) -> Value {
    Value::Float(match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div if y == 0.0 => 0.0,
        BinaryOp::Div => x / y,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(lines: &[&str], record: Record) -> Record {
        let mut record = record;
        for e in compile_all(lines).unwrap() {
            e.apply(&mut record).unwrap();
        }
        record
    }

    fn rec(pairs: &[(&str, Value)]) -> Record {
        pairs.iter().map(|(k, v)| (*k, v.clone())).collect()
    }

    #[test]
    fn concat_with_literal_suffix() {
        let out = run(&["b = b + '_transformed'"], rec(&[("b", Value::from("hello"))]));
        assert_eq!(out.get("b"), Some(&Value::from("hello_transformed")));
    }

    #[test]
    fn division_by_zero_yields_zero() {
        let out = run(
            &["c = a / b", "d = x / b"],
            rec(&[("a", Value::Int(10)), ("b", Value::Int(0)), ("x", Value::Float(1.5))]),
        );
        assert_eq!(out.get("c"), Some(&Value::Int(0)));
        assert_eq!(out.get("d"), Some(&Value::Float(0.0)));
    }

    #[test]
    fn arithmetic_rules() {
        let i = Value::Int;
        assert_eq!(arithmetic(BinaryOp::Add, &i(2), &i(3)), i(5));
        assert_eq!(arithmetic(BinaryOp::Div, &i(7), &i(2)), i(3));
        assert_eq!(arithmetic(BinaryOp::Mul, &i(2), &Value::Float(1.5)), Value::Float(3.0));
        assert_eq!(arithmetic(BinaryOp::Add, &Value::from("4"), &i(1)), i(5));
        assert_eq!(arithmetic(BinaryOp::Add, &Value::from("a"), &i(1)), Value::from("a1"));
        assert_eq!(arithmetic(BinaryOp::Sub, &Value::from("a"), &i(1)), Value::Null);
        assert_eq!(
            arithmetic(BinaryOp::Add, &i(i64::MAX), &i(1)),
            Value::Float(i64::MAX as f64 + 1.0)
        );
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        let out = run(&["ROUND(n, 0)"], rec(&[("n", Value::Float(2.5))]));
        assert_eq!(out.get("n"), Some(&Value::Float(3.0)));
    }

    #[test]
    fn regex_replace_uses_the_parsed_pattern() {
        let out = run(
            &[r"digits = REGEX_REPLACE(phone, '[^0-9]+', '')", "REGEX_REPLACE(phone, '\\s+', ' ')"],
            rec(&[("phone", Value::from("+1 (555)   010-99"))]),
        );
        assert_eq!(out.get("digits"), Some(&Value::from("155501099")));
        assert_eq!(out.get("phone"), Some(&Value::from("+1 (555) 010-99")));
    }

    #[test]
    fn assigned_call_leaves_source_untouched() {
        let out = run(&["shout = UPPER(name)"], rec(&[("name", Value::from("ada"))]));
        assert_eq!(out.get("name"), Some(&Value::from("ada")));
        assert_eq!(out.get("shout"), Some(&Value::from("ADA")));
    }

    #[test]
    fn in_place_call_on_missing_field_is_a_no_op() {
        let out = run(&["UPPER(missing)"], Record::new());
        assert!(!out.contains("missing"));
        let out = run(&["DEFAULT(missing, 'n/a')"], Record::new());
        assert_eq!(out.get("missing"), Some(&Value::from("n/a")));
    }

    #[test]
    fn now_overwrites_regardless_of_prior_value() {
        let out = run(&["NOW(stamp)"], rec(&[("stamp", Value::Int(1))]));
        assert!(matches!(out.get("stamp"), Some(Value::String(_))));
        let out = run(&["TODAY(day)"], Record::new());
        assert!(out.contains("day"));
    }

    #[test]
    fn copy_skips_absent_source() {
        let out = run(&["b = a"], Record::new());
        assert!(out.is_empty());
        let out = run(&["b = a"], rec(&[("a", Value::Bool(true))]));
        assert_eq!(out.get("b"), Some(&Value::Bool(true)));
    }

    #[test]
    fn encoding_round_trips_through_expressions() {
        for s in ["", "plain", "a b/c?d=e&f", "ünïcødé"] {
            let out = run(
                &["BASE64_ENCODE(v)", "BASE64_DECODE(v)", "URL_ENCODE(v)", "URL_DECODE(v)"],
                rec(&[("v", Value::from(s))]),
            );
            assert_eq!(out.get("v"), Some(&Value::from(s)));
        }
    }

    #[test]
    fn concat_and_coalesce_read_fields() {
        let out = run(
            &["full = CONCAT(first, ' ', last)", "nick = COALESCE(alias, first)"],
            rec(&[
                ("first", Value::from("Ada")),
                ("last", Value::from("Lovelace")),
                ("alias", Value::Null),
            ]),
        );
        assert_eq!(out.get("full"), Some(&Value::from("Ada Lovelace")));
        assert_eq!(out.get("nick"), Some(&Value::from("Ada")));
    }

    #[test]
    fn runtime_errors_surface() {
        let e = Expression::parse("ABS(n)").unwrap();
        let mut r = rec(&[("n", Value::from("abc"))]);
        assert!(matches!(e.apply(&mut r), Err(TransformError::NotNumeric { .. })));
    }

    #[test]
    fn compile_all_reports_first_bad_line() {
        let err = compile_all(&["a = b", "NOPE(x)"]).unwrap_err();
        assert_eq!(err, ParseError::UnknownFunction("NOPE".to_string()));
    }
}
