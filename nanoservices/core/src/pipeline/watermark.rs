use std::cmp::Ordering;

use fieldflow_utils::{Record, Value};

/// True when the record's `field` lies strictly after `last`.
/// Records missing the field (or holding null) never pass.
pub fn is_after(record: &Record, field: &str, last: &str) -> bool {
    match record.get(field) {
        Some(v) => v.compare(&Value::from(last)) == Some(Ordering::Greater),
        None => false,
    }
}

/// Keep only records past the incremental bound. Without a last value every
/// record passes.
pub fn filter_after(records: Vec<Record>, field: &str, last: Option<&str>) -> Vec<Record> {
    match last {
        Some(last) => records
            .into_iter()
            .filter(|r| is_after(r, field, last))
            .collect(),
        None => records,
    }
}

/// The greatest value of `field` across the batch, rendered as text.
pub fn max_value(records: &[Record], field: &str) -> Option<String> {
    let mut best: Option<&Value> = None;
    for v in records.iter().filter_map(|r| r.get(field)) {
        if v.is_null() {
            continue;
        }
        best = match best {
            Some(b) if v.compare(b) != Some(Ordering::Greater) => Some(b),
            _ => Some(v),
        };
    }
    best.map(Value::to_string)
}

/// Next watermark: the batch maximum, or the previous value when the batch is
/// empty or never moves past it.
pub fn advance(records: &[Record], field: &str, last: Option<&str>) -> Option<String> {
    let observed = max_value(records, field);
    match (observed, last) {
        (Some(seen), Some(prev)) => {
            if Value::from(seen.as_str()).compare(&Value::from(prev)) == Some(Ordering::Greater) {
                Some(seen)
            } else {
                Some(prev.to_string())
            }
        }
        (Some(seen), None) => Some(seen),
        (None, prev) => prev.map(str::to_string),
    }
}
