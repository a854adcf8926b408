use fieldflow_utils::Record;

use crate::pipeline::FieldMap;

/// Project each record onto the mapped destination fields, copying values
/// verbatim. No mappings means pass-through. A mapping whose source field is
/// missing from a record is skipped for that record; when two mappings target
/// the same destination the later one wins.
pub fn apply_mappings(records: Vec<Record>, mappings: &[FieldMap]) -> Vec<Record> {
    if mappings.is_empty() {
        return records;
    }
    records
        .into_iter()
        .map(|record| project(&record, mappings))
        .collect()
}

fn project(record: &Record, mappings: &[FieldMap]) -> Record {
    let mut out = Record::with_capacity(mappings.len());
    for m in mappings {
        if let Some(value) = record.get(&m.source_field) {
            out.insert(m.destination_field.as_str(), value.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldflow_utils::Value;

    fn rec(pairs: &[(&str, Value)]) -> Record {
        pairs.iter().map(|(k, v)| (*k, v.clone())).collect()
    }

    #[test]
    fn empty_mapping_list_is_identity() {
        let input = vec![rec(&[("a", Value::Int(1)), ("b", Value::Null)])];
        assert_eq!(apply_mappings(input.clone(), &[]), input);
    }

    #[test]
    fn unmapped_fields_are_dropped_and_values_copied_verbatim() {
        let input = vec![rec(&[("a", Value::from("007")), ("junk", Value::Bool(true))])];
        let out = apply_mappings(input, &[FieldMap::new("a", "code")]);
        assert_eq!(out[0], rec(&[("code", Value::from("007"))]));
    }

    #[test]
    fn absent_source_field_is_skipped_per_record() {
        let input = vec![rec(&[("a", Value::Int(1))]), rec(&[("b", Value::Int(2))])];
        let out = apply_mappings(input, &[FieldMap::new("a", "x"), FieldMap::new("b", "y")]);
        assert_eq!(out[0], rec(&[("x", Value::Int(1))]));
        assert_eq!(out[1], rec(&[("y", Value::Int(2))]));
    }

    #[test]
    fn duplicate_destination_last_write_wins() {
        let input = vec![rec(&[("a", Value::Int(1)), ("b", Value::Int(2))])];
        let out = apply_mappings(input, &[FieldMap::new("a", "x"), FieldMap::new("b", "x")]);
        assert_eq!(out[0], rec(&[("x", Value::Int(2))]));
    }

    #[test]
    fn one_source_can_feed_many_destinations() {
        let input = vec![rec(&[("a", Value::from("v"))])];
        let out = apply_mappings(input, &[FieldMap::new("a", "x"), FieldMap::new("a", "y")]);
        assert_eq!(out[0].len(), 2);
    }
}
