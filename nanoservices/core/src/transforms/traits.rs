use fieldflow_utils::{Record, TransformError};

/// A record-at-a-time transformation.
///
/// Implementations see one record and nothing else: no aggregation, no
/// reordering, no access to neighbouring records.
pub trait Transform: Send + Sync {
    /// Source text, used in logs and error messages.
    fn expression(&self) -> &str;

    fn apply(&self, record: &mut Record) -> Result<(), TransformError>;
}

/// Apply every transform, in order, to every record. Stops at the first
/// failure.
pub fn apply_all<T: Transform>(
    records: &mut [Record],
    transforms: &[T],
) -> Result<(), TransformError> {
    for record in records.iter_mut() {
        for t in transforms {
            t.apply(record)?;
        }
    }
    Ok(())
}
