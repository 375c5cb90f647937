//! Condition evaluation (§4.3.3). Writers evaluate every condition in a
//! frame eagerly since the source instance is already complete;
//! readers evaluate lazily, memoizing as they go, since the instance is
//! still being filled in. Both share this one recursive evaluator.

use crate::instance::{read_bytes_range, Instance};
use crate::script::Condition;

fn read_le_i64(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    i64::from_le_bytes(buf)
}

/// Evaluates condition `idx`, recursing into its parent chain first (a
/// condition with a failing parent is itself false, per §4.3.3).
/// Returns `None` only if the governing field's bytes aren't in the
/// instance yet, which the caller should treat as a failure - it means
/// a command ran out of order relative to the field it depends on.
pub fn evaluate(conditions: &[Condition], instance: &Instance, idx: usize, cache: &mut [Option<bool>]) -> Option<bool> {
    if let Some(value) = cache[idx] {
        return Some(value);
    }
    let cond = &conditions[idx];
    let parent_ok = match cond.parent {
        Some(parent_idx) => evaluate(conditions, instance, parent_idx, cache)?,
        None => true,
    };
    let value = if !parent_ok {
        false
    } else {
        let bytes = read_bytes_range(instance, cond.field_offset, cond.field_size)?;
        let raw = read_le_i64(bytes);
        cond.allowed_values.iter().any(|v| v.trim().parse::<i64>().ok() == Some(raw))
    };
    cache[idx] = Some(value);
    Some(value)
}

/// Evaluates every condition in `conditions` against a fully-populated
/// instance, for a writer's eager pass.
pub fn eager_all(conditions: &[Condition], instance: &Instance) -> Vec<bool> {
    let mut cache = vec![None; conditions.len()];
    (0..conditions.len()).map(|i| evaluate(conditions, instance, i, &mut cache).unwrap_or(false)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn condition(field_offset: usize, field_size: usize, allowed: &[&str], parent: Option<usize>) -> Condition {
        Condition {
            field_offset,
            field_size,
            allowed_values: allowed.iter().map(|s| s.to_string()).collect(),
            parent,
        }
    }

    #[test]
    fn matching_value_evaluates_true() {
        let mut instance = Instance::new();
        instance.insert(0, crate::instance::FieldValue::Bytes(vec![1, 0, 0, 0]));
        let conditions = vec![condition(0, 4, &["1", "2"], None)];
        assert_eq!(eager_all(&conditions, &instance), vec![true]);
    }

    #[test]
    fn a_failing_parent_forces_the_child_false_even_if_its_own_value_matches() {
        let mut instance = Instance::new();
        instance.insert(0, crate::instance::FieldValue::Bytes(vec![9, 0, 0, 0]));
        instance.insert(4, crate::instance::FieldValue::Bytes(vec![1, 0, 0, 0]));
        let conditions = vec![condition(0, 4, &["0"], None), condition(4, 4, &["1"], Some(0))];
        assert_eq!(eager_all(&conditions, &instance), vec![false, false]);
    }

    #[test]
    fn missing_governing_bytes_is_none() {
        let instance = Instance::new();
        let conditions = vec![condition(0, 4, &["1"], None)];
        let mut cache = vec![None];
        assert_eq!(evaluate(&conditions, &instance, 0, &mut cache), None);
    }
}
