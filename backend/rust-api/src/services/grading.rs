//! Automatic grading of submissions against a task's canonical answer.
//!
//! Auto-graded tasks store their answer as a JSON sequence. A submission is
//! normalised into a sequence of the same length and compared position by
//! position, ignoring case and surrounding whitespace. The score is the share
//! of matching positions on a 0-100 scale, rounded with [`round2`].

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;
use std::str::FromStr;

use crate::error::{AppError, AppResult};
use crate::models::task::Task;

/// Rounds half away from zero to two decimals. Used for scores and averages alike.
///
/// The rounding happens on the shortest decimal form of `value`, so `1.005`
/// is a tie and becomes `1.01` even though its binary value is slightly lower.
pub fn round2(value: f64) -> f64 {
    if !value.is_finite() {
        return value;
    }
    Decimal::from_str(&value.to_string())
        .ok()
        .and_then(|d| {
            d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
                .to_f64()
        })
        .unwrap_or(value)
}

/// Parses a stored canonical answer. Anything other than a JSON array is a
/// data-integrity problem: the task cannot be graded.
pub fn parse_canonical(task_id: i64, raw: Option<&str>) -> AppResult<Vec<Value>> {
    let raw = raw.ok_or_else(|| {
        AppError::data_integrity(format!("Task {} has no canonical answer", task_id))
    })?;

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(other) => Err(AppError::data_integrity(format!(
            "Canonical answer of task {} is not a sequence (found {})",
            task_id,
            json_kind(&other)
        ))),
        Err(e) => Err(AppError::data_integrity(format!(
            "Canonical answer of task {} is not valid JSON: {}",
            task_id, e
        ))),
    }
}

/// Turns whatever the student sent into exactly `expected_len` comparable
/// slots. Missing positions are `None` and never match.
pub fn normalize_submission(answers: &Value, expected_len: usize) -> Vec<Option<String>> {
    let items: Vec<Value> = match answers {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(items)) => items,
            _ => vec![answers.clone()],
        },
        scalar => vec![scalar.clone()],
    };

    let mut slots: Vec<Option<String>> = items
        .iter()
        .take(expected_len)
        .map(|v| Some(comparable_text(v)))
        .collect();
    slots.resize(expected_len, None);
    slots
}

/// Percentage of positions where the submission matches the expected value.
pub fn score_sequences(expected: &[Value], submitted: &[Option<String>]) -> f64 {
    if expected.is_empty() {
        return 0.0;
    }

    let matches = expected
        .iter()
        .zip(submitted)
        .filter(|(want, got)| match got {
            Some(got) => comparable_text(want).to_lowercase() == got.to_lowercase(),
            None => false,
        })
        .count();

    round2(matches as f64 / expected.len() as f64 * 100.0)
}

/// Score of a submission, or `None` when the task type needs a human grader.
pub fn grade(task: &Task, answers: &Value) -> AppResult<Option<f64>> {
    if !task.task_type.is_auto_graded() {
        return Ok(None);
    }

    let expected = parse_canonical(task.id, task.answer.as_deref())?;
    let submitted = normalize_submission(answers, expected.len());
    Ok(Some(score_sequences(&expected, &submitted)))
}

/// Text form used for comparison: strings trimmed, whole numbers without a
/// fractional part, everything else as compact JSON.
fn comparable_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => (f as i64).to_string(),
            _ => n.to_string(),
        },
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::TaskType;
    use chrono::Utc;
    use serde_json::json;

    fn task(task_type: TaskType, answer: Option<&str>) -> Task {
        Task {
            id: 42,
            title: "Drill".to_string(),
            task_type,
            content: None,
            difficulty: None,
            classroom_id: 1,
            teacher_id: 1,
            answer: answer.map(str::to_string),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn all_matching_elements_score_100() {
        let t = task(TaskType::Addition, Some(r#"[2, 4, "6"]"#));
        assert_eq!(grade(&t, &json!(["2", "4", "6"])).unwrap(), Some(100.0));
    }

    #[test]
    fn no_matching_elements_score_0() {
        let t = task(TaskType::Multiplication, Some("[1, 2, 3]"));
        assert_eq!(grade(&t, &json!(["9", "9", "9"])).unwrap(), Some(0.0));
    }

    #[test]
    fn partial_match_is_rounded_to_two_decimals() {
        let t = task(TaskType::Subtraction, Some(r#"[2, 4, "6"]"#));
        assert_eq!(grade(&t, &json!(["2", "5", "6"])).unwrap(), Some(66.67));

        let t = task(TaskType::Division, Some("[1, 2, 3]"));
        assert_eq!(grade(&t, &json!([1, 0, 0])).unwrap(), Some(33.33));
    }

    #[test]
    fn comparison_ignores_case_and_whitespace() {
        let t = task(TaskType::MultipleChoice, Some(r#"["B", "c", " True "]"#));
        assert_eq!(grade(&t, &json!(["b", " C", "true"])).unwrap(), Some(100.0));
    }

    #[test]
    fn short_and_long_submissions_are_aligned_to_expected_length() {
        let t = task(TaskType::FillInBlank, Some(r#"["cat", "dog", "cow", "pig"]"#));
        assert_eq!(grade(&t, &json!(["cat", "dog"])).unwrap(), Some(50.0));
        assert_eq!(
            grade(&t, &json!(["cat", "dog", "cow", "pig", "hen"])).unwrap(),
            Some(100.0)
        );
    }

    #[test]
    fn encoded_and_scalar_submissions_are_normalised() {
        let t = task(TaskType::Addition, Some("[7, 8]"));
        assert_eq!(grade(&t, &json!("[7, 8]")).unwrap(), Some(100.0));
        assert_eq!(grade(&t, &json!(7)).unwrap(), Some(50.0));
        assert_eq!(grade(&t, &Value::Null).unwrap(), Some(0.0));
    }

    #[test]
    fn whole_floats_match_integers() {
        let t = task(TaskType::MixedOperations, Some("[6, 2.5]"));
        assert_eq!(grade(&t, &json!([6.0, "2.5"])).unwrap(), Some(100.0));
    }

    #[test]
    fn open_ended_is_never_scored() {
        let t = task(TaskType::OpenEnded, Some("not even json"));
        assert_eq!(grade(&t, &json!(["anything"])).unwrap(), None);
        let t = task(TaskType::OpenEnded, None);
        assert_eq!(grade(&t, &json!("essay text")).unwrap(), None);
    }

    #[test]
    fn malformed_canonical_answer_is_a_data_integrity_error() {
        let not_json = task(TaskType::Addition, Some("2, 4, 6"));
        let err = grade(&not_json, &json!(["2"])).unwrap_err();
        assert_eq!(err.code(), "data_integrity_error");

        let scalar = task(TaskType::Addition, Some("42"));
        let err = grade(&scalar, &json!(["42"])).unwrap_err();
        assert_eq!(err.code(), "data_integrity_error");

        let missing = task(TaskType::FillInBlank, None);
        assert!(grade(&missing, &json!(["x"])).is_err());
    }

    #[test]
    fn empty_canonical_sequence_scores_zero() {
        let t = task(TaskType::Addition, Some("[]"));
        assert_eq!(grade(&t, &json!([])).unwrap(), Some(0.0));
    }

    #[test]
    fn round2_rounds_half_away_from_zero() {
        assert_eq!(round2(66.666_666), 66.67);
        assert_eq!(round2(12.345), 12.35);
        assert_eq!(round2(80.0), 80.0);
    }

    #[test]
    fn round2_treats_decimal_ties_as_ties() {
        assert_eq!(round2(1.005), 1.01);
        assert_eq!(round2(2.675), 2.68);
        assert_eq!(round2(-1.005), -1.01);
        // Average of 1.00 and 1.01.
        assert_eq!(round2((1.0 + 1.01) / 2.0), 1.01);
        assert_eq!(round2(200.0 / 3.0), 66.67);
        assert!(round2(f64::NAN).is_nan());
    }
}
