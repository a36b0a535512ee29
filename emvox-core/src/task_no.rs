//! Human-readable task numbers shown in snapshots and listings.

use chrono::{DateTime, Utc};

use crate::types::{TaskId, UserId};

/// `U{user:04}-{yyyyMMdd}-{task:04}`, e.g. `U0007-20250305-0042`. Ids
/// wider than four digits render in full.
pub fn format_task_no(owner: UserId, created_at: DateTime<Utc>, task: TaskId) -> String {
    format!(
        "U{:04}-{}-{:04}",
        owner.0,
        created_at.format("%Y%m%d"),
        task.0
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn pads_small_ids_to_four_digits() {
        let created = Utc.with_ymd_and_hms(2025, 3, 5, 10, 30, 0).unwrap();
        assert_eq!(
            format_task_no(UserId(7), created, TaskId(42)),
            "U0007-20250305-0042"
        );
    }

    #[test]
    fn wide_ids_are_not_truncated() {
        let created = Utc.with_ymd_and_hms(2025, 12, 31, 0, 0, 0).unwrap();
        assert_eq!(
            format_task_no(UserId(12345), created, TaskId(987654)),
            "U12345-20251231-987654"
        );
    }
}
