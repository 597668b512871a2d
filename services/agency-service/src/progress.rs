use std::collections::BTreeMap;

use crate::status::TaskStatus;

#[derive(Debug, Default, Clone)]
pub struct StatusCounts {
    pub by_status: BTreeMap<String, u64>,
}

impl StatusCounts {
    pub fn add(&mut self, status: &str, count: i64) {
        *self.by_status.entry(status.to_string()).or_default() += count.max(0) as u64;
    }

    pub fn total(&self) -> u64 {
        self.by_status.values().sum()
    }

    pub fn done(&self) -> u64 {
        self.count_where(|status| status.is_done())
    }

    pub fn cancelled(&self) -> u64 {
        self.count_where(|status| status == TaskStatus::Cancelled)
    }

    fn count_where(&self, predicate: impl Fn(TaskStatus) -> bool) -> u64 {
        self.by_status
            .iter()
            .filter(|(status, _)| status.parse::<TaskStatus>().is_ok_and(&predicate))
            .map(|(_, count)| *count)
            .sum()
    }

    /// Done share of non-cancelled tasks, rounded to a whole percent.
    pub fn percentage(&self) -> u8 {
        let countable = self.total().saturating_sub(self.cancelled());
        if countable == 0 {
            return 0;
        }
        let percent = (self.done() as f64 * 100.0 / countable as f64).round();
        percent.clamp(0.0, 100.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::StatusCounts;

    #[test]
    fn empty_client_has_zero_progress() {
        assert_eq!(StatusCounts::default().percentage(), 0);
    }

    #[test]
    fn cancelled_tasks_do_not_count() {
        let mut counts = StatusCounts::default();
        counts.add("completed", 1);
        counts.add("qc_approved", 1);
        counts.add("pending", 1);
        counts.add("cancelled", 5);
        assert_eq!(counts.total(), 8);
        assert_eq!(counts.done(), 2);
        assert_eq!(counts.percentage(), 67);
    }

    #[test]
    fn only_cancelled_is_zero() {
        let mut counts = StatusCounts::default();
        counts.add("cancelled", 3);
        assert_eq!(counts.percentage(), 0);
    }

    #[test]
    fn all_done_is_one_hundred() {
        let mut counts = StatusCounts::default();
        counts.add("data_entered", 4);
        counts.add("data_entered", 2);
        counts.add("mystery", -3);
        assert_eq!(counts.by_status.get("data_entered"), Some(&6));
        assert_eq!(counts.percentage(), 100);
    }
}
