use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    grades_total: AtomicU64,
    grades_passed_total: AtomicU64,
    compile_failures_total: AtomicU64,
    testcase_timeouts_total: AtomicU64,
    contests_created_total: AtomicU64,
    contests_finished_total: AtomicU64,
    contests_active: AtomicU64,
    matches_created_total: AtomicU64,
    bot_ticks_total: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn graded(&self, passed: bool) {
        self.grades_total.fetch_add(1, Ordering::Relaxed);
        if passed {
            self.grades_passed_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn compile_failed(&self) {
        self.compile_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn testcase_timed_out(&self) {
        self.testcase_timeouts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn contest_created(&self) {
        self.contests_created_total.fetch_add(1, Ordering::Relaxed);
        self.contests_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn contest_finished(&self) {
        self.contests_finished_total.fetch_add(1, Ordering::Relaxed);
        self.decrement_active_contests();
    }

    pub fn match_created(&self) {
        self.matches_created_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bot_ticked(&self) {
        self.bot_ticks_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn render_prometheus(&self) -> String {
        format!(
            concat!(
                "# TYPE arena_grades_total counter\n",
                "arena_grades_total {}\n",
                "# TYPE arena_grades_passed_total counter\n",
                "arena_grades_passed_total {}\n",
                "# TYPE arena_compile_failures_total counter\n",
                "arena_compile_failures_total {}\n",
                "# TYPE arena_testcase_timeouts_total counter\n",
                "arena_testcase_timeouts_total {}\n",
                "# TYPE arena_contests_created_total counter\n",
                "arena_contests_created_total {}\n",
                "# TYPE arena_contests_finished_total counter\n",
                "arena_contests_finished_total {}\n",
                "# TYPE arena_contests_active gauge\n",
                "arena_contests_active {}\n",
                "# TYPE arena_matches_created_total counter\n",
                "arena_matches_created_total {}\n",
                "# TYPE arena_bot_ticks_total counter\n",
                "arena_bot_ticks_total {}\n"
            ),
            self.grades_total.load(Ordering::Relaxed),
            self.grades_passed_total.load(Ordering::Relaxed),
            self.compile_failures_total.load(Ordering::Relaxed),
            self.testcase_timeouts_total.load(Ordering::Relaxed),
            self.contests_created_total.load(Ordering::Relaxed),
            self.contests_finished_total.load(Ordering::Relaxed),
            self.contests_active.load(Ordering::Relaxed),
            self.matches_created_total.load(Ordering::Relaxed),
            self.bot_ticks_total.load(Ordering::Relaxed),
        )
    }

    fn decrement_active_contests(&self) {
        let mut current = self.contests_active.load(Ordering::Relaxed);
        while current > 0 {
            match self.contests_active.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MetricsRegistry;

    #[test]
    fn active_contests_do_not_underflow() {
        let metrics = MetricsRegistry::new();
        metrics.contest_finished();
        let rendered = metrics.render_prometheus();
        assert!(rendered.contains("arena_contests_active 0"));
        assert!(rendered.contains("arena_contests_finished_total 1"));
    }

    #[test]
    fn counts_passed_grades_separately() {
        let metrics = MetricsRegistry::new();
        metrics.graded(true);
        metrics.graded(false);
        let rendered = metrics.render_prometheus();
        assert!(rendered.contains("arena_grades_total 2"));
        assert!(rendered.contains("arena_grades_passed_total 1"));
    }
}
