//! Query API metrics

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

pub(super) fn describe() {
    describe_counter!(
        "violations_api_queries_total",
        "Query service calls by operation and outcome"
    );
    describe_histogram!(
        "violations_api_query_duration_seconds",
        "Store time spent answering query service calls"
    );
}

/// Records duration and outcome when dropped or finished
pub struct QueryTimer {
    op: &'static str,
    start: Instant,
    outcome: &'static str,
}

impl QueryTimer {
    pub fn start(op: &'static str) -> Self {
        Self {
            op,
            start: Instant::now(),
            outcome: "error",
        }
    }

    pub fn success(mut self) {
        self.outcome = "ok";
    }

    pub fn rejected(mut self) {
        self.outcome = "invalid";
    }
}

impl Drop for QueryTimer {
    fn drop(&mut self) {
        counter!("violations_api_queries_total", "op" => self.op, "outcome" => self.outcome).increment(1);
        histogram!("violations_api_query_duration_seconds", "op" => self.op)
            .record(self.start.elapsed().as_secs_f64());
    }
}
