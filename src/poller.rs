use crate::error::Error;
use crate::logi;
use crate::normalize::GenerationStatus;
use serde_json::{json, Value};
use std::future::Future;
use std::time::{Duration, Instant};

/// One submitted generation being watched until it reports success.
#[derive(Debug, Clone)]
pub struct TrackedJob {
    pub operation_name: String,
    pub scene_id: Option<String>,
    pub status: GenerationStatus,
    pub fife_url: Option<String>,
    /// Latest operation body from the remote; echoed back on each check so
    /// the remote sees the freshest handle it gave us.
    pub operation: Value,
}

impl TrackedJob {
    pub fn new(operation_name: impl Into<String>, scene_id: Option<String>) -> Self {
        let operation_name = operation_name.into();
        Self {
            operation: json!({"name": operation_name}),
            operation_name,
            scene_id,
            status: GenerationStatus::Pending,
            fife_url: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == GenerationStatus::Successful
    }

    pub fn to_wire(&self) -> Value {
        json!({
            "operation": self.operation.clone(),
            "sceneId": self.scene_id.clone(),
            "status": self.status.as_wire(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct PollOptions {
    pub interval: Duration,
    /// Successful status fetches before giving up. None = unbounded.
    pub max_attempts: Option<u32>,
    /// Wall-clock limit. None = unbounded.
    pub timeout: Option<Duration>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(8),
            max_attempts: None,
            timeout: None,
        }
    }
}

/// Final state of a polling run. `jobs` is the last merged snapshot even when
/// a bound was exhausted, so callers can recover whatever subset finished.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub jobs: Vec<TrackedJob>,
    pub all_ready: bool,
    pub attempts: u32,
}

impl PollOutcome {
    pub fn ready_count(&self) -> usize {
        self.jobs.iter().filter(|j| j.is_ready()).count()
    }
}

/// Fold a batch status response into the tracked set. Jobs are matched by
/// operation name; a job already marked successful never regresses, whatever
/// the response claims on a later tick.
pub fn merge_status_response(jobs: &mut [TrackedJob], response: &Value) {
    let Some(ops) = response.get("operations").and_then(Value::as_array) else {
        return;
    };

    for entry in ops {
        let op_body = entry.get("operation");
        let Some(name) = op_body
            .and_then(|b| b.get("name"))
            .and_then(Value::as_str)
        else {
            continue;
        };
        let Some(job) = jobs.iter_mut().find(|j| j.operation_name == name) else {
            continue;
        };

        if let Some(body) = op_body {
            job.operation = body.clone();
        }

        if !job.is_ready() {
            if let Some(status) = entry.get("status").and_then(Value::as_str) {
                job.status = GenerationStatus::from_wire(status);
            }
        }

        let url = op_body
            .and_then(|b| b.get("metadata"))
            .and_then(|m| m.get("video"))
            .and_then(|v| v.get("fifeUrl"))
            .and_then(Value::as_str);
        if let Some(url) = url {
            job.fife_url = Some(url.to_string());
        }
    }
}

/// Poll `fetch` at a fixed interval until every tracked job is successful or
/// a bound is exhausted. A fetch error is "no new information this tick": it
/// neither aborts the loop nor counts toward `max_attempts`. On bound
/// exhaustion the last merged snapshot is returned, never an error.
pub async fn poll_until_ready<F, Fut>(
    mut fetch: F,
    mut jobs: Vec<TrackedJob>,
    opts: &PollOptions,
) -> PollOutcome
where
    F: FnMut(Vec<Value>) -> Fut,
    Fut: Future<Output = Result<Value, Error>>,
{
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        if jobs.iter().all(TrackedJob::is_ready) {
            return PollOutcome {
                all_ready: true,
                jobs,
                attempts,
            };
        }

        if let Some(max) = opts.max_attempts {
            if attempts >= max {
                logi(format!(
                    "Polling attempt limit ({}) reached; returning last snapshot",
                    max
                ));
                break;
            }
        }
        if let Some(timeout) = opts.timeout {
            if started.elapsed() >= timeout {
                logi(format!(
                    "Polling timeout ({:.1}s) reached; returning last snapshot",
                    timeout.as_secs_f64()
                ));
                break;
            }
        }

        let wire: Vec<Value> = jobs.iter().map(TrackedJob::to_wire).collect();
        match fetch(wire).await {
            Ok(response) => {
                attempts += 1;
                merge_status_response(&mut jobs, &response);
                let ready = jobs.iter().filter(|j| j.is_ready()).count();
                logi(format!(
                    "[poll {}] {}/{} jobs ready",
                    attempts,
                    ready,
                    jobs.len()
                ));
                if jobs.iter().all(TrackedJob::is_ready) {
                    return PollOutcome {
                        all_ready: true,
                        jobs,
                        attempts,
                    };
                }
            }
            Err(err) => {
                logi(format!("[poll] status check failed, will retry: {}", err));
            }
        }

        tokio::time::sleep(opts.interval).await;
    }

    PollOutcome {
        all_ready: false,
        jobs,
        attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn ready_response(names: &[&str]) -> Value {
        let ops: Vec<Value> = names
            .iter()
            .map(|n| {
                json!({
                    "operation": {
                        "name": n,
                        "metadata": {"video": {"fifeUrl": format!("https://cdn/{}.mp4", n)}}
                    },
                    "status": "MEDIA_GENERATION_STATUS_SUCCESSFUL"
                })
            })
            .collect();
        json!({"operations": ops})
    }

    fn pending_response(names: &[&str]) -> Value {
        let ops: Vec<Value> = names
            .iter()
            .map(|n| {
                json!({
                    "operation": {"name": n},
                    "status": "MEDIA_GENERATION_STATUS_PENDING"
                })
            })
            .collect();
        json!({"operations": ops})
    }

    fn fast() -> PollOptions {
        PollOptions {
            interval: Duration::from_millis(0),
            ..PollOptions::default()
        }
    }

    #[tokio::test]
    async fn stops_when_all_jobs_succeed() {
        let tick = Arc::new(AtomicU32::new(0));
        let jobs = vec![TrackedJob::new("a", None), TrackedJob::new("b", None)];

        let counter = tick.clone();
        let outcome = poll_until_ready(
            move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Ok(pending_response(&["a", "b"]))
                    } else {
                        Ok(ready_response(&["a", "b"]))
                    }
                }
            },
            jobs,
            &fast(),
        )
        .await;

        assert!(outcome.all_ready);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.ready_count(), 2);
        assert_eq!(
            outcome.jobs[0].fife_url.as_deref(),
            Some("https://cdn/a.mp4")
        );
    }

    #[tokio::test]
    async fn attempt_limit_returns_last_snapshot() {
        let jobs = vec![TrackedJob::new("a", None), TrackedJob::new("b", None)];
        let opts = PollOptions {
            max_attempts: Some(3),
            ..fast()
        };

        let outcome = poll_until_ready(
            |_| async { Ok(ready_response(&["a"])) },
            jobs,
            &opts,
        )
        .await;

        assert!(!outcome.all_ready);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.ready_count(), 1);
        assert!(outcome.jobs[0].is_ready());
        assert!(!outcome.jobs[1].is_ready());
    }

    #[tokio::test]
    async fn fetch_errors_do_not_count_against_the_bound() {
        let tick = Arc::new(AtomicU32::new(0));
        let jobs = vec![TrackedJob::new("a", None)];
        let opts = PollOptions {
            max_attempts: Some(1),
            ..fast()
        };

        let counter = tick.clone();
        let outcome = poll_until_ready(
            move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Error::Token("transient".to_string()))
                    } else {
                        Ok(ready_response(&["a"]))
                    }
                }
            },
            jobs,
            &opts,
        )
        .await;

        assert!(outcome.all_ready);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn successful_jobs_never_regress() {
        let mut jobs = vec![TrackedJob::new("a", Some("1".to_string()))];
        merge_status_response(&mut jobs, &ready_response(&["a"]));
        assert!(jobs[0].is_ready());

        merge_status_response(&mut jobs, &pending_response(&["a"]));
        assert!(jobs[0].is_ready());
        // URL sticks around from the earlier tick too.
        assert!(jobs[0].fife_url.is_some());
    }

    #[tokio::test]
    async fn zero_timeout_returns_immediately() {
        let jobs = vec![TrackedJob::new("a", None)];
        let opts = PollOptions {
            timeout: Some(Duration::from_secs(0)),
            ..fast()
        };
        let outcome = poll_until_ready(
            |_| async { Ok(ready_response(&["a"])) },
            jobs,
            &opts,
        )
        .await;
        assert!(!outcome.all_ready);
        assert_eq!(outcome.attempts, 0);
    }

    #[tokio::test]
    async fn empty_job_set_is_trivially_ready() {
        let outcome = poll_until_ready(|_| async { Ok(json!({})) }, Vec::new(), &fast()).await;
        assert!(outcome.all_ready);
        assert_eq!(outcome.attempts, 0);
    }
}
