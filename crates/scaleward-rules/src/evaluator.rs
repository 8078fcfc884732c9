//! RuleEvaluator: runs one scaling rule under a wall-clock budget.
//!
//! Each call parses the rule, deep-copies the input bindings and runs the
//! interpreter on a dedicated OS thread. The async caller waits on a
//! oneshot with `tokio::time::timeout`; on expiry it raises the cancel
//! flag and returns `TimedOut` at once, and the worker unwinds at its next
//! deadline check, dropping everything it owned.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{EvalError, EvalResult};
use crate::interp::Interpreter;
use crate::limits::EvalLimits;
use crate::parser;
use crate::sink::SinkWriter;
use crate::value::Bindings;

/// Default wall-clock budget of one evaluation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Stack size of the evaluation thread.
const EVAL_STACK_SIZE: usize = 16 * 1024 * 1024;

fn banner(event: &str) -> String {
    format!(
        "==== [{}] Executing the user defined algorithm {event} ====",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S")
    )
}

/// Check rule text without running it.
pub fn check_syntax(source: &str) -> EvalResult<()> {
    parser::parse(source).map(|_| ())
}

/// Stateless evaluator: nothing is kept between calls.
#[derive(Clone)]
pub struct RuleEvaluator {
    sink: SinkWriter,
    timeout: Duration,
    limits: EvalLimits,
}

impl RuleEvaluator {
    pub fn new(sink: SinkWriter) -> Self {
        Self {
            sink,
            timeout: DEFAULT_TIMEOUT,
            limits: EvalLimits::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_limits(mut self, limits: EvalLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Evaluate `source` with the configured timeout.
    pub async fn evaluate(
        &self,
        source: &str,
        inputs: &Bindings,
        outputs: &[&str],
    ) -> EvalResult<Bindings> {
        self.evaluate_with_timeout(source, inputs, outputs, self.timeout)
            .await
    }

    /// Evaluate `source` with its inputs bound and return the requested
    /// outputs that exist after execution. Disallowed or malformed text
    /// fails with `Syntax` before anything runs.
    pub async fn evaluate_with_timeout(
        &self,
        source: &str,
        inputs: &Bindings,
        outputs: &[&str],
        timeout: Duration,
    ) -> EvalResult<Bindings> {
        let started = Instant::now();
        let program = parser::parse(source)?;

        let inputs = inputs.clone();
        let names: Vec<String> = outputs.iter().map(|s| s.to_string()).collect();
        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = cancel.clone();
        let sink = self.sink.clone();
        let limits = self.limits;
        let deadline = started + timeout;
        let (tx, rx) = oneshot::channel();

        std::thread::Builder::new()
            .name("rule-eval".to_string())
            .stack_size(EVAL_STACK_SIZE)
            .spawn(move || {
                sink.write_blocking(banner("starts..."));
                let mut emit = |line: String| sink.write_blocking(line);
                let result = {
                    let mut interp =
                        Interpreter::new(limits, Some(deadline), &worker_cancel, &mut emit);
                    interp.bind(inputs);
                    let names: Vec<&str> = names.iter().map(String::as_str).collect();
                    interp.run(&program).map(|()| interp.into_outputs(&names))
                };
                match &result {
                    Err(EvalError::Interrupted) => {}
                    Err(e) => {
                        sink.write_blocking(format!("{e}"));
                        sink.write_blocking(banner("finished."));
                    }
                    Ok(_) => sink.write_blocking(banner("finished.")),
                }
                let _ = tx.send(result);
            })
            .map_err(|e| EvalError::Worker(e.to_string()))?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Err(EvalError::Interrupted))) | Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                let elapsed = started.elapsed();
                self.sink.write(banner("terminated (timeout)")).await;
                warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    timeout_ms = timeout.as_millis() as u64,
                    "rule evaluation timed out"
                );
                Err(EvalError::TimedOut {
                    elapsed: elapsed.max(timeout),
                })
            }
            Ok(Ok(result)) => {
                debug!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    ok = result.is_ok(),
                    "rule evaluation finished"
                );
                result
            }
            Ok(Err(_)) => Err(EvalError::Worker(
                "evaluation worker exited without a result".to_string(),
            )),
        }
    }
}
