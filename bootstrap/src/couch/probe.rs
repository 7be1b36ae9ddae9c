// Connectivity prober
//
// Polls `GET /` until the server answers 200 or the deadline passes. A refused connection
// or a non-200 answer only means "not yet". Fails no earlier than `timeout` and no later
// than `timeout + interval` plus the latency of the last request.

use crate::couch::client::CouchClient;
use crate::error::{BootstrapError, BootstrapResult};
use crate::models::state::{Reachability, ServerEndpoint};
use log::{debug, info, warn};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOptions {
    pub timeout: Duration,
    pub interval: Duration,
    /// Named in the timeout error so the operator knows where to look.
    pub log_hint: String,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            interval: Duration::from_millis(200),
            log_hint: "couch.log".to_string(),
        }
    }
}

/// One failed attempt, handed to the caller's progress callback.
#[derive(Debug, Clone)]
pub struct ProbeAttempt {
    pub attempt: u32,
    pub elapsed: Duration,
    pub detail: String,
}

pub async fn wait_until_reachable(
    client: &CouchClient,
    opts: &ProbeOptions,
    on_attempt: &(dyn Fn(&ProbeAttempt) + Send + Sync),
) -> BootstrapResult<ServerEndpoint> {
    let endpoint = client.endpoint();
    let started = Instant::now();
    let mut attempt: u32 = 0;

    info!(
        "[PHASE: probe] [STEP: start] Waiting for CouchDB at {} (timeout {:?}, interval {:?})",
        endpoint, opts.timeout, opts.interval
    );

    loop {
        attempt += 1;

        // A hung connection must not push us past the deadline by more than one interval.
        let budget = opts
            .timeout
            .saturating_sub(started.elapsed())
            .max(opts.interval);
        let detail = match tokio::time::timeout(budget, client.get_root()).await {
            Ok(Ok(resp)) if resp.status == 200 => {
                info!(
                    "[PHASE: probe] [STEP: reachable] CouchDB answered after {} attempt(s) in {:?}",
                    attempt,
                    started.elapsed()
                );
                return Ok(endpoint.with_reachability(Reachability::Reachable));
            }
            Ok(Ok(resp)) => format!("HTTP {}", resp.status),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("no answer within {:?}", budget),
        };

        let elapsed = started.elapsed();
        debug!(
            "[PHASE: probe] [STEP: attempt] Attempt {} not ready after {:?}: {}",
            attempt, elapsed, detail
        );
        on_attempt(&ProbeAttempt {
            attempt,
            elapsed,
            detail,
        });

        if elapsed >= opts.timeout {
            let timed_out = endpoint.with_reachability(Reachability::TimedOut);
            warn!(
                "[PHASE: probe] [STEP: timeout] CouchDB at {} is {:?} after {:?} ({} attempts)",
                timed_out,
                timed_out.reachability(),
                elapsed,
                attempt
            );
            return Err(BootstrapError::Unreachable {
                endpoint: timed_out.to_string(),
                elapsed,
                log_hint: opts.log_hint.clone(),
            });
        }

        tokio::time::sleep(opts.interval).await;
    }
}
