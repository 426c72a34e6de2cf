//! A minimal reference task prototype so `swarm-worker` is runnable out of
//! the box. Real deployments are expected to link `swarm-core` into a
//! binary that registers their own [`Prototype`]/[`VirtualClient`]
//! implementations instead of this one.

use std::time::{Duration, Instant};

use rand::Rng;
use swarm_core::{BoxFuture, ExecutionContext, Outcome, Prototype, VirtualClient};

/// Simulates one "request" by sleeping for a random duration in
/// `[min_ms, max_ms)` and reporting a success outcome.
#[derive(Clone)]
pub struct SleepTask {
    name: String,
    weight: f64,
    min_ms: u64,
    max_ms: u64,
}

impl Default for SleepTask {
    fn default() -> Self {
        Self {
            name: "demo/sleep".to_string(),
            weight: 1.0,
            min_ms: 50,
            max_ms: 250,
        }
    }
}

impl SleepTask {
    pub fn new(name: impl Into<String>, weight: f64, min_ms: u64, max_ms: u64) -> Self {
        Self {
            name: name.into(),
            weight,
            min_ms,
            max_ms,
        }
    }
}

impl Prototype for SleepTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn spawn(&self) -> Box<dyn VirtualClient> {
        Box::new(SleepClient {
            name: self.name.clone(),
            min_ms: self.min_ms,
            max_ms: self.max_ms,
        })
    }
}

struct SleepClient {
    name: String,
    min_ms: u64,
    max_ms: u64,
}

impl VirtualClient for SleepClient {
    fn initialize<'a>(&'a mut self, _ctx: &'a ExecutionContext) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }

    fn execute<'a>(&'a mut self, ctx: &'a ExecutionContext) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let delay_ms = rand::thread_rng().gen_range(self.min_ms..self.max_ms.max(self.min_ms + 1));
            let start = Instant::now();
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            ctx.stats.report(Outcome::Success {
                endpoint_type: "demo".to_string(),
                name: self.name.clone(),
                response_time_ms: start.elapsed().as_millis() as u64,
                response_length_bytes: 0,
            });
        })
    }

    fn dispose<'a>(&'a mut self, _ctx: &'a ExecutionContext) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}

/// Fails roughly one in `failure_rate_pct` iterations, to exercise the
/// `errors`/`num_failures` side of a stats snapshot (S6) without an external
/// target.
#[derive(Clone)]
pub struct FlakyTask {
    name: String,
    weight: f64,
    failure_rate_pct: u8,
}

impl FlakyTask {
    pub fn new(name: impl Into<String>, weight: f64, failure_rate_pct: u8) -> Self {
        Self {
            name: name.into(),
            weight,
            failure_rate_pct: failure_rate_pct.min(100),
        }
    }
}

impl Prototype for FlakyTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn spawn(&self) -> Box<dyn VirtualClient> {
        Box::new(FlakyClient {
            name: self.name.clone(),
            failure_rate_pct: self.failure_rate_pct,
        })
    }
}

struct FlakyClient {
    name: String,
    failure_rate_pct: u8,
}

impl VirtualClient for FlakyClient {
    fn initialize<'a>(&'a mut self, _ctx: &'a ExecutionContext) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }

    fn execute<'a>(&'a mut self, ctx: &'a ExecutionContext) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let start = Instant::now();
            tokio::time::sleep(Duration::from_millis(20)).await;
            let roll: u8 = rand::thread_rng().gen_range(0..100);
            if roll < self.failure_rate_pct {
                ctx.stats.report(Outcome::Failure {
                    endpoint_type: "demo".to_string(),
                    name: self.name.clone(),
                    response_time_ms: start.elapsed().as_millis() as u64,
                    error_message: "simulated upstream timeout".to_string(),
                });
            } else {
                ctx.stats.report(Outcome::Success {
                    endpoint_type: "demo".to_string(),
                    name: self.name.clone(),
                    response_time_ms: start.elapsed().as_millis() as u64,
                    response_length_bytes: 64,
                });
            }
        })
    }

    fn dispose<'a>(&'a mut self, _ctx: &'a ExecutionContext) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}
