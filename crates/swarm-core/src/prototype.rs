//! Task prototypes and virtual clients (§3, Design Notes §9).
//!
//! A [`Prototype`] is a reusable, immutable template registered once before
//! start. Hatching clones it into a [`VirtualClient`] — the scheduler's unit
//! of execution — which carries its own independent state and is disposed on
//! stop/quit. Both traits are dyn-safe: the scheduler and runner hold
//! heterogeneous collections of user-supplied behaviors behind `Box<dyn _>`,
//! so `execute`/`initialize`/`dispose` return a boxed future rather than
//! using `async fn` in the trait (which would not be object-safe).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::stats::StatsHandle;

/// Future type returned by [`VirtualClient`] lifecycle methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Everything a virtual client's body needs to report outcomes and observe
/// cooperative cancellation (§5).
#[derive(Clone)]
pub struct ExecutionContext {
    pub cancel: CancellationToken,
    pub stats: StatsHandle,
}

impl ExecutionContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A reusable, immutable description of one virtual-client behavior,
/// registered once before the runner starts.
pub trait Prototype: Send + Sync {
    /// Identifier used in stats reports.
    fn name(&self) -> &str;

    /// Relative spawn proportion; must be non-negative.
    fn weight(&self) -> f64;

    /// Produce a fresh, independent clone to be hatched as a virtual client.
    fn spawn(&self) -> Box<dyn VirtualClient>;
}

/// One hatched instance of a [`Prototype`]. Owned by the scheduler; disposed
/// on stop/quit.
pub trait VirtualClient: Send {
    /// Called once before the client's first `execute`.
    fn initialize<'a>(&'a mut self, ctx: &'a ExecutionContext) -> BoxFuture<'a, ()>;

    /// Run one iteration. Must report exactly one success or failure via
    /// `ctx.stats` (§3) and must never panic — task exceptions are expected
    /// to be caught internally and converted into a failure outcome (§4.4).
    fn execute<'a>(&'a mut self, ctx: &'a ExecutionContext) -> BoxFuture<'a, ()>;

    /// Called once on shutdown.
    fn dispose<'a>(&'a mut self, ctx: &'a ExecutionContext) -> BoxFuture<'a, ()>;
}

/// A named, immutable list of registered prototypes (§3 invariant: immutable
/// after registration).
#[derive(Clone)]
pub struct PrototypeSet {
    prototypes: Arc<Vec<Box<dyn Prototype>>>,
}

impl PrototypeSet {
    pub fn new(prototypes: Vec<Box<dyn Prototype>>) -> Self {
        Self {
            prototypes: Arc::new(prototypes),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Box<dyn Prototype>> {
        self.prototypes.iter()
    }

    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    /// Compute, for each registered prototype in order, how many virtual
    /// clients it should receive out of `num_clients` (§4.7 spawning
    /// procedure).
    ///
    /// If the weight sum is positive, each prototype's share is
    /// `weight/weight_sum` rounded to the nearest integer count. If the
    /// weight sum is zero (all weights zero or the set is empty), clients are
    /// split as evenly as possible via floor division, with the remainder
    /// discarded (per spec: "use floor division with remainder discarded").
    pub fn allocate(&self, num_clients: u64) -> Vec<(usize, u64)> {
        if self.prototypes.is_empty() {
            return Vec::new();
        }
        let weight_sum: f64 = self.prototypes.iter().map(|p| p.weight()).sum();
        if weight_sum > 0.0 {
            self.prototypes
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    let share = p.weight() / weight_sum;
                    let count = (share * num_clients as f64).round() as u64;
                    (i, count)
                })
                .collect()
        } else {
            let count = num_clients / self.prototypes.len() as u64;
            self.prototypes.iter().enumerate().map(|(i, _)| (i, count)).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubClient;

    impl VirtualClient for StubClient {
        fn initialize<'a>(&'a mut self, _ctx: &'a ExecutionContext) -> BoxFuture<'a, ()> {
            Box::pin(async {})
        }
        fn execute<'a>(&'a mut self, _ctx: &'a ExecutionContext) -> BoxFuture<'a, ()> {
            Box::pin(async {})
        }
        fn dispose<'a>(&'a mut self, _ctx: &'a ExecutionContext) -> BoxFuture<'a, ()> {
            Box::pin(async {})
        }
    }

    struct StubPrototype {
        name: String,
        weight: f64,
    }

    impl Prototype for StubPrototype {
        fn name(&self) -> &str {
            &self.name
        }
        fn weight(&self) -> f64 {
            self.weight
        }
        fn spawn(&self) -> Box<dyn VirtualClient> {
            Box::new(StubClient)
        }
    }

    fn proto(name: &str, weight: f64) -> Box<dyn Prototype> {
        Box::new(StubPrototype {
            name: name.to_string(),
            weight,
        })
    }

    #[test]
    fn single_prototype_gets_all_clients() {
        let set = PrototypeSet::new(vec![proto("op", 1.0)]);
        let alloc = set.allocate(4);
        assert_eq!(alloc, vec![(0, 4)]);
    }

    #[test]
    fn weighted_spawn_matches_s2() {
        // S2: A{weight=1}, B{weight=3}, num_clients=8 => 2 and 6.
        let set = PrototypeSet::new(vec![proto("A", 1.0), proto("B", 3.0)]);
        let alloc = set.allocate(8);
        assert_eq!(alloc, vec![(0, 2), (1, 6)]);
    }

    #[test]
    fn zero_weight_fallback_matches_s3() {
        // S3: two prototypes, both weight 0, num_clients=10 => 5 each.
        let set = PrototypeSet::new(vec![proto("A", 0.0), proto("B", 0.0)]);
        let alloc = set.allocate(10);
        assert_eq!(alloc, vec![(0, 5), (1, 5)]);
    }

    #[test]
    fn zero_weight_fallback_discards_remainder() {
        let set = PrototypeSet::new(vec![proto("A", 0.0), proto("B", 0.0), proto("C", 0.0)]);
        let alloc = set.allocate(10);
        // floor(10/3) = 3 each, remainder 1 discarded.
        assert_eq!(alloc, vec![(0, 3), (1, 3), (2, 3)]);
    }

    #[test]
    fn empty_prototype_set_allocates_nothing() {
        let set = PrototypeSet::new(vec![]);
        assert!(set.allocate(10).is_empty());
    }

    #[test]
    fn prototype_set_is_immutable_after_construction() {
        let set = PrototypeSet::new(vec![proto("op", 1.0)]);
        let clone = set.clone();
        assert_eq!(clone.len(), set.len());
    }
}
