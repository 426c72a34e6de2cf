pub mod config;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod node_id;
pub mod prototype;
pub mod rate_limiter;
pub mod runner;
pub mod scheduler;
pub mod stats;
pub mod transport;

pub use config::WorkerConfig;
pub use error::SwarmError;
pub use message::{Frame, FrameType, HatchParams};
pub use prototype::{BoxFuture, ExecutionContext, Prototype, PrototypeSet, VirtualClient};
pub use rate_limiter::RateLimiter;
pub use runner::{Runner, RunnerState};
pub use scheduler::Scheduler;
pub use stats::{Outcome, StatsAggregator, StatsHandle, StatsSnapshot};
pub use transport::{TcpTransport, Transport};
