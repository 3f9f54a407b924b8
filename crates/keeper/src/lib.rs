pub mod chain;
pub mod closer;
pub mod config;
pub mod error;
pub mod registry;
pub mod rpc_client;
pub mod scheduler;
pub mod solver;
pub mod state_machine;
pub mod status;

pub use chain::{ChainClient, HealthReport, TransactionIntent, TransactionOutcome};
pub use closer::{EpochCloser, PoolAction, PoolReport, SweepReport};
pub use config::{KeeperConfig, RetryConfig};
pub use error::{KeeperError, KeeperResult};
pub use registry::{IpfsRegistrySource, PoolMap, PoolRegistry, RegistryDocument, RegistrySource};
pub use rpc_client::{load_keypair, SolanaChainClient};
pub use scheduler::Scheduler;
pub use solver::solve;
pub use state_machine::classify;
pub use status::{EpochStatus, StatusBoard};
