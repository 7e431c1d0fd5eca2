//! Stackflow worker
//!
//! Turns queue messages into deployments and replies:
//!
//! ```text
//! QueueMessage ─▶ StackCatalog ─▶ JobExecutor ─▶ Deployer ─▶ Configurator
//!                      │                │
//!                      ▼                ▼
//!                  rejected      success | failure
//! ```
//!
//! Every message gets exactly one [`Response`]. Deployment errors and panics
//! are caught by the executor; everything below it propagates errors
//! unmodified.

pub mod configure;
pub mod deploy;
pub mod error;
pub mod executor;
pub mod job;
pub mod listener;
pub mod log;
pub mod response;
pub mod stack;

pub use configure::{Configurator, Inventory, NoopConfigurator};
pub use deploy::{CloudStackDeployer, Deployer};
pub use error::{Result, WorkerError};
pub use executor::JobExecutor;
pub use job::{Job, QueueMessage};
pub use listener::{JobQueue, LinesQueue, Listener};
pub use log::{LogLevel, LogSink, TracingSink};
pub use response::{Response, Status};
pub use stack::{
    DirectoryCatalog, LoadBalancerSpec, SecurityGroupSpec, ServerSpec, StackCatalog, StackSpec,
    StaticCatalog,
};
