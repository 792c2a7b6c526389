//! `xload-client` — asynchronous client for a remote job service.
//!
//! Two layers:
//!
//! - the [`Dispatcher`] sends named operations (`POST <endpoint><operation>`
//!   with a JSON body) through a [`Transport`], admitting at most
//!   `active_request_limit` non-blocking calls at a time and queueing the rest
//!   in FIFO order;
//! - a [`JobRun`] drives a long-running server job through
//!   start → watch* → fetch, retrying recoverable watch/fetch failures.
//!
//! ```no_run
//! # async fn demo() -> xload_client::ClientResult<()> {
//! use serde_json::json;
//! use xload_client::{ClientConfig, XLoadClient};
//!
//! let client = XLoadClient::new(ClientConfig::new("http://localhost:50000/services/rs/XLoad/"))?;
//! let result = client
//!     .run_pack_bins(json!({ "items": [] }))
//!     .on_progress(|update| println!("{update:?}"))
//!     .run()
//!     .await?;
//! println!("{result}");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod family;
pub mod orchestrator;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::XLoadClient;
pub use config::{ClientConfig, Credentials};
pub use dispatcher::{Admission, CallHandle, Dispatcher, OperationCall};
pub use family::JobFamily;
pub use orchestrator::{JobRun, JobRunHandle, JobUpdate};
pub use transport::{Outcome, Transport, TransportKind};
pub use xload_core::{ClientError, ClientResult, Job, JobStatus, RetryPolicy};
