//! Drive a long-lived, out-of-process Node.js runtime as a scriptable
//! evaluation engine.
//!
//! A [`NodeBridge`] owns one `node` child process bootstrapped with an inline
//! script that reads framed evaluation requests from stdin and writes framed
//! results back on stdout (successes) or stderr (failures). Script fragments
//! submitted through [`NodeBridge::eval`] share one runtime session, so
//! bindings introduced by an earlier fragment are visible to later ones.
//!
//! Third-party modules a bridge depends on are declared up front as
//! [`PackageRequirement`]s and provisioned on first use: registry packages are
//! batch-installed with `npm install --no-save`, while requirements carrying a
//! [`PackageWriter`] are synthesized locally under the bridge's modules root
//! with no network access.
//!
//! ```no_run
//! use node_bridge::NodeBridge;
//!
//! # async fn example() -> node_bridge::Result<()> {
//! let mut bridge = NodeBridge::builder().build();
//! bridge.start().await?;
//!
//! let sum: i64 = bridge.eval_as("200 + 202;").await?;
//! assert_eq!(sum, 402);
//! # Ok(())
//! # }
//! ```

mod blocking;
mod bridge;
mod demux;
mod frame;
mod packages;
mod pending;

pub use blocking::BlockingBridge;
pub use bridge::{BridgeBuilder, NodeBridge};
pub use demux::{ConsoleSink, LogConsoleSink};
pub use packages::{PackageRequirement, PackageWriter, ResourcePackageWriter};

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The runtime executable could not be found or started.
    #[error("failed to launch the '{program}' runtime (searched PATH: {path}): {source}")]
    Launch {
        program: String,
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The runtime reported a script error for a fragment. The message is the
    /// runtime's own, verbatim. The bridge stays usable afterwards.
    #[error("script evaluation failed: {0}")]
    Evaluation(String),

    /// One or more required packages could not be installed for the named
    /// bridge configuration. `unresolvable` lists the specifiers npm reported
    /// as not found; other install failures still fail the batch but are not
    /// individually named.
    #[error("unable to install required packages for '{owner}' (unresolvable: {unresolvable:?})")]
    PackageInstall {
        owner: String,
        unresolvable: Vec<String>,
    },

    /// An evaluation was attempted while the runtime process is not running.
    #[error("the runtime process is not running")]
    NotStarted,

    /// A failure in the bridge's own plumbing rather than in the evaluated
    /// script: a closed stream, a runtime that exited mid-call, or a success
    /// payload that failed to decode.
    #[error("encountered an unknown error while evaluating the script fragment: {0}")]
    Unknown(String),
}

#[cfg(test)]
mod tests;
