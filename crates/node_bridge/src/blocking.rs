//! Synchronous facade over [`NodeBridge`].
//!
//! The bridge lives on a dedicated OS thread with its own current-thread
//! tokio runtime; callers submit jobs over a channel and block on the reply.
//! Script errors and package-install failures keep their kind; every other
//! failure surfaces as [`BridgeError::Unknown`].

use std::thread;

use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};

use crate::bridge::{self, BridgeBuilder, NodeBridge};
use crate::{BridgeError, Result};

enum Job {
    Start(oneshot::Sender<Result<()>>),
    Eval {
        fragment: String,
        reply: oneshot::Sender<Result<String>>,
    },
    Dispose(oneshot::Sender<()>),
}

/// A [`NodeBridge`] driven from synchronous code.
pub struct BlockingBridge {
    jobs: mpsc::Sender<Job>,
}

impl BlockingBridge {
    /// Moves the configured bridge onto its own thread. The thread (and the
    /// runtime process, if started) shuts down when this handle is dropped.
    pub fn new(builder: BridgeBuilder) -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(16);

        thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to create the bridge runtime");

            rt.block_on(async move {
                let mut bridge: NodeBridge = builder.build();

                while let Some(job) = rx.recv().await {
                    match job {
                        Job::Start(reply) => {
                            let _ = reply.send(bridge.start().await);
                        }
                        Job::Eval { fragment, reply } => {
                            let _ = reply.send(bridge.eval(&fragment).await);
                        }
                        Job::Dispose(reply) => {
                            bridge.dispose();
                            let _ = reply.send(());
                        }
                    }
                }
            });
        });

        Self { jobs: tx }
    }

    /// Starts the runtime process.
    ///
    /// # Errors
    /// As [`NodeBridge::start`].
    pub fn start(&self) -> Result<()> {
        self.submit(Job::Start)?
    }

    /// Evaluates a fragment, blocking until its frame settles.
    ///
    /// # Errors
    /// [`BridgeError::Evaluation`] and [`BridgeError::PackageInstall`] keep
    /// their kind; any other failure is reported as [`BridgeError::Unknown`].
    pub fn eval(&self, fragment: &str) -> Result<String> {
        let fragment = fragment.to_string();
        self.submit(|reply| Job::Eval { fragment, reply })?
            .map_err(downgrade)
    }

    /// Evaluates a fragment and deserializes the result, with the same
    /// `undefined`/`null` zero-value mapping as [`NodeBridge::eval_as`].
    ///
    /// # Errors
    /// As [`eval`](Self::eval).
    pub fn eval_as<T>(&self, fragment: &str) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let content = self.eval(fragment)?;
        bridge::decode_result(&content).map_err(downgrade)
    }

    /// Terminates the runtime process. Idempotent; never errors.
    pub fn dispose(&self) {
        let _ = self.submit(Job::Dispose);
    }

    fn submit<T>(&self, job: impl FnOnce(oneshot::Sender<T>) -> Job) -> Result<T> {
        let (tx, rx) = oneshot::channel();

        self.jobs
            .blocking_send(job(tx))
            .map_err(|_| BridgeError::Unknown("the bridge thread has shut down".to_string()))?;

        rx.blocking_recv()
            .map_err(|_| BridgeError::Unknown("the bridge thread dropped the reply".to_string()))
    }
}

fn downgrade(err: BridgeError) -> BridgeError {
    match err {
        err @ (BridgeError::Evaluation(_)
        | BridgeError::PackageInstall { .. }
        | BridgeError::Unknown(_)) => err,
        other => BridgeError::Unknown(other.to_string()),
    }
}
