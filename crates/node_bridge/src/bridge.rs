//! The process bridge: owns one runtime child process, frames fragments onto
//! its input stream, and correlates framed replies back to callers.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;

use crate::demux::{self, Channel, ConsoleSink, LogConsoleSink};
use crate::frame;
use crate::packages::{PackageManager, PackageRequirement};
use crate::pending::{PendingCalls, PendingGuard};
use crate::{BridgeError, Result};

/// Inline bootstrap executed by the runtime: reads framed requests from
/// stdin, evaluates them, writes framed replies.
const BIOS_SOURCE: &str = include_str!("../js/bios.js");
/// Module-resolution override, prepended to the bootstrap when the bridge
/// declares package requirements.
const RESOLVER_SOURCE: &str = include_str!("../js/resolver.js");

const DEFAULT_PROGRAM: &str = "node";

/// Configures and builds a [`NodeBridge`]. All directories are explicit;
/// nothing is discovered from ambient context.
pub struct BridgeBuilder {
    name: String,
    program: String,
    working_dir: Option<PathBuf>,
    modules_root: Option<PathBuf>,
    requirements: Vec<PackageRequirement>,
    startup_fragments: Vec<String>,
    sink: Arc<dyn ConsoleSink>,
    bootstrap: bool,
}

impl BridgeBuilder {
    fn new() -> Self {
        Self {
            name: "node_bridge".to_string(),
            program: DEFAULT_PROGRAM.to_string(),
            working_dir: None,
            modules_root: None,
            requirements: Vec::new(),
            startup_fragments: Vec::new(),
            sink: Arc::new(LogConsoleSink),
            bootstrap: true,
        }
    }

    /// Names this configuration; surfaces in package-install failures.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Overrides the runtime executable (default `node`).
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Working directory for the runtime process.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Root directory under which required modules are installed and
    /// resolved. Defaults to a per-user data directory.
    pub fn modules_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.modules_root = Some(root.into());
        self
    }

    pub fn require(mut self, requirement: PackageRequirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    /// Queues a fragment to be evaluated during [`NodeBridge::start`], after
    /// any resolution setup and before control returns to the caller.
    pub fn startup_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.startup_fragments.push(fragment.into());
        self
    }

    /// Replaces the console sink receiving non-frame child output.
    pub fn console_sink(mut self, sink: Arc<dyn ConsoleSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Spawns the program bare, without the inline bootstrap arguments. Lets
    /// tests use a loopback process that echoes frames back.
    #[cfg(test)]
    pub(crate) fn without_bootstrap(mut self) -> Self {
        self.bootstrap = false;
        self
    }

    pub fn build(self) -> NodeBridge {
        let modules_root = self
            .modules_root
            .unwrap_or_else(default_modules_root);

        NodeBridge {
            program: self.program,
            working_dir: self.working_dir,
            startup_fragments: self.startup_fragments,
            sink: self.sink,
            bootstrap: self.bootstrap,
            packages: PackageManager::new(self.name, modules_root, self.requirements),
            calls: Arc::new(PendingCalls::default()),
            next_id: AtomicU64::new(1),
            child: None,
            stdin: None,
        }
    }
}

/// One host-side bridge driving one runtime child process. Fragments
/// submitted through [`eval`](Self::eval) share a single runtime session in
/// submission order; results may settle out of order when a fragment is
/// asynchronous on the runtime side, which the per-identifier correlation
/// makes safe.
pub struct NodeBridge {
    program: String,
    working_dir: Option<PathBuf>,
    startup_fragments: Vec<String>,
    sink: Arc<dyn ConsoleSink>,
    bootstrap: bool,
    packages: PackageManager,
    calls: Arc<PendingCalls>,
    next_id: AtomicU64,
    child: Option<Child>,
    stdin: Option<Mutex<ChildStdin>>,
}

impl NodeBridge {
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::new()
    }

    /// Spawns the runtime process with the inline bootstrap, wires both
    /// output streams into the demultiplexer, and evaluates any queued
    /// startup fragments.
    ///
    /// When package requirements are declared, the resolution override and
    /// the modules-root configuration are part of the bootstrap source
    /// itself, so no fragment can run before resolution is redirected.
    ///
    /// # Errors
    /// [`BridgeError::Launch`] when the runtime executable cannot be spawned;
    /// the error carries the `PATH` that was searched. Failures of the
    /// startup fragments propagate as from [`eval`](Self::eval).
    pub async fn start(&mut self) -> Result<()> {
        let mut command = Command::new(&self.program);

        if self.bootstrap {
            command.arg("-e").arg(self.bootstrap_source());
        }

        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| BridgeError::Launch {
                program: self.program.clone(),
                path: std::env::var("PATH").unwrap_or_default(),
                source: err,
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        if let Some(stdout) = stdout {
            tokio::spawn(demux::pump(
                stdout,
                Channel::Out,
                Arc::clone(&self.calls),
                Arc::clone(&self.sink),
            ));
        }

        if let Some(stderr) = stderr {
            tokio::spawn(demux::pump(
                stderr,
                Channel::Err,
                Arc::clone(&self.calls),
                Arc::clone(&self.sink),
            ));
        }

        self.stdin = stdin.map(Mutex::new);
        self.child = Some(child);

        let startup = std::mem::take(&mut self.startup_fragments);
        for fragment in &startup {
            self.eval(fragment).await?;
        }

        Ok(())
    }

    /// Evaluates a script fragment in the runtime session and returns the
    /// JSON-serialized result text.
    ///
    /// Declared package requirements are provisioned first (a cheap no-op
    /// once installed). There is no built-in deadline; callers that need one
    /// should wrap this in their own timeout.
    ///
    /// # Errors
    /// [`BridgeError::NotStarted`] before `start()` or after disposal,
    /// [`BridgeError::PackageInstall`] when provisioning fails,
    /// [`BridgeError::Evaluation`] with the runtime's message verbatim when
    /// the fragment throws, and [`BridgeError::Unknown`] when the runtime
    /// exits before the evaluation settles.
    pub async fn eval(&self, fragment: &str) -> Result<String> {
        if self.stdin.is_none() {
            return Err(BridgeError::NotStarted);
        }

        self.packages.ensure_installed().await?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = self.calls.register(id);
        let _guard = PendingGuard::new(Arc::clone(&self.calls), id);

        self.write_request(id, fragment).await?;

        match rx.await {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(message)) => Err(BridgeError::Evaluation(message)),
            Err(_) => Err(BridgeError::Unknown(
                "the runtime exited before the evaluation settled".to_string(),
            )),
        }
    }

    /// Like [`eval`](Self::eval), deserializing the result into `T`. A
    /// runtime result of `undefined` or `null` (case-insensitive) maps to
    /// `T::default()` instead of attempting a JSON parse.
    ///
    /// # Errors
    /// As [`eval`](Self::eval); additionally [`BridgeError::Unknown`] when
    /// the result text does not decode into `T`.
    pub async fn eval_as<T>(&self, fragment: &str) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let content = self.eval(fragment).await?;
        decode_result(&content)
    }

    /// Root directory the bridge provisions modules under.
    pub fn modules_root(&self) -> &std::path::Path {
        self.packages.root()
    }

    /// Terminates the runtime process if it is still alive. Idempotent, never
    /// errors, and safe to call on a bridge that was never started. Pending
    /// evaluations settle with [`BridgeError::Unknown`] as the streams close.
    pub fn dispose(&mut self) {
        if let Some(child) = self.child.as_mut() {
            // Teardown errors are swallowed; the state is being discarded.
            let _ = child.start_kill();
        }

        self.child = None;
        self.stdin = None;
        self.calls.clear();
    }

    fn bootstrap_source(&self) -> String {
        if self.packages.has_requirements() {
            let root = serde_json::Value::String(self.packages.root().display().to_string());
            format!("{RESOLVER_SOURCE}\nsetResolveRootPath({root});\n{BIOS_SOURCE}")
        } else {
            BIOS_SOURCE.to_string()
        }
    }

    async fn write_request(&self, id: u64, fragment: &str) -> Result<()> {
        let line = format!("{}\n", frame::encode(frame::SCRIPT_KIND, id, fragment));

        let Some(stdin) = self.stdin.as_ref() else {
            return Err(BridgeError::NotStarted);
        };

        let mut stdin = stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|err| BridgeError::Unknown(format!("failed to write to the runtime: {err}")))?;
        stdin
            .flush()
            .await
            .map_err(|err| BridgeError::Unknown(format!("failed to write to the runtime: {err}")))
    }
}

impl Drop for NodeBridge {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Maps the runtime's own `undefined`/`null` markers to `T`'s zero value;
/// anything else goes through serde.
pub(crate) fn decode_result<T>(content: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if content.eq_ignore_ascii_case("undefined") || content.eq_ignore_ascii_case("null") {
        return Ok(T::default());
    }

    serde_json::from_str(content)
        .map_err(|err| BridgeError::Unknown(format!("failed to decode evaluation result: {err}")))
}

fn default_modules_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("node_bridge")
}
