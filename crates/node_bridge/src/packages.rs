//! Dependency provisioning.
//!
//! A bridge configuration declares the third-party modules it needs as
//! [`PackageRequirement`]s. Before a fragment is evaluated, the provisioner
//! makes sure the modules root actually holds them: requirements without a
//! writer are batch-installed from the registry with
//! `npm install --no-save`, while requirements carrying a [`PackageWriter`]
//! are synthesized locally under `{root}/node_modules/{name}` with no network
//! access.
//!
//! Installation is assumed monotonic within a process: once a `node_modules`
//! directory has been observed under a root, that root is memoized as
//! installed and later checks are free. A negative probe is never memoized.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, LazyLock, Mutex as StdMutex, PoisonError};

use regex::Regex;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::{BridgeError, Result};

/// Matches npm's "package not found" stderr lines and captures the offending
/// specifier. Modern npm prefixes these with `npm error`, older versions with
/// `npm ERR!`.
static NOT_FOUND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"npm (?:ERR!|error) 404.*?:\s*(.*)").unwrap());

/// Roots under which a `node_modules` directory has been observed.
static INSTALLED_ROOTS: LazyLock<StdMutex<HashSet<PathBuf>>> =
    LazyLock::new(|| StdMutex::new(HashSet::new()));

/// Per-root locks serializing first-time installs into the same root.
static INSTALL_LOCKS: LazyLock<StdMutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    LazyLock::new(|| StdMutex::new(HashMap::new()));

/// Synthesizes a package's files into a target directory instead of fetching
/// it from the registry.
pub trait PackageWriter: Send + Sync {
    /// Populates `dir` (already created, `{root}/node_modules/{name}`) with
    /// the package's files.
    ///
    /// # Errors
    /// Returns any filesystem error encountered while writing.
    fn write_package(&self, dir: &Path) -> io::Result<()>;
}

/// A [`PackageWriter`] backed by static text resources, typically embedded
/// with `include_str!`. Each resource is written under the target directory
/// using the trailing segment of its resource path as the file name.
pub struct ResourcePackageWriter {
    resources: Vec<(&'static str, &'static str)>,
}

impl ResourcePackageWriter {
    pub fn new(resources: impl IntoIterator<Item = (&'static str, &'static str)>) -> Self {
        Self {
            resources: resources.into_iter().collect(),
        }
    }
}

impl PackageWriter for ResourcePackageWriter {
    fn write_package(&self, dir: &Path) -> io::Result<()> {
        for (path, content) in &self.resources {
            let file_name = path.rsplit('/').next().unwrap_or(path);
            std::fs::write(dir.join(file_name), content)?;
        }

        Ok(())
    }
}

/// One declared third-party module dependency of a bridge configuration.
#[derive(Clone)]
pub struct PackageRequirement {
    name: String,
    version: String,
    writer: Option<Arc<dyn PackageWriter>>,
}

impl PackageRequirement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "latest".to_string(),
            writer: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Attaches a writer; the requirement will be synthesized locally and
    /// never passed to the registry installer.
    pub fn with_writer(mut self, writer: Arc<dyn PackageWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Display for PackageRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

impl fmt::Debug for PackageRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageRequirement")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("writer", &self.writer.is_some())
            .finish()
    }
}

pub(crate) struct PackageManager {
    owner: String,
    root: PathBuf,
    requirements: Vec<PackageRequirement>,
    npm_program: String,
}

impl PackageManager {
    pub(crate) fn new(
        owner: impl Into<String>,
        root: PathBuf,
        requirements: Vec<PackageRequirement>,
    ) -> Self {
        Self {
            owner: owner.into(),
            root,
            requirements,
            npm_program: default_npm_program().to_string(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_npm_program(mut self, program: impl Into<String>) -> Self {
        self.npm_program = program.into();
        self
    }

    pub(crate) fn has_requirements(&self) -> bool {
        !self.requirements.is_empty()
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    /// Makes sure every declared requirement is present under the root.
    /// Cheap no-op once the root is known installed.
    pub(crate) async fn ensure_installed(&self) -> Result<()> {
        if self.requirements.is_empty() || is_installed(&self.root) {
            return Ok(());
        }

        let lock = install_lock(&self.root);
        let _held = lock.lock().await;

        // Another caller may have finished the install while we waited.
        if is_installed(&self.root) {
            return Ok(());
        }

        std::fs::create_dir_all(&self.root)
            .map_err(|err| synthesis_error("modules root", &self.root, &err))?;

        let (registry, stubbed): (Vec<_>, Vec<_>) = self
            .requirements
            .iter()
            .partition(|req| req.writer.is_none());

        self.install_from_registry(&registry).await?;
        self.write_stub_packages(&stubbed)?;

        mark_installed(&self.root);
        Ok(())
    }

    async fn install_from_registry(&self, requirements: &[&PackageRequirement]) -> Result<()> {
        if requirements.is_empty() {
            return Ok(());
        }

        let specs: Vec<String> = requirements.iter().map(ToString::to_string).collect();
        log::debug!("installing packages for '{}': {}", self.owner, specs.join(" "));

        let output = Command::new(&self.npm_program)
            .arg("install")
            .arg("--no-save")
            .args(&specs)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| {
                BridgeError::Unknown(format!(
                    "failed to run '{} install': {err}",
                    self.npm_program
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let unresolvable = stderr
                .lines()
                .filter_map(|line| NOT_FOUND_RE.captures(line))
                .map(|caps| caps[1].trim().to_string())
                .collect();

            return Err(BridgeError::PackageInstall {
                owner: self.owner.clone(),
                unresolvable,
            });
        }

        Ok(())
    }

    fn write_stub_packages(&self, requirements: &[&PackageRequirement]) -> Result<()> {
        for requirement in requirements {
            let package_dir = self.root.join("node_modules").join(&requirement.name);

            std::fs::create_dir_all(&package_dir)
                .map_err(|err| synthesis_error(&requirement.name, &package_dir, &err))?;

            if let Some(writer) = &requirement.writer {
                writer
                    .write_package(&package_dir)
                    .map_err(|err| synthesis_error(&requirement.name, &package_dir, &err))?;
            }
        }

        Ok(())
    }
}

fn synthesis_error(what: &str, path: &Path, err: &io::Error) -> BridgeError {
    BridgeError::Unknown(format!(
        "failed to synthesize '{what}' under {}: {err}",
        path.display()
    ))
}

fn is_installed(root: &Path) -> bool {
    let mut memo = INSTALLED_ROOTS.lock().unwrap_or_else(PoisonError::into_inner);

    if memo.contains(root) {
        return true;
    }

    if root.join("node_modules").is_dir() {
        memo.insert(root.to_path_buf());
        return true;
    }

    false
}

fn mark_installed(root: &Path) {
    INSTALLED_ROOTS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(root.to_path_buf());
}

fn install_lock(root: &Path) -> Arc<Mutex<()>> {
    let mut locks = INSTALL_LOCKS.lock().unwrap_or_else(PoisonError::into_inner);

    Arc::clone(
        locks
            .entry(root.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(()))),
    )
}

fn default_npm_program() -> &'static str {
    if cfg!(windows) { "npm.cmd" } else { "npm" }
}
