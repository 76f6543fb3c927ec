//! Installation of the npm packages a notebook depends on.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::codegen::find_required_packages;
use crate::error::{Error, Result};

/// Makes sure the modules a cell imports are available to `require`.
pub trait ModuleInstaller {
    /// Install whatever `code` needs into `project_path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModuleInstall`] if a required module could not be
    /// installed.
    fn ensure_required_modules(&self, code: &str, project_path: &Path) -> Result<()>;
}

/// Installer that installs nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInstaller;

impl ModuleInstaller for NoopInstaller {
    fn ensure_required_modules(&self, _code: &str, _project_path: &Path) -> Result<()> {
        Ok(())
    }
}

/// Installs missing packages with `npm install --save`.
#[derive(Debug, Clone, Default)]
pub struct NpmInstaller {
    /// Path to npm; located on `PATH` when not set.
    npm_path: Option<PathBuf>,
}

impl NpmInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific npm executable.
    pub fn with_npm_path(npm_path: impl Into<PathBuf>) -> Self {
        Self {
            npm_path: Some(npm_path.into()),
        }
    }

    /// Packages `code` requires that are not yet in `node_modules`.
    pub fn missing_packages(code: &str, project_path: &Path) -> Vec<String> {
        find_required_packages(code)
            .into_iter()
            .filter(|package| !Self::is_installed(package, project_path))
            .collect()
    }

    fn is_installed(package: &str, project_path: &Path) -> bool {
        project_path
            .join("node_modules")
            .join(package)
            .join("package.json")
            .is_file()
    }

    fn find_npm(&self) -> Result<PathBuf> {
        if let Some(path) = &self.npm_path {
            return Ok(path.clone());
        }
        which::which("npm").map_err(|_| Error::ModuleInstall {
            module: None,
            message: "npm not found in PATH".to_string(),
        })
    }
}

impl ModuleInstaller for NpmInstaller {
    fn ensure_required_modules(&self, code: &str, project_path: &Path) -> Result<()> {
        let missing = Self::missing_packages(code, project_path);
        if missing.is_empty() {
            return Ok(());
        }

        let npm = self.find_npm()?;
        tracing::info!("Installing {}", missing.join(", "));

        let output = Command::new(&npm)
            .arg("install")
            .arg("--save")
            .args(&missing)
            .current_dir(project_path)
            .output()
            .map_err(|e| Error::ModuleInstall {
                module: Some(missing.join(" ")),
                message: format!("Failed to run npm: {}", e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ModuleInstall {
                module: Some(missing.join(" ")),
                message: stderr.trim().to_string(),
            });
        }

        tracing::debug!("Installed {}", missing.join(", "));
        Ok(())
    }
}
