//! Package probing and installation for prepare directives.

use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::packages::{Package, PackageFamily, extract_packages};
use crate::io::config::AgentConfig;
use crate::io::console::Confirmer;
use crate::io::process::run_command_with_timeout;

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Abstraction over the host package managers.
pub trait PackageManager {
    /// Whether `package` is already present. Probe failures count as "not installed".
    fn is_installed(&self, package: &Package) -> bool;

    /// Install `package` synchronously.
    fn install(&self, package: &Package) -> Result<()>;
}

/// Shells out to npm, pip, dpkg/apt-get, rpm/yum and brew.
#[derive(Debug, Clone)]
pub struct SystemPackages {
    pub probe_timeout: Duration,
    pub install_timeout: Duration,
    pub output_limit_bytes: usize,
}

impl SystemPackages {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            probe_timeout: PROBE_TIMEOUT,
            install_timeout: config.install_timeout(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    fn probe_commands(package: &Package) -> Vec<Command> {
        let name = package.name.as_str();
        match package.family {
            PackageFamily::Node => vec![
                command("npm", &["ls", "--depth=0", name]),
                command("npm", &["ls", "-g", "--depth=0", name]),
            ],
            PackageFamily::Python => vec![
                command("pip", &["show", name]),
                command("pip3", &["show", name]),
            ],
            PackageFamily::Apt => vec![command("dpkg", &["-s", name])],
            PackageFamily::Yum => vec![command("rpm", &["-q", name])],
            PackageFamily::Brew => vec![command("brew", &["list", name])],
        }
    }

    fn install_command(package: &Package) -> Command {
        let name = package.name.as_str();
        match package.family {
            PackageFamily::Node => command("npm", &["install", name]),
            PackageFamily::Python => command("pip", &["install", name]),
            PackageFamily::Apt => command("apt-get", &["install", "-y", name]),
            PackageFamily::Yum => command("yum", &["install", "-y", name]),
            PackageFamily::Brew => command("brew", &["install", name]),
        }
    }
}

fn command(program: &str, args: &[&str]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd
}

impl PackageManager for SystemPackages {
    #[instrument(skip_all, fields(package = %package.name, family = %package.family))]
    fn is_installed(&self, package: &Package) -> bool {
        for cmd in Self::probe_commands(package) {
            match run_command_with_timeout(cmd, self.probe_timeout, self.output_limit_bytes) {
                Ok(output) if output.success() => return true,
                Ok(output) => debug!(exit_code = output.exit_code(), "probe says not installed"),
                Err(err) => debug!(err = %err, "probe failed"),
            }
        }
        false
    }

    #[instrument(skip_all, fields(package = %package.name, family = %package.family))]
    fn install(&self, package: &Package) -> Result<()> {
        let output = run_command_with_timeout(
            Self::install_command(package),
            self.install_timeout,
            self.output_limit_bytes,
        )?;
        if output.success() {
            info!("installed");
            return Ok(());
        }
        let stderr = output.stderr_text();
        Err(anyhow!(
            "{} install exited with {}: {}",
            package.family,
            output.exit_code(),
            stderr.trim()
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageStatus {
    AlreadyInstalled,
    Installed,
    /// The operator declined the install.
    Skipped,
    Failed(String),
}

/// Per-package outcome of resolving one prepare directive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub entries: Vec<(Package, PackageStatus)>,
}

impl InstallReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Package, &str)> {
        self.entries.iter().filter_map(|(package, status)| match status {
            PackageStatus::Failed(reason) => Some((package, reason.as_str())),
            _ => None,
        })
    }

    pub fn skipped(&self) -> impl Iterator<Item = &Package> {
        self.entries
            .iter()
            .filter(|(_, status)| *status == PackageStatus::Skipped)
            .map(|(package, _)| package)
    }

    pub fn status_of(&self, name: &str) -> Option<&PackageStatus> {
        self.entries
            .iter()
            .find(|(package, _)| package.name == name)
            .map(|(_, status)| status)
    }
}

/// Check every package in `directive` and offer to install the missing ones.
///
/// One confirmation per missing package. Failures never stop the loop.
#[instrument(skip_all, fields(directive = %directive))]
pub fn resolve<M: PackageManager + ?Sized, C: Confirmer + ?Sized>(
    directive: &str,
    manager: &M,
    confirmer: &mut C,
) -> InstallReport {
    let mut report = InstallReport::default();
    for package in extract_packages(directive) {
        let status = if manager.is_installed(&package) {
            PackageStatus::AlreadyInstalled
        } else if !confirmer.confirm(&format!(
            "Package {} is not installed. Install it now?",
            package
        )) {
            PackageStatus::Skipped
        } else {
            match manager.install(&package) {
                Ok(()) => PackageStatus::Installed,
                Err(err) => {
                    warn!(package = %package.name, err = %err, "install failed");
                    PackageStatus::Failed(format!("{err:#}"))
                }
            }
        };
        report.entries.push((package, status));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    struct Answers(VecDeque<bool>, Vec<String>);

    impl Confirmer for Answers {
        fn confirm(&mut self, prompt: &str) -> bool {
            self.1.push(prompt.to_string());
            self.0.pop_front().unwrap_or(false)
        }
    }

    struct Fake {
        installed: Vec<&'static str>,
        broken: Vec<&'static str>,
        installs: RefCell<Vec<String>>,
    }

    impl PackageManager for Fake {
        fn is_installed(&self, package: &Package) -> bool {
            self.installed.contains(&package.name.as_str())
        }

        fn install(&self, package: &Package) -> Result<()> {
            self.installs.borrow_mut().push(package.name.clone());
            if self.broken.contains(&package.name.as_str()) {
                return Err(anyhow!("network down"));
            }
            Ok(())
        }
    }

    /// Verifies one failing install does not stop the remaining packages.
    #[test]
    fn failures_are_non_fatal() {
        let manager = Fake {
            installed: vec!["axios"],
            broken: vec!["requests"],
            installs: RefCell::new(Vec::new()),
        };
        let mut answers = Answers(VecDeque::from([true, false, true]), Vec::new());
        let report = resolve(
            "npm install axios; pip install requests flask; brew install jq",
            &manager,
            &mut answers,
        );

        assert_eq!(report.status_of("axios"), Some(&PackageStatus::AlreadyInstalled));
        assert!(matches!(report.status_of("requests"), Some(PackageStatus::Failed(r)) if r.contains("network down")));
        assert_eq!(report.status_of("flask"), Some(&PackageStatus::Skipped));
        assert_eq!(report.status_of("jq"), Some(&PackageStatus::Installed));
        assert_eq!(*manager.installs.borrow(), vec!["requests", "jq"]);
        assert_eq!(answers.1.len(), 3);
        assert!(answers.1[0].contains("requests (pip)"));
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.skipped().count(), 1);
    }

    #[test]
    fn empty_directive_asks_nothing() {
        let manager = Fake {
            installed: Vec::new(),
            broken: Vec::new(),
            installs: RefCell::new(Vec::new()),
        };
        let mut answers = Answers(VecDeque::new(), Vec::new());
        let report = resolve("echo nothing to do", &manager, &mut answers);
        assert!(report.is_empty());
        assert!(answers.1.is_empty());
    }

    #[test]
    fn probe_of_missing_tool_is_not_installed() {
        let packages = SystemPackages {
            probe_timeout: Duration::from_secs(5),
            install_timeout: Duration::from_secs(5),
            output_limit_bytes: 1024,
        };
        let package = Package::new("shellai-definitely-missing-pkg", PackageFamily::Yum);
        assert!(!packages.is_installed(&package));
    }
}
