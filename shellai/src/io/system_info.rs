//! Host facts attached to the first request of a session.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::io::process::run_command_with_timeout;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const PROBE_OUTPUT_LIMIT: usize = 4096;

const PACKAGE_MANAGERS: &[&str] = &["apt-get", "yum", "dnf", "brew", "pacman", "npm", "pip3"];
const WEB_SERVERS: &[&str] = &["nginx", "apache2", "httpd", "caddy"];
const DATABASES: &[&str] = &["mysql", "psql", "mongod", "redis-server", "sqlite3"];

/// Runtime name and the command that prints its version.
const LANGUAGES: &[(&str, &str, &[&str])] = &[
    ("Node.js", "node", &["--version"]),
    ("Python", "python3", &["--version"]),
    ("PHP", "php", &["--version"]),
    ("Java", "java", &["-version"]),
    ("Ruby", "ruby", &["--version"]),
];

static VERSION_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"v?(\d+(?:\.\d+)+(?:[-_+.][\w.]+)?)").ok());

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SystemInfo {
    pub os: String,
    pub os_version: String,
    pub arch: String,
    pub hostname: String,
    pub user: String,
    pub package_managers: Vec<String>,
    /// `name:version` pairs.
    pub languages: Vec<String>,
    pub web_servers: Vec<String>,
    pub databases: Vec<String>,
}

impl SystemInfo {
    /// Probe the current host. Every probe is best-effort.
    #[instrument]
    pub fn collect() -> Self {
        let path = env::var_os("PATH").unwrap_or_default();
        let dirs: Vec<PathBuf> = env::split_paths(&path).collect();
        let available = |names: &[&str]| -> Vec<String> {
            names
                .iter()
                .filter(|name| find_on_path(name, &dirs).is_some())
                .map(|name| name.to_string())
                .collect()
        };

        let languages = LANGUAGES
            .iter()
            .filter(|(_, program, _)| find_on_path(program, &dirs).is_some())
            .filter_map(|(label, program, args)| {
                probe_version(program, args).map(|version| format!("{label}:{version}"))
            })
            .collect();

        let info = Self {
            os: os_name(),
            os_version: os_version(),
            arch: env::consts::ARCH.to_string(),
            hostname: hostname(),
            user: env::var("USER")
                .or_else(|_| env::var("USERNAME"))
                .unwrap_or_else(|_| "unknown".to_string()),
            package_managers: available(PACKAGE_MANAGERS),
            languages,
            web_servers: available(WEB_SERVERS),
            databases: available(DATABASES),
        };
        debug!(?info, "collected system info");
        info
    }

    /// Plain-text block embedded in prompts.
    pub fn render(&self) -> String {
        let list = |items: &[String]| {
            if items.is_empty() {
                "none detected".to_string()
            } else {
                items.join(", ")
            }
        };
        format!(
            "- OS: {} {}\n- Architecture: {}\n- Hostname: {}\n- User: {}\n- Package managers: {}\n- Languages: {}\n- Web servers: {}\n- Databases: {}",
            self.os,
            self.os_version,
            self.arch,
            self.hostname,
            self.user,
            list(&self.package_managers),
            list(&self.languages),
            list(&self.web_servers),
            list(&self.databases),
        )
    }
}

fn os_name() -> String {
    match env::consts::OS {
        "macos" => "macOS".to_string(),
        "linux" => "Linux".to_string(),
        "windows" => "Windows".to_string(),
        other => other.to_string(),
    }
}

fn os_version() -> String {
    if cfg!(target_os = "macos") {
        return probe_version("sw_vers", &["-productVersion"]).unwrap_or_default();
    }
    fs::read_to_string("/etc/os-release")
        .ok()
        .and_then(|raw| pretty_name(&raw))
        .unwrap_or_default()
}

/// `PRETTY_NAME` from an os-release file.
fn pretty_name(os_release: &str) -> Option<String> {
    os_release.lines().find_map(|line| {
        line.strip_prefix("PRETTY_NAME=")
            .map(|value| value.trim().trim_matches('"').to_string())
    })
}

fn hostname() -> String {
    fs::read_to_string("/etc/hostname")
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|name| !name.is_empty())
        .or_else(|| env::var("HOSTNAME").ok())
        .or_else(|| env::var("COMPUTERNAME").ok())
        .unwrap_or_else(|| "unknown".to_string())
}

fn find_on_path(program: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}

fn probe_version(program: &str, args: &[&str]) -> Option<String> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    let output = run_command_with_timeout(cmd, PROBE_TIMEOUT, PROBE_OUTPUT_LIMIT).ok()?;
    if !output.success() {
        return None;
    }
    // `java -version` prints to stderr.
    let text = format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    parse_version(&text)
}

/// First dotted version number in `text`.
fn parse_version(text: &str) -> Option<String> {
    let re = VERSION_RE.as_ref()?;
    re.captures(text).map(|caps| caps[1].to_string())
}
