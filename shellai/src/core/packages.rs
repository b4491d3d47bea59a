//! Extraction of installable package names from a free-text prepare directive.
//!
//! A directive is whatever the model put in `script.prepare`, typically a
//! shell snippet such as `sudo apt-get install -y jq && pip install requests==2.31`.
//! Only install-verb statements for the supported families are recognised;
//! everything else in the directive is ignored.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Package manager family a package belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageFamily {
    Node,
    Python,
    Apt,
    /// yum and dnf.
    Yum,
    Brew,
}

impl PackageFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            PackageFamily::Node => "npm",
            PackageFamily::Python => "pip",
            PackageFamily::Apt => "apt",
            PackageFamily::Yum => "yum",
            PackageFamily::Brew => "brew",
        }
    }
}

impl fmt::Display for PackageFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Package {
    pub name: String,
    pub family: PackageFamily,
}

impl Package {
    pub fn new(name: impl Into<String>, family: PackageFamily) -> Self {
        Self {
            name: name.into(),
            family,
        }
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.family)
    }
}

static STATEMENT_SEPARATOR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"&&|\|\||[;|\r\n]").ok());

/// Flags whose following token is a value, not a package.
const VALUE_FLAGS: &[&str] = &[
    "-r",
    "--requirement",
    "-c",
    "--constraint",
    "-e",
    "--editable",
    "-i",
    "--index-url",
    "--extra-index-url",
    "-t",
    "--target",
    "--prefix",
    "--registry",
];

/// Extract distinct packages from `directive`, in order of first appearance.
pub fn extract_packages(directive: &str) -> Vec<Package> {
    let mut packages: Vec<Package> = Vec::new();
    for statement in split_statements(directive) {
        let tokens: Vec<&str> = statement.split_whitespace().collect();
        let Some((family, args)) = match_install(&tokens) else {
            continue;
        };
        for name in package_args(args) {
            let name = strip_version(&name, family);
            let name = expand_scoped(&name, directive);
            if name.is_empty() {
                continue;
            }
            let package = Package::new(name, family);
            if !packages.contains(&package) {
                packages.push(package);
            }
        }
    }
    packages
}

fn split_statements(directive: &str) -> Vec<&str> {
    match STATEMENT_SEPARATOR.as_ref() {
        Some(re) => re.split(directive).collect(),
        None => directive.lines().collect(),
    }
}

/// Recognise `<manager> [flags] <install verb> args...` after an optional `sudo`.
fn match_install<'a>(tokens: &'a [&'a str]) -> Option<(PackageFamily, &'a [&'a str])> {
    let mut rest = tokens;
    while let Some((first, tail)) = rest.split_first() {
        if *first == "sudo" || first.starts_with('-') {
            rest = tail;
        } else {
            break;
        }
    }
    let (manager, tail) = rest.split_first()?;
    let (family, verbs, tail): (PackageFamily, &[&str], &[&str]) = match *manager {
        "npm" => (PackageFamily::Node, &["install", "i", "add"], tail),
        "pnpm" => (PackageFamily::Node, &["add", "install", "i"], tail),
        "yarn" => {
            let tail = tail.strip_prefix(&["global"][..]).unwrap_or(tail);
            (PackageFamily::Node, &["add"], tail)
        }
        "pip" | "pip3" => (PackageFamily::Python, &["install"], tail),
        "python" | "python3" => {
            let tail = tail.strip_prefix(&["-m", "pip"][..])?;
            (PackageFamily::Python, &["install"], tail)
        }
        "apt" | "apt-get" => (PackageFamily::Apt, &["install"], tail),
        "yum" | "dnf" => (PackageFamily::Yum, &["install"], tail),
        "brew" => (PackageFamily::Brew, &["install"], tail),
        _ => return None,
    };
    let verb_at = tail.iter().position(|t| !t.starts_with('-'))?;
    if !verbs.contains(&tail[verb_at]) {
        return None;
    }
    Some((family, &tail[verb_at + 1..]))
}

/// Package-looking arguments: flags, flag values and paths are dropped.
fn package_args(args: &[&str]) -> Vec<String> {
    let mut names = Vec::new();
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if arg.starts_with('-') {
            skip_next = VALUE_FLAGS.contains(arg);
            continue;
        }
        let arg = arg.trim_matches(|c| c == '"' || c == '\'');
        if arg.is_empty()
            || arg.starts_with('.')
            || arg.starts_with('/')
            || arg.starts_with('~')
            || arg.contains("://")
            || arg.contains('$')
        {
            continue;
        }
        names.push(arg.to_string());
    }
    names
}

/// Strip a version pin, keeping scope markers (`@scope/pkg@1.2` -> `@scope/pkg`).
fn strip_version(name: &str, family: PackageFamily) -> String {
    match family {
        PackageFamily::Node => {
            let search_from = usize::from(name.starts_with('@'));
            match name[search_from..].find('@') {
                Some(at) => name[..search_from + at].to_string(),
                None => name.to_string(),
            }
        }
        PackageFamily::Python => {
            let cut = name
                .find(|c| matches!(c, '=' | '<' | '>' | '~' | '!' | '[' | '@' | ';'))
                .unwrap_or(name.len());
            name[..cut].trim().to_string()
        }
        PackageFamily::Apt => name.split('=').next().unwrap_or(name).to_string(),
        // `python@3.11` is a formula name, not a pin.
        PackageFamily::Brew | PackageFamily::Yum => name.to_string(),
    }
}

/// Re-expand a scope marker that lost its package part (`@types` or `@types/`)
/// by finding the full scoped name in the original directive.
fn expand_scoped(name: &str, directive: &str) -> String {
    let scope = name.trim_end_matches('/');
    if !scope.starts_with('@') || (name.contains('/') && !name.ends_with('/')) {
        return name.to_string();
    }
    let pattern = format!(r"{}/[\w.-]+", regex::escape(scope));
    match Regex::new(&pattern).ok().and_then(|re| re.find(directive)) {
        Some(found) => found.as_str().to_string(),
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(directive: &str) -> Vec<String> {
        extract_packages(directive)
            .into_iter()
            .map(|p| p.name)
            .collect()
    }

    #[test]
    fn extracts_across_statements_in_order() {
        let packages = extract_packages("npm install axios; pip install requests");
        assert_eq!(
            packages,
            vec![
                Package::new("axios", PackageFamily::Node),
                Package::new("requests", PackageFamily::Python),
            ]
        );
    }

    #[test]
    fn strips_sudo_flags_and_pins() {
        assert_eq!(
            names("sudo apt-get install -y jq curl=7.81.0 && pip3 install --upgrade flask==3.0 'rich>=13'"),
            vec!["jq", "curl", "flask", "rich"]
        );
    }

    #[test]
    fn keeps_scoped_node_names() {
        assert_eq!(
            names("npm i --save-dev @types/node@20 lodash@4.17.21 @nestjs/cli"),
            vec!["@types/node", "lodash", "@nestjs/cli"]
        );
    }

    #[test]
    fn recognises_every_family() {
        let packages = extract_packages(
            "yarn add chalk\npython3 -m pip install numpy\nyum install -y git\ndnf install htop\nbrew install python@3.11",
        );
        let families: Vec<_> = packages.iter().map(|p| p.family).collect();
        assert_eq!(
            families,
            vec![
                PackageFamily::Node,
                PackageFamily::Python,
                PackageFamily::Yum,
                PackageFamily::Yum,
                PackageFamily::Brew,
            ]
        );
        assert_eq!(packages[4].name, "python@3.11");
    }

    #[test]
    fn ignores_non_install_statements_and_requirement_files() {
        assert_eq!(
            names("cd /tmp | npm run build; pip install -r requirements.txt; apt-get update"),
            Vec::<String>::new()
        );
    }

    #[test]
    fn deduplicates_per_family() {
        assert_eq!(
            extract_packages("npm i axios && npm install axios; pip install axios").len(),
            2
        );
    }

    #[test]
    fn re_expands_truncated_scope() {
        assert_eq!(expand_scoped("@types/", "npm i @types/node"), "@types/node");
        assert_eq!(expand_scoped("@types", "npm i @types/node"), "@types/node");
        assert_eq!(expand_scoped("lodash", "npm i lodash"), "lodash");
    }
}
