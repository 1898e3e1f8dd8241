//! Static security scanning of a plugin's source tree prior to activation.
//!
//! Walks every `.rs` file under a plugin directory, parses it with `syn`, and
//! flags imports/calls into a configurable set of forbidden modules as errors.
//! A secondary textual pass with `regex` catches macro-obscured signals that an
//! AST walk over unexpanded source cannot see.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use syn::visit::{self, Visit};
use syn::{Expr, ItemUse, UseTree};

use crate::error::HostResult;

/// Outcome of scanning one plugin's source tree.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScanReport {
    pub passed: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Scan policy: which module paths are forbidden outright, which textual
/// patterns are merely suspicious, and an optional import allow-list.
#[derive(Debug, Clone)]
pub struct ScanPolicy {
    pub forbidden_modules: Vec<String>,
    pub whitelist: Vec<String>,
    /// If true, any warning is escalated to an error (used for sandboxed-mode
    /// plugins that still execute in-process before their IPC worker spawns,
    /// e.g. build scripts; sandboxed plugins proper are additionally
    /// constrained by the OS-level subprocess boundary).
    pub strict: bool,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            forbidden_modules: vec![
                "std::process".to_string(),
                "std::mem::transmute".to_string(),
                "libc".to_string(),
                "std::ffi".to_string(),
            ],
            whitelist: Vec::new(),
            strict: false,
        }
    }
}

/// Patterns that are always escalated to errors regardless of `strict`,
/// because there is no legitimate reason for plugin code to reach them.
fn hard_denylist() -> &'static [&'static str] {
    &["std::mem::transmute", "std::process::Command"]
}

struct ForbiddenImportVisitor<'a> {
    forbidden: &'a [String],
    whitelist: &'a [String],
    hits: Vec<String>,
    warnings: Vec<String>,
}

impl<'a> ForbiddenImportVisitor<'a> {
    fn path_str(tree: &UseTree, prefix: &str) -> Vec<String> {
        match tree {
            UseTree::Path(p) => {
                let next = if prefix.is_empty() {
                    p.ident.to_string()
                } else {
                    format!("{}::{}", prefix, p.ident)
                };
                Self::path_str(&p.tree, &next)
            }
            UseTree::Name(n) => {
                let full = if prefix.is_empty() {
                    n.ident.to_string()
                } else {
                    format!("{}::{}", prefix, n.ident)
                };
                vec![full]
            }
            UseTree::Rename(r) => {
                let full = if prefix.is_empty() {
                    r.ident.to_string()
                } else {
                    format!("{}::{}", prefix, r.ident)
                };
                vec![full]
            }
            UseTree::Glob(_) => vec![format!("{}::*", prefix)],
            UseTree::Group(g) => g
                .items
                .iter()
                .flat_map(|t| Self::path_str(t, prefix))
                .collect(),
        }
    }
}

impl<'a, 'ast> Visit<'ast> for ForbiddenImportVisitor<'a> {
    fn visit_item_use(&mut self, node: &'ast ItemUse) {
        for path in Self::path_str(&node.tree, "") {
            if self.forbidden.iter().any(|f| path.starts_with(f.as_str())) {
                self.hits.push(format!("forbidden import: {}", path));
            } else if !self.whitelist.is_empty()
                && !self.whitelist.iter().any(|w| path.starts_with(w.as_str()))
            {
                self.warnings.push(format!("non-whitelisted import: {}", path));
            }
        }
        visit::visit_item_use(self, node);
    }

    fn visit_expr(&mut self, node: &'ast Expr) {
        if let Expr::Path(expr_path) = node {
            let joined = expr_path
                .path
                .segments
                .iter()
                .map(|s| s.ident.to_string())
                .collect::<Vec<_>>()
                .join("::");
            if self
                .forbidden
                .iter()
                .any(|f| joined.starts_with(f.as_str()))
            {
                self.hits.push(format!("forbidden call path: {}", joined));
            }
        }
        visit::visit_expr(self, node);
    }
}

fn dangerous_pattern_regexes() -> Vec<(Regex, &'static str)> {
    vec![
        (
            Regex::new(r"std::env::set_var").unwrap(),
            "mutates process environment",
        ),
        (Regex::new(r"\binclude!\s*\(").unwrap(), "includes external source at compile time"),
        (
            Regex::new(r"std::process::Command").unwrap(),
            "spawns a subprocess",
        ),
        (
            Regex::new(r"std::mem::transmute").unwrap(),
            "performs an unchecked memory transmute",
        ),
        (Regex::new(r"#!\[no_std\]").unwrap(), "disables the standard library"),
    ]
}

/// Scans every `.rs` file under `plugin_dir` per `policy`.
pub fn scan_plugin(plugin_dir: &Path, policy: &ScanPolicy) -> HostResult<ScanReport> {
    let mut report = ScanReport {
        passed: true,
        errors: Vec::new(),
        warnings: Vec::new(),
    };

    let files = collect_rust_files(plugin_dir)?;
    let regexes = dangerous_pattern_regexes();
    let hard = hard_denylist();

    for file in &files {
        let source = std::fs::read_to_string(file)?;

        if let Ok(parsed) = syn::parse_file(&source) {
            let mut visitor = ForbiddenImportVisitor {
                forbidden: &policy.forbidden_modules,
                whitelist: &policy.whitelist,
                hits: Vec::new(),
                warnings: Vec::new(),
            };
            visitor.visit_file(&parsed);
            for hit in visitor.hits {
                report.errors.push(format!("{}: {}", file.display(), hit));
            }
            for warning in visitor.warnings {
                report.warnings.push(format!("{}: {}", file.display(), warning));
            }
        } else {
            report
                .warnings
                .push(format!("{}: failed to parse as Rust source", file.display()));
        }

        for (re, description) in &regexes {
            if re.is_match(&source) {
                let message = format!("{}: {}", file.display(), description);
                let pattern_str = re.as_str();
                if hard.iter().any(|h| pattern_str.contains(h)) {
                    report.errors.push(message);
                } else {
                    report.warnings.push(message);
                }
            }
        }
    }

    if policy.strict && !report.warnings.is_empty() {
        report.errors.extend(report.warnings.drain(..));
    }

    report.passed = report.errors.is_empty();
    Ok(report)
}

fn collect_rust_files(dir: &Path) -> HostResult<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)?.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if path.file_name().and_then(|n| n.to_str()) == Some("target") {
                    continue;
                }
                stack.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some("rs") {
                out.push(path);
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn clean_source_passes() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "lib.rs",
            "pub fn add(a: i32, b: i32) -> i32 { a + b }",
        );

        let report = scan_plugin(dir.path(), &ScanPolicy::default()).unwrap();
        assert!(report.passed);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn forbidden_import_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "lib.rs",
            "use std::process::Command; pub fn run() { let _ = Command::new(\"ls\"); }",
        );

        let report = scan_plugin(dir.path(), &ScanPolicy::default()).unwrap();
        assert!(!report.passed);
        assert!(!report.errors.is_empty());
    }

    #[test]
    fn transmute_is_always_an_error_even_outside_forbidden_list() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "lib.rs",
            "pub fn cast(x: u32) -> f32 { unsafe { std::mem::transmute(x) } }",
        );

        let policy = ScanPolicy {
            forbidden_modules: Vec::new(),
            whitelist: Vec::new(),
            strict: false,
        };
        let report = scan_plugin(dir.path(), &policy).unwrap();
        assert!(!report.passed);
    }

    #[test]
    fn non_whitelisted_import_is_only_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "lib.rs", "use serde::Serialize;");

        let policy = ScanPolicy {
            forbidden_modules: Vec::new(),
            whitelist: vec!["std".to_string()],
            strict: false,
        };
        let report = scan_plugin(dir.path(), &policy).unwrap();
        assert!(report.passed);
        assert!(!report.warnings.is_empty());
    }

    #[test]
    fn strict_mode_escalates_warnings_to_errors() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "lib.rs", "use serde::Serialize;");

        let policy = ScanPolicy {
            forbidden_modules: Vec::new(),
            whitelist: vec!["std".to_string()],
            strict: true,
        };
        let report = scan_plugin(dir.path(), &policy).unwrap();
        assert!(!report.passed);
        assert!(report.warnings.is_empty());
        assert!(!report.errors.is_empty());
    }
}
