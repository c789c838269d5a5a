use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Only the crate's own sources are policed.
const SCANNED_DIRS: [&str; 2] = ["src", "tests"];

/// A source policy: a line regex plus a filter deciding whether a matched line
/// is a real violation.
struct Rule {
    name: &'static str,
    pattern: &'static str,
    accept: fn(&str) -> bool,
    advice: &'static str,
}

const RULES: [Rule; 3] = [
    Rule {
        name: "underscore-prefixed identifiers",
        pattern: r"\b(_[a-zA-Z0-9_]+)\b",
        accept: underscore_in_code,
        advice: "Either use the binding (removing the underscore) or remove it completely.",
    },
    Rule {
        name: "forbidden comment markers",
        pattern: r"(//|/\*).*\b(?:FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE)\b",
        accept: always,
        advice: "Comments describe the code as it is, not the edit that produced it.",
    },
    Rule {
        name: "#[allow(dead_code)] attributes",
        pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        accept: always,
        advice: "Either use the code or remove it completely.",
    },
];

// Collects every accepted match from a single file.
struct ViolationCollector {
    accept: fn(&str) -> bool,
    violations: Vec<String>,
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if (self.accept)(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn always(_: &str) -> bool {
    true
}

// Skips matches that only occur inside comments or string literals.
fn underscore_in_code(line: &str) -> bool {
    let code = match line.find("//") {
        Some(idx) => &line[..idx],
        None => line,
    };
    code.split('"')
        .enumerate()
        .filter(|(i, _)| i % 2 == 0)
        .any(|(_, part)| {
            part.char_indices().any(|(idx, c)| {
                let starts_word = idx == 0
                    || !part[..idx]
                        .chars()
                        .next_back()
                        .is_some_and(|p| p.is_alphanumeric() || p == '_');
                let next = part[idx + c.len_utf8()..].chars().next();
                c == '_' && starts_word && next.is_some_and(|n| n.is_alphanumeric() || n == '_')
            })
        })
}

fn sources() -> Vec<PathBuf> {
    SCANNED_DIRS
        .iter()
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

fn check(rule: &Rule, files: &[PathBuf]) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(rule.pattern)?;
    let mut searcher = Searcher::new();

    for path in files {
        let mut collector = ViolationCollector {
            accept: rule.accept,
            violations: Vec::new(),
        };
        searcher.search_path(&matcher, path, &mut collector)?;
        if !collector.violations.is_empty() {
            return Err(report(rule, path, &collector.violations).into());
        }
    }
    Ok(())
}

fn report(rule: &Rule, path: &Path, violations: &[String]) -> String {
    let mut msg = format!(
        "\n❌ ERROR: Found {} {} in {}:\n",
        violations.len(),
        rule.name,
        path.display()
    );
    for violation in violations {
        msg.push_str(&format!("   {violation}\n"));
    }
    msg.push_str(&format!("\n⚠️ {}\n", rule.advice));
    msg
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SCANNED_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    let files = sources();
    for rule in &RULES {
        if let Err(e) = check(rule, &files) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
