use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use walkdir::WalkDir;

// Directories whose Rust sources are checked. Everything else in the package
// (reference material, build output) is left alone.
const SCANNED_ROOTS: [&str; 2] = ["src", "tests"];

// A source rule: a line regex plus the message shown when it matches.
struct LintRule {
    name: &'static str,
    pattern: &'static str,
    // Lines that are plain comments do not count for code-only rules.
    code_only: bool,
    // Text that must appear inside a string literal to be exempt.
    literal: Option<&'static str>,
    advice: &'static [&'static str],
}

static RULES: [LintRule; 4] = [
    LintRule {
        name: "#[allow(dead_code)] attributes",
        pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        code_only: true,
        literal: None,
        advice: &[
            "#[allow(dead_code)] attributes are not allowed in this crate.",
            "Either use the code (removing the attribute) or remove it completely.",
        ],
    },
    LintRule {
        name: "#[ignore] test attributes",
        pattern: r"#\s*\[\s*ignore\s*\]",
        code_only: true,
        literal: None,
        advice: &[
            "Ignored tests are not allowed in this crate.",
            "Fix the test so it can run properly without being ignored.",
        ],
    },
    LintRule {
        name: "debug_assert! usages",
        pattern: r"\bdebug_assert!\s*\(",
        code_only: true,
        literal: Some("debug_assert!"),
        advice: &["debug_assert! is not allowed in this crate.", "Use assert! instead."],
    },
    LintRule {
        name: "change-log words in comments",
        pattern: r"(//|/\*|///).*(?:CRITICAL|FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE)",
        code_only: false,
        literal: None,
        advice: &[
            "Comments describe the code as it is, not how it got there.",
            "Move history notes to the commit message.",
        ],
    },
];

static CURRENT_STAGE: OnceLock<Mutex<String>> = OnceLock::new();

fn warnings_enabled() -> bool {
    static ENABLE_WARNINGS: OnceLock<bool> = OnceLock::new();
    *ENABLE_WARNINGS.get_or_init(|| match std::env::var("BUILD_VERBOSE") {
        Ok(value) => {
            let normalized = value.trim();
            normalized.eq_ignore_ascii_case("true")
                || normalized.eq_ignore_ascii_case("yes")
                || normalized == "1"
        }
        Err(_) => false,
    })
}

fn update_stage(label: &str) {
    let tracker = CURRENT_STAGE.get_or_init(|| Mutex::new(String::new()));
    if let Ok(mut guard) = tracker.lock() {
        guard.clear();
        guard.push_str(label);
    }

    if warnings_enabled() {
        println!("cargo:warning=stab_bb build stage: {label}");
        let _ = io::stdout().flush();
    }
}

fn emit_stage_detail(detail: &str) {
    if warnings_enabled() {
        println!("cargo:warning=stab_bb build detail: {detail}");
        let _ = io::stdout().flush();
    }
}

fn install_stage_panic_hook() {
    let tracker: &'static Mutex<String> = CURRENT_STAGE.get_or_init(|| Mutex::new(String::new()));
    std::panic::set_hook(Box::new(move |info| {
        let stage_name = tracker
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|_| String::from("<stage lock poisoned>"));
        eprintln!("\n⚠️ build script panic while processing stage: {stage_name}");
        eprintln!("{info}");
    }));
}

fn is_pure_comment(line_text: &str) -> bool {
    let trimmed = line_text.trim_start();
    trimmed.starts_with("//") || trimmed.starts_with("/*") || trimmed.starts_with('*')
}

// True when `needle` only occurs inside a double-quoted string on this line.
fn only_inside_string(line_text: &str, needle: &str) -> bool {
    if !line_text.contains('"') {
        return false;
    }
    line_text
        .split('"')
        .enumerate()
        .all(|(i, part)| i % 2 == 1 || !part.contains(needle))
}

// Collects the lines of one file that violate one rule.
struct RuleCollector<'r> {
    rule: &'r LintRule,
    violations: Vec<String>,
    file_path: PathBuf,
}

impl<'r> RuleCollector<'r> {
    fn new(rule: &'r LintRule, file_path: &Path) -> Self {
        Self {
            rule,
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
        }
    }

    fn check_and_get_error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }

        let file_name = self.file_path.to_str().unwrap_or("?");
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            self.rule.name,
            file_name
        );

        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }

        error_msg.push('\n');
        for (i, line) in self.rule.advice.iter().enumerate() {
            let marker = if i == 0 { "⚠️ " } else { "   " };
            error_msg.push_str(&format!("{marker}{line}\n"));
        }

        Some(error_msg)
    }
}

// The searcher calls `matched` for every line that matches the rule's regex.
impl Sink for RuleCollector<'_> {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();

        if self.rule.code_only && is_pure_comment(line_text) {
            return Ok(true);
        }
        if let Some(needle) = self.rule.literal
            && only_inside_string(line_text, needle)
        {
            return Ok(true);
        }

        self.violations.push(format!("{line_number}:{line_text}"));
        Ok(true)
    }
}

fn rust_sources() -> Vec<PathBuf> {
    SCANNED_ROOTS
        .iter()
        .filter(|root| Path::new(root).is_dir())
        .flat_map(|root| {
            WalkDir::new(root)
                .into_iter()
                .filter_map(|e: Result<walkdir::DirEntry, walkdir::Error>| e.ok())
                .filter(|e: &walkdir::DirEntry| !is_in_ignored_directory(e.path()))
                .filter(|e: &walkdir::DirEntry| e.path().extension().is_some_and(|ext| ext == "rs"))
                .map(|e| e.path().to_path_buf())
        })
        .collect()
}

fn scan_rule(rule: &LintRule, sources: &[PathBuf]) -> Vec<String> {
    let mut all_violations = Vec::new();

    match RegexMatcher::new_line_matcher(rule.pattern) {
        Ok(matcher) => {
            let mut searcher = Searcher::new();
            for path in sources {
                let mut collector = RuleCollector::new(rule, path);
                if searcher
                    .search_path(&matcher, path, &mut collector)
                    .is_err()
                {
                    continue;
                }
                if let Some(error_message) = collector.check_and_get_error_message() {
                    all_violations.push(error_message);
                }
            }
        }
        Err(e) => {
            all_violations.push(format!("Error creating regex matcher for {}: {}", rule.name, e));
        }
    }

    all_violations
}

fn is_in_hidden_directory(path: impl AsRef<Path>) -> bool {
    path.as_ref().components().any(|component| {
        if let Component::Normal(name) = component {
            name.to_string_lossy().starts_with('.')
        } else {
            false
        }
    })
}

fn is_in_target_directory(path: impl AsRef<Path>) -> bool {
    path.as_ref()
        .components()
        .any(|component| matches!(component, Component::Normal(name) if name == "target"))
}

fn is_in_ignored_directory(path: impl AsRef<Path>) -> bool {
    is_in_target_directory(path.as_ref()) || is_in_hidden_directory(path.as_ref())
}

fn main() {
    install_stage_panic_hook();

    update_stage("initialization");
    println!("cargo:rerun-if-changed=build.rs");
    for root in SCANNED_ROOTS {
        println!("cargo:rerun-if-changed={root}");
    }
    println!("cargo:rerun-if-env-changed=STAB_BB_SKIP_LINT_CHECKS");

    if std::env::var("STAB_BB_SKIP_LINT_CHECKS").is_ok() {
        update_stage("skipping lint checks (STAB_BB_SKIP_LINT_CHECKS set)");
        return;
    }

    if std::env::var("DOCS_RS").is_ok() {
        update_stage("skipping lint checks (docs.rs build)");
        return;
    }

    update_stage("collect sources");
    let sources = rust_sources();
    emit_stage_detail(&format!("{} Rust sources to scan", sources.len()));

    let mut all_violations = Vec::new();
    for rule in &RULES {
        update_stage(&format!("scan {}", rule.name));
        let violations = scan_rule(rule, &sources);
        emit_stage_detail(&format!(
            "{} scan identified {} violation groups",
            rule.name,
            violations.len()
        ));
        all_violations.extend(violations);
    }

    if !all_violations.is_empty() {
        update_stage("report validation errors");
        eprintln!("\n❌ VALIDATION ERRORS");
        eprintln!("====================");

        let violation_count = all_violations.len();

        for violation in all_violations {
            eprintln!("{violation}");
            eprintln!("--------------------");
        }

        eprintln!(
            "\n⚠️ Found {} total code quality violations. Fix all issues before committing.",
            violation_count
        );
        std::process::exit(1);
    }

    update_stage("build script completed");
    emit_stage_detail("Validation checks completed without errors");
}
