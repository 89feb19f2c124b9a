//! Static validation of submitted scripts.
//!
//! Runs before any process is spawned and rejects:
//!
//! - **Empty or oversized input** - character and newline budgets
//! - **Missing entry point** - no `def main()` in the source
//! - **Syntax errors** - parsed with the tree-sitter Python grammar, plus the
//!   Python 2 `print`/`exec` statements the grammar still accepts
//! - **Denylisted imports** - OS, process, network, serialization, crypto, cloud SDKs
//! - **Denylisted direct calls** - `eval`, `open`, `exit`, ...
//! - **Dangerous text patterns** - `__import__(`, `.__class__`, `.__globals__`, ...
//!
//! Checks run in that order and stop at the first failure.
//!
//! This is a cheap first filter, not a sandbox. Obfuscated or equivalent
//! constructs can get past it; the isolation boundary is what contains them.
//!
//! ## Example
//!
//! ```ignore
//! use scriptbox::validate::{validate, ValidationError};
//!
//! assert!(validate("def main():\n    return 1\n").is_ok());
//! assert_eq!(
//!     validate("import os\ndef main():\n    return 1\n"),
//!     Err(ValidationError::ForbiddenImport("os".into())),
//! );
//! ```

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tree_sitter::{Node, Parser, TreeCursor};

/// Default character budget.
pub const MAX_SCRIPT_LENGTH: usize = 10_000;

/// Default newline budget.
pub const MAX_LINES: usize = 200;

/// Modules that may not be imported, in any dotted form.
pub const FORBIDDEN_IMPORTS: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "shutil",
    "socket",
    "multiprocessing",
    "threading",
    "ctypes",
    "builtins",
    "importlib",
    "imp",
    "marshal",
    "pickle",
    "cPickle",
    "cryptography",
    "hashlib",
    "hmac",
    "ssl",
    "tempfile",
    "zipfile",
    "tarfile",
    "ftplib",
    "http",
    "urllib",
    "requests",
    "urllib3",
    "paramiko",
    "fabric",
    "ansible",
    "salt",
    "docker",
    "kubernetes",
    "boto3",
    "google.cloud",
    "azure",
];

/// Functions that may not be called by bare name.
pub const FORBIDDEN_FUNCTIONS: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "input",
    "open",
    "file",
    "raw_input",
    "system",
    "popen",
    "spawn",
    "fork",
    "kill",
    "exit",
    "quit",
    "breakpoint",
    "debug",
    "trace",
    "profile",
    "runpy",
];

/// Raw-text patterns matched regardless of the syntax tree.
pub const DANGEROUS_PATTERNS: &[&str] = &[
    r"__import__\s*\(",
    r"eval\s*\(",
    r"exec\s*\(",
    r"compile\s*\(",
    r"os\.system\s*\(",
    r"subprocess\s*\.",
    r"\.__dict__",
    r"\.__class__",
    r"\.__bases__",
    r"\.__subclasses__",
    r"\.__globals__",
    r"\.__builtins__",
];

/// Python 2 statement forms that tree-sitter parses without error.
const LEGACY_STATEMENTS: &[&str] = &["print_statement", "exec_statement"];

static MAIN_DEF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bdef\s+main\s*\(\s*\)").expect("entry point pattern compiles"));

static PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    DANGEROUS_PATTERNS
        .iter()
        .map(|p| (*p, Regex::new(p).expect("dangerous pattern compiles")))
        .collect()
});

/// Reason a submission was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Script cannot be empty")]
    Empty,

    #[error("Script exceeds maximum length of {max} characters")]
    TooLong { max: usize },

    #[error("Script exceeds maximum number of lines ({max})")]
    TooManyLines { max: usize },

    #[error("Script must contain a main() function")]
    MissingMain,

    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("parser unavailable: {0}")]
    Parser(String),

    #[error("Forbidden import: {0}")]
    ForbiddenImport(String),

    #[error("Forbidden function call: {0}")]
    ForbiddenCall(String),

    #[error("Script contains potentially dangerous pattern: {0}")]
    DangerousPattern(&'static str),
}

/// Pass/fail flag plus the single reason for a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationVerdict {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ValidationVerdict {
    pub fn passed() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

impl From<Result<(), ValidationError>> for ValidationVerdict {
    fn from(result: Result<(), ValidationError>) -> Self {
        match result {
            Ok(()) => Self::passed(),
            Err(e) => Self::failed(e.to_string()),
        }
    }
}

/// Validator with configurable size budgets.
///
/// Denylists are fixed; only the budgets vary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validator {
    max_chars: usize,
    max_lines: usize,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    pub fn new() -> Self {
        Self {
            max_chars: MAX_SCRIPT_LENGTH,
            max_lines: MAX_LINES,
        }
    }

    /// Set the maximum length in characters.
    pub fn max_chars(mut self, max: usize) -> Self {
        self.max_chars = max;
        self
    }

    /// Set the maximum number of newlines.
    pub fn max_lines(mut self, max: usize) -> Self {
        self.max_lines = max;
        self
    }

    /// Run every check in order, stopping at the first failure.
    pub fn validate(&self, source: &str) -> Result<(), ValidationError> {
        if source.trim().is_empty() {
            return Err(ValidationError::Empty);
        }
        if source.chars().count() > self.max_chars {
            return Err(ValidationError::TooLong {
                max: self.max_chars,
            });
        }
        if source.matches('\n').count() > self.max_lines {
            return Err(ValidationError::TooManyLines {
                max: self.max_lines,
            });
        }
        if !MAIN_DEF.is_match(source) {
            return Err(ValidationError::MissingMain);
        }

        let mut parser = Parser::new();
        parser
            .set_language(tree_sitter_python::language())
            .map_err(|e| ValidationError::Parser(e.to_string()))?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| ValidationError::Parser("parse was cancelled".into()))?;

        let root = tree.root_node();
        if root.has_error() {
            return Err(ValidationError::Syntax(describe_syntax_error(root)));
        }
        if let Some(node) = Preorder::new(root).find(|n| LEGACY_STATEMENTS.contains(&n.kind())) {
            return Err(ValidationError::Syntax(describe_legacy_statement(node)));
        }

        scan_tree(root, source.as_bytes())?;
        scan_patterns(source)
    }

    pub fn verdict(&self, source: &str) -> ValidationVerdict {
        self.validate(source).into()
    }
}

/// Validate with the default budgets.
pub fn validate(source: &str) -> Result<(), ValidationError> {
    Validator::new().validate(source)
}

fn describe_syntax_error(root: Node<'_>) -> String {
    let Some(node) = Preorder::new(root).find(|n| n.is_error() || n.is_missing()) else {
        return "invalid syntax".to_string();
    };
    let pos = node.start_position();
    let (line, column) = (pos.row + 1, pos.column + 1);
    if node.is_missing() {
        format!("missing `{}` (line {line}, column {column})", node.kind())
    } else {
        format!("invalid syntax (line {line}, column {column})")
    }
}

/// The grammar still accepts these Python 2 forms; the interpreter does not.
fn describe_legacy_statement(node: Node<'_>) -> String {
    let keyword = node.kind().trim_end_matches("_statement");
    let pos = node.start_position();
    format!(
        "Missing parentheses in call to '{keyword}' (line {}, column {})",
        pos.row + 1,
        pos.column + 1
    )
}

fn scan_tree(root: Node<'_>, src: &[u8]) -> Result<(), ValidationError> {
    let mut cursor = root.walk();
    for node in Preorder::new(root) {
        match node.kind() {
            "import_statement" => {
                for name in node.children_by_field_name("name", &mut cursor) {
                    let dotted = if name.kind() == "aliased_import" {
                        name.child_by_field_name("name")
                    } else {
                        Some(name)
                    };
                    if let Some(dotted) = dotted {
                        check_module(&dotted_name(dotted, src))?;
                    }
                }
            }
            "import_from_statement" => {
                if let Some(module) = node.child_by_field_name("module_name") {
                    let dotted = if module.kind() == "relative_import" {
                        first_named_child_of_kind(module, "dotted_name")
                    } else {
                        Some(module)
                    };
                    if let Some(dotted) = dotted {
                        check_module(&dotted_name(dotted, src))?;
                    }
                }
            }
            "call" => {
                let Some(callee) = node.child_by_field_name("function") else {
                    continue;
                };
                if callee.kind() != "identifier" {
                    continue;
                }
                let name = callee.utf8_text(src).unwrap_or_default();
                if FORBIDDEN_FUNCTIONS.contains(&name) {
                    return Err(ValidationError::ForbiddenCall(name.to_string()));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Reject `module` if it or any dotted prefix of it is denylisted.
fn check_module(module: &str) -> Result<(), ValidationError> {
    let mut end = 0;
    for segment in module.split('.') {
        end += segment.len();
        let prefix = &module[..end];
        if FORBIDDEN_IMPORTS.contains(&prefix) {
            return Err(ValidationError::ForbiddenImport(prefix.to_string()));
        }
        end += 1;
    }
    Ok(())
}

/// `os . path` and `os.path` are the same module.
fn dotted_name(node: Node<'_>, src: &[u8]) -> String {
    let mut cursor = node.walk();
    let parts: Vec<&str> = node
        .named_children(&mut cursor)
        .filter(|c| c.kind() == "identifier")
        .filter_map(|c| c.utf8_text(src).ok())
        .collect();
    if parts.is_empty() {
        node.utf8_text(src).unwrap_or_default().to_string()
    } else {
        parts.join(".")
    }
}

fn first_named_child_of_kind<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    let mut cursor = node.walk();
    let found = node.named_children(&mut cursor).find(|c| c.kind() == kind);
    found
}

fn scan_patterns(source: &str) -> Result<(), ValidationError> {
    match PATTERNS.iter().find(|(_, re)| re.is_match(source)) {
        Some((pattern, _)) => Err(ValidationError::DangerousPattern(*pattern)),
        None => Ok(()),
    }
}

/// Depth-first, pre-order walk over a subtree.
struct Preorder<'t> {
    cursor: TreeCursor<'t>,
    done: bool,
}

impl<'t> Preorder<'t> {
    fn new(root: Node<'t>) -> Self {
        Self {
            cursor: root.walk(),
            done: false,
        }
    }
}

impl<'t> Iterator for Preorder<'t> {
    type Item = Node<'t>;

    fn next(&mut self) -> Option<Node<'t>> {
        if self.done {
            return None;
        }
        let node = self.cursor.node();
        if self.cursor.goto_first_child() {
            return Some(node);
        }
        loop {
            if self.cursor.goto_next_sibling() {
                return Some(node);
            }
            if !self.cursor.goto_parent() {
                self.done = true;
                return Some(node);
            }
        }
    }
}
