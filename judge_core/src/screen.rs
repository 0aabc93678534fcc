//! Advisory source screening. Rejects code that matches a known dangerous
//! idiom before anything is written to disk or spawned. Isolation is the
//! supervisor's job; this only catches the obvious.

use regex::{Regex, RegexBuilder};
use std::collections::HashMap;

use crate::{config::ScreenConfig, error::Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screening {
    Safe,
    Rejected { pattern: String },
}

impl Screening {
    pub fn is_safe(&self) -> bool {
        matches!(self, Screening::Safe)
    }

    pub fn reason(&self) -> Option<String> {
        match self {
            Screening::Safe => None,
            Screening::Rejected { pattern } => {
                Some(format!("Dangerous pattern detected: {}", pattern))
            }
        }
    }
}

struct Rule {
    name: String,
    regex: Regex,
}

impl Rule {
    fn new(name: impl Into<String>, pattern: &str) -> Result<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .multi_line(true)
            .build()?;
        Ok(Self {
            name: name.into(),
            regex,
        })
    }
}

const PYTHON_MODULES: [&str; 19] = [
    "os",
    "subprocess",
    "shutil",
    "tempfile",
    "socket",
    "urllib",
    "requests",
    "http",
    "ftplib",
    "smtplib",
    "telnetlib",
    "webbrowser",
    "ctypes",
    "multiprocessing",
    "threading",
    "asyncio",
    "importlib",
    "pkgutil",
    "zipimport",
];

const PYTHON_BUILTINS: [&str; 9] = [
    "__import__",
    "eval",
    "exec",
    "compile",
    "open",
    "execfile",
    "globals",
    "vars",
    "breakpoint",
];

const C_HEADERS: [(&str, &str); 6] = [
    ("unistd.h", r"unistd\.h"),
    ("sys/*.h", r"sys/"),
    ("windows.h", r"windows\.h"),
    ("process.h", r"process\.h"),
    ("spawn.h", r"spawn\.h"),
    ("dlfcn.h", r"dlfcn\.h"),
];

const C_FUNCTIONS: [&str; 14] = [
    "system", "popen", "fork", "vfork", "execl", "execlp", "execle", "execv", "execvp",
    "execve", "execvpe", "kill", "socket", "dlopen",
];

/// Per-language rule table.
pub struct SecurityScreen {
    rules: HashMap<String, Vec<Rule>>,
    enabled: bool,
}

impl SecurityScreen {
    pub fn new() -> Self {
        let mut v = Self {
            rules: HashMap::new(),
            enabled: true,
        };
        v.load_default_rules();
        v
    }

    pub fn from_config(config: &ScreenConfig) -> Result<Self> {
        let mut v = Self::new();
        v.enabled = config.enabled;
        for (language, patterns) in config.extra.iter() {
            for pattern in patterns.iter() {
                v.push_rule(language, pattern.clone(), pattern)?;
            }
        }
        Ok(v)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn push_rule(&mut self, language: &str, name: impl Into<String>, pattern: &str) -> Result<()> {
        let rule = Rule::new(name, pattern)?;
        self.rules
            .entry(language.to_lowercase())
            .or_insert_with(Vec::new)
            .push(rule);
        Ok(())
    }

    /// First matching rule wins. Languages without rules always pass.
    pub fn screen(&self, code: &str, language: &str) -> Screening {
        if !self.enabled {
            return Screening::Safe;
        }
        let rules = match self.rules.get(&language.to_lowercase()) {
            Some(rules) => rules,
            None => return Screening::Safe,
        };
        match rules.iter().find(|rule| rule.regex.is_match(code)) {
            Some(rule) => {
                log::info!("{} source rejected by `{}`", language, rule.name);
                Screening::Rejected {
                    pattern: rule.name.clone(),
                }
            }
            None => Screening::Safe,
        }
    }

    fn load_default_rules(&mut self) {
        let mut python = Vec::new();
        for module in PYTHON_MODULES.iter() {
            python.push((
                format!("import {}", module),
                format!(r"^\s*(?:import\s+(?:[\w.]+\s*(?:as\s+\w+\s*)?,\s*)*|from\s+){}\b", module),
            ));
        }
        // attribute calls like `re.compile(` are fine
        for builtin in PYTHON_BUILTINS.iter() {
            python.push((format!("{}(", builtin), format!(r"(?:^|[^\w.]){}\s*\(", builtin)));
        }
        python.push(("__builtins__".into(), r"__builtins__".into()));
        python.push(("__subclasses__".into(), r"__subclasses__".into()));
        python.push(("while True:".into(), r"\bwhile\s*\(?\s*(?:true|1)\s*\)?\s*:".into()));

        let mut c = Vec::new();
        for (name, pattern) in C_HEADERS.iter() {
            c.push((
                format!("#include <{}>", name),
                format!(r#"#\s*include\s*[<"]\s*{}"#, pattern),
            ));
        }
        for function in C_FUNCTIONS.iter() {
            c.push((format!("{}(", function), format!(r"(?:^|[^\w.>]){}\s*\(", function)));
        }
        c.push(("asm(".into(), r"\b(?:__asm__|asm)\s*(?:volatile\s*|__volatile__\s*)?\(".into()));
        c.push(("while(1)".into(), r"\bwhile\s*\(\s*(?:1|true)\s*\)".into()));
        c.push(("for(;;)".into(), r"\bfor\s*\(\s*;\s*;\s*\)".into()));
        c.push((
            "malloc(<huge literal>)".into(),
            r"\b(?:malloc|calloc|realloc)\s*\([^;]*\b\d{9,}".into(),
        ));

        let mut cpp = c.clone();
        cpp.push(("#include <filesystem>".into(), r#"#\s*include\s*[<"]\s*filesystem"#.into()));
        cpp.push(("#include <thread>".into(), r#"#\s*include\s*[<"]\s*thread\s*>"#.into()));
        cpp.push(("new T[<huge literal>]".into(), r"\bnew\s+[\w:<>]+\s*\[\s*\d{9,}".into()));

        for (language, table) in [("python", python), ("c", c), ("cpp", cpp)] {
            for (name, pattern) in table {
                if let Err(err) = self.push_rule(language, name, &pattern) {
                    log::error!("builtin screen rule for {} does not compile: {}", language, err);
                }
            }
        }
    }
}

impl Default for SecurityScreen {
    fn default() -> Self {
        Self::new()
    }
}
