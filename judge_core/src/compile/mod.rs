//! Language descriptors and the compile step.
//!
//! A language is pure data: a source extension, an optional compile
//! command and a run command. Commands are templates where `{source}`,
//! `{exe}` and `{dir}` expand to absolute paths inside the workspace.

use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::Duration,
};

use crate::{
    config::JudgeConfig,
    error::{Error, Result},
    supervisor::{CommandLine, RunLimits, RunRequest, Supervisor, Termination},
    workspace::Workspace,
};

pub mod gcc;
pub mod gpp;
pub mod python;

pub use gcc::CompilerGCC;
pub use gpp::CompilerGPP;
pub use python::InterpreterPython;

/// Static knowledge about one language, loadable from the judge config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageDescriptor {
    pub id: String,
    /// Other names accepted in submissions, e.g. `c++` for `cpp`.
    #[serde(default)]
    pub aliases: Vec<String>,
    pub extension: String,
    /// Absent for interpreted languages.
    #[serde(default)]
    pub compile: Option<Vec<String>>,
    pub run: Vec<String>,
    /// Seconds; overrides the global compile timeout.
    #[serde(rename = "compileTimeout", default)]
    pub compile_timeout: Option<u64>,
}

impl LanguageDescriptor {
    pub fn needs_compile(&self) -> bool {
        self.compile.is_some()
    }

    pub fn source_name(&self) -> String {
        format!("solution.{}", self.extension)
    }

    pub fn executable_name(&self) -> String {
        if cfg!(windows) {
            "solution.exe".into()
        } else {
            "solution".into()
        }
    }

    pub fn compile_command(&self, source: &Path, exe: &Path) -> Result<Option<CommandLine>> {
        match &self.compile {
            Some(template) => Ok(Some(render(&self.id, template, source, exe)?)),
            None => Ok(None),
        }
    }

    pub fn run_command(&self, source: &Path, exe: &Path) -> Result<CommandLine> {
        render(&self.id, &self.run, source, exe)
    }

    /// The program that has to be installed for this language.
    pub fn toolchain(&self) -> Option<&str> {
        self.compile
            .as_ref()
            .unwrap_or(&self.run)
            .first()
            .map(String::as_str)
    }

    pub fn check_environment(&self) -> CompilerEnvironmentStatus {
        match self.toolchain() {
            Some(tool) => check_tool(tool),
            None => CompilerEnvironmentStatus::Missing,
        }
    }

    pub fn check_valid(&self) -> Result<()> {
        if self.id.is_empty() || self.extension.is_empty() {
            return Err(Error::Config("language needs an id and an extension".into()));
        }
        if self.run.is_empty() {
            return Err(Error::Config(format!("language `{}` has no run command", self.id)));
        }
        if let Some(compile) = &self.compile {
            if compile.is_empty() {
                return Err(Error::Config(format!(
                    "language `{}` has an empty compile command",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

fn render(language: &str, template: &[String], source: &Path, exe: &Path) -> Result<CommandLine> {
    let dir = source.parent().unwrap_or_else(|| Path::new("."));
    let expand = |part: &String| {
        part.replace("{source}", &source.to_string_lossy())
            .replace("{exe}", &exe.to_string_lossy())
            .replace("{dir}", &dir.to_string_lossy())
    };
    let mut parts = template.iter().map(expand);
    let program = parts
        .next()
        .ok_or_else(|| Error::Config(format!("empty command template for `{}`", language)))?;
    Ok(CommandLine::new(program, parts.collect()))
}

/// Built-in descriptors. Implementors expose one language each.
pub trait CompilerDescriptor {
    fn descriptor() -> LanguageDescriptor;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompilerEnvironmentStatus {
    OK { version: String, path: String },
    Missing,
}

pub fn check_tool(tool: &str) -> CompilerEnvironmentStatus {
    let path = match which::which(tool) {
        Ok(path) => path,
        Err(_) => return CompilerEnvironmentStatus::Missing,
    };
    let version = Command::new(&path)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .ok()
        .and_then(|output| {
            // python 2 prints its version on stderr
            let text = if output.stdout.is_empty() {
                output.stderr
            } else {
                output.stdout
            };
            String::from_utf8_lossy(&text)
                .lines()
                .next()
                .and_then(|line| line.split(' ').last())
                .map(str::to_string)
        })
        .unwrap_or_default();

    CompilerEnvironmentStatus::OK {
        version,
        path: path.to_string_lossy().into(),
    }
}

/// Id-indexed set of the languages the judge accepts.
#[derive(Debug, Clone)]
pub struct LanguageTable {
    languages: HashMap<String, LanguageDescriptor>,
    aliases: HashMap<String, String>,
}

impl LanguageTable {
    pub fn empty() -> Self {
        Self {
            languages: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut table = Self::empty();
        table.insert(CompilerGCC::descriptor());
        table.insert(CompilerGPP::descriptor());
        table.insert(InterpreterPython::descriptor());
        table
    }

    /// Built-in languages, overridden or extended by the configured ones.
    pub fn from_config(config: &JudgeConfig) -> Result<Self> {
        let mut table = Self::with_defaults();
        for language in config.languages.iter() {
            language.check_valid()?;
            table.insert(language.clone());
        }
        Ok(table)
    }

    pub fn insert(&mut self, language: LanguageDescriptor) {
        self.aliases.retain(|_, id| id != &language.id);
        for alias in language.aliases.iter() {
            self.aliases.insert(alias.to_lowercase(), language.id.clone());
        }
        self.languages.insert(language.id.clone(), language);
    }

    pub fn get(&self, name: &str) -> Result<&LanguageDescriptor> {
        let name = name.trim().to_lowercase();
        let id = self.aliases.get(&name).unwrap_or(&name);
        self.languages
            .get(id)
            .ok_or_else(|| Error::UnsupportedLanguage(name.clone()))
    }

    pub fn by_extension(&self, extension: &str) -> Option<&LanguageDescriptor> {
        let extension = extension.trim_start_matches('.');
        let mut ids: Vec<&String> = self.languages.keys().collect();
        ids.sort();
        ids.into_iter()
            .map(|id| &self.languages[id])
            .find(|lang| lang.extension == extension)
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.languages.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

/// What the run step needs: the command that starts the solution.
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub path: PathBuf,
    pub command: CommandLine,
}

#[derive(Debug, Clone)]
pub enum CompileResult {
    OK(CompiledProgram),
    LimitExceeded(String),
    CompileError(String),
}

/// Turns the source in `workspace` into a runnable program. Interpreted
/// languages pass straight through.
pub fn compile(
    language: &LanguageDescriptor,
    workspace: &Workspace,
    supervisor: &dyn Supervisor,
    config: &JudgeConfig,
) -> Result<CompileResult> {
    let source = workspace.file(&language.source_name());
    let exe = workspace.file(&language.executable_name());
    let run = language.run_command(&source, &exe)?;

    let command = match language.compile_command(&source, &exe)? {
        Some(command) => command,
        None => {
            return Ok(CompileResult::OK(CompiledProgram {
                path: source,
                command: run,
            }))
        }
    };

    let timeout = language
        .compile_timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.compile_timeout());
    let request = RunRequest {
        command,
        workdir: workspace.path().to_path_buf(),
        stdin: String::new(),
        limits: RunLimits {
            time: timeout,
            memory: config.compile_memory_limit * 1024,
            output_bytes: config.max_output_bytes,
            poll_interval: config.poll_interval(),
            cpu_rlimit: config.cpu_rlimit,
        },
    };
    log::debug!("compiling with `{}`", request.command);
    let report = supervisor.supervise(&request);

    let result = match report.termination {
        Termination::Exited(0) if exe.exists() => CompileResult::OK(CompiledProgram {
            path: exe,
            command: run,
        }),
        Termination::Exited(0) => {
            CompileResult::CompileError("Compiler produced no executable".into())
        }
        Termination::Exited(_) | Termination::Signaled(_) => {
            let msg = if report.stderr.trim().is_empty() {
                report.stdout
            } else {
                report.stderr
            };
            CompileResult::CompileError(msg)
        }
        Termination::TimeLimit => CompileResult::LimitExceeded(format!(
            "Compilation timeout ({}s exceeded)",
            timeout.as_secs()
        )),
        Termination::MemoryLimit => CompileResult::LimitExceeded(format!(
            "Compilation memory limit exceeded ({}MB)",
            config.compile_memory_limit
        )),
        Termination::OutputLimit => {
            CompileResult::LimitExceeded("Compiler output limit exceeded".into())
        }
        Termination::Failed(msg) => {
            log::error!("compiler for `{}` unavailable: {}", language.id, msg);
            CompileResult::CompileError(format!("Compiler unavailable: {}", msg))
        }
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_alias() -> Result<()> {
        let table = LanguageTable::with_defaults();
        assert_eq!(table.get("cpp")?.id, "cpp");
        assert_eq!(table.get("C++")?.id, "cpp");
        assert_eq!(table.get("python3")?.id, "python");
        assert_eq!(table.ids(), vec!["c", "cpp", "python"]);
        Ok(())
    }

    #[test]
    fn unknown_language() {
        let table = LanguageTable::with_defaults();
        assert!(matches!(table.get("cobol"), Err(Error::UnsupportedLanguage(_))));
    }

    #[test]
    fn by_extension() {
        let table = LanguageTable::with_defaults();
        assert_eq!(table.by_extension(".py").map(|l| l.id.as_str()), Some("python"));
        assert_eq!(table.by_extension("cpp").map(|l| l.id.as_str()), Some("cpp"));
        assert!(table.by_extension("rs").is_none());
    }

    #[test]
    fn config_overrides_builtin() -> Result<()> {
        let config = JudgeConfig::from_string(
            r#"
languages:
  - id: python
    aliases: [py]
    extension: py
    run: ["pypy3", "{source}"]
  - id: rust
    extension: rs
    compile: ["rustc", "-O", "-o", "{exe}", "{source}"]
    run: ["{exe}"]
    compileTimeout: 30
"#,
        )?;
        let table = LanguageTable::from_config(&config)?;
        assert_eq!(table.get("python")?.run[0], "pypy3");
        assert_eq!(table.get("py")?.id, "python");
        // the old alias went away with the old descriptor
        assert!(table.get("python3").is_err());
        assert_eq!(table.get("rust")?.compile_timeout, Some(30));
        Ok(())
    }

    #[test]
    fn render_templates() -> Result<()> {
        let c = CompilerGCC::descriptor();
        let source = Path::new("/w/solution.c");
        let exe = Path::new("/w/solution");
        let cmd = c.compile_command(source, exe)?.unwrap();
        assert_eq!(cmd.program, "gcc");
        assert!(cmd.args.contains(&"/w/solution.c".to_string()));
        assert!(cmd.args.contains(&"/w/solution".to_string()));
        assert_eq!(c.run_command(source, exe)?.program, "/w/solution");

        let py = InterpreterPython::descriptor();
        assert!(py.compile_command(Path::new("/w/solution.py"), exe)?.is_none());
        assert_eq!(py.run_command(Path::new("/w/solution.py"), exe)?.args.last().unwrap(), "/w/solution.py");
        Ok(())
    }

    #[test]
    fn environment_matches_which() {
        for language in [CompilerGCC::descriptor(), CompilerGPP::descriptor(), InterpreterPython::descriptor()] {
            let tool = language.toolchain().unwrap().to_string();
            match language.check_environment() {
                CompilerEnvironmentStatus::OK { path, .. } => {
                    assert!(which::which(&tool).is_ok());
                    assert!(!path.is_empty());
                }
                CompilerEnvironmentStatus::Missing => assert!(which::which(&tool).is_err()),
            }
        }
    }
}
