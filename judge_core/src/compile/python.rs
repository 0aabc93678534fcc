use super::{CompilerDescriptor, LanguageDescriptor};

/// Python 3, run directly from source with bytecode caching and output
/// buffering off.
pub struct InterpreterPython;

impl CompilerDescriptor for InterpreterPython {
    fn descriptor() -> LanguageDescriptor {
        LanguageDescriptor {
            id: "python".into(),
            aliases: vec!["python3".into(), "py".into()],
            extension: "py".into(),
            compile: None,
            run: vec!["python3".into(), "-B".into(), "-u".into(), "{source}".into()],
            compile_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_is_interpreted() {
        let py = InterpreterPython::descriptor();
        assert!(!py.needs_compile());
        assert_eq!(py.toolchain(), Some("python3"));
        assert_eq!(py.source_name(), "solution.py");
    }
}
