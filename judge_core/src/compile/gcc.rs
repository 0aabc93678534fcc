use super::{CompilerDescriptor, LanguageDescriptor};

pub struct CompilerGCC;

impl CompilerDescriptor for CompilerGCC {
    fn descriptor() -> LanguageDescriptor {
        LanguageDescriptor {
            id: "c".into(),
            aliases: vec!["gcc".into(), "c11".into()],
            extension: "c".into(),
            compile: Some(
                ["gcc", "-std=c11", "-O2", "-Wall", "-Wextra", "-o", "{exe}", "{source}", "-lm"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            run: vec!["{exe}".into()],
            compile_timeout: None,
        }
    }
}
