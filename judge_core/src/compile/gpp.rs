use super::{CompilerDescriptor, LanguageDescriptor};

pub struct CompilerGPP;

impl CompilerDescriptor for CompilerGPP {
    fn descriptor() -> LanguageDescriptor {
        LanguageDescriptor {
            id: "cpp".into(),
            aliases: vec!["c++".into(), "g++".into(), "cpp17".into()],
            extension: "cpp".into(),
            compile: Some(
                ["g++", "-std=c++17", "-O2", "-Wall", "-Wextra", "-o", "{exe}", "{source}"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            run: vec!["{exe}".into()],
            compile_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpp_flags() {
        let compile = CompilerGPP::descriptor().compile.unwrap();
        assert_eq!(compile[1], "-std=c++17");
        assert!(compile.contains(&"-Wextra".to_string()));
    }
}
