use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// One input/expected-output pair, as handed to the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    #[serde(rename = "expectedOutput")]
    pub expected_output: String,
    #[serde(rename = "isSample", default)]
    pub is_sample: bool,
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
            is_sample: false,
        }
    }

    pub fn sample(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            is_sample: true,
            ..Self::new(input, expected_output)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplePair {
    pub input: String,
    pub output: String,
}

/// Execution parameters and data of a problem. Read-only for the judge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub name: String,
    /// Seconds.
    #[serde(rename = "timeLimit")]
    pub time_limit: f64,
    /// MB.
    #[serde(rename = "memoryLimit")]
    pub memory_limit: u64,
    /// Shown on the problem page; used for test runs when no case is
    /// flagged as sample.
    #[serde(default)]
    pub sample: Option<SamplePair>,
    #[serde(rename = "testCases", default)]
    pub test_cases: Vec<TestCase>,
}

impl Problem {
    pub fn new(name: impl Into<String>, time_limit: f64, memory_limit: u64) -> Self {
        Self {
            name: name.into(),
            time_limit,
            memory_limit,
            sample: None,
            test_cases: Vec::new(),
        }
    }

    pub fn with_case(mut self, case: TestCase) -> Self {
        self.test_cases.push(case);
        self
    }

    pub fn check_valid(&self) -> Result<()> {
        if !(self.time_limit > 0.0) || !self.time_limit.is_finite() {
            return Err(Error::Argument(format!(
                "time limit of `{}` must be positive",
                self.name
            )));
        }
        if self.memory_limit == 0 {
            return Err(Error::Argument(format!(
                "memory limit of `{}` must be positive",
                self.name
            )));
        }
        Ok(())
    }

    /// Test cases in judging order. For a test run these are the flagged
    /// samples, or the canonical sample pair when nothing is flagged.
    pub fn select_cases(&self, sample_only: bool) -> Vec<TestCase> {
        if !sample_only {
            return self.test_cases.clone();
        }

        let samples: Vec<TestCase> = self
            .test_cases
            .iter()
            .filter(|case| case.is_sample)
            .cloned()
            .collect();
        if !samples.is_empty() {
            return samples;
        }

        self.sample
            .iter()
            .map(|pair| TestCase::sample(pair.input.clone(), pair.output.clone()))
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CaseConfig {
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(rename = "inputFile", default)]
    pub inputfile_path: Option<String>,
    #[serde(rename = "answerFile", default)]
    pub answerfile_path: Option<String>,
    #[serde(default)]
    pub sample: bool,
}

/// On-disk form of a problem (`problem.yaml`). Case data is either inline
/// or in files relative to the yaml file.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProblemConfig {
    pub name: String,
    #[serde(skip_serializing, skip_deserializing)]
    path: PathBuf,
    #[serde(rename = "timeLimit")]
    pub time_limit: f64,
    #[serde(rename = "memoryLimit")]
    pub memory_limit: u64,
    #[serde(default)]
    pub sample: Option<SamplePair>,
    #[serde(default)]
    pub cases: Vec<CaseConfig>,
}

impl ProblemConfig {
    pub fn from_string(content: &str) -> Result<Self> {
        let v: Self = serde_yaml::from_str(content)?;
        Ok(v)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|_| Error::NotFound(path.to_string_lossy().to_string()))?;
        let mut v = Self::from_string(&content)?;

        let r_path = path.canonicalize()?;
        v.path = r_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(v)
    }

    pub fn find_relative_path(&self, path: &str) -> PathBuf {
        self.path.join(path)
    }

    fn read_part(&self, inline: &Option<String>, file: &Option<String>, what: &str) -> Result<String> {
        match (inline, file) {
            (Some(text), _) => Ok(text.clone()),
            (None, Some(file)) => {
                let full = self.find_relative_path(file);
                if !full.exists() {
                    return Err(Error::NotFound(file.to_string()));
                }
                Ok(fs::read_to_string(full)?)
            }
            (None, None) => Err(Error::Argument(format!(
                "case of `{}` has no {}",
                self.name, what
            ))),
        }
    }

    /// Resolves all case files and produces the evaluator's view.
    pub fn load(&self) -> Result<Problem> {
        let mut test_cases = Vec::with_capacity(self.cases.len());
        for case in self.cases.iter() {
            test_cases.push(TestCase {
                input: self.read_part(&case.input, &case.inputfile_path, "input")?,
                expected_output: self.read_part(&case.output, &case.answerfile_path, "answer")?,
                is_sample: case.sample,
            });
        }

        let problem = Problem {
            name: self.name.clone(),
            time_limit: self.time_limit,
            memory_limit: self.memory_limit,
            sample: self.sample.clone(),
            test_cases,
        };
        problem.check_valid()?;
        Ok(problem)
    }
}

impl From<&Problem> for ProblemConfig {
    fn from(problem: &Problem) -> Self {
        Self {
            name: problem.name.clone(),
            path: PathBuf::new(),
            time_limit: problem.time_limit,
            memory_limit: problem.memory_limit,
            sample: problem.sample.clone(),
            cases: problem
                .test_cases
                .iter()
                .map(|case| CaseConfig {
                    input: Some(case.input.clone()),
                    output: Some(case.expected_output.clone()),
                    inputfile_path: None,
                    answerfile_path: None,
                    sample: case.is_sample,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn problem() -> Problem {
        Problem::new("A", 1.0, 64)
            .with_case(TestCase::new("1", "1"))
            .with_case(TestCase::sample("2", "2"))
            .with_case(TestCase::new("3", "3"))
    }

    #[test]
    fn full_run_keeps_order() {
        let inputs: Vec<String> = problem()
            .select_cases(false)
            .into_iter()
            .map(|c| c.input)
            .collect();
        assert_eq!(inputs, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_run_uses_flagged_samples() {
        let cases = problem().select_cases(true);
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].input, "2");
    }

    #[test]
    fn test_run_falls_back_to_sample_pair() {
        let mut p = Problem::new("B", 1.0, 64).with_case(TestCase::new("1", "1"));
        assert!(p.select_cases(true).is_empty());

        p.sample = Some(SamplePair {
            input: "5 3".into(),
            output: "8".into(),
        });
        let cases = p.select_cases(true);
        assert_eq!(cases, vec![TestCase::sample("5 3", "8")]);
    }

    #[test]
    fn inline_yaml() -> Result<()> {
        let config = ProblemConfig::from_string(
            r#"
name: a-plus-b
timeLimit: 1.5
memoryLimit: 128
cases:
  - input: "5 3\n"
    output: "8\n"
    sample: true
  - input: "1 1\n"
    output: "2\n"
"#,
        )?;
        let problem = config.load()?;
        assert_eq!(problem.test_cases.len(), 2);
        assert!(problem.test_cases[0].is_sample);
        assert_eq!(problem.test_cases[1].expected_output, "2\n");
        Ok(())
    }

    #[test]
    fn invalid_limits() {
        assert!(Problem::new("C", 0.0, 64).check_valid().is_err());
        assert!(Problem::new("C", 1.0, 0).check_valid().is_err());
    }

    #[test]
    fn deserialize_from_file() -> Result<()> {
        let problem = ProblemConfig::from_file("../test_dep/normal/problem.yaml")?.load()?;
        assert_eq!(problem.name, "a-plus-b");
        assert!(!problem.test_cases.is_empty());
        Ok(())
    }
}
