pub mod compare;
pub mod compile;
pub mod config;
pub mod error;
pub mod judge;
pub mod probe;
pub mod problem;
pub mod queue;
pub mod sandbox;
pub mod screen;
pub mod service;
pub mod store;
pub mod submission;
pub mod supervisor;
pub mod verdict;
pub mod workspace;

pub use config::JudgeConfig;
pub use judge::Evaluator;
pub use problem::{Problem, TestCase};
pub use service::{JudgeService, SubmitMode, SubmitRequest};
pub use submission::{JudgeReport, Submission, SubmissionId};
pub use verdict::Verdict;
