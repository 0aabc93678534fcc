use std::{fs, path::Path};

use clap::{Args, Parser, Subcommand};
use judge_core::{
    compile::{CompilerEnvironmentStatus, LanguageDescriptor, LanguageTable},
    config::ComparisonModeConfig,
    error::{Error, Result},
    problem::{Problem, ProblemConfig, TestCase},
    Evaluator, JudgeConfig, Submission,
};

#[derive(Parser)]
#[command(
    version,
    name = "judge",
    about = "Compile, run and judge solutions against problem test data."
)]
struct Opts {
    /// judge config (yaml); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<String>,
    #[command(subcommand)]
    subcmd: SubCommand,
}

#[derive(Subcommand)]
enum SubCommand {
    /// Judge a solution against a problem.yaml
    Prefab(PrefabJudgeConfig),
    /// Judge a solution against one input/answer pair
    Normal(NormalJudgeConfig),
    /// Run the security pre-screen over a source file
    Screen(ScreenConfig),
    /// Compare an answer file with an output file
    Compare(CompareConfig),
    /// Report which toolchains are installed
    Check,
}

#[derive(Args, Debug)]
struct PrefabJudgeConfig {
    /// problem config
    problem: String,
    /// path of code
    src_path: String,
    /// language id; guessed from the file extension when omitted
    #[arg(short, long)]
    language: Option<String>,
    /// only run the sample cases
    #[arg(short, long)]
    sample: bool,
}

#[derive(Args, Debug)]
struct NormalJudgeConfig {
    /// path of code
    src_path: String,
    /// input file path
    #[arg(short, long)]
    input_file: String,
    /// answer file path
    #[arg(short, long)]
    answer_file: String,
    /// memory limit (MB)
    #[arg(short, long, default_value = "256")]
    memory_limit: u64,
    /// time limit (seconds)
    #[arg(short, long, default_value = "1")]
    time_limit: f64,
    #[arg(short, long)]
    language: Option<String>,
}

#[derive(Args, Debug)]
struct ScreenConfig {
    src_path: String,
    #[arg(short, long)]
    language: Option<String>,
}

#[derive(Args, Debug)]
struct CompareConfig {
    answer_file: String,
    output_file: String,
    /// standard or line
    #[arg(short, long, default_value = "standard")]
    mode: String,
}

fn load_config(path: &Option<String>) -> Result<JudgeConfig> {
    match path {
        Some(path) => JudgeConfig::from_file(path),
        None => Ok(JudgeConfig::default()),
    }
}

fn language_of<'a>(
    table: &'a LanguageTable,
    src_path: &str,
    language: &Option<String>,
) -> Result<&'a LanguageDescriptor> {
    if let Some(language) = language {
        return table.get(language);
    }
    let extension = Path::new(src_path)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    table
        .by_extension(extension)
        .ok_or_else(|| Error::UnsupportedLanguage(format!("*.{}", extension)))
}

fn judge(
    evaluator: &Evaluator,
    src_path: &str,
    language: &Option<String>,
    problem: &Problem,
    sample_only: bool,
) -> Result<Submission> {
    let code = fs::read_to_string(src_path).map_err(|_| Error::NotFound(src_path.to_string()))?;
    let language = language_of(evaluator.languages(), src_path, language)?;
    let mut submission = Submission::new(0, "cli", problem.name.clone(), language.id.clone(), code);
    submission.is_test = sample_only;
    submission.mark_judging();
    evaluator.evaluate(&mut submission, problem, sample_only);
    Ok(submission)
}

fn main() -> Result<()> {
    env_logger::init();
    let opts: Opts = Opts::parse();
    let config = load_config(&opts.config)?;
    log::debug!("judge config: {:?}", config);

    match opts.subcmd {
        SubCommand::Prefab(args) => {
            let problem = ProblemConfig::from_file(&args.problem)?.load()?;
            let evaluator = Evaluator::new(config)?;
            let result = judge(&evaluator, &args.src_path, &args.language, &problem, args.sample)?;
            println!("{:#?}", result);
        }
        SubCommand::Normal(args) => {
            let input = fs::read_to_string(&args.input_file)
                .map_err(|_| Error::NotFound(args.input_file.clone()))?;
            let answer = fs::read_to_string(&args.answer_file)
                .map_err(|_| Error::NotFound(args.answer_file.clone()))?;
            let problem = Problem::new("normal", args.time_limit, args.memory_limit)
                .with_case(TestCase::new(input, answer));
            let evaluator = Evaluator::new(config)?;
            let result = judge(&evaluator, &args.src_path, &args.language, &problem, false)?;
            println!("{:#?}", result);
        }
        SubCommand::Screen(args) => {
            let code = fs::read_to_string(&args.src_path)
                .map_err(|_| Error::NotFound(args.src_path.clone()))?;
            let evaluator = Evaluator::new(config)?;
            let language = language_of(evaluator.languages(), &args.src_path, &args.language)?;
            match evaluator.screen().screen(&code, &language.id).reason() {
                Some(reason) => println!("rejected: {}", reason),
                None => println!("safe"),
            }
        }
        SubCommand::Compare(args) => {
            let mode = match args.mode.as_str() {
                "standard" => ComparisonModeConfig::Standard,
                "line" => ComparisonModeConfig::Line,
                _ => return Err(Error::Argument("comparation mode not found".into())),
            };
            let answer = fs::read_to_string(&args.answer_file)
                .map_err(|_| Error::NotFound(args.answer_file.clone()))?;
            let output = fs::read_to_string(&args.output_file)
                .map_err(|_| Error::NotFound(args.output_file.clone()))?;
            let result = mode.build(config.strip_markup).compare(&answer, &output);
            println!("{}", judge_core::Verdict::from(result));
        }
        SubCommand::Check => {
            let table = LanguageTable::from_config(&config)?;
            for id in table.ids() {
                let language = table.get(id)?;
                match language.check_environment() {
                    CompilerEnvironmentStatus::OK { version, path } => {
                        println!("{:<8} ok       {} ({})", id, path, version)
                    }
                    CompilerEnvironmentStatus::Missing => println!(
                        "{:<8} missing  {}",
                        id,
                        language.toolchain().unwrap_or("?")
                    ),
                }
            }
        }
    }

    Ok(())
}
