//! Run command implementation

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Instant,
};

use anyhow::{Context, Result};
use clap::Args;
use fanout_common::sync::lock;
use fanout_executor::{
    BoundedRunner, NativeProcess, RunnerOptions,
    native_process::{ProcessState, Redirect},
};
use fanout_files::{OutputFiles, TextFileWriter, list_entries};
use serde::Serialize;

use super::KindArg;
use crate::utils::format_duration;

const INPUT_PLACEHOLDER: &str = "{input}";
const OUTPUT_PLACEHOLDER: &str = "{output}";

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Program to execute for every input
    #[arg(long)]
    pub program: PathBuf,

    /// Directory whose entries become the inputs; without it the program runs once
    #[arg(long)]
    pub input_dir: Option<PathBuf>,

    /// Name filter for the input entries (`*` and `?` wildcards)
    #[arg(long)]
    pub filter: Option<String>,

    /// Kind of input entries
    #[arg(long, value_enum, default_value_t = KindArg::Files)]
    pub kind: KindArg,

    /// Maximum number of processes running at once (defaults to the CPU count)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Directory for generated `{output}` paths
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Base name of the generated outputs; may contain `${index}` or `${index:zerosN}`
    #[arg(long, default_value = "out_")]
    pub output_name: String,

    /// Extension of the generated outputs
    #[arg(long, default_value = "")]
    pub output_ext: String,

    /// Also write one line per completed process to this file
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Let the processes write to this terminal instead of discarding their output
    #[arg(long)]
    pub show_output: bool,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Arguments passed to the program; `{input}` and `{output}` are substituted
    #[arg(last = true)]
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub workers: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed_ms: u128,
    pub processes: Vec<ProcessInfo>,
}

#[derive(Debug, Serialize)]
pub struct ProcessInfo {
    pub id: u64,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessInfo {
    fn of(process: &NativeProcess) -> Self {
        let error = match process.state() {
            ProcessState::Failed(message) => Some(message.clone()),
            ProcessState::NotStarted => Some("not started".to_string()),
            ProcessState::Exited(_) => None,
        };
        ProcessInfo {
            id: process.id().unwrap_or_default(),
            command: process.command_line(),
            exit_code: process.exit_code().ok(),
            elapsed_ms: process.elapsed().map(|d| d.as_millis()),
            error,
        }
    }

    fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

pub fn run(args: RunArgs) -> Result<()> {
    let json = args.json;
    let summary = execute(&args)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "{} of {} process(es) succeeded on {} worker(s) in {} ms",
            summary.succeeded, summary.total, summary.workers, summary.elapsed_ms
        );
    }

    if summary.failed > 0 {
        anyhow::bail!("{} of {} process(es) failed", summary.failed, summary.total);
    }
    Ok(())
}

/// Runs the batch described by `args` and collects the outcome of every process.
pub fn execute(args: &RunArgs) -> Result<RunSummary> {
    let processes = plan(args)?;
    let total = processes.len();

    let options = match args.workers {
        Some(workers) => RunnerOptions::default().with_max_workers(workers),
        None => RunnerOptions::default(),
    };
    let runner = BoundedRunner::with_options(options);
    for process in processes {
        runner.register(process);
    }

    let report = match &args.report {
        Some(path) => Some(
            TextFileWriter::create(path)
                .with_context(|| format!("Failed to create report {}", path.display()))?,
        ),
        None => None,
    };
    let report = Arc::new(Mutex::new(report));

    let quiet = args.json;
    let callback_report = Arc::clone(&report);
    let mut done = 0usize;
    runner.set_completion_callback(move |process: &NativeProcess| {
        done += 1;
        let info = ProcessInfo::of(process);
        let status = match (&info.exit_code, &info.error) {
            (Some(code), _) => format!("exit {code}"),
            (None, Some(error)) => format!("error: {error}"),
            (None, None) => "unknown".to_string(),
        };
        let elapsed = process.elapsed().map(format_duration).unwrap_or_default();
        if !quiet {
            println!("[{done}/{total}] #{} {status} {elapsed} {}", info.id, info.command);
        }
        if let Some(writer) = lock(&callback_report).as_mut() {
            if let Err(e) = writer.write_fmt_line(format_args!("{}\t{status}\t{}", info.id, info.command)) {
                log::error!("failed to write report line: {e}");
            }
        }
    });

    let started = Instant::now();
    runner.start();
    runner.join();
    let elapsed = started.elapsed();

    if let Some(writer) = lock(&report).take() {
        writer.close().context("Failed to close report")?;
    }

    let mut processes: Vec<ProcessInfo> = runner
        .take_completed()
        .iter()
        .map(ProcessInfo::of)
        .collect();
    for fault in runner.take_faults() {
        let mut info = ProcessInfo::of(&fault.unit);
        info.error = Some(fault.message);
        processes.push(info);
    }
    processes.sort_by_key(|p| p.id);

    let succeeded = processes.iter().filter(|p| p.succeeded()).count();
    Ok(RunSummary {
        workers: runner.worker_count(),
        total,
        succeeded,
        failed: processes.len() - succeeded,
        elapsed_ms: elapsed.as_millis(),
        processes,
    })
}

/// Builds one process per input, substituting the placeholders in the
/// argument list.
fn plan(args: &RunArgs) -> Result<Vec<NativeProcess>> {
    let uses_input = args.args.iter().any(|a| a.contains(INPUT_PLACEHOLDER));
    let uses_output = args.args.iter().any(|a| a.contains(OUTPUT_PLACEHOLDER));

    let inputs: Vec<Option<PathBuf>> = match &args.input_dir {
        Some(dir) => list_entries(dir, args.filter.as_deref(), args.kind.into())
            .with_context(|| format!("Failed to list inputs in {}", dir.display()))?
            .into_iter()
            .map(Some)
            .collect(),
        None if uses_input => anyhow::bail!("{INPUT_PLACEHOLDER} requires --input-dir"),
        None => vec![None],
    };

    let mut outputs = match &args.output_dir {
        Some(dir) => Some(OutputFiles::new(dir, &args.output_name, &args.output_ext)),
        None if uses_output => anyhow::bail!("{OUTPUT_PLACEHOLDER} requires --output-dir"),
        None => None,
    };

    let redirect = if args.show_output {
        Redirect::Inherit
    } else {
        Redirect::Null
    };

    let mut processes = Vec::with_capacity(inputs.len());
    for (id, input) in inputs.iter().enumerate() {
        let output = outputs.as_mut().map(OutputFiles::next_path);
        let argv = args
            .args
            .iter()
            .map(|arg| substitute(arg, input.as_deref(), output.as_deref()));
        let process = NativeProcess::new(&args.program, argv)
            .with_context(|| format!("Cannot run {}", args.program.display()))?
            .with_id(id as u64)
            .with_stdout(redirect.clone())
            .with_stderr(redirect.clone());
        processes.push(process);
    }
    log::debug!("planned {} process(es)", processes.len());
    Ok(processes)
}

fn substitute(arg: &str, input: Option<&Path>, output: Option<&Path>) -> String {
    let mut arg = arg.to_string();
    if let Some(input) = input {
        arg = arg.replace(INPUT_PLACEHOLDER, &input.display().to_string());
    }
    if let Some(output) = output {
        arg = arg.replace(OUTPUT_PLACEHOLDER, &output.display().to_string());
    }
    arg
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(program: &str, args: &[&str]) -> RunArgs {
        RunArgs {
            program: PathBuf::from(program),
            input_dir: None,
            filter: None,
            kind: KindArg::Files,
            workers: Some(2),
            output_dir: None,
            output_name: "out_".to_string(),
            output_ext: String::new(),
            report: None,
            show_output: false,
            json: true,
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_substitute() {
        let input = Path::new("/in/a.jpg");
        let output = Path::new("/out/out_0.png");
        assert_eq!(
            substitute("{input}:{output}", Some(input), Some(output)),
            "/in/a.jpg:/out/out_0.png"
        );
        assert_eq!(substitute("-q", Some(input), None), "-q");
        assert_eq!(substitute("{output}", Some(input), None), "{output}");
    }

    #[test]
    fn test_placeholders_need_directories() {
        let err = plan(&run_args("/bin/sh", &["{input}"])).unwrap_err();
        assert!(err.to_string().contains("--input-dir"));
        let err = plan(&run_args("/bin/sh", &["{output}"])).unwrap_err();
        assert!(err.to_string().contains("--output-dir"));
    }

    #[test]
    fn test_missing_program() {
        let err = plan(&run_args("/no/such/program", &[])).unwrap_err();
        assert!(format!("{err:#}").contains("not found"));
    }

    #[cfg(unix)]
    #[test]
    fn test_one_process_per_input() {
        let inputs = tempfile::tempdir().unwrap();
        let outputs = tempfile::tempdir().unwrap();
        for name in ["a.txt", "b.txt", "skip.bin"] {
            std::fs::write(inputs.path().join(name), name).unwrap();
        }
        let report = outputs.path().join("report.tsv");

        let mut args = run_args("/bin/sh", &["-c", "cp \"$0\" \"$1\"", "{input}", "{output}"]);
        args.input_dir = Some(inputs.path().to_path_buf());
        args.filter = Some("*.txt".to_string());
        args.output_dir = Some(outputs.path().to_path_buf());
        args.output_name = "copy_${index:zeros2}".to_string();
        args.output_ext = "txt".to_string();
        args.report = Some(report.clone());

        let summary = execute(&args).unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.processes[0].id, 0);
        assert_eq!(
            std::fs::read_to_string(outputs.path().join("copy_00.txt")).unwrap(),
            "a.txt"
        );
        assert_eq!(
            std::fs::read_to_string(outputs.path().join("copy_01.txt")).unwrap(),
            "b.txt"
        );

        let report = std::fs::read_to_string(&report).unwrap();
        assert_eq!(report.lines().count(), 2);
        assert!(report.lines().all(|line| line.contains("\texit 0\t")));
    }

    #[cfg(unix)]
    #[test]
    fn test_failures_are_counted() {
        let summary = execute(&run_args("/bin/sh", &["-c", "exit 3"])).unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.processes[0].exit_code, Some(3));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["processes"][0]["exit_code"], 3);
        assert!(json["processes"][0].get("error").is_none());
    }
}
