//! External program as a unit of work.
//!
//! [`NativeProcess`] validates its executable up front, spawns it on
//! [`execute`](UnitOfWork::execute), waits for it to exit and keeps the exit
//! status for later inspection. Observers registered on the process are told
//! when it starts and when it finishes, independently of the runner's own
//! completion callback.

use std::{
    fmt,
    fs::File,
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
    time::{Duration, Instant},
};

use fanout_common::{Result, error::Error, sync::panic_message, verify_arg};

use crate::unit_of_work::UnitOfWork;

/// Lifecycle notifications delivered to a [`ProcessObserver`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Sent immediately before the process is spawned.
    Started,
    /// Sent immediately after the process exited.
    Finished,
}

/// Receives start/finish notifications for one [`NativeProcess`].
///
/// Observers run on the thread executing the process (a runner worker), so
/// an observer shared between processes must synchronize its own state.
pub trait ProcessObserver: Send + 'static {
    fn status_changed(&mut self, process: &NativeProcess, status: ProcessStatus);
}

impl<F> ProcessObserver for F
where
    F: FnMut(&NativeProcess, ProcessStatus) + Send + 'static,
{
    fn status_changed(&mut self, process: &NativeProcess, status: ProcessStatus) {
        self(process, status)
    }
}

/// Handle returned by [`NativeProcess::add_observer`], used to remove it again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Where a child's output stream goes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Redirect {
    /// Discard the output.
    #[default]
    Null,
    /// Share the parent's stream.
    Inherit,
    /// Create (or truncate) the file and write the output there.
    File(PathBuf),
}

impl Redirect {
    fn to_stdio(&self) -> std::io::Result<Stdio> {
        Ok(match self {
            Redirect::Null => Stdio::null(),
            Redirect::Inherit => Stdio::inherit(),
            Redirect::File(path) => Stdio::from(File::create(path)?),
        })
    }
}

/// What is known about the process so far.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Exited(ExitStatus),
    /// The process could not be spawned or waited on.
    Failed(String),
}

pub struct NativeProcess {
    program: PathBuf,
    args: Vec<String>,
    id: Option<u64>,
    stdout: Redirect,
    stderr: Redirect,
    observers: Vec<(ObserverId, Box<dyn ProcessObserver>)>,
    next_observer: u64,
    state: ProcessState,
    pid: Option<u32>,
    elapsed: Option<Duration>,
}

impl NativeProcess {
    /// Prepares `program` to run with `args`.
    ///
    /// Fails with `InvalidArgument` for an empty path, `NotFound` if `program`
    /// does not exist and `NotExecutable` if it is not an executable file for
    /// the current user.
    pub fn new<I, S>(program: impl AsRef<Path>, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let program = program.as_ref();
        verify_arg!(program, !program.as_os_str().is_empty());
        if !program.exists() {
            return Err(Error::not_found(program));
        }
        if !program.is_file() || !is_executable(program) {
            return Err(Error::not_executable(program));
        }
        Ok(NativeProcess {
            program: program.to_path_buf(),
            args: args.into_iter().map(Into::into).collect(),
            id: None,
            stdout: Redirect::Null,
            stderr: Redirect::Null,
            observers: Vec::new(),
            next_observer: 0,
            state: ProcessState::NotStarted,
            pid: None,
            elapsed: None,
        })
    }

    /// Attaches a caller-chosen identifier.
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_stdout(mut self, redirect: Redirect) -> Self {
        self.stdout = redirect;
        self
    }

    pub fn with_stderr(mut self, redirect: Redirect) -> Self {
        self.stderr = redirect;
        self
    }

    pub fn add_observer(&mut self, observer: impl ProcessObserver) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    /// Returns `false` if no observer with that id is registered.
    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer_id, _)| *observer_id != id);
        self.observers.len() != before
    }

    pub fn id(&self) -> Option<u64> {
        self.id
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Program and arguments joined by single spaces.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn state(&self) -> &ProcessState {
        &self.state
    }

    /// OS process id of the most recent spawn; `None` until the process has
    /// been spawned.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wall time from spawn to exit, once the process has exited.
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    /// The exit code. A process killed by a signal reports `128 + signal`.
    ///
    /// Fails with `IllegalState` if the process has not run, or could not be run.
    pub fn exit_code(&self) -> Result<i32> {
        match &self.state {
            ProcessState::Exited(status) => Ok(exit_code_of(status)),
            ProcessState::NotStarted => Err(Error::illegal_state("the process has not run yet")),
            ProcessState::Failed(message) => Err(Error::illegal_state(format!(
                "the process failed to run: {message}"
            ))),
        }
    }

    /// `true` if the process exited with code 0. Same failure modes as
    /// [`exit_code`](Self::exit_code).
    pub fn finished_ok(&self) -> Result<bool> {
        self.exit_code().map(|code| code == 0)
    }

    /// A panicking observer is logged and skipped; it stays registered.
    fn notify(&mut self, status: ProcessStatus) {
        let mut observers = std::mem::take(&mut self.observers);
        let this = &*self;
        for (id, observer) in observers.iter_mut() {
            let delivered =
                panic::catch_unwind(AssertUnwindSafe(|| observer.status_changed(this, status)));
            if let Err(payload) = delivered {
                log::error!(
                    "observer {id:?} of '{}' panicked on {status:?}: {}",
                    this.command_line(),
                    panic_message(&*payload)
                );
            }
        }
        self.observers = observers;
    }

    /// Both streams redirected to the same file share one handle, so neither
    /// truncates the other's output.
    fn output_stdio(&self) -> std::io::Result<(Stdio, Stdio)> {
        if let (Redirect::File(out), Redirect::File(err)) = (&self.stdout, &self.stderr) {
            if out == err {
                let file = File::create(out)?;
                let shared = file.try_clone()?;
                return Ok((Stdio::from(file), Stdio::from(shared)));
            }
        }
        Ok((self.stdout.to_stdio()?, self.stderr.to_stdio()?))
    }

    fn run(&mut self) -> std::io::Result<ExitStatus> {
        let (stdout, stderr) = self.output_stdio()?;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()?;
        self.pid = Some(child.id());
        child.wait()
    }
}

impl UnitOfWork for NativeProcess {
    fn execute(&mut self) {
        self.notify(ProcessStatus::Started);
        let started = Instant::now();
        match self.run() {
            Ok(status) => {
                self.elapsed = Some(started.elapsed());
                self.state = ProcessState::Exited(status);
                log::trace!("'{}' exited with {status}", self.command_line());
                self.notify(ProcessStatus::Finished);
            }
            Err(e) => {
                log::error!("failed to run '{}': {e}", self.command_line());
                self.state = ProcessState::Failed(e.to_string());
            }
        }
    }
}

impl fmt::Debug for NativeProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeProcess")
            .field("id", &self.id)
            .field("command", &self.command_line())
            .field("state", &self.state)
            .field("pid", &self.pid)
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = std::ffi::CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: `c_path` is a valid NUL-terminated string that outlives the call.
    unsafe { libc::access(c_path.as_ptr(), libc::X_OK) == 0 }
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(unix)]
fn exit_code_of(status: &ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code_of(status: &ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
