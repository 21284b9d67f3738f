/// Container runtime port
///
/// The narrow surface the backup pipeline needs from a container engine.
/// `DockerRuntime` implements it against the Docker Engine API; tests
/// substitute mocks or the recording fake below.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The daemon could not be reached at all; fatal to a run
    #[error("container runtime unreachable: {0}")]
    Unreachable(String),
    /// The daemon answered but refused the request
    #[error("container runtime rejected request ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("container {0} not found")]
    NotFound(String),
    /// The daemon is alive but did not finish the request in time
    #[error("container runtime timed out: {0}")]
    TimedOut(String),
    #[error("exec stream failed: {0}")]
    Stream(String),
}

impl RuntimeError {
    /// Whether the run can no longer talk to the runtime
    pub fn is_connectivity(&self) -> bool {
        matches!(self, RuntimeError::Unreachable(_))
    }
}

/// A bind or volume mount of a running container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub source: String,
    pub destination: String,
    /// Volume name when the mount is a named volume
    pub volume: Option<String>,
}

/// Container descriptor as reported by the runtime, before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    /// `KEY=value` entries from the container config
    pub env: Vec<String>,
    pub mounts: Vec<MountInfo>,
}

/// Command to run inside a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub cmd: Vec<String>,
    /// Extra `KEY=value` entries for the exec process only
    pub env: Vec<String>,
}

impl ExecRequest {
    pub fn new<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.push(format!("{}={}", key, value));
        self
    }

    /// Run `script` under `sh -c`, with `name` as `$0` and `args` as `"$@"`
    pub fn shell<I, S>(script: &str, name: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cmd = vec!["sh".to_string(), "-c".to_string(), script.to_string(), name.to_string()];
        cmd.extend(args.into_iter().map(Into::into));
        Self { cmd, env: Vec::new() }
    }

    /// The dump tool being run; shell wrappers report their `$0`
    pub fn program(&self) -> &str {
        match self.cmd.as_slice() {
            [sh, flag, _script, name, ..] if sh == "sh" && flag == "-c" => name,
            [program, ..] => program,
            [] => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecChunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

/// A started exec: its output stream, then its exit code once the stream ends
pub struct ExecSession {
    pub output: BoxStream<'static, Result<ExecChunk, RuntimeError>>,
    pub exit_code: BoxFuture<'static, Result<i64, RuntimeError>>,
}

impl ExecSession {
    /// Session that replays already-known output
    pub fn completed(stdout: Vec<u8>, stderr: Vec<u8>, exit_code: i64) -> Self {
        let mut chunks = Vec::new();
        if !stdout.is_empty() {
            chunks.push(Ok(ExecChunk::Stdout(stdout)));
        }
        if !stderr.is_empty() {
            chunks.push(Ok(ExecChunk::Stderr(stderr)));
        }
        Self {
            output: futures::stream::iter(chunks).boxed(),
            exit_code: Box::pin(async move { Ok::<_, RuntimeError>(exit_code) }),
        }
    }

    /// Drain the session into memory, for short commands such as version checks
    pub async fn collect(self) -> Result<ExecOutput, RuntimeError> {
        let mut output = self.output;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while let Some(chunk) = output.next().await {
            match chunk? {
                ExecChunk::Stdout(bytes) => stdout.extend_from_slice(&bytes),
                ExecChunk::Stderr(bytes) => stderr.extend_from_slice(&bytes),
            }
        }
        let exit_code = self.exit_code.await?;
        Ok(ExecOutput { exit_code, stdout, stderr })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Running containers only, with their env and mounts
    async fn list_running(&self) -> Result<Vec<RawContainer>, RuntimeError>;

    /// Stop and wait until stopped; stopping a stopped container succeeds
    async fn stop(&self, id: &str) -> Result<(), RuntimeError>;

    /// Start; starting a running container succeeds
    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    async fn exec(&self, id: &str, request: ExecRequest) -> Result<ExecSession, RuntimeError>;

    /// Host directory holding the runtime's named volumes
    async fn volumes_root(&self) -> Result<PathBuf, RuntimeError>;
}

#[cfg(test)]
pub mod fake {
    //! In-memory runtime that records every call in order

    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        List,
        Stop(String),
        Start(String),
        Exec(String, Vec<String>),
        VolumesRoot,
    }

    #[derive(Default)]
    struct State {
        running: HashSet<String>,
        calls: Vec<Call>,
    }

    pub struct FakeRuntime {
        containers: Vec<RawContainer>,
        state: Mutex<State>,
        /// Canned exec replies by container name: (stdout, stderr, exit code)
        exec_replies: HashMap<String, (Vec<u8>, Vec<u8>, i64)>,
        volumes_root: PathBuf,
        fail_list: bool,
        fail_stop: HashSet<String>,
        fail_start: HashSet<String>,
        /// Once this many calls were made every further call is unreachable
        disconnect_after: Option<usize>,
    }

    pub fn container(name: &str, image: &str, env: &[&str]) -> RawContainer {
        RawContainer {
            id: format!("id-{}", name),
            name: name.to_string(),
            image: image.to_string(),
            env: env.iter().map(|e| e.to_string()).collect(),
            mounts: Vec::new(),
        }
    }

    impl FakeRuntime {
        pub fn new(containers: Vec<RawContainer>, volumes_root: PathBuf) -> Self {
            let running = containers.iter().map(|c| c.id.clone()).collect();
            Self {
                containers,
                state: Mutex::new(State { running, calls: Vec::new() }),
                exec_replies: HashMap::new(),
                volumes_root,
                fail_list: false,
                fail_stop: HashSet::new(),
                fail_start: HashSet::new(),
                disconnect_after: None,
            }
        }

        pub fn reply(mut self, name: &str, stdout: &[u8], stderr: &[u8], exit_code: i64) -> Self {
            self.exec_replies
                .insert(name.to_string(), (stdout.to_vec(), stderr.to_vec(), exit_code));
            self
        }

        pub fn failing_list(mut self) -> Self {
            self.fail_list = true;
            self
        }

        pub fn failing_stop(mut self, name: &str) -> Self {
            self.fail_stop.insert(format!("id-{}", name));
            self
        }

        pub fn failing_start(mut self, name: &str) -> Self {
            self.fail_start.insert(format!("id-{}", name));
            self
        }

        pub fn disconnect_after(mut self, calls: usize) -> Self {
            self.disconnect_after = Some(calls);
            self
        }

        pub fn calls(&self) -> Vec<Call> {
            self.state.lock().unwrap().calls.clone()
        }

        pub fn is_running(&self, name: &str) -> bool {
            self.state.lock().unwrap().running.contains(&format!("id-{}", name))
        }

        fn record(&self, call: Call) -> Result<(), RuntimeError> {
            let mut state = self.state.lock().unwrap();
            if let Some(limit) = self.disconnect_after {
                if state.calls.len() >= limit {
                    return Err(RuntimeError::Unreachable("socket closed".to_string()));
                }
            }
            state.calls.push(call);
            Ok(())
        }

        fn name_of(&self, id: &str) -> String {
            self.containers
                .iter()
                .find(|c| c.id == id)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| id.to_string())
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn list_running(&self) -> Result<Vec<RawContainer>, RuntimeError> {
            if self.fail_list {
                return Err(RuntimeError::Unreachable("no such socket".to_string()));
            }
            self.record(Call::List)?;
            let state = self.state.lock().unwrap();
            Ok(self
                .containers
                .iter()
                .filter(|c| state.running.contains(&c.id))
                .cloned()
                .collect())
        }

        async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
            self.record(Call::Stop(self.name_of(id)))?;
            if self.fail_stop.contains(id) {
                return Err(RuntimeError::TimedOut(format!("stop of {} did not complete", id)));
            }
            self.state.lock().unwrap().running.remove(id);
            Ok(())
        }

        async fn start(&self, id: &str) -> Result<(), RuntimeError> {
            self.record(Call::Start(self.name_of(id)))?;
            if self.fail_start.contains(id) {
                return Err(RuntimeError::Api { status: 500, message: "start refused".to_string() });
            }
            self.state.lock().unwrap().running.insert(id.to_string());
            Ok(())
        }

        async fn exec(&self, id: &str, request: ExecRequest) -> Result<ExecSession, RuntimeError> {
            let name = self.name_of(id);
            self.record(Call::Exec(name.clone(), request.cmd.clone()))?;
            let (stdout, stderr, code) = self
                .exec_replies
                .get(&name)
                .cloned()
                .unwrap_or_else(|| (b"-- dump\n".to_vec(), Vec::new(), 0));
            Ok(ExecSession::completed(stdout, stderr, code))
        }

        async fn volumes_root(&self) -> Result<PathBuf, RuntimeError> {
            self.record(Call::VolumesRoot)?;
            Ok(self.volumes_root.clone())
        }
    }
}
