/// Engine-specific dump strategies
///
/// Every dump runs inside the database container through the runtime's exec
/// facility, since the dump binaries ship with the database image. Its
/// stdout is streamed straight into
/// `<destination>/<container>-<engine>-<timestamp>.<ext>` on the host.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use futures::StreamExt;
use regex::Regex;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use crate::core::classifier::{ContainerInfo, EngineKind};
use crate::core::credentials::{CredentialError, Credentials};
use crate::core::runtime::{ContainerRuntime, ExecChunk, ExecRequest, RuntimeError};
use crate::utils::{
    output_tail, MARIADB_DUMP_MIN_MAJOR, MONGO_ARCHIVE_EXTENSION, MONGO_AUTH_DATABASE,
    MONGO_CONFIG_ENV, MYSQL_PASSWORD_ENV, POSTGRES_PASSWORD_ENV, SQL_EXTENSION, STDERR_TAIL_BYTES,
};

#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error("{program} exited with status {exit_code}: {stderr_tail}")]
    CommandFailed {
        program: String,
        exit_code: i64,
        stderr_tail: String,
    },
    #[error("cannot write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("dump did not finish within {}", humantime::format_duration(*.0))]
    Timeout(Duration),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("not attempted: {0}")]
    NotAttempted(String),
}

/// Coarse failure category carried into the run report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MissingCredential,
    UnsupportedEngine,
    CommandFailed,
    Write,
    Timeout,
    Runtime,
    NotAttempted,
}

impl BackupError {
    pub fn kind(&self) -> FailureKind {
        match self {
            BackupError::Credentials(CredentialError::Missing { .. }) => FailureKind::MissingCredential,
            BackupError::Credentials(CredentialError::UnsupportedEngine(_)) => {
                FailureKind::UnsupportedEngine
            }
            BackupError::CommandFailed { .. } => FailureKind::CommandFailed,
            BackupError::Write { .. } => FailureKind::Write,
            BackupError::Timeout(_) => FailureKind::Timeout,
            BackupError::Runtime(_) => FailureKind::Runtime,
            BackupError::NotAttempted(_) => FailureKind::NotAttempted,
        }
    }

    /// Whether the runtime connection itself is gone
    pub fn is_connectivity(&self) -> bool {
        matches!(self, BackupError::Runtime(e) if e.is_connectivity())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of one database container's backup
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupResult {
    pub container: String,
    pub container_id: String,
    pub engine: EngineKind,
    pub success: bool,
    pub error: Option<BackupFailure>,
    pub output: Option<PathBuf>,
    pub bytes_written: u64,
    pub finished_at: DateTime<Local>,
}

impl BackupResult {
    pub fn succeeded(container: &ContainerInfo, output: PathBuf, bytes_written: u64) -> Self {
        Self {
            container: container.name.clone(),
            container_id: container.id.clone(),
            engine: container.engine().unwrap_or(EngineKind::Unrecognized),
            success: true,
            error: None,
            output: Some(output),
            bytes_written,
            finished_at: Local::now(),
        }
    }

    pub fn failed(container: &ContainerInfo, error: &BackupError) -> Self {
        Self {
            container: container.name.clone(),
            container_id: container.id.clone(),
            engine: container.engine().unwrap_or(EngineKind::Unrecognized),
            success: false,
            error: Some(BackupFailure {
                kind: error.kind(),
                message: error.to_string(),
            }),
            output: None,
            bytes_written: 0,
            finished_at: Local::now(),
        }
    }
}

/// Per-run settings shared by every dump
#[derive(Debug, Clone)]
pub struct DumpOptions {
    pub destination_dir: PathBuf,
    /// Run timestamp, identical for every file of a run
    pub timestamp: String,
    pub timeout: Option<Duration>,
    /// Dump only the configured database instead of the whole instance
    pub database_only: bool,
}

impl DumpOptions {
    pub fn output_path(&self, container: &str, engine: EngineKind, extension: &str) -> PathBuf {
        self.destination_dir.join(format!(
            "{}-{}-{}.{}",
            container,
            engine.slug(),
            self.timestamp,
            extension
        ))
    }
}

#[async_trait]
pub trait BackupStrategy: Send + Sync {
    fn engine(&self) -> EngineKind;

    /// File extension of the dump artifact
    fn extension(&self) -> &'static str {
        SQL_EXTENSION
    }

    /// Build the dump invocation, probing the container when needed
    async fn dump_command(
        &self,
        runtime: &dyn ContainerRuntime,
        container: &ContainerInfo,
        creds: &Credentials,
        options: &DumpOptions,
    ) -> Result<ExecRequest, BackupError>;
}

pub struct MySqlDump;
pub struct MariaDbDump;
pub struct PostgresDump;
pub struct MongoDump;

fn mysql_family_args(program: &str, creds: &Credentials, options: &DumpOptions) -> ExecRequest {
    let mut cmd = vec![program.to_string()];
    if let Some(user) = &creds.user {
        cmd.push("-u".to_string());
        cmd.push(user.clone());
    }
    cmd.extend(
        ["--single-transaction", "--routines", "--events"]
            .iter()
            .map(|s| s.to_string()),
    );
    match (&creds.database, options.database_only) {
        (Some(database), true) => {
            cmd.push("--databases".to_string());
            cmd.push(database.clone());
        }
        _ => cmd.push("--all-databases".to_string()),
    }
    let request = ExecRequest::new(cmd);
    match &creds.password {
        // Read by the client library, unlike -p it does not show up in ps
        Some(password) => request.with_env(MYSQL_PASSWORD_ENV, password),
        None => request,
    }
}

#[async_trait]
impl BackupStrategy for MySqlDump {
    fn engine(&self) -> EngineKind {
        EngineKind::MySql
    }

    async fn dump_command(
        &self,
        _runtime: &dyn ContainerRuntime,
        _container: &ContainerInfo,
        creds: &Credentials,
        options: &DumpOptions,
    ) -> Result<ExecRequest, BackupError> {
        Ok(mysql_family_args("mysqldump", creds, options))
    }
}

fn mariadb_version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:from|Distrib) (\d+)\.\d+(?:\.\d+)?-MariaDB").expect("valid MariaDB version regex")
    })
}

/// Server major version from `mariadb --version` output
pub fn parse_mariadb_major(version_output: &str) -> Option<u32> {
    mariadb_version_regex()
        .captures(version_output)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// MariaDB 11 dropped the `mysqldump` alias, older images may lack `mariadb-dump`
pub fn mariadb_dump_program(major: Option<u32>) -> &'static str {
    match major {
        Some(major) if major < MARIADB_DUMP_MIN_MAJOR => "mysqldump",
        _ => "mariadb-dump",
    }
}

#[async_trait]
impl BackupStrategy for MariaDbDump {
    fn engine(&self) -> EngineKind {
        EngineKind::MariaDb
    }

    async fn dump_command(
        &self,
        runtime: &dyn ContainerRuntime,
        container: &ContainerInfo,
        creds: &Credentials,
        options: &DumpOptions,
    ) -> Result<ExecRequest, BackupError> {
        let major = match runtime
            .exec(&container.id, ExecRequest::new(["mariadb", "--version"]))
            .await
        {
            Ok(session) => match session.collect().await {
                Ok(output) if output.exit_code == 0 => {
                    parse_mariadb_major(&String::from_utf8_lossy(&output.stdout))
                }
                Ok(output) => {
                    debug!(container = %container.name, exit_code = output.exit_code, "mariadb version check failed");
                    None
                }
                Err(e) if e.is_connectivity() => return Err(e.into()),
                Err(e) => {
                    debug!(container = %container.name, error = %e, "mariadb version check failed");
                    None
                }
            },
            Err(e) if e.is_connectivity() => return Err(e.into()),
            Err(e) => {
                debug!(container = %container.name, error = %e, "mariadb version check failed");
                None
            }
        };

        let program = mariadb_dump_program(major);
        debug!(container = %container.name, ?major, program, "selected MariaDB dump binary");
        Ok(mysql_family_args(program, creds, options))
    }
}

#[async_trait]
impl BackupStrategy for PostgresDump {
    fn engine(&self) -> EngineKind {
        EngineKind::PostgreSql
    }

    async fn dump_command(
        &self,
        _runtime: &dyn ContainerRuntime,
        _container: &ContainerInfo,
        creds: &Credentials,
        options: &DumpOptions,
    ) -> Result<ExecRequest, BackupError> {
        let user = creds.user.clone().unwrap_or_default();
        let mut request = match (&creds.database, options.database_only) {
            (Some(database), true) => {
                ExecRequest::new(["pg_dump", "-U", user.as_str(), "--create", "-d", database.as_str()])
            }
            _ => ExecRequest::new(["pg_dumpall", "-U", user.as_str()]),
        };
        if let Some(password) = &creds.password {
            request = request.with_env(POSTGRES_PASSWORD_ENV, password);
        }
        Ok(request)
    }
}

#[async_trait]
impl BackupStrategy for MongoDump {
    fn engine(&self) -> EngineKind {
        EngineKind::MongoDb
    }

    fn extension(&self) -> &'static str {
        MONGO_ARCHIVE_EXTENSION
    }

    async fn dump_command(
        &self,
        _runtime: &dyn ContainerRuntime,
        _container: &ContainerInfo,
        creds: &Credentials,
        options: &DumpOptions,
    ) -> Result<ExecRequest, BackupError> {
        // --archive without a path packs the whole dump tree into one stream on stdout
        let mut args = vec!["--archive".to_string()];
        let auth = creds.user.as_ref().zip(creds.password.as_ref());
        if let Some((user, _)) = auth {
            args.extend([
                "--username".to_string(),
                user.clone(),
                "--authenticationDatabase".to_string(),
                MONGO_AUTH_DATABASE.to_string(),
            ]);
        }
        if let (Some(database), true) = (&creds.database, options.database_only) {
            args.push("--db".to_string());
            args.push(database.clone());
        }

        match auth {
            // mongodump has no password variable, it takes one from a --config file
            Some((_, password)) => Ok(ExecRequest::shell(MONGO_CONFIG_SCRIPT, "mongodump", args)
                .with_env(MONGO_CONFIG_ENV, &mongo_password_config(password))),
            None => Ok(ExecRequest::new(std::iter::once("mongodump".to_string()).chain(args))),
        }
    }
}

/// Writes the config from the exec environment to a private temp file for the
/// length of the dump
const MONGO_CONFIG_SCRIPT: &str = concat!(
    "set -e; umask 077; conf=$(mktemp); trap 'rm -f \"$conf\"' EXIT; ",
    "printf '%s\\n' \"$DOCKERBK_MONGO_CONFIG\" > \"$conf\"; ",
    "\"$0\" --config \"$conf\" \"$@\"",
);

/// YAML config holding only the password, as a double-quoted scalar
fn mongo_password_config(password: &str) -> String {
    let mut escaped = String::with_capacity(password.len());
    for c in password.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c if c.is_control() => escaped.push_str(&format!("\\u{:04x}", c as u32)),
            c => escaped.push(c),
        }
    }
    format!("password: \"{}\"", escaped)
}

static MYSQL: MySqlDump = MySqlDump;
static MARIADB: MariaDbDump = MariaDbDump;
static POSTGRES: PostgresDump = PostgresDump;
static MONGO: MongoDump = MongoDump;

/// Strategy for an engine, `None` for engines without a dump recipe
pub fn strategy_for(engine: EngineKind) -> Option<&'static dyn BackupStrategy> {
    match engine {
        EngineKind::MySql => Some(&MYSQL),
        EngineKind::MariaDb => Some(&MARIADB),
        EngineKind::PostgreSql => Some(&POSTGRES),
        EngineKind::MongoDb => Some(&MONGO),
        EngineKind::Unrecognized => None,
    }
}

/// Dump one database container; never fails, failures become the result
pub async fn backup(
    runtime: &dyn ContainerRuntime,
    container: &ContainerInfo,
    creds: &Credentials,
    options: &DumpOptions,
) -> BackupResult {
    match try_backup(runtime, container, creds, options).await {
        Ok((path, bytes)) => BackupResult::succeeded(container, path, bytes),
        Err(e) => BackupResult::failed(container, &e),
    }
}

/// Fallible core of [`backup`], kept separate so callers can inspect the typed error
pub async fn try_backup(
    runtime: &dyn ContainerRuntime,
    container: &ContainerInfo,
    creds: &Credentials,
    options: &DumpOptions,
) -> Result<(PathBuf, u64), BackupError> {
    let strategy = strategy_for(creds.engine)
        .ok_or(BackupError::Credentials(CredentialError::UnsupportedEngine(creds.engine)))?;

    let request = strategy.dump_command(runtime, container, creds, options).await?;
    let path = options.output_path(&container.name, strategy.engine(), strategy.extension());

    info!(container = %container.name, engine = %strategy.engine(), program = request.program(), path = %path.display(), "dumping database");

    match stream_dump(runtime, container, request, &path, options.timeout).await {
        Ok(bytes) => Ok((path, bytes)),
        Err(e) => {
            if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                if remove_err.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %remove_err, "could not remove partial dump");
                }
            }
            Err(e)
        }
    }
}

async fn stream_dump(
    runtime: &dyn ContainerRuntime,
    container: &ContainerInfo,
    request: ExecRequest,
    path: &Path,
    timeout: Option<Duration>,
) -> Result<u64, BackupError> {
    let write_err = |source: io::Error| BackupError::Write {
        path: path.to_path_buf(),
        source,
    };

    let file = tokio::fs::File::create(path).await.map_err(write_err)?;
    let mut writer = BufWriter::new(file);
    let program = request.program().to_string();

    let dump = async {
        let session = runtime.exec(&container.id, request).await?;
        let mut output = session.output;
        let mut stderr = Vec::new();
        let mut written: u64 = 0;

        while let Some(chunk) = output.next().await {
            match chunk? {
                ExecChunk::Stdout(bytes) => {
                    writer.write_all(&bytes).await.map_err(write_err)?;
                    written += bytes.len() as u64;
                }
                ExecChunk::Stderr(bytes) => {
                    stderr.extend_from_slice(&bytes);
                    // Only the tail is ever reported
                    if stderr.len() > STDERR_TAIL_BYTES * 2 {
                        stderr.drain(..stderr.len() - STDERR_TAIL_BYTES);
                    }
                }
            }
        }

        writer.flush().await.map_err(write_err)?;
        let exit_code = session.exit_code.await?;
        Ok::<_, BackupError>((exit_code, stderr, written))
    };

    let (exit_code, stderr, written) = match timeout {
        Some(limit) => tokio::time::timeout(limit, dump)
            .await
            .map_err(|_| BackupError::Timeout(limit))??,
        None => dump.await?,
    };

    if exit_code != 0 {
        return Err(BackupError::CommandFailed {
            program,
            exit_code,
            stderr_tail: output_tail(&stderr, STDERR_TAIL_BYTES),
        });
    }

    debug!(container = %container.name, bytes = written, "dump stream closed");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::Role;
    use crate::core::credentials::extract_for;
    use crate::core::runtime::{ExecSession, MockContainerRuntime};
    use futures::stream;

    fn container(name: &str, engine: EngineKind) -> ContainerInfo {
        ContainerInfo {
            id: format!("id-{}", name),
            name: name.to_string(),
            image: engine.slug().to_string(),
            running: true,
            role: Role::Database(engine),
            env: Vec::new(),
        }
    }

    fn options(dir: &Path) -> DumpOptions {
        DumpOptions {
            destination_dir: dir.to_path_buf(),
            timestamp: "20240101-000000".to_string(),
            timeout: None,
            database_only: false,
        }
    }

    fn creds(engine: EngineKind, env: &[&str]) -> Credentials {
        let env: Vec<String> = env.iter().map(|e| e.to_string()).collect();
        extract_for(engine, &env).unwrap()
    }

    #[tokio::test]
    async fn test_mysql_dump_written_to_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_exec()
            .withf(|id, request| {
                id == "id-db"
                    && request.cmd[..4] == ["mysqldump", "-u", "root", "--single-transaction"]
                    && request.cmd.last().map(String::as_str) == Some("--all-databases")
                    && !request.cmd.iter().any(|arg| arg.contains("secret"))
                    && request.env == ["MYSQL_PWD=secret"]
            })
            .times(1)
            .returning(|_, _| Ok(ExecSession::completed(b"CREATE TABLE t;\n".to_vec(), Vec::new(), 0)));

        let db = container("db", EngineKind::MySql);
        let result = backup(
            &runtime,
            &db,
            &creds(EngineKind::MySql, &["MYSQL_ROOT_PASSWORD=secret"]),
            &options(dir.path()),
        )
        .await;

        assert!(result.success, "{:?}", result.error);
        let path = dir.path().join("db-mysql-20240101-000000.sql");
        assert_eq!(result.output.as_deref(), Some(path.as_path()));
        assert_eq!(result.bytes_written, 16);
        assert_eq!(std::fs::read_to_string(path).unwrap(), "CREATE TABLE t;\n");
    }

    #[tokio::test]
    async fn test_non_zero_exit_reports_stderr_and_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_exec().returning(|_, _| {
            Ok(ExecSession::completed(
                b"-- partial".to_vec(),
                b"pg_dumpall: error: connection refused\n".to_vec(),
                1,
            ))
        });

        let pg = container("pg", EngineKind::PostgreSql);
        let err = try_backup(&runtime, &pg, &creds(EngineKind::PostgreSql, &[]), &options(dir.path()))
            .await
            .unwrap_err();

        match &err {
            BackupError::CommandFailed { program, exit_code, stderr_tail } => {
                assert_eq!(program, "pg_dumpall");
                assert_eq!(*exit_code, 1);
                assert!(stderr_tail.contains("connection refused"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(err.kind(), FailureKind::CommandFailed);
        assert!(!dir.path().join("pg-postgresql-20240101-000000.sql").exists());
    }

    #[tokio::test]
    async fn test_unwritable_destination() {
        let dir = tempfile::tempdir().unwrap();
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_exec().never();

        let mut opts = options(dir.path());
        opts.destination_dir = dir.path().join("missing").join("nested");

        let db = container("db", EngineKind::MySql);
        let result = backup(&runtime, &db, &creds(EngineKind::MySql, &["MYSQL_ROOT_PASSWORD=x"]), &opts).await;

        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind, FailureKind::Write);
    }

    #[tokio::test]
    async fn test_postgres_password_passed_as_env() {
        let dir = tempfile::tempdir().unwrap();
        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_exec()
            .withf(|_, request| {
                request.cmd == ["pg_dumpall", "-U", "admin"] && request.env == ["PGPASSWORD=pw"]
            })
            .returning(|_, _| Ok(ExecSession::completed(b"--".to_vec(), Vec::new(), 0)));

        let pg = container("pg", EngineKind::PostgreSql);
        let result = backup(
            &runtime,
            &pg,
            &creds(EngineKind::PostgreSql, &["POSTGRES_USER=admin", "POSTGRES_PASSWORD=pw"]),
            &options(dir.path()),
        )
        .await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_mongo_archive_extension_and_auth() {
        let dir = tempfile::tempdir().unwrap();
        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_exec()
            .withf(|_, request| {
                request.program() == "mongodump"
                    && request.cmd[..2] == ["sh", "-c"]
                    && request.cmd[4..] == ["--archive", "--username", "root", "--authenticationDatabase", "admin"]
                    && !request.cmd.iter().any(|arg| arg.contains("s3cr3t"))
                    && request.env == ["DOCKERBK_MONGO_CONFIG=password: \"s3cr3t\""]
            })
            .returning(|_, _| Ok(ExecSession::completed(vec![0x6d, 0xe2, 0x99, 0x81], Vec::new(), 0)));

        let mongo = container("mongo", EngineKind::MongoDb);
        let result = backup(
            &runtime,
            &mongo,
            &creds(
                EngineKind::MongoDb,
                &["MONGO_INITDB_ROOT_USERNAME=root", "MONGO_INITDB_ROOT_PASSWORD=s3cr3t"],
            ),
            &options(dir.path()),
        )
        .await;

        assert!(result.success);
        assert!(result
            .output
            .unwrap()
            .ends_with("mongo-mongodb-20240101-000000.archive"));
    }

    #[tokio::test]
    async fn test_mariadb_binary_follows_server_version() {
        let dir = tempfile::tempdir().unwrap();
        let mut runtime = MockContainerRuntime::new();
        let mut seq = mockall::Sequence::new();
        runtime
            .expect_exec()
            .withf(|_, request| request.cmd == ["mariadb", "--version"])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Ok(ExecSession::completed(
                    b"mysql  Ver 15.1 Distrib 10.6.12-MariaDB, for debian-linux-gnu".to_vec(),
                    Vec::new(),
                    0,
                ))
            });
        runtime
            .expect_exec()
            .withf(|_, request| request.program() == "mysqldump")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(ExecSession::completed(b"--".to_vec(), Vec::new(), 0)));

        let maria = container("maria", EngineKind::MariaDb);
        let result = backup(
            &runtime,
            &maria,
            &creds(EngineKind::MariaDb, &["MARIADB_ROOT_PASSWORD=pw"]),
            &options(dir.path()),
        )
        .await;
        assert!(result.success, "{:?}", result.error);
        assert!(result.output.unwrap().ends_with("maria-mariadb-20240101-000000.sql"));
    }

    #[test]
    fn test_parse_mariadb_major() {
        assert_eq!(
            parse_mariadb_major("mariadb from 11.8.3-MariaDB, client 15.2 for debian-linux-gnu"),
            Some(11)
        );
        assert_eq!(
            parse_mariadb_major("mysql  Ver 15.1 Distrib 10.11.6-MariaDB, for debian-linux-gnu"),
            Some(10)
        );
        assert_eq!(parse_mariadb_major("command not found"), None);

        assert_eq!(mariadb_dump_program(Some(10)), "mysqldump");
        assert_eq!(mariadb_dump_program(Some(11)), "mariadb-dump");
        assert_eq!(mariadb_dump_program(None), "mariadb-dump");
    }

    #[tokio::test]
    async fn test_mongo_without_auth_runs_directly() {
        let runtime = MockContainerRuntime::new();
        let dir = tempfile::tempdir().unwrap();
        let mongo = container("mongo", EngineKind::MongoDb);

        let request = MongoDump
            .dump_command(&runtime, &mongo, &creds(EngineKind::MongoDb, &[]), &options(dir.path()))
            .await
            .unwrap();
        assert_eq!(request.cmd, ["mongodump", "--archive"]);
        assert!(request.env.is_empty());
    }

    #[test]
    fn test_mongo_password_config_escaping() {
        assert_eq!(mongo_password_config("pw"), "password: \"pw\"");
        assert_eq!(
            mongo_password_config("a\"b\\c\nd"),
            "password: \"a\\\"b\\\\c\\nd\""
        );
        assert!(MONGO_CONFIG_SCRIPT.contains(&format!("\"${}\"", MONGO_CONFIG_ENV)));
        assert!(MONGO_CONFIG_SCRIPT.contains("trap"));
    }

    #[test]
    fn test_database_only_scopes_mysql_dump() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path());
        opts.database_only = true;

        let scoped = mysql_family_args(
            "mysqldump",
            &creds(EngineKind::MySql, &["MYSQL_ROOT_PASSWORD=pw", "MYSQL_DATABASE=shop"]),
            &opts,
        );
        assert!(scoped.cmd.ends_with(&["--databases".to_string(), "shop".to_string()]));

        // no database variable: still a full dump
        let full = mysql_family_args("mysqldump", &creds(EngineKind::MySql, &["MYSQL_ROOT_PASSWORD=pw"]), &opts);
        assert_eq!(full.cmd.last().map(String::as_str), Some("--all-databases"));
    }

    #[tokio::test]
    async fn test_timeout_becomes_backup_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_exec().returning(|_, _| {
            Ok(ExecSession {
                output: stream::pending::<Result<ExecChunk, RuntimeError>>().boxed(),
                exit_code: Box::pin(async { Ok::<i64, RuntimeError>(0) }),
            })
        });

        let mut opts = options(dir.path());
        opts.timeout = Some(Duration::from_millis(20));

        let db = container("db", EngineKind::MySql);
        let err = try_backup(&runtime, &db, &creds(EngineKind::MySql, &["MYSQL_ROOT_PASSWORD=x"]), &opts)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Timeout);
        assert!(!dir.path().join("db-mysql-20240101-000000.sql").exists());
    }

    #[tokio::test]
    async fn test_lost_connection_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_exec()
            .returning(|_, _| Err(RuntimeError::Unreachable("broken pipe".to_string())));

        let db = container("db", EngineKind::MySql);
        let err = try_backup(&runtime, &db, &creds(EngineKind::MySql, &["MYSQL_ROOT_PASSWORD=x"]), &options(dir.path()))
            .await
            .unwrap_err();
        assert!(err.is_connectivity());
        assert_eq!(err.kind(), FailureKind::Runtime);
    }
}
