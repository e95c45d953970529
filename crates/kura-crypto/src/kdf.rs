//! Key derivation using Argon2id behind a cancellable handle.
//!
//! Hashing is memory-hard and slow, so it never runs on the caller's task.
//! A [`KdfWorker`] takes a [`KdfRequest`] and answers with a [`KdfHandle`]:
//!
//! ```text
//! let handle = worker.spawn(request);
//! let canceler = handle.canceler();   // clone freely, e.g. into a UI
//! let key = handle.await_result().await?;
//! ```
//!
//! Cancelling resolves the waiter with [`KdfError::Cancelled`] right away
//! and tears the job down. Whichever of completion and cancellation happens
//! first wins; the other is a no-op.
//!
//! Argon2 cannot be interrupted mid-hash, so how much work a cancel saves
//! depends on the worker. [`ProcessKdfWorker`] hashes in a child process and
//! kills it. [`BlockingKdfWorker`] hashes on the blocking pool: a job that has
//! not started never runs, but a running hash finishes and its output is
//! zeroized and discarded.
//!
//! [`default_worker`] is what [`derive`] and the `Catalog` constructors use.
//! Hosts that can serve [`serve_kdf_request`] in a child install a
//! [`ProcessKdfWorker`] with [`install_default_worker`] at startup.

use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use argon2::{Algorithm, Argon2, Params, Version};
use kura_core::defaults::{
    KDF_FAILED_CODE, KDF_ITERATIONS, KDF_ITERATIONS_ENV, KDF_MEMORY_ENV, KDF_MEMORY_KIB,
    KDF_THREADS, KDF_THREADS_ENV, KEY_LENGTH,
};
use kura_core::wire;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Notify};
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::cipher::generate_salt;
use crate::error::KdfError;

// =============================================================================
// PARAMETERS
// =============================================================================

/// Argon2id cost used when sealing a new catalog.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KdfCost {
    /// Memory in KiB (default: 65536 = 64 MiB).
    pub memory_kib: u32,
    /// Time iterations (default: 3).
    pub iterations: u32,
    /// Parallelism degree (default: 4).
    pub threads: u32,
}

impl Default for KdfCost {
    fn default() -> Self {
        Self {
            memory_kib: KDF_MEMORY_KIB,
            iterations: KDF_ITERATIONS,
            threads: KDF_THREADS,
        }
    }
}

impl KdfCost {
    /// Defaults overridden by `KURA_KDF_MEMORY_KIB`, `KURA_KDF_ITERATIONS`
    /// and `KURA_KDF_THREADS`. Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            memory_kib: parse_u32_env(KDF_MEMORY_ENV, defaults.memory_kib),
            iterations: parse_u32_env(KDF_ITERATIONS_ENV, defaults.iterations),
            threads: parse_u32_env(KDF_THREADS_ENV, defaults.threads),
        }
    }

    /// Minimal cost, for tests and throwaway catalogs.
    pub fn insecure_fast() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            threads: 1,
        }
    }
}

fn parse_u32_env(key: &str, default: u32) -> u32 {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Ignoring unparseable KDF setting");
            default
        }),
        Err(_) => default,
    }
}

/// Argon2id settings stored in an envelope.
///
/// `memory` is in bytes on the wire; Argon2 itself takes KiB.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KdfParams {
    pub memory: u64,
    pub iterations: u32,
    pub threads: u32,
    #[serde(with = "wire::bytes")]
    pub salt: Vec<u8>,
}

impl KdfParams {
    /// Parameters for `cost` with a fresh random salt.
    pub fn generate(cost: &KdfCost) -> Self {
        Self {
            memory: u64::from(cost.memory_kib) * 1024,
            iterations: cost.iterations,
            threads: cost.threads,
            salt: generate_salt().to_vec(),
        }
    }

    /// Memory cost in KiB, rounded down.
    pub fn memory_kib(&self) -> u32 {
        u32::try_from(self.memory / 1024).unwrap_or(u32::MAX)
    }

    /// A request deriving a key for `password` with these parameters.
    pub fn request(&self, password: &[u8]) -> KdfRequest {
        KdfRequest {
            password: Zeroizing::new(password.to_vec()),
            salt: self.salt.clone(),
            time_cost: self.iterations,
            memory_kib: self.memory_kib(),
            parallelism: self.threads,
            output_length: KEY_LENGTH,
        }
    }
}

impl std::fmt::Debug for KdfParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KdfParams")
            .field("memory", &self.memory)
            .field("iterations", &self.iterations)
            .field("threads", &self.threads)
            .field("salt_len", &self.salt.len())
            .finish()
    }
}

/// One derivation job.
///
/// The serialized form is what [`ProcessKdfWorker`] sends to its child.
#[derive(Clone, Serialize, Deserialize)]
pub struct KdfRequest {
    #[serde(
        serialize_with = "wire::bytes::serialize",
        deserialize_with = "zeroizing_bytes"
    )]
    pub password: Zeroizing<Vec<u8>>,
    #[serde(with = "wire::bytes")]
    pub salt: Vec<u8>,
    pub time_cost: u32,
    pub memory_kib: u32,
    pub parallelism: u32,
    pub output_length: usize,
}

impl std::fmt::Debug for KdfRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KdfRequest")
            .field("password", &"[REDACTED]")
            .field("time_cost", &self.time_cost)
            .field("memory_kib", &self.memory_kib)
            .field("parallelism", &self.parallelism)
            .field("output_length", &self.output_length)
            .finish()
    }
}

/// Derived key material, zeroized on drop.
pub type KdfOutput = Zeroizing<Vec<u8>>;

fn zeroizing_bytes<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Zeroizing<Vec<u8>>, D::Error> {
    wire::bytes::deserialize(deserializer).map(Zeroizing::new)
}

/// Run Argon2id synchronously on the current thread.
pub fn derive_key_blocking(request: &KdfRequest) -> Result<KdfOutput, KdfError> {
    let params = Params::new(
        request.memory_kib,
        request.time_cost,
        request.parallelism,
        Some(request.output_length),
    )
    .map_err(|e| KdfError::InvalidParameters(e.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut output = Zeroizing::new(vec![0u8; request.output_length]);
    argon2
        .hash_password_into(&request.password, &request.salt, &mut output)
        .map_err(|e| match e {
            argon2::Error::SaltTooShort
            | argon2::Error::SaltTooLong
            | argon2::Error::PwdTooLong
            | argon2::Error::OutputTooShort
            | argon2::Error::OutputTooLong => KdfError::InvalidParameters(e.to_string()),
            other => KdfError::Failed {
                code: KDF_FAILED_CODE,
                message: other.to_string(),
            },
        })?;

    Ok(output)
}

// =============================================================================
// HANDLE
// =============================================================================

type Outcome = Result<KdfOutput, KdfError>;

struct CancelState {
    cancelled: AtomicBool,
    sender: Mutex<Option<oneshot::Sender<Outcome>>>,
    abort: Mutex<Option<AbortHandle>>,
    notify: Notify,
}

impl CancelState {
    fn new(sender: oneshot::Sender<Outcome>) -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            sender: Mutex::new(Some(sender)),
            abort: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    fn take_sender(&self) -> Option<oneshot::Sender<Outcome>> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Deliver a worker outcome unless the job was cancelled first.
    fn complete(&self, outcome: Outcome) {
        match self.take_sender() {
            Some(sender) => {
                // The waiter may have been dropped; the outcome zeroizes on drop
                let _ = sender.send(outcome);
            }
            None => debug!("Discarding output of cancelled key derivation"),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once the job is cancelled. Only one waiter is supported.
    async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Cancels one derivation. Cheap to clone; only the first effective call
/// does anything.
#[derive(Clone)]
pub struct KdfCanceler {
    state: Arc<CancelState>,
}

impl KdfCanceler {
    /// Resolve the waiter with [`KdfError::Cancelled`] and tear the job down.
    ///
    /// Returns `false` when the job had already finished or been cancelled.
    pub fn cancel(&self) -> bool {
        if self.state.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        let Some(sender) = self.state.take_sender() else {
            return false;
        };
        let _ = sender.send(Err(KdfError::Cancelled));
        self.state.notify.notify_one();
        if let Some(abort) = self
            .state
            .abort
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            abort.abort();
        }
        debug!("Key derivation cancelled");
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }
}

impl std::fmt::Debug for KdfCanceler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KdfCanceler")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A pending derivation.
#[derive(Debug)]
pub struct KdfHandle {
    receiver: oneshot::Receiver<Outcome>,
    canceler: KdfCanceler,
}

impl KdfHandle {
    /// Create a handle plus the completion side a worker reports through.
    pub fn channel() -> (Self, KdfCompletion) {
        let (sender, receiver) = oneshot::channel();
        let state = Arc::new(CancelState::new(sender));
        let handle = Self {
            receiver,
            canceler: KdfCanceler {
                state: Arc::clone(&state),
            },
        };
        (handle, KdfCompletion { state })
    }

    pub fn canceler(&self) -> KdfCanceler {
        self.canceler.clone()
    }

    pub fn cancel(&self) -> bool {
        self.canceler.cancel()
    }

    /// Wait for the key, a failure, or cancellation.
    pub async fn await_result(self) -> Result<KdfOutput, KdfError> {
        match self.receiver.await {
            Ok(outcome) => outcome,
            // Worker vanished without reporting
            Err(_) => Err(KdfError::Failed {
                code: KDF_FAILED_CODE,
                message: "key derivation worker stopped unexpectedly".to_string(),
            }),
        }
    }
}

/// Worker side of a [`KdfHandle`].
pub struct KdfCompletion {
    state: Arc<CancelState>,
}

impl KdfCompletion {
    /// Whether the job should stop before doing (more) work.
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    /// Register the task to abort on cancellation.
    pub fn set_abort_handle(&self, abort: AbortHandle) {
        if self.is_cancelled() {
            abort.abort();
            return;
        }
        *self.state.abort.lock().unwrap_or_else(PoisonError::into_inner) = Some(abort);
    }

    pub fn complete(self, outcome: Result<KdfOutput, KdfError>) {
        self.state.complete(outcome);
    }
}

impl Drop for KdfCompletion {
    fn drop(&mut self) {
        // Covers workers that panic or give up without reporting
        if let Some(sender) = self.state.take_sender() {
            let _ = sender.send(Err(KdfError::Failed {
                code: KDF_FAILED_CODE,
                message: "key derivation worker stopped unexpectedly".to_string(),
            }));
        }
    }
}

// =============================================================================
// WORKERS
// =============================================================================

/// Runs derivation jobs off the caller's task.
pub trait KdfWorker: Send + Sync {
    fn spawn(&self, request: KdfRequest) -> KdfHandle;
}

/// In-process worker: one Tokio blocking-pool task per job.
///
/// Must be used from within a Tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockingKdfWorker;

impl KdfWorker for BlockingKdfWorker {
    fn spawn(&self, request: KdfRequest) -> KdfHandle {
        let (handle, completion) = KdfHandle::channel();
        let job = Arc::new(completion);
        let task_job = Arc::clone(&job);

        let task = tokio::task::spawn_blocking(move || {
            if task_job.is_cancelled() {
                return;
            }
            debug!(
                memory_kib = request.memory_kib,
                time_cost = request.time_cost,
                parallelism = request.parallelism,
                "Deriving key"
            );
            let outcome = derive_key_blocking(&request);
            task_job.state.complete(outcome);
        });
        job.set_abort_handle(task.abort_handle());

        handle
    }
}

/// Runs each job in a child process that is killed on cancellation.
///
/// The child reads one JSON [`KdfRequest`] on stdin and writes its reply on
/// stdout; [`serve_kdf_request`] implements that side. Must be used from
/// within a Tokio runtime.
#[derive(Debug, Clone)]
pub struct ProcessKdfWorker {
    program: PathBuf,
    args: Vec<OsString>,
    running: Arc<AtomicUsize>,
}

impl ProcessKdfWorker {
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Re-run the current executable with `args`.
    pub fn current_exe<I, S>(args: I) -> std::io::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Ok(Self::new(std::env::current_exe()?, args))
    }

    /// Child processes started and not yet reaped.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }
}

impl KdfWorker for ProcessKdfWorker {
    fn spawn(&self, request: KdfRequest) -> KdfHandle {
        let (handle, completion) = KdfHandle::channel();

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        tokio::spawn(run_child(
            command,
            request,
            completion,
            Arc::clone(&self.running),
        ));

        handle
    }
}

async fn run_child(
    mut command: Command,
    request: KdfRequest,
    completion: KdfCompletion,
    running: Arc<AtomicUsize>,
) {
    if completion.is_cancelled() {
        return;
    }

    let payload = match serde_json::to_vec(&request) {
        Ok(payload) => Zeroizing::new(payload),
        Err(e) => {
            completion.complete(Err(worker_failure(format!("cannot encode request: {}", e))));
            return;
        }
    };
    drop(request);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            completion.complete(Err(worker_failure(format!(
                "cannot start key derivation worker: {}",
                e
            ))));
            return;
        }
    };
    running.fetch_add(1, Ordering::AcqRel);
    debug!(pid = ?child.id(), "Key derivation worker started");

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let state = Arc::clone(&completion.state);

    tokio::select! {
        reply = exchange(stdin, stdout, payload) => {
            let status = child.wait().await;
            running.fetch_sub(1, Ordering::AcqRel);
            completion.complete(read_reply(reply, status));
        }
        _ = state.cancelled() => {
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "Failed to kill key derivation worker");
            }
            match child.wait().await {
                Ok(status) => debug!(%status, "Key derivation worker killed"),
                Err(e) => warn!(error = %e, "Failed to reap key derivation worker"),
            }
            running.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// Send the request and collect everything the child writes.
async fn exchange(
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    payload: Zeroizing<Vec<u8>>,
) -> std::io::Result<Zeroizing<Vec<u8>>> {
    let (Some(mut stdin), Some(mut stdout)) = (stdin, stdout) else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "worker pipes unavailable",
        ));
    };

    stdin.write_all(&payload).await?;
    // EOF tells the child the request is complete
    drop(stdin);

    let mut reply = Zeroizing::new(Vec::new());
    stdout.read_to_end(&mut *reply).await?;
    Ok(reply)
}

fn read_reply(
    reply: std::io::Result<Zeroizing<Vec<u8>>>,
    status: std::io::Result<ExitStatus>,
) -> Outcome {
    let reply = reply.map_err(|e| worker_failure(format!("worker I/O failed: {}", e)))?;
    let status = status.map_err(|e| worker_failure(format!("worker wait failed: {}", e)))?;
    if !status.success() {
        return Err(worker_failure(format!("worker exited with {}", status)));
    }

    let reply: WorkerReply = serde_json::from_slice(&reply)
        .map_err(|e| worker_failure(format!("unreadable worker reply: {}", e)))?;
    reply.into_outcome()
}

fn worker_failure(message: String) -> KdfError {
    KdfError::Failed {
        code: KDF_FAILED_CODE,
        message,
    }
}

/// What a worker process writes back.
#[derive(Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum WorkerReply {
    Key {
        #[serde(
            serialize_with = "wire::bytes::serialize",
            deserialize_with = "zeroizing_bytes"
        )]
        key: Zeroizing<Vec<u8>>,
    },
    InvalidParameters {
        message: String,
    },
    Failed {
        code: i32,
        message: String,
    },
}

impl WorkerReply {
    fn into_outcome(self) -> Outcome {
        match self {
            Self::Key { key } => Ok(key),
            Self::InvalidParameters { message } => Err(KdfError::InvalidParameters(message)),
            Self::Failed { code, message } => Err(KdfError::Failed { code, message }),
        }
    }
}

impl From<Outcome> for WorkerReply {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Ok(key) => Self::Key { key },
            Err(KdfError::InvalidParameters(message)) => Self::InvalidParameters { message },
            Err(other) => Self::Failed {
                code: other.code(),
                message: other.to_string(),
            },
        }
    }
}

/// Child side of [`ProcessKdfWorker`]: read one request from `input`, hash
/// it, and write the reply to `output`.
///
/// Malformed requests are answered with a failure reply rather than an
/// error; `Err` means the reply itself could not be written.
pub fn serve_kdf_request<R: Read, W: Write>(mut input: R, mut output: W) -> std::io::Result<()> {
    let mut raw = Zeroizing::new(Vec::new());
    input.read_to_end(&mut *raw)?;

    let reply = match serde_json::from_slice::<KdfRequest>(&raw) {
        Ok(request) => {
            debug!(
                memory_kib = request.memory_kib,
                time_cost = request.time_cost,
                parallelism = request.parallelism,
                "Deriving key for parent process"
            );
            WorkerReply::from(derive_key_blocking(&request))
        }
        Err(e) => WorkerReply::Failed {
            code: KDF_FAILED_CODE,
            message: format!("unreadable request: {}", e),
        },
    };

    serde_json::to_writer(&mut output, &reply)?;
    output.flush()
}

// =============================================================================
// DEFAULT WORKER
// =============================================================================

static DEFAULT_WORKER: OnceCell<Arc<dyn KdfWorker>> = OnceCell::new();

/// Make `worker` the process-wide default. Only the first call takes effect;
/// returns whether this one did.
pub fn install_default_worker(worker: Arc<dyn KdfWorker>) -> bool {
    DEFAULT_WORKER.set(worker).is_ok()
}

/// The installed default worker, or [`BlockingKdfWorker`] when none is.
pub fn default_worker() -> Arc<dyn KdfWorker> {
    match DEFAULT_WORKER.get() {
        Some(worker) => Arc::clone(worker),
        None => Arc::new(BlockingKdfWorker),
    }
}

/// Start a derivation on the default worker.
pub fn derive(request: KdfRequest) -> KdfHandle {
    default_worker().spawn(request)
}
