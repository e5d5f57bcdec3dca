//! Session lifecycle and resource management
//!
//! A `ClientSession` is one logical remote-access session: its drawable
//! surface pools, its stream tables, its attached users, and its broadcast
//! sink. A session is owned exclusively by one worker; everything here is
//! nevertheless safe for the worker's per-user tasks to call concurrently.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use postern_core::time::current_time_millis;
use postern_core::SessionError;
use postern_protocol::{Instruction, ProtocolStatus, SessionId};

use crate::broadcast::BroadcastWriter;
use crate::handlers;
use crate::layer::Layer;
use crate::pool::IndexPool;
use crate::stream::StreamTable;
use crate::user::{Roster, UserSession};

const STATE_RUNNING: u8 = 0;
const STATE_STOPPING: u8 = 1;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session is serving its users
    Running,
    /// Session is winding down; further instructions are ignored
    Stopping,
}

/// Callback invoked when a user joins or leaves a session
pub type UserHook =
    Arc<dyn Fn(&ClientSession, &UserSession) -> Result<(), SessionError> + Send + Sync>;

/// One-shot callback invoked during session teardown
pub type FreeHook = Box<dyn FnOnce(&ClientSession) -> Result<(), SessionError> + Send + Sync>;

/// Keyboard input callback: keysym and press state
pub type KeyHook = Arc<dyn Fn(&ClientSession, i32, bool) -> Result<(), SessionError> + Send + Sync>;

/// Pointer input callback: x, y, and button mask
pub type MouseHook =
    Arc<dyn Fn(&ClientSession, i32, i32, i32) -> Result<(), SessionError> + Send + Sync>;

/// Clipboard content callback
pub type ClipboardHook =
    Arc<dyn Fn(&ClientSession, &str) -> Result<(), SessionError> + Send + Sync>;

/// Display resize callback: width and height
pub type SizeHook = Arc<dyn Fn(&ClientSession, i32, i32) -> Result<(), SessionError> + Send + Sync>;

/// Backend-installable callbacks of one session
#[derive(Default)]
struct Hooks {
    join: Mutex<Option<UserHook>>,
    leave: Mutex<Option<UserHook>>,
    free: Mutex<Option<FreeHook>>,
    key: Mutex<Option<KeyHook>>,
    mouse: Mutex<Option<MouseHook>>,
    clipboard: Mutex<Option<ClipboardHook>>,
    size: Mutex<Option<SizeHook>>,
}

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One remote-access session
pub struct ClientSession {
    id: SessionId,
    protocol: String,
    state: AtomicU8,
    created_at: u64,
    last_activity: AtomicU64,
    layer_pool: IndexPool,
    buffer_pool: IndexPool,
    streams: StreamTable,
    roster: Arc<Roster>,
    broadcast: BroadcastWriter,
    cancel: CancellationToken,
    hooks: Hooks,
}

impl ClientSession {
    /// Create a new running session for the named backend protocol
    ///
    /// Mints the session's public identifier, initializes empty resource
    /// pools with every stream slot closed, and installs an empty user list.
    pub fn new(protocol: &str) -> Arc<Self> {
        let roster = Arc::new(Roster::new());
        let now = current_time_millis();

        Arc::new(Self {
            id: SessionId::generate(),
            protocol: protocol.to_string(),
            state: AtomicU8::new(STATE_RUNNING),
            created_at: now,
            last_activity: AtomicU64::new(now),
            layer_pool: IndexPool::new(),
            buffer_pool: IndexPool::new(),
            streams: StreamTable::new(),
            broadcast: BroadcastWriter::new(Arc::clone(&roster)),
            roster,
            cancel: CancellationToken::new(),
            hooks: Hooks::default(),
        })
    }

    /// Public identifier of this session
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Backend protocol this session was created for
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        match self.state.load(Ordering::SeqCst) {
            STATE_RUNNING => SessionState::Running,
            _ => SessionState::Stopping,
        }
    }

    /// Creation time, milliseconds since the Unix epoch
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Last activity time, milliseconds since the Unix epoch
    pub fn last_activity(&self) -> u64 {
        self.last_activity.load(Ordering::SeqCst)
    }

    /// Record activity now
    pub fn touch(&self) {
        self.last_activity
            .store(current_time_millis(), Ordering::SeqCst);
    }

    /// Token cancelled when this session stops; the owning worker selects
    /// on it
    pub fn stop_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Transition to STOPPING; idempotent
    pub fn stop(&self) {
        self.state.store(STATE_STOPPING, Ordering::SeqCst);
        self.cancel.cancel();
    }

    /// Abort the session: log the reason, send one terminal diagnostic to
    /// every attached user, and stop
    ///
    /// Only the call that wins the RUNNING→STOPPING transition sends the
    /// diagnostic; on an already stopping session this is a no-op, so two
    /// racing aborts never produce two diagnostics.
    pub async fn abort(&self, status: ProtocolStatus, message: &str) {
        if self
            .state
            .compare_exchange(
                STATE_RUNNING,
                STATE_STOPPING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }

        tracing::error!("Session \"{}\" aborted: {}", self.id, message);

        // Users get a fixed notice; the detail stays in the logs
        match self
            .broadcast
            .write_instruction(Instruction::error("Aborted. See logs.", status))
        {
            Ok(()) => {
                self.broadcast.flush().await;
            }
            Err(e) => {
                tracing::warn!("Failed to encode abort diagnostic: {}", e);
            }
        }

        self.cancel.cancel();
    }

    /// Dispatch one instruction through the static opcode table
    ///
    /// Unknown opcodes succeed without effect, keeping newer clients
    /// compatible with older gateways. Once the session is stopping, all
    /// instructions are ignored.
    pub fn dispatch(&self, instruction: &Instruction) -> Result<(), SessionError> {
        if self.state() == SessionState::Stopping {
            return Ok(());
        }

        self.touch();
        match handlers::lookup(&instruction.opcode) {
            Some(handler) => handler(self, instruction),
            None => Ok(()),
        }
    }

    /// Broadcast write sink over all attached users
    pub fn broadcast(&self) -> &BroadcastWriter {
        &self.broadcast
    }

    // --- drawable surfaces ---

    /// Allocate an on-screen layer; indices are always >= 1
    pub fn alloc_layer(&self) -> Layer {
        Layer::from_layer_pool(self.layer_pool.allocate())
    }

    /// Release a layer's index for reuse
    pub fn free_layer(&self, layer: Layer) {
        self.layer_pool.release(layer.layer_pool_index());
    }

    /// Allocate an off-screen buffer; indices are always <= -1
    pub fn alloc_buffer(&self) -> Layer {
        Layer::from_buffer_pool(self.buffer_pool.allocate())
    }

    /// Release a buffer's index for reuse
    pub fn free_buffer(&self, buffer: Layer) {
        self.buffer_pool.release(buffer.buffer_pool_index());
    }

    // --- streams ---

    /// Open a new output stream, failing once the session's stream bound
    /// is reached
    pub fn alloc_stream(&self) -> Result<i32, SessionError> {
        self.streams.alloc()
    }

    /// Close an output stream; its slot keeps the closed sentinel so stale
    /// holders can detect closure
    pub fn free_stream(&self, index: i32) {
        self.streams.free(index);
    }

    /// Stream tables, for callback and data plumbing
    pub fn streams(&self) -> &StreamTable {
        &self.streams
    }

    // --- membership ---

    /// Attach a user
    ///
    /// The join callback (if any) runs before the user becomes visible to
    /// iteration; the link itself happens under the membership lock.
    pub fn add_user(
        &self,
        outbound: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> Arc<UserSession> {
        let user = Arc::new(UserSession::new(self.roster.mint_id(), outbound, cancel));

        let join = locked(&self.hooks.join).clone();
        if let Some(join) = join {
            if let Err(e) = join(self, &user) {
                tracing::warn!("Join handler failed for {}: {}", user.id(), e);
            }
        }

        self.roster.insert_head(Arc::clone(&user));
        user
    }

    /// Detach a user, running its departure path exactly once
    ///
    /// The user's own departure callback wins over the session-wide one.
    /// Returns false if another task already detached this user.
    pub fn remove_user(&self, user: &Arc<UserSession>) -> bool {
        if !user.claim_detached() {
            return false;
        }

        let leave = user
            .take_leave_handler()
            .or_else(|| locked(&self.hooks.leave).clone());
        if let Some(leave) = leave {
            if let Err(e) = leave(self, user) {
                tracing::warn!("Leave handler failed for {}: {}", user.id(), e);
            }
        }

        self.roster.remove(user.id());
        user.retire();
        true
    }

    /// Number of currently attached users
    pub fn user_count(&self) -> usize {
        self.roster.len()
    }

    /// Tear the session down: drain the user list head-first (tolerating
    /// concurrent mutation), then run the teardown callback best-effort
    pub fn destroy(&self) {
        while let Some(user) = self.roster.head() {
            if !self.remove_user(&user) {
                // Another task claimed this user mid-detach; let it splice
                std::thread::yield_now();
            }
        }

        if let Some(free) = locked(&self.hooks.free).take() {
            if let Err(e) = free(self) {
                tracing::warn!("Session \"{}\" teardown handler failed: {}", self.id, e);
            }
        }
    }

    // --- hooks ---

    /// Install the user-join callback
    pub fn set_join_handler(&self, hook: UserHook) {
        *locked(&self.hooks.join) = Some(hook);
    }

    /// Install the session-wide user-departure callback
    pub fn set_leave_handler(&self, hook: UserHook) {
        *locked(&self.hooks.leave) = Some(hook);
    }

    /// Install the teardown callback
    pub fn set_free_handler(&self, hook: FreeHook) {
        *locked(&self.hooks.free) = Some(hook);
    }

    /// Install the keyboard input callback
    pub fn set_key_handler(&self, hook: KeyHook) {
        *locked(&self.hooks.key) = Some(hook);
    }

    /// Install the pointer input callback
    pub fn set_mouse_handler(&self, hook: MouseHook) {
        *locked(&self.hooks.mouse) = Some(hook);
    }

    /// Install the clipboard callback
    pub fn set_clipboard_handler(&self, hook: ClipboardHook) {
        *locked(&self.hooks.clipboard) = Some(hook);
    }

    /// Install the display resize callback
    pub fn set_size_handler(&self, hook: SizeHook) {
        *locked(&self.hooks.size) = Some(hook);
    }

    pub(crate) fn fire_key(&self, keysym: i32, pressed: bool) -> Result<(), SessionError> {
        let hook = locked(&self.hooks.key).clone();
        match hook {
            Some(hook) => hook(self, keysym, pressed),
            None => Ok(()),
        }
    }

    pub(crate) fn fire_mouse(&self, x: i32, y: i32, mask: i32) -> Result<(), SessionError> {
        let hook = locked(&self.hooks.mouse).clone();
        match hook {
            Some(hook) => hook(self, x, y, mask),
            None => Ok(()),
        }
    }

    pub(crate) fn fire_clipboard(&self, data: &str) -> Result<(), SessionError> {
        let hook = locked(&self.hooks.clipboard).clone();
        match hook {
            Some(hook) => hook(self, data),
            None => Ok(()),
        }
    }

    pub(crate) fn fire_size(&self, width: i32, height: i32) -> Result<(), SessionError> {
        let hook = locked(&self.hooks.size).clone();
        match hook {
            Some(hook) => hook(self, width, height),
            None => Ok(()),
        }
    }
}
