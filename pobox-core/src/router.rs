use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use pobox_api::{
    GameState, GameStatus, InvoiceRecord, PlayerId, PoNumber, ServerFrame,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::poller::DeliveryHook;

/// Process-local id for one WebSocket connection.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Outbound frames a single slow session may have in flight before we
/// start dropping frames for it (never for its neighbors).
const OUTBOUND_BUFFER: usize = 64;

struct SessionEntry {
    /// The player this session registered as, if it has.
    player: Option<PlayerId>,
    tx: mpsc::Sender<ServerFrame>,
}

/// Everything C5 owns, under a single lock so the forward map, the session
/// table, and the game status can never be observed out of step.
struct RouterState {
    /// `PID -> live session`. At most one session per player.
    players: HashMap<PlayerId, SessionId>,
    sessions: HashMap<SessionId, SessionEntry>,
    game: GameStatus,
}

/// The player-to-session map and everything that writes to sessions.
///
/// All socket writes go through per-session bounded channels: the lock is
/// only ever held to look up or snapshot senders, never across an await.
pub struct SessionRouter {
    state: Mutex<RouterState>,
    next_session: AtomicU64,
}

impl SessionRouter {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RouterState {
                players: HashMap::new(),
                sessions: HashMap::new(),
                game: GameStatus::initial(),
            }),
            next_session: AtomicU64::new(1),
        }
    }

    /// Admit a new connection. The caller drains the returned receiver
    /// into its socket; dropping the session (via [`disconnect`]) closes
    /// the channel and thereby ends the drain.
    ///
    /// [`disconnect`]: SessionRouter::disconnect
    pub fn connect(&self) -> (SessionId, mpsc::Receiver<ServerFrame>) {
        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let entry = SessionEntry { player: None, tx };
        self.state.lock().unwrap().sessions.insert(id, entry);
        debug!("{id} connected");
        (id, rx)
    }

    /// Bind `player` to `session`, replacing any prior binding. The
    /// replaced session is unregistered but left open; it closes on its
    /// own schedule and is cleaned up then.
    pub fn register(&self, session: SessionId, player: PlayerId) {
        let mut state = self.state.lock().unwrap();
        if let Some(old) = state.players.insert(player.clone(), session) {
            if old != session {
                if let Some(entry) = state.sessions.get_mut(&old) {
                    entry.player = None;
                    debug!("{old} lost '{player}' to {session}");
                }
            }
        }
        if let Some(entry) = state.sessions.get_mut(&session) {
            entry.player = Some(player);
        }
    }

    /// Tear down a closed connection. The forward map entry is removed
    /// only if it still points at this session.
    pub fn disconnect(&self, session: SessionId) {
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state.sessions.remove(&session) else {
            return;
        };
        if let Some(player) = entry.player {
            if state.players.get(&player) == Some(&session) {
                state.players.remove(&player);
            }
        }
        debug!("{session} disconnected");
    }

    /// The player a session registered as, if any. This is the reverse
    /// map consulted by `request_invoice`.
    pub fn player_of(&self, session: SessionId) -> Option<PlayerId> {
        self.state
            .lock()
            .unwrap()
            .sessions
            .get(&session)
            .and_then(|entry| entry.player.clone())
    }

    /// Enqueue a frame for one session. `false` if the session is gone.
    /// A session with a full buffer keeps its connection but loses this
    /// frame; one stuck reader must not back up the rest of the game.
    pub fn send(&self, session: SessionId, frame: ServerFrame) -> bool {
        let tx = {
            let state = self.state.lock().unwrap();
            match state.sessions.get(&session) {
                Some(entry) => entry.tx.clone(),
                None => return false,
            }
        };
        match tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("{session} outbound buffer full; dropping frame");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Enqueue a frame for whichever session currently owns `player`.
    pub fn send_to_player(
        &self,
        player: &PlayerId,
        frame: ServerFrame,
    ) -> bool {
        let session = {
            let state = self.state.lock().unwrap();
            match state.players.get(player) {
                Some(session) => *session,
                None => return false,
            }
        };
        self.send(session, frame)
    }

    /// Fan a frame out to every open session. Individual failures are
    /// ignored; dead sessions clean themselves up on their close event.
    pub fn broadcast(&self, frame: ServerFrame) {
        let senders: Vec<(SessionId, mpsc::Sender<ServerFrame>)> = {
            let state = self.state.lock().unwrap();
            state
                .sessions
                .iter()
                .map(|(id, entry)| (*id, entry.tx.clone()))
                .collect()
        };
        // Lock released; sends can't block the router.
        for (id, tx) in senders {
            if let Err(mpsc::error::TrySendError::Full(_)) =
                tx.try_send(frame.clone())
            {
                warn!("{id} outbound buffer full; dropping broadcast");
            }
        }
    }

    pub fn game_status(&self) -> GameStatus {
        self.state.lock().unwrap().game.clone()
    }

    /// Update the game status and return the new snapshot for fan-out.
    /// Shares the session lock so status updates and broadcasts observe a
    /// consistent order.
    pub fn update_game(
        &self,
        status: GameState,
        updated_by: &str,
    ) -> GameStatus {
        let mut state = self.state.lock().unwrap();
        state.game.update(status, updated_by);
        state.game.clone()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }
}

impl DeliveryHook for SessionRouter {
    fn invoice_ready(
        &self,
        player: &PlayerId,
        po: &PoNumber,
        record: &InvoiceRecord,
    ) -> bool {
        let frame = ServerFrame::InvoiceReady {
            invoice_number: po.clone(),
            filename: record.filename.clone(),
            file_size: record.file_size,
            processed_at: record.processed_at,
            message: format!(
                "Invoice {po} is ready; request it with request_invoice",
            ),
        };
        self.send_to_player(player, frame)
    }
}
