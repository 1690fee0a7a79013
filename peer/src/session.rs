//! The session: one peer's canonical copy of the shared game state.
//!
//! All mutation funnels through this type, driven by a single event loop.
//! Local actions mutate the state and broadcast it; inbound snapshots
//! replace it (with a field-level merge for nicknames only). There is no
//! sequence numbering: the most recently processed snapshot wins, races
//! and all.

use crate::judge::Judge;
use crate::mesh::MeshEvent;
use crate::round::{Phase, RoundTimer};
use log::{debug, info};
use protocol::{GameState, Message, PeerId, VerificationRecord};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Everything the session event loop reacts to.
#[derive(Debug)]
pub enum Event {
    Mesh(MeshEvent),
    /// One second of round countdown elapsed.
    Tick,
    /// The between-rounds pause expired; start the next round.
    NextRoundDue,
    /// The post-final-round pause expired; show final standings.
    GameOverDue,
    Command(Command),
}

/// Local player intents, e.g. from the command line.
#[derive(Debug, Clone)]
pub enum Command {
    Start,
    Guess(String),
    Vote(bool),
    Skip,
    PlayAgain,
}

/// Messages queued for the mesh. Fire-and-forget.
#[derive(Debug, Clone)]
pub enum Outbound {
    Broadcast(Message),
    Send { to: PeerId, message: Message },
}

/// The painting collaborator. Rendering is out of scope; the session only
/// routes drawing traffic through this seam.
pub trait PaintSurface {
    fn stroke(&mut self, tool: &str, color: &str, from: (f32, f32), to: (f32, f32));
    fn fill(&mut self, x: f32, y: f32, color: &str);
    fn clear(&mut self);
}

/// Default surface: logs strokes and discards them.
pub struct LogSurface;

impl PaintSurface for LogSurface {
    fn stroke(&mut self, tool: &str, color: &str, from: (f32, f32), to: (f32, f32)) {
        debug!(
            "stroke {} {} ({:.0},{:.0})->({:.0},{:.0})",
            tool, color, from.0, from.1, to.0, to.1
        );
    }

    fn fill(&mut self, x: f32, y: f32, color: &str) {
        debug!("fill {} at ({:.0},{:.0})", color, x, y);
    }

    fn clear(&mut self) {
        debug!("surface cleared");
    }
}

/// A participant as presented to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: PeerId,
    pub nickname: String,
    pub score: u32,
}

pub struct Session {
    local_id: PeerId,
    nickname: String,
    pub state: GameState,
    phase: Phase,
    /// Connection peer ids in acceptance order; becomes the turn order.
    connected: Vec<PeerId>,
    /// Per-guess verifier results for the live round, keyed by guess id.
    pub(crate) verification_results: HashMap<String, HashMap<PeerId, VerificationRecord>>,
    /// Agree/disagree votes on this round's verification results.
    pub(crate) vote_results: HashMap<PeerId, bool>,
    pub(crate) timer: RoundTimer,
    /// Pending delayed transition (next round or game over), if any.
    pub(crate) pending: Option<JoinHandle<()>>,
    pub(crate) judge: Judge,
    pub(crate) surface: Box<dyn PaintSurface + Send>,
    out_tx: mpsc::UnboundedSender<Outbound>,
    pub(crate) event_tx: mpsc::UnboundedSender<Event>,
}

impl Session {
    pub fn new(
        local_id: PeerId,
        nickname: String,
        round_time: u32,
        max_rounds: u32,
        judge: Judge,
        out_tx: mpsc::UnboundedSender<Outbound>,
        event_tx: mpsc::UnboundedSender<Event>,
    ) -> Self {
        Self {
            local_id,
            nickname,
            state: GameState::new(round_time, max_rounds),
            phase: Phase::Lobby,
            connected: Vec::new(),
            verification_results: HashMap::new(),
            vote_results: HashMap::new(),
            timer: RoundTimer::new(),
            pending: None,
            judge,
            surface: Box::new(LogSurface),
            out_tx,
            event_tx,
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!("phase {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    pub fn connected_peers(&self) -> &[PeerId] {
        &self.connected
    }

    /// Registers this peer in the shared state and broadcasts the first
    /// snapshot, announcing the nickname to whoever is already connected.
    pub fn announce(&mut self) {
        self.state.scores.entry(self.local_id.clone()).or_insert(0);
        self.state
            .nicknames
            .insert(self.local_id.clone(), self.nickname.clone());
        self.broadcast_state();
    }

    pub async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Mesh(MeshEvent::PeerConnected { id }) => self.on_peer_connected(id),
            Event::Mesh(MeshEvent::PeerDisconnected { id }) => self.on_peer_disconnected(&id),
            Event::Mesh(MeshEvent::Data { from, payload }) => {
                self.on_message(&from, &payload).await
            }
            Event::Tick => self.on_tick(),
            Event::NextRoundDue => self.on_next_round_due(),
            Event::GameOverDue => self.end_game(),
            Event::Command(command) => self.on_command(command).await,
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Start => self.start_game(),
            Command::Guess(text) => self.submit_guess(&text).await,
            Command::Vote(agree) => self.submit_verification_vote(agree),
            Command::Skip => self.request_skip(),
            Command::PlayAgain => self.play_again(),
        }
    }

    fn on_peer_connected(&mut self, id: PeerId) {
        info!("Peer {} joined the session", id);
        self.connected.push(id);
        // Re-announce so the newcomer learns our nickname and score.
        self.broadcast_state();
    }

    fn on_peer_disconnected(&mut self, id: &PeerId) {
        if let Some(pos) = self.connected.iter().position(|peer| peer == id) {
            self.connected.remove(pos);
        }
        // No reassignment if the drawer drops mid-round; the countdown
        // runs out on schedule. Roster entries in `players` stay, stale.
        if self.state.round_in_progress && self.state.current_drawer.as_ref() == Some(id) {
            info!("Drawer {} disconnected; round continues until the timer expires", id);
        } else {
            info!("Peer {} left the session", id);
        }
    }

    /// Serializes the current state into a snapshot message and writes it
    /// to every open connection. The local copy is already current, so
    /// there is no local side effect.
    pub fn broadcast_state(&self) {
        self.broadcast(Message::GameState {
            state: self.state.clone(),
        });
    }

    pub(crate) fn broadcast(&self, message: Message) {
        let _ = self.out_tx.send(Outbound::Broadcast(message));
    }

    pub(crate) fn send_to(&self, to: &PeerId, message: Message) {
        let _ = self.out_tx.send(Outbound::Send {
            to: to.clone(),
            message,
        });
    }

    /// Replaces the local replica with an incoming snapshot.
    ///
    /// Every field is taken wholesale except `nicknames`, which is merged:
    /// an incoming non-empty nickname wins, but entries the sender never
    /// learned are preserved. After applying, the local countdown restarts
    /// or stops to follow the incoming `round_in_progress`.
    pub fn apply_snapshot(&mut self, incoming: GameState) {
        for (id, nickname) in &incoming.nicknames {
            if !nickname.is_empty() {
                self.state.nicknames.insert(id.clone(), nickname.clone());
            }
        }
        let nicknames = std::mem::take(&mut self.state.nicknames);
        self.state = GameState {
            nicknames,
            ..incoming
        };

        if self.state.round_in_progress {
            self.set_phase(Phase::RoundActive);
            self.timer.start(self.event_tx.clone());
        } else {
            self.timer.cancel();
            if self.state.players.is_empty() {
                self.set_phase(Phase::Lobby);
            } else if self.state.current_round >= self.state.max_rounds {
                // A snapshot can finish the game for us; go through
                // end_game so this peer reports the final standings too.
                self.end_game();
            } else {
                self.set_phase(Phase::RoundEnded);
            }
        }
    }

    pub(crate) fn nickname_of(&self, id: &PeerId) -> String {
        match self.state.nicknames.get(id) {
            Some(nickname) if !nickname.is_empty() => nickname.clone(),
            _ => format!("Player {}", id),
        }
    }

    /// Scores sorted descending, for end-of-game display.
    pub fn standings(&self) -> Vec<Player> {
        let mut players: Vec<Player> = self
            .state
            .scores
            .iter()
            .map(|(id, score)| Player {
                id: id.clone(),
                nickname: self.nickname_of(id),
                score: *score,
            })
            .collect();
        players.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        players
    }
}

/// Milliseconds since the Unix epoch; used for guess ids and vote stamps.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
