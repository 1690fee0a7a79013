//! Round lifecycle: drawer rotation, word selection, countdown, game end.
//!
//! `Lobby -> RoundActive -> RoundEnded -> (RoundActive | GameOver)`. The
//! countdown is a cancellable task owned by the state machine; every
//! transition that stops or restarts it goes through cancel-then-restart,
//! so at most one timer runs at a time.

use crate::identity;
use crate::session::{Event, Session};
use log::{debug, info, warn};
use protocol::{Message, PeerId, GAME_OVER_DELAY_SECS, NEXT_ROUND_DELAY_SECS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Lobby,
    RoundActive,
    RoundEnded,
    GameOver,
}

/// The repeating 1-second round countdown, as a cancellable task.
#[derive(Debug, Default)]
pub struct RoundTimer {
    handle: Option<JoinHandle<()>>,
}

impl RoundTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts ticking, cancelling any previous timer first so two never
    /// run concurrently.
    pub fn start(&mut self, event_tx: mpsc::UnboundedSender<Event>) {
        self.cancel();
        self.handle = Some(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if event_tx.send(Event::Tick).is_err() {
                    break;
                }
            }
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for RoundTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Delivers `event` to the loop after `delay_secs`.
pub(crate) fn schedule(
    event_tx: mpsc::UnboundedSender<Event>,
    delay_secs: u64,
    event: Event,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        sleep(Duration::from_secs(delay_secs)).await;
        let _ = event_tx.send(event);
    })
}

impl Session {
    /// Lobby -> RoundActive, triggered locally by whoever starts the game.
    /// Requires at least one other connected peer; the roster built here is
    /// the fixed turn order for the whole game.
    pub fn start_game(&mut self) {
        if self.phase() != Phase::Lobby {
            info!("Game already started");
            return;
        }
        if self.connected_peers().is_empty() {
            info!("Please wait for other players to join before starting");
            return;
        }

        let roster = identity::roster_from_connections(self.connected_peers(), self.local_id());
        for id in &roster {
            self.state.scores.entry(id.clone()).or_insert(0);
        }
        self.state.players = roster;
        self.state.current_round = 0;
        info!("Starting game with {} players", self.state.players.len());
        self.start_new_round();
    }

    /// Resets per-round state, rotates the drawer, draws a fresh word and
    /// broadcasts the new round to everyone.
    pub fn start_new_round(&mut self) {
        if self.state.players.is_empty() {
            warn!("Cannot start a round without players");
            return;
        }
        self.cancel_pending();
        self.state.guesses.clear();
        self.verification_results.clear();
        self.vote_results.clear();
        self.state.time_left = self.state.round_time;

        let idx = self.state.current_round as usize % self.state.players.len();
        let drawer = self.state.players[idx].clone();
        self.state.current_drawer = Some(drawer.clone());
        self.state.current_word = Some(protocol::random_word());
        self.state.round_in_progress = true;
        self.set_phase(Phase::RoundActive);
        self.surface.clear();
        self.timer.start(self.event_tx.clone());

        info!(
            "Round {}/{} started; {} is drawing",
            self.state.current_round + 1,
            self.state.max_rounds,
            self.nickname_of(&drawer)
        );
        if self.is_local_drawer() {
            if let Some(word) = &self.state.current_word {
                info!("Draw this: {}", word);
            }
        }
        self.broadcast_state();
    }

    pub fn is_local_drawer(&self) -> bool {
        self.state.current_drawer.as_ref() == Some(self.local_id())
    }

    /// One second of countdown elapsed.
    pub(crate) fn on_tick(&mut self) {
        if !self.state.round_in_progress {
            self.timer.cancel();
            return;
        }
        self.state.time_left = self.state.time_left.saturating_sub(1);
        debug!("{}s left", self.state.time_left);
        if self.state.time_left == 0 {
            self.end_round();
        }
    }

    /// RoundActive -> RoundEnded. Stops the countdown, clears the surface
    /// everywhere, logs the verification consensus and schedules what
    /// comes next. The round counter only ever moves forward here.
    pub fn end_round(&mut self) {
        if self.phase() != Phase::RoundActive {
            return;
        }
        info!(
            "Round {} ended; the word was {:?}",
            self.state.current_round + 1,
            self.state.current_word.as_deref().unwrap_or("?")
        );
        self.state.round_in_progress = false;
        self.timer.cancel();
        self.surface.clear();
        self.broadcast(Message::Clear);
        self.log_round_consensus();

        self.state.current_round += 1;
        self.set_phase(Phase::RoundEnded);
        self.broadcast_state();

        if self.state.current_round >= self.state.max_rounds {
            self.cancel_pending();
            self.pending = Some(schedule(
                self.event_tx.clone(),
                GAME_OVER_DELAY_SECS,
                Event::GameOverDue,
            ));
        } else {
            self.cancel_pending();
            self.pending = Some(schedule(
                self.event_tx.clone(),
                NEXT_ROUND_DELAY_SECS,
                Event::NextRoundDue,
            ));
        }
    }

    /// The between-rounds pause expired. A snapshot may have advanced the
    /// game in the meantime; only start if we are still waiting.
    pub(crate) fn on_next_round_due(&mut self) {
        if self.phase() != Phase::RoundEnded {
            return;
        }
        self.start_new_round();
    }

    /// -> GameOver, exactly once. Scores freeze; only "play again" leaves
    /// this state.
    pub(crate) fn end_game(&mut self) {
        if self.phase() == Phase::GameOver {
            return;
        }
        self.set_phase(Phase::GameOver);
        self.state.round_in_progress = false;
        self.timer.cancel();
        self.cancel_pending();

        info!("Game over! Final standings:");
        for (rank, player) in self.standings().iter().enumerate() {
            info!("  {}. {}: {}", rank + 1, player.nickname, player.score);
        }
    }

    /// Resets counters and per-round maps, then starts a fresh game with
    /// the same roster, skipping the lobby.
    pub fn play_again(&mut self) {
        if self.phase() != Phase::GameOver {
            info!("No finished game to restart");
            return;
        }
        self.state.current_round = 0;
        for score in self.state.scores.values_mut() {
            *score = 0;
        }
        self.state.guesses.clear();
        self.verification_results.clear();
        self.vote_results.clear();
        info!("Starting a new game with the same players");
        self.start_new_round();
    }

    /// Local drawer gives up on the round.
    pub fn request_skip(&mut self) {
        if !self.state.round_in_progress || !self.is_local_drawer() {
            info!("Only the current drawer can skip an active round");
            return;
        }
        self.broadcast(Message::Skip {
            player_id: self.local_id().clone(),
        });
        self.end_round();
    }

    /// A peer skipped; honored only if it really is the current drawer.
    pub(crate) fn on_skip(&mut self, player_id: &PeerId) {
        if self.state.round_in_progress && self.state.current_drawer.as_ref() == Some(player_id) {
            info!("{} skipped the round", self.nickname_of(player_id));
            self.end_round();
        }
    }

    /// Lightweight countdown correction from another peer.
    pub(crate) fn on_timer_update(&mut self, time_left: u32) {
        debug!("timer update: {}s left", time_left);
        self.state.time_left = time_left;
    }

    pub(crate) fn cancel_pending(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}
