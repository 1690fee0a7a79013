//! Inbound wire traffic routing.
//!
//! One malformed or unknown frame must never take the session down, so
//! every decode failure is logged and dropped while the connection stays
//! up. Unknown message types are expected from newer peers and only
//! logged at debug level.

use crate::session::Session;
use log::{debug, error};
use protocol::{DecodeError, Message, PeerId};

impl Session {
    /// Decodes and applies one frame received from `from`.
    pub async fn on_message(&mut self, from: &PeerId, raw: &[u8]) {
        let message = match Message::decode(raw) {
            Ok(message) => message,
            Err(DecodeError::UnknownType(tag)) => {
                debug!("ignoring message of unknown type {:?} from {}", tag, from);
                return;
            }
            Err(DecodeError::Malformed(err)) => {
                error!("dropping malformed message from {}: {}", from, err);
                return;
            }
        };

        match message {
            Message::GameState { state } => self.apply_snapshot(state),
            Message::Guess {
                player_id,
                guess,
                current_score,
            } => self.on_guess_message(player_id, guess, current_score),
            Message::VerifyGuess {
                guess_id,
                guess,
                guessing_player_id,
                ..
            } => {
                self.on_verify_guess(&guess_id, &guessing_player_id, &guess)
                    .await
            }
            Message::VerificationResult {
                guess_id,
                guessing_player_id,
                verifier_id,
                similarity,
                points,
            } => self.on_verification_result(
                &guess_id,
                &guessing_player_id,
                verifier_id,
                similarity,
                points,
            ),
            Message::VerificationVote {
                player_id, agree, ..
            } => self.on_verification_vote(player_id, agree),
            Message::TimerUpdate { time_left } => self.on_timer_update(time_left),
            Message::Skip { player_id } => self.on_skip(&player_id),
            Message::Draw {
                tool,
                color,
                from_x,
                from_y,
                to_x,
                to_y,
            } => self
                .surface
                .stroke(&tool, &color, (from_x, from_y), (to_x, to_y)),
            Message::Fill { x, y, color } => self.surface.fill(x, y, &color),
            Message::Clear => self.surface.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::test_session;
    use protocol::{GameState, Guess};

    #[tokio::test]
    async fn test_snapshot_message_applies_state() {
        let (mut session, _out_rx) = test_session("bbbbbb");
        let mut state = GameState::new(60, 5);
        state.players = vec![PeerId::new("aaaaaa"), PeerId::new("bbbbbb")];
        state.current_round = 2;
        let raw = Message::GameState { state }.encode();

        session.on_message(&PeerId::new("aaaaaa"), &raw).await;

        assert_eq!(session.state.current_round, 2);
        assert_eq!(session.state.players.len(), 2);
    }

    #[tokio::test]
    async fn test_guess_message_updates_scoreboard() {
        let (mut session, _out_rx) = test_session("bbbbbb");
        let raw = Message::Guess {
            player_id: PeerId::new("aaaaaa"),
            guess: Guess::new("tack", 1, 0.75),
            current_score: 4,
        }
        .encode();

        session.on_message(&PeerId::new("aaaaaa"), &raw).await;

        assert_eq!(session.state.scores.get(&PeerId::new("aaaaaa")), Some(&4));
        assert!(session.state.guesses.contains_key(&PeerId::new("aaaaaa")));
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_frames_are_dropped() {
        let (mut session, _out_rx) = test_session("bbbbbb");
        let before = session.state.clone();

        session.on_message(&PeerId::new("aaaaaa"), b"not json").await;
        session
            .on_message(&PeerId::new("aaaaaa"), br#"{"type":"hologram"}"#)
            .await;

        assert_eq!(session.state.players, before.players);
        assert_eq!(session.state.current_round, before.current_round);
    }

    #[tokio::test]
    async fn test_timer_update_overwrites_local_countdown() {
        let (mut session, _out_rx) = test_session("bbbbbb");
        session.state.round_in_progress = true;
        session.state.time_left = 60;
        let raw = Message::TimerUpdate { time_left: 30 }.encode();

        session.on_message(&PeerId::new("aaaaaa"), &raw).await;

        assert_eq!(session.state.time_left, 30);
    }
}
