//! Guess scoring, distributed verification and the post-round vote.
//!
//! There is no central judge. The submitting peer scores its own guess and
//! that self-score is authoritative for the scoreboard; every other peer
//! then re-scores the guess against its own copy of the secret word and
//! broadcasts the result. The guesser folds those independent results into
//! a displayed consensus (mean similarity and points, verifier count) but
//! never into the score itself, so a guess is awarded exactly once.
//! After the round, peers cast a non-binding agree/disagree vote on the
//! verification results.

use crate::session::{now_millis, Session};
use log::{debug, info, warn};
use protocol::{Guess, Message, PeerId, VerificationRecord, REDACTED_GUESS};

/// Majority outcome of the post-round agreement vote. Informational only;
/// it never alters scores or round flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Agreed,
    Disagreed,
    NoConsensus,
}

impl Session {
    /// Scores and broadcasts a locally submitted guess. Only valid during
    /// an active round, and the drawer may not guess.
    pub async fn submit_guess(&mut self, text: &str) {
        let text = text.trim().to_lowercase();
        if text.is_empty() {
            return;
        }
        if !self.state.round_in_progress {
            info!("No round in progress; guess not submitted");
            return;
        }
        if self.is_local_drawer() {
            info!("You are drawing this round; you cannot guess");
            return;
        }
        let Some(word) = self.state.current_word.clone() else {
            warn!("Active round without a word; guess not submitted");
            return;
        };

        let verdict = self.judge.evaluate(&word, &text).await;
        let guess = Guess::new(text, verdict.points, verdict.similarity);
        let local = self.local_id().clone();

        // Submission-time self-score is the single source of truth for the
        // scoreboard; verification below only annotates the guess.
        let score = self.state.scores.entry(local.clone()).or_insert(0);
        *score += verdict.points;
        let current_score = *score;
        self.state.guesses.insert(local.clone(), guess.clone());
        info!(
            "{} points awarded ({:.0}% similar)",
            verdict.points,
            verdict.similarity * 100.0
        );

        if guess.is_winning() {
            // Cut the suspense: halve the remaining time for everyone.
            self.state.time_left /= 2;
            self.broadcast(Message::TimerUpdate {
                time_left: self.state.time_left,
            });

            // The winning text goes verbatim only to the drawer; everyone
            // still guessing sees a placeholder instead of the word.
            let drawer = self.state.current_drawer.clone();
            if let Some(drawer) = &drawer {
                self.send_to(
                    drawer,
                    Message::Guess {
                        player_id: local.clone(),
                        guess: guess.clone(),
                        current_score,
                    },
                );
            }
            let mut redacted = guess;
            redacted.text = REDACTED_GUESS.to_string();
            for peer in self.connected_peers().to_vec() {
                if drawer.as_ref() != Some(&peer) {
                    self.send_to(
                        &peer,
                        Message::Guess {
                            player_id: local.clone(),
                            guess: redacted.clone(),
                            current_score,
                        },
                    );
                }
            }
            // A 3-point guess is terminal; no verification round for it.
            return;
        }

        self.broadcast(Message::Guess {
            player_id: local,
            guess: guess.clone(),
            current_score,
        });
        self.broadcast_guess_for_verification(&guess.text).await;
    }

    /// Asks every peer, ourselves included, to independently re-score the
    /// guess against their own copy of the secret word.
    pub(crate) async fn broadcast_guess_for_verification(&mut self, text: &str) {
        let local = self.local_id().clone();
        let timestamp = now_millis();
        let guess_id = format!("{}-{}", local, timestamp);
        self.broadcast(Message::VerifyGuess {
            guess_id: guess_id.clone(),
            guess: text.to_string(),
            guessing_player_id: local.clone(),
            timestamp,
        });
        self.run_verification(&guess_id, &local, text).await;
    }

    /// A peer asked us to verify a guess.
    pub(crate) async fn on_verify_guess(
        &mut self,
        guess_id: &str,
        guessing_player_id: &PeerId,
        text: &str,
    ) {
        if !self.state.round_in_progress {
            debug!("verification request {} outside an active round; dropped", guess_id);
            return;
        }
        self.run_verification(guess_id, guessing_player_id, text).await;
    }

    /// Scores the guess against our own word, broadcasts the result and
    /// records it locally (verifiers stay consistent with what they told
    /// everyone else).
    async fn run_verification(
        &mut self,
        guess_id: &str,
        guessing_player_id: &PeerId,
        text: &str,
    ) {
        let Some(word) = self.state.current_word.clone() else {
            debug!("no word to verify {} against; dropped", guess_id);
            return;
        };
        let verdict = self.judge.evaluate(&word, text).await;
        let verifier_id = self.local_id().clone();
        self.broadcast(Message::VerificationResult {
            guess_id: guess_id.to_string(),
            guessing_player_id: guessing_player_id.clone(),
            verifier_id: verifier_id.clone(),
            similarity: verdict.similarity,
            points: verdict.points,
        });
        self.record_verification(
            guess_id,
            guessing_player_id,
            VerificationRecord {
                verifier_id,
                similarity: verdict.similarity,
                points: verdict.points,
                timestamp: now_millis(),
            },
        );
    }

    /// A verifier's independent score arrived.
    pub(crate) fn on_verification_result(
        &mut self,
        guess_id: &str,
        guessing_player_id: &PeerId,
        verifier_id: PeerId,
        similarity: f64,
        points: u32,
    ) {
        self.record_verification(
            guess_id,
            guessing_player_id,
            VerificationRecord {
                verifier_id,
                similarity,
                points,
                timestamp: now_millis(),
            },
        );
    }

    /// Stores one (guess, verifier) record. Results for guesses outside
    /// the live round have no guess entry and are discarded; `end_round`
    /// is the authoritative cutoff. A winning guess is never touched.
    pub(crate) fn record_verification(
        &mut self,
        guess_id: &str,
        guessing_player_id: &PeerId,
        record: VerificationRecord,
    ) {
        match self.state.guesses.get(guessing_player_id) {
            None => {
                debug!("verification result for unknown guess {}; dropped", guess_id);
                return;
            }
            Some(guess) if guess.is_winning() => {
                debug!("guess {} already won; verification result dropped", guess_id);
                return;
            }
            Some(_) => {}
        }

        self.verification_results
            .entry(guess_id.to_string())
            .or_default()
            .insert(record.verifier_id.clone(), record);

        if guessing_player_id == self.local_id() {
            self.refresh_consensus(guess_id);
        }
    }

    /// Recomputes our own guess's displayed consensus as the arithmetic
    /// mean over every verifier result received so far.
    fn refresh_consensus(&mut self, guess_id: &str) {
        let local = self.local_id().clone();
        let Some((count, mean_similarity, mean_points)) =
            self.verification_results.get(guess_id).and_then(|results| {
                if results.is_empty() {
                    return None;
                }
                let count = results.len() as u32;
                let mean_similarity =
                    results.values().map(|r| r.similarity).sum::<f64>() / count as f64;
                let mean_points = (results.values().map(|r| r.points).sum::<u32>() as f64
                    / count as f64)
                    .round() as u32;
                Some((count, mean_similarity, mean_points))
            })
        else {
            return;
        };

        if let Some(guess) = self.state.guesses.get_mut(&local) {
            guess.similarity = mean_similarity;
            // 3 points marks a terminal winning guess; a consensus mean
            // must never promote a near miss into that tier, or later
            // verifier results would be locked out.
            guess.points = mean_points.min(2);
            guess.verified = true;
            guess.verifications = count;
            info!(
                "Guess verified by {} peer(s); consensus similarity {:.4}",
                count, mean_similarity
            );
        }
    }

    /// Another player's scored guess, for display and scoreboard.
    pub(crate) fn on_guess_message(&mut self, player_id: PeerId, guess: Guess, current_score: u32) {
        info!(
            "{} guessed {:?}: {} points",
            self.nickname_of(&player_id),
            guess.text,
            guess.points
        );
        self.state.guesses.insert(player_id.clone(), guess);
        self.state.scores.insert(player_id, current_score);
    }

    /// Casts the local agree/disagree vote on this round's verification
    /// results and broadcasts it.
    pub fn submit_verification_vote(&mut self, agree: bool) {
        let local = self.local_id().clone();
        self.vote_results.insert(local.clone(), agree);
        self.broadcast(Message::VerificationVote {
            player_id: local,
            agree,
            timestamp: now_millis(),
        });
        self.report_tally();
    }

    /// Records a peer's vote, overwriting any earlier vote from the same
    /// player.
    pub(crate) fn on_verification_vote(&mut self, player_id: PeerId, agree: bool) {
        info!(
            "{} voted {}",
            self.nickname_of(&player_id),
            if agree { "agree" } else { "disagree" }
        );
        self.vote_results.insert(player_id, agree);
        self.report_tally();
    }

    /// Majority outcome once every player has voted; `None` while votes
    /// are still outstanding.
    pub fn tally(&self) -> Option<VoteOutcome> {
        if self.state.players.is_empty() || self.vote_results.len() < self.state.players.len() {
            return None;
        }
        let agree = self.vote_results.values().filter(|agree| **agree).count();
        let disagree = self.vote_results.len() - agree;
        Some(if agree > disagree {
            VoteOutcome::Agreed
        } else if disagree > agree {
            VoteOutcome::Disagreed
        } else {
            VoteOutcome::NoConsensus
        })
    }

    fn report_tally(&self) {
        // Non-binding: purely informational feedback to participants.
        match self.tally() {
            Some(VoteOutcome::Agreed) => info!("Majority agrees with the verification results"),
            Some(VoteOutcome::Disagreed) => {
                info!("Majority disagrees with the verification results")
            }
            Some(VoteOutcome::NoConsensus) => {
                info!("Vote tied: no consensus on the verification results")
            }
            None => {}
        }
    }

    /// Per-guess consensus summary, logged when the round ends.
    pub(crate) fn log_round_consensus(&self) {
        if self.verification_results.is_empty() {
            return;
        }
        info!(
            "Verification summary for round {}:",
            self.state.current_round + 1
        );
        for (guess_id, results) in &self.verification_results {
            let guesser = PeerId::new(guess_id.split('-').next().unwrap_or_default());
            let Some(guess) = self.state.guesses.get(&guesser) else {
                continue;
            };
            if results.is_empty() {
                continue;
            }
            let mean = results.values().map(|r| r.similarity).sum::<f64>() / results.len() as f64;
            info!(
                "  {} guessed {:?}: consensus similarity {:.4} across {} verifier(s)",
                self.nickname_of(&guesser),
                guess.text,
                mean,
                results.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::test_session;
    use crate::session::Outbound;
    use assert_approx_eq::assert_approx_eq;
    use tokio::sync::mpsc;

    fn active_round(session: &mut Session, drawer: &str, word: &str) {
        session.state.players = vec![PeerId::new(drawer), session.local_id().clone()];
        session.state.current_drawer = Some(PeerId::new(drawer));
        session.state.current_word = Some(word.to_string());
        session.state.round_in_progress = true;
        session.state.time_left = 60;
    }

    fn drain(out_rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut messages = Vec::new();
        while let Ok(message) = out_rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn test_winning_guess_scores_three_and_skips_verification() {
        let (mut session, mut out_rx) = test_session("bbbbbb");
        active_round(&mut session, "aaaaaa", "cat");

        session.submit_guess("cat").await;

        let local = PeerId::new("bbbbbb");
        assert_eq!(session.state.scores.get(&local), Some(&3));
        let guess = session.state.guesses.get(&local).unwrap();
        assert!(guess.is_winning());
        assert_approx_eq!(guess.similarity, 1.0);
        // Clock halved and corrected via the lightweight message.
        assert_eq!(session.state.time_left, 30);

        let outbound = drain(&mut out_rx);
        assert!(outbound.iter().any(|message| matches!(
            message,
            Outbound::Broadcast(Message::TimerUpdate { time_left: 30 })
        )));
        // Verbatim text goes only to the drawer.
        assert!(outbound.iter().any(|message| matches!(
            message,
            Outbound::Send { to, message: Message::Guess { guess, .. } }
                if to == &PeerId::new("aaaaaa") && guess.text == "cat"
        )));
        // Terminal guesses are never sent out for verification.
        assert!(!outbound
            .iter()
            .any(|message| matches!(message, Outbound::Broadcast(Message::VerifyGuess { .. }))));
    }

    #[tokio::test]
    async fn test_partial_guess_awarded_once_and_verified() {
        let (mut session, mut out_rx) = test_session("bbbbbb");
        active_round(&mut session, "aaaaaa", "cat");

        // "tack" vs "cat": Jaccard 3/4 = 0.75 -> 1 point.
        session.submit_guess("tack").await;

        let local = PeerId::new("bbbbbb");
        assert_eq!(session.state.scores.get(&local), Some(&1));

        let guess = session.state.guesses.get(&local).unwrap();
        // Our own verification already landed: verified, one verifier,
        // consensus equals our own verdict, and the score stayed at 1.
        assert!(guess.verified);
        assert_eq!(guess.verifications, 1);
        assert_approx_eq!(guess.similarity, 0.75);
        assert_eq!(session.state.scores.get(&local), Some(&1));

        let outbound = drain(&mut out_rx);
        assert!(outbound
            .iter()
            .any(|message| matches!(message, Outbound::Broadcast(Message::VerifyGuess { .. }))));
        assert!(outbound.iter().any(|message| matches!(
            message,
            Outbound::Broadcast(Message::VerificationResult { .. })
        )));
    }

    #[tokio::test]
    async fn test_guess_rejected_outside_round() {
        let (mut session, mut out_rx) = test_session("bbbbbb");
        session.submit_guess("cat").await;

        assert!(session.state.guesses.is_empty());
        assert!(drain(&mut out_rx).is_empty());
    }

    #[tokio::test]
    async fn test_drawer_cannot_guess() {
        let (mut session, mut out_rx) = test_session("bbbbbb");
        active_round(&mut session, "bbbbbb", "cat");

        session.submit_guess("cat").await;

        assert!(session.state.guesses.is_empty());
        assert!(drain(&mut out_rx).is_empty());
    }

    #[tokio::test]
    async fn test_third_party_verifies_against_own_word() {
        let (mut session, mut out_rx) = test_session("cccccc");
        active_round(&mut session, "aaaaaa", "cat");
        session
            .state
            .guesses
            .insert(PeerId::new("bbbbbb"), Guess::new("tack", 1, 0.75));

        session
            .on_verify_guess("bbbbbb-123", &PeerId::new("bbbbbb"), "tack")
            .await;

        let outbound = drain(&mut out_rx);
        let result = outbound.iter().find_map(|message| match message {
            Outbound::Broadcast(Message::VerificationResult {
                verifier_id,
                similarity,
                points,
                ..
            }) => Some((verifier_id.clone(), *similarity, *points)),
            _ => None,
        });
        let (verifier, similarity, points) = result.expect("no verification result broadcast");
        assert_eq!(verifier, PeerId::new("cccccc"));
        assert_approx_eq!(similarity, 0.75);
        assert_eq!(points, 1);
        // Recorded locally too (self-consistency).
        assert_eq!(
            session.verification_results.get("bbbbbb-123").map(|r| r.len()),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_consensus_is_mean_over_verifiers() {
        let (mut session, _out_rx) = test_session("bbbbbb");
        active_round(&mut session, "aaaaaa", "cat");
        let local = PeerId::new("bbbbbb");
        session
            .state
            .guesses
            .insert(local.clone(), Guess::new("tack", 1, 0.75));

        session.on_verification_result("bbbbbb-1", &local, PeerId::new("aaaaaa"), 0.7, 1);
        session.on_verification_result("bbbbbb-1", &local, PeerId::new("cccccc"), 0.9, 2);

        let guess = session.state.guesses.get(&local).unwrap();
        assert!(guess.verified);
        assert_eq!(guess.verifications, 2);
        assert_approx_eq!(guess.similarity, 0.8);
        // Mean of 1 and 2 rounds to 2 for display.
        assert_eq!(guess.points, 2);
    }

    #[tokio::test]
    async fn test_duplicate_verifier_overwrites_not_duplicates() {
        let (mut session, _out_rx) = test_session("bbbbbb");
        active_round(&mut session, "aaaaaa", "cat");
        let local = PeerId::new("bbbbbb");
        session
            .state
            .guesses
            .insert(local.clone(), Guess::new("tack", 1, 0.75));

        session.on_verification_result("bbbbbb-1", &local, PeerId::new("aaaaaa"), 0.7, 1);
        session.on_verification_result("bbbbbb-1", &local, PeerId::new("aaaaaa"), 0.9, 2);

        let guess = session.state.guesses.get(&local).unwrap();
        assert_eq!(guess.verifications, 1);
        assert_approx_eq!(guess.similarity, 0.9);
    }

    #[tokio::test]
    async fn test_consensus_mean_never_promotes_to_winning() {
        let (mut session, _out_rx) = test_session("bbbbbb");
        active_round(&mut session, "aaaaaa", "cat");
        let local = PeerId::new("bbbbbb");
        session
            .state
            .guesses
            .insert(local.clone(), Guess::new("catt", 2, 0.9));

        // Mean of 3 and 2 rounds to 3, which would read as a winning
        // guess and lock out the third verifier below.
        session.on_verification_result("bbbbbb-1", &local, PeerId::new("aaaaaa"), 0.97, 3);
        session.on_verification_result("bbbbbb-1", &local, PeerId::new("cccccc"), 0.9, 2);

        let guess = session.state.guesses.get(&local).unwrap();
        assert_eq!(guess.points, 2);
        assert!(!guess.is_winning());

        // Later results are still accepted.
        session.on_verification_result("bbbbbb-1", &local, PeerId::new("dddddd"), 0.88, 2);
        let guess = session.state.guesses.get(&local).unwrap();
        assert_eq!(guess.verifications, 3);
    }

    #[tokio::test]
    async fn test_winning_guess_never_downgraded() {
        let (mut session, _out_rx) = test_session("bbbbbb");
        active_round(&mut session, "aaaaaa", "cat");
        let local = PeerId::new("bbbbbb");
        session.state.scores.insert(local.clone(), 3);
        let mut winning = Guess::new("cat", 3, 1.0);
        winning.verified = true;
        session.state.guesses.insert(local.clone(), winning);

        session.on_verification_result("bbbbbb-1", &local, PeerId::new("aaaaaa"), 0.1, 0);

        let guess = session.state.guesses.get(&local).unwrap();
        assert_eq!(guess.points, 3);
        assert_approx_eq!(guess.similarity, 1.0);
        assert_eq!(session.state.scores.get(&local), Some(&3));
    }

    #[tokio::test]
    async fn test_result_for_finished_round_discarded() {
        let (mut session, _out_rx) = test_session("bbbbbb");
        active_round(&mut session, "aaaaaa", "cat");
        // No guess entry: the round that produced this id is over.
        session.on_verification_result(
            "dddddd-1",
            &PeerId::new("dddddd"),
            PeerId::new("aaaaaa"),
            0.9,
            2,
        );
        assert!(session.verification_results.is_empty());
    }

    #[tokio::test]
    async fn test_tally_majority_and_tie() {
        let (mut session, _out_rx) = test_session("aaaaaa");
        session.state.players = vec![
            PeerId::new("aaaaaa"),
            PeerId::new("bbbbbb"),
            PeerId::new("cccccc"),
        ];

        session.on_verification_vote(PeerId::new("aaaaaa"), true);
        assert_eq!(session.tally(), None);
        session.on_verification_vote(PeerId::new("bbbbbb"), true);
        session.on_verification_vote(PeerId::new("cccccc"), false);
        assert_eq!(session.tally(), Some(VoteOutcome::Agreed));

        // Two players, one vote each way: no consensus.
        session.vote_results.clear();
        session.state.players = vec![PeerId::new("aaaaaa"), PeerId::new("bbbbbb")];
        session.on_verification_vote(PeerId::new("aaaaaa"), true);
        session.on_verification_vote(PeerId::new("bbbbbb"), false);
        assert_eq!(session.tally(), Some(VoteOutcome::NoConsensus));
    }

    #[tokio::test]
    async fn test_revote_overwrites() {
        let (mut session, _out_rx) = test_session("aaaaaa");
        session.state.players = vec![PeerId::new("aaaaaa")];

        session.on_verification_vote(PeerId::new("aaaaaa"), false);
        session.on_verification_vote(PeerId::new("aaaaaa"), true);

        assert_eq!(session.vote_results.len(), 1);
        assert_eq!(session.tally(), Some(VoteOutcome::Agreed));
    }
}
