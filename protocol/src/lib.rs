//! Wire protocol and replicated game state shared by every peer.
//!
//! Everything here is pure data: the tagged message envelope, the full-state
//! snapshot that peers broadcast to reconcile replicas, and the scoring
//! primitives used to judge guesses. No I/O happens in this crate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub mod scoring;

pub const DEFAULT_ROUND_TIME_SECS: u32 = 60;
pub const DEFAULT_MAX_ROUNDS: u32 = 5;
/// Pause between a round ending and the next one starting, so players can
/// look at the verification summary.
pub const NEXT_ROUND_DELAY_SECS: u64 = 8;
pub const GAME_OVER_DELAY_SECS: u64 = 5;

/// Placeholder shown to non-drawer peers in place of a winning guess, so the
/// secret word is not leaked to players still guessing.
pub const REDACTED_GUESS: &str = "Correct word!";

/// The fixed word list drawers pick from.
pub const WORDS: &[&str] = &[
    "cat", "dog", "house", "tree", "car", "bicycle", "computer", "phone",
    "book", "chair", "table", "window", "door", "flower", "bird", "fish",
    "sun", "moon", "star", "cloud", "rain", "snow", "mountain", "river",
    "beach", "ocean", "forest", "desert", "city", "bridge", "train", "plane",
];

/// Picks a word uniformly at random from [`WORDS`].
pub fn random_word() -> String {
    use rand::Rng;
    let idx = rand::thread_rng().gen_range(0..WORDS.len());
    WORDS[idx].to_string()
}

/// Short stable peer identifier: a truncated fingerprint of the peer's
/// public key. Derivation lives with the identity layer; the protocol only
/// treats it as an opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        PeerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A submitted guess and the scoring attached to it so far.
///
/// `text` is immutable once submitted; the verification fields are upgraded
/// in place as verifier results arrive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Guess {
    pub text: String,
    pub points: u32,
    pub similarity: f64,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub verifications: u32,
}

impl Guess {
    pub fn new(text: impl Into<String>, points: u32, similarity: f64) -> Self {
        Self {
            text: text.into(),
            points,
            similarity,
            verified: false,
            verifications: 0,
        }
    }

    /// A 3-point guess is an exact/winning match and terminal: no later
    /// verification result may change it.
    pub fn is_winning(&self) -> bool {
        self.points == 3
    }
}

/// One verifier's independent judgment of someone else's guess.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRecord {
    pub verifier_id: PeerId,
    pub similarity: f64,
    pub points: u32,
    pub timestamp: u64,
}

/// The full replicated game state, broadcast wholesale on every
/// locally-caused change. Maps key by peer id; serde encodes them as plain
/// JSON objects, which is the documented wire encoding.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub players: Vec<PeerId>,
    pub current_drawer: Option<PeerId>,
    pub current_word: Option<String>,
    pub current_round: u32,
    pub max_rounds: u32,
    pub round_in_progress: bool,
    pub time_left: u32,
    pub round_time: u32,
    pub scores: HashMap<PeerId, u32>,
    pub guesses: HashMap<PeerId, Guess>,
    pub nicknames: HashMap<PeerId, String>,
}

impl GameState {
    pub fn new(round_time: u32, max_rounds: u32) -> Self {
        Self {
            round_time,
            time_left: round_time,
            max_rounds,
            ..Default::default()
        }
    }
}

/// Every message a peer may broadcast. The JSON encoding carries a `type`
/// tag so that peers running newer revisions can add kinds without breaking
/// older ones (unknown tags are skipped at the dispatcher).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Message {
    /// Full-state snapshot; receivers replace their replica with it.
    GameState { state: GameState },
    /// A scored guess plus the guesser's running score, for display on
    /// every peer. Older revisions used the `aiGuess` tag.
    #[serde(alias = "aiGuess")]
    Guess {
        player_id: PeerId,
        guess: Guess,
        current_score: u32,
    },
    /// Asks every peer to independently re-score the guess against their
    /// own copy of the secret word.
    VerifyGuess {
        guess_id: String,
        guess: String,
        guessing_player_id: PeerId,
        timestamp: u64,
    },
    /// One verifier's independent score for a guess.
    VerificationResult {
        guess_id: String,
        guessing_player_id: PeerId,
        verifier_id: PeerId,
        similarity: f64,
        points: u32,
    },
    /// Agree/disagree poll on a round's verification results.
    VerificationVote {
        player_id: PeerId,
        agree: bool,
        timestamp: u64,
    },
    /// Lightweight countdown correction, cheaper than a full snapshot.
    TimerUpdate { time_left: u32 },
    /// The current drawer gives up on the round.
    Skip { player_id: PeerId },
    /// Rendering traffic, routed to the painting collaborator.
    Draw {
        tool: String,
        color: String,
        from_x: f32,
        from_y: f32,
        to_x: f32,
        to_y: f32,
    },
    Fill { x: f32, y: f32, color: String },
    Clear,
}

/// Why an inbound payload could not be turned into a [`Message`].
#[derive(Debug)]
pub enum DecodeError {
    /// Not JSON, or JSON without a string `type` field.
    Malformed(serde_json::Error),
    /// Well-formed envelope with a tag this revision does not know.
    /// Forward-compatibility policy: silently ignored by the dispatcher.
    UnknownType(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Malformed(e) => write!(f, "malformed message: {}", e),
            DecodeError::UnknownType(t) => write!(f, "unknown message type {:?}", t),
        }
    }
}

impl std::error::Error for DecodeError {}

impl Message {
    pub fn encode(&self) -> Vec<u8> {
        // The envelope is plain data; serialization cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Decodes an inbound payload, distinguishing garbage from messages of
    /// a newer protocol revision.
    pub fn decode(raw: &[u8]) -> Result<Message, DecodeError> {
        let value: serde_json::Value =
            serde_json::from_slice(raw).map_err(DecodeError::Malformed)?;
        let tag = value
            .get("type")
            .and_then(|t| t.as_str())
            .map(str::to_owned);
        match serde_json::from_value::<Message>(value) {
            Ok(msg) => Ok(msg),
            Err(e) => match tag {
                Some(tag) if !KNOWN_TAGS.contains(&tag.as_str()) => {
                    Err(DecodeError::UnknownType(tag))
                }
                _ => Err(DecodeError::Malformed(e)),
            },
        }
    }
}

const KNOWN_TAGS: &[&str] = &[
    "gameState",
    "guess",
    "aiGuess",
    "verifyGuess",
    "verificationResult",
    "verificationVote",
    "timerUpdate",
    "skip",
    "draw",
    "fill",
    "clear",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_roundtrip() {
        let mut state = GameState::new(60, 5);
        let a = PeerId::new("aaaaaa");
        let b = PeerId::new("bbbbbb");
        state.players = vec![a.clone(), b.clone()];
        state.current_drawer = Some(a.clone());
        state.current_word = Some("cat".to_string());
        state.round_in_progress = true;
        state.scores.insert(a.clone(), 3);
        state.guesses.insert(b.clone(), Guess::new("dog", 0, 0.25));
        state.nicknames.insert(a.clone(), "alice".to_string());

        let encoded = Message::GameState {
            state: state.clone(),
        }
        .encode();
        match Message::decode(&encoded).unwrap() {
            Message::GameState { state: decoded } => assert_eq!(decoded, state),
            _ => panic!("Wrong message type after roundtrip"),
        }
    }

    #[test]
    fn test_wire_tags_are_camel_case() {
        let encoded = Message::TimerUpdate { time_left: 30 }.encode();
        let value: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(value["type"], "timerUpdate");
        assert_eq!(value["timeLeft"], 30);

        let encoded = Message::VerifyGuess {
            guess_id: "aaaaaa-123".to_string(),
            guess: "cat".to_string(),
            guessing_player_id: PeerId::new("aaaaaa"),
            timestamp: 123,
        }
        .encode();
        let value: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(value["type"], "verifyGuess");
        assert_eq!(value["guessingPlayerId"], "aaaaaa");
    }

    #[test]
    fn test_legacy_ai_guess_tag_accepted() {
        let raw = br#"{"type":"aiGuess","playerId":"aaaaaa","guess":{"text":"cat","points":3,"similarity":1.0},"currentScore":3}"#;
        match Message::decode(raw).unwrap() {
            Message::Guess {
                player_id, guess, ..
            } => {
                assert_eq!(player_id, PeerId::new("aaaaaa"));
                assert!(guess.is_winning());
                assert_eq!(guess.verifications, 0);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_decode_unknown_type() {
        let raw = br#"{"type":"holographicBrush","intensity":9}"#;
        match Message::decode(raw) {
            Err(DecodeError::UnknownType(tag)) => assert_eq!(tag, "holographicBrush"),
            other => panic!("Expected UnknownType, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            Message::decode(b"not json at all"),
            Err(DecodeError::Malformed(_))
        ));
        // Known tag but missing fields is malformed, not unknown.
        assert!(matches!(
            Message::decode(br#"{"type":"verifyGuess"}"#),
            Err(DecodeError::Malformed(_))
        ));
        // No type field at all.
        assert!(matches!(
            Message::decode(br#"{"guess":"cat"}"#),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_clear_has_no_payload() {
        let encoded = Message::Clear.encode();
        assert_eq!(encoded, br#"{"type":"clear"}"#.to_vec());
        assert!(matches!(Message::decode(&encoded), Ok(Message::Clear)));
    }

    #[test]
    fn test_random_word_is_from_list() {
        for _ in 0..32 {
            let word = random_word();
            assert!(WORDS.contains(&word.as_str()));
        }
    }
}
