//! Peer node for the mesh drawing-and-guessing game.
//!
//! Each process is a full peer: it holds the complete session state,
//! replicates it by broadcasting snapshots to every neighbour, scores its
//! own guesses and verifies everyone else's. There is no server and no
//! elected leader; convergence comes from snapshot exchange and from every
//! peer applying the same deterministic rules.

pub mod dispatch;
pub mod identity;
pub mod judge;
pub mod mesh;
pub mod round;
pub mod session;
pub mod verify;
