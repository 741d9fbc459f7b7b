//! Decision gates for gatebench.
//!
//! This crate provides the [`DecisionGate`] trait, the sealed-collaborator
//! seam of the harness, and its two implementations:
//!
//! | Gate | Decides by | Used for |
//! |------|------------|----------|
//! | [`StubGate`] | Fixed rule table over the request text | Reproducible methodology runs |
//! | [`RemoteGate`] | HTTP call to an external decision endpoint | Measuring a real gate |

pub mod remote;
pub mod stub;
pub mod traits;

pub use remote::{RemoteGate, RemoteSettings};
pub use stub::{StubGate, StubRules};
pub use traits::*;

/// List all available gate adapter names.
pub fn available_gates() -> Vec<&'static str> {
    vec![GateKind::Stub.as_str(), GateKind::Remote.as_str()]
}

/// Parse an adapter name as used in configuration and on the command line.
pub fn gate_kind_by_name(name: &str) -> Option<GateKind> {
    match name {
        "stub" | "local_stub" => Some(GateKind::Stub),
        "remote" | "sealed" => Some(GateKind::Remote),
        _ => None,
    }
}
