//! Error surface of the board engine.
//!
//! `LanguageViolation` and `PositionOccupied` are expected signals on
//! internal trials (candidate pastes, elastic probes): the board rolls
//! the trial back and the error never crosses the Board API. Every other
//! kind propagates. `StateCorruption` means a structural invariant broke
//! and the simulation must halt; it carries enough context to point at
//! the failing component and invariant.

use core_grid::Pos;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid position {0}")]
    InvalidPosition(Pos),

    #[error("{axis} {index} violates the {axis} language")]
    LanguageViolation { axis: &'static str, index: i32 },

    #[error("position {0} is already occupied")]
    PositionOccupied(Pos),

    #[error("capacity exceeded at {pos}: {detail}")]
    CapacityExceeded { pos: Pos, detail: String },

    #[error("a source is already registered at {0}")]
    DuplicateSource(Pos),

    #[error("state corruption in {component} (invariant {invariant}): {detail}")]
    StateCorruption {
        component: &'static str,
        invariant: &'static str,
        detail: String,
    },
}

pub type SimResult<T> = Result<T, SimError>;
