//! Sources: the publishers, subscribers and generic power emitters
//! scattered on the board, plus the per-connection link records.
//!
//! Connection bookkeeping invariants (checked by `sanity_check_power`):
//! * `used_power` equals the sum of `flow` over `connected_to`, to
//!   epsilon.
//! * `0 ≤ used_power ≤ current_power`.
//! * Links are symmetric: the entry stored on `X` for `Y` matches the
//!   entry stored on `Y` for `X` in both flow and relay path. The two
//!   sides are mutated together by the PSM, never one at a time.

use crate::error::{SimError, SimResult};
use core_grid::{float_eq, Pos};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceType {
    #[default]
    Generic,
    Publisher,
    Subscriber,
}

/// One half of a publisher↔subscriber connection, stored symmetrically
/// on both endpoints. `mirror_nodes_used` is empty for a direct link.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkInfo {
    pub flow: f32,
    pub mirror_nodes_used: Vec<Pos>,
}

impl LinkInfo {
    pub fn direct(flow: f32) -> Self {
        Self {
            flow,
            mirror_nodes_used: Vec::new(),
        }
    }

    pub fn relayed(flow: f32, mirrors: Vec<Pos>) -> Self {
        Self {
            flow,
            mirror_nodes_used: mirrors,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceInfo {
    current_power: f32,
    power_target: f32,
    pub source_type: SourceType,
    pub service_type: String,
    used_power: f32,
    pub connected_to: BTreeMap<Pos, LinkInfo>,
}

impl SourceInfo {
    pub fn new(power: f32, source_type: SourceType, service_type: impl Into<String>) -> Self {
        Self {
            current_power: power,
            power_target: power,
            source_type,
            service_type: service_type.into(),
            used_power: 0.0,
            connected_to: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn power(&self) -> f32 {
        self.current_power
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.power_target
    }

    pub fn set_power_target(&mut self, value: f32) {
        self.power_target = value;
    }

    pub fn set_current_power(&mut self, value: f32) {
        self.current_power = value;
    }

    /// Set both the current power and the target it drifts toward.
    pub fn override_power(&mut self, value: f32) {
        self.current_power = value;
        self.power_target = value;
    }

    #[inline]
    pub fn used_power(&self) -> f32 {
        self.used_power
    }

    #[inline]
    pub fn remaining_power(&self) -> f32 {
        self.current_power - self.used_power
    }

    /// Commit flow on this side of a connection. The caller pairs this
    /// with the symmetric update on the other endpoint so the two sides
    /// never disagree.
    pub fn add_used_power(&mut self, amount: f32) {
        self.used_power += amount;
    }

    pub fn subtract_used_power(&mut self, amount: f32) {
        self.used_power -= amount;
        if self.used_power.abs() < core_grid::EPSILON {
            self.used_power = 0.0;
        }
    }

    /// Checks `used_power = Σ flow` and `0 ≤ used ≤ current`.
    pub fn sanity_check_power(&self, pos: Pos) -> SimResult<()> {
        let sum: f32 = self.connected_to.values().map(|l| l.flow).sum();
        if !float_eq(sum, self.used_power) {
            return Err(SimError::StateCorruption {
                component: "source",
                invariant: "used-power-accounting",
                detail: format!("{pos}: used_power {} != link sum {}", self.used_power, sum),
            });
        }
        if self.used_power < -core_grid::EPSILON
            || self.used_power > self.current_power + core_grid::EPSILON
        {
            return Err(SimError::StateCorruption {
                component: "source",
                invariant: "used-power-accounting",
                detail: format!(
                    "{pos}: used_power {} outside [0, {}]",
                    self.used_power, self.current_power
                ),
            });
        }
        Ok(())
    }
}

impl fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total cap {} used cap {} remain cap {}",
            self.current_power,
            self.used_power,
            self.remaining_power()
        )?;
        for (pos, link) in &self.connected_to {
            write!(f, " | to {pos} flow {}", link.flow)?;
            if link.mirror_nodes_used.is_empty() {
                write!(f, " direct")?;
            } else {
                write!(f, " via")?;
                for m in &link.mirror_nodes_used {
                    write!(f, " {m}")?;
                }
            }
        }
        Ok(())
    }
}

/// A cell the elastic layer rents. Identity is the position alone: a
/// board never rents the same cell twice, whatever the symbol.
#[derive(Debug, Clone, Copy)]
pub struct RentedResource {
    pub pos: Pos,
    pub symbol: char,
}

impl PartialEq for RentedResource {
    fn eq(&self, other: &Self) -> bool {
        self.pos == other.pos
    }
}

impl Eq for RentedResource {}

impl PartialOrd for RentedResource {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RentedResource {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.pos.cmp(&other.pos)
    }
}
