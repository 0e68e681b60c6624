//! The board engine: cell arena, tree topology, subtree surgery, flow
//! simulation, reorganization and the elastic optimizer.
//!
//! Layering inside the crate:
//! * `cell` / `subtree` / `source` — plain data with local invariants.
//! * `topology` — the left/down vs directional regime switch.
//! * `board` — the arena, link discovery, language checks, cut/paste.
//! * `flow` — the per-tick simulation and statistics window.
//! * `reorg` / `elastic` — the optimizers; both score candidates by
//!   cloning the board and simulating, and both only ever commit strict
//!   improvements to the authoritative board.
//!
//! Everything mutating funnels through `Board` methods; cells never
//! reach into shared state on their own.

pub mod board;
pub mod cell;
pub mod elastic;
pub mod error;
pub mod flow;
pub mod reorg;
pub mod source;
pub mod subtree;
pub mod test_support;
pub mod topology;

pub use board::{Board, MoveOption};
pub use cell::{BufferedFlow, Cell, CellType};
pub use error::{SimError, SimResult};
pub use flow::{FlowStats, SimulationContext, FLOW_STATS_WINDOW};
pub use source::{LinkInfo, RentedResource, SourceInfo, SourceType};
pub use subtree::{OffsetAndSymbol, SubtreeInfo};
pub use topology::TreeTopology;
