//! The simulator: board + PSM + history, exposing the programmatic
//! surface the external driver builds on.
//!
//! All source mutations funnel through the PSM so connection state and
//! the collections stay consistent; all board mutations funnel through
//! the board operations so links and language stay valid. The
//! step-by-step driver snapshots the board (and PSM) into a bounded
//! history ring before every mutating command, so `undo` can restore
//! the previous state wholesale.

use crate::generate::{generate_random_board, random_pos, random_source_info};
use crate::io::{load_board_file, save_board_file};
use anyhow::{Context, Result};
use core_board::{Board, SimResult, SourceInfo, SourceType, TreeTopology};
use core_config::SimConfig;
use core_grid::Pos;
use core_lang::LanguageOracle;
use core_psm::PsManager;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Boards retained for `undo` during step-by-step simulation.
pub const HISTORY_SIZE: usize = 10;

pub struct Simulator {
    board: Board,
    psm: PsManager,
    oracle: LanguageOracle,
    config: Arc<SimConfig>,
    history: VecDeque<(Board, PsManager)>,
    rng: SmallRng,
}

impl Simulator {
    pub fn new(config: SimConfig) -> Self {
        Self::with_seed(config, 0x5eed)
    }

    pub fn with_seed(config: SimConfig, seed: u64) -> Self {
        let config = Arc::new(config);
        let mut board = Board::new(Arc::clone(&config), TreeTopology::LeftDown);
        // The left/down regime anchors its root at the top-right corner.
        board
            .set_root(Pos::new(0, config.cols - 1))
            .expect("corner is always in bounds");
        Self {
            board,
            psm: PsManager::new(),
            oracle: LanguageOracle::new(),
            config,
            history: VecDeque::new(),
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut Board {
        &mut self.board
    }

    pub fn psm(&self) -> &PsManager {
        &self.psm
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub(crate) fn rng_mut(&mut self) -> &mut SmallRng {
        &mut self.rng
    }

    // ------------------------------------------------------------------
    // Initialization

    /// Generate a fresh random compliant tree.
    pub fn initialize_random(&mut self, max_depth: i32) -> bool {
        self.psm.reset();
        self.board.sources.clear();
        self.board.rented_resources.clear();
        generate_random_board(&mut self.board, &self.oracle, &mut self.rng, max_depth)
    }

    /// Load the board from a file; fails on format or language errors.
    pub fn initialize_from_file(&mut self, path: &Path) -> Result<()> {
        self.psm.reset();
        self.board.sources.clear();
        self.board.rented_resources.clear();
        load_board_file(&mut self.board, path)
    }

    // ------------------------------------------------------------------
    // Source events

    pub fn add_source(&mut self, pos: Pos, info: SourceInfo) -> SimResult<()> {
        self.psm.add_source(&mut self.board, pos, info)
    }

    pub fn modify_source(&mut self, pos: Pos, info: SourceInfo) -> SimResult<()> {
        self.psm.modify_source(&mut self.board, pos, info)
    }

    pub fn remove_source(&mut self, pos: Pos) -> SimResult<()> {
        self.psm.remove_source(&mut self.board, pos, false)
    }

    // ------------------------------------------------------------------
    // Simulation

    /// One reorganization round followed by the elastic analysis, the
    /// way the root runs them after a decide phase.
    pub fn reorganize(&mut self) -> bool {
        let restructured = self.board.reorganize();
        let elastic = self.board.analyze_elastic_model();
        restructured || elastic
    }

    pub fn reorganize_max_flow(&mut self) -> u32 {
        let accepted = self.board.reorganize_max_flow();
        self.board.analyze_elastic_model();
        accepted
    }

    /// Run `num_steps` macro steps: each spawns/retires a random source,
    /// ticks the board and reorganizes. Per-step average flow goes to
    /// `results_path` as CSV when given.
    pub fn auto_simulate(
        &mut self,
        num_steps: u32,
        min_power: i32,
        max_power: i32,
        results_path: Option<&Path>,
    ) -> Result<()> {
        let mut results = String::from("step,avg_flow,nodes,sources\n");
        for step in 0..num_steps {
            self.random_source_event(min_power, max_power);
            self.board.simulate_data_flow(1, true);
            self.reorganize();
            let avg = self.board.last_simulation_avg_flow_per_unit();
            results.push_str(&format!(
                "{step},{avg},{},{}\n",
                self.board.count_nodes(),
                self.board.sources.len()
            ));
            debug!(target: "sim.auto", step, avg, "auto_step");
        }
        if let Some(path) = results_path {
            std::fs::write(path, results)
                .with_context(|| format!("writing results to {}", path.display()))?;
        }
        info!(target: "sim.auto", num_steps, "auto_simulate_done");
        Ok(())
    }

    /// Spawn a source at a random unmapped position, or retire a random
    /// existing one — the event mix auto-simulation runs on.
    pub(crate) fn random_source_event(&mut self, min_power: i32, max_power: i32) {
        let spawn = self.board.sources.is_empty() || self.rng.gen_bool(0.7);
        if spawn {
            for _ in 0..16 {
                let pos = random_pos(&self.board, &mut self.rng);
                if self.board.sources.contains_key(&pos) {
                    continue;
                }
                let info = random_source_info(&self.config, &mut self.rng, min_power, max_power);
                if self.add_source(pos, info).is_ok() {
                    return;
                }
            }
            warn!(target: "sim.auto", "no_free_position_for_source");
        } else {
            let keys: Vec<Pos> = self.board.sources.keys().copied().collect();
            let victim = keys[self.rng.gen_range(0..keys.len())];
            if let Err(e) = self.remove_source(victim) {
                warn!(target: "sim.auto", error = %e, "source_removal_failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Step-by-step driver

    fn push_history(&mut self) {
        if self.history.len() == HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history.push_back((self.board.clone(), self.psm.clone()));
    }

    fn undo(&mut self) -> bool {
        match self.history.pop_back() {
            Some((board, psm)) => {
                self.board = board;
                self.psm = psm;
                true
            }
            None => false,
        }
    }

    /// Interactive command loop over generic streams. Commands:
    /// `add r c pub|sub|gen service power`, `mod r c power`, `del r c`,
    /// `tick [n]`, `reorg`, `elastic`, `print`, `undo`,
    /// `save <path>`, `quit`.
    pub fn do_step_by_step(
        &mut self,
        input: impl BufRead,
        mut output: impl Write,
        write_helpers: bool,
    ) -> Result<()> {
        if write_helpers {
            writeln!(
                output,
                "commands: add r c pub|sub|gen service power | mod r c power | del r c | tick [n] | reorg | elastic | print | undo | save path | quit"
            )?;
        }
        for line in input.lines() {
            let line = line?;
            let words: Vec<&str> = line.split_whitespace().collect();
            let outcome = self.dispatch_command(&words, &mut output)?;
            match outcome {
                CommandOutcome::Continue => {}
                CommandOutcome::Quit => break,
            }
            if write_helpers {
                writeln!(output, "ok")?;
            }
        }
        Ok(())
    }

    fn dispatch_command(&mut self, words: &[&str], output: &mut impl Write) -> Result<CommandOutcome> {
        let parse_pos = |words: &[&str]| -> Option<Pos> {
            let row = words.first()?.parse().ok()?;
            let col = words.get(1)?.parse().ok()?;
            Some(Pos::new(row, col))
        };
        match words {
            [] => {}
            ["quit"] | ["q"] => return Ok(CommandOutcome::Quit),
            ["print"] => self.board.print_board(output)?,
            ["undo"] => {
                if !self.undo() {
                    writeln!(output, "nothing to undo")?;
                }
            }
            ["tick"] => {
                self.push_history();
                self.board.simulate_data_flow(1, true);
                writeln!(output, "avg flow {}", self.board.last_simulation_avg_flow_per_unit())?;
            }
            ["tick", n] => {
                self.push_history();
                let ticks: u32 = n.parse().unwrap_or(1);
                self.board.simulate_data_flow(ticks, true);
                writeln!(output, "avg flow {}", self.board.last_simulation_avg_flow_per_unit())?;
            }
            ["reorg"] => {
                self.push_history();
                let changed = self.reorganize();
                writeln!(output, "reorganized: {changed}")?;
            }
            ["elastic"] => {
                self.push_history();
                let changed = self.board.analyze_elastic_model();
                writeln!(output, "elastic changed: {changed}")?;
            }
            ["save", path] => save_board_file(&self.board, Path::new(path))?,
            ["add", rest @ ..] if rest.len() == 5 => {
                let Some(pos) = parse_pos(rest) else {
                    writeln!(output, "bad position")?;
                    return Ok(CommandOutcome::Continue);
                };
                let source_type = match rest[2] {
                    "pub" => SourceType::Publisher,
                    "sub" => SourceType::Subscriber,
                    _ => SourceType::Generic,
                };
                let power: f32 = rest[4].parse().unwrap_or(0.0);
                self.push_history();
                let info = SourceInfo::new(power, source_type, rest[3]);
                if let Err(e) = self.add_source(pos, info) {
                    self.undo();
                    writeln!(output, "error: {e}")?;
                }
            }
            ["mod", rest @ ..] if rest.len() == 3 => {
                let Some(pos) = parse_pos(rest) else {
                    writeln!(output, "bad position")?;
                    return Ok(CommandOutcome::Continue);
                };
                let power: f32 = rest[2].parse().unwrap_or(0.0);
                self.push_history();
                let outcome = self
                    .board
                    .source(pos)
                    .map(|old| SourceInfo::new(power, old.source_type, old.service_type.clone()));
                match outcome {
                    Ok(info) => {
                        if let Err(e) = self.modify_source(pos, info) {
                            self.undo();
                            writeln!(output, "error: {e}")?;
                        }
                    }
                    Err(e) => {
                        self.undo();
                        writeln!(output, "error: {e}")?;
                    }
                }
            }
            ["del", rest @ ..] if rest.len() == 2 => {
                let Some(pos) = parse_pos(rest) else {
                    writeln!(output, "bad position")?;
                    return Ok(CommandOutcome::Continue);
                };
                self.push_history();
                if let Err(e) = self.remove_source(pos) {
                    self.undo();
                    writeln!(output, "error: {e}")?;
                }
            }
            _ => writeln!(output, "unknown command: {}", words.join(" "))?,
        }
        Ok(CommandOutcome::Continue)
    }

    pub fn save_board(&self, path: &Path) -> Result<()> {
        save_board_file(&self.board, path)
    }

    pub fn print_board(&self, out: &mut impl Write) -> std::io::Result<()> {
        self.board.print_board(out)
    }
}

enum CommandOutcome {
    Continue,
    Quit,
}
