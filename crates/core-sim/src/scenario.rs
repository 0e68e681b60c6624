//! Evaluation harness: reconfiguring vs static flow under source churn.
//!
//! Each scenario runs the same board twice from the same seed — once
//! with reorganization enabled after every source event, once frozen —
//! and compares the average flow the two variants deliver over the
//! sampling schedule. The per-scenario and aggregate numbers go to the
//! caller's stream; the schema of that text is the driver's concern.

use crate::simulator::Simulator;
use anyhow::Result;
use core_config::SimConfig;
use rand::Rng;
use std::io::Write;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Copy)]
pub struct ScenarioParams {
    pub num_scenarios: u32,
    pub sample_count: u32,
    pub sample_ticks: u32,
    pub ticks_between_events: u32,
    /// Restructure-delay override: how long a moved subroot withholds
    /// its flow in these runs.
    pub ticks_to_reconfigure_root: u32,
}

impl Simulator {
    /// Compare reconfiguring against static flow on the board loaded
    /// from `init_file`, writing one line per scenario plus a summary.
    pub fn simulate_optimal_vs_random_flow(
        &mut self,
        init_file: &Path,
        params: ScenarioParams,
        out: &mut impl Write,
    ) -> Result<()> {
        let mut config = self.config().clone();
        config.restructure_delay_ticks = params.ticks_to_reconfigure_root;

        let mut sum_reconfig = 0.0f32;
        let mut sum_static = 0.0f32;
        for scenario in 0..params.num_scenarios {
            let seed = self.scenario_seed();
            let reconfig = run_flow_scenario(&config, init_file, seed, true, params)?;
            let frozen = run_flow_scenario(&config, init_file, seed, false, params)?;
            sum_reconfig += reconfig;
            sum_static += frozen;
            writeln!(
                out,
                "scenario {scenario}: reconfigurable avg {reconfig:.3} static avg {frozen:.3}"
            )?;
        }
        let n = params.num_scenarios.max(1) as f32;
        writeln!(
            out,
            "overall: reconfigurable {:.3} static {:.3}",
            sum_reconfig / n,
            sum_static / n
        )?;
        info!(
            target: "sim.scenario",
            scenarios = params.num_scenarios,
            reconfig_avg = sum_reconfig / n,
            static_avg = sum_static / n,
            "scenario_sweep_done"
        );
        Ok(())
    }

    fn scenario_seed(&mut self) -> u64 {
        self.rng_mut().r#gen()
    }
}

/// One run: load the board, then alternate sampling windows with
/// scheduled source events, reorganizing after each event when allowed.
/// Returns the mean of the per-window average flows.
fn run_flow_scenario(
    config: &SimConfig,
    init_file: &Path,
    seed: u64,
    allow_reconfiguration: bool,
    params: ScenarioParams,
) -> Result<f32> {
    let mut sim = Simulator::with_seed(config.clone(), seed);
    sim.initialize_from_file(init_file)?;

    let (min_power, max_power) = (
        config.min_power_for_wireless_source,
        config.max_power_for_wireless_source,
    );
    let mut total = 0.0f32;
    let mut ticks_since_event = 0u32;
    for _ in 0..params.sample_count {
        sim.board_mut().simulate_data_flow(params.sample_ticks.max(1), true);
        total += sim.board().last_simulation_avg_flow_per_unit();

        ticks_since_event += params.sample_ticks.max(1);
        while ticks_since_event >= params.ticks_between_events.max(1) {
            ticks_since_event -= params.ticks_between_events.max(1);
            sim.random_source_event(min_power, max_power);
            if allow_reconfiguration {
                sim.reorganize();
            }
        }
    }
    Ok(total / params.sample_count.max(1) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_config::ConfigFile;
    use std::io::Write as _;

    #[test]
    fn scenario_sweep_writes_one_line_per_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let board_path = dir.path().join("board.txt");
        let mut f = std::fs::File::create(&board_path).unwrap();
        writeln!(f, "****4442").unwrap();
        writeln!(f, "****2***").unwrap();
        drop(f);

        let mut file = ConfigFile::default();
        file.board.rows = 4;
        file.board.cols = 8;
        let mut sim = Simulator::with_seed(SimConfig::from_file(file), 5);
        let params = ScenarioParams {
            num_scenarios: 2,
            sample_count: 2,
            sample_ticks: 3,
            ticks_between_events: 4,
            ticks_to_reconfigure_root: 1,
        };
        let mut out = Vec::new();
        sim.simulate_optimal_vs_random_flow(&board_path, params, &mut out)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 3); // two scenarios + summary
        assert!(text.contains("overall:"));
    }
}
