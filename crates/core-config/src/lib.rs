//! Environment constants for the simulator, loaded from `dendra.toml`.
//!
//! Scope: every tunable the engine consumes — board dimensions, per-cell
//! flow cap, hop distance, elastic pricing, restructure delay, source
//! spawn ranges — lives here as a section of [`ConfigFile`], flattened
//! into the effective [`SimConfig`] handed to the engine crates.
//!
//! Loading policy: unknown fields are ignored (TOML deserialization
//! tolerance) so config files can carry forward-looking keys; a parse
//! error degrades to the built-in defaults rather than aborting, with a
//! warning event. The engine never re-reads the file — `SimConfig` is
//! immutable once a `Simulator` is built around it.

use anyhow::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::{fs, path::PathBuf};
use tracing::{info, warn};

#[derive(Debug, Deserialize, Clone)]
pub struct BoardSection {
    #[serde(default = "BoardSection::default_rows")]
    pub rows: i32,
    #[serde(default = "BoardSection::default_cols")]
    pub cols: i32,
    #[serde(default = "BoardSection::default_max_flow_per_cell")]
    pub max_flow_per_cell: f32,
    /// Symbols a cell may carry, as a string of single characters.
    #[serde(default = "BoardSection::default_alphabet")]
    pub alphabet: String,
}

impl BoardSection {
    const fn default_rows() -> i32 {
        20
    }
    const fn default_cols() -> i32 {
        20
    }
    const fn default_max_flow_per_cell() -> f32 {
        100.0
    }
    fn default_alphabet() -> String {
        "247e".to_string()
    }
}

impl Default for BoardSection {
    fn default() -> Self {
        Self {
            rows: Self::default_rows(),
            cols: Self::default_cols(),
            max_flow_per_cell: Self::default_max_flow_per_cell(),
            alphabet: Self::default_alphabet(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConnectSection {
    /// Maximum remapped manhattan distance a single hop may span.
    #[serde(default = "ConnectSection::default_max_hop_distance")]
    pub max_hop_distance: i32,
}

impl ConnectSection {
    const fn default_max_hop_distance() -> i32 {
        5
    }
}

impl Default for ConnectSection {
    fn default() -> Self {
        Self {
            max_hop_distance: Self::default_max_hop_distance(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FlowSection {
    /// Ticks a restructured cell skips data capture (settling model).
    #[serde(default = "FlowSection::default_restructure_delay_ticks")]
    pub restructure_delay_ticks: u32,
    /// Ticks simulated when estimating a candidate board's flow.
    #[serde(default = "FlowSection::default_estimation_ticks")]
    pub estimation_ticks: u32,
    /// Real ticks between scheduled source power adjustments.
    #[serde(default = "FlowSection::default_source_power_update_ticks")]
    pub source_power_update_ticks: u32,
}

impl FlowSection {
    const fn default_restructure_delay_ticks() -> u32 {
        3
    }
    const fn default_estimation_ticks() -> u32 {
        1
    }
    const fn default_source_power_update_ticks() -> u32 {
        10
    }
}

impl Default for FlowSection {
    fn default() -> Self {
        Self {
            restructure_delay_ticks: Self::default_restructure_delay_ticks(),
            estimation_ticks: Self::default_estimation_ticks(),
            source_power_update_ticks: Self::default_source_power_update_ticks(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ElasticSection {
    #[serde(default = "ElasticSection::default_enabled")]
    pub enabled: bool,
    #[serde(default = "ElasticSection::default_benefit_per_unit_of_flow")]
    pub benefit_per_unit_of_flow: f32,
    /// Rental price per symbol; symbols absent here fall back to
    /// `default_resource_cost`.
    #[serde(default)]
    pub cost_per_resource: BTreeMap<String, f32>,
    #[serde(default = "ElasticSection::default_resource_cost")]
    pub default_resource_cost: f32,
    #[serde(default = "ElasticSection::default_max_resources_to_rent")]
    pub max_resources_to_rent: usize,
}

impl ElasticSection {
    const fn default_enabled() -> bool {
        false
    }
    const fn default_benefit_per_unit_of_flow() -> f32 {
        1.0
    }
    const fn default_resource_cost() -> f32 {
        1.0
    }
    const fn default_max_resources_to_rent() -> usize {
        10
    }
}

impl Default for ElasticSection {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            benefit_per_unit_of_flow: Self::default_benefit_per_unit_of_flow(),
            cost_per_resource: BTreeMap::new(),
            default_resource_cost: Self::default_resource_cost(),
            max_resources_to_rent: Self::default_max_resources_to_rent(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SpawnSection {
    /// Probability that a randomly spawned source is a publisher
    /// (otherwise a subscriber).
    #[serde(default = "SpawnSection::default_publisher_probability")]
    pub publisher_probability: f32,
    #[serde(default = "SpawnSection::default_min_power")]
    pub min_power_for_wireless_source: i32,
    #[serde(default = "SpawnSection::default_max_power")]
    pub max_power_for_wireless_source: i32,
    #[serde(default = "SpawnSection::default_publisher_capacity_max")]
    pub publisher_capacity_max: i32,
    #[serde(default = "SpawnSection::default_subscriber_capacity_max")]
    pub subscriber_capacity_max: i32,
}

impl SpawnSection {
    const fn default_publisher_probability() -> f32 {
        0.5
    }
    const fn default_min_power() -> i32 {
        5
    }
    const fn default_max_power() -> i32 {
        30
    }
    const fn default_publisher_capacity_max() -> i32 {
        30
    }
    const fn default_subscriber_capacity_max() -> i32 {
        30
    }
}

impl Default for SpawnSection {
    fn default() -> Self {
        Self {
            publisher_probability: Self::default_publisher_probability(),
            min_power_for_wireless_source: Self::default_min_power(),
            max_power_for_wireless_source: Self::default_max_power(),
            publisher_capacity_max: Self::default_publisher_capacity_max(),
            subscriber_capacity_max: Self::default_subscriber_capacity_max(),
        }
    }
}

/// Raw parsed shape of `dendra.toml`.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub board: BoardSection,
    #[serde(default)]
    pub connect: ConnectSection,
    #[serde(default)]
    pub flow: FlowSection,
    #[serde(default)]
    pub elastic: ElasticSection,
    #[serde(default)]
    pub spawn: SpawnSection,
}

/// Effective simulator configuration: the flattened, validated view the
/// engine crates consume. Built once and shared immutably.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub rows: i32,
    pub cols: i32,
    pub max_flow_per_cell: f32,
    pub alphabet: Vec<char>,
    pub max_hop_distance: i32,
    pub restructure_delay_ticks: u32,
    pub estimation_ticks: u32,
    pub source_power_update_ticks: u32,
    pub elastic_enabled: bool,
    pub benefit_per_unit_of_flow: f32,
    cost_per_resource: BTreeMap<char, f32>,
    pub default_resource_cost: f32,
    pub max_resources_to_rent: usize,
    pub publisher_probability: f32,
    pub min_power_for_wireless_source: i32,
    pub max_power_for_wireless_source: i32,
    pub publisher_capacity_max: i32,
    pub subscriber_capacity_max: i32,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig::from_file(ConfigFile::default())
    }
}

impl SimConfig {
    pub fn from_file(file: ConfigFile) -> Self {
        let alphabet: Vec<char> = file.board.alphabet.chars().collect();
        let cost_per_resource = file
            .elastic
            .cost_per_resource
            .iter()
            .filter_map(|(k, v)| k.chars().next().map(|c| (c, *v)))
            .collect();
        Self {
            rows: file.board.rows.max(1),
            cols: file.board.cols.max(1),
            max_flow_per_cell: file.board.max_flow_per_cell,
            alphabet,
            max_hop_distance: file.connect.max_hop_distance,
            restructure_delay_ticks: file.flow.restructure_delay_ticks,
            estimation_ticks: file.flow.estimation_ticks.max(1),
            source_power_update_ticks: file.flow.source_power_update_ticks.max(1),
            elastic_enabled: file.elastic.enabled,
            benefit_per_unit_of_flow: file.elastic.benefit_per_unit_of_flow,
            cost_per_resource,
            default_resource_cost: file.elastic.default_resource_cost,
            max_resources_to_rent: file.elastic.max_resources_to_rent,
            publisher_probability: file.spawn.publisher_probability.clamp(0.0, 1.0),
            min_power_for_wireless_source: file.spawn.min_power_for_wireless_source,
            max_power_for_wireless_source: file.spawn.max_power_for_wireless_source,
            publisher_capacity_max: file.spawn.publisher_capacity_max.max(1),
            subscriber_capacity_max: file.spawn.subscriber_capacity_max.max(1),
        }
    }

    /// Rental price of one cell of the given symbol.
    pub fn cost_of(&self, symbol: char) -> f32 {
        self.cost_per_resource
            .get(&symbol)
            .copied()
            .unwrap_or(self.default_resource_cost)
    }

    /// Test/builder helper: override one symbol's rental price.
    pub fn set_cost_of(&mut self, symbol: char, cost: f32) {
        self.cost_per_resource.insert(symbol, cost);
    }
}

/// Best-effort config path: prefer `dendra.toml` in the working
/// directory, then the platform config dir.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("dendra.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("dendra").join("dendra.toml");
    }
    PathBuf::from("dendra.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<SimConfig> {
    let path = path.unwrap_or_else(discover);
    if let Ok(content) = fs::read_to_string(&path) {
        match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => {
                info!(target: "config", path = %path.display(), "config_loaded");
                Ok(SimConfig::from_file(file))
            }
            Err(e) => {
                // Fall back to defaults; a malformed config must not keep
                // the simulator from starting.
                warn!(target: "config", path = %path.display(), error = %e, "config_parse_failed_using_defaults");
                Ok(SimConfig::default())
            }
        }
    } else {
        Ok(SimConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_environment() {
        let cfg = SimConfig::default();
        assert_eq!(cfg.rows, 20);
        assert_eq!(cfg.cols, 20);
        assert_eq!(cfg.max_flow_per_cell, 100.0);
        assert_eq!(cfg.max_hop_distance, 5);
        assert_eq!(cfg.alphabet, vec!['2', '4', '7', 'e']);
        assert!(!cfg.elastic_enabled);
        assert_eq!(cfg.cost_of('4'), cfg.default_resource_cost);
    }

    #[test]
    fn partial_file_fills_missing_sections_with_defaults() {
        let file: ConfigFile = toml::from_str(
            r#"
            [connect]
            max_hop_distance = 9

            [elastic]
            enabled = true
            [elastic.cost_per_resource]
            "4" = 3.0
            "#,
        )
        .unwrap();
        let cfg = SimConfig::from_file(file);
        assert_eq!(cfg.max_hop_distance, 9);
        assert!(cfg.elastic_enabled);
        assert_eq!(cfg.cost_of('4'), 3.0);
        assert_eq!(cfg.cost_of('7'), 1.0);
        assert_eq!(cfg.rows, 20); // untouched section keeps defaults
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let parsed: Result<ConfigFile, _> = toml::from_str(
            r#"
            future_key = "ignored"
            [board]
            rows = 10
            "#,
        );
        let cfg = SimConfig::from_file(parsed.unwrap());
        assert_eq!(cfg.rows, 10);
    }

    #[test]
    fn malformed_file_degrades_to_defaults() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "this is [not toml").unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.rows, 20);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = load_from(Some(PathBuf::from("/nonexistent/dendra.toml"))).unwrap();
        assert_eq!(cfg.max_hop_distance, 5);
    }
}
