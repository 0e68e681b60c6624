//! Publisher/Subscriber Manager: greedy connection solving over the
//! board's sources, with mirror-node bookkeeping.
//!
//! The manager owns the publisher and subscriber position sets plus the
//! mirror registry; the sources themselves live on the board, so every
//! operation takes `&mut Board` and the simulator funnels all source
//! mutations through this type.
//!
//! Solver shape (re-run on every source change):
//! 1. collect relay candidates — occupied cells not already mirroring;
//! 2. direct pass — weakest-first pairing of service-compatible
//!    publishers and subscribers within the hop bound, topping up
//!    existing links before creating new ones;
//! 3. mirror pass — for pairs beyond the hop bound, grow a relay chain
//!    from the publisher (or its best-placed existing mirror) toward
//!    the subscriber with a width-one greedy beam.
//!
//! Mirror records are refcounted by the subscribers sharing them and die
//! at refcount zero. Debug builds rebuild the whole registry from the
//! subscriber-side links after every operation and compare
//! (`StateCorruption` on mismatch).

use core_board::{Board, LinkInfo, SimError, SimResult, SourceInfo, SourceType};
use core_grid::{float_eq, manhattan, Pos};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

/// A relay cell in use, owned by one publisher and shared by the
/// subscribers whose links pass through it (refcount = len).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorNodeInfo {
    pub node_pos: Pos,
    pub parent_publisher: Pos,
    pub subscribers: BTreeSet<Pos>,
}

impl MirrorNodeInfo {
    fn new(node_pos: Pos, parent_publisher: Pos) -> Self {
        Self {
            node_pos,
            parent_publisher,
            subscribers: BTreeSet::new(),
        }
    }

    pub fn refcount(&self) -> usize {
        self.subscribers.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PsManager {
    publishers: BTreeSet<Pos>,
    subscribers: BTreeSet<Pos>,
    mirror_nodes: BTreeMap<Pos, MirrorNodeInfo>,
    publisher_to_mirrors: BTreeMap<Pos, BTreeSet<Pos>>,
}

impl PsManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.publishers.clear();
        self.subscribers.clear();
        self.mirror_nodes.clear();
        self.publisher_to_mirrors.clear();
    }

    pub fn publishers(&self) -> &BTreeSet<Pos> {
        &self.publishers
    }

    pub fn subscribers(&self) -> &BTreeSet<Pos> {
        &self.subscribers
    }

    pub fn mirror_nodes(&self) -> &BTreeMap<Pos, MirrorNodeInfo> {
        &self.mirror_nodes
    }

    pub fn mirrors_of(&self, publisher: Pos) -> Option<&BTreeSet<Pos>> {
        self.publisher_to_mirrors.get(&publisher)
    }

    // ------------------------------------------------------------------
    // Source lifecycle

    /// Register a source on the board and, for publishers and
    /// subscribers, solve connections.
    pub fn add_source(&mut self, board: &mut Board, pos: Pos, info: SourceInfo) -> SimResult<()> {
        let source_type = info.source_type;
        board.insert_source(pos, info)?;
        if source_type == SourceType::Generic {
            return Ok(());
        }
        self.on_item_add(board, pos, source_type)
    }

    fn on_item_add(&mut self, board: &mut Board, pos: Pos, source_type: SourceType) -> SimResult<()> {
        let collection = match source_type {
            SourceType::Publisher => &mut self.publishers,
            SourceType::Subscriber => &mut self.subscribers,
            SourceType::Generic => unreachable!("generic sources are not managed"),
        };
        if !collection.insert(pos) {
            return Err(SimError::StateCorruption {
                component: "psm",
                invariant: "source-partition",
                detail: format!("{pos} already tracked"),
            });
        }
        debug!(target: "psm", %pos, ?source_type, "item_added");
        self.run_sanity_checks(board)?;
        self.solve_connections(board)
    }

    /// Remove one source (or everything when `remove_all`), tearing
    /// down its connections and the mirrors they kept alive.
    pub fn remove_source(&mut self, board: &mut Board, pos: Pos, remove_all: bool) -> SimResult<()> {
        if remove_all {
            board.sources.clear();
            self.reset();
            return Ok(());
        }
        let source_type = board.source(pos)?.source_type;
        if source_type != SourceType::Generic {
            self.teardown_connections(board, pos)?;
            match source_type {
                SourceType::Publisher => self.publishers.remove(&pos),
                SourceType::Subscriber => self.subscribers.remove(&pos),
                SourceType::Generic => unreachable!(),
            };
        }
        board.take_source(pos)?;
        debug!(target: "psm", %pos, "item_removed");
        if source_type == SourceType::Generic {
            return Ok(());
        }
        self.run_sanity_checks(board)?;
        self.solve_connections(board)
    }

    /// Update a source in place. Connections survive unless the new
    /// capacity falls below the power already committed, in which case
    /// they are torn down first; a change of type or service re-registers
    /// the source from scratch.
    pub fn modify_source(&mut self, board: &mut Board, pos: Pos, info: SourceInfo) -> SimResult<()> {
        let old = board.source(pos)?;
        if old.source_type != info.source_type || old.service_type != info.service_type {
            self.remove_source(board, pos, false)?;
            return self.add_source(board, pos, info);
        }
        if info.power() < old.used_power() {
            self.teardown_connections(board, pos)?;
        }
        let src = board.source_mut(pos)?;
        src.set_current_power(info.power());
        src.set_power_target(info.target());
        if src.source_type == SourceType::Generic {
            return Ok(());
        }
        self.run_sanity_checks(board)?;
        self.solve_connections(board)
    }

    /// Drop every connection of `pos`, decrementing mirror refcounts
    /// along the relay paths and erasing mirrors that reach zero.
    fn teardown_connections(&mut self, board: &mut Board, pos: Pos) -> SimResult<()> {
        let removed_type = board.source(pos)?.source_type;
        let links: Vec<(Pos, LinkInfo)> = board
            .source(pos)?
            .connected_to
            .iter()
            .map(|(p, l)| (*p, l.clone()))
            .collect();

        for (other, link) in links {
            let (publisher, subscriber) = match removed_type {
                SourceType::Publisher => (pos, other),
                _ => (other, pos),
            };
            for mirror_pos in &link.mirror_nodes_used {
                let Some(mirror) = self.mirror_nodes.get_mut(mirror_pos) else {
                    return Err(SimError::StateCorruption {
                        component: "psm",
                        invariant: "mirror-registry",
                        detail: format!("link references unknown mirror {mirror_pos}"),
                    });
                };
                mirror.subscribers.remove(&subscriber);
                if mirror.refcount() == 0 {
                    self.mirror_nodes.remove(mirror_pos);
                    if let Some(set) = self.publisher_to_mirrors.get_mut(&publisher) {
                        set.remove(mirror_pos);
                        if set.is_empty() {
                            self.publisher_to_mirrors.remove(&publisher);
                        }
                    }
                    trace!(target: "psm", mirror = %mirror_pos, "mirror_released");
                }
            }

            // Symmetric removal of the link itself.
            let flow = link.flow;
            let this = board.source_mut(pos)?;
            this.connected_to.remove(&other);
            this.subtract_used_power(flow);
            let that = board.source_mut(other)?;
            let their = that.connected_to.remove(&pos);
            that.subtract_used_power(flow);
            debug_assert!(
                their.is_some_and(|l| float_eq(l.flow, flow)),
                "asymmetric link between {pos} and {other}"
            );
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Solver

    /// Occupied cells available as relays: every cell of the organism
    /// that is not already someone's mirror and not itself a managed
    /// source (mirror exclusivity).
    pub fn collect_nodes_for_mirroring(&self, board: &Board) -> BTreeSet<Pos> {
        board
            .dims()
            .iter()
            .filter(|&p| {
                board.is_occupied(p)
                    && !self.mirror_nodes.contains_key(&p)
                    && !self.publishers.contains(&p)
                    && !self.subscribers.contains(&p)
            })
            .collect()
    }

    fn closest_vo_distance(&self, pos: Pos, vo_nodes: &BTreeSet<Pos>) -> Option<i32> {
        vo_nodes.iter().map(|&n| manhattan(pos, n)).min()
    }

    /// Publishers and subscribers with remaining power, weakest first.
    /// With `for_mirroring`, sources farther than the hop bound from
    /// every relay candidate are dropped too.
    fn sort_and_filter(
        &self,
        board: &Board,
        vo_nodes: &BTreeSet<Pos>,
        for_mirroring: bool,
    ) -> (Vec<Pos>, Vec<Pos>) {
        let max_hop = board.config().max_hop_distance;
        let mut out: [Vec<Pos>; 2] = [Vec::new(), Vec::new()];
        for (slot, collection) in out.iter_mut().zip([&self.publishers, &self.subscribers]) {
            let mut extended: Vec<(Pos, f32)> = Vec::with_capacity(collection.len());
            for &pos in collection.iter() {
                let Ok(info) = board.source(pos) else { continue };
                let remaining = info.remaining_power();
                if remaining <= 0.0 {
                    continue;
                }
                if for_mirroring {
                    match self.closest_vo_distance(pos, vo_nodes) {
                        Some(d) if d <= max_hop => {}
                        _ => continue,
                    }
                }
                extended.push((pos, remaining));
            }
            // Weakest first: draining the smallest capacities first
            // reduces stranded partial supply. Position breaks ties for
            // a deterministic pass order.
            extended.sort_by(|a, b| {
                a.1.partial_cmp(&b.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.0.cmp(&b.0))
            });
            *slot = extended.into_iter().map(|(p, _)| p).collect();
        }
        let [publishers, subscribers] = out;
        (publishers, subscribers)
    }

    /// Re-solve all connections. Safe to call at any time; existing
    /// links are kept and topped up, new capacity is matched greedily.
    pub fn solve_connections(&mut self, board: &mut Board) -> SimResult<()> {
        let mut suitable = self.collect_nodes_for_mirroring(board);

        let (publishers, subscribers) = self.sort_and_filter(board, &suitable, false);
        self.solve_direct_connections(board, &publishers, &subscribers)?;

        let (publishers, subscribers) = self.sort_and_filter(board, &suitable, true);
        self.solve_mirror_connections(board, &publishers, &subscribers, &mut suitable)?;

        self.run_sanity_checks(board)
    }

    fn solve_direct_connections(
        &mut self,
        board: &mut Board,
        publishers: &[Pos],
        subscribers: &[Pos],
    ) -> SimResult<()> {
        let max_hop = board.config().max_hop_distance;
        for &publisher in publishers {
            for &subscriber in subscribers {
                if board.source(publisher)?.remaining_power() <= 0.0 {
                    break;
                }
                if board.source(subscriber)?.remaining_power() <= 0.0 {
                    continue;
                }
                if board.source(publisher)?.service_type != board.source(subscriber)?.service_type {
                    continue;
                }
                if manhattan(publisher, subscriber) > max_hop {
                    continue;
                }
                if board.source(publisher)?.connected_to.contains_key(&subscriber) {
                    self.check_capacity_maximize(board, publisher, subscriber)?;
                    continue;
                }
                let flow = board
                    .source(publisher)?
                    .remaining_power()
                    .min(board.source(subscriber)?.remaining_power());
                self.add_connection(board, publisher, subscriber, LinkInfo::direct(flow))?;
                trace!(target: "psm.solve", %publisher, %subscriber, flow, "direct_link");
            }
        }
        Ok(())
    }

    fn solve_mirror_connections(
        &mut self,
        board: &mut Board,
        publishers: &[Pos],
        subscribers: &[Pos],
        suitable: &mut BTreeSet<Pos>,
    ) -> SimResult<()> {
        let max_hop = board.config().max_hop_distance;
        for &publisher in publishers {
            for &subscriber in subscribers {
                if board.source(publisher)?.remaining_power() <= 0.0 {
                    break;
                }
                if board.source(subscriber)?.remaining_power() <= 0.0 {
                    continue;
                }
                if board.source(publisher)?.service_type != board.source(subscriber)?.service_type {
                    continue;
                }
                // Pairs within the hop bound were the direct pass's job.
                if manhattan(publisher, subscriber) <= max_hop {
                    continue;
                }
                if board.source(publisher)?.connected_to.contains_key(&subscriber) {
                    continue;
                }

                // Relay start: the publisher or, when better placed, one
                // of its existing mirrors still within one hop of it (so
                // the assembled path keeps every consecutive pair inside
                // the hop bound).
                let mut start = publisher;
                let mut start_dist = manhattan(publisher, subscriber);
                if let Some(mirrors) = self.publisher_to_mirrors.get(&publisher) {
                    for &mirror in mirrors {
                        if manhattan(publisher, mirror) > max_hop {
                            continue;
                        }
                        let d = manhattan(mirror, subscriber);
                        if d < start_dist {
                            start = mirror;
                            start_dist = d;
                        }
                    }
                }

                let Some(path) = connect_nodes_by_heuristic(start, subscriber, suitable, max_hop)
                else {
                    continue;
                };

                let flow = board
                    .source(publisher)?
                    .remaining_power()
                    .min(board.source(subscriber)?.remaining_power());
                let mirrors: Vec<Pos> = path.iter().copied().filter(|&p| p != publisher).collect();
                self.add_connection(
                    board,
                    publisher,
                    subscriber,
                    LinkInfo::relayed(flow, mirrors.clone()),
                )?;

                for node in path {
                    if node == publisher {
                        continue;
                    }
                    if suitable.remove(&node) {
                        self.publisher_to_mirrors
                            .entry(publisher)
                            .or_default()
                            .insert(node);
                        self.mirror_nodes
                            .entry(node)
                            .or_insert_with(|| MirrorNodeInfo::new(node, publisher))
                            .subscribers
                            .insert(subscriber);
                    } else if let Some(mirror) = self.mirror_nodes.get_mut(&node) {
                        // The start was an already-registered mirror of
                        // this publisher; it now also serves the new
                        // subscriber.
                        mirror.subscribers.insert(subscriber);
                    } else {
                        return Err(SimError::StateCorruption {
                            component: "psm",
                            invariant: "mirror-registry",
                            detail: format!("relay node {node} neither suitable nor a mirror"),
                        });
                    }
                }
                trace!(target: "psm.solve", %publisher, %subscriber, path_len = mirrors.len(), flow, "mirror_link");
            }
        }
        Ok(())
    }

    /// Install a symmetric link between a publisher and a subscriber and
    /// commit the flow on both sides.
    fn add_connection(
        &mut self,
        board: &mut Board,
        publisher: Pos,
        subscriber: Pos,
        link: LinkInfo,
    ) -> SimResult<()> {
        debug_assert!(link.flow > 0.0, "links carry positive flow");
        let flow = link.flow;
        {
            let p = board.source_mut(publisher)?;
            debug_assert!(
                !p.connected_to.contains_key(&subscriber),
                "link already exists on the publisher side"
            );
            p.connected_to.insert(subscriber, link.clone());
            p.add_used_power(flow);
        }
        {
            let s = board.source_mut(subscriber)?;
            debug_assert!(
                !s.connected_to.contains_key(&publisher),
                "link already exists on the subscriber side"
            );
            s.connected_to.insert(publisher, link);
            s.add_used_power(flow);
        }
        board.source(publisher)?.sanity_check_power(publisher)?;
        board.source(subscriber)?.sanity_check_power(subscriber)?;
        Ok(())
    }

    /// If a link already exists between the pair, raise its flow by the
    /// newly available minimum of both remaining powers.
    pub fn check_capacity_maximize(
        &mut self,
        board: &mut Board,
        publisher: Pos,
        subscriber: Pos,
    ) -> SimResult<()> {
        let has_p = board.source(publisher)?.connected_to.contains_key(&subscriber);
        let has_s = board.source(subscriber)?.connected_to.contains_key(&publisher);
        if !has_p || !has_s {
            return Ok(());
        }
        let flow_to_add = board
            .source(publisher)?
            .remaining_power()
            .min(board.source(subscriber)?.remaining_power());
        if flow_to_add <= 0.0 || float_eq(flow_to_add, 0.0) {
            return Ok(());
        }
        {
            let p = board.source_mut(publisher)?;
            if let Some(l) = p.connected_to.get_mut(&subscriber) {
                l.flow += flow_to_add;
            }
            p.add_used_power(flow_to_add);
        }
        {
            let s = board.source_mut(subscriber)?;
            if let Some(l) = s.connected_to.get_mut(&publisher) {
                l.flow += flow_to_add;
            }
            s.add_used_power(flow_to_add);
        }
        board.source(publisher)?.sanity_check_power(publisher)?;
        board.source(subscriber)?.sanity_check_power(subscriber)?;
        trace!(target: "psm.solve", %publisher, %subscriber, flow_to_add, "capacity_maximized");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sanity checks

    fn run_sanity_checks(&self, board: &Board) -> SimResult<()> {
        if cfg!(debug_assertions) {
            self.do_sanity_checks(board)
        } else {
            Ok(())
        }
    }

    /// Full registry verification: the collection partition and the
    /// mirror registry rebuilt from the subscriber-side links.
    pub fn do_sanity_checks(&self, board: &Board) -> SimResult<()> {
        // Collections partition the managed sources.
        for (&pos, info) in &board.sources {
            let expected = match info.source_type {
                SourceType::Publisher => self.publishers.contains(&pos) && !self.subscribers.contains(&pos),
                SourceType::Subscriber => self.subscribers.contains(&pos) && !self.publishers.contains(&pos),
                SourceType::Generic => !self.publishers.contains(&pos) && !self.subscribers.contains(&pos),
            };
            if !expected {
                return Err(SimError::StateCorruption {
                    component: "psm",
                    invariant: "source-partition",
                    detail: format!("{pos} is in the wrong collection"),
                });
            }
        }
        let managed = board
            .sources
            .values()
            .filter(|s| s.source_type != SourceType::Generic)
            .count();
        if managed != self.publishers.len() + self.subscribers.len() {
            return Err(SimError::StateCorruption {
                component: "psm",
                invariant: "source-partition",
                detail: format!(
                    "{} managed sources vs {}+{} tracked",
                    managed,
                    self.publishers.len(),
                    self.subscribers.len()
                ),
            });
        }

        // Mirror exclusivity: relays are plain cells, and each
        // mirror's owner is a live publisher.
        for (pos, mirror) in &self.mirror_nodes {
            if self.publishers.contains(pos) || self.subscribers.contains(pos) {
                return Err(SimError::StateCorruption {
                    component: "psm",
                    invariant: "mirror-exclusivity",
                    detail: format!("mirror {pos} is also a source"),
                });
            }
            if !self.publishers.contains(&mirror.parent_publisher) {
                return Err(SimError::StateCorruption {
                    component: "psm",
                    invariant: "mirror-exclusivity",
                    detail: format!("mirror {pos} owned by unknown publisher"),
                });
            }
        }

        // Rebuild the registry from the subscriber-side links.
        let mut rebuilt: BTreeMap<Pos, MirrorNodeInfo> = BTreeMap::new();
        let mut rebuilt_pub_to_mirrors: BTreeMap<Pos, BTreeSet<Pos>> = BTreeMap::new();
        for &subscriber in &self.subscribers {
            let info = board.source(subscriber)?;
            for (&publisher, link) in &info.connected_to {
                for &mirror_pos in &link.mirror_nodes_used {
                    rebuilt
                        .entry(mirror_pos)
                        .or_insert_with(|| MirrorNodeInfo::new(mirror_pos, publisher))
                        .subscribers
                        .insert(subscriber);
                    rebuilt_pub_to_mirrors
                        .entry(publisher)
                        .or_default()
                        .insert(mirror_pos);
                }
            }
        }
        if rebuilt != self.mirror_nodes {
            return Err(SimError::StateCorruption {
                component: "psm",
                invariant: "mirror-registry-rebuild",
                detail: format!(
                    "mirror registry mismatch: {} rebuilt vs {} tracked",
                    rebuilt.len(),
                    self.mirror_nodes.len()
                ),
            });
        }
        if rebuilt_pub_to_mirrors != self.publisher_to_mirrors {
            return Err(SimError::StateCorruption {
                component: "psm",
                invariant: "mirror-registry-rebuild",
                detail: "publisher-to-mirror map mismatch".to_string(),
            });
        }
        Ok(())
    }
}

/// Width-one greedy beam from `start` toward `end` over the candidate
/// relays. Each step picks the unused candidate within one hop of the
/// current node that is closest to the target, preferring the farther
/// one from the current node on ties (for spread). Returns the path
/// including `start`, or `None` when the beam strands.
pub fn connect_nodes_by_heuristic(
    start: Pos,
    end: Pos,
    candidates: &BTreeSet<Pos>,
    max_hop: i32,
) -> Option<Vec<Pos>> {
    let mut path = vec![start];
    let mut used: BTreeSet<Pos> = BTreeSet::new();
    used.insert(start);
    let mut current = start;

    loop {
        if manhattan(current, end) <= max_hop {
            return Some(path);
        }
        let mut best: Option<(Pos, i32, i32)> = None;
        for &node in candidates {
            if used.contains(&node) {
                continue;
            }
            let to_current = manhattan(node, current);
            if to_current > max_hop {
                continue;
            }
            let to_end = manhattan(node, end);
            let better = match best {
                None => true,
                Some((_, best_to_end, best_to_current)) => {
                    to_end < best_to_end || (to_end == best_to_end && to_current > best_to_current)
                }
            };
            if better {
                best = Some((node, to_end, to_current));
            }
        }
        let (node, _, _) = best?;
        path.push(node);
        used.insert(node);
        current = node;
    }
}
