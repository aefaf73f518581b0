//! The schedule build pipeline: ingest system/set configs into the
//! hierarchy and dependency graphs, validate both, flatten sets away,
//! insert sync points, detect ambiguities, and compile the plan.

use std::collections::{HashMap, HashSet};

use fixedbitset::FixedBitSet;
use log::warn;

use crate::ecs::access::AccessConflicts;
use crate::ecs::system::{ApplyDeferred, BoxedSystem};
use crate::ecs::world::World;

use super::executor::ExecutablePlan;
use super::graph::{CheckGraphResults, DiGraph, NodeId, UnGraph, check_graph};
use super::{
    BoxedCondition, DependencyKind, LogLevel, ScheduleBuildError, ScheduleBuildSettings,
    SetConfig, SetConfigs, SetKey, SystemConfigs,
};

pub(crate) struct SystemNode {
    pub(crate) system: BoxedSystem,
    pub(crate) conditions: Vec<BoxedCondition>,
    initialized: bool,
}

/// The mutable half of a schedule: everything declared so far, plus the
/// artifacts of the last build that later passes introspect.
#[derive(Default)]
pub struct ScheduleGraph {
    pub(crate) systems: Vec<SystemNode>,
    pub(crate) system_sets: Vec<SetKey>,
    pub(crate) set_conditions: Vec<Vec<BoxedCondition>>,
    set_indices: HashMap<SetKey, usize>,
    hierarchy: DiGraph,
    dependency: DiGraph,
    ambiguous_with: UnGraph,
    ambiguous_with_all: HashSet<NodeId>,
    no_sync_edges: HashSet<(NodeId, NodeId)>,
    /// Auto-inserted sync nodes, keyed by longest-path distance so
    /// converging edges share one node. Survives rebuilds so plans stay
    /// stable when the graph grows.
    auto_sync_node_ids: HashMap<u32, usize>,
    ambiguities: Vec<(usize, usize, AccessConflicts)>,
    pub(crate) changed: bool,
    pub(crate) settings: ScheduleBuildSettings,
}

impl ScheduleGraph {
    // ==================== Ingest ====================

    pub(crate) fn add_systems(&mut self, configs: SystemConfigs) {
        self.changed = true;
        let chained = configs.chained;
        let mut previous: Option<NodeId> = None;
        for config in configs.configs {
            let id = NodeId::System(self.systems.len());
            let name_set = SetKey::System(config.system.name());
            self.systems.push(SystemNode {
                system: config.system,
                conditions: config.conditions,
                initialized: false,
            });
            self.hierarchy.add_node(id);
            self.dependency.add_node(id);
            // Every system belongs to the implicit set of its name, the
            // target of `SystemRef` orderings.
            let name_set_node = NodeId::Set(self.set_index(name_set));
            self.hierarchy.add_edge(name_set_node, id);
            self.apply_shared_config(
                id,
                config.sets,
                config.dependencies,
                config.ambiguous_with,
                config.ambiguous_with_all,
            );
            if chained {
                if let Some(previous) = previous {
                    self.dependency.add_edge(previous, id);
                }
            }
            previous = Some(id);
        }
    }

    pub(crate) fn configure_sets(&mut self, configs: SetConfigs) {
        self.changed = true;
        let chained = configs.chained;
        let mut previous: Option<NodeId> = None;
        for config in configs.configs {
            let SetConfig {
                key,
                conditions,
                sets,
                dependencies,
                ambiguous_with,
                ambiguous_with_all,
            } = config;
            let index = self.set_index(key);
            let id = NodeId::Set(index);
            self.set_conditions[index].extend(conditions);
            self.apply_shared_config(id, sets, dependencies, ambiguous_with, ambiguous_with_all);
            if chained {
                if let Some(previous) = previous {
                    self.dependency.add_edge(previous, id);
                }
            }
            previous = Some(id);
        }
    }

    fn apply_shared_config(
        &mut self,
        id: NodeId,
        sets: Vec<SetKey>,
        dependencies: Vec<(DependencyKind, SetKey)>,
        ambiguous_with: Vec<SetKey>,
        ambiguous_with_all: bool,
    ) {
        for set in sets {
            let parent = NodeId::Set(self.set_index(set));
            self.hierarchy.add_edge(parent, id);
        }
        for (kind, key) in dependencies {
            let target = NodeId::Set(self.set_index(key));
            match kind {
                DependencyKind::Before => self.dependency.add_edge(id, target),
                DependencyKind::After => self.dependency.add_edge(target, id),
                DependencyKind::BeforeNoSync => {
                    self.dependency.add_edge(id, target);
                    self.no_sync_edges.insert((id, target));
                }
                DependencyKind::AfterNoSync => {
                    self.dependency.add_edge(target, id);
                    self.no_sync_edges.insert((target, id));
                }
            }
        }
        for key in ambiguous_with {
            let target = NodeId::Set(self.set_index(key));
            self.ambiguous_with.add_edge(id, target);
        }
        if ambiguous_with_all {
            self.ambiguous_with_all.insert(id);
        }
    }

    /// Dense index of a set, registering it on first sight.
    fn set_index(&mut self, key: SetKey) -> usize {
        if let Some(&index) = self.set_indices.get(&key) {
            return index;
        }
        let index = self.system_sets.len();
        self.system_sets.push(key.clone());
        self.set_conditions.push(Vec::new());
        self.set_indices.insert(key, index);
        self.hierarchy.add_node(NodeId::Set(index));
        self.dependency.add_node(NodeId::Set(index));
        index
    }

    // ==================== Introspection ====================

    pub fn node_name(&self, node: NodeId) -> String {
        match node {
            NodeId::System(index) => self.systems[index].system.name().into_owned(),
            NodeId::Set(index) => self.system_sets[index].name().to_string(),
        }
    }

    /// Conflicting unordered system pairs found by the last build.
    pub fn ambiguities(&self) -> &[(usize, usize, AccessConflicts)] {
        &self.ambiguities
    }

    // ==================== Build pipeline ====================

    pub(crate) fn build(
        &mut self,
        world: &mut World,
    ) -> Result<ExecutablePlan, ScheduleBuildError> {
        for node in &mut self.systems {
            if !node.initialized {
                node.system.initialize(world);
                node.initialized = true;
            }
        }

        let hierarchy_topo = self
            .hierarchy
            .topsort()
            .map_err(|cycles| self.hierarchy_cycle_error(cycles))?;
        let hierarchy_results = check_graph(&self.hierarchy, &hierarchy_topo);
        self.check_hierarchy_redundancy(&hierarchy_results)?;

        self.dependency
            .topsort()
            .map_err(|cycles| self.dependency_cycle_error(cycles))?;

        // A set cannot be ordered against anything it contains.
        for (a, b) in self.dependency.edges() {
            if hierarchy_results.is_reachable(a, b) || hierarchy_results.is_reachable(b, a) {
                return Err(ScheduleBuildError::CrossDependency(
                    self.node_name(a),
                    self.node_name(b),
                ));
            }
        }

        let set_systems = self.collect_set_systems(&hierarchy_topo);
        self.check_system_ref_targets(&set_systems)?;
        self.check_order_but_intersect(&set_systems)?;

        let mut flattened = self.flatten_dependency(&set_systems);
        let flat_topo = flattened
            .topsort()
            .map_err(|cycles| self.dependency_cycle_error(cycles))?;
        if self.settings.auto_insert_apply_deferred {
            self.insert_sync_points(&mut flattened, &flat_topo);
        }

        let final_topo = flattened
            .topsort()
            .map_err(|cycles| self.dependency_cycle_error(cycles))?;
        let flat_results = check_graph(&flattened, &final_topo);
        self.detect_ambiguities(&flat_results, &set_systems, world)?;

        Ok(self.compile(&flattened, &final_topo, &hierarchy_topo, &set_systems))
    }

    fn hierarchy_cycle_error(&self, cycles: Vec<Vec<NodeId>>) -> ScheduleBuildError {
        if cycles.len() == 1 && cycles[0].len() == 1 {
            return ScheduleBuildError::HierarchyLoop(self.node_name(cycles[0][0]));
        }
        ScheduleBuildError::HierarchyCycle(self.format_cycles(&cycles))
    }

    fn dependency_cycle_error(&self, cycles: Vec<Vec<NodeId>>) -> ScheduleBuildError {
        if cycles.len() == 1 && cycles[0].len() == 1 {
            return ScheduleBuildError::DependencyLoop(self.node_name(cycles[0][0]));
        }
        ScheduleBuildError::DependencyCycle(self.format_cycles(&cycles))
    }

    fn format_cycles(&self, cycles: &[Vec<NodeId>]) -> String {
        cycles
            .iter()
            .map(|cycle| {
                cycle
                    .iter()
                    .map(|&node| self.node_name(node))
                    .collect::<Vec<_>>()
                    .join(" -> ")
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn check_hierarchy_redundancy(
        &self,
        results: &CheckGraphResults,
    ) -> Result<(), ScheduleBuildError> {
        if results.transitive_edges.is_empty() {
            return Ok(());
        }
        let message: String = results
            .transitive_edges
            .iter()
            .map(|&(a, b)| format!(" {} -> {}", self.node_name(a), self.node_name(b)))
            .collect();
        match self.settings.hierarchy_detection {
            LogLevel::Ignore => Ok(()),
            LogLevel::Warn => {
                warn!("the hierarchy of system sets contains redundant edges:{message}");
                Ok(())
            }
            LogLevel::Error => Err(ScheduleBuildError::HierarchyRedundancy(message)),
        }
    }

    /// Member systems per set, by folding the hierarchy bottom-up.
    fn collect_set_systems(&self, hierarchy_topo: &[NodeId]) -> HashMap<usize, FixedBitSet> {
        let system_count = self.systems.len();
        let mut set_systems: HashMap<usize, FixedBitSet> = HashMap::new();
        // Children come before parents in reverse topological order.
        for &node in hierarchy_topo.iter().rev() {
            let NodeId::Set(index) = node else { continue };
            let mut members = FixedBitSet::with_capacity(system_count);
            for &child in self.hierarchy.neighbors(node) {
                match child {
                    NodeId::System(system) => members.insert(system),
                    NodeId::Set(set) => {
                        if let Some(inner) = set_systems.get(&set) {
                            members.union_with(inner);
                        }
                    }
                }
            }
            set_systems.insert(index, members);
        }
        set_systems
    }

    /// Ordering against the implicit set of a system name is only well
    /// defined while exactly one system carries that name.
    fn check_system_ref_targets(
        &self,
        set_systems: &HashMap<usize, FixedBitSet>,
    ) -> Result<(), ScheduleBuildError> {
        for (index, key) in self.system_sets.iter().enumerate() {
            if !key.is_system_set() {
                continue;
            }
            let members = set_systems
                .get(&index)
                .map(|bits| bits.count_ones(..))
                .unwrap_or(0);
            if members <= 1 {
                continue;
            }
            let node = NodeId::Set(index);
            let referenced = !self.dependency.neighbors(node).is_empty()
                || !self.dependency.neighbors_incoming(node).is_empty()
                || !self.ambiguous_with.neighbors(node).is_empty();
            if referenced {
                return Err(ScheduleBuildError::SystemOrderAmbiguity(
                    key.name().to_string(),
                    members,
                ));
            }
        }
        Ok(())
    }

    fn check_order_but_intersect(
        &self,
        set_systems: &HashMap<usize, FixedBitSet>,
    ) -> Result<(), ScheduleBuildError> {
        for (a, b) in self.dependency.edges() {
            let (NodeId::Set(left), NodeId::Set(right)) = (a, b) else {
                continue;
            };
            if self.system_sets[left].is_system_set() || self.system_sets[right].is_system_set() {
                continue;
            }
            let (Some(left_members), Some(right_members)) =
                (set_systems.get(&left), set_systems.get(&right))
            else {
                continue;
            };
            if !left_members.is_disjoint(right_members) {
                return Err(ScheduleBuildError::SetsHaveOrderButIntersect(
                    self.node_name(a),
                    self.node_name(b),
                ));
            }
        }
        Ok(())
    }

    /// Rewrite every dependency edge touching a set as edges between that
    /// set's member systems. Empty sets bridge their incoming edges to
    /// their outgoing ones so ordering through them is preserved.
    fn flatten_dependency(&mut self, set_systems: &HashMap<usize, FixedBitSet>) -> DiGraph {
        let mut working = self.dependency.clone();
        let set_nodes: Vec<NodeId> = working.nodes().filter(|node| !node.is_system()).collect();
        for set_node in set_nodes {
            let incoming = working.neighbors_incoming(set_node).to_vec();
            let outgoing = working.neighbors(set_node).to_vec();
            let members: Vec<NodeId> = set_systems
                .get(&set_node.index())
                .map(|bits| bits.ones().map(NodeId::System).collect())
                .unwrap_or_default();
            if members.is_empty() {
                for &a in &incoming {
                    for &b in &outgoing {
                        if self.no_sync_edges.contains(&(a, set_node))
                            && self.no_sync_edges.contains(&(set_node, b))
                        {
                            self.no_sync_edges.insert((a, b));
                        }
                        working.add_edge(a, b);
                    }
                }
            } else {
                for &a in &incoming {
                    for &member in &members {
                        if self.no_sync_edges.contains(&(a, set_node)) {
                            self.no_sync_edges.insert((a, member));
                        }
                        working.add_edge(a, member);
                    }
                }
                for &member in &members {
                    for &b in &outgoing {
                        if self.no_sync_edges.contains(&(set_node, b)) {
                            self.no_sync_edges.insert((member, b));
                        }
                        working.add_edge(member, b);
                    }
                }
            }
            // Collapsed sets must end up isolated, so edges added later
            // never point at one already processed.
            for &a in &incoming {
                working.remove_edge(a, set_node);
            }
            for &b in &outgoing {
                working.remove_edge(set_node, b);
            }
        }

        let mut flattened = DiGraph::default();
        for node in working.nodes().filter(NodeId::is_system) {
            flattened.add_node(node);
        }
        for (a, b) in working.edges() {
            if a.is_system() && b.is_system() {
                flattened.add_edge(a, b);
            }
        }
        flattened
    }

    /// Insert sync points so deferred work is applied before any system
    /// ordered after it runs. Longest-path distances bucket the insertions:
    /// edges converging on the same distance share one sync node.
    fn insert_sync_points(&mut self, flattened: &mut DiGraph, topo: &[NodeId]) {
        let mut with_sync_points = flattened.clone();
        // Per system: longest-path distance in "sync point crossings", and
        // whether a deferred signal is still pending from an opted-out edge.
        let mut distances_and_pending: HashMap<usize, (u32, bool)> =
            HashMap::with_capacity(topo.len());

        for &node in topo {
            let index = node.index();
            let (node_distance, pending) = distances_and_pending
                .get(&index)
                .copied()
                .unwrap_or_default();
            let mut node_needs_sync = pending;
            if self.systems[index].system.is_sync_point() {
                // The sync point consumes the signal.
                node_needs_sync = false;
            } else if !node_needs_sync {
                node_needs_sync = self.systems[index].system.has_deferred();
            }
            for &target in flattened.neighbors(node) {
                let mut edge_needs_sync = node_needs_sync;
                if node_needs_sync && self.no_sync_edges.contains(&(node, target)) {
                    // Opted out on this edge; the signal rides through to
                    // the target instead.
                    distances_and_pending.entry(target.index()).or_default().1 = true;
                    edge_needs_sync = false;
                }
                let weight = u32::from(
                    edge_needs_sync || self.systems[target.index()].system.is_sync_point(),
                );
                let entry = distances_and_pending.entry(target.index()).or_default();
                entry.0 = entry.0.max(node_distance + weight);
            }
        }

        for &node in topo {
            let (node_distance, _) = distances_and_pending
                .get(&node.index())
                .copied()
                .unwrap_or_default();
            for &target in flattened.neighbors(node) {
                let (target_distance, _) = distances_and_pending
                    .get(&target.index())
                    .copied()
                    .unwrap_or_default();
                if node_distance == target_distance {
                    continue;
                }
                if self.systems[target.index()].system.is_sync_point() {
                    continue;
                }
                let sync_point = self.sync_point_at(target_distance);
                with_sync_points.add_edge(node, sync_point);
                with_sync_points.add_edge(sync_point, target);
                // The direct edge is now implied.
                with_sync_points.remove_edge(node, target);
            }
        }

        *flattened = with_sync_points;
    }

    fn sync_point_at(&mut self, distance: u32) -> NodeId {
        if let Some(&index) = self.auto_sync_node_ids.get(&distance) {
            return NodeId::System(index);
        }
        let index = self.systems.len();
        self.systems.push(SystemNode {
            system: Box::new(ApplyDeferred::default()),
            conditions: Vec::new(),
            initialized: true,
        });
        self.auto_sync_node_ids.insert(distance, index);
        // Sync points conflict with everything on purpose; reporting that
        // would drown real ambiguities.
        self.ambiguous_with_all.insert(NodeId::System(index));
        NodeId::System(index)
    }

    fn detect_ambiguities(
        &mut self,
        results: &CheckGraphResults,
        set_systems: &HashMap<usize, FixedBitSet>,
        world: &World,
    ) -> Result<(), ScheduleBuildError> {
        self.ambiguities.clear();

        let expand = |node: NodeId| -> Vec<usize> {
            match node {
                NodeId::System(index) => vec![index],
                NodeId::Set(index) => set_systems
                    .get(&index)
                    .map(|bits| bits.ones().collect())
                    .unwrap_or_default(),
            }
        };
        let mut exempt_all = FixedBitSet::with_capacity(self.systems.len());
        for &node in &self.ambiguous_with_all {
            match node {
                NodeId::System(index) => exempt_all.insert(index),
                NodeId::Set(index) => {
                    if let Some(members) = set_systems.get(&index) {
                        exempt_all.union_with(members);
                    }
                }
            }
        }
        let mut exempt_pairs: HashSet<(usize, usize)> = HashSet::new();
        for (a, b) in self.ambiguous_with.edges() {
            for &left in &expand(a) {
                for &right in &expand(b) {
                    exempt_pairs.insert((left.min(right), left.max(right)));
                }
            }
        }

        for &(a, b) in &results.disconnected {
            let (left, right) = (a.index(), b.index());
            if exempt_all.contains(left) || exempt_all.contains(right) {
                continue;
            }
            if exempt_pairs.contains(&(left.min(right), left.max(right))) {
                continue;
            }
            let conflicts = self.systems[left]
                .system
                .access()
                .get_conflicts(self.systems[right].system.access());
            if conflicts.is_empty() {
                continue;
            }
            self.ambiguities.push((left, right, conflicts));
        }

        if self.ambiguities.is_empty() {
            return Ok(());
        }
        match self.settings.ambiguity_detection {
            LogLevel::Ignore => Ok(()),
            LogLevel::Warn => {
                warn!(
                    "{} pairs of systems with conflicting access have no order between them:{}",
                    self.ambiguities.len(),
                    self.format_ambiguities(set_systems, world)
                );
                Ok(())
            }
            LogLevel::Error => Err(ScheduleBuildError::Ambiguity(
                self.ambiguities.len(),
                self.format_ambiguities(set_systems, world),
            )),
        }
    }

    fn format_ambiguities(
        &self,
        set_systems: &HashMap<usize, FixedBitSet>,
        world: &World,
    ) -> String {
        let mut message = String::new();
        for (left, right, conflicts) in &self.ambiguities {
            let on = match conflicts.ids() {
                None => " on all access".to_string(),
                Some(ids) => {
                    let names: Vec<&str> = ids
                        .iter()
                        .filter_map(|&id| world.components().info(id).map(|info| info.name()))
                        .collect();
                    format!(" on [{}]", names.join(", "))
                }
            };
            message.push_str(&format!(
                "\n -- {} and {}{}",
                self.systems[*left].system.name(),
                self.systems[*right].system.name(),
                on
            ));
            if self.settings.report_sets {
                let sets_of = |system: usize| -> Vec<&str> {
                    self.system_sets
                        .iter()
                        .enumerate()
                        .filter(|(_, key)| !key.is_system_set())
                        .filter(|(index, _)| {
                            set_systems
                                .get(index)
                                .is_some_and(|bits| bits.contains(system))
                        })
                        .map(|(_, key)| key.name())
                        .collect()
                };
                let (left_sets, right_sets) = (sets_of(*left), sets_of(*right));
                if !left_sets.is_empty() || !right_sets.is_empty() {
                    message.push_str(&format!(
                        " (sets: [{}] vs [{}])",
                        left_sets.join(", "),
                        right_sets.join(", ")
                    ));
                }
            }
        }
        message
    }

    fn compile(
        &self,
        flattened: &DiGraph,
        topo: &[NodeId],
        hierarchy_topo: &[NodeId],
        set_systems: &HashMap<usize, FixedBitSet>,
    ) -> ExecutablePlan {
        let system_order: Vec<usize> = topo.iter().map(NodeId::index).collect();
        let mut dependency_counts = vec![0usize; self.systems.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.systems.len()];
        for (a, b) in flattened.edges() {
            dependency_counts[b.index()] += 1;
            dependents[a.index()].push(b.index());
        }
        // Outer sets first, so the executor short-circuits whole subtrees.
        let mut sets_with_conditions = Vec::new();
        for &node in hierarchy_topo {
            let NodeId::Set(index) = node else { continue };
            if self.set_conditions[index].is_empty() {
                continue;
            }
            let mut members = set_systems.get(&index).cloned().unwrap_or_default();
            members.grow(self.systems.len());
            sets_with_conditions.push((index, members));
        }
        ExecutablePlan {
            system_order,
            dependency_counts,
            dependents,
            sets_with_conditions,
        }
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use crate::ecs::Component as DeriveComponent;
    use crate::ecs::Resource as DeriveResource;
    use crate::ecs::schedule::{
        IntoSetConfigs, IntoSystemConfigs, LogLevel, Schedule, ScheduleBuildError,
        ScheduleBuildSettings, SystemRef,
    };
    use crate::ecs::system::FuncSystem;
    use crate::ecs::world::World;

    #[derive(DeriveComponent)]
    struct Health(#[allow(dead_code)] u32);

    #[derive(DeriveComponent)]
    struct Shielded;

    #[derive(DeriveResource, Default)]
    struct Score(#[allow(dead_code)] u32);

    fn noop(name: &'static str) -> FuncSystem {
        FuncSystem::new(name, |_: &mut World| {})
    }

    #[test]
    fn dependency_cycle_fails_the_build() {
        // Given a -> b -> a
        let mut world = World::new();
        let mut schedule = Schedule::new();
        schedule.add_systems(noop("a").before(SystemRef("b")));
        schedule.add_systems(noop("b").before(SystemRef("a")));

        // When
        let error = schedule.initialize(&mut world).unwrap_err();

        // Then
        assert!(matches!(error, ScheduleBuildError::DependencyCycle(_)));
    }

    #[test]
    fn set_containing_itself_fails_the_build() {
        let mut world = World::new();
        let mut schedule = Schedule::new();
        schedule.configure_sets("update".in_set("update"));

        let error = schedule.initialize(&mut world).unwrap_err();

        assert!(matches!(error, ScheduleBuildError::HierarchyLoop(_)));
    }

    #[test]
    fn hierarchy_cycle_fails_the_build() {
        // Given inner <-> outer membership
        let mut world = World::new();
        let mut schedule = Schedule::new();
        schedule.configure_sets("inner".in_set("outer"));
        schedule.configure_sets("outer".in_set("inner"));

        let error = schedule.initialize(&mut world).unwrap_err();

        assert!(matches!(error, ScheduleBuildError::HierarchyCycle(_)));
    }

    #[test]
    fn ordering_against_a_containing_set_fails_the_build() {
        // Given a system inside "update" that is also ordered before it
        let mut world = World::new();
        let mut schedule = Schedule::new();
        schedule.add_systems(noop("mover").in_set("update").before("update"));

        let error = schedule.initialize(&mut world).unwrap_err();

        assert!(matches!(error, ScheduleBuildError::CrossDependency(_, _)));
    }

    #[test]
    fn ordered_sets_sharing_a_system_fail_the_build() {
        // Given one system in both of two ordered sets
        let mut world = World::new();
        let mut schedule = Schedule::new();
        schedule.configure_sets("first".before("second"));
        schedule.add_systems(noop("shared").in_set("first").in_set("second"));

        let error = schedule.initialize(&mut world).unwrap_err();

        assert!(matches!(
            error,
            ScheduleBuildError::SetsHaveOrderButIntersect(_, _)
        ));
    }

    #[test]
    fn ordering_against_a_duplicated_system_name_fails_the_build() {
        // Given two systems named "dup" and an ordering against that name
        let mut world = World::new();
        let mut schedule = Schedule::new();
        schedule.add_systems(noop("dup"));
        schedule.add_systems(noop("dup"));
        schedule.add_systems(noop("other").after(SystemRef("dup")));

        let error = schedule.initialize(&mut world).unwrap_err();

        assert!(matches!(
            error,
            ScheduleBuildError::SystemOrderAmbiguity(_, 2)
        ));
    }

    #[test]
    fn redundant_hierarchy_edge_is_an_error_when_configured() {
        // Given membership in both a set and its parent set
        let mut world = World::new();
        let mut schedule = Schedule::new();
        schedule.set_build_settings(ScheduleBuildSettings {
            hierarchy_detection: LogLevel::Error,
            ..Default::default()
        });
        schedule.configure_sets("inner".in_set("outer"));
        schedule.add_systems(noop("redundant").in_set("inner").in_set("outer"));

        let error = schedule.initialize(&mut world).unwrap_err();

        assert!(matches!(error, ScheduleBuildError::HierarchyRedundancy(_)));
    }

    #[test]
    fn converging_deferred_edges_share_one_sync_point() {
        // Given two deferred writers both ordered before one reader
        let mut world = World::new();
        let mut schedule = Schedule::new();
        schedule.add_systems(noop("writer_a").deferred().before(SystemRef("reader")));
        schedule.add_systems(noop("writer_b").deferred().before(SystemRef("reader")));
        schedule.add_systems(noop("reader"));

        // When
        schedule.initialize(&mut world).unwrap();

        // Then - exactly one sync node was inserted for both edges
        let graph = schedule.graph();
        let sync_points = graph
            .systems
            .iter()
            .filter(|node| node.system.is_sync_point())
            .count();
        assert_eq!(sync_points, 1);
        assert_eq!(graph.systems.len(), 4);
    }

    #[test]
    fn ignore_deferred_edges_suppress_the_sync_point() {
        // Given a deferred writer whose only edge opts out of syncing
        let mut world = World::new();
        let mut schedule = Schedule::new();
        schedule.add_systems(
            noop("writer")
                .deferred()
                .before_ignore_deferred(SystemRef("reader")),
        );
        schedule.add_systems(noop("reader"));

        schedule.initialize(&mut world).unwrap();

        assert_eq!(schedule.graph().systems.len(), 2);
    }

    #[test]
    fn deferred_chains_get_one_sync_point_per_crossing() {
        // Given deferred -> deferred -> reader
        let mut world = World::new();
        let mut schedule = Schedule::new();
        schedule.add_systems(
            (noop("a").deferred(), noop("b").deferred(), noop("reader")).chain(),
        );

        schedule.initialize(&mut world).unwrap();

        // Then - a sync after "a" and another after "b"
        let sync_points = schedule
            .graph()
            .systems
            .iter()
            .filter(|node| node.system.is_sync_point())
            .count();
        assert_eq!(sync_points, 2);
    }

    #[test]
    fn unordered_conflicting_systems_fail_when_policy_is_error() {
        // Given two unordered writers of the same resource
        let mut world = World::new();
        let mut schedule = Schedule::new();
        schedule.set_build_settings(ScheduleBuildSettings {
            ambiguity_detection: LogLevel::Error,
            ..Default::default()
        });
        schedule.add_systems(noop("a").writes_resource::<Score>());
        schedule.add_systems(noop("b").writes_resource::<Score>());

        let error = schedule.initialize(&mut world).unwrap_err();

        assert!(matches!(error, ScheduleBuildError::Ambiguity(1, _)));
    }

    #[test]
    fn ambiguous_with_exempts_a_known_pair() {
        // Given the same conflict, declared acceptable
        let mut world = World::new();
        let mut schedule = Schedule::new();
        schedule.set_build_settings(ScheduleBuildSettings {
            ambiguity_detection: LogLevel::Error,
            ..Default::default()
        });
        schedule.add_systems(
            noop("a")
                .writes_resource::<Score>()
                .ambiguous_with(SystemRef("b")),
        );
        schedule.add_systems(noop("b").writes_resource::<Score>());

        assert!(schedule.initialize(&mut world).is_ok());
        assert!(schedule.graph().ambiguities().is_empty());
    }

    #[test]
    fn disjoint_filters_are_not_ambiguous() {
        // Given two writers of Health split by a Shielded filter
        let mut world = World::new();
        let mut schedule = Schedule::new();
        schedule.set_build_settings(ScheduleBuildSettings {
            ambiguity_detection: LogLevel::Error,
            ..Default::default()
        });
        schedule.add_systems(
            noop("shielded_damage")
                .writes_component::<Health>()
                .with_filter::<Shielded>(),
        );
        schedule.add_systems(
            noop("raw_damage")
                .writes_component::<Health>()
                .without_filter::<Shielded>(),
        );

        // Then - the filters prove the systems touch disjoint entities
        assert!(schedule.initialize(&mut world).is_ok());
    }

    #[test]
    fn ambiguities_are_recorded_for_introspection() {
        // Given conflicting unordered systems under the default policy
        let mut world = World::new();
        let mut schedule = Schedule::new();
        schedule.add_systems(noop("a").writes_resource::<Score>());
        schedule.add_systems(noop("b").writes_resource::<Score>());

        schedule.initialize(&mut world).unwrap();

        assert_eq!(schedule.graph().ambiguities().len(), 1);
    }

    #[test]
    fn ordering_through_an_empty_set_is_preserved() {
        // Given b -> empty set -> a, with no system in the middle
        let mut world = World::new();
        let mut schedule = Schedule::new();
        schedule.add_systems(noop("a").after("empty"));
        schedule.add_systems(noop("b").before("empty"));

        schedule.initialize(&mut world).unwrap();

        // Then - the compiled order bridges the set: b runs before a
        let order: Vec<String> = schedule
            .plan
            .system_order()
            .iter()
            .map(|&index| schedule.graph().systems[index].system.name().into_owned())
            .collect();
        assert_eq!(order, vec!["b", "a"]);
    }
}
