//! Unit registry: descriptor discovery and producer registration.
//!
//! A unit is a *pair* of resources: a descriptor file on disk and a producer
//! implementation registered in code. The discovery convention embeds the
//! unit id in the file name (`unit_<major>[_<minor>]_<slug>.json`), so the
//! registry can pair the two without a separate manifest.
//!
//! Producers are registered up front as factories in a [`ProducerTable`]
//! rather than loaded ad hoc: a descriptor that has no conforming producer is
//! marked unavailable at scan time and excluded from plans with a warning —
//! never a runtime surprise, never a silent skip.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** File-system scanning and descriptor parsing live here.
//! The [`pipeline`] crate sees only [`pipeline::UnitDescriptor`] and
//! [`pipeline::Producer`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use regex::Regex;
use tracing::{debug, warn};

use pipeline::{PipelineError, Producer, ProducerError, UnitDescriptor, UnitId};

// ---------------------------------------------------------------------------
// Producer table
// ---------------------------------------------------------------------------

/// Creates a fresh producer instance for one unit.
///
/// Factories are cheap; the registry calls each at most once per scan
/// generation and memoises the result.
pub type ProducerFactory = Box<dyn Fn() -> Arc<dyn Producer> + Send + Sync>;

/// The explicit registration table mapping unit id to producer factory.
///
/// Built once by the composition root in a single pass; the registry consults
/// it when pairing descriptors with implementations.
#[derive(Default)]
pub struct ProducerTable {
    factories: BTreeMap<UnitId, ProducerFactory>,
}

impl ProducerTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory for `id`, replacing any previous registration.
    pub fn register(
        mut self,
        id: UnitId,
        factory: impl Fn() -> Arc<dyn Producer> + Send + Sync + 'static,
    ) -> Self {
        self.factories.insert(id, Box::new(factory));
        self
    }

    /// Returns `true` if a factory is registered for `id`.
    pub fn contains(&self, id: UnitId) -> bool {
        self.factories.contains_key(&id)
    }
}

// ---------------------------------------------------------------------------
// Registered units
// ---------------------------------------------------------------------------

/// One discovered unit: its parsed descriptor, where it came from, and
/// whether a producer implementation is paired with it.
#[derive(Debug, Clone)]
pub struct RegisteredUnit {
    /// The parsed descriptor.
    pub descriptor: UnitDescriptor,
    /// The descriptor file the unit was discovered from.
    pub source: PathBuf,
    /// `false` if no producer factory is registered for the unit's id; such
    /// units are excluded from plans.
    pub available: bool,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Discovers unit descriptors and pairs them with registered producers.
///
/// [`UnitRegistry::rescan`] re-reads the descriptor directory, so adding or
/// removing a unit takes effect on the next plan computation without a
/// process restart.
pub struct UnitRegistry {
    root: PathBuf,
    producers: ProducerTable,
    file_pattern: Regex,
    snapshot: RwLock<BTreeMap<UnitId, RegisteredUnit>>,
    loaded: Mutex<BTreeMap<UnitId, Arc<dyn Producer>>>,
}

impl UnitRegistry {
    /// Opens a registry over `root`, performing the initial descriptor scan.
    pub fn open(root: impl Into<PathBuf>, producers: ProducerTable) -> Result<Self, PipelineError> {
        let registry = Self {
            root: root.into(),
            producers,
            // Slug must start with a letter, so a `_<digits>_` run is always
            // parsed as the minor part and never swallowed into the slug.
            file_pattern: Regex::new(r"^unit_(\d+)(?:_(\d+))?_([a-z][a-z0-9_-]*)\.json$")
                .map_err(|e| PipelineError::DescriptorIo {
                    path: String::new(),
                    message: e.to_string(),
                })?,
            snapshot: RwLock::new(BTreeMap::new()),
            loaded: Mutex::new(BTreeMap::new()),
        };
        registry.rescan()?;
        Ok(registry)
    }

    /// Re-reads the descriptor directory and replaces the registry snapshot.
    ///
    /// Memoised producers for units that disappeared are dropped; surviving
    /// units keep their loaded producer.
    pub fn rescan(&self) -> Result<(), PipelineError> {
        let scanned = self.scan()?;
        let mut loaded = self.poisoned_ok(self.loaded.lock());
        loaded.retain(|id, _| scanned.contains_key(id));
        drop(loaded);
        *self.poisoned_ok(self.snapshot.write()) = scanned;
        Ok(())
    }

    /// Returns every registered unit, ascending by id.
    pub fn list(&self) -> Vec<RegisteredUnit> {
        self.poisoned_ok(self.snapshot.read())
            .values()
            .cloned()
            .collect()
    }

    /// Returns the registered unit with the given id, if any.
    pub fn get(&self, id: UnitId) -> Option<RegisteredUnit> {
        self.poisoned_ok(self.snapshot.read()).get(&id).cloned()
    }

    /// Returns the descriptors that participate in plan computation:
    /// every discovered descriptor except unavailable ones.
    ///
    /// Disabled descriptors are included — the graph builder needs them to
    /// reject enabled→disabled dependencies as configuration errors.
    pub fn plan_descriptors(&self) -> Vec<UnitDescriptor> {
        self.poisoned_ok(self.snapshot.read())
            .values()
            .filter(|u| u.available)
            .map(|u| u.descriptor.clone())
            .collect()
    }

    /// Returns the (memoised) producer for `id`.
    ///
    /// Fails if no factory is registered — which the scheduler never hits for
    /// units in a plan, since unavailable units are excluded up front.
    pub fn load_producer(&self, id: UnitId) -> Result<Arc<dyn Producer>, PipelineError> {
        let mut loaded = self.poisoned_ok(self.loaded.lock());
        if let Some(producer) = loaded.get(&id) {
            return Ok(Arc::clone(producer));
        }
        let factory = self
            .producers
            .factories
            .get(&id)
            .ok_or_else(|| PipelineError::Producer {
                unit: id,
                source: ProducerError::Fatal {
                    message: "no producer registered for unit".into(),
                },
            })?;
        let producer = factory();
        loaded.insert(id, Arc::clone(&producer));
        Ok(producer)
    }

    // -- internals ----------------------------------------------------------

    fn scan(&self) -> Result<BTreeMap<UnitId, RegisteredUnit>, PipelineError> {
        let entries = fs::read_dir(&self.root).map_err(|e| PipelineError::DescriptorIo {
            path: self.root.display().to_string(),
            message: e.to_string(),
        })?;

        // read_dir order is filesystem-dependent; sort by file name so which
        // of two duplicate descriptors is reported first is deterministic.
        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PipelineError::DescriptorIo {
                path: self.root.display().to_string(),
                message: e.to_string(),
            })?;
            paths.push(entry.path());
        }
        paths.sort();

        let mut units: BTreeMap<UnitId, RegisteredUnit> = BTreeMap::new();
        for path in paths {
            let Some(file_id) = self.id_from_file_name(&path) else {
                continue;
            };

            let unit = self.parse_descriptor(&path, file_id)?;
            if let Some(existing) = units.get(&unit.descriptor.id) {
                return Err(PipelineError::DuplicateUnitId {
                    id: unit.descriptor.id,
                    first_source: existing.source.display().to_string(),
                    second_source: path.display().to_string(),
                });
            }
            units.insert(unit.descriptor.id, unit);
        }

        for (&id, _) in &self.producers.factories {
            if !units.contains_key(&id) {
                debug!(unit = %id, "producer registered but no descriptor discovered");
            }
        }
        Ok(units)
    }

    fn id_from_file_name(&self, path: &Path) -> Option<UnitId> {
        let name = path.file_name()?.to_str()?;
        let captures = self.file_pattern.captures(name)?;
        let major: u32 = captures.get(1)?.as_str().parse().ok()?;
        let minor: u32 = match captures.get(2) {
            Some(m) => m.as_str().parse().ok()?,
            None => 0,
        };
        Some(UnitId::new(major, minor))
    }

    fn parse_descriptor(&self, path: &Path, file_id: UnitId) -> Result<RegisteredUnit, PipelineError> {
        let file = path.display().to_string();
        let raw = fs::read_to_string(path).map_err(|e| PipelineError::DescriptorIo {
            path: file.clone(),
            message: e.to_string(),
        })?;
        let descriptor: UnitDescriptor =
            serde_json::from_str(&raw).map_err(|e| PipelineError::MalformedDescriptor {
                file: file.clone(),
                message: e.to_string(),
            })?;
        if descriptor.id != file_id {
            return Err(PipelineError::MalformedDescriptor {
                file,
                message: format!(
                    "file name declares unit {file_id} but descriptor declares {}",
                    descriptor.id
                ),
            });
        }

        let available = self.producers.contains(descriptor.id);
        if !available {
            warn!(
                unit = %descriptor.id,
                name = %descriptor.name,
                source = %path.display(),
                "no producer registered for unit; excluding it from plans",
            );
        }
        Ok(RegisteredUnit {
            descriptor,
            source: path.to_path_buf(),
            available,
        })
    }

    fn poisoned_ok<G>(&self, guard: Result<G, std::sync::PoisonError<G>>) -> G {
        // Snapshot state is replaced wholesale, never mutated in place, so a
        // poisoned lock still holds a coherent snapshot.
        guard.unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for UnitRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitRegistry")
            .field("root", &self.root)
            .field("units", &self.list().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use pipeline::{ProducerInputs, SessionId};

    struct EchoProducer;

    #[async_trait]
    impl Producer for EchoProducer {
        async fn run(
            &self,
            _session: SessionId,
            _inputs: &ProducerInputs,
        ) -> Result<Value, ProducerError> {
            Ok(json!({ "echo": true }))
        }
    }

    fn write_descriptor(dir: &Path, file: &str, body: Value) {
        fs::write(dir.join(file), serde_json::to_string_pretty(&body).unwrap()).unwrap();
    }

    fn echo_table(ids: &[&str]) -> ProducerTable {
        ids.iter().fold(ProducerTable::new(), |table, id| {
            table.register(id.parse().unwrap(), || Arc::new(EchoProducer))
        })
    }

    #[test]
    fn discovers_descriptors_by_naming_convention() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(
            dir.path(),
            "unit_1_seed.json",
            json!({ "id": "1", "name": "seed" }),
        );
        write_descriptor(
            dir.path(),
            "unit_4_5_culture.json",
            json!({ "id": "4.5", "name": "culture", "dependencies": ["1"] }),
        );
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = UnitRegistry::open(dir.path(), echo_table(&["1", "4.5"])).unwrap();
        let units = registry.list();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].descriptor.id, UnitId::major(1));
        assert_eq!(units[1].descriptor.id, UnitId::new(4, 5));
        assert!(units.iter().all(|u| u.available));
    }

    #[test]
    fn duplicate_id_is_fatal_and_names_both_files() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(dir.path(), "unit_1_seed.json", json!({ "id": "1", "name": "seed" }));
        write_descriptor(dir.path(), "unit_1_sprout.json", json!({ "id": "1", "name": "sprout" }));

        let err = UnitRegistry::open(dir.path(), echo_table(&["1"])).unwrap_err();
        match err {
            PipelineError::DuplicateUnitId { first_source, second_source, id } => {
                assert_eq!(id, UnitId::major(1));
                assert!(first_source.contains("unit_1_seed.json"));
                assert!(second_source.contains("unit_1_sprout.json"));
            }
            other => panic!("expected duplicate id error, got {other}"),
        }
    }

    #[test]
    fn malformed_dependency_list_is_fatal_and_names_the_source() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(
            dir.path(),
            "unit_2_geo.json",
            json!({ "id": "2", "name": "geo", "dependencies": ["one"] }),
        );
        let err = UnitRegistry::open(dir.path(), echo_table(&["2"])).unwrap_err();
        match err {
            PipelineError::MalformedDescriptor { file, .. } => {
                assert!(file.contains("unit_2_geo.json"));
            }
            other => panic!("expected malformed descriptor error, got {other}"),
        }
    }

    #[test]
    fn invariant_breaking_retry_block_is_a_malformed_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(
            dir.path(),
            "unit_2_geo.json",
            json!({
                "id": "2",
                "name": "geo",
                "retry": { "max_attempts": 0, "initial_delay_secs": 1.0,
                           "backoff_multiplier": 2.0, "max_delay_secs": 10 },
            }),
        );
        let err = UnitRegistry::open(dir.path(), echo_table(&["2"])).unwrap_err();
        match err {
            PipelineError::MalformedDescriptor { file, .. } => {
                assert!(file.contains("unit_2_geo.json"));
            }
            other => panic!("expected malformed descriptor error, got {other}"),
        }
    }

    #[test]
    fn file_name_and_descriptor_id_must_agree() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(dir.path(), "unit_2_geo.json", json!({ "id": "3", "name": "geo" }));
        let err = UnitRegistry::open(dir.path(), echo_table(&["2", "3"])).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedDescriptor { .. }));
    }

    #[test]
    fn unit_without_producer_is_unavailable_not_silently_dropped() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(dir.path(), "unit_1_seed.json", json!({ "id": "1", "name": "seed" }));
        write_descriptor(dir.path(), "unit_2_geo.json", json!({ "id": "2", "name": "geo" }));

        let registry = UnitRegistry::open(dir.path(), echo_table(&["1"])).unwrap();
        // Still listed, flagged unavailable.
        let geo = registry.get(UnitId::major(2)).unwrap();
        assert!(!geo.available);
        // Excluded from plan computation.
        let plan_ids: Vec<_> = registry.plan_descriptors().iter().map(|d| d.id).collect();
        assert_eq!(plan_ids, vec![UnitId::major(1)]);
        assert!(registry.load_producer(UnitId::major(2)).is_err());
    }

    #[test]
    fn rescan_picks_up_removed_and_added_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(dir.path(), "unit_1_seed.json", json!({ "id": "1", "name": "seed" }));
        write_descriptor(dir.path(), "unit_2_geo.json", json!({ "id": "2", "name": "geo" }));

        let registry = UnitRegistry::open(dir.path(), echo_table(&["1", "2", "3"])).unwrap();
        assert_eq!(registry.list().len(), 2);

        fs::remove_file(dir.path().join("unit_2_geo.json")).unwrap();
        write_descriptor(dir.path(), "unit_3_flora.json", json!({ "id": "3", "name": "flora" }));
        registry.rescan().unwrap();

        let ids: Vec<_> = registry.list().iter().map(|u| u.descriptor.id).collect();
        assert_eq!(ids, vec![UnitId::major(1), UnitId::major(3)]);
        assert!(registry.get(UnitId::major(2)).is_none());
    }

    #[test]
    fn load_producer_is_lazy_and_memoised() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(dir.path(), "unit_1_seed.json", json!({ "id": "1", "name": "seed" }));

        let registry = UnitRegistry::open(dir.path(), echo_table(&["1"])).unwrap();
        let first = registry.load_producer(UnitId::major(1)).unwrap();
        let second = registry.load_producer(UnitId::major(1)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn disabled_descriptors_stay_visible_to_plan_computation() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(
            dir.path(),
            "unit_1_seed.json",
            json!({ "id": "1", "name": "seed", "enabled": false }),
        );
        let registry = UnitRegistry::open(dir.path(), echo_table(&["1"])).unwrap();
        // The graph builder decides what to do with disabled units; the
        // registry must not hide them.
        assert_eq!(registry.plan_descriptors().len(), 1);
        assert!(!registry.plan_descriptors()[0].enabled);
    }
}
