// 🔗 Progressive Clustering Engine - merge leader names on key collision
// Each rule re-keys every surviving record; records sharing a key merge

use crate::error::{ClusterError, Result};
use crate::report::StepSink;
use crate::rules::{CompiledRule, Rule, RuleTable};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use tracing::{debug, info};

// ============================================================================
// NAME RECORD
// ============================================================================

/// One original record absorbed into a cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub name: String,
    pub weight: u64,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.weight)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRecord {
    /// Name this record was created from; never changes
    pub original_name: String,

    /// Working key, rewritten by every step
    pub key: String,

    /// Display name for the cluster
    pub canonical_name: String,

    /// Every original record absorbed, in merge order
    pub provenance: Vec<Provenance>,

    /// Sum of absorbed weights (lead count)
    pub weight: u64,
}

/// Which side of a `combine` call survived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Absorber {
    Receiver,
    Other,
}

impl NameRecord {
    pub fn new(name: &str, weight: u64) -> Self {
        NameRecord {
            original_name: name.to_string(),
            key: name.to_string(),
            canonical_name: name.to_string(),
            provenance: vec![Provenance {
                name: name.to_string(),
                weight,
            }],
            weight,
        }
    }

    /// Merge two records. The strictly heavier one absorbs the other;
    /// on equal weight the receiver absorbs. The absorbed record is left
    /// mirroring the absorber's weight and canonical name.
    pub fn combine(&mut self, other: &mut NameRecord) -> Absorber {
        if self.weight < other.weight {
            other.absorb(self);
            Absorber::Other
        } else {
            self.absorb(other);
            Absorber::Receiver
        }
    }

    fn absorb(&mut self, other: &mut NameRecord) {
        self.provenance.extend(other.provenance.iter().cloned());
        // Saturates at u64::MAX
        self.weight = self.weight.saturating_add(other.weight);

        other.weight = self.weight;
        other.canonical_name = self.canonical_name.clone();
    }

    pub fn member_count(&self) -> usize {
        self.provenance.len()
    }
}

/// Build records from `(name, weight)` pairs, rejecting duplicate names
pub fn records_from_pairs<I, S>(pairs: I) -> Result<Vec<NameRecord>>
where
    I: IntoIterator<Item = (S, u64)>,
    S: AsRef<str>,
{
    let records: Vec<NameRecord> = pairs
        .into_iter()
        .map(|(name, weight)| NameRecord::new(name.as_ref(), weight))
        .collect();

    check_unique(&records)?;
    Ok(records)
}

fn check_unique(records: &[NameRecord]) -> Result<()> {
    let mut seen = HashSet::with_capacity(records.len());
    for record in records {
        if !seen.insert(record.original_name.as_str()) {
            return Err(ClusterError::DuplicateName {
                name: record.original_name.clone(),
            });
        }
    }
    Ok(())
}

// ============================================================================
// STEP REPORT
// ============================================================================

/// A key where at least one merge happened, with the merged record's state
/// at the end of the step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeEntry {
    pub key: String,
    pub canonical_name: String,
    pub provenance: Vec<Provenance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// Zero-based step index
    pub step: usize,
    pub description: String,
    pub merges: Vec<MergeEntry>,
    /// One per collision, so a three-way collision counts twice
    pub merge_count: usize,
}

impl StepReport {
    pub fn has_merges(&self) -> bool {
        self.merge_count > 0
    }
}

// ============================================================================
// MERGE FOREST
// ============================================================================

/// Record arena plus disjoint-set parent links. Absorbed records stay in
/// the arena as tombstones pointing at their absorber.
struct MergeForest {
    records: Vec<NameRecord>,
    parent: Vec<usize>,
}

impl MergeForest {
    fn new(records: Vec<NameRecord>) -> Self {
        let parent = (0..records.len()).collect();
        MergeForest { records, parent }
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn find(&mut self, mut id: usize) -> usize {
        // Path halving
        while self.parent[id] != id {
            self.parent[id] = self.parent[self.parent[id]];
            id = self.parent[id];
        }
        id
    }

    /// Combine `earlier` with `later`, returning the survivor's id
    fn merge(&mut self, earlier: usize, later: usize) -> usize {
        let (first, second) = pair_mut(&mut self.records, earlier, later);

        let (absorber, absorbed) = match first.combine(second) {
            Absorber::Receiver => (earlier, later),
            Absorber::Other => (later, earlier),
        };

        self.parent[absorbed] = absorber;
        absorber
    }
}

fn pair_mut<T>(items: &mut [T], i: usize, j: usize) -> (&mut T, &mut T) {
    assert_ne!(i, j, "a record cannot merge with itself");
    if i < j {
        let (low, high) = items.split_at_mut(j);
        (&mut low[i], &mut high[0])
    } else {
        let (low, high) = items.split_at_mut(i);
        (&mut high[0], &mut low[j])
    }
}

// ============================================================================
// RUN OUTCOME
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// One record per surviving cluster, in working order
    pub clusters: Vec<NameRecord>,
    pub reports: Vec<StepReport>,
    pub total_merges: usize,

    /// Original name -> index into `clusters`
    #[serde(skip)]
    membership: HashMap<String, usize>,
}

impl RunOutcome {
    /// Cluster that absorbed `original_name`, or that it survives as
    pub fn cluster_of(&self, original_name: &str) -> Option<&NameRecord> {
        self.membership
            .get(original_name)
            .map(|&index| &self.clusters[index])
    }

    pub fn multi_member_clusters(&self) -> impl Iterator<Item = &NameRecord> {
        self.clusters.iter().filter(|c| c.member_count() > 1)
    }

    pub fn total_weight(&self) -> u64 {
        self.clusters
            .iter()
            .fold(0u64, |total, c| total.saturating_add(c.weight))
    }
}

// ============================================================================
// CLUSTERING ENGINE
// ============================================================================

pub struct ClusterEngine {
    table: RuleTable,
}

impl ClusterEngine {
    /// Compile `rules`; fails before any record is touched
    pub fn new(rules: &[Rule]) -> Result<Self> {
        Ok(ClusterEngine {
            table: RuleTable::compile(rules)?,
        })
    }

    pub fn with_default_rules() -> Result<Self> {
        Ok(ClusterEngine {
            table: RuleTable::defaults()?,
        })
    }

    pub fn from_table(table: RuleTable) -> Self {
        ClusterEngine { table }
    }

    pub fn rules(&self) -> &RuleTable {
        &self.table
    }

    /// Run every step without a report sink
    pub fn run(&self, records: Vec<NameRecord>) -> Result<RunOutcome> {
        self.run_with_sink(records, &mut |_: &StepReport| -> io::Result<()> { Ok(()) })
    }

    /// Run every step, handing each step report to `sink` before the next
    /// step starts. A sink error of kind `Interrupted` aborts the review.
    pub fn run_with_sink<S>(&self, records: Vec<NameRecord>, sink: &mut S) -> Result<RunOutcome>
    where
        S: StepSink + ?Sized,
    {
        check_unique(&records)?;

        info!(
            "Clustering {} leader names through {} steps",
            records.len(),
            self.table.len()
        );

        let mut forest = MergeForest::new(records);
        let mut working: Vec<usize> = (0..forest.len()).collect();
        let mut reports = Vec::with_capacity(self.table.len());
        let mut total_merges = 0;

        for rule in self.table.iter() {
            let (survivors, report) = run_step(rule, &mut forest, &working);

            info!(
                step = rule.step() + 1,
                merges = report.merge_count,
                remaining = survivors.len(),
                "{}",
                rule.description()
            );

            total_merges += report.merge_count;
            sink.on_step(&report).map_err(|source| {
                if source.kind() == io::ErrorKind::Interrupted {
                    ClusterError::ReviewAborted { step: rule.step() }
                } else {
                    ClusterError::Sink {
                        step: rule.step(),
                        source,
                    }
                }
            })?;

            reports.push(report);
            working = survivors;
        }

        Ok(finish(forest, working, reports, total_merges))
    }

    /// Apply one step in isolation to fresh records, to see what that rule
    /// alone would merge across the whole corpus
    pub fn validate_step(&self, records: Vec<NameRecord>, step: usize) -> Result<StepReport> {
        let rule = self.table.get(step).ok_or(ClusterError::StepOutOfRange {
            step,
            len: self.table.len(),
        })?;
        check_unique(&records)?;

        let mut forest = MergeForest::new(records);
        let working: Vec<usize> = (0..forest.len()).collect();
        let (_, report) = run_step(rule, &mut forest, &working);

        Ok(report)
    }
}

/// Re-key every working record with `rule` and merge collisions.
/// Returns the survivors in first-seen key order.
fn run_step(
    rule: &CompiledRule,
    forest: &mut MergeForest,
    working: &[usize],
) -> (Vec<usize>, StepReport) {
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(working.len());
    let mut survivors: Vec<usize> = Vec::with_capacity(working.len());
    let mut merged_slots: Vec<usize> = Vec::new();
    let mut merge_count = 0;

    for &id in working {
        let key = rule.apply(&forest.records[id].key);
        forest.records[id].key = key.clone();

        match slots.get(&key) {
            Some(&slot) => {
                let current = survivors[slot];
                let survivor = forest.merge(current, id);
                let absorbed = if survivor == id { current } else { id };

                debug!(
                    key = %key,
                    absorbed = %forest.records[absorbed].original_name,
                    into = %forest.records[survivor].canonical_name,
                    "merged"
                );

                survivors[slot] = survivor;
                merge_count += 1;
                if !merged_slots.contains(&slot) {
                    merged_slots.push(slot);
                }
            }
            None => {
                slots.insert(key, survivors.len());
                survivors.push(id);
            }
        }
    }

    let merges = merged_slots
        .iter()
        .map(|&slot| {
            let record = &forest.records[survivors[slot]];
            MergeEntry {
                key: record.key.clone(),
                canonical_name: record.canonical_name.clone(),
                provenance: record.provenance.clone(),
            }
        })
        .collect();

    let report = StepReport {
        step: rule.step(),
        description: rule.description().to_string(),
        merges,
        merge_count,
    };

    (survivors, report)
}

fn finish(
    mut forest: MergeForest,
    working: Vec<usize>,
    reports: Vec<StepReport>,
    total_merges: usize,
) -> RunOutcome {
    let cluster_index: HashMap<usize, usize> = working
        .iter()
        .enumerate()
        .map(|(index, &id)| (id, index))
        .collect();

    let mut membership = HashMap::with_capacity(forest.len());
    for id in 0..forest.len() {
        let root = forest.find(id);
        membership.insert(
            forest.records[id].original_name.clone(),
            cluster_index[&root],
        );
    }

    let clusters = working
        .iter()
        .map(|&id| forest.records[id].clone())
        .collect();

    RunOutcome {
        clusters,
        reports,
        total_merges,
        membership,
    }
}

// ============================================================================
// TESTS
// ============================================================================
