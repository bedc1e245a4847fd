//! Pairing driver: finds matching rows between tables.
//!
//! Rows are pruned by coverage or match bounds, binned by the engine,
//! sorted by bin key and scanned for runs sharing a key. Each candidate
//! pair is scored. Pair matches reduce the survivors according to a
//! [`PairMode`]; group matches merge them into groups of linked rows.

use std::collections::BTreeMap;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::coverage::{Coverage, CoverageTest, FrozenCoverage};
use crate::engine::{MatchEngine, MatchKit, NdRange};
use crate::sort::{int_sort, parallel_int_sort};
use crate::table::RowSource;
use crate::tuple::{BinKey, Tuple};
use crate::{MatchError, Result};

/// Which of the matching pairs are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairMode {
    /// Every matching pair.
    #[default]
    All,
    /// One-to-one: each row appears in at most one pair, best scores first.
    Best,
    /// The best match for each row of the first table.
    Best1,
    /// The best match for each row of the second table.
    Best2,
}

/// How one table's rows decide whether a group is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultiJoinType {
    /// No constraint.
    #[default]
    Default,
    /// Groups must hold a row of this table.
    Match,
    /// Groups must not hold a row of this table.
    NoMatch,
    /// Every row of this table is reported, alone if it matched nothing.
    Always,
}

impl MultiJoinType {
    /// Whether a group that does (or does not) hold a row of this table
    /// may be reported.
    pub fn accepts(self, present: bool) -> bool {
        match self {
            MultiJoinType::Match => present,
            MultiJoinType::NoMatch => !present,
            MultiJoinType::Default | MultiJoinType::Always => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Reduction of pair matches. Group matches ignore it.
    pub pair_mode: PairMode,
    /// Prune rows using the engine's coverage.
    pub use_coverage: bool,
    /// Bin, sort and score on the rayon pool.
    pub parallel: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            pair_mode: PairMode::All,
            use_coverage: true,
            parallel: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchPair {
    pub row_a: usize,
    pub row_b: usize,
    pub score: f64,
}

/// A row of one of the input tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowRef {
    pub table: usize,
    pub row: usize,
}

impl RowRef {
    pub fn new(table: usize, row: usize) -> Self {
        Self { table, row }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupRow {
    pub row: RowRef,
    /// Score against the reference row; only multi-pair partners have one.
    pub score: Option<f64>,
}

/// Rows reported together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchGroup {
    /// Sorted by table, then row.
    pub members: Vec<GroupRow>,
}

impl MatchGroup {
    fn unscored(rows: impl IntoIterator<Item = RowRef>) -> Self {
        Self {
            members: rows
                .into_iter()
                .map(|row| GroupRow { row, score: None })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = RowRef> + '_ {
        self.members.iter().map(|m| m.row)
    }

    /// First row of `table` in the group.
    pub fn row_in(&self, table: usize) -> Option<usize> {
        self.rows().find(|r| r.table == table).map(|r| r.row)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchStats {
    /// Rows dropped by coverage or bounds pruning.
    pub rows_excluded: usize,
    /// (bin, row) references sorted.
    pub references: usize,
    /// Distinct bins among the references.
    pub bins: usize,
    /// Distinct candidate pairs scored.
    pub candidates: usize,
    /// Pairs reported, or for group matches the matching pairs linked.
    pub pairs: usize,
    /// Groups reported.
    pub groups: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PairMatches {
    /// Sorted by `(row_a, row_b)`.
    pub pairs: Vec<MatchPair>,
    pub stats: MatchStats,
}

#[derive(Debug, Clone, Default)]
pub struct GroupMatches {
    /// Ordered by member rows.
    pub groups: Vec<MatchGroup>,
    pub stats: MatchStats,
}

/// Pruning applied to one table's rows before binning.
enum RowFilter {
    All,
    Nothing,
    Coverage(FrozenCoverage),
    Bounds(NdRange),
}

enum RowTest<'a> {
    All,
    Nothing,
    Coverage(CoverageTest<'a>),
    Bounds(&'a NdRange, Vec<f64>),
}

impl RowFilter {
    fn create_test(&self) -> RowTest<'_> {
        match self {
            RowFilter::All => RowTest::All,
            RowFilter::Nothing => RowTest::Nothing,
            RowFilter::Coverage(c) => RowTest::Coverage(c.create_test()),
            RowFilter::Bounds(r) => RowTest::Bounds(r, vec![0.0; r.ndim()]),
        }
    }
}

impl RowTest<'_> {
    fn accept(&mut self, tuple: &Tuple) -> bool {
        match self {
            RowTest::All => true,
            RowTest::Nothing => false,
            RowTest::Coverage(test) => test.test(tuple),
            RowTest::Bounds(range, scratch) => {
                tuple.finite_f64s_into(scratch) && range.contains(scratch)
            }
        }
    }
}

/// Per-thread binning state.
struct RowBinner<'a> {
    kit: Box<dyn MatchKit + 'a>,
    test: RowTest<'a>,
}

impl<'a> RowBinner<'a> {
    fn new(engine: &'a dyn MatchEngine, filter: &'a RowFilter) -> Self {
        Self {
            kit: engine.create_match_kit(),
            test: filter.create_test(),
        }
    }

    /// Bins of one row, or `None` if the row was pruned.
    fn bin(&mut self, table: &dyn RowSource, irow: usize) -> Option<Vec<BinKey>> {
        let tuple = table.tuple(irow);
        if self.test.accept(&tuple) {
            Some(self.kit.bins(&tuple))
        } else {
            None
        }
    }
}

struct BinRef {
    key: BinKey,
    table: usize,
    row: usize,
}

fn bin_table(
    engine: &dyn MatchEngine,
    table: &dyn RowSource,
    itable: usize,
    filter: &RowFilter,
    parallel: bool,
    refs: &mut Vec<BinRef>,
) -> usize {
    let n = table.row_count();
    if matches!(filter, RowFilter::Nothing) {
        return n;
    }
    let per_row: Vec<Option<Vec<BinKey>>> = if parallel {
        (0..n)
            .into_par_iter()
            .map_init(
                || RowBinner::new(engine, filter),
                |binner, irow| binner.bin(table, irow),
            )
            .collect()
    } else {
        let mut binner = RowBinner::new(engine, filter);
        (0..n).map(|irow| binner.bin(table, irow)).collect()
    };
    let mut excluded = 0;
    for (row, bins) in per_row.into_iter().enumerate() {
        match bins {
            Some(keys) => refs.extend(keys.into_iter().map(|key| BinRef {
                key,
                table: itable,
                row,
            })),
            None => excluded += 1,
        }
    }
    excluded
}

/// Bin every table; returns the references and the count of pruned rows.
fn bin_tables(
    engine: &dyn MatchEngine,
    tables: &[&dyn RowSource],
    filters: &[RowFilter],
    parallel: bool,
) -> (Vec<BinRef>, usize) {
    let mut refs = Vec::new();
    let mut excluded = 0;
    for (itable, (&table, filter)) in tables.iter().zip(filters).enumerate() {
        excluded += bin_table(engine, table, itable, filter, parallel, &mut refs);
    }
    if excluded > 0 {
        info!("Rows excluded by pruning: {excluded}");
    }
    (refs, excluded)
}

fn sort_refs(refs: &[BinRef], parallel: bool) -> Result<Vec<i32>> {
    let n = i32::try_from(refs.len()).map_err(|_| MatchError::TooManyRows(refs.len()))?;
    let mut order: Vec<i32> = (0..n).collect();
    let cmp = |i: i32, j: i32| refs[i as usize].key.cmp(&refs[j as usize].key);
    if parallel {
        debug!("Sorting {} references in parallel", refs.len());
        parallel_int_sort(&mut order, cmp);
    } else {
        debug!("Sorting {} references sequentially", refs.len());
        int_sort(&mut order, cmp);
    }
    Ok(order)
}

/// Which rows sharing a bin become candidate pairs.
#[derive(Debug, Clone, Copy)]
enum PairRule {
    /// Distinct rows of a single table, lower row first.
    Internal,
    /// Rows of different tables, lower table first.
    CrossTable,
    /// A row of the given table, then a row of any other table.
    Reference(usize),
}

/// Walk runs of equal keys and collect candidate row pairs.
fn scan_runs(refs: &[BinRef], order: &[i32], rule: PairRule) -> (Vec<(RowRef, RowRef)>, usize) {
    let mut candidates = Vec::new();
    let mut nbins = 0;
    let mut start = 0;
    let mut run = Vec::new();
    while start < order.len() {
        let key = &refs[order[start] as usize].key;
        let mut end = start + 1;
        while end < order.len() && refs[order[end] as usize].key == *key {
            end += 1;
        }
        nbins += 1;
        run.clear();
        run.extend(order[start..end].iter().map(|&i| {
            let r = &refs[i as usize];
            RowRef::new(r.table, r.row)
        }));
        match rule {
            PairRule::Internal | PairRule::CrossTable => {
                run.sort_unstable();
                for (k, &p) in run.iter().enumerate() {
                    for &q in &run[k + 1..] {
                        let linked = match rule {
                            PairRule::Internal => p.row != q.row,
                            _ => p.table != q.table,
                        };
                        if linked {
                            candidates.push((p, q));
                        }
                    }
                }
            }
            PairRule::Reference(i0) => {
                for &p in run.iter().filter(|r| r.table == i0) {
                    for &q in run.iter().filter(|r| r.table != i0) {
                        candidates.push((p, q));
                    }
                }
            }
        }
        start = end;
    }
    (candidates, nbins)
}

/// A scored candidate pair that matched.
#[derive(Debug, Clone, Copy)]
struct Link {
    a: RowRef,
    b: RowRef,
    score: f64,
}

fn score_candidates(
    engine: &dyn MatchEngine,
    tables: &[&dyn RowSource],
    candidates: &[(RowRef, RowRef)],
    parallel: bool,
) -> Vec<Link> {
    if parallel {
        candidates
            .par_iter()
            .map_init(
                || engine.create_match_kit(),
                |kit, &pair| score_pair(kit.as_mut(), tables, pair),
            )
            .flatten()
            .collect()
    } else {
        let mut kit = engine.create_match_kit();
        candidates
            .iter()
            .filter_map(|&pair| score_pair(kit.as_mut(), tables, pair))
            .collect()
    }
}

fn score_pair(
    kit: &mut dyn MatchKit,
    tables: &[&dyn RowSource],
    (a, b): (RowRef, RowRef),
) -> Option<Link> {
    let score = kit.match_score(&tables[a.table].tuple(a.row), &tables[b.table].tuple(b.row));
    (score >= 0.0).then_some(Link { a, b, score })
}

fn dedupe(candidates: &mut Vec<(RowRef, RowRef)>, parallel: bool) {
    if parallel {
        candidates.par_sort_unstable();
    } else {
        candidates.sort_unstable();
    }
    candidates.dedup();
}

fn better(p: &MatchPair, q: &MatchPair) -> bool {
    p.score < q.score
}

/// Reduce scored pairs, sorted by (row_a, row_b), according to `mode`.
///
/// With `shared_rows` both columns index the same table, so one-to-one
/// selection treats a row used on either side as taken.
fn select_pairs(
    pairs: Vec<MatchPair>,
    mode: PairMode,
    nrows: (usize, usize),
    shared_rows: bool,
) -> Vec<MatchPair> {
    match mode {
        PairMode::All => pairs,
        PairMode::Best1 => best_per_row(pairs, nrows.0, |p| p.row_a),
        PairMode::Best2 => best_per_row(pairs, nrows.1, |p| p.row_b),
        PairMode::Best => {
            let mut ranked = pairs;
            ranked.sort_by(|p, q| {
                p.score
                    .total_cmp(&q.score)
                    .then(p.row_a.cmp(&q.row_a))
                    .then(p.row_b.cmp(&q.row_b))
            });
            let mut used_a = vec![false; nrows.0];
            let mut used_b = vec![false; nrows.1];
            let mut kept = Vec::new();
            for p in ranked {
                let (a, b) = (p.row_a, p.row_b);
                let taken = if shared_rows {
                    used_a[a] || used_a[b]
                } else {
                    used_a[a] || used_b[b]
                };
                if taken {
                    continue;
                }
                if shared_rows {
                    used_a[a] = true;
                    used_a[b] = true;
                } else {
                    used_a[a] = true;
                    used_b[b] = true;
                }
                kept.push(p);
            }
            kept.sort_by_key(|p| (p.row_a, p.row_b));
            kept
        }
    }
}

fn best_per_row(pairs: Vec<MatchPair>, nrows: usize, row: impl Fn(&MatchPair) -> usize) -> Vec<MatchPair> {
    let mut best: Vec<Option<MatchPair>> = vec![None; nrows];
    for p in pairs {
        let slot = &mut best[row(&p)];
        if slot.as_ref().is_none_or(|q| better(&p, q)) {
            *slot = Some(p);
        }
    }
    let mut kept: Vec<MatchPair> = best.into_iter().flatten().collect();
    kept.sort_by_key(|p| (p.row_a, p.row_b));
    kept
}

fn log_tuning(engine: &dyn MatchEngine) {
    for param in engine.tuning_parameters() {
        debug!("{} = {}", param.name(), param.value);
    }
}

/// `None` when every table is pruned away.
fn usable(filters: Vec<RowFilter>) -> Option<Vec<RowFilter>> {
    if filters.iter().all(|f| matches!(f, RowFilter::Nothing)) {
        None
    } else {
        Some(filters)
    }
}

/// Pruning filters, one per table, or `None` when no row can match.
///
/// `partners[i]` lists the tables whose rows may pair with rows of table
/// `i`. A row is kept when it can reach the region of any partner.
fn build_filters(
    engine: &dyn MatchEngine,
    tables: &[&dyn RowSource],
    partners: &[Vec<usize>],
    config: &MatchConfig,
) -> Result<Option<Vec<RowFilter>>> {
    if config.use_coverage {
        let coverage = engine.create_coverage();
        if !coverage.is_full() {
            let fill = |table: &&dyn RowSource| {
                let mut cov = coverage.clone();
                for irow in 0..table.row_count() {
                    cov.extend(&table.tuple(irow));
                }
                cov
            };
            let covs: Vec<Coverage> = if config.parallel {
                tables.par_iter().map(fill).collect()
            } else {
                tables.iter().map(fill).collect()
            };
            for (i, cov) in covs.iter().enumerate() {
                info!("Coverage of table {i}: {}", cov.coverage_text());
            }
            let mut filters = Vec::with_capacity(tables.len());
            for (i, own) in covs.iter().enumerate() {
                let mut reach = partners[i].iter().map(|&j| &covs[j]);
                let Some(first) = reach.next() else {
                    filters.push(RowFilter::Nothing);
                    continue;
                };
                let mut region = first.clone();
                for cov in reach {
                    region.union(cov)?;
                }
                region.intersection(own)?;
                info!("Coverage overlap for table {i}: {}", region.coverage_text());
                filters.push(if region.is_empty() {
                    RowFilter::Nothing
                } else {
                    RowFilter::Coverage(region.freeze())
                });
            }
            return Ok(usable(filters));
        }
    }
    if engine.can_bound_match() {
        let ndim = engine.tuple_infos().len();
        let ranges: Vec<NdRange> = tables
            .iter()
            .map(|table| {
                let mut range = NdRange::empty(ndim);
                let mut point = vec![0.0; ndim];
                for irow in 0..table.row_count() {
                    if table.tuple(irow).finite_f64s_into(&mut point) {
                        range.extend(&point);
                    }
                }
                range
            })
            .collect();
        let mut filters = Vec::with_capacity(tables.len());
        for (i, own) in ranges.iter().enumerate() {
            let mut bounds = NdRange::empty(ndim);
            for &j in &partners[i] {
                let pair = [own.clone(), ranges[j].clone()];
                bounds = bounds.union(&engine.match_bounds(&pair, 0)?)?;
            }
            info!(
                "Match bounds of table {i}: {:?}..{:?}",
                bounds.mins(),
                bounds.maxs()
            );
            filters.push(if bounds.is_empty() {
                RowFilter::Nothing
            } else {
                RowFilter::Bounds(bounds)
            });
        }
        return Ok(usable(filters));
    }
    Ok(Some(tables.iter().map(|_| RowFilter::All).collect()))
}

/// Stats for a match where pruning left nothing to bin.
fn all_excluded(tables: &[&dyn RowSource]) -> MatchStats {
    MatchStats {
        rows_excluded: tables.iter().map(|t| t.row_count()).sum(),
        ..MatchStats::default()
    }
}

/// Sort the references, then score every candidate pair sharing a bin.
/// Links come back sorted by row pair.
fn link_rows(
    engine: &dyn MatchEngine,
    tables: &[&dyn RowSource],
    refs: Vec<BinRef>,
    excluded: usize,
    rule: PairRule,
    config: &MatchConfig,
) -> Result<(Vec<Link>, MatchStats)> {
    let order = sort_refs(&refs, config.parallel)?;
    let (mut candidates, nbins) = scan_runs(&refs, &order, rule);
    drop(order);
    let nrefs = refs.len();
    drop(refs);
    if nbins > 0 {
        info!(
            "{} references in {} bins, average occupancy {:.2}",
            nrefs,
            nbins,
            nrefs as f64 / nbins as f64
        );
    }

    dedupe(&mut candidates, config.parallel);
    let links = score_candidates(engine, tables, &candidates, config.parallel);
    info!(
        "{} candidate pairs, {} matches",
        candidates.len(),
        links.len()
    );
    let stats = MatchStats {
        rows_excluded: excluded,
        references: nrefs,
        bins: nbins,
        candidates: candidates.len(),
        ..MatchStats::default()
    };
    Ok((links, stats))
}

/// Find pairs of rows, one from each table, that match under `engine`.
pub fn find_pair_matches(
    engine: &dyn MatchEngine,
    table_a: &dyn RowSource,
    table_b: &dyn RowSource,
    config: &MatchConfig,
) -> Result<PairMatches> {
    let start = Instant::now();
    let tables = [table_a, table_b];
    let nrows = (table_a.row_count(), table_b.row_count());
    info!(
        "Matching {} x {} rows with {} engine",
        nrows.0,
        nrows.1,
        engine.name()
    );
    log_tuning(engine);

    let Some(filters) = build_filters(engine, &tables, &[vec![1], vec![0]], config)? else {
        info!("No overlap between tables; no pairs possible");
        return Ok(PairMatches {
            pairs: Vec::new(),
            stats: all_excluded(&tables),
        });
    };
    let (refs, excluded) = bin_tables(engine, &tables, &filters, config.parallel);
    let rule = PairRule::Reference(0);
    let (links, stats) = link_rows(engine, &tables, refs, excluded, rule, config)?;
    Ok(reduce_pairs(links, stats, nrows, false, config, start))
}

/// Find pairs of distinct rows within one table that match under `engine`.
///
/// Pairs have `row_a < row_b`.
pub fn find_internal_matches(
    engine: &dyn MatchEngine,
    table: &dyn RowSource,
    config: &MatchConfig,
) -> Result<PairMatches> {
    let start = Instant::now();
    info!(
        "Internal match of {} rows with {} engine",
        table.row_count(),
        engine.name()
    );
    log_tuning(engine);
    let tables = [table];
    let (refs, excluded) = bin_tables(engine, &tables, &[RowFilter::All], config.parallel);
    let (links, stats) = link_rows(engine, &tables, refs, excluded, PairRule::Internal, config)?;
    let n = table.row_count();
    Ok(reduce_pairs(links, stats, (n, n), true, config, start))
}

fn reduce_pairs(
    links: Vec<Link>,
    mut stats: MatchStats,
    nrows: (usize, usize),
    shared_rows: bool,
    config: &MatchConfig,
    start: Instant,
) -> PairMatches {
    let scored = links
        .into_iter()
        .map(|l| MatchPair {
            row_a: l.a.row,
            row_b: l.b.row,
            score: l.score,
        })
        .collect();
    let pairs = select_pairs(scored, config.pair_mode, nrows, shared_rows);
    info!(
        "{} pairs kept ({:?}) in {:.3}s",
        pairs.len(),
        config.pair_mode,
        start.elapsed().as_secs_f64()
    );
    stats.pairs = pairs.len();
    PairMatches { pairs, stats }
}

/// Union-find over row indices, with path halving.
struct DisjointSets {
    parent: Vec<usize>,
}

impl DisjointSets {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, i: usize, j: usize) {
        let (ri, rj) = (self.find(i), self.find(j));
        if ri != rj {
            self.parent[ri.max(rj)] = ri.min(rj);
        }
    }
}

/// Rows joined directly or through other rows, one sorted list per
/// connected set. Rows in no link are left out.
fn agglomerate(links: &[Link], tables: &[&dyn RowSource]) -> Vec<Vec<RowRef>> {
    let mut offsets = Vec::with_capacity(tables.len());
    let mut total = 0;
    for table in tables {
        offsets.push(total);
        total += table.row_count();
    }
    let index = |r: RowRef| offsets[r.table] + r.row;
    let mut sets = DisjointSets::new(total);
    for link in links {
        sets.union(index(link.a), index(link.b));
    }
    let mut components: BTreeMap<usize, Vec<RowRef>> = BTreeMap::new();
    for link in links {
        for r in [link.a, link.b] {
            components.entry(sets.find(index(r))).or_default().push(r);
        }
    }
    components
        .into_values()
        .map(|mut rows| {
            rows.sort_unstable();
            rows.dedup();
            rows
        })
        .collect()
}

fn check_join_types(tables: &[&dyn RowSource], join_types: &[MultiJoinType]) -> Result<()> {
    if tables.len() < 2 {
        return Err(MatchError::TooFewTables(tables.len()));
    }
    if join_types.len() != tables.len() {
        return Err(MatchError::JoinTypeCount {
            tables: tables.len(),
            join_types: join_types.len(),
        });
    }
    Ok(())
}

/// Add lone rows for `Always` tables, drop groups the join types reject,
/// and order the rest by their rows.
fn finish_groups(
    mut groups: Vec<MatchGroup>,
    tables: &[&dyn RowSource],
    join_types: &[MultiJoinType],
    mut stats: MatchStats,
    start: Instant,
) -> GroupMatches {
    let mut singles = Vec::new();
    for (itable, join) in join_types.iter().enumerate() {
        if *join != MultiJoinType::Always {
            continue;
        }
        let mut used = vec![false; tables[itable].row_count()];
        for r in groups.iter().flat_map(|g| g.rows()) {
            if r.table == itable {
                used[r.row] = true;
            }
        }
        singles.extend(
            used.iter()
                .enumerate()
                .filter(|&(_, &u)| !u)
                .map(|(row, _)| MatchGroup::unscored([RowRef::new(itable, row)])),
        );
    }
    if !singles.is_empty() {
        debug!("Adding {} unmatched rows", singles.len());
    }
    groups.extend(singles);

    groups.retain(|g| {
        join_types
            .iter()
            .enumerate()
            .all(|(itable, join)| join.accepts(g.row_in(itable).is_some()))
    });
    groups.sort_by(|g, h| g.rows().cmp(h.rows()));
    info!(
        "{} groups kept in {:.3}s",
        groups.len(),
        start.elapsed().as_secs_f64()
    );
    stats.groups = groups.len();
    GroupMatches { groups, stats }
}

/// Gather rows of several tables into groups of mutual matches.
///
/// Every matching pair between rows of different tables links the two
/// rows, and linked rows form one group. A group holds at most one row per
/// table: where several rows of a table were linked, the lowest-numbered
/// one is kept. `join_types` has one entry per table and decides which
/// groups are reported.
pub fn find_group_matches(
    engine: &dyn MatchEngine,
    tables: &[&dyn RowSource],
    join_types: &[MultiJoinType],
    config: &MatchConfig,
) -> Result<GroupMatches> {
    check_join_types(tables, join_types)?;
    let start = Instant::now();
    info!(
        "Group match of {} tables with {} engine",
        tables.len(),
        engine.name()
    );
    log_tuning(engine);

    let n = tables.len();
    let partners: Vec<Vec<usize>> = (0..n)
        .map(|i| (0..n).filter(|&j| j != i).collect())
        .collect();
    let (links, mut stats) = match build_filters(engine, tables, &partners, config)? {
        Some(filters) => {
            let (refs, excluded) = bin_tables(engine, tables, &filters, config.parallel);
            link_rows(engine, tables, refs, excluded, PairRule::CrossTable, config)?
        }
        None => {
            info!("No overlap between tables; no links possible");
            (Vec::new(), all_excluded(tables))
        }
    };
    stats.pairs = links.len();

    let mut groups = Vec::new();
    for mut rows in agglomerate(&links, tables) {
        rows.dedup_by_key(|r| r.table);
        if rows.len() > 1 {
            groups.push(MatchGroup::unscored(rows));
        }
    }
    Ok(finish_groups(groups, tables, join_types, stats, start))
}

/// Match every other table against the reference table `index0`.
///
/// Each reference row that matched anything gives one group: the row
/// itself (without a score) and its partners (with their scores). With
/// `best_only` only the best partner from each other table is kept. Rows
/// of non-reference tables are never compared with each other.
pub fn find_multi_pair_matches(
    engine: &dyn MatchEngine,
    tables: &[&dyn RowSource],
    index0: usize,
    best_only: bool,
    join_types: &[MultiJoinType],
    config: &MatchConfig,
) -> Result<GroupMatches> {
    check_join_types(tables, join_types)?;
    if index0 >= tables.len() {
        return Err(MatchError::invalid_parameter("reference table", index0));
    }
    let start = Instant::now();
    info!(
        "Multi-pair match of {} tables against table {index0} with {} engine",
        tables.len(),
        engine.name()
    );
    log_tuning(engine);

    let partners: Vec<Vec<usize>> = (0..tables.len())
        .map(|i| {
            if i == index0 {
                (0..tables.len()).filter(|&j| j != index0).collect()
            } else {
                vec![index0]
            }
        })
        .collect();
    let (links, mut stats) = match build_filters(engine, tables, &partners, config)? {
        Some(filters) => {
            let (refs, excluded) = bin_tables(engine, tables, &filters, config.parallel);
            link_rows(engine, tables, refs, excluded, PairRule::Reference(index0), config)?
        }
        None => {
            info!("No overlap with the reference table; no pairs possible");
            (Vec::new(), all_excluded(tables))
        }
    };
    stats.pairs = links.len();

    let mut by_reference: BTreeMap<usize, Vec<Link>> = BTreeMap::new();
    for link in links {
        by_reference.entry(link.a.row).or_default().push(link);
    }
    let mut groups = Vec::with_capacity(by_reference.len());
    for (row0, mut linked) in by_reference {
        if best_only {
            linked.sort_by(|p, q| {
                p.b.table
                    .cmp(&q.b.table)
                    .then(p.score.total_cmp(&q.score))
                    .then(p.b.row.cmp(&q.b.row))
            });
            linked.dedup_by_key(|p| p.b.table);
        }
        let mut members = vec![GroupRow {
            row: RowRef::new(index0, row0),
            score: None,
        }];
        members.extend(linked.iter().map(|l| GroupRow {
            row: l.b,
            score: Some(l.score),
        }));
        members.sort_by_key(|m| m.row);
        groups.push(MatchGroup { members });
    }
    Ok(finish_groups(groups, tables, join_types, stats, start))
}

/// Gather rows of one table into groups of mutual matches.
///
/// Rows linked directly or through other rows form one group. With
/// `include_singles` every row that matched nothing is reported as a group
/// of its own.
pub fn find_internal_groups(
    engine: &dyn MatchEngine,
    table: &dyn RowSource,
    include_singles: bool,
    config: &MatchConfig,
) -> Result<GroupMatches> {
    let start = Instant::now();
    info!(
        "Internal grouping of {} rows with {} engine",
        table.row_count(),
        engine.name()
    );
    log_tuning(engine);
    let tables = [table];
    let (refs, excluded) = bin_tables(engine, &tables, &[RowFilter::All], config.parallel);
    let (links, mut stats) =
        link_rows(engine, &tables, refs, excluded, PairRule::Internal, config)?;
    stats.pairs = links.len();
    let groups = agglomerate(&links, &tables)
        .into_iter()
        .map(MatchGroup::unscored)
        .collect();
    let join = if include_singles {
        MultiJoinType::Always
    } else {
        MultiJoinType::Default
    };
    Ok(finish_groups(groups, &tables, &[join], stats, start))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CartesianMatchEngine, Engine, EqualsMatchEngine, SkyMatchEngine};
    use crate::pixellator::SkyPixellator;
    use crate::table::TupleTable;
    use crate::tuple::Value;

    fn points(coords: &[&[f64]]) -> TupleTable {
        TupleTable::new(coords.iter().map(|c| Tuple::from_f64s(c)).collect())
    }

    fn rows(result: &PairMatches) -> Vec<(usize, usize)> {
        result.pairs.iter().map(|p| (p.row_a, p.row_b)).collect()
    }

    fn sequential() -> MatchConfig {
        MatchConfig {
            parallel: false,
            ..MatchConfig::default()
        }
    }

    #[test]
    fn cartesian_pairs_and_bounds_pruning() {
        let engine = CartesianMatchEngine::isotropic(1, 1.0).unwrap();
        let a = points(&[&[0.0], &[5.0], &[100.0]]);
        let b = points(&[&[0.5], &[5.9], &[7.0], &[-50.0]]);
        let config = MatchConfig {
            use_coverage: false,
            ..MatchConfig::default()
        };
        let result = find_pair_matches(&engine, &a, &b, &config).unwrap();
        assert_eq!(rows(&result), vec![(0, 0), (1, 1)]);
        // 100 and -50 lie outside the reachable bounds.
        assert_eq!(result.stats.rows_excluded, 2);
        assert!((result.pairs[1].score - 0.9).abs() < 1e-12);
    }

    #[test]
    fn coverage_pruning_gives_same_pairs() {
        let engine = CartesianMatchEngine::isotropic(2, 0.3).unwrap();
        let a = points(&[&[0.0, 0.0], &[1.0, 1.0], &[9.0, 9.0]]);
        let b = points(&[&[0.1, 0.1], &[1.2, 0.9], &[-9.0, 3.0]]);
        let with = find_pair_matches(&engine, &a, &b, &MatchConfig::default()).unwrap();
        let without = find_pair_matches(
            &engine,
            &a,
            &b,
            &MatchConfig {
                use_coverage: false,
                ..sequential()
            },
        )
        .unwrap();
        assert_eq!(rows(&with), rows(&without));
        assert_eq!(rows(&with), vec![(0, 0), (1, 1)]);
        assert_eq!(with.stats.rows_excluded, 2);
    }

    #[test]
    fn disjoint_coverage_short_circuits() {
        let engine = Engine::from(SkyMatchEngine::new(SkyPixellator::healpix(), 1e-4));
        let a = points(&[&[0.1, 0.1]]);
        let b = points(&[&[3.0, -0.5]]);
        let result = find_pair_matches(&engine, &a, &b, &MatchConfig::default()).unwrap();
        assert!(result.pairs.is_empty());
        assert_eq!(result.stats.rows_excluded, 2);
        assert_eq!(result.stats.references, 0);
    }

    #[test]
    fn equality_with_duplicates() {
        let engine = EqualsMatchEngine::new(1);
        let a = TupleTable::new(vec![
            Tuple::new(vec![Value::Int(1)]),
            Tuple::new(vec![Value::Int(2)]),
            Tuple::new(vec![Value::Null]),
        ]);
        let b = TupleTable::new(vec![
            Tuple::new(vec![Value::Double(2.0)]),
            Tuple::new(vec![Value::Long(1)]),
            Tuple::new(vec![Value::Long(1)]),
            Tuple::new(vec![Value::Null]),
        ]);
        let result = find_pair_matches(&engine, &a, &b, &sequential()).unwrap();
        assert_eq!(rows(&result), vec![(0, 1), (0, 2), (1, 0)]);
        let best = find_pair_matches(
            &engine,
            &a,
            &b,
            &MatchConfig {
                pair_mode: PairMode::Best,
                ..MatchConfig::default()
            },
        )
        .unwrap();
        assert_eq!(rows(&best), vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn internal_pairs_are_ordered() {
        let engine = CartesianMatchEngine::isotropic(1, 1.0).unwrap();
        let table = points(&[&[0.0], &[10.0], &[0.5], &[10.2], &[0.9]]);
        let result = find_internal_matches(&engine, &table, &MatchConfig::default()).unwrap();
        assert_eq!(rows(&result), vec![(0, 2), (0, 4), (1, 3), (2, 4)]);
        assert!(result.pairs.iter().all(|p| p.row_a < p.row_b));
        let best = find_internal_matches(
            &engine,
            &table,
            &MatchConfig {
                pair_mode: PairMode::Best,
                ..sequential()
            },
        )
        .unwrap();
        // 1-3 (0.2) is taken first, then 2-4 (0.4); 0 is left with no partner.
        assert_eq!(rows(&best), vec![(1, 3), (2, 4)]);
    }

    #[test]
    fn pair_modes() {
        let pair = |row_a, row_b, score| MatchPair { row_a, row_b, score };
        let scored = vec![
            pair(0, 0, 0.5),
            pair(0, 1, 0.1),
            pair(1, 1, 0.2),
            pair(2, 0, 0.3),
        ];
        let all = select_pairs(scored.clone(), PairMode::All, (3, 2), false);
        assert_eq!(all.len(), 4);
        let best1 = select_pairs(scored.clone(), PairMode::Best1, (3, 2), false);
        let r: Vec<_> = best1.iter().map(|p| (p.row_a, p.row_b)).collect();
        assert_eq!(r, vec![(0, 1), (1, 1), (2, 0)]);
        let best2 = select_pairs(scored.clone(), PairMode::Best2, (3, 2), false);
        let r: Vec<_> = best2.iter().map(|p| (p.row_a, p.row_b)).collect();
        assert_eq!(r, vec![(0, 1), (2, 0)]);
        let best = select_pairs(scored, PairMode::Best, (3, 2), false);
        let r: Vec<_> = best.iter().map(|p| (p.row_a, p.row_b)).collect();
        assert_eq!(r, vec![(0, 1), (2, 0)]);
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let mut state = 0x5eed_u64;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state as f64) / (u64::MAX as f64)
        };
        let a: Vec<Tuple> = (0..3000)
            .map(|_| Tuple::from_f64s(&[100.0 * next(), 100.0 * next()]))
            .collect();
        let b: Vec<Tuple> = (0..3000)
            .map(|_| Tuple::from_f64s(&[100.0 * next(), 100.0 * next()]))
            .collect();
        let (a, b) = (TupleTable::new(a), TupleTable::new(b));
        let engine = CartesianMatchEngine::isotropic(2, 0.5).unwrap();
        let par = find_pair_matches(&engine, &a, &b, &MatchConfig::default()).unwrap();
        let seq = find_pair_matches(&engine, &a, &b, &sequential()).unwrap();
        assert_eq!(par.pairs, seq.pairs);
        assert_eq!(par.stats, seq.stats);
        assert!(!par.pairs.is_empty());
    }

    fn group_rows(result: &GroupMatches) -> Vec<Vec<(usize, usize)>> {
        result
            .groups
            .iter()
            .map(|g| g.rows().map(|r| (r.table, r.row)).collect())
            .collect()
    }

    #[test]
    fn chained_rows_form_one_internal_group() {
        let engine = CartesianMatchEngine::isotropic(1, 1.0).unwrap();
        // 0-1 and 1-2 match, 0-2 does not; 3 is alone.
        let table = points(&[&[0.0], &[0.9], &[1.8], &[10.0], &[20.0], &[20.5]]);
        let result = find_internal_groups(&engine, &table, false, &sequential()).unwrap();
        assert_eq!(
            group_rows(&result),
            vec![vec![(0, 0), (0, 1), (0, 2)], vec![(0, 4), (0, 5)]]
        );
        assert_eq!(result.stats.pairs, 3);
        assert_eq!(result.stats.groups, 2);

        let with_singles =
            find_internal_groups(&engine, &table, true, &MatchConfig::default()).unwrap();
        assert_eq!(
            group_rows(&with_singles),
            vec![
                vec![(0, 0), (0, 1), (0, 2)],
                vec![(0, 3)],
                vec![(0, 4), (0, 5)]
            ]
        );
        assert!(with_singles.groups.iter().flat_map(|g| &g.members).all(|m| m.score.is_none()));
    }

    #[test]
    fn join_type_acceptance() {
        assert!(MultiJoinType::Default.accepts(false));
        assert!(MultiJoinType::Always.accepts(false));
        assert!(MultiJoinType::Match.accepts(true));
        assert!(!MultiJoinType::Match.accepts(false));
        assert!(MultiJoinType::NoMatch.accepts(false));
        assert!(!MultiJoinType::NoMatch.accepts(true));
    }

    #[test]
    fn groups_keep_one_row_per_table() {
        let engine = CartesianMatchEngine::isotropic(1, 1.0).unwrap();
        let a = points(&[&[0.0], &[0.5], &[50.0]]);
        let b = points(&[&[0.2], &[30.0]]);
        let tables: [&dyn RowSource; 2] = [&a, &b];
        let joins = [MultiJoinType::Default; 2];
        let result = find_group_matches(&engine, &tables, &joins, &sequential()).unwrap();
        // a0, a1 and b0 are linked; only a0 represents table 0.
        assert_eq!(group_rows(&result), vec![vec![(0, 0), (1, 0)]]);

        let joins = [MultiJoinType::Always, MultiJoinType::Default];
        let result = find_group_matches(&engine, &tables, &joins, &sequential()).unwrap();
        assert_eq!(
            group_rows(&result),
            vec![vec![(0, 0), (1, 0)], vec![(0, 1)], vec![(0, 2)]]
        );
    }

    #[test]
    fn group_argument_checks() {
        let engine = CartesianMatchEngine::isotropic(1, 1.0).unwrap();
        let a = points(&[&[0.0]]);
        let one: [&dyn RowSource; 1] = [&a];
        assert!(matches!(
            find_group_matches(&engine, &one, &[MultiJoinType::Default], &sequential()),
            Err(MatchError::TooFewTables(1))
        ));
        let two: [&dyn RowSource; 2] = [&a, &a];
        assert!(matches!(
            find_group_matches(&engine, &two, &[MultiJoinType::Default], &sequential()),
            Err(MatchError::JoinTypeCount { .. })
        ));
        let joins = [MultiJoinType::Default; 2];
        assert!(find_multi_pair_matches(&engine, &two, 2, false, &joins, &sequential()).is_err());
    }

    #[test]
    fn multi_pair_best_only() {
        let engine = CartesianMatchEngine::isotropic(1, 1.0).unwrap();
        let reference = points(&[&[0.0], &[10.0]]);
        let b = points(&[&[0.6], &[-0.3], &[10.1]]);
        let c = points(&[&[0.9]]);
        let tables: [&dyn RowSource; 3] = [&reference, &b, &c];
        let joins = [MultiJoinType::Default; 3];
        let all = find_multi_pair_matches(&engine, &tables, 0, false, &joins, &sequential()).unwrap();
        assert_eq!(
            group_rows(&all),
            vec![vec![(0, 0), (1, 0), (1, 1), (2, 0)], vec![(0, 1), (1, 2)]]
        );
        assert_eq!(all.groups[0].members[0].score, None);
        let best = find_multi_pair_matches(&engine, &tables, 0, true, &joins, &sequential()).unwrap();
        assert_eq!(
            group_rows(&best),
            vec![vec![(0, 0), (1, 1), (2, 0)], vec![(0, 1), (1, 2)]]
        );
        let score = best.groups[0].members[1].score.unwrap();
        assert!((score - 0.3).abs() < 1e-12);
    }
}
