use std::path::Path;

pub use rusqlite::types::Value;
use rusqlite::{params, Connection, ToSql};
use tracing::debug;

use crate::errors::{Error, ParseError};
use crate::mcl;

/// A thin wrapper over one embedded sqlite connection. The store owns the
/// connection for the whole run; the database lives in memory unless a file
/// path is given, in which case the file remains afterwards for inspection.
pub struct SqliteStore {
    conn: Connection,
    stateful_ops_in_bulk_write: Option<u64>,
}

impl SqliteStore {
    pub fn open(db_path: Option<&Path>) -> Result<SqliteStore, Error> {
        let conn = match db_path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };

        Ok(SqliteStore {
            conn,
            stateful_ops_in_bulk_write: None,
        })
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Runs a statement that mutates state. Counted towards the bulk write
    /// commit cadence when a bulk write is active.
    pub fn execute(&mut self, sql: &str, params: &[&dyn ToSql]) -> Result<(), Error> {
        self.conn.prepare_cached(sql)?.execute(params)?;

        if let Some(ops) = self.stateful_ops_in_bulk_write.as_mut() {
            *ops += 1;
            // commit and reopen the transaction so memory and journal growth
            // stay bounded on large inputs
            if *ops % 100_000 == 0 {
                self.conn.execute_batch("commit transaction; begin transaction")?;
            }
        }

        Ok(())
    }

    pub fn batch(&mut self, sql: &str) -> Result<(), Error> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    pub fn start_bulk_write(&mut self) -> Result<(), Error> {
        self.stateful_ops_in_bulk_write = Some(0);
        self.conn.execute_batch("begin transaction")?;
        Ok(())
    }

    pub fn end_bulk_write(&mut self) -> Result<(), Error> {
        self.conn.execute_batch("commit transaction")?;
        self.stateful_ops_in_bulk_write = None;
        Ok(())
    }

    /// Runs a query and materializes the result with its column name
    /// descriptor.
    pub fn query_rows(&self, sql: &str, params: &[&dyn ToSql]) -> Result<QueryRows, Error> {
        let mut statement = self.conn.prepare(sql)?;
        let columns: Vec<String> = statement.column_names().iter().map(|c| c.to_string()).collect();

        let mut rows = statement.query(params)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for index in 0..columns.len() {
                values.push(row.get::<_, Value>(index)?);
            }
            out.push(values);
        }

        Ok(QueryRows { columns, rows: out })
    }
}

/// A query result: the column names and the materialized rows.
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

// When splitting read stats by query, do it proportionally to the second
// power of match identity. If there are multiple matches in a query + taxon
// + marker, return identity as max and coverage as a weighted average.
pub(crate) const PER_QUERY_COVERAGE: &str =
    "sum(a.coverage * a.identity * a.identity) / (m.total_weight_for_query) as coverage";
pub(crate) const PER_QUERY_WEIGHT_FRACTION: &str =
    "sum(a.identity * a.identity) / (m.total_weight_for_query) as weight_fraction, count(*) as num_alignments";

pub(crate) const MARKER_COVERAGE_STATS: &str = "sum(coverage) as marker_coverage";
pub(crate) const MARKER_READ_COUNT_STATS: &str = "sum(weight_fraction) as marker_read_count, \
     sum(num_alignments) as marker_alignment_count, avg(identity) as marker_avg_identity";
pub(crate) const MARKER_CPM_STATS: &str = "sum(coverage) / (?) * 1000000 as marker_cpm";

pub(crate) const TAXON_COVERAGE_STATS: &str = "avg(marker_coverage) as coverage";
pub(crate) const TAXON_READ_AND_MARKER_COUNT_STATS: &str =
    "sum(marker_read_count) as taxon_num_reads, sum(marker_alignment_count) as taxon_num_alignments, \
     count(marker) as taxon_num_markers, max(marker_read_count) as taxon_max_reads_in_marker";
pub(crate) const TAXON_CPM_STATS: &str = "avg(marker_coverage) / (?) * 1000000 as cpm";
pub(crate) const TAXON_ALL_STATS: &str =
    "avg(marker_coverage) as coverage, avg(marker_coverage) / (?) * 1000000 as cpm, \
     sum(marker_read_count) as taxon_num_reads, count(marker) as taxon_num_markers, \
     max(marker_read_count) as taxon_max_reads_in_marker";

pub(crate) fn marker_query(stats: &str, per_query_stats: &str) -> String {
    format!(
        "select taxon, marker, {stats} from (
           select
             a.query,
             a.taxon,
             a.marker,
             max(a.identity) as identity,
             {per_query_stats}
           from
             alignment a join (
             select query, sum(identity * identity) as total_weight_for_query
               from alignment group by query
             ) as m
           where a.query = m.query
           group by a.taxon, a.marker, a.query
         ) group by taxon, marker"
    )
}

pub(crate) fn taxon_query(stats: &str, marker_sql: &str) -> String {
    format!("select taxon, {stats} from ({marker_sql}) group by taxon")
}

const FILTER_TAXA_ON_MULTIPLE_MATCHES_SQL: &str = "
  select a.* from alignment a,
  (
    select taxon,
       count(*) as num_matches,
       sum(is_unique) as num_unique_matches,
       sum(is_best) as num_best_matches,
       sum(is_inferior) as num_inferior_matches
    from   (select a.taxon,
      s.num_taxa = 1 as is_unique,
      s.num_taxa > 1 and s.top_identity - max(a.identity) < 1e-6 as is_best,
      s.num_taxa > 1 and s.top_identity - max(a.identity) > 1e-6 as is_inferior
      from   alignment a,
           (select query,
               max(identity) as top_identity,
               count(distinct taxon) as num_taxa
          from   alignment
          group  by query) s
      where  a.query = s.query
      group by a.query, a.taxon
      )
    group  by taxon
  ) t
  where a.taxon = t.taxon and (t.num_unique_matches + t.num_best_matches) >= (?) * t.num_matches
";

// markers with only inferior alignments don't count
const FILTER_TAXA_ON_NUM_MARKERS_AND_READS_SQL: &str = "
  select a.* from alignment a,
  (
    select taxon,
    count(distinct marker) as num_markers,
    count(distinct query) as num_reads
    from   (
      select a.taxon, a.marker, a.query
      from   alignment a,
           (select query,
               max(identity) as top_identity,
               count(distinct taxon) as num_taxa
          from   alignment
          group  by query) s
      where  a.query = s.query
      group by a.query, a.taxon, a.marker
      having s.top_identity - max(a.identity) < 1e-6
      )
    group  by taxon
  ) t
  where a.taxon = t.taxon and t.num_markers >= (?) and t.num_reads >= (?)
";

const FILTER_TAXA_ON_AVG_IDENTITY_SQL: &str = "
  select a.* from alignment a,
  (
    select taxon,
      avg(top_identity) as avg_identity
    from   (select a.taxon,
            max(a.identity) as top_identity
            from alignment a
            group by a.query, a.taxon
            )
    group  by taxon
  ) t
  where a.taxon = t.taxon and t.avg_identity >= (?)
";

const FILTER_TAXA_ON_CLUSTER_AVERAGES_SQL: &str = "
  select a.* from alignment a,
  (
    select taxon,
      sum(higher_identity) as num_markers_at_least_cluster_average,
      sum(lower_identity) as num_markers_below_cluster_average
    from (
  select t1.*,
        t2.avg_cluster_identity,
        t2.num_taxa,
        t2.avg_cluster_identity - avg_identity < 1e-6 as higher_identity,
        t2.avg_cluster_identity - avg_identity >= 1e-6 as lower_identity
        from (
          select id, mc.taxon, mc.marker, count(distinct query) as num_matches, avg(identity) as avg_identity
            from marker_cluster mc, alignment a
            where mc.taxon = a.taxon and mc.marker = a.marker
            group by id, mc.taxon, mc.marker
        ) t1, (
        select id, avg(identity) as avg_cluster_identity, count(distinct mc.taxon) as num_taxa
            from marker_cluster mc, alignment a
            where mc.taxon = a.taxon and mc.marker = a.marker
            group by id
        ) t2
        where t1.id = t2.id
       )
    group by taxon
  ) t
  where a.taxon = t.taxon and num_markers_at_least_cluster_average >= (?) * num_markers_below_cluster_average
";

const TRANSFORM_TAXA_ON_THRESHOLDS_AND_CLUSTERS_SQL: &str = "
select t.mapped_taxon as taxon, a.marker, a.query, a.identity, a.coverage from alignment a,
(
    select tc.taxon as original_taxon, tc.taxon as mapped_taxon
    from taxon_cluster tc, alignment al
    where tc.taxon = al.taxon
    group by tc.id, tc.taxon
    having avg(al.identity) >= (?)

    union

    select
      tc.taxon as original_taxon,
      m.mapped_taxon
    from taxon_cluster tc,
    (
      select id, '?' || group_concat(taxon order by taxon) as mapped_taxon
      from (
        select tc.id,
          tc.taxon,
          count(distinct al.marker) as num_markers,
          count(distinct al.query) as num_reads,
          avg(al.identity) as avg_identity
        from taxon_cluster tc, alignment al
        where tc.taxon = al.taxon
        group by tc.id, tc.taxon
      ) group by id
      having
      (?) > 0 and max(avg_identity) < (?)
      and count(distinct taxon) >= (?) and sum(num_markers) >= (?) and sum(num_reads) >= (?)
    ) m
    where tc.id = m.id
) t
where a.taxon = t.original_taxon
";

const COUNTS_OF_COMMON_MATCHES_IN_MARKERS_SQL: &str = "
select
       a.taxon at,
       a.marker am,
       b.taxon bt,
       b.marker bm,
       count(distinct a.query)
from   alignment a,
       alignment b
where  a.query = b.query
group by at, bt, am, bm
";

pub(crate) const COUNTS_OF_COMMON_MATCHES_IN_TAXA_SQL: &str = "
select aa.at as taxon_a, aa.bt as taxon_b, cast(sum_shared as real) / aaa.num_queries as shared_queries_fraction from
(
    select at, bt, count(*) as sum_shared
    from (
      select
           a.taxon at,
           b.taxon bt,
           a.query
      from   alignment a,
           alignment b
      where  a.query = b.query
      group by at, bt, a.query
    ) group by at, bt
) aa,
(
  select taxon, count(distinct query) as num_queries from alignment
  group by taxon
) aaa
where aa.at = aaa.taxon
";

pub(crate) const TAXA_IN_MARKER_CLUSTERS_SQL: &str = "
select t1.id as cluster_id, t1.taxon, t1.marker, t1.num_matches, t1.avg_identity, t2.avg_cluster_identity
from (
  select id, mc.taxon, mc.marker, count(distinct query) as num_matches, avg(identity) as avg_identity
    from marker_cluster mc, alignment a
    where mc.taxon = a.taxon and mc.marker = a.marker
    group by id, mc.taxon, mc.marker
) t1, (
  select id, avg(identity) as avg_cluster_identity
    from marker_cluster mc, alignment a
    where mc.taxon = a.taxon and mc.marker = a.marker
    group by id
) t2
where t1.id = t2.id
";

/// The relational core of the pipeline: per alignment rows plus the derived
/// cluster tables, with a chain of table rewriting filters. Each filter
/// builds a new alignment table and keeps the previous one as a
/// `alignment_pre_filter_on_*` snapshot.
pub struct AlignmentStore {
    store: SqliteStore,
}

impl AlignmentStore {
    pub fn new(db_path: Option<&Path>) -> Result<AlignmentStore, Error> {
        let mut store = SqliteStore::open(db_path)?;
        store.batch(
            "create table alignment (
              taxon text not null,
              marker text not null,
              query text not null,
              identity real not null,
              coverage real not null
            );",
        )?;

        Ok(AlignmentStore { store })
    }

    pub fn start_bulk_write(&mut self) -> Result<(), Error> {
        self.store.start_bulk_write()
    }

    pub fn end_bulk_write(&mut self) -> Result<(), Error> {
        self.store.end_bulk_write()
    }

    pub fn add_alignment(
        &mut self,
        taxon: &str,
        marker: &str,
        query: &str,
        identity: f64,
        coverage: f64,
    ) -> Result<(), Error> {
        self.store.execute(
            "insert into alignment (taxon, marker, query, identity, coverage) values (?,?,?,?,?)",
            params![taxon, marker, query, identity, coverage],
        )
    }

    pub fn query_rows(&self, sql: &str, params: &[&dyn ToSql]) -> Result<QueryRows, Error> {
        self.store.query_rows(sql, params)
    }

    /// Replaces the alignment table with the result of a select over it,
    /// keeping the previous table under a snapshot name.
    fn modify_table(&mut self, op: &str, select_sql: &str, params: &[&dyn ToSql]) -> Result<(), Error> {
        debug!(op, "Rewriting the alignment table");
        self.store.batch("begin transaction")?;
        self.store
            .execute(&format!("create table new as {select_sql}"), params)?;
        self.store
            .batch(&format!("alter table alignment rename to alignment_pre_filter_on_{op}"))?;
        self.store.batch("alter table new rename to alignment")?;
        self.store.batch("commit transaction")?;
        Ok(())
    }

    pub fn modify_table_filter_taxa_on_multiple_matches(
        &mut self,
        min_fraction_primary_matches: f64,
    ) -> Result<(), Error> {
        self.modify_table(
            "multiple_matches",
            FILTER_TAXA_ON_MULTIPLE_MATCHES_SQL,
            params![min_fraction_primary_matches],
        )
    }

    pub fn modify_table_filter_taxa_on_num_markers_and_reads(
        &mut self,
        min_num_markers: u64,
        min_num_reads: u64,
    ) -> Result<(), Error> {
        self.modify_table(
            "num_markers",
            FILTER_TAXA_ON_NUM_MARKERS_AND_READS_SQL,
            params![min_num_markers as i64, min_num_reads as i64],
        )
    }

    pub fn modify_table_filter_taxa_on_avg_identity(&mut self, min_avg_identity: f64) -> Result<(), Error> {
        self.modify_table("avg_identity", FILTER_TAXA_ON_AVG_IDENTITY_SQL, params![min_avg_identity])
    }

    pub fn modify_table_filter_taxa_on_cluster_averages(
        &mut self,
        min_better_cluster_averages_ratio: f64,
    ) -> Result<(), Error> {
        self.modify_table(
            "cluster_averages",
            FILTER_TAXA_ON_CLUSTER_AVERAGES_SQL,
            params![min_better_cluster_averages_ratio],
        )
    }

    /// The final mutation: taxa below the identity threshold are either
    /// relabeled together with their cluster mates into one synthetic
    /// unknown taxon, or dropped.
    pub fn modify_table_transform_taxa_on_thresholds_and_clusters(
        &mut self,
        threshold_identity: f64,
        min_num_taxa_below_identity: u64,
        min_num_markers_below_identity: u64,
        min_num_reads_below_identity: u64,
    ) -> Result<(), Error> {
        let try_return_unknown_taxa: i64 = if min_num_taxa_below_identity > 0
            || min_num_markers_below_identity > 0
            || min_num_reads_below_identity > 0
        {
            1
        } else {
            0
        };

        self.modify_table(
            "thresholds_and_clusters",
            TRANSFORM_TAXA_ON_THRESHOLDS_AND_CLUSTERS_SQL,
            params![
                threshold_identity,
                try_return_unknown_taxa,
                threshold_identity,
                min_num_taxa_below_identity as i64,
                min_num_markers_below_identity as i64,
                min_num_reads_below_identity as i64,
            ],
        )
    }

    /// Clusters (taxon, marker) pairs that share queries. Edge weight is the
    /// number of distinct shared queries.
    pub fn cluster_markers_by_matches(&mut self) -> Result<(), Error> {
        let edges = {
            let conn = self.store.connection();
            let mut statement = conn.prepare(COUNTS_OF_COMMON_MATCHES_IN_MARKERS_SQL)?;
            let rows = statement.query_map([], |row| {
                Ok((
                    format!("{}\t{}", row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                    format!("{}\t{}", row.get::<_, String>(2)?, row.get::<_, String>(3)?),
                    row.get::<_, f64>(4)?,
                ))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let clusters = mcl::clusters(&edges);

        self.store.batch(
            "create table marker_cluster (
              id integer not null,
              taxon text not null,
              marker text not null
            );",
        )?;

        self.start_bulk_write()?;
        for (index, cluster) in clusters.iter().enumerate() {
            let cluster_id = (index + 1) as i64;
            for member in cluster {
                let (taxon, marker) = member
                    .split_once('\t')
                    .ok_or_else(|| ParseError::InvalidValue(member.clone()))?;
                self.store.execute(
                    "insert into marker_cluster (id, taxon, marker) values (?,?,?)",
                    params![cluster_id, taxon, marker],
                )?;
            }
        }
        self.end_bulk_write()?;

        Ok(())
    }

    /// Clusters taxa that share queries. Edge weight is the fraction of the
    /// first taxon's distinct queries that also hit the second; the
    /// asymmetry is intentional.
    pub fn cluster_taxa_by_matches(&mut self) -> Result<(), Error> {
        let edges = {
            let conn = self.store.connection();
            let mut statement = conn.prepare(COUNTS_OF_COMMON_MATCHES_IN_TAXA_SQL)?;
            let rows = statement.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let clusters = mcl::clusters(&edges);
        self.store_taxon_clusters(&clusters)
    }

    /// Stores a ready made taxon partition. Split out so the transform can
    /// be exercised against hand built clusters.
    pub fn store_taxon_clusters(&mut self, clusters: &[Vec<String>]) -> Result<(), Error> {
        self.store.batch(
            "create table taxon_cluster (
              id integer not null,
              taxon text not null
            );",
        )?;

        self.start_bulk_write()?;
        for (index, cluster) in clusters.iter().enumerate() {
            let cluster_id = (index + 1) as i64;
            for taxon in cluster {
                self.store.execute(
                    "insert into taxon_cluster (id, taxon) values (?,?)",
                    params![cluster_id, taxon],
                )?;
            }
        }
        self.end_bulk_write()?;

        Ok(())
    }
}
