//! Dataset partitioning and processing-time estimation
//!
//! Splits a large dataset into disjoint shards whose union is exactly the
//! input, either one-or-more sites per shard or contiguous row chunks.
//! `max_partitions` is a hard cap: once it is reached, whatever remains is
//! absorbed into the last shard rather than dropped.

use crate::data::{Dataset, DemandRecord};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;

/// How a dataset is split into partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStrategy {
    /// Group whole sites into partitions (recommended)
    Site,
    /// Contiguous row-count chunks
    Size,
}

impl Default for PartitionStrategy {
    fn default() -> Self {
        PartitionStrategy::Site
    }
}

/// Summary of a dataset used to decide the partitioning approach.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetAnalysis {
    pub total_rows: usize,
    pub distinct_sites: usize,
    pub distinct_partnumbers: usize,
    /// Per-site row counts, descending by volume
    pub site_distribution: Vec<(String, usize)>,
    /// True iff the row count exceeds the per-partition budget
    pub needs_partitioning: bool,
    pub recommended_partitions: usize,
}

/// Metadata derived from a partition's actual rows, never estimated.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionMetadata {
    pub rows: usize,
    pub sites: Vec<String>,
    pub site_count: usize,
    pub partnumber_count: usize,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub demand_sum: f64,
}

/// One disjoint shard of the input dataset.
#[derive(Debug, Clone)]
pub struct Partition {
    pub id: usize,
    pub data: Dataset,
    pub metadata: PartitionMetadata,
}

impl Partition {
    fn new(id: usize, data: Dataset) -> Self {
        let metadata = PartitionMetadata {
            rows: data.len(),
            sites: data.distinct_sites(),
            site_count: data.distinct_sites().len(),
            partnumber_count: data.distinct_partnumbers().len(),
            date_range: data.date_range(),
            demand_sum: data.demand_sum(),
        };
        Self { id, data, metadata }
    }
}

/// Plans how a dataset is split into independently processable partitions.
#[derive(Debug, Clone)]
pub struct PartitionPlanner {
    pub max_rows_per_partition: usize,
    pub strategy: PartitionStrategy,
    pub max_partitions: usize,
}

impl Default for PartitionPlanner {
    fn default() -> Self {
        Self {
            max_rows_per_partition: 2000,
            strategy: PartitionStrategy::default(),
            max_partitions: 20,
        }
    }
}

impl PartitionPlanner {
    pub fn new(
        max_rows_per_partition: usize,
        strategy: PartitionStrategy,
        max_partitions: usize,
    ) -> Self {
        Self {
            max_rows_per_partition: max_rows_per_partition.max(1),
            strategy,
            max_partitions: max_partitions.max(1),
        }
    }

    /// Analyze a dataset and recommend a partition count.
    pub fn analyze(&self, dataset: &Dataset) -> DatasetAnalysis {
        let total_rows = dataset.len();
        let site_distribution = dataset.site_distribution();
        let distinct_sites = site_distribution.len();
        let recommended = distinct_sites
            .min((total_rows / self.max_rows_per_partition).max(1))
            .min(self.max_partitions);
        DatasetAnalysis {
            total_rows,
            distinct_sites,
            distinct_partnumbers: dataset.distinct_partnumbers().len(),
            site_distribution,
            needs_partitioning: total_rows > self.max_rows_per_partition,
            recommended_partitions: recommended.max(1),
        }
    }

    /// Split the dataset into disjoint partitions.
    ///
    /// Invariant: every input row lands in exactly one partition.
    pub fn create_partitions(&self, dataset: &Dataset) -> Vec<Partition> {
        let analysis = self.analyze(dataset);

        if !analysis.needs_partitioning {
            return vec![Partition::new(0, dataset.clone())];
        }

        let partitions = match self.strategy {
            PartitionStrategy::Site => self.partition_by_site(dataset, &analysis),
            PartitionStrategy::Size => self.partition_by_size(dataset),
        };
        log::info!(
            "planned {} partitions over {} rows ({:?} strategy)",
            partitions.len(),
            analysis.total_rows,
            self.strategy
        );
        partitions
    }

    /// One or more whole sites per partition, largest sites first.
    fn partition_by_site(&self, dataset: &Dataset, analysis: &DatasetAnalysis) -> Vec<Partition> {
        let dist = &analysis.site_distribution;

        // One site per partition when the cap allows it.
        let site_bins: Vec<Vec<String>> = if analysis.distinct_sites <= self.max_partitions {
            dist.iter().map(|(site, _)| vec![site.clone()]).collect()
        } else {
            self.bin_pack_sites(dist)
        };

        // Route each row to its site's partition in one pass, preserving
        // input row order within a partition.
        let mut site_to_bin: HashMap<&str, usize> = HashMap::new();
        for (bin, sites) in site_bins.iter().enumerate() {
            for site in sites {
                site_to_bin.insert(site.as_str(), bin);
            }
        }
        let mut rows_per_bin: Vec<Vec<DemandRecord>> = vec![Vec::new(); site_bins.len()];
        for record in dataset.records() {
            if let Some(&bin) = site_to_bin.get(record.site_code.as_str()) {
                rows_per_bin[bin].push(record.clone());
            }
        }

        rows_per_bin
            .into_iter()
            .enumerate()
            .map(|(id, rows)| Partition::new(id, Dataset::new(rows)))
            .collect()
    }

    /// Greedy descending-volume bin packing under the hard partition cap.
    fn bin_pack_sites(&self, dist: &[(String, usize)]) -> Vec<Vec<String>> {
        let mut closed: Vec<Vec<String>> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_rows = 0usize;

        for (site, count) in dist {
            // Hard cap: the open bin is the last one allowed, so it takes
            // every remaining site no matter the budget.
            if closed.len() + 1 >= self.max_partitions {
                current.push(site.clone());
                continue;
            }

            if *count > self.max_rows_per_partition {
                // Oversized site gets its own partition.
                if !current.is_empty() {
                    closed.push(std::mem::take(&mut current));
                    current_rows = 0;
                }
                closed.push(vec![site.clone()]);
            } else if current_rows + count > self.max_rows_per_partition && !current.is_empty() {
                closed.push(std::mem::take(&mut current));
                current = vec![site.clone()];
                current_rows = *count;
            } else {
                current.push(site.clone());
                current_rows += count;
            }
        }

        if !current.is_empty() {
            closed.push(current);
        }
        closed
    }

    /// Contiguous row chunks of the configured budget. The final chunk
    /// absorbs the remainder once the cap is reached.
    fn partition_by_size(&self, dataset: &Dataset) -> Vec<Partition> {
        let records = dataset.records();
        let budget = self.max_rows_per_partition;
        let chunk_count = records
            .len()
            .div_ceil(budget)
            .min(self.max_partitions)
            .max(1);

        let mut partitions = Vec::with_capacity(chunk_count);
        for id in 0..chunk_count {
            let start = id * budget;
            let end = if id + 1 == chunk_count {
                records.len()
            } else {
                ((id + 1) * budget).min(records.len())
            };
            partitions.push(Partition::new(id, Dataset::new(records[start..end].to_vec())));
        }
        partitions
    }
}

const FIXED_OVERHEAD_SECS: f64 = 30.0;
const TRAINING_SECS_PER_100_PARTS: f64 = 5.0;
const FEATURE_SECS_PER_1000_ROWS: f64 = 10.0;

/// Cost estimate for one partition.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionEstimate {
    pub partition_id: usize,
    pub estimated_seconds: f64,
    pub estimated_minutes: f64,
}

/// Aggregate processing-time estimate used for user-facing ETAs.
///
/// Heuristic only; it has no effect on scheduling.
#[derive(Debug, Clone, Serialize)]
pub struct TimeEstimate {
    pub per_partition: Vec<PartitionEstimate>,
    pub sequential_total_seconds: f64,
    /// Assumes all partitions start simultaneously
    pub parallel_total_seconds: f64,
    pub speedup_factor: f64,
}

/// Estimate processing time for a set of planned partitions.
pub fn estimate_processing_time(partitions: &[Partition]) -> TimeEstimate {
    let per_partition: Vec<PartitionEstimate> = partitions
        .iter()
        .map(|p| {
            let training = (p.metadata.partnumber_count as f64 / 100.0) * TRAINING_SECS_PER_100_PARTS;
            let features = (p.metadata.rows as f64 / 1000.0) * FEATURE_SECS_PER_1000_ROWS;
            let estimated_seconds = FIXED_OVERHEAD_SECS + training + features;
            PartitionEstimate {
                partition_id: p.id,
                estimated_seconds,
                estimated_minutes: (estimated_seconds / 60.0 * 10.0).round() / 10.0,
            }
        })
        .collect();

    let sequential: f64 = per_partition.iter().map(|e| e.estimated_seconds).sum();
    let parallel = per_partition
        .iter()
        .map(|e| e.estimated_seconds)
        .fold(0.0_f64, f64::max);

    TimeEstimate {
        sequential_total_seconds: sequential,
        parallel_total_seconds: parallel,
        speedup_factor: sequential / parallel.max(1.0),
        per_partition,
    }
}
