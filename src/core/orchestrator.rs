//! Tile job dispatch and global grid accumulation
//!
//! One job runs per tiling-index row: fetch footprints, rasterize them into a
//! tile-local grid, then fold that grid into the shared global grid. The
//! extent is planned (and the grid allocated) before the first job starts.
//! Jobs complete in any order; the merge rule is commutative and associative
//! so the final grid does not depend on it.

use crate::core::composite::{GlobalGrid, MergeRule};
use crate::core::extent::{plan_extent, plan_extent_from_bounds, ExtentBuffer, ExtentSource, GridExtent};
use crate::core::rasterize::{TileRaster, TileRasterizer};
use crate::types::{FootprintSet, RevisitError, RevisitResult, TileRecord, YearRange};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Source of scene footprints for one tile
///
/// Implementations own their retry policy; an `Err` here is final for the job.
pub trait SceneSource: Sync {
    fn fetch(&self, tile: &TileRecord, years: &YearRange) -> RevisitResult<FootprintSet>;
}

/// Lifecycle of one tile job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Fetching,
    /// Terminal: nothing retrieved (or nothing rasterizable)
    Empty,
    Rasterizing,
    /// Terminal: local grid folded into the global grid
    Merged,
    /// Terminal: retrieval failed after the source's own retries
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Empty | JobState::Merged | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Fetching => write!(f, "fetching"),
            JobState::Empty => write!(f, "empty"),
            JobState::Rasterizing => write!(f, "rasterizing"),
            JobState::Merged => write!(f, "merged"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// Final state of one tile job
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub tile_id: String,
    pub state: JobState,
    /// Footprints retrieved
    pub scenes: usize,
    /// Global pixels visited while compositing
    pub pixels: usize,
    pub error: Option<String>,
}

/// Summary of a whole run, outcomes in tiling-index order
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcomes: Vec<JobOutcome>,
    pub merged: usize,
    pub empty: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

impl RunReport {
    fn from_outcomes(outcomes: Vec<JobOutcome>, elapsed: Duration) -> Self {
        let count = |state| outcomes.iter().filter(|o| o.state == state).count();
        let merged = count(JobState::Merged);
        let empty = count(JobState::Empty);
        let failed = count(JobState::Failed);
        Self {
            outcomes,
            merged,
            empty,
            failed,
            elapsed,
        }
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// True once every job reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|o| o.state.is_terminal())
    }
}

/// How jobs are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Schedule {
    /// Fixed-size worker pool
    #[default]
    Parallel,
    /// One job at a time on the calling thread
    Sequential,
}

/// How tile grids reach the global grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MergeStrategy {
    /// Workers return their local grids in batches of `merge_batch`; a single
    /// thread folds each batch in tiling-index order before the next starts
    #[default]
    Deferred,
    /// Workers fold their grid as soon as it is ready, one writer at a time
    Locked,
}

/// Run-wide parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisitConfig {
    /// Pixel size in degrees
    pub resolution: f64,
    pub years: YearRange,
    pub buffer: Option<ExtentBuffer>,
    pub extent_source: ExtentSource,
    /// Process only the first N tiling-index rows
    pub count_limit: Option<usize>,
    /// Worker pool size; `None` uses one worker per core
    pub workers: Option<usize>,
    pub schedule: Schedule,
    pub merge_strategy: MergeStrategy,
    pub merge_rule: MergeRule,
    /// Tile rasters held at once before a `Deferred` fold
    #[serde(default = "default_merge_batch")]
    pub merge_batch: usize,
    /// Refuse to allocate grids larger than this
    pub max_pixels: Option<usize>,
}

impl Default for RevisitConfig {
    fn default() -> Self {
        Self {
            resolution: 0.00278,
            years: YearRange::default(),
            buffer: None,
            extent_source: ExtentSource::TilingIndex,
            count_limit: None,
            workers: None,
            schedule: Schedule::Parallel,
            merge_strategy: MergeStrategy::Deferred,
            merge_rule: MergeRule::Max,
            merge_batch: default_merge_batch(),
            max_pixels: None,
        }
    }
}

fn default_merge_batch() -> usize {
    64
}

/// Revisit raster processor
pub struct RevisitProcessor {
    config: RevisitConfig,
    #[cfg(feature = "parallel")]
    pool: Option<rayon::ThreadPool>,
}

impl RevisitProcessor {
    /// Create a processor, building its worker pool up front
    pub fn new(config: RevisitConfig) -> RevisitResult<Self> {
        if let Some(0) = config.workers {
            return Err(RevisitError::InvalidInput(
                "Worker pool needs at least one worker".to_string(),
            ));
        }
        if config.merge_batch == 0 {
            return Err(RevisitError::InvalidInput(
                "merge_batch must be at least 1".to_string(),
            ));
        }
        YearRange::new(config.years.min_year, config.years.max_year)?;

        #[cfg(feature = "parallel")]
        let pool = match config.schedule {
            Schedule::Parallel => {
                let mut builder = rayon::ThreadPoolBuilder::new()
                    .thread_name(|i| format!("revisit-worker-{}", i));
                if let Some(n) = config.workers {
                    builder = builder.num_threads(n);
                }
                let pool = builder.build().map_err(|e| {
                    RevisitError::Processing(format!("Failed to build worker pool: {}", e))
                })?;
                log::info!("Worker pool ready with {} threads", pool.current_num_threads());
                Some(pool)
            }
            Schedule::Sequential => None,
        };

        Ok(Self {
            config,
            #[cfg(feature = "parallel")]
            pool,
        })
    }

    pub fn config(&self) -> &RevisitConfig {
        &self.config
    }

    /// Build the global revisit grid for a tiling index
    pub fn run<S: SceneSource>(
        &self,
        tiles: &[TileRecord],
        source: &S,
    ) -> RevisitResult<(GlobalGrid, RunReport)> {
        let start = Instant::now();
        let tiles = match self.config.count_limit {
            Some(n) if n < tiles.len() => {
                log::info!("Limiting run to the first {} of {} tiles", n, tiles.len());
                &tiles[..n]
            }
            _ => tiles,
        };

        log::info!(
            "🛰️  Building revisit raster for {} tiles, years {}-{}",
            tiles.len(),
            self.config.years.min_year,
            self.config.years.max_year
        );

        let (grid, outcomes) = match self.config.extent_source {
            ExtentSource::TilingIndex => self.run_planned(tiles, source)?,
            ExtentSource::Footprints => self.run_fetch_first(tiles, source)?,
        };

        let report = RunReport::from_outcomes(outcomes, start.elapsed());
        log::info!(
            "✅ Run finished in {:.1}s: {} merged, {} empty, {} failed; {} pixels covered, max revisits {}",
            report.elapsed.as_secs_f64(),
            report.merged,
            report.empty,
            report.failed,
            grid.covered_pixels(),
            grid.max_count()
        );

        Ok((grid, report))
    }

    /// Plan from the tiling index, then fetch and rasterize per job
    fn run_planned<S: SceneSource>(
        &self,
        tiles: &[TileRecord],
        source: &S,
    ) -> RevisitResult<(GlobalGrid, Vec<JobOutcome>)> {
        let extent = plan_extent(
            tiles,
            self.config.resolution,
            self.config.buffer,
            self.config.max_pixels,
        )?;
        let grid = GlobalGrid::allocate(extent)?;
        let rasterizer = rasterizer_for(&extent);

        let job = |_: usize, tile: &TileRecord| -> (JobOutcome, Option<TileRaster>) {
            match self.fetch(tile, source) {
                Ok(footprints) => self.rasterize(&rasterizer, footprints),
                Err(outcome) => (outcome, None),
            }
        };

        self.dispatch(grid, tiles, job)
    }

    /// Fetch every tile, plan from the footprint bounds, then rasterize
    fn run_fetch_first<S: SceneSource>(
        &self,
        tiles: &[TileRecord],
        source: &S,
    ) -> RevisitResult<(GlobalGrid, Vec<JobOutcome>)> {
        let fetched: Vec<Result<FootprintSet, JobOutcome>> =
            self.map_tiles(tiles, 0, |_, tile| self.fetch(tile, source));

        let bounds = fetched
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .filter_map(|set| set.total_bounds())
            .reduce(|acc, b| acc.union(&b))
            .ok_or_else(|| {
                RevisitError::InvalidInput("No footprints retrieved for any tile".to_string())
            })?;

        let extent = plan_extent_from_bounds(
            bounds,
            self.config.resolution,
            self.config.buffer,
            self.config.max_pixels,
        )?;
        let grid = GlobalGrid::allocate(extent)?;
        let rasterizer = rasterizer_for(&extent);

        let slots: Vec<Mutex<Option<Result<FootprintSet, JobOutcome>>>> =
            fetched.into_iter().map(|r| Mutex::new(Some(r))).collect();

        let job = |i: usize, tile: &TileRecord| -> (JobOutcome, Option<TileRaster>) {
            let taken = slots[i]
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take();
            match taken {
                Some(Ok(footprints)) => self.rasterize(&rasterizer, footprints),
                Some(Err(outcome)) => (outcome, None),
                None => (failed_outcome(&tile.id, "footprints already consumed"), None),
            }
        };

        self.dispatch(grid, tiles, job)
    }

    /// Run `job` for every tile and fold the produced rasters into `grid`.
    ///
    /// Every job starts out `Pending`; its slot is overwritten with the
    /// terminal outcome once the job has run.
    fn dispatch<F>(
        &self,
        grid: GlobalGrid,
        tiles: &[TileRecord],
        job: F,
    ) -> RevisitResult<(GlobalGrid, Vec<JobOutcome>)>
    where
        F: Fn(usize, &TileRecord) -> (JobOutcome, Option<TileRaster>) + Sync,
    {
        let rule = self.config.merge_rule;
        let mut outcomes: Vec<JobOutcome> = tiles.iter().map(|t| pending_outcome(&t.id)).collect();
        log::debug!("{} jobs {}", outcomes.len(), JobState::Pending);

        match self.config.merge_strategy {
            MergeStrategy::Deferred => {
                // At most `merge_batch` tile rasters are alive at once
                let batch = self.config.merge_batch;
                let mut grid = grid;
                for (n, chunk) in tiles.chunks(batch).enumerate() {
                    let offset = n * batch;
                    let results = self.map_tiles(chunk, offset, &job);
                    for (i, (mut outcome, raster)) in results.into_iter().enumerate() {
                        if let Some(raster) = raster {
                            outcome.pixels = grid.composite(&raster, rule);
                            outcome.state = JobState::Merged;
                        }
                        outcomes[offset + i] = outcome;
                    }
                }
                Ok((grid, outcomes))
            }
            MergeStrategy::Locked => {
                let shared = Mutex::new(grid);
                let results = self.map_tiles(tiles, 0, |i, tile| {
                    let (mut outcome, raster) = job(i, tile);
                    if let Some(raster) = raster {
                        let mut grid = shared
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                        outcome.pixels = grid.composite(&raster, rule);
                        outcome.state = JobState::Merged;
                    }
                    outcome
                });
                for (slot, outcome) in outcomes.iter_mut().zip(results) {
                    *slot = outcome;
                }
                let grid = shared
                    .into_inner()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                Ok((grid, outcomes))
            }
        }
    }

    /// Map over tiles on the worker pool (or sequentially), preserving order.
    ///
    /// `f` receives each tile's index in the run, `offset` plus its position in `tiles`.
    fn map_tiles<R, F>(&self, tiles: &[TileRecord], offset: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize, &TileRecord) -> R + Sync,
    {
        #[cfg(feature = "parallel")]
        {
            if let Some(pool) = &self.pool {
                use rayon::prelude::*;
                return pool.install(|| {
                    tiles
                        .par_iter()
                        .enumerate()
                        .map(|(i, tile)| f(offset + i, tile))
                        .collect()
                });
            }
        }

        tiles
            .iter()
            .enumerate()
            .map(|(i, tile)| f(offset + i, tile))
            .collect()
    }

    /// Fetching -> footprints, or a terminal `Failed` outcome
    fn fetch<S: SceneSource>(
        &self,
        tile: &TileRecord,
        source: &S,
    ) -> Result<FootprintSet, JobOutcome> {
        log::debug!("Tile {}: {}", tile.id, JobState::Fetching);
        match source.fetch(tile, &self.config.years) {
            Ok(set) => Ok(set),
            Err(e) => {
                log::warn!("Tile {}: retrieval failed, skipping: {}", tile.id, e);
                Err(failed_outcome(&tile.id, &e.to_string()))
            }
        }
    }

    /// Rasterizing -> a raster ready to merge, or a terminal `Empty` outcome
    fn rasterize(
        &self,
        rasterizer: &TileRasterizer,
        footprints: FootprintSet,
    ) -> (JobOutcome, Option<TileRaster>) {
        let scenes = footprints.len();
        let mut outcome = JobOutcome {
            tile_id: footprints.tile_id.clone(),
            state: JobState::Empty,
            scenes,
            pixels: 0,
            error: None,
        };

        if footprints.is_empty() {
            log::debug!("Tile {}: no scenes, {}", outcome.tile_id, JobState::Empty);
            return (outcome, None);
        }

        log::debug!("Tile {}: {} ({} scenes)", outcome.tile_id, JobState::Rasterizing, scenes);
        match rasterizer.rasterize(&footprints) {
            Some(raster) => {
                outcome.state = JobState::Rasterizing;
                (outcome, Some(raster))
            }
            None => (outcome, None),
        }
    }
}

fn rasterizer_for(extent: &GridExtent) -> TileRasterizer {
    let (origin_x, origin_y) = extent.origin();
    TileRasterizer::new(origin_x, origin_y, extent.resolution)
}

fn pending_outcome(tile_id: &str) -> JobOutcome {
    JobOutcome {
        tile_id: tile_id.to_string(),
        state: JobState::Pending,
        scenes: 0,
        pixels: 0,
        error: None,
    }
}

fn failed_outcome(tile_id: &str, error: &str) -> JobOutcome {
    JobOutcome {
        tile_id: tile_id.to_string(),
        state: JobState::Failed,
        scenes: 0,
        pixels: 0,
        error: Some(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, MultiPolygon, Polygon};
    use std::collections::HashMap;

    fn square(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Polygon<f64> {
        polygon![
            (x: x_min, y: y_min),
            (x: x_max, y: y_min),
            (x: x_max, y: y_max),
            (x: x_min, y: y_max),
        ]
    }

    fn tile(id: &str, bounds: (f64, f64, f64, f64)) -> TileRecord {
        TileRecord {
            id: id.to_string(),
            geometry: MultiPolygon(vec![square(bounds.0, bounds.1, bounds.2, bounds.3)]),
        }
    }

    /// In-memory footprints keyed by tile id; missing ids fail
    struct MapSource(HashMap<String, Vec<Polygon<f64>>>);

    impl SceneSource for MapSource {
        fn fetch(&self, tile: &TileRecord, _years: &YearRange) -> RevisitResult<FootprintSet> {
            self.0
                .get(&tile.id)
                .map(|polys| FootprintSet::from_polygons(tile.id.clone(), polys.clone()))
                .ok_or_else(|| RevisitError::Network(format!("no such tile {}", tile.id)))
        }
    }

    fn two_tile_fixture() -> (Vec<TileRecord>, MapSource) {
        let tiles = vec![
            tile("A", (-1.0, 0.0, 0.0, 1.0)),
            tile("B", (-1.0, -1.0, 1.0, 1.0)),
        ];
        let mut map = HashMap::new();
        map.insert("A".to_string(), vec![square(-1.0, 0.0, 0.0, 1.0)]);
        map.insert(
            "B".to_string(),
            vec![
                square(-1.0, 0.0, 0.0, 1.0),
                square(-1.0, 0.0, 0.0, 1.0),
                square(0.0, -1.0, 1.0, 0.0),
            ],
        );
        (tiles, MapSource(map))
    }

    fn config(schedule: Schedule, strategy: MergeStrategy) -> RevisitConfig {
        RevisitConfig {
            resolution: 1.0,
            workers: Some(2),
            schedule,
            merge_strategy: strategy,
            ..RevisitConfig::default()
        }
    }

    #[test]
    fn test_job_state_terminals() {
        assert!(JobState::Merged.is_terminal());
        assert!(JobState::Empty.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Fetching.is_terminal());
        assert!(!JobState::Rasterizing.is_terminal());
    }

    #[test]
    fn test_end_to_end_two_tiles() {
        let (tiles, source) = two_tile_fixture();
        for schedule in [Schedule::Parallel, Schedule::Sequential] {
            for strategy in [MergeStrategy::Deferred, MergeStrategy::Locked] {
                let processor = RevisitProcessor::new(config(schedule, strategy)).unwrap();
                let (grid, report) = processor.run(&tiles, &source).unwrap();
                assert_eq!(grid.counts, ndarray::array![[2, 0], [0, 1]]);
                assert_eq!(report.merged, 2);
                assert!(report.is_complete());
            }
        }
    }

    #[test]
    fn test_deferred_batches_match_single_fold() {
        let (mut tiles, mut source) = two_tile_fixture();
        for i in 0..5 {
            let id = format!("C{}", i);
            tiles.push(tile(&id, (0.0, -1.0, 1.0, 0.0)));
            source.0.insert(id, vec![square(0.0, -1.0, 1.0, 0.0)]);
        }
        tiles.push(tile("MISSING", (0.0, 0.0, 1.0, 1.0)));

        for schedule in [Schedule::Parallel, Schedule::Sequential] {
            for merge_batch in [1, 2, 3, tiles.len(), 64] {
                let processor = RevisitProcessor::new(RevisitConfig {
                    merge_batch,
                    ..config(schedule, MergeStrategy::Deferred)
                })
                .unwrap();
                let (grid, report) = processor.run(&tiles, &source).unwrap();

                assert_eq!(grid.counts, ndarray::array![[2, 0], [0, 1]]);
                assert_eq!(report.total(), tiles.len());
                assert_eq!((report.merged, report.failed), (7, 1));
                assert!(report.is_complete());
                let ids: Vec<&str> = report.outcomes.iter().map(|o| o.tile_id.as_str()).collect();
                let expected: Vec<&str> = tiles.iter().map(|t| t.id.as_str()).collect();
                assert_eq!(ids, expected);
            }
        }
    }

    #[test]
    fn test_jobs_start_pending() {
        let outcome = pending_outcome("A");
        assert_eq!(outcome.state, JobState::Pending);
        assert!(!outcome.state.is_terminal());
        assert!(outcome.error.is_none());
    }

    #[test]
    fn test_failed_and_empty_jobs_do_not_abort() {
        let (mut tiles, mut source) = two_tile_fixture();
        tiles.push(tile("MISSING", (0.0, 0.0, 1.0, 1.0)));
        tiles.push(tile("NOTHING", (0.0, 0.0, 1.0, 1.0)));
        source.0.insert("NOTHING".to_string(), Vec::new());

        let processor = RevisitProcessor::new(config(Schedule::Parallel, MergeStrategy::Locked)).unwrap();
        let (grid, report) = processor.run(&tiles, &source).unwrap();

        assert_eq!(grid.counts, ndarray::array![[2, 0], [0, 1]]);
        assert_eq!((report.merged, report.empty, report.failed), (2, 1, 1));
        assert_eq!(report.outcomes[2].state, JobState::Failed);
        assert!(report.outcomes[2].error.is_some());
        assert_eq!(report.outcomes[3].state, JobState::Empty);
    }

    #[test]
    fn test_count_limit() {
        let (tiles, source) = two_tile_fixture();
        let processor = RevisitProcessor::new(RevisitConfig {
            count_limit: Some(1),
            ..config(Schedule::Sequential, MergeStrategy::Deferred)
        })
        .unwrap();
        let (grid, report) = processor.run(&tiles, &source).unwrap();
        assert_eq!(report.total(), 1);
        // Extent comes from tile A only: a single pixel
        assert_eq!(grid.counts, ndarray::array![[1]]);
    }

    #[test]
    fn test_footprint_extent_source() {
        let (tiles, source) = two_tile_fixture();
        let processor = RevisitProcessor::new(RevisitConfig {
            extent_source: ExtentSource::Footprints,
            ..config(Schedule::Parallel, MergeStrategy::Deferred)
        })
        .unwrap();
        let (grid, report) = processor.run(&tiles, &source).unwrap();
        assert_eq!(grid.counts, ndarray::array![[2, 0], [0, 1]]);
        assert_eq!(report.merged, 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(RevisitProcessor::new(RevisitConfig {
            workers: Some(0),
            ..RevisitConfig::default()
        })
        .is_err());
        assert!(RevisitProcessor::new(RevisitConfig {
            years: YearRange { min_year: 2024, max_year: 2020 },
            ..RevisitConfig::default()
        })
        .is_err());
        assert!(RevisitProcessor::new(RevisitConfig {
            merge_batch: 0,
            ..RevisitConfig::default()
        })
        .is_err());
    }
}
