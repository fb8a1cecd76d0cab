//! The "determine subfields" request flow against its external collaborators

use crate::core::executor::{BoundedExecutor, WorkerFailure};
use crate::core::pipeline::{SplitStrategy, ZonePipeline, ZoningParams};
use crate::io::raster::RasterOpener;
use crate::types::{BandZones, FieldPolygon, SeasonKey, SubfieldBatch, ZoneError, ZoneResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Supplies a prepared NDVI raster clipped to a field
pub trait NdviRasterProvider {
    /// Path of the raster closest to `target_date` and its capture date
    fn field_ndvi(&self, field: &FieldPolygon, target_date: NaiveDate) -> Option<(PathBuf, NaiveDate)>;
}

/// Persists one invocation's subfields atomically
pub trait SubfieldStore {
    fn store_batch(&self, key: &SeasonKey, batch: &SubfieldBatch) -> ZoneResult<()>;
}

/// Soil nutrient measurements at a representative point
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NutrientLevels {
    pub nitrogen: Option<f64>,
    pub phosphorus: Option<f64>,
    pub potassium: Option<f64>,
}

impl NutrientLevels {
    pub fn is_empty(&self) -> bool {
        self.nitrogen.is_none() && self.phosphorus.is_none() && self.potassium.is_none()
    }
}

pub trait FertilizerRecommender {
    fn recommend(&self, average_ndvi: f64, nutrients: &NutrientLevels) -> Option<f64>;
}

/// Linear placeholder model: `20·ndvi + N + P + K`, clamped to `[0, 80]`
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearRecommender;

impl FertilizerRecommender for LinearRecommender {
    fn recommend(&self, average_ndvi: f64, nutrients: &NutrientLevels) -> Option<f64> {
        if nutrients.is_empty() {
            return None;
        }
        let total = average_ndvi * 20.0
            + nutrients.nitrogen.unwrap_or(0.0)
            + nutrients.phosphorus.unwrap_or(0.0)
            + nutrients.potassium.unwrap_or(0.0);
        Some(total.clamp(0.0, 80.0))
    }
}

/// Notifies listeners that sampling positions are ready
pub trait EventBus {
    fn publish_positions_determined(&self, key: &SeasonKey, count: usize) -> ZoneResult<()>;
}

/// Worker exit status for a rejected field or parameter set
pub const EXIT_INVALID_INPUT: i32 = 1;
/// Worker exit status for any other failure
pub const EXIT_FAILURE: i32 = 2;
/// Exit status of a front end whose worker ran out of time
pub const EXIT_TIMEOUT: i32 = 3;

/// Process exit status for an error, matching what [`ProcessWorker`] decodes
pub fn exit_code(error: &ZoneError) -> i32 {
    match error {
        ZoneError::InvalidInput(_) => EXIT_INVALID_INPUT,
        ZoneError::Timeout(_) => EXIT_TIMEOUT,
        _ => EXIT_FAILURE,
    }
}

/// Runs one pipeline invocation inside the service's bounded executor
pub trait ZoningWorker {
    fn determine(
        &self,
        executor: &BoundedExecutor,
        params: &ZoningParams,
        raster: &Path,
        field: &FieldPolygon,
    ) -> ZoneResult<Vec<BandZones>>;
}

/// Runs the pipeline in a child process that is killed on timeout.
///
/// The child is invoked as `<program> [args..] zones|grid <raster> --field <json>
/// --config <json> --in-worker` and must print the `Vec<BandZones>` as JSON on
/// stdout, which is what the `ndvi-zones` binary does.
#[derive(Debug, Clone)]
pub struct ProcessWorker {
    program: PathBuf,
    args: Vec<OsString>,
    seed: Option<u64>,
}

impl ProcessWorker {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            seed: None,
        }
    }

    /// Argument placed before the subcommand, e.g. a script for an interpreter
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Seed the child's representative point sampling
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    fn command(&self, params: &ZoningParams, raster: &Path, field_file: &Path, config_file: &Path) -> Command {
        let subcommand = match params.strategy {
            SplitStrategy::PixelBased => "zones",
            SplitStrategy::GridBased => "grid",
        };
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(subcommand)
            .arg(raster)
            .arg("--field")
            .arg(field_file)
            .arg("--config")
            .arg(config_file)
            .arg("--in-worker");
        if let Some(seed) = self.seed {
            command.arg("--seed").arg(seed.to_string());
        }
        command
    }
}

impl ZoningWorker for ProcessWorker {
    fn determine(
        &self,
        executor: &BoundedExecutor,
        params: &ZoningParams,
        raster: &Path,
        field: &FieldPolygon,
    ) -> ZoneResult<Vec<BandZones>> {
        let field_file = json_temp_file(&field.rings())?;
        let config_file = json_temp_file(params)?;
        let command = self.command(params, raster, field_file.path(), config_file.path());

        log::debug!("Spawning zoning worker {}", self.program.display());
        executor.run_process(command).map_err(|failure| match failure {
            WorkerFailure::Exited(Some(EXIT_INVALID_INPUT)) => {
                ZoneError::InvalidInput("Worker rejected the field or parameters".to_string())
            }
            other => other.into(),
        })
    }
}

fn json_temp_file<T: Serialize + ?Sized>(value: &T) -> ZoneResult<NamedTempFile> {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile()?;
    serde_json::to_writer(file.as_file_mut(), value)?;
    file.as_file_mut().flush()?;
    Ok(file)
}

/// Runs the pipeline on a worker thread of this process.
///
/// A timed-out thread cannot be stopped and keeps its raster open until the
/// pipeline returns, so this suits in-memory rasters and tests. Use
/// [`ProcessWorker`] where timeouts must reclaim the work.
#[derive(Clone)]
pub struct ThreadWorker {
    opener: Arc<dyn RasterOpener>,
}

impl ThreadWorker {
    pub fn new(opener: Arc<dyn RasterOpener>) -> Self {
        Self { opener }
    }
}

impl ZoningWorker for ThreadWorker {
    fn determine(
        &self,
        executor: &BoundedExecutor,
        params: &ZoningParams,
        raster: &Path,
        field: &FieldPolygon,
    ) -> ZoneResult<Vec<BandZones>> {
        let pipeline = ZonePipeline::new(params.clone())?;
        let opener = Arc::clone(&self.opener);
        let path = raster.to_path_buf();
        let field = field.clone();
        executor.run(move || -> ZoneResult<Vec<BandZones>> {
            let raster = opener.open(&path)?;
            pipeline.determine(&field, raster.as_ref())
        })?
    }
}

/// Wires raster provider, bounded pipeline, persistence and events
pub struct SubfieldService<P, S, E, W = ProcessWorker> {
    params: ZoningParams,
    provider: P,
    worker: W,
    store: S,
    events: E,
    executor: BoundedExecutor,
}

impl<P, S, E> SubfieldService<P, S, E, ProcessWorker>
where
    P: NdviRasterProvider,
    S: SubfieldStore,
    E: EventBus,
{
    /// Service whose pipeline runs in `program` as a killable child process
    pub fn new(params: ZoningParams, provider: P, program: impl Into<PathBuf>, store: S, events: E) -> ZoneResult<Self> {
        Self::with_worker(params, provider, ProcessWorker::new(program), store, events)
    }
}

impl<P, S, E, W> SubfieldService<P, S, E, W>
where
    P: NdviRasterProvider,
    S: SubfieldStore,
    E: EventBus,
    W: ZoningWorker,
{
    pub fn with_worker(params: ZoningParams, provider: P, worker: W, store: S, events: E) -> ZoneResult<Self> {
        params.validate()?;
        let executor = BoundedExecutor::new(params.timeout()).with_poll_interval(params.poll_interval());
        Ok(Self {
            params,
            provider,
            worker,
            store,
            events,
            executor,
        })
    }

    /// Determine, persist and announce the subfields of one field and season.
    ///
    /// Fails with `DataUnavailable` when no raster exists for the field and
    /// with `Timeout` when the pipeline does not finish in time. A crashed
    /// worker is a `Processing` error. Nothing is persisted on failure. An
    /// empty pipeline result persists an empty batch.
    pub fn determine_subfields(
        &self,
        key: &SeasonKey,
        field: &FieldPolygon,
        target_date: NaiveDate,
    ) -> ZoneResult<SubfieldBatch> {
        field.to_polygon()?;

        let (path, capture_date) = self.provider.field_ndvi(field, target_date).ok_or_else(|| {
            ZoneError::DataUnavailable(format!("No NDVI raster for field {} around {}", key.field_id, target_date))
        })?;
        log::info!(
            "Determining subfields for user {} field {} season {} from {} ({})",
            key.user_id,
            key.field_id,
            key.season_id,
            path.display(),
            capture_date
        );

        let bands = self.worker.determine(&self.executor, &self.params, &path, field)?;

        let batch = SubfieldBatch::from_bands(key.clone(), Some(capture_date), &bands);
        self.store.store_batch(key, &batch)?;
        log::info!("Stored {} subfields", batch.subfields.len());

        if let Err(e) = self.events.publish_positions_determined(key, batch.point_count()) {
            log::warn!("Failed to publish positions for field {}: {}", key.field_id, e);
        }
        Ok(batch)
    }
}

/// Fill every subfield's recommendation from the measured nutrients
pub fn apply_recommendations(
    batch: &mut SubfieldBatch,
    nutrients: &NutrientLevels,
    recommender: &dyn FertilizerRecommender,
) {
    for subfield in batch.subfields.iter_mut() {
        let amount = recommender.recommend(subfield.average_ndvi(), nutrients);
        subfield.set_recommended_fertilizer_amount(amount);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_linear_recommender() {
        let recommender = LinearRecommender;
        assert_eq!(recommender.recommend(0.5, &NutrientLevels::default()), None);

        let nutrients = NutrientLevels {
            nitrogen: Some(10.0),
            phosphorus: None,
            potassium: Some(5.0),
        };
        assert_relative_eq!(recommender.recommend(0.5, &nutrients).unwrap(), 25.0, epsilon = 1e-12);

        let rich = NutrientLevels {
            nitrogen: Some(100.0),
            ..Default::default()
        };
        assert_eq!(recommender.recommend(0.9, &rich), Some(80.0));

        let depleted = NutrientLevels {
            nitrogen: Some(-50.0),
            ..Default::default()
        };
        assert_eq!(recommender.recommend(0.1, &depleted), Some(0.0));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&ZoneError::InvalidInput("bowtie".to_string())), EXIT_INVALID_INPUT);
        assert_eq!(exit_code(&ZoneError::Timeout(std::time::Duration::from_secs(1))), EXIT_TIMEOUT);
        assert_eq!(exit_code(&ZoneError::Processing("crash".to_string())), EXIT_FAILURE);
    }

    #[test]
    fn test_process_worker_command_line() {
        let params = ZoningParams {
            strategy: SplitStrategy::GridBased,
            ..Default::default()
        };
        let worker = ProcessWorker::new("ndvi-zones").arg("--quiet").with_seed(Some(9));
        let command = worker.command(&params, Path::new("ndvi.tif"), Path::new("f.json"), Path::new("c.json"));
        let args: Vec<_> = command.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "--quiet", "grid", "ndvi.tif", "--field", "f.json", "--config", "c.json", "--in-worker", "--seed", "9"
            ]
        );
    }
}
