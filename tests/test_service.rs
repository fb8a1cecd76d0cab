use chrono::NaiveDate;
use ndarray::Array2;
use ndvi_zones::{
    apply_recommendations, EventBus, FieldPolygon, GeoTransform, LinearRecommender, MemoryRaster,
    NdviRasterProvider, NutrientLevels, RasterOpener, RasterSource, SeasonKey, SubfieldBatch, SubfieldService,
    SubfieldStore, ThreadWorker, ZoneError, ZoneResult, ZoningParams,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

struct FixedProvider(Option<(PathBuf, NaiveDate)>);

impl NdviRasterProvider for FixedProvider {
    fn field_ndvi(&self, _field: &FieldPolygon, _target_date: NaiveDate) -> Option<(PathBuf, NaiveDate)> {
        self.0.clone()
    }
}

#[derive(Clone, Default)]
struct RecordingStore(Arc<Mutex<Vec<SubfieldBatch>>>);

impl SubfieldStore for RecordingStore {
    fn store_batch(&self, _key: &SeasonKey, batch: &SubfieldBatch) -> ZoneResult<()> {
        self.0.lock().expect("store lock").push(batch.clone());
        Ok(())
    }
}

#[derive(Clone, Default)]
struct RecordingEvents {
    published: Arc<Mutex<Vec<usize>>>,
    fail: bool,
}

impl EventBus for RecordingEvents {
    fn publish_positions_determined(&self, _key: &SeasonKey, count: usize) -> ZoneResult<()> {
        if self.fail {
            return Err(ZoneError::Processing("bus offline".to_string()));
        }
        self.published.lock().expect("events lock").push(count);
        Ok(())
    }
}

fn halves_worker() -> ThreadWorker {
    ThreadWorker::new(Arc::new(|_path: &Path| -> ZoneResult<Box<dyn RasterSource>> {
        let data = Array2::from_shape_fn((4, 4), |(_, c)| if c < 2 { 0.1f32 } else { 0.8 });
        let raster = MemoryRaster::new(data, GeoTransform::from_bounds(0.0, 0.0, 0.004, 0.004, 4, 4))?;
        Ok(Box::new(raster))
    }))
}

fn field() -> FieldPolygon {
    FieldPolygon::new(
        vec![[0.0, 0.0], [0.004, 0.0], [0.004, 0.004], [0.0, 0.004], [0.0, 0.0]],
        vec![],
    )
}

fn key() -> SeasonKey {
    SeasonKey {
        user_id: 1,
        field_id: 7,
        season_id: "2024".to_string(),
    }
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).expect("valid date")
}

fn provider() -> FixedProvider {
    FixedProvider(Some((PathBuf::from("ndvi.tif"), date())))
}

fn params() -> ZoningParams {
    ZoningParams {
        bands: 2,
        ..Default::default()
    }
}

#[test]
fn test_subfields_are_stored_and_announced() {
    let store = RecordingStore::default();
    let events = RecordingEvents::default();
    let service = SubfieldService::with_worker(params(), provider(), halves_worker(), store.clone(), events.clone())
        .expect("service");

    let batch = service.determine_subfields(&key(), &field(), date()).expect("batch");
    assert_eq!(batch.subfields.len(), 2);
    assert_eq!(batch.capture_date, Some(date()));
    assert_eq!(batch.point_count(), 2);

    let stored = store.0.lock().expect("store lock");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0], batch);
    assert_eq!(*events.published.lock().expect("events lock"), vec![2]);

    // Roughly 0.002° x 0.004° at the equator
    for subfield in &batch.subfields {
        assert!(subfield.area_m2() > 90_000.0 && subfield.area_m2() < 100_000.0, "{}", subfield.area_m2());
    }
}

#[test]
fn test_missing_raster_is_data_unavailable() {
    let store = RecordingStore::default();
    let service = SubfieldService::with_worker(
        params(),
        FixedProvider(None),
        halves_worker(),
        store.clone(),
        RecordingEvents::default(),
    )
    .expect("service");

    let result = service.determine_subfields(&key(), &field(), date());
    assert!(matches!(result, Err(ZoneError::DataUnavailable(_))));
    assert!(store.0.lock().expect("store lock").is_empty());
}

#[test]
fn test_slow_raster_times_out_without_persisting() {
    let slow_opener: Arc<dyn RasterOpener> = Arc::new(|_path: &Path| -> ZoneResult<Box<dyn RasterSource>> {
        thread::sleep(Duration::from_secs(5));
        Err(ZoneError::Processing("unreachable".to_string()))
    });
    let store = RecordingStore::default();
    let params = ZoningParams {
        timeout_secs: 0.5,
        poll_interval_ms: 50,
        ..params()
    };
    let service = SubfieldService::with_worker(
        params,
        provider(),
        ThreadWorker::new(slow_opener),
        store.clone(),
        RecordingEvents::default(),
    )
        .expect("service");

    let result = service.determine_subfields(&key(), &field(), date());
    assert!(matches!(result, Err(ZoneError::Timeout(_))));
    assert!(store.0.lock().expect("store lock").is_empty());
}

#[test]
fn test_event_failure_keeps_stored_batch() {
    let store = RecordingStore::default();
    let events = RecordingEvents {
        fail: true,
        ..Default::default()
    };
    let service = SubfieldService::with_worker(params(), provider(), halves_worker(), store.clone(), events).expect("service");

    let batch = service.determine_subfields(&key(), &field(), date()).expect("batch");
    assert_eq!(store.0.lock().expect("store lock").len(), 1);
    assert_eq!(batch.subfields.len(), 2);
}

#[test]
fn test_invalid_field_rejected_before_lookup() {
    let service = SubfieldService::with_worker(
        params(),
        provider(),
        halves_worker(),
        RecordingStore::default(),
        RecordingEvents::default(),
    )
    .expect("service");
    let bowtie = FieldPolygon::new(vec![[0.0, 0.0], [1.0, 1.0], [1.0, 0.0], [0.0, 1.0]], vec![]);
    assert!(matches!(
        service.determine_subfields(&key(), &bowtie, date()),
        Err(ZoneError::InvalidInput(_))
    ));
}

#[test]
fn test_recommendations_fill_every_subfield() {
    let service = SubfieldService::with_worker(
        params(),
        provider(),
        halves_worker(),
        RecordingStore::default(),
        RecordingEvents::default(),
    )
    .expect("service");
    let mut batch = service.determine_subfields(&key(), &field(), date()).expect("batch");

    let nutrients = NutrientLevels {
        nitrogen: Some(12.0),
        phosphorus: Some(3.0),
        potassium: None,
    };
    apply_recommendations(&mut batch, &nutrients, &LinearRecommender);
    for subfield in &batch.subfields {
        let expected = subfield.average_ndvi() * 20.0 + 15.0;
        let amount = subfield.recommended_fertilizer_amount().expect("recommendation");
        assert!((amount - expected).abs() < 1e-9);
    }
}

#[test]
fn test_worker_crash_is_not_a_timeout() {
    let crashing: Arc<dyn RasterOpener> =
        Arc::new(|_path: &Path| -> ZoneResult<Box<dyn RasterSource>> { panic!("driver fault") });
    let store = RecordingStore::default();
    let service = SubfieldService::with_worker(
        params(),
        provider(),
        ThreadWorker::new(crashing),
        store.clone(),
        RecordingEvents::default(),
    )
    .expect("service");

    let result = service.determine_subfields(&key(), &field(), date());
    assert!(matches!(result, Err(ZoneError::Processing(_))), "{:?}", result);
    assert!(store.0.lock().expect("store lock").is_empty());
}

#[cfg(unix)]
mod process_worker {
    use super::*;
    use ndvi_zones::ProcessWorker;
    use std::fs;

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("worker.sh");
        fs::write(&path, body).expect("write script");
        path
    }

    fn lines(path: &Path) -> usize {
        fs::read_to_string(path).map(|s| s.lines().count()).unwrap_or(0)
    }

    fn service(
        worker: ProcessWorker,
        params: ZoningParams,
        store: RecordingStore,
    ) -> SubfieldService<FixedProvider, RecordingStore, RecordingEvents, ProcessWorker> {
        SubfieldService::with_worker(params, provider(), worker, store, RecordingEvents::default()).expect("service")
    }

    #[test]
    fn test_worker_output_is_stored() {
        let dir = tempfile::tempdir().expect("temp dir");
        let args_file = dir.path().join("args.txt");
        let body = format!("printf '%s\\n' \"$@\" > '{}'\necho '[]'\n", args_file.display());
        let worker = ProcessWorker::new("sh").arg(script(dir.path(), &body));
        let store = RecordingStore::default();

        let batch = service(worker, params(), store.clone())
            .determine_subfields(&key(), &field(), date())
            .expect("batch");
        assert!(batch.is_empty());
        assert_eq!(store.0.lock().expect("store lock").len(), 1);

        let args = fs::read_to_string(&args_file).expect("args");
        let args: Vec<&str> = args.lines().collect();
        assert_eq!(args[0], "zones");
        assert_eq!(args[1], "ndvi.tif");
        assert!(args.contains(&"--in-worker"));
    }

    #[test]
    fn test_timed_out_worker_stops_running() {
        let dir = tempfile::tempdir().expect("temp dir");
        let ticks = dir.path().join("ticks.txt");
        let body = format!("while true; do echo tick >> '{}'; sleep 0.05; done\n", ticks.display());
        let worker = ProcessWorker::new("sh").arg(script(dir.path(), &body));
        let params = ZoningParams {
            timeout_secs: 0.3,
            poll_interval_ms: 20,
            ..params()
        };
        let store = RecordingStore::default();

        let result = service(worker, params, store.clone()).determine_subfields(&key(), &field(), date());
        assert!(matches!(result, Err(ZoneError::Timeout(_))), "{:?}", result);
        assert!(store.0.lock().expect("store lock").is_empty());

        let at_timeout = lines(&ticks);
        thread::sleep(Duration::from_millis(400));
        assert_eq!(lines(&ticks), at_timeout);
    }

    #[test]
    fn test_rejecting_worker_is_invalid_input() {
        let dir = tempfile::tempdir().expect("temp dir");
        let worker = ProcessWorker::new("sh").arg(script(dir.path(), "exit 1\n"));
        let result = service(worker, params(), RecordingStore::default()).determine_subfields(&key(), &field(), date());
        assert!(matches!(result, Err(ZoneError::InvalidInput(_))), "{:?}", result);
    }

    #[test]
    fn test_failing_worker_is_processing_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let worker = ProcessWorker::new("sh").arg(script(dir.path(), "echo '[' ; exit 0\n"));
        let result = service(worker, params(), RecordingStore::default()).determine_subfields(&key(), &field(), date());
        assert!(matches!(result, Err(ZoneError::Processing(_))), "{:?}", result);
    }
}
