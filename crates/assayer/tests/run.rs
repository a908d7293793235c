//! Integration tests for the run lifecycle and scheduler.

use assayer::store::{InputStore, ResourceCache};
use assayer::*;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Local store that counts real fetches.
struct CountingStore {
    params: StoreParameters,
    cache: ResourceCache,
    root: PathBuf,
    fetches: Arc<AtomicUsize>,
}

impl CountingStore {
    fn new(name: &str, root: &Path) -> (Arc<dyn InputStore>, Arc<AtomicUsize>) {
        let fetches = Arc::new(AtomicUsize::new(0));
        let params =
            StoreParameters::new(name, StoreKind::Local).uri(root.to_string_lossy().into_owned());
        let store = Self {
            params,
            cache: ResourceCache::new().expect("Failed to create cache"),
            root: root.to_path_buf(),
            fetches: fetches.clone(),
        };
        (Arc::new(store), fetches)
    }
}

impl InputStore for CountingStore {
    fn params(&self) -> &StoreParameters {
        &self.params
    }

    fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    fn materialize(&self, locator: &str) -> Result<PathBuf, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let source = self.root.join(locator);
        if !source.exists() {
            return Err(StoreError::ResourceNotFound {
                store: self.params.name.clone(),
                locator: locator.to_string(),
            });
        }
        let path = self.cache.temp_path(locator);
        std::fs::copy(&source, &path)?;
        Ok(path)
    }

    fn fetch_native(&self, locator: &str) -> Result<String, StoreError> {
        Ok(locator.to_string())
    }
}

/// Library whose plugins count lines and fail on `check: {fail: true}`.
struct StubLibrary {
    decl: LibraryDecl,
    executed: Arc<AtomicUsize>,
    destroyed: Arc<AtomicUsize>,
}

impl StubLibrary {
    fn new(name: &str, affinity: Affinity) -> Self {
        let mut decl = LibraryDecl::new(name, "1.0");
        for operation in Operation::ALL {
            decl = decl.operation(operation, affinity);
        }
        Self {
            decl,
            executed: Arc::new(AtomicUsize::new(0)),
            destroyed: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Library for StubLibrary {
    fn decl(&self) -> &LibraryDecl {
        &self.decl
    }

    fn builder(&self, _: Operation) -> Box<dyn PluginBuilder> {
        Box::new(StubBuilder {
            decl: self.decl.clone(),
            executed: self.executed.clone(),
            destroyed: self.destroyed.clone(),
        })
    }

    fn rehydrate(
        &self,
        spec: PluginSpec,
        reader: DataReader,
    ) -> Result<Box<dyn Plugin>, PluginError> {
        Ok(Box::new(StubPlugin {
            spec,
            reader,
            executed: self.executed.clone(),
        }))
    }
}

struct StubBuilder {
    decl: LibraryDecl,
    executed: Arc<AtomicUsize>,
    destroyed: Arc<AtomicUsize>,
}

impl PluginBuilder for StubBuilder {
    fn build(&mut self, request: &BuildRequest<'_>) -> Result<Vec<Box<dyn Plugin>>, Error> {
        let mut plugins: Vec<Box<dyn Plugin>> = Vec::new();
        for target in request.targets()? {
            if let Some((spec, reader)) = request.bind(&self.decl, target) {
                plugins.push(Box::new(StubPlugin {
                    spec,
                    reader,
                    executed: self.executed.clone(),
                }));
            }
        }
        Ok(plugins)
    }

    fn destroy(&mut self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

struct StubPlugin {
    spec: PluginSpec,
    reader: DataReader,
    executed: Arc<AtomicUsize>,
}

impl Plugin for StubPlugin {
    fn spec(&self) -> &PluginSpec {
        &self.spec
    }

    fn framework_name(&self) -> &str {
        "stub"
    }

    fn framework_version(&self) -> String {
        "1.0".into()
    }

    fn run_operation(&self) -> Result<serde_json::Value, PluginError> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        let handles = self.reader.fetch_all(&self.spec.resource)?;
        if let Payload::Constraint(constraint) = &self.spec.payload {
            if constraint.check["fail"] == true {
                return Err(PluginError::Failed("constraint failed".into()));
            }
        }
        let mut lines = 0;
        for handle in handles {
            let DataHandle::Path(path) = handle else {
                return Err(PluginError::Failed("expected a path".into()));
            };
            lines += std::fs::read_to_string(path)?.lines().count();
        }
        Ok(json!({ "lines": lines }))
    }

    fn render_report(&self, raw: &serde_json::Value) -> Result<NormalizedReport, PluginError> {
        let framework = self.framework();
        let resource = self.spec.resource.name.clone();
        Ok(match &self.spec.payload {
            Payload::Constraint(constraint) => NormalizedReport::Validation(ValidationReport {
                framework,
                resource,
                duration: 0.0,
                constraint: constraint.clone(),
                valid: true,
                errors: ErrorSummary::default(),
            }),
            Payload::Metric(metric) => NormalizedReport::Metric(MetricReport {
                framework,
                resource,
                duration: 0.0,
                metric: metric.clone(),
                value: raw["lines"].clone(),
            }),
            Payload::None => NormalizedReport::Schema(SchemaReport {
                framework,
                resource,
                duration: 0.0,
                fields: Vec::new(),
            }),
        })
    }

    fn render_artifact(
        &self,
        raw: &serde_json::Value,
    ) -> Result<Vec<RenderedArtifact>, PluginError> {
        Ok(vec![RenderedArtifact::json(raw.clone(), "stub.json")])
    }
}

struct Fixture {
    dir: TempDir,
    executed: Arc<AtomicUsize>,
    destroyed: Arc<AtomicUsize>,
    registry: Arc<PluginRegistry>,
}

impl Fixture {
    fn new(affinity: Affinity) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        std::fs::create_dir_all(dir.path().join("data")).expect("Failed to create data dir");
        std::fs::write(dir.path().join("data/a.csv"), "id\n1\n2\n").expect("Failed to write a");
        std::fs::write(dir.path().join("data/b.csv"), "id\n3\n").expect("Failed to write b");

        let library = StubLibrary::new("stub", affinity);
        let executed = library.executed.clone();
        let destroyed = library.destroyed.clone();
        let mut registry = PluginRegistry::new();
        registry.register(library);

        Self {
            dir,
            executed,
            destroyed,
            registry: Arc::new(registry),
        }
    }

    fn data(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    fn runs(&self) -> PathBuf {
        self.dir.path().join("runs")
    }

    fn data_store(&self) -> StoreParameters {
        StoreParameters::new("data", StoreKind::Local).uri(self.data().to_string_lossy())
    }

    fn output_store(&self) -> StoreParameters {
        StoreParameters::new("out", StoreKind::Local).uri(self.runs().to_string_lossy())
    }

    fn config(&self) -> RunConfig {
        RunConfig::default()
            .with(Operation::Inference, ExecConfig::new("stub"))
            .with(Operation::Validation, ExecConfig::new("stub"))
            .with(Operation::Profiling, ExecConfig::new("stub"))
            .with(Operation::Metric, ExecConfig::new("stub"))
            .num_worker(2)
    }

    fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }
}

fn constraint(name: &str, resource: &str, fail: bool) -> Constraint {
    Constraint {
        name: name.into(),
        title: None,
        kind: "stub".into(),
        resources: vec![resource.into()],
        weight: 5,
        check: json!({ "fail": fail }),
    }
}

fn read_json(path: &Path) -> serde_json::Value {
    let bytes = std::fs::read(path).expect("Failed to read file");
    serde_json::from_slice(&bytes).expect("Failed to parse JSON")
}

#[test]
fn test_fetch_happens_once_per_locator() {
    let fx = Fixture::new(Affinity::Sequential);
    let (store, fetches) = CountingStore::new("data", &fx.data());
    let mut run = RunBuilder::new("exp", fx.registry.clone())
        .input_store(store)
        .resource(Resource::new("a", "a.csv", "data"))
        .config(fx.config())
        .build()
        .expect("Failed to build run");

    run.scope(|run| {
        let constraints = [constraint("c1", "a", false), constraint("c2", "a", false)];
        let outputs = run.validate(&constraints, ErrorReportMode::Partial)?;
        assert_eq!(outputs.len(), 2);
        Ok(())
    })
    .expect("Run failed");

    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[test]
fn test_failures_stay_inside_their_outputs() {
    let fx = Fixture::new(Affinity::MultiThread);
    let mut run = RunBuilder::new("exp", fx.registry.clone())
        .store(fx.data_store())
        .resources([
            Resource::new("a", "a.csv", "data"),
            Resource::new("b", "b.csv", "data"),
        ])
        .config(fx.config())
        .build()
        .expect("Failed to build run");

    let mut active = run.enter().expect("Failed to enter run");
    let constraints = [
        constraint("ok-a", "a", false),
        constraint("bad-a", "a", true),
        constraint("ok-b", "b", false),
        constraint("bad-b", "b", true),
        constraint("ok-b2", "b", false),
    ];
    let outputs = active
        .validate(&constraints, ErrorReportMode::Partial)
        .expect("validate failed");

    assert_eq!(outputs.len(), 5);
    assert_eq!(outputs.iter().filter(|o| !o.is_success()).count(), 2);
    assert_eq!(active.results().count(Operation::Validation, StageStatus::Error), 2);
    assert_eq!(active.results().count(Operation::Validation, StageStatus::Success), 3);
    // Thread lane collects in submission order.
    let names: Vec<_> = outputs.iter().map(|o| o.plugin.payload.name().unwrap_or("")).collect();
    assert_eq!(names, vec!["ok-a", "bad-a", "ok-b", "bad-b", "ok-b2"]);
    active.finish().expect("Failed to finish run");
}

#[test]
fn test_requery_returns_recorded_outputs() {
    let fx = Fixture::new(Affinity::Sequential);
    let mut run = RunBuilder::new("exp", fx.registry.clone())
        .store(fx.data_store())
        .resource(Resource::new("a", "a.csv", "data"))
        .config(fx.config())
        .build()
        .expect("Failed to build run");

    run.scope(|run| {
        let constraints = [constraint("c1", "a", false)];
        let first = run.validate(&constraints, ErrorReportMode::Partial)?;
        let second = run.validate(&constraints, ErrorReportMode::Full)?;
        assert_eq!(fx.executed(), 1);
        assert!(Arc::ptr_eq(&first[0], &second[0]));
        Ok(())
    })
    .expect("Run failed");
    assert_eq!(fx.destroyed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_run_directory_collision() {
    let fx = Fixture::new(Affinity::Sequential);
    let build = |overwrite: bool| {
        RunBuilder::new("exp", fx.registry.clone())
            .run_id("r1")
            .overwrite(overwrite)
            .metadata_store(fx.output_store())
            .build()
    };

    let mut first = build(false).expect("Failed to build first run");
    first.scope(|_| Ok(())).expect("Run failed");
    let run_json = fx.runs().join("exp/r1/metadata/run.json");
    assert!(run_json.is_file());

    assert!(matches!(
        build(false),
        Err(Error::Run(RunError::RunAlreadyExists { .. }))
    ));

    let _second = build(true).expect("Failed to overwrite run");
    assert!(!run_json.exists());
}

#[test]
fn test_artifact_store_sharing_the_metadata_root() {
    let fx = Fixture::new(Affinity::Sequential);
    let root = fx.runs().to_string_lossy().into_owned();
    let build = |overwrite: bool| {
        RunBuilder::new("exp", fx.registry.clone())
            .run_id("r1")
            .overwrite(overwrite)
            .store(fx.data_store())
            .resource(Resource::new("a", "a.csv", "data"))
            .metadata_store(StoreParameters::new("meta", StoreKind::Local).uri(root.as_str()))
            .artifact_store(StoreParameters::new("art", StoreKind::Local).uri(root.as_str()))
            .config(fx.config())
            .build()
    };

    for overwrite in [false, true] {
        let mut run = build(overwrite).expect("Failed to build run");
        run.scope(|run| run.persist_schema().map(|_| ()))
            .expect("Run failed");
        let run_dir = fx.runs().join("exp/r1");
        assert!(run_dir.join("metadata/run.json").is_file());
        assert!(run_dir.join("metadata/artifact_0.json").is_file());
        assert!(run_dir.join("artifacts/stub_0.json").is_file());
    }
}

#[test]
fn test_run_metadata_hides_store_credentials() {
    let fx = Fixture::new(Affinity::Sequential);
    let auth = json!({"type": "basic", "user": "u", "password": "hunter2"});
    let mut run = RunBuilder::new("exp", fx.registry.clone())
        .run_id("r1")
        .store(fx.data_store())
        .store(
            StoreParameters::new("web", StoreKind::Remote)
                .uri("https://example.org/data")
                .config("auth", auth),
        )
        .metadata_store(fx.output_store())
        .build()
        .expect("Failed to build run");
    run.scope(|_| Ok(())).expect("Run failed");

    let path = fx.runs().join("exp/r1/metadata/run.json");
    let text = std::fs::read_to_string(&path).expect("Failed to read run.json");
    assert!(!text.contains("hunter2"));
    let stores = &read_json(&path)["stores"];
    assert_eq!(stores[1]["config"]["auth"]["user"], "u");
    assert_eq!(stores[1]["config"]["auth"]["password"], "***");
}

#[test]
fn test_artifact_suffixes() {
    let fx = Fixture::new(Affinity::Sequential);
    let mut run = RunBuilder::new("exp", fx.registry.clone())
        .run_id("r1")
        .store(fx.data_store())
        .resource(Resource::new("a", "a.csv", "data"))
        .metadata_store(fx.output_store())
        .config(fx.config())
        .build()
        .expect("Failed to build run");

    run.scope(|run| {
        let first = run.persist_schema()?;
        let second = run.persist_schema()?;
        assert_eq!(first[0].filename, "stub_0.json");
        assert_eq!(second[0].filename, "stub_1.json");
        Ok(())
    })
    .expect("Run failed");

    let artifacts = fx.runs().join("exp/r1/artifacts");
    assert_eq!(read_json(&artifacts.join("stub_0.json"))["lines"], 3);
    assert!(artifacts.join("stub_1.json").is_file());
    assert!(fx.runs().join("exp/r1/metadata/artifact_1.json").is_file());
    assert_eq!(fx.executed(), 1);
}

#[test]
fn test_constraints_touch_only_named_resources() {
    let fx = Fixture::new(Affinity::Sequential);
    let (store_a, fetches_a) = CountingStore::new("sa", &fx.data());
    let (store_b, fetches_b) = CountingStore::new("sb", &fx.data());
    let mut run = RunBuilder::new("exp", fx.registry.clone())
        .input_store(store_a)
        .input_store(store_b)
        .resources([
            Resource::new("a", "a.csv", "sa"),
            Resource::new("b", "b.csv", "sb"),
        ])
        .config(fx.config())
        .build()
        .expect("Failed to build run");

    run.scope(|run| {
        let outputs = run.validate(&[constraint("c1", "a", false)], ErrorReportMode::Partial)?;
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].plugin.resource.name, "a");
        Ok(())
    })
    .expect("Run failed");

    assert_eq!(fetches_a.load(Ordering::SeqCst), 1);
    assert_eq!(fetches_b.load(Ordering::SeqCst), 0);
}

#[test]
fn test_unknown_store_fails_before_execution() {
    let fx = Fixture::new(Affinity::Sequential);
    let (store, fetches) = CountingStore::new("data", &fx.data());
    let mut run = RunBuilder::new("exp", fx.registry.clone())
        .input_store(store)
        .resources([
            Resource::new("a", "a.csv", "data"),
            Resource::new("ghost", "g.csv", "nowhere"),
        ])
        .config(fx.config())
        .build()
        .expect("Failed to build run");

    let mut active = run.enter().expect("Failed to enter run");
    let constraints = [constraint("c1", "a", false), constraint("c2", "ghost", false)];
    let result = active.validate(&constraints, ErrorReportMode::Partial);

    assert!(matches!(
        result,
        Err(Error::Store(StoreError::NotFound(ref name))) if name == "nowhere"
    ));
    assert!(!active.results().contains(Operation::Validation));
    assert_eq!(fx.executed(), 0);
    assert_eq!(fetches.load(Ordering::SeqCst), 0);
    assert_eq!(fx.destroyed.load(Ordering::SeqCst), 1);
    active.finish().expect("Failed to finish run");
}

#[test]
fn test_unregistered_library() {
    let fx = Fixture::new(Affinity::Sequential);
    let config = RunConfig::default().with(Operation::Profiling, ExecConfig::new("missing"));
    let mut run = RunBuilder::new("exp", fx.registry.clone())
        .config(config)
        .build()
        .expect("Failed to build run");

    let err = run.scope(|run| run.profile()).err().expect("profile should fail");
    assert!(matches!(err, Error::NotImplemented { operation: Operation::Profiling, .. }));
    assert_eq!(run.status(), RunStatus::Error);
}

#[test]
fn test_lifecycle_statuses() {
    let fx = Fixture::new(Affinity::Sequential);
    let build = |run_id: &str| {
        RunBuilder::new("exp", fx.registry.clone())
            .run_id(run_id)
            .metadata_store(fx.output_store())
            .build()
            .expect("Failed to build run")
    };

    let mut finished = build("finished");
    assert_eq!(finished.status(), RunStatus::Created);
    finished.scope(|_| Ok(())).expect("Run failed");
    assert_eq!(finished.status(), RunStatus::Finished);
    let info = read_json(&fx.runs().join("exp/finished/metadata/run.json"));
    assert_eq!(info["status"], "FINISHED");
    assert!(fx.runs().join("exp/finished/metadata/run_env.json").is_file());

    let mut interrupted = build("interrupted");
    let result: Result<(), Error> = interrupted.scope(|_| Err(Error::Interrupted));
    assert!(matches!(result, Err(Error::Interrupted)));
    assert_eq!(interrupted.status(), RunStatus::Interrupted);

    let mut dropped = build("dropped");
    drop(dropped.enter().expect("Failed to enter run"));
    assert_eq!(dropped.status(), RunStatus::Error);
    let info = read_json(&fx.runs().join("exp/dropped/metadata/run.json"));
    assert_eq!(info["status"], "ERROR");

    assert!(matches!(
        dropped.enter().err(),
        Some(Error::Run(RunError::InvalidState {
            expected: RunStatus::Created,
            actual: RunStatus::Error
        }))
    ));
}

#[test]
fn test_operations_require_running_state() {
    let fx = Fixture::new(Affinity::Sequential);
    let mut run = RunBuilder::new("exp", fx.registry.clone())
        .config(fx.config())
        .build()
        .expect("Failed to build run");
    assert!(matches!(
        run.infer(),
        Err(Error::Run(RunError::InvalidState { .. }))
    ));
}

#[test]
fn test_log_requires_metadata_store() {
    let fx = Fixture::new(Affinity::Sequential);
    let mut run = RunBuilder::new("exp", fx.registry.clone())
        .store(fx.data_store())
        .resource(Resource::new("a", "a.csv", "data"))
        .config(fx.config())
        .build()
        .expect("Failed to build run");

    let err = run.scope(|run| run.log_schema()).err().expect("log should fail");
    assert!(matches!(err, Error::Run(RunError::MetadataStoreNotConfigured)));
    assert_eq!(fx.executed(), 0);
}

#[test]
fn test_log_reports_including_failures() {
    let fx = Fixture::new(Affinity::Sequential);
    let mut run = RunBuilder::new("exp", fx.registry.clone())
        .run_id("r1")
        .store(fx.data_store())
        .resource(Resource::new("a", "a.csv", "data"))
        .metadata_store(fx.output_store())
        .config(fx.config())
        .build()
        .expect("Failed to build run");

    run.scope(|run| {
        let constraints = [constraint("ok", "a", false), constraint("bad", "a", true)];
        let logged = run.log_report(&constraints, ErrorReportMode::Count)?;
        assert_eq!(logged.len(), 2);
        Ok(())
    })
    .expect("Run failed");

    let metadata = fx.runs().join("exp/r1/metadata");
    assert_eq!(read_json(&metadata.join("report_0.json"))["valid"], true);
    let failed = read_json(&metadata.join("report_1.json"));
    assert_eq!(failed["status"], "error");
    assert!(failed["errors"][0].as_str().unwrap().contains("constraint failed"));
}

#[test]
fn test_mixed_lanes_run_in_order() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    std::fs::write(dir.path().join("a.csv"), "id\n1\n").expect("Failed to write a");

    let seq = StubLibrary::new("seq", Affinity::Sequential);
    let thread = StubLibrary::new("thread", Affinity::MultiThread);
    let process = StubLibrary::new("process", Affinity::MultiProcess);
    let process_executed = process.executed.clone();
    let mut registry = PluginRegistry::new();
    registry.register(process);
    registry.register(thread);
    registry.register(seq);

    let config = RunConfig::default()
        .with(Operation::Profiling, ExecConfig::new("process"))
        .with(Operation::Profiling, ExecConfig::new("thread"))
        .with(Operation::Profiling, ExecConfig::new("seq"))
        .num_worker(2);
    let mut run = RunBuilder::new("exp", Arc::new(registry))
        .store(StoreParameters::new("data", StoreKind::Local).uri(dir.path().to_string_lossy()))
        .resource(Resource::new("a", "a.csv", "data"))
        .config(config)
        .build()
        .expect("Failed to build run");

    run.scope(|run| {
        let outputs = run.profile()?;
        let libraries: Vec<_> = outputs.iter().map(|o| o.plugin.library.as_str()).collect();
        assert_eq!(libraries, vec!["seq", "thread", "process"]);
        assert!(outputs.iter().all(|o| o.is_success()));
        Ok(())
    })
    .expect("Run failed");
    assert_eq!(process_executed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_persist_data_copies_inputs() {
    let fx = Fixture::new(Affinity::Sequential);
    let mut run = RunBuilder::new("exp", fx.registry.clone())
        .run_id("r1")
        .store(fx.data_store())
        .resources([
            Resource::new("a", "a.csv", "data"),
            Resource::new("b", "b.csv", ""),
        ])
        .metadata_store(fx.output_store())
        .build()
        .expect("Failed to build run");

    run.scope(|run| run.persist_data()).expect("Run failed");

    let artifacts = fx.runs().join("exp/r1/artifacts");
    assert_eq!(
        std::fs::read_to_string(artifacts.join("a_0.csv")).expect("Failed to read copy"),
        "id\n1\n2\n"
    );
    assert!(artifacts.join("b_0.csv").is_file());
}

#[test]
fn test_multi_file_resource() {
    let fx = Fixture::new(Affinity::Sequential);
    let mut run = RunBuilder::new("exp", fx.registry.clone())
        .run_id("r1")
        .store(fx.data_store())
        .resource(Resource::new("ab", vec!["a.csv", "b.csv"], "data"))
        .metadata_store(fx.output_store())
        .config(fx.config())
        .build()
        .expect("Failed to build run");

    run.scope(|run| {
        let outputs = run.profile()?;
        assert_eq!(outputs[0].report.status, StageStatus::Success);
        let raw = outputs[0].operation.artifact.as_ref().expect("missing raw result");
        assert_eq!(raw["lines"], 5);
        let persisted = run.persist_data()?;
        let names: Vec<_> = persisted.iter().map(|p| p.filename.as_str()).collect();
        assert_eq!(names, vec!["a_0.csv", "b_0.csv"]);
        assert!(persisted.iter().all(|p| p.resource == "ab"));
        Ok(())
    })
    .expect("Run failed");

    let artifacts = fx.runs().join("exp/r1/artifacts");
    assert_eq!(
        std::fs::read_to_string(artifacts.join("b_0.csv")).expect("Failed to read copy"),
        "id\n3\n"
    );
    let run_json = read_json(&fx.runs().join("exp/r1/metadata/run.json"));
    assert_eq!(run_json["resources"][0]["path"], json!(["a.csv", "b.csv"]));
}
