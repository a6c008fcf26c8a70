use super::*;
use crate::prompt::NonInteractive;
use crate::test_support::{
    args, bare_origin_with_commit, raw, FakeLauncher, FakeTofu, ScriptedPrompter,
};
use chrono::TimeZone;
use std::fs;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    origin: PathBuf,
    record: EstateRecord,
    cache: EstateCache,
}

fn fixture(extra_files: &[(&str, &str)]) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let origin = dir.path().join("origin");
    let mut files = vec![("tofu/main.tofu", "terraform {}\n")];
    files.extend_from_slice(extra_files);
    bare_origin_with_commit(&origin, "main", &files);
    Fixture {
        record: EstateRecord::new("core", origin.to_string_lossy()),
        cache: EstateCache::new(dir.path().join("cache")),
        origin,
        _dir: dir,
    }
}

fn preset() -> PersistenceInputs {
    PersistenceInputs {
        bucket: Some("estate-state".to_string()),
        region: Some("fr-par".to_string()),
        endpoint: Some("https://s3.fr-par.scw.cloud".to_string()),
        key_prefix: Some("estates/acme/main".to_string()),
        key_suffix: None,
    }
}

fn options(inputs: PersistenceInputs) -> PersistOptions {
    PersistOptions {
        inputs,
        timestamp: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 5).unwrap()),
        ..PersistOptions::default()
    }
}

fn descriptor() -> BackendDescriptor {
    BackendDescriptor {
        schema_version: SCHEMA_VERSION,
        enabled: true,
        bucket: "estate-state".to_string(),
        key_prefix: "estates/acme/main".to_string(),
        key_suffix: "terraform.tfstate".to_string(),
        region: "fr-par".to_string(),
        endpoint: "https://s3.fr-par.scw.cloud".to_string(),
        backend_config_path: "backend/core.tfbackend".to_string(),
        notification_topic: None,
    }
}

struct Run {
    result: Result<PersistenceResult>,
    stderr: String,
}

fn run(
    fixture: &Fixture,
    launcher: &FakeLauncher,
    options: &PersistOptions,
    prompter: &mut dyn Prompter,
) -> Run {
    let env = EnvSnapshot::default();
    let persister = Persister::new(&fixture.cache, launcher, &env);
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let result = {
        let mut io = ExecutionIo::new(&mut stdout, &mut stderr);
        persister.persist(&fixture.record, options, prompter, &mut io)
    };
    Run {
        result,
        stderr: String::from_utf8(stderr).unwrap(),
    }
}

fn idle_launcher() -> FakeLauncher {
    FakeLauncher::new(FakeTofu::new(|_| raw("", "", 0)))
}

fn pushed_file(origin: &Path, branch: &str, path: &str) -> Option<String> {
    let repo = Repository::open(origin).unwrap();
    let reference = repo.find_reference(&format!("refs/heads/{branch}")).ok()?;
    let tree = reference.peel_to_commit().unwrap().tree().unwrap();
    let entry = tree.get_path(Path::new(path)).ok()?;
    let blob = repo.find_blob(entry.id()).unwrap();
    Some(String::from_utf8(blob.content().to_vec()).unwrap())
}

#[test]
fn persist_commits_and_pushes_backend_files() {
    let fixture = fixture(&[]);
    let launcher = idle_launcher();

    let run = run(&fixture, &launcher, &options(preset()), &mut NonInteractive);
    let result = run.result.unwrap();

    assert_eq!(
        result.render(),
        "updated backend/core.tfbackend and backend/persistence.yaml; pushed branch; \
         branch: estate/persist-20240501123005"
    );
    let branch = "estate/persist-20240501123005";
    assert_eq!(
        pushed_file(&fixture.origin, branch, "backend/core.tfbackend").as_deref(),
        Some(render_tfbackend(&descriptor()).as_str())
    );
    let manifest = pushed_file(&fixture.origin, branch, MANIFEST_PATH).unwrap();
    assert_eq!(
        BackendDescriptor::from_yaml(&manifest, Path::new(MANIFEST_PATH)).unwrap(),
        descriptor()
    );
    assert_eq!(pushed_file(&fixture.origin, "main", MANIFEST_PATH), None);
    assert!(launcher.launches().is_empty());
    // The mirror is left untouched for the next run.
    assert!(!fixture.cache.mirror_path("core").join(MANIFEST_PATH).exists());
}

#[test]
fn matching_configuration_is_left_alone() {
    let manifest = descriptor().to_yaml().unwrap();
    let backend = render_tfbackend(&descriptor());
    let fixture = fixture(&[
        ("backend/core.tfbackend", backend.as_str()),
        (MANIFEST_PATH, manifest.as_str()),
    ]);

    let run = run(
        &fixture,
        &idle_launcher(),
        &options(PersistenceInputs::default()),
        &mut NonInteractive,
    );
    let result = run.result.unwrap();

    assert!(!result.updated);
    assert_eq!(result.branch, None);
    assert_eq!(
        result.render(),
        "unchanged backend/core.tfbackend and backend/persistence.yaml; backend already configured"
    );
    assert_eq!(
        pushed_file(&fixture.origin, "estate/persist-20240501123005", MANIFEST_PATH),
        None
    );
}

#[test]
fn existing_backend_file_requires_force() {
    let fixture = fixture(&[("backend/core.tfbackend", "bucket = \"old\"\n")]);

    let run_once = run(&fixture, &idle_launcher(), &options(preset()), &mut NonInteractive);
    let err = run_once.result.unwrap_err();
    assert_eq!(
        err.to_string(),
        "backend/core.tfbackend already exists; rerun with --force to replace."
    );

    let mut forced = options(preset());
    forced.force = true;
    let result = run(&fixture, &idle_launcher(), &forced, &mut NonInteractive)
        .result
        .unwrap();
    assert!(result.updated);
}

#[test]
fn dirty_cache_is_refused() {
    let fixture = fixture(&[]);
    let mirror = fixture.cache.sync(&fixture.record).unwrap();
    fs::write(mirror.join("notes.txt"), "scratch\n").unwrap();

    let err = run(&fixture, &idle_launcher(), &options(preset()), &mut NonInteractive)
        .result
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "Estate cache for \"core\" has uncommitted changes: notes.txt"
    );
}

#[test]
fn prompts_fill_missing_values_and_normalize_endpoint() {
    let fixture = fixture(&[]);
    let mut prompter = ScriptedPrompter::new([
        "estate-state",
        "fr-par",
        "s3.fr-par.scw.cloud",
        "estates/acme/main",
        "",
    ]);

    let run = run(
        &fixture,
        &idle_launcher(),
        &options(PersistenceInputs::default()),
        &mut prompter,
    );
    assert!(run.result.unwrap().updated);

    assert!(run.stderr.contains("Bucket: "));
    assert!(run.stderr.contains("Key prefix [estates/unknown-owner/main]: "));
    assert!(run.stderr.contains("Key suffix [terraform.tfstate]: "));
    let manifest = pushed_file(
        &fixture.origin,
        "estate/persist-20240501123005",
        MANIFEST_PATH,
    )
    .unwrap();
    assert!(manifest.contains("https://s3.fr-par.scw.cloud"));
}

#[test]
fn non_interactive_run_requires_every_value() {
    let fixture = fixture(&[]);
    let err = run(
        &fixture,
        &idle_launcher(),
        &options(PersistenceInputs::default()),
        &mut NonInteractive,
    )
    .result
    .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Bucket is required in non-interactive mode; provide a flag or environment variable."
    );
}

#[test]
fn plain_http_endpoint_needs_opt_in() {
    let fixture = fixture(&[]);
    let mut inputs = preset();
    inputs.endpoint = Some("http://minio.local:9000".to_string());

    let err = run(&fixture, &idle_launcher(), &options(inputs.clone()), &mut NonInteractive)
        .result
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PersistenceError>(),
        Some(PersistenceError::InsecureEndpoint)
    ));

    let mut allowed = options(inputs);
    allowed.allow_insecure_endpoint = true;
    assert!(run(&fixture, &idle_launcher(), &allowed, &mut NonInteractive)
        .result
        .unwrap()
        .updated);
}

#[test]
fn fmt_runs_in_workspace_root_before_commit() {
    let fixture = fixture(&[]);
    let launcher = idle_launcher();
    let mut with_fmt = options(preset());
    with_fmt.fmt = true;

    run(&fixture, &launcher, &with_fmt, &mut NonInteractive)
        .result
        .unwrap();

    let launches = launcher.launches();
    assert_eq!(launches.len(), 1);
    let name = launches[0].0.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("concordat-persist-"), "{name}");
    assert_eq!(launcher.tofu.calls(), vec![args(&["fmt", "-recursive"])]);
}

#[test]
fn failed_fmt_stops_before_push() {
    let fixture = fixture(&[]);
    let launcher = FakeLauncher::new(FakeTofu::new(|_| raw("", "main.tofu: syntax error", 3)));
    let mut with_fmt = options(preset());
    with_fmt.fmt = true;

    let run = run(&fixture, &launcher, &with_fmt, &mut NonInteractive);
    let err = run.result.unwrap_err();

    assert_eq!(err.to_string(), "tofu fmt failed with exit code 3");
    assert!(run.stderr.contains("syntax error"));
    assert_eq!(
        pushed_file(&fixture.origin, "estate/persist-20240501123005", MANIFEST_PATH),
        None
    );
}
