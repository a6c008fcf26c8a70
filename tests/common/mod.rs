//! Shared harness for end-to-end CLI tests.
//!
//! Each harness owns a temp dir holding an origin estate repository, isolated
//! XDG config and cache roots, and a fake `tofu` script that appends every
//! command line it receives to a log file.
#![allow(dead_code)]

use git2::{Repository, RepositoryInitOptions, Signature};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

pub const TOKEN: &str = "gh-test-token";

const FAKE_TOFU: &str = r#"#!/bin/sh
echo "$*" >> "$FAKE_TOFU_LOG"
case "$1" in
  init)
    echo "OpenTofu has been successfully initialized!"
    ;;
  plan)
    cat terraform.tfvars
    exit "${FAKE_TOFU_PLAN_EXIT:-0}"
    ;;
  apply)
    if [ -n "$FAKE_TOFU_APPLY_ERROR" ]; then
      printf '%s\n' "$FAKE_TOFU_APPLY_ERROR" >&2
      exit 1
    fi
    echo "Apply complete! Resources: 0 added, 0 changed, 0 destroyed."
    ;;
  validate)
    printf '%s\n' '{"valid":true,"error_count":0,"warning_count":0,"diagnostics":[]}'
    ;;
  fmt)
    ;;
  *)
    echo "unexpected command: $*" >&2
    exit 9
    ;;
esac
"#;

pub struct Harness {
    pub dir: TempDir,
    pub origin: PathBuf,
    tofu: PathBuf,
    log: PathBuf,
}

impl Harness {
    /// Build a bare origin repository on `main` holding `files`, plus the
    /// fake tool.
    pub fn new(files: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let seed = commit_files(&dir.path().join("seed"), files);
        let origin = dir.path().join("origin.git");
        publish_bare(&seed, &origin);

        let tofu = dir.path().join("bin/tofu");
        fs::create_dir_all(tofu.parent().expect("script dir")).expect("create bin dir");
        fs::write(&tofu, FAKE_TOFU).expect("write fake tofu");
        let mut perms = fs::metadata(&tofu).expect("stat fake tofu").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&tofu, perms).expect("chmod fake tofu");

        let log = dir.path().join("tofu.log");
        Self {
            dir,
            origin,
            tofu,
            log,
        }
    }

    /// Estate repository with a root module and an inventory file.
    pub fn with_estate() -> Self {
        Self::new(&[
            ("tofu/main.tofu", "variable \"github_owner\" {}\n"),
            (
                "tofu/inventory/repositories.yaml",
                "%YAML 1.2\n---\nrepositories: []\n",
            ),
        ])
    }

    /// `concordat` with a cleared environment pointing at this harness.
    pub fn command(&self) -> Command {
        let root = self.dir.path();
        let mut command = Command::new(env!("CARGO_BIN_EXE_concordat"));
        command
            .env_clear()
            .env("PATH", std::env::var_os("PATH").unwrap_or_default())
            .env("HOME", root.join("home"))
            .env("XDG_CONFIG_HOME", root.join("config"))
            .env("XDG_CACHE_HOME", root.join("cache"))
            .env("CONCORDAT_TOFU", &self.tofu)
            .env("FAKE_TOFU_LOG", &self.log)
            .current_dir(root);
        command
    }

    pub fn run(&self, args: &[&str]) -> Output {
        self.command().args(args).output().expect("run concordat")
    }

    /// Register the origin as estate `core` owned by `acme`.
    pub fn register(&self) {
        let origin = self.origin.to_string_lossy().into_owned();
        let output = self.run(&[
            "estate",
            "register",
            "core",
            &origin,
            "--github-owner",
            "acme",
        ]);
        assert!(output.status.success(), "{}", stderr(&output));
    }

    /// Command lines the fake tool has received, in order.
    pub fn tofu_calls(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn mirror(&self, alias: &str) -> PathBuf {
        self.dir.path().join("cache/concordat/estates").join(alias)
    }
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Value following `prefix` on the first stderr line that starts with it.
pub fn stderr_value(output: &Output, prefix: &str) -> Option<String> {
    stderr(output)
        .lines()
        .find_map(|line| line.strip_prefix(prefix).map(str::to_string))
}

/// Create (or reuse) a repository at `path` and commit `files` on `main`.
pub fn commit_files(path: &Path, files: &[(&str, &str)]) -> Repository {
    let repo = Repository::init(path).expect("init repository");
    for (name, contents) in files {
        let file = path.join(name);
        fs::create_dir_all(file.parent().expect("file parent")).expect("create dirs");
        fs::write(&file, contents).expect("write fixture file");
    }
    let signature = Signature::now("Estate Test", "estate@example.com").expect("signature");
    let tree_id = {
        let mut index = repo.index().expect("index");
        for (name, _) in files {
            index.add_path(Path::new(name)).expect("stage file");
        }
        index.write().expect("write index");
        index.write_tree().expect("write tree")
    };
    {
        let tree = repo.find_tree(tree_id).expect("find tree");
        let parent = repo
            .find_reference("refs/heads/main")
            .ok()
            .and_then(|reference| reference.peel_to_commit().ok());
        let parents: Vec<_> = parent.iter().collect();
        repo.commit(
            Some("refs/heads/main"),
            &signature,
            &signature,
            "estate fixture",
            &tree,
            &parents,
        )
        .expect("commit");
    }
    repo.set_head("refs/heads/main").expect("set HEAD");
    repo
}

/// Push `main` from `seed` into a new bare repository at `origin`.
pub fn publish_bare(seed: &Repository, origin: &Path) {
    let mut options = RepositoryInitOptions::new();
    options.bare(true).initial_head("main");
    Repository::init_opts(origin, &options).expect("init bare origin");
    seed.remote_anonymous(origin.to_str().expect("utf-8 origin path"))
        .expect("seed remote")
        .push(&["refs/heads/main:refs/heads/main"], None)
        .expect("publish seed");
}

/// Branch names in `repo` starting with `prefix`.
pub fn branches_with_prefix(repo: &Path, prefix: &str) -> Vec<String> {
    let repo = Repository::open(repo).expect("open repository");
    let branches = repo
        .branches(Some(git2::BranchType::Local))
        .expect("list branches");
    branches
        .filter_map(Result::ok)
        .filter_map(|(branch, _)| branch.name().ok().flatten().map(str::to_string))
        .filter(|name| name.starts_with(prefix))
        .collect()
}
