//! Fixture helpers for unit tests.
use crate::prompt::Prompter;
use crate::tofu::{RawOutput, StructuredCall, Tofu, TofuError, TofuLauncher};
use git2::{Oid, Repository, RepositoryInitOptions, Signature};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub fn init_repo(path: &Path, branch: &str) -> Repository {
    let mut options = RepositoryInitOptions::new();
    options.initial_head(branch);
    Repository::init_opts(path, &options).expect("init repository")
}

/// Write `files` into the work tree and commit them on HEAD.
pub fn commit_files(repo: &Repository, files: &[(&str, &str)], message: &str) -> Oid {
    let workdir = repo.workdir().expect("non-bare repository");
    let mut index = repo.index().expect("open index");
    for (name, contents) in files {
        let path = workdir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(&path, contents).expect("write fixture file");
        index.add_path(Path::new(name)).expect("stage fixture file");
    }
    index.write().expect("write index");
    let tree_id = index.write_tree().expect("write tree");
    let tree = repo.find_tree(tree_id).expect("find tree");
    let signature = Signature::now("fixture", "fixture@example.com").expect("signature");
    let parents = match repo.head() {
        Ok(head) => vec![head.peel_to_commit().expect("head commit")],
        Err(_) => Vec::new(),
    };
    let parent_refs: Vec<_> = parents.iter().collect();
    repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        message,
        &tree,
        &parent_refs,
    )
    .expect("commit fixture")
}

/// Create a non-bare origin repository with one commit on `branch`.
pub fn origin_with_commit(path: &Path, branch: &str, files: &[(&str, &str)]) -> Repository {
    let repo = init_repo(path, branch);
    commit_files(&repo, files, "initial estate");
    repo
}

/// Create a bare origin at `path` whose `branch` holds `files`, seeded by a
/// push from a scratch clone next to it. Pushes into it behave like a
/// hosted remote.
pub fn bare_origin_with_commit(path: &Path, branch: &str, files: &[(&str, &str)]) -> Repository {
    let seed_path = path.with_extension("seed");
    let seed = origin_with_commit(&seed_path, branch, files);
    let mut options = RepositoryInitOptions::new();
    options.bare(true).initial_head(branch);
    let origin = Repository::init_opts(path, &options).expect("init bare repository");
    let target = path.to_str().expect("utf-8 origin path");
    let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
    seed.remote_anonymous(target)
        .expect("seed remote")
        .push(&[refspec.as_str()], None)
        .expect("seed bare origin");
    fs::remove_dir_all(&seed_path).expect("remove seed clone");
    origin
}

pub fn head_oid(path: &Path) -> Oid {
    let repo = Repository::open(path).expect("open repository");
    let head = repo.head().expect("read HEAD");
    head.target().expect("direct HEAD")
}

type RawHandler = Rc<RefCell<dyn FnMut(&[String]) -> RawOutput>>;
type StructuredHandler = Rc<RefCell<dyn FnMut(&str, &[String]) -> StructuredCall>>;

/// In-memory tool whose raw calls are answered by a closure and recorded.
#[derive(Clone)]
pub struct FakeTofu {
    workdir: PathBuf,
    calls: Rc<RefCell<Vec<Vec<String>>>>,
    structured_calls: Rc<Cell<usize>>,
    raw: RawHandler,
    structured: Option<StructuredHandler>,
}

impl FakeTofu {
    pub fn new(handler: impl FnMut(&[String]) -> RawOutput + 'static) -> Self {
        Self {
            workdir: PathBuf::from("."),
            calls: Rc::new(RefCell::new(Vec::new())),
            structured_calls: Rc::new(Cell::new(0)),
            raw: Rc::new(RefCell::new(handler)),
            structured: None,
        }
    }

    pub fn with_structured(
        mut self,
        handler: impl FnMut(&str, &[String]) -> StructuredCall + 'static,
    ) -> Self {
        self.structured = Some(Rc::new(RefCell::new(handler)));
        self
    }

    /// Raw command lines run so far, across every clone of this fake.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.borrow().clone()
    }

    pub fn verbs(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|call| call.first().cloned().unwrap_or_default())
            .collect()
    }

    pub fn structured_calls(&self) -> usize {
        self.structured_calls.get()
    }
}

impl Tofu for FakeTofu {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn run_raw(&mut self, args: &[String]) -> Result<RawOutput, TofuError> {
        self.calls.borrow_mut().push(args.to_vec());
        let output = (self.raw.borrow_mut())(args);
        Ok(output)
    }

    fn run_structured(
        &mut self,
        verb: &str,
        args: &[String],
    ) -> Result<StructuredCall, TofuError> {
        self.structured_calls.set(self.structured_calls.get() + 1);
        match &self.structured {
            Some(handler) => Ok((handler.borrow_mut())(verb, args)),
            None => Ok(StructuredCall::Unsupported),
        }
    }
}

/// Launcher handing out clones of one [`FakeTofu`], recording each launch.
pub struct FakeLauncher {
    pub tofu: FakeTofu,
    launches: RefCell<Vec<(PathBuf, BTreeMap<String, String>)>>,
}

impl FakeLauncher {
    pub fn new(tofu: FakeTofu) -> Self {
        Self {
            tofu,
            launches: RefCell::new(Vec::new()),
        }
    }

    pub fn launches(&self) -> Vec<(PathBuf, BTreeMap<String, String>)> {
        self.launches.borrow().clone()
    }
}

impl TofuLauncher for FakeLauncher {
    fn launch(
        &self,
        workdir: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<Box<dyn Tofu>, TofuError> {
        self.launches
            .borrow_mut()
            .push((workdir.to_path_buf(), env.clone()));
        let mut tofu = self.tofu.clone();
        tofu.workdir = workdir.to_path_buf();
        Ok(Box::new(tofu))
    }
}

/// Prompter answering from a fixed script.
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
    interactive: bool,
    pub prompts: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new<const N: usize>(answers: [&str; N]) -> Self {
        Self {
            answers: answers.iter().map(|answer| answer.to_string()).collect(),
            interactive: true,
            prompts: Vec::new(),
        }
    }

    pub fn non_interactive() -> Self {
        Self {
            answers: VecDeque::new(),
            interactive: false,
            prompts: Vec::new(),
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn can_prompt(&self) -> bool {
        self.interactive
    }

    fn read_line(&mut self, message: &str, output: &mut dyn Write) -> io::Result<Option<String>> {
        self.prompts.push(message.to_string());
        output.write_all(message.as_bytes())?;
        Ok(self.answers.pop_front())
    }
}

pub fn raw(stdout: &str, stderr: &str, exit_code: i32) -> RawOutput {
    RawOutput {
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        exit_code,
    }
}

pub fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}
