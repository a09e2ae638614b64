use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use blockflow_core::{Args, FlowConfig, FlowError};
use blockflow_notify::dispatcher::DispatchResult;
use blockflow_notify::Dispatcher;
use blockflow_store::{RecordSet, Target};
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::block::{extend_unique, Block, Cache, Family, FnRef, IntoDependencies};
use crate::deferred::{erase, BlockContext, DeferredFunction, SeedSource};
use crate::output::IntoBlockOutput;
use crate::params::{Instance, LABEL_SEPARATOR};
use crate::terminal::{ConfirmDelete, TerminalPrompt};

pub(super) type AtEndFn = Box<dyn Fn(&Scheduler) -> anyhow::Result<()>>;

/// A callable run in-process once dispatching drains.
pub(super) struct AtEnd {
    pub(super) func: AtEndFn,
    pub(super) doc: Option<String>,
}

/// Registry of cached functions for one script, plus everything a run
/// needs: output directory, settings, confirmation prompt and notifier.
pub struct Scheduler {
    pub(super) dirpath: PathBuf,
    /// Prefix of every record file, normally the executable's stem.
    pub(super) script: String,
    pub(super) config: FlowConfig,
    pub(super) blocks: IndexMap<String, Block>,
    pub(super) families: IndexMap<String, Family>,
    pub(super) at_end: IndexMap<String, AtEnd>,
    pub(super) prompt: Box<dyn ConfirmDelete>,
    pub(super) seed: SeedSource,
    pub(super) dispatcher: Dispatcher,
    /// Notification threads still delivering.
    pub(super) notifications: Vec<JoinHandle<Vec<DispatchResult>>>,
}

impl Scheduler {
    /// Create a scheduler writing to `dirpath`, with settings from the
    /// user config file and environment.
    pub fn new(dirpath: impl AsRef<Path>) -> Result<Self, FlowError> {
        let config = FlowConfig::load()?;
        Self::with_config(dirpath, config)
    }

    pub fn with_config(dirpath: impl AsRef<Path>, config: FlowConfig) -> Result<Self, FlowError> {
        let dirpath = resolve_dirpath(dirpath.as_ref())?;
        fs::create_dir_all(&dirpath)?;

        let dispatcher = match Dispatcher::from_config(&config) {
            Ok(dispatcher) => dispatcher,
            Err(e) => {
                warn!(error = %e, "notifications disabled");
                Dispatcher::default()
            }
        };

        debug!(dir = %dirpath.display(), "scheduler created");
        Ok(Self {
            dirpath,
            script: default_script_name(),
            config,
            blocks: IndexMap::new(),
            families: IndexMap::new(),
            at_end: IndexMap::new(),
            prompt: Box::new(TerminalPrompt),
            seed: SeedSource::default(),
            dispatcher,
            notifications: Vec::new(),
        })
    }

    /// Override the record file prefix. Targets of already registered
    /// blocks follow the new name.
    pub fn with_script_name(mut self, script: impl Into<String>) -> Self {
        self.script = script.into();
        let retargeted: Vec<(String, Target)> = self
            .blocks
            .keys()
            .map(|name| (name.clone(), self.target_for(name)))
            .collect();
        for (name, target) in retargeted {
            if let Some(block) = self.blocks.get_mut(&name) {
                block.target = target;
            }
        }
        self
    }

    pub fn with_prompt(mut self, prompt: impl ConfirmDelete + 'static) -> Self {
        self.prompt = Box::new(prompt);
        self
    }

    pub fn with_seed(mut self, seed: SeedSource) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    // ── Registration ──────────────────────────────────────────

    /// Register a cached function with no arguments.
    pub fn cache<F, O>(&mut self, name: &str, f: F) -> Result<FnRef, FlowError>
    where
        F: Fn(&mut BlockContext) -> anyhow::Result<O> + Send + Sync + 'static,
        O: IntoBlockOutput,
    {
        self.cache_with(Cache::new(name), f)
    }

    pub fn cache_with<F, O>(&mut self, spec: Cache, f: F) -> Result<FnRef, FlowError>
    where
        F: Fn(&mut BlockContext) -> anyhow::Result<O> + Send + Sync + 'static,
        O: IntoBlockOutput,
    {
        self.ensure_unused(&spec.name)?;
        let mut block = Block::new(
            DeferredFunction::new(erase(f), Args::new()),
            self.target_for(&spec.name),
        );
        block.dependencies = spec.depends;
        block.doc = spec.doc;

        info!(block = %spec.name, "registered cached function");
        self.blocks.insert(spec.name.clone(), block);
        Ok(FnRef::new(spec.name))
    }

    /// Register a function whose blocks are created later by [`add`](Self::add).
    pub fn family<F, O>(&mut self, name: &str, f: F) -> Result<FnRef, FlowError>
    where
        F: Fn(&mut BlockContext) -> anyhow::Result<O> + Send + Sync + 'static,
        O: IntoBlockOutput,
    {
        self.family_with(Cache::new(name), f)
    }

    pub fn family_with<F, O>(&mut self, spec: Cache, f: F) -> Result<FnRef, FlowError>
    where
        F: Fn(&mut BlockContext) -> anyhow::Result<O> + Send + Sync + 'static,
        O: IntoBlockOutput,
    {
        self.ensure_unused(&spec.name)?;
        let family = Family::new(erase(f), spec.doc, spec.depends);
        info!(family = %spec.name, "registered instance family");
        self.families.insert(spec.name.clone(), family);
        Ok(FnRef::new(spec.name))
    }

    /// Expand `instance` into concrete blocks of `family`.
    pub fn add(&mut self, family: &FnRef, instance: Instance) -> Result<Vec<FnRef>, FlowError> {
        let base = family.name();
        let expansions = instance.expand()?;
        let labels: Vec<String> = expansions.iter().map(|e| e.label.clone()).collect();

        let (names, func, dependencies) = {
            let fam = self
                .families
                .get_mut(base)
                .ok_or_else(|| FlowError::UnknownBlock(base.to_string()))?;
            let names = fam.assign_names(base, &labels);
            if let Some(taken) = names.iter().find(|n| self.blocks.contains_key(*n)) {
                return Err(FlowError::DuplicateBlock(taken.clone()));
            }
            extend_unique(&mut fam.gathered, instance.gathered());
            fam.members.extend(names.iter().cloned());
            (names, Arc::clone(&fam.func), fam.dependencies.clone())
        };

        for (name, expansion) in names.iter().zip(expansions) {
            let mut block = Block::new(
                DeferredFunction::new(Arc::clone(&func), expansion.args),
                self.target_for(name),
            );
            block.dependencies = dependencies.clone();
            block.family = Some(base.to_string());
            self.blocks.insert(name.clone(), block);
        }

        info!(family = %base, added = names.len(), "instances added");
        Ok(names.into_iter().map(FnRef::new).collect())
    }

    /// Add one instance per entry; the key becomes the label unless the
    /// instance already carries one.
    pub fn add_instances<I, L>(&mut self, family: &FnRef, instances: I) -> Result<Vec<FnRef>, FlowError>
    where
        I: IntoIterator<Item = (L, Instance)>,
        L: Into<String>,
    {
        let mut added = Vec::new();
        for (label, mut instance) in instances {
            instance.set_label_if_missing(label.into());
            added.extend(self.add(family, instance)?);
        }
        Ok(added)
    }

    /// Declare that `on` reads the output of `deps`. On a family this
    /// applies to existing members and to members added later.
    pub fn depends(&mut self, on: impl AsRef<str>, deps: impl IntoDependencies) -> Result<(), FlowError> {
        let on = on.as_ref();
        let deps = deps.into_dependencies();

        if let Some(family) = self.families.get_mut(on) {
            extend_unique(&mut family.dependencies, deps.iter().cloned());
            for member in &family.members {
                if let Some(block) = self.blocks.get_mut(member) {
                    extend_unique(&mut block.dependencies, deps.iter().cloned());
                }
            }
            return Ok(());
        }

        let block = self
            .blocks
            .get_mut(on)
            .ok_or_else(|| FlowError::UnknownBlock(on.to_string()))?;
        extend_unique(&mut block.dependencies, deps);
        Ok(())
    }

    /// Register a callable run after all blocks finish, or alone with `--at-end`.
    pub fn at_end<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&Scheduler) -> anyhow::Result<()> + 'static,
    {
        self.at_end.insert(
            name.to_string(),
            AtEnd {
                func: Box::new(f),
                doc: None,
            },
        );
    }

    /// Attach a description shown by `display`.
    pub fn document(&mut self, name: &str, doc: impl Into<String>) -> Result<(), FlowError> {
        let doc = Some(doc.into());
        if let Some(block) = self.blocks.get_mut(name) {
            block.doc = doc;
        } else if let Some(family) = self.families.get_mut(name) {
            family.doc = doc;
        } else if let Some(at_end) = self.at_end.get_mut(name) {
            at_end.doc = doc;
        } else {
            return Err(FlowError::UnknownBlock(name.to_string()));
        }
        Ok(())
    }

    // ── Loading ───────────────────────────────────────────────

    /// Read a block's cached output.
    pub fn load(&self, block: impl AsRef<str>) -> Result<RecordSet, FlowError> {
        let name = block.as_ref();
        self.blocks
            .get(name)
            .ok_or_else(|| FlowError::UnknownBlock(name.to_string()))?
            .target
            .load()
    }

    pub fn load_instance(&self, family: impl AsRef<str>, label: &str) -> Result<RecordSet, FlowError> {
        self.load(format!("{}{LABEL_SEPARATOR}{label}", family.as_ref()))
    }

    /// `(label, output)` for every member of a family that has output.
    pub fn load_instances(&self, family: impl AsRef<str>) -> Result<Vec<(String, RecordSet)>, FlowError> {
        let base = family.as_ref();
        let fam = self
            .families
            .get(base)
            .ok_or_else(|| FlowError::UnknownBlock(base.to_string()))?;
        let prefix = format!("{base}{LABEL_SEPARATOR}");

        let mut loaded = Vec::with_capacity(fam.members.len());
        for member in &fam.members {
            let Some(block) = self.blocks.get(member) else { continue };
            if !block.target.exists() {
                debug!(block = %member, "no output to load");
                continue;
            }
            let label = member.strip_prefix(&prefix).unwrap_or(member).to_string();
            loaded.push((label, block.target.load()?));
        }
        Ok(loaded)
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn dirpath(&self) -> &Path {
        &self.dirpath
    }

    pub fn script_name(&self) -> &str {
        &self.script
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn block_names(&self) -> impl Iterator<Item = &str> {
        self.blocks.keys().map(String::as_str)
    }

    pub fn block(&self, name: &str) -> Option<&Block> {
        self.blocks.get(name)
    }

    pub fn family_members(&self, family: &str) -> Option<&[String]> {
        self.families.get(family).map(|f| f.members())
    }

    pub fn target_of(&self, name: &str) -> Option<&Target> {
        self.blocks.get(name).map(|b| &b.target)
    }

    pub(super) fn target_for(&self, name: &str) -> Target {
        Target::for_block(&self.dirpath, &self.script, name, &self.config.storage.extension)
    }

    fn ensure_unused(&self, name: &str) -> Result<(), FlowError> {
        if self.blocks.contains_key(name) || self.families.contains_key(name) {
            return Err(FlowError::DuplicateBlock(name.to_string()));
        }
        Ok(())
    }
}

fn default_script_name() -> String {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "blockflow".to_string())
}

/// Expand `~` and `$VAR`/`${VAR}`, then anchor relative paths at the
/// executable's directory.
pub(super) fn resolve_dirpath(path: &Path) -> Result<PathBuf, FlowError> {
    let expanded = PathBuf::from(expand_vars(&expand_home(&path.to_string_lossy())));
    if expanded.is_absolute() {
        return Ok(expanded);
    }
    let exe = env::current_exe()?;
    let base = exe
        .parent()
        .ok_or_else(|| FlowError::Config(format!("no parent directory for {}", exe.display())))?;
    Ok(base.join(expanded))
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix('~'), dirs::home_dir()) {
        (Some(rest), Some(home)) if rest.is_empty() || rest.starts_with('/') => {
            format!("{}{rest}", home.display())
        }
        _ => path.to_string(),
    }
}

/// Unset variables are left as written.
fn expand_vars(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut rest = path;
    while let Some(start) = rest.find('$') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match env::var(name).ok().filter(|_| !name.is_empty()) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[start..start + 1 + consumed]),
        }
        rest = &after[consumed..];
    }
    out.push_str(rest);
    out
}
