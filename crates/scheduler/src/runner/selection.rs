use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use blockflow_core::FlowError;
use indexmap::IndexSet;
use tracing::{debug, info};

use crate::args::RunArgs;
use crate::resolver;
use crate::terminal::{self, Listing};
use crate::types::RunOutcome;

use super::Scheduler;

impl Scheduler {
    /// Block names a user-supplied name refers to: the block itself, every
    /// member of a family, or the block behind a record file name
    /// (`{script}-{block}.{ext}`).
    pub fn labels_for(&self, name: &str) -> Result<Vec<String>, FlowError> {
        if self.blocks.contains_key(name) {
            return Ok(vec![name.to_string()]);
        }
        if let Some(family) = self.families.get(name) {
            return Ok(family.members.clone());
        }

        let stripped = self.strip_file_name(name);
        match stripped {
            Some(inner) if inner != name => self.labels_for(inner),
            _ => Err(FlowError::UnknownBlock(name.to_string())),
        }
    }

    fn strip_file_name<'a>(&self, name: &'a str) -> Option<&'a str> {
        let file = name.rsplit('/').next().unwrap_or(name);
        file.strip_prefix(self.script.as_str())?
            .strip_prefix('-')?
            .strip_suffix(self.config.storage.extension.as_str())?
            .strip_suffix('.')
    }

    pub(super) fn resolve_names(&self, names: &[String]) -> Result<IndexSet<String>, FlowError> {
        let mut resolved = IndexSet::new();
        for name in names {
            resolved.extend(self.labels_for(name)?);
        }
        Ok(resolved)
    }

    /// The raw requested set: missing output by default, everything for a
    /// bare `--rerun`, or the named blocks; minus exclusions.
    pub(super) fn select(&self, args: &RunArgs) -> Result<IndexSet<String>, FlowError> {
        let mut requested: IndexSet<String> = match &args.rerun {
            None => self
                .blocks
                .iter()
                .filter(|(_, block)| !block.target.is_complete())
                .map(|(name, _)| name.clone())
                .collect(),
            Some(names) if names.is_empty() => self.blocks.keys().cloned().collect(),
            Some(names) => self.resolve_names(names)?,
        };

        let excluded = self.resolve_names(&args.exclude)?;
        requested.retain(|name| !excluded.contains(name));
        debug!(requested = requested.len(), excluded = excluded.len(), "blocks selected");
        Ok(requested)
    }

    /// Close the requested set over the graph. Completion flags are reset
    /// first, so a second run in the same process starts clean.
    pub(super) fn resolve(&mut self, requested: &mut IndexSet<String>, args: &RunArgs) -> Result<(), FlowError> {
        for block in self.blocks.values_mut() {
            block.complete = false;
        }
        resolver::normalize_edges(&mut self.blocks, &self.families)?;

        if args.rerun_names().is_some() && !args.no_deps {
            resolver::close_downward(&self.blocks, requested);
        }
        resolver::close_upward(&mut self.blocks, requested);

        let excluded = self.resolve_names(&args.exclude)?;
        let dropped = resolver::apply_exclusions(&mut self.blocks, requested, &excluded);
        info!(blocks = requested.len(), dropped = dropped.len(), "execution set resolved");
        Ok(())
    }

    /// Ask before overwriting existing output, then remove it. Returns
    /// false when the user declined; nothing is touched in that case.
    pub(super) fn confirm_overwrite(&self, requested: &IndexSet<String>, force: bool) -> Result<bool, FlowError> {
        let existing: Vec<PathBuf> = requested
            .iter()
            .filter_map(|name| self.blocks.get(name))
            .filter(|block| block.target.exists())
            .map(|block| block.target.path().to_path_buf())
            .collect();
        if existing.is_empty() {
            return Ok(true);
        }
        if !force && !self.prompt.confirm_delete(&existing)? {
            return Ok(false);
        }

        for name in requested {
            if let Some(block) = self.blocks.get(name) {
                if block.target.exists() {
                    block.target.remove()?;
                }
            }
        }
        info!(removed = existing.len(), "overwritten output removed");
        Ok(true)
    }

    /// Remove output of the named blocks (all blocks when `names` is empty).
    pub(super) fn delete(&self, names: &[String], force: bool) -> Result<RunOutcome, FlowError> {
        let selected: IndexSet<String> = if names.is_empty() {
            self.blocks.keys().cloned().collect()
        } else {
            self.resolve_names(names)?
        };

        let existing: Vec<PathBuf> = selected
            .iter()
            .filter_map(|name| self.blocks.get(name))
            .filter(|block| block.target.exists())
            .map(|block| block.target.path().to_path_buf())
            .collect();

        self.remove_confirmed(existing, force)
            .map(|removed| match removed {
                Some(removed) => RunOutcome::Deleted { removed },
                None => RunOutcome::Aborted,
            })
    }

    /// Remove `{script}-*.{ext}` files that belong to no registered block.
    pub(super) fn clean(&self, force: bool) -> Result<RunOutcome, FlowError> {
        let registered: HashSet<PathBuf> = self
            .blocks
            .values()
            .map(|block| block.target.path().to_path_buf())
            .collect();

        let mut stale = Vec::new();
        for entry in fs::read_dir(&self.dirpath)? {
            let path = entry?.path();
            if !path.is_file() || registered.contains(&path) {
                continue;
            }
            let Some(file) = path.file_name().and_then(|f| f.to_str()) else { continue };
            if self.strip_file_name(file).is_some() {
                stale.push(path);
            }
        }
        stale.sort();

        self.remove_confirmed(stale, force)
            .map(|removed| match removed {
                Some(removed) => RunOutcome::Cleaned { removed },
                None => RunOutcome::Aborted,
            })
    }

    fn remove_confirmed(&self, paths: Vec<PathBuf>, force: bool) -> Result<Option<Vec<PathBuf>>, FlowError> {
        if paths.is_empty() {
            return Ok(Some(paths));
        }
        if !force && !self.prompt.confirm_delete(&paths)? {
            terminal::abort_message()?;
            return Ok(None);
        }
        for path in &paths {
            fs::remove_file(path)?;
            debug!(path = %path.display(), "removed");
        }
        info!(removed = paths.len(), "record files deleted");
        Ok(Some(paths))
    }

    /// Print registered blocks, families and at-end callables.
    pub(super) fn display(&self) -> Result<(), FlowError> {
        let blocks: Vec<Listing<'_>> = self
            .blocks
            .iter()
            .filter(|(_, block)| block.family.is_none())
            .map(|(name, block)| Listing {
                name,
                doc: block.doc.as_deref(),
                instances: None,
                gathered: &[],
            })
            .collect();

        let families: Vec<Listing<'_>> = self
            .families
            .iter()
            .map(|(name, family)| {
                let prefix_len = name.len() + 1;
                Listing {
                    name,
                    doc: family.doc.as_deref(),
                    instances: Some(
                        family
                            .members
                            .iter()
                            .map(|m| m.get(prefix_len..).unwrap_or(m))
                            .collect(),
                    ),
                    gathered: &family.gathered,
                }
            })
            .collect();

        let at_end: Vec<Listing<'_>> = self
            .at_end
            .iter()
            .map(|(name, at_end)| Listing {
                name,
                doc: at_end.doc.as_deref(),
                instances: None,
                gathered: &[],
            })
            .collect();

        terminal::display_message(&blocks, &families, &at_end)?;
        Ok(())
    }
}
