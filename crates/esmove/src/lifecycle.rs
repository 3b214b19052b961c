//! Index lifecycle: tune the target for bulk ingest before the pipeline
//! runs, put it back afterwards.
//!
//! The pre-phase resolves the source indices, remembers every original
//! `refresh_interval` in a memo, and pushes bulk-optimized settings
//! (`refresh_interval = -1`, `number_of_replicas = 0`) to the target,
//! creating indices that do not exist yet. The post-phase restores exactly
//! the memo entries. Per-index write failures are logged and skipped; the
//! run keeps going with the target as it is.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::app_config::LifecycleConfig;
use crate::es::types::{index_refresh_interval, index_settings_mut, sanitize_index_settings};
use crate::es::{EsApi, EsApiBackend};

/// Owns the pre/post protocol and the refresh-interval memo. Only the
/// coordinator ever touches this; the memo needs no locking.
#[derive(Debug)]
pub(crate) struct IndexLifecycle {
    target: EsApiBackend,
    config: LifecycleConfig,
    /// target index name -> the source's original refresh_interval
    memo: BTreeMap<String, Value>,
}

impl IndexLifecycle {
    pub(crate) fn new(target: EsApiBackend, config: LifecycleConfig) -> Self {
        Self {
            target,
            config,
            memo: BTreeMap::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn memo(&self) -> &BTreeMap<String, Value> {
        &self.memo
    }

    /// Pre-migration phase, run once after the health gate and before any
    /// producer starts. Only an unresolvable source is fatal.
    pub(crate) async fn prepare(
        &mut self,
        source: &EsApiBackend,
        copy_all: bool,
        source_pattern: &str,
        rename_to: Option<&str>,
    ) -> Result<()> {
        let (names, mut mappings) = source
            .get_mappings(copy_all, source_pattern)
            .await
            .context("failed to resolve source indices")?;
        if names.is_empty() {
            bail!("source index '{source_pattern}' does not exist");
        }
        info!("settings/mappings migration for {} source index(es)", names.len());

        let mut source_settings = source
            .get_settings(&names.join(","))
            .await
            .context("failed to read source index settings")?;

        // a rename is only well-defined when exactly one index matched
        if let Some(new_name) = rename_to {
            if names.len() == 1 && names[0] != new_name {
                debug!("single source index; rewriting '{}' as '{new_name}'", names[0]);
                if let Some(descriptor) = source_settings.remove(&names[0]) {
                    source_settings.insert(new_name.to_owned(), descriptor);
                }
                if let Some(mapping) = mappings.remove(&names[0]) {
                    mappings.insert(new_name.to_owned(), mapping);
                }
            } else if names.len() > 1 {
                warn!(
                    "target index rename requested but the source matched {} indices; keeping source names",
                    names.len()
                );
            }
        }

        let mut preexisting = Vec::new();
        for (name, descriptor) in &source_settings {
            let mut target_exists = match self.target.get_settings(name).await {
                Ok(existing) => existing.contains_key(name),
                Err(error) => {
                    debug!("no readable settings for target '{name}' (new index?): {error:#}");
                    false
                }
            };
            if target_exists && self.config.recreate_index {
                info!("dropping target index '{name}' before recreation");
                match self.target.delete_index(name).await {
                    Ok(()) => target_exists = false,
                    Err(error) => warn!("failed to delete target '{name}': {error:#}"),
                }
            }

            // remember the source's refresh cadence for the post-phase
            self.memo.insert(name.clone(), index_refresh_interval(descriptor));

            let mut tree = if self.config.copy_settings {
                descriptor.clone()
            } else {
                json!({})
            };
            sanitize_index_settings(&mut tree);
            let index_block = index_settings_mut(&mut tree);
            index_block.insert("refresh_interval".into(), json!(-1));
            index_block.insert("number_of_replicas".into(), json!(0));
            // shard counts are immutable once an index exists
            index_block.remove("number_of_shards");

            if target_exists {
                preexisting.push(name.clone());
                debug!("updating settings on existing target '{name}'");
                if let Err(error) = self.target.update_settings(name, &tree).await {
                    warn!("settings update on '{name}' failed; continuing as-is: {error:#}");
                }
            } else {
                if let Some(shards) = self.config.shards {
                    index_settings_mut(&mut tree).insert("number_of_shards".into(), json!(shards));
                }
                if self.config.copy_mappings {
                    if let (Value::Object(body), Some(mapping)) =
                        (&mut tree, mapping_of(&mappings, name))
                    {
                        body.insert("mappings".into(), mapping.clone());
                    }
                }
                debug!("creating target index '{name}'");
                if let Err(error) = self.target.create_index(name, &tree).await {
                    warn!("create of target '{name}' failed: {error:#}");
                }
            }
        }

        // indices created above already got their mappings in the create body
        if self.config.copy_mappings {
            for name in &preexisting {
                let Some(mapping) = mapping_of(&mappings, name) else {
                    continue;
                };
                if let Err(error) = self.target.update_mapping(name, mapping).await {
                    warn!("mapping update on '{name}' failed: {error:#}");
                }
            }
        }

        info!("settings/mappings migration finished");
        Ok(())
    }

    /// Post-migration phase. Runs on every exit path once `prepare` was
    /// entered, pipeline errors included; failures are logged, never raised.
    pub(crate) async fn restore(&self) {
        for (name, interval) in &self.memo {
            let mut tree = json!({});
            index_settings_mut(&mut tree).insert("refresh_interval".into(), interval.clone());
            match self.target.update_settings(name, &tree).await {
                Ok(()) => debug!("restored refresh_interval on '{name}' to {interval}"),
                Err(error) => warn!("failed to restore refresh_interval on '{name}': {error:#}"),
            }
            if self.config.refresh {
                if let Err(error) = self.target.refresh(name).await {
                    warn!("refresh of '{name}' failed: {error:#}");
                }
            }
        }
    }
}

fn mapping_of<'a>(mappings: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    mappings.get(name).and_then(|descriptor| descriptor.get("mappings"))
}
