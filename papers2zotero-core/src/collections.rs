//! Collection Resolver: source folder names → remote collection keys.
//!
//! One resolver lives for the whole run and is owned by the scheduler, so
//! creation of a given name happens at most once. Existing remote collections
//! with the same name are reused.

use std::collections::HashMap;
use tracing::{debug, info};

use crate::contract::RemoteLibrary;
use crate::error::RemoteError;
use crate::record::CollectionRef;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CollectionFilter {
    /// `no_collections`: items are never placed in collections.
    Disabled,
    #[default]
    All,
    /// `include_collections`: only these names are resolved; others are dropped.
    Only(Vec<String>),
}

impl CollectionFilter {
    pub fn from_settings(no_collections: bool, include: Vec<String>) -> Self {
        if no_collections {
            CollectionFilter::Disabled
        } else if include.is_empty() {
            CollectionFilter::All
        } else {
            CollectionFilter::Only(include)
        }
    }

    pub fn admits(&self, name: &str) -> bool {
        match self {
            CollectionFilter::Disabled => false,
            CollectionFilter::All => true,
            CollectionFilter::Only(names) => names.iter().any(|n| n == name),
        }
    }
}

#[derive(Debug, Default)]
pub struct CollectionResolver {
    filter: CollectionFilter,
    cache: HashMap<String, String>,
    loaded: bool,
}

impl CollectionResolver {
    pub fn new(filter: CollectionFilter) -> Self {
        Self { filter, cache: HashMap::new(), loaded: false }
    }

    /// Remote keys for the admitted names, in first-seen order without duplicates.
    pub async fn resolve<R>(
        &mut self,
        remote: &R,
        names: &[CollectionRef],
    ) -> Result<Vec<String>, RemoteError>
    where
        R: RemoteLibrary + ?Sized,
    {
        let admitted = self.admitted(names);
        if admitted.is_empty() {
            return Ok(Vec::new());
        }
        if !self.loaded {
            let existing = remote.list_collections().await?;
            debug!(count = existing.len(), "[COLLECTIONS] Loaded existing remote collections");
            for c in existing {
                self.cache.entry(c.name).or_insert(c.key);
            }
            self.loaded = true;
        }

        let mut keys = Vec::with_capacity(admitted.len());
        for name in admitted {
            let key = match self.cache.get(name) {
                Some(key) => key.clone(),
                None => {
                    let created = remote.create_collection(name).await?;
                    info!(name = %name, key = %created.key, "[COLLECTIONS] Created remote collection");
                    self.cache.insert(name.to_string(), created.key.clone());
                    created.key
                }
            };
            keys.push(key);
        }
        Ok(keys)
    }

    /// Dry-run stand-in for [`Self::resolve`]: `<name>` per admitted collection.
    pub fn resolve_placeholders(&self, names: &[CollectionRef]) -> Vec<String> {
        self.admitted(names)
            .into_iter()
            .map(|n| format!("<{n}>"))
            .collect()
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    fn admitted<'n>(&self, names: &'n [CollectionRef]) -> Vec<&'n str> {
        let mut out: Vec<&str> = Vec::new();
        for c in names {
            if self.filter.admits(&c.name) && !out.contains(&c.name.as_str()) {
                out.push(&c.name);
            }
        }
        out
    }
}
