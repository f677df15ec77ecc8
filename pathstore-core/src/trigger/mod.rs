//! Change Trigger Engine.
//!
//! Handlers are registered against path patterns such as `/items/:id/status`.
//! Around every mutation the store hands the engine the document path and the
//! normalized patches; the engine flattens composite patches into leaves,
//! matches each leaf against the registered patterns and invokes each matched
//! trigger once, with every patch that reached it rebased onto the trigger's
//! resolved path.
//!
//! "Changing" handlers run before the write, one after the other, and their
//! errors are collected rather than raised. "Change" handlers run after the
//! write, in match order.

pub mod matcher;
mod registry;

use std::{collections::HashMap, future::Future, sync::Arc};

use bson::Bson;
use futures::FutureExt;
use mea::rwlock::RwLock;
use tracing::{debug, warn};

use crate::{
    patch::{self, Patch},
    path,
};

pub use matcher::{PathMatch, PathMatcher, SegmentMatcher};
pub use registry::{ChangeHandler, ChangingHandler, Trigger, TriggerRegistry};

/// What a handler receives.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerEvent {
    /// Pattern the trigger was registered with.
    pub trigger: String,
    /// Pattern with its parameters substituted.
    pub path: String,
    pub params: HashMap<String, String>,
    /// Patches relative to [`TriggerEvent::path`].
    pub patches: Vec<Patch>,
    /// The mutated document: as stored before the write for "changing"
    /// handlers, as stored after it for "change" handlers.
    pub document: Option<Bson>,
    pub user: Option<String>,
}

struct Matched {
    index: usize,
    trigger: String,
    path: String,
    params: HashMap<String, String>,
    patches: Vec<Patch>,
}

/// Cheap handle over a shared [`TriggerRegistry`].
#[derive(Debug, Clone, Default)]
pub struct TriggerEngine {
    registry: Arc<RwLock<TriggerRegistry>>,
}

impl TriggerEngine {
    pub fn new(registry: TriggerRegistry) -> Self {
        Self { registry: Arc::new(RwLock::new(registry)) }
    }

    /// Registers a post-commit handler.
    pub async fn on_change<F, Fut>(&self, pattern: &str, handler: F)
    where
        F: Fn(TriggerEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: ChangeHandler = Arc::new(move |event| handler(event).boxed());
        self.registry
            .write()
            .await
            .add_change(pattern, handler);
    }

    /// Registers a pre-commit handler. Returning `Err` vetoes the mutation.
    pub async fn on_changing<F, Fut>(&self, pattern: &str, handler: F)
    where
        F: Fn(TriggerEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let handler: ChangingHandler = Arc::new(move |event| handler(event).boxed());
        self.registry
            .write()
            .await
            .add_changing(pattern, handler);
    }

    /// Runs every matched "changing" handler in order and returns all the
    /// errors they reported. Never fails itself.
    pub async fn data_changing(
        &self,
        path: &str,
        document: Option<&Bson>,
        patches: &[Patch],
        user: Option<&str>,
    ) -> Vec<String> {
        let mut errors = Vec::new();

        for (event, handlers) in self.prepare(path, document, patches, user, |t| &t.on_changing).await {
            for handler in handlers {
                if let Err(error) = handler(event.clone()).await {
                    debug!(trigger = %event.trigger, path = %event.path, %error, "change rejected");
                    errors.push(error);
                }
            }
        }

        errors
    }

    /// Runs every matched "change" handler in match order.
    pub async fn data_change(
        &self,
        path: &str,
        document: Option<&Bson>,
        patches: &[Patch],
        user: Option<&str>,
    ) {
        for (event, handlers) in self.prepare(path, document, patches, user, |t| &t.on_change).await {
            for handler in handlers {
                handler(event.clone()).await;
            }
        }
    }

    /// Resolves the triggers reached by `patches` together with the handlers
    /// to run. The registry lock is released before any handler runs.
    async fn prepare<H: Clone>(
        &self,
        path: &str,
        document: Option<&Bson>,
        patches: &[Patch],
        user: Option<&str>,
        handlers: impl Fn(&Trigger) -> &Vec<H>,
    ) -> Vec<(TriggerEvent, Vec<H>)> {
        let registry = self.registry.read().await;
        if registry.is_empty() {
            return Vec::new();
        }

        let matched = consolidate(&registry, path, patches);
        debug!(path, patches = patches.len(), triggers = matched.len(), "matched triggers");

        matched
            .into_iter()
            .filter_map(|matched| {
                let Some(trigger) = registry.get(matched.index) else {
                    warn!(trigger = %matched.trigger, "matched trigger is not registered");
                    return None;
                };
                let handlers = handlers(trigger).clone();

                let event = TriggerEvent {
                    trigger: matched.trigger,
                    path: matched.path,
                    params: matched.params,
                    patches: matched.patches,
                    document: document.cloned(),
                    user: user.map(str::to_string),
                };
                Some((event, handlers))
            })
            .filter(|(_, handlers)| !handlers.is_empty())
            .collect()
    }
}

/// Rebases patches under `base`, flattens composite values, matches every
/// leaf and merges matches of the same trigger, in first-match order.
fn consolidate(registry: &TriggerRegistry, base: &str, patches: &[Patch]) -> Vec<Matched> {
    let mut matched: Vec<Matched> = Vec::new();
    let mut positions: HashMap<usize, usize> = HashMap::new();

    let leaves = patches
        .iter()
        .map(|patch| patch.rebased(base))
        .flat_map(|patch| patch::expand(&patch));

    for leaf in leaves {
        for found in registry.matches(&leaf.path) {
            let index = *found.item;
            let resolved = matcher::resolve(found.pattern, &found.params, &leaf.path);
            let Some(relative) = path::strip_prefix(&leaf.path, &resolved) else {
                continue;
            };
            let cascaded = Patch { path: relative, ..leaf.clone() };

            match positions.get(&index) {
                Some(position) => matched[*position].patches.push(cascaded),
                None => {
                    positions.insert(index, matched.len());
                    matched.push(Matched {
                        index,
                        trigger: found.pattern.to_string(),
                        path: resolved,
                        params: found.params,
                        patches: vec![cascaded],
                    });
                }
            }
        }
    }

    matched
}
