use std::{collections::HashMap, fmt, sync::Arc};

use futures::future::BoxFuture;

use super::{
    TriggerEvent,
    matcher::{PathMatch, PathMatcher, SegmentMatcher},
};

/// Post-commit handler.
pub type ChangeHandler = Arc<dyn Fn(TriggerEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Pre-commit handler; an `Err` vetoes the mutation.
pub type ChangingHandler = Arc<dyn Fn(TriggerEvent) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// Handlers registered against one path pattern.
#[derive(Clone, Default)]
pub struct Trigger {
    pub pattern: String,
    pub on_change: Vec<ChangeHandler>,
    pub on_changing: Vec<ChangingHandler>,
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("pattern", &self.pattern)
            .field("on_change", &self.on_change.len())
            .field("on_changing", &self.on_changing.len())
            .finish()
    }
}

/// Triggers owned by one store. A trigger is created on the first registration
/// for its pattern and accumulates handlers from then on.
pub struct TriggerRegistry {
    triggers: Vec<Trigger>,
    by_pattern: HashMap<String, usize>,
    matcher: Box<dyn PathMatcher<usize>>,
}

impl Default for TriggerRegistry {
    fn default() -> Self {
        Self::with_matcher(SegmentMatcher::new())
    }
}

impl fmt::Debug for TriggerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerRegistry")
            .field("triggers", &self.triggers)
            .finish_non_exhaustive()
    }
}

impl TriggerRegistry {
    pub fn with_matcher(matcher: impl PathMatcher<usize> + 'static) -> Self {
        Self {
            triggers: Vec::new(),
            by_pattern: HashMap::new(),
            matcher: Box::new(matcher),
        }
    }

    fn trigger_mut(&mut self, pattern: &str) -> &mut Trigger {
        let index = match self.by_pattern.get(pattern) {
            Some(index) => *index,
            None => {
                let index = self.triggers.len();
                self.triggers.push(Trigger { pattern: pattern.to_string(), ..Default::default() });
                self.by_pattern.insert(pattern.to_string(), index);
                self.matcher.add(pattern, index);
                index
            }
        };

        &mut self.triggers[index]
    }

    pub fn add_change(&mut self, pattern: &str, handler: ChangeHandler) {
        self.trigger_mut(pattern).on_change.push(handler);
    }

    pub fn add_changing(&mut self, pattern: &str, handler: ChangingHandler) {
        self.trigger_mut(pattern).on_changing.push(handler);
    }

    pub fn get(&self, index: usize) -> Option<&Trigger> {
        self.triggers.get(index)
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Indexes of the triggers matching `path`, in registration order.
    pub fn matches<'a>(&'a self, path: &str) -> Vec<PathMatch<'a, usize>> {
        self.matcher.matches(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use rstest::rstest;

    fn noop() -> ChangeHandler {
        Arc::new(|_: TriggerEvent| async {}.boxed())
    }

    #[rstest]
    fn test_triggers_are_created_once_per_pattern() {
        let mut registry = TriggerRegistry::default();

        registry.add_change("/items/:id", noop());
        registry.add_change("/items/:id", noop());
        registry.add_changing("/items/:id", Arc::new(|_: TriggerEvent| async { Ok::<(), String>(()) }.boxed()));
        registry.add_change("/items/:id/a", noop());

        assert_eq!(registry.len(), 2);
        let trigger = registry.get(0).unwrap();
        assert_eq!(trigger.on_change.len(), 2);
        assert_eq!(trigger.on_changing.len(), 1);
        assert_eq!(registry.matches("/items/1/a").len(), 2);
    }
}
