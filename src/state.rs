//! C7: the state manager. Owns one [`UnaryLogic`] instance per
//! `(step_id, key)`, lazily constructed the first time a key is seen by
//! the worker that owns its partition, and dropped when its logic
//! reports [`Fate::Discard`].

use std::collections::HashMap;

use crate::dataflow::StepId;
use crate::item::Item;
use crate::operators::{Fate, UnaryLogic, UnaryLogicBuilder};

/// Per-step store of live logic instances, keyed by the item's string key.
pub struct StepState {
    builder: UnaryLogicBuilder,
    instances: HashMap<String, Box<dyn UnaryLogic>>,
}

impl StepState {
    pub fn new(builder: UnaryLogicBuilder) -> Self {
        StepState {
            builder,
            instances: HashMap::new(),
        }
    }

    fn get_or_build(&mut self, key: &str) -> &mut Box<dyn UnaryLogic> {
        self.instances
            .entry(key.to_string())
            .or_insert_with(|| (self.builder)())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.instances.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.instances.keys().map(String::as_str)
    }

    /// Dispatch an item to `key`'s logic, dropping the instance if it
    /// reports [`Fate::Discard`].
    pub fn on_item(
        &mut self,
        key: &str,
        now: crate::clock::Timestamp,
        value: Item,
    ) -> Result<Vec<Item>, crate::errors::RunError> {
        let logic = self.get_or_build(key);
        let (emitted, fate) = logic.on_item(now, value)?;
        if fate == Fate::Discard {
            self.instances.remove(key);
        }
        Ok(emitted)
    }

    pub fn on_notify(
        &mut self,
        key: &str,
        now: crate::clock::Timestamp,
    ) -> Result<Vec<Item>, crate::errors::RunError> {
        match self.instances.get_mut(key) {
            Some(logic) => logic.on_notify(now),
            None => Ok(Vec::new()),
        }
    }

    pub fn on_eof_all(&mut self) -> Result<Vec<(String, Vec<Item>)>, crate::errors::RunError> {
        let mut out = Vec::new();
        for (key, logic) in self.instances.iter_mut() {
            out.push((key.clone(), logic.on_eof()?));
        }
        Ok(out)
    }

    pub fn notify_at(&self, key: &str) -> Option<crate::clock::Timestamp> {
        self.instances.get(key).and_then(|l| l.notify_at())
    }

    /// Snapshot every live key's state for this step, for the recovery
    /// coordinator (§4.7).
    pub fn snapshot_all(&self) -> Vec<(String, Option<Item>)> {
        self.instances
            .iter()
            .map(|(key, logic)| (key.clone(), logic.snapshot()))
            .collect()
    }

    /// Restore a single key's logic from a prior snapshot value, building
    /// a fresh instance first if this key has never been touched on this
    /// worker before.
    pub fn restore(&mut self, key: &str, snapshot: Option<Item>) {
        self.get_or_build(key).restore(snapshot);
    }
}

/// All live [`StepState`]s on one worker, indexed by the unary step that
/// owns them.
#[derive(Default)]
pub struct StateManager {
    steps: HashMap<StepId, StepState>,
}

impl StateManager {
    pub fn new() -> Self {
        StateManager::default()
    }

    pub fn register(&mut self, step_id: StepId, builder: UnaryLogicBuilder) {
        self.steps.entry(step_id).or_insert_with(|| StepState::new(builder));
    }

    pub fn step(&mut self, step_id: &StepId) -> Option<&mut StepState> {
        self.steps.get_mut(step_id)
    }

    pub fn steps(&self) -> impl Iterator<Item = (&StepId, &StepState)> {
        self.steps.iter()
    }

    pub fn steps_mut(&mut self) -> impl Iterator<Item = (&StepId, &mut StepState)> {
        self.steps.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RunError;
    use std::sync::Arc;

    struct CountingLogic(i64);
    impl UnaryLogic for CountingLogic {
        fn on_item(&mut self, _now: crate::clock::Timestamp, value: Item) -> Result<(Vec<Item>, Fate), RunError> {
            self.0 += 1;
            Ok((vec![value], Fate::Retain))
        }

        fn snapshot(&self) -> Option<Item> {
            Some(Item::new(self.0))
        }
    }

    #[test]
    fn lazily_constructs_one_instance_per_key() {
        let builder: UnaryLogicBuilder = Arc::new(|| Box::new(CountingLogic(0)));
        let mut state = StepState::new(builder);
        assert!(!state.contains("a"));
        state.on_item("a", 0, Item::new(1i64)).unwrap();
        assert!(state.contains("a"));
        assert!(!state.contains("b"));
    }

    #[test]
    fn discard_fate_drops_the_instance() {
        struct OneShot;
        impl UnaryLogic for OneShot {
            fn on_item(&mut self, _now: crate::clock::Timestamp, value: Item) -> Result<(Vec<Item>, Fate), RunError> {
                Ok((vec![value], Fate::Discard))
            }
        }
        let builder: UnaryLogicBuilder = Arc::new(|| Box::new(OneShot));
        let mut state = StepState::new(builder);
        state.on_item("k", 0, Item::new(1i64)).unwrap();
        assert!(!state.contains("k"));
    }
}
