//! `unary` logics for the `stateful_map` and `stateful_flat_map`
//! compound operators (§4.4).

use crate::clock::Timestamp;
use crate::dataflow::StepId;
use crate::errors::RunError;
use crate::item::Item;
use crate::operators::{Fate, StatefulFlatMapperFn, StatefulMapResult, StatefulMapperFn, UnaryLogic};

pub struct StatefulMapLogic {
    step_id: StepId,
    state: Option<Item>,
    mapper: StatefulMapperFn,
}

impl StatefulMapLogic {
    pub fn new(step_id: StepId, initial: Option<Item>, mapper: StatefulMapperFn) -> Self {
        StatefulMapLogic {
            step_id,
            state: initial,
            mapper,
        }
    }
}

impl UnaryLogic for StatefulMapLogic {
    fn on_item(&mut self, _now: Timestamp, value: Item) -> Result<(Vec<Item>, Fate), RunError> {
        let result = (self.mapper)(self.state.take(), value);
        let (new_state, emission) = result
            .downcast_ref::<StatefulMapResult>()
            .cloned()
            .ok_or_else(|| RunError::InvalidMapperReturn {
                step_id: self.step_id.clone(),
            })?;

        let fate = if new_state.is_none() {
            Fate::Discard
        } else {
            Fate::Retain
        };
        self.state = new_state;
        Ok((emission.into_iter().collect(), fate))
    }

    fn snapshot(&self) -> Option<Item> {
        self.state.clone()
    }

    fn restore(&mut self, snapshot: Option<Item>) {
        self.state = snapshot;
    }
}

pub struct StatefulFlatMapLogic {
    state: Option<Item>,
    mapper: StatefulFlatMapperFn,
}

impl StatefulFlatMapLogic {
    pub fn new(initial: Option<Item>, mapper: StatefulFlatMapperFn) -> Self {
        StatefulFlatMapLogic {
            state: initial,
            mapper,
        }
    }
}

impl UnaryLogic for StatefulFlatMapLogic {
    fn on_item(&mut self, _now: Timestamp, value: Item) -> Result<(Vec<Item>, Fate), RunError> {
        let (new_state, emissions) = (self.mapper)(self.state.take(), value);
        let fate = if new_state.is_none() {
            Fate::Discard
        } else {
            Fate::Retain
        };
        self.state = new_state;
        Ok((emissions, fate))
    }

    fn snapshot(&self) -> Option<Item> {
        self.state.clone()
    }

    fn restore(&mut self, snapshot: Option<Item>) {
        self.state = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn discards_when_mapper_returns_no_new_state() {
        let mapper: StatefulMapperFn = Arc::new(|old_state, _value| {
            assert!(old_state.is_none());
            let result: StatefulMapResult = (None, None);
            Item::new(result)
        });
        let mut logic = StatefulMapLogic::new(StepId("test_step".to_string()), None, mapper);
        let (_out, fate) = logic.on_item(0, Item::new(1i64)).unwrap();
        assert_eq!(fate, Fate::Discard);
    }

    #[test]
    fn snapshot_reflects_the_mappers_returned_state() {
        let mapper: StatefulMapperFn = Arc::new(|old_state, _value| {
            assert!(old_state.is_none());
            let result: StatefulMapResult = (Some(Item::new("new_state".to_string())), None);
            Item::new(result)
        });
        let mut logic = StatefulMapLogic::new(StepId("test_step".to_string()), None, mapper);
        logic.on_item(0, Item::new(1i64)).unwrap();
        let snap = logic.snapshot().unwrap();
        assert_eq!(snap.downcast_ref::<String>().unwrap(), "new_state");
    }
}
