use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canvas::{PixelRect, PixelStore};
use crate::error::Result;

// ============================================================================
// HISTORY DELTA - before/after bytes emitted by a selection commit
// ============================================================================

/// Reversible pixel change over one document rectangle.
///
/// `before` and `after` are BGRA bytes covering exactly `bounds`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryDelta {
    pub id: Uuid,
    pub description: String,
    pub bounds: PixelRect,
    pub before: Vec<u8>,
    pub after: Vec<u8>,
}

impl HistoryDelta {
    pub fn new(description: impl Into<String>, bounds: PixelRect, before: Vec<u8>, after: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            bounds,
            before,
            after,
        }
    }

    /// True when the commit left every byte as it was.
    pub fn is_noop(&self) -> bool {
        self.before == self.after
    }

    pub fn memory_size(&self) -> usize {
        self.before.len() + self.after.len() + self.description.len()
    }

    /// Compact binary form for external history stores.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

// ============================================================================
// COMMAND TRAIT
// ============================================================================

/// Trait for undoable/redoable commands.
pub trait Command: Send + Sync {
    fn undo(&self, store: &mut dyn PixelStore);
    fn redo(&self, store: &mut dyn PixelStore);
    fn description(&self) -> String;
    fn memory_size(&self) -> usize;
}

/// Replays a [`HistoryDelta`] against a layer store.
pub struct PixelDeltaCommand {
    delta: HistoryDelta,
}

impl PixelDeltaCommand {
    pub fn new(delta: HistoryDelta) -> Self {
        Self { delta }
    }

    pub fn delta(&self) -> &HistoryDelta {
        &self.delta
    }
}

impl Command for PixelDeltaCommand {
    fn undo(&self, store: &mut dyn PixelStore) {
        store.write_rect(self.delta.bounds, &self.delta.before);
    }

    fn redo(&self, store: &mut dyn PixelStore) {
        store.write_rect(self.delta.bounds, &self.delta.after);
    }

    fn description(&self) -> String {
        self.delta.description.clone()
    }

    fn memory_size(&self) -> usize {
        self.delta.memory_size()
    }
}

// ============================================================================
// HISTORY MANAGER - Manages undo/redo stacks with memory limits
// ============================================================================

/// Undo/redo history manager with memory limits.
pub struct HistoryManager {
    undo_stack: VecDeque<Box<dyn Command>>,
    redo_stack: VecDeque<Box<dyn Command>>,
    max_history_size: usize,
    /// Optional memory cap in bytes.
    max_memory_bytes: Option<usize>,
    /// Running memory total across both stacks.
    total_memory: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(50)
    }
}

impl HistoryManager {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_history_size,
            max_memory_bytes: Some(100 * 1024 * 1024), // 100 MB default limit
            total_memory: 0,
        }
    }

    pub fn with_memory_limit(mut self, max_bytes: Option<usize>) -> Self {
        self.max_memory_bytes = max_bytes;
        self.prune();
        self
    }

    pub fn push(&mut self, command: Box<dyn Command>) {
        // A new action invalidates the redo branch
        for cmd in self.redo_stack.drain(..) {
            self.total_memory = self.total_memory.saturating_sub(cmd.memory_size());
        }

        self.total_memory += command.memory_size();
        log::debug!("History: push '{}' ({} bytes)", command.description(), command.memory_size());
        self.undo_stack.push_back(command);

        self.prune();
    }

    pub fn undo(&mut self, store: &mut dyn PixelStore) -> Option<String> {
        let command = self.undo_stack.pop_back()?;
        let description = command.description();
        command.undo(store);
        self.redo_stack.push_back(command);
        Some(description)
    }

    pub fn redo(&mut self, store: &mut dyn PixelStore) -> Option<String> {
        let command = self.redo_stack.pop_back()?;
        let description = command.description();
        command.redo(store);
        self.undo_stack.push_back(command);
        Some(description)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<String> {
        self.undo_stack.back().map(|c| c.description())
    }

    pub fn redo_description(&self) -> Option<String> {
        self.redo_stack.back().map(|c| c.description())
    }

    /// Get all undo descriptions (most recent first)
    pub fn undo_history(&self) -> Vec<String> {
        self.undo_stack.iter().rev().map(|c| c.description()).collect()
    }

    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    fn prune(&mut self) {
        while self.undo_stack.len() > self.max_history_size {
            if let Some(removed) = self.undo_stack.pop_front() {
                self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
            }
        }

        // The newest entry is kept even when it alone exceeds the cap
        if let Some(max_bytes) = self.max_memory_bytes {
            while self.total_memory > max_bytes && self.undo_stack.len() > 1 {
                if let Some(removed) = self.undo_stack.pop_front() {
                    self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.total_memory = 0;
    }

    /// Undo `count` steps (0 = nothing).
    pub fn undo_to(&mut self, count: usize, store: &mut dyn PixelStore) {
        for _ in 0..count {
            if self.undo(store).is_none() {
                break;
            }
        }
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Layer;

    fn delta(desc: &str, value: u8) -> HistoryDelta {
        let bounds = PixelRect::new(1, 1, 2, 2);
        HistoryDelta::new(desc, bounds, vec![0; 16], vec![value; 16])
    }

    #[test]
    fn test_undo_redo_restores_bytes() {
        let mut layer = Layer::new("l", 4, 4);
        let mut history = HistoryManager::default();
        let d = delta("Commit Selection", 9);
        layer.write_rect(d.bounds, &d.after);
        history.push(Box::new(PixelDeltaCommand::new(d)));

        assert_eq!(history.undo(&mut layer).as_deref(), Some("Commit Selection"));
        assert_eq!(layer.pixels.pixel(1, 1), [0; 4]);
        assert!(history.can_redo());

        history.redo(&mut layer);
        assert_eq!(layer.pixels.pixel(2, 2), [9; 4]);
        assert_eq!(history.undo_description().as_deref(), Some("Commit Selection"));
    }

    #[test]
    fn test_push_clears_redo_and_prunes() {
        let mut layer = Layer::new("l", 4, 4);
        let mut history = HistoryManager::new(2);
        for i in 0..3 {
            history.push(Box::new(PixelDeltaCommand::new(delta(&format!("step {i}"), i))));
        }
        assert_eq!(history.undo_count(), 2);
        assert_eq!(history.undo_history(), vec!["step 2".to_string(), "step 1".to_string()]);

        history.undo(&mut layer);
        history.push(Box::new(PixelDeltaCommand::new(delta("step 3", 3))));
        assert!(!history.can_redo());
        assert_eq!(history.memory_usage(), 2 * (32 + 6));
    }

    #[test]
    fn test_memory_cap_keeps_newest() {
        let mut history = HistoryManager::new(10).with_memory_limit(Some(10));
        history.push(Box::new(PixelDeltaCommand::new(delta("a", 1))));
        history.push(Box::new(PixelDeltaCommand::new(delta("b", 2))));
        assert_eq!(history.undo_count(), 1);
        assert_eq!(history.undo_description().as_deref(), Some("b"));
    }

    #[test]
    fn test_undo_to_stops_at_empty() {
        let mut layer = Layer::new("l", 4, 4);
        let mut history = HistoryManager::default();
        history.push(Box::new(PixelDeltaCommand::new(delta("a", 1))));
        history.undo_to(5, &mut layer);
        assert_eq!(history.undo_count(), 0);
        assert_eq!(history.redo_count(), 1);
    }

    #[test]
    fn test_delta_bincode_round_trip() {
        let d = delta("Commit Selection", 7);
        let bytes = d.encode().unwrap();
        let back = HistoryDelta::decode(&bytes).unwrap();
        assert_eq!(back, d);
        assert!(HistoryDelta::decode(&bytes[..3]).is_err());
    }
}
