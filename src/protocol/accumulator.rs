use std::fmt;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::result::{FunctionCall, ToolCall};
use crate::error::StreamError;

/// Routes fragments of one tool call into one buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccumulatorKey(String);

impl AccumulatorKey {
    #[must_use]
    pub fn from_id(id: &str) -> Self {
        Self(id.to_string())
    }

    #[must_use]
    pub fn from_index(index: u32) -> Self {
        Self(index.to_string())
    }

    /// `id` when the vendor supplied a non-empty one, else the stringified index.
    #[must_use]
    pub fn resolve(id: Option<&str>, index: u32) -> Self {
        match id {
            Some(id) if !id.is_empty() => Self::from_id(id),
            _ => Self::from_index(index),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccumulatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What is known about a call when it is first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallSeed {
    pub id: Option<String>,
    pub index: u32,
    pub name: String,
}

#[derive(Debug)]
struct PendingCall {
    key: AccumulatorKey,
    seed: ToolCallSeed,
    arguments: String,
}

impl PendingCall {
    fn into_tool_call(self) -> ToolCall {
        let call = ToolCall {
            id: self.seed.id,
            index: self.seed.index,
            function: FunctionCall {
                name: self.seed.name,
                arguments: self.arguments,
            },
        };
        if !call.has_complete_arguments() {
            tracing::debug!(
                key = %self.key,
                name = %call.function.name,
                "closing tool call with incomplete JSON arguments"
            );
        }
        call
    }
}

/// Keyed, insertion-ordered buffer reassembling tool-call name and argument
/// text across fragments.
///
/// Fragments for one key are appended strictly in the order they are fed.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    slots: SmallVec<[Option<PendingCall>; 4]>,
    positions: FxHashMap<AccumulatorKey, usize>,
}

impl ToolCallAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a call. Reopening a key replaces its buffer in place.
    pub fn open(&mut self, key: AccumulatorKey, seed: ToolCallSeed, initial_args: &str) {
        let pending = PendingCall {
            key: key.clone(),
            seed,
            arguments: initial_args.to_string(),
        };
        if let Some(&pos) = self.positions.get(&key) {
            self.slots[pos] = Some(pending);
        } else {
            self.positions.insert(key, self.slots.len());
            self.slots.push(Some(pending));
        }
    }

    /// Append an argument fragment to an open call.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::UnknownAccumulatorKey`] when `key` was never opened.
    pub fn feed(&mut self, key: &AccumulatorKey, fragment: &str) -> Result<(), StreamError> {
        let pending = self
            .positions
            .get(key)
            .and_then(|&pos| self.slots[pos].as_mut())
            .ok_or_else(|| StreamError::UnknownAccumulatorKey(key.to_string()))?;
        pending.arguments.push_str(fragment);
        Ok(())
    }

    /// [`feed`](Self::feed), recovering from an unknown key by opening it
    /// implicitly with `seed`.
    pub fn feed_or_open(&mut self, key: &AccumulatorKey, seed: ToolCallSeed, fragment: &str) {
        if let Err(err) = self.feed(key, fragment) {
            tracing::debug!(%err, "implicitly opening tool call");
            self.open(key.clone(), seed, fragment);
        }
    }

    /// Fill in the function name if the opening fragment did not carry one.
    pub fn set_name_if_empty(&mut self, key: &AccumulatorKey, name: &str) {
        if let Some(pending) = self
            .positions
            .get(key)
            .and_then(|&pos| self.slots[pos].as_mut())
        {
            if pending.seed.name.is_empty() {
                pending.seed.name.push_str(name);
            }
        }
    }

    /// Finalize one call, snapshotting its buffer as `arguments`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::UnknownAccumulatorKey`] when `key` is not open.
    pub fn close(&mut self, key: &AccumulatorKey) -> Result<ToolCall, StreamError> {
        let pending = self
            .positions
            .remove(key)
            .and_then(|pos| self.slots[pos].take())
            .ok_or_else(|| StreamError::UnknownAccumulatorKey(key.to_string()))?;
        if self.positions.is_empty() {
            self.slots.clear();
        }
        Ok(pending.into_tool_call())
    }

    /// Finalize every open call in first-open order and clear all state.
    pub fn close_all(&mut self) -> Vec<ToolCall> {
        self.positions.clear();
        self.slots
            .drain(..)
            .flatten()
            .map(PendingCall::into_tool_call)
            .collect()
    }

    #[must_use]
    pub fn contains(&self, key: &AccumulatorKey) -> bool {
        self.positions.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
