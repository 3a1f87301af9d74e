//! Property-based test generators using proptest.
//!
//! Provides strategies for generating fixture records, retry settings and
//! sequences of repository operations.

use crate::fixtures::Todo;
use driftsync_engine::RetryConfig;
use proptest::prelude::*;
use std::time::Duration;

/// Strategy for generating short human-readable titles.
pub fn title_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][A-Za-z0-9 ]{0,23}").expect("Invalid regex")
}

/// Strategy for generating unsaved todos inside `project_id`.
pub fn todo_strategy(project_id: String) -> impl Strategy<Value = Todo> {
    (title_strategy(), any::<bool>()).prop_map(move |(title, done)| Todo {
        id: String::new(),
        project_id: project_id.clone(),
        title,
        done,
    })
}

/// Strategy for generating valid retry settings.
pub fn retry_config_strategy() -> impl Strategy<Value = RetryConfig> {
    (
        1u32..10,
        1u64..5_000,
        1u64..600_000,
        0u64..1_000,
        1.0f64..4.0,
        0.0f64..0.9,
    )
        .prop_map(|(attempts, initial, max, min, multiplier, jitter)| {
            let max = max.max(min);
            RetryConfig::new(attempts)
                .with_initial_delay(Duration::from_millis(initial))
                .with_max_delay(Duration::from_millis(max))
                .with_min_delay(Duration::from_millis(min))
                .with_backoff_multiplier(multiplier)
                .with_jitter_percent(jitter)
        })
}

/// One step of a generated repository workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TodoAction {
    /// Create a new todo with this title.
    Create(String),
    /// Retitle the todo at this index (modulo the number created).
    Rename(usize, String),
    /// Toggle the todo at this index.
    Toggle(usize),
    /// Delete the todo at this index.
    Delete(usize),
}

/// Strategy for generating a single [`TodoAction`].
pub fn todo_action_strategy() -> impl Strategy<Value = TodoAction> {
    prop_oneof![
        3 => title_strategy().prop_map(TodoAction::Create),
        2 => (any::<usize>(), title_strategy()).prop_map(|(i, t)| TodoAction::Rename(i, t)),
        2 => any::<usize>().prop_map(TodoAction::Toggle),
        1 => any::<usize>().prop_map(TodoAction::Delete),
    ]
}

/// Strategy for generating workloads of up to `max_len` actions.
pub fn todo_workload_strategy(max_len: usize) -> impl Strategy<Value = Vec<TodoAction>> {
    prop::collection::vec(todo_action_strategy(), 1..=max_len)
}
