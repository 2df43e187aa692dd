//! Bounded conversation state.
//!
//! A [`ConversationSession`] owns the most recent turns of one
//! conversation. When the bound is exceeded the oldest turns are dropped
//! first. Sessions are never shared: the pipeline borrows a session
//! mutably for the duration of one turn.

use std::collections::VecDeque;

use uuid::Uuid;

use crate::models::Turn;

/// Default number of user/agent exchanges kept as history.
pub const DEFAULT_HISTORY_EXCHANGES: usize = 3;

#[derive(Debug, Clone)]
pub struct ConversationSession {
    id: String,
    max_turns: usize,
    turns: VecDeque<Turn>,
}

impl ConversationSession {
    /// Create a session keeping at most `max_turns` turns.
    pub fn new(max_turns: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            max_turns,
            turns: VecDeque::with_capacity(max_turns + 1),
        }
    }

    /// Create a session keeping `exchanges` user/agent pairs.
    pub fn with_exchanges(exchanges: usize) -> Self {
        Self::new(exchanges * 2)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Append a turn, evicting the oldest turns beyond the bound.
    pub fn append(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    /// Append a user utterance and the agent's reply together.
    pub fn append_exchange(&mut self, user: Turn, agent: Turn) {
        self.append(user);
        self.append(agent);
    }

    /// The retained turns, oldest first.
    pub fn recent(&self) -> Vec<&Turn> {
        self.turns.iter().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Render history as `Role: text` lines for prompt inclusion.
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        for turn in &self.turns {
            out.push_str(turn.role.label());
            out.push_str(": ");
            out.push_str(turn.text.trim());
            out.push('\n');
        }
        out
    }
}

impl Default for ConversationSession {
    fn default() -> Self {
        Self::with_exchanges(DEFAULT_HISTORY_EXCHANGES)
    }
}
