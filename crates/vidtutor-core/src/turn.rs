//! Client-side view of a chat turn.
//!
//! `ChatTurn` tracks `Idle -> Sending -> Streaming -> {Completed | Failed}`.
//! `Conversation` owns the visible message list and only appends to the
//! open assistant message while its turn is streaming.

use std::fmt;

use vidtutor_schema::{ChatMessage, ChatRole};

use crate::relay::{RelayEvent, ERROR_PREFIX};

pub const CANCELLED_NOTICE: &str = "Response cancelled.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Sending,
    Streaming,
    Completed,
    Failed,
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Sending | Self::Streaming)
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Sending => "sending",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TurnError {
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        state: TurnState,
        action: &'static str,
    },
}

#[derive(Debug, Clone)]
pub struct ChatTurn {
    state: TurnState,
    text: String,
    error: Option<String>,
}

impl Default for ChatTurn {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatTurn {
    pub fn new() -> Self {
        Self {
            state: TurnState::Idle,
            text: String::new(),
            error: None,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn submit(&mut self) -> Result<(), TurnError> {
        self.transition(&[TurnState::Idle], "submit")?;
        self.state = TurnState::Sending;
        Ok(())
    }

    /// The first fragment moves `Sending` to `Streaming`.
    pub fn push_fragment(&mut self, fragment: &str) -> Result<(), TurnError> {
        self.transition(&[TurnState::Sending, TurnState::Streaming], "stream")?;
        self.state = TurnState::Streaming;
        self.text.push_str(fragment);
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), TurnError> {
        self.transition(&[TurnState::Sending, TurnState::Streaming], "complete")?;
        self.state = TurnState::Completed;
        Ok(())
    }

    /// Blank messages are replaced so a failed turn always has visible text.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TurnError> {
        self.transition(&[TurnState::Sending, TurnState::Streaming], "fail")?;
        let message = message.into();
        self.error = Some(if message.trim().is_empty() {
            format!("{ERROR_PREFIX}.")
        } else {
            message
        });
        self.state = TurnState::Failed;
        Ok(())
    }

    fn transition(&self, allowed: &[TurnState], action: &'static str) -> Result<(), TurnError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(TurnError::InvalidTransition {
                state: self.state,
                action,
            })
        }
    }
}

/// Ordered chat history with at most one turn in flight.
#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
    turn: Option<ChatTurn>,
    open_assistant: Option<usize>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn turn_state(&self) -> TurnState {
        self.turn
            .as_ref()
            .map(|t| t.state())
            .unwrap_or(TurnState::Idle)
    }

    /// Appends the user's message and opens a new turn in `Sending`.
    pub fn submit(&mut self, content: impl Into<String>) -> Result<&ChatMessage, TurnError> {
        if self.turn_state().is_in_flight() {
            return Err(TurnError::InvalidTransition {
                state: self.turn_state(),
                action: "submit",
            });
        }
        let mut turn = ChatTurn::new();
        turn.submit()?;
        self.turn = Some(turn);
        self.open_assistant = None;
        self.messages.push(ChatMessage::user(content));
        Ok(&self.messages[self.messages.len() - 1])
    }

    /// Feeds one relay event into the open turn.
    pub fn apply(&mut self, event: &RelayEvent) -> Result<TurnState, TurnError> {
        let Some(turn) = self.turn.as_mut() else {
            return Err(TurnError::InvalidTransition {
                state: TurnState::Idle,
                action: "stream",
            });
        };

        match event {
            RelayEvent::Fragment(fragment) => {
                turn.push_fragment(fragment)?;
                let index = match self.open_assistant {
                    Some(index) => index,
                    None => {
                        self.messages.push(ChatMessage::assistant(String::new()));
                        let index = self.messages.len() - 1;
                        self.open_assistant = Some(index);
                        index
                    }
                };
                self.messages[index].content.push_str(fragment);
            }
            RelayEvent::Error(message) => {
                turn.fail(message.clone())?;
                self.discard_partial();
                self.messages.push(ChatMessage::assistant(message.clone()));
            }
            RelayEvent::Done => {
                // An error event already closed the turn.
                if !turn.state().is_terminal() {
                    turn.complete()?;
                }
                self.open_assistant = None;
            }
        }
        Ok(self.turn_state())
    }

    /// Drops the partial answer and fails the turn with a visible notice.
    /// Returns `false` when nothing was in flight.
    pub fn cancel(&mut self) -> bool {
        let Some(turn) = self.turn.as_mut() else {
            return false;
        };
        if turn.fail(CANCELLED_NOTICE).is_err() {
            return false;
        }
        self.discard_partial();
        true
    }

    fn discard_partial(&mut self) {
        if let Some(index) = self.open_assistant.take() {
            if index < self.messages.len() && self.messages[index].role == ChatRole::Assistant {
                self.messages.remove(index);
            }
        }
    }
}
