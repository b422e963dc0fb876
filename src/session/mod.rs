use crate::models::chat::Turn;
use chrono::{ DateTime, Utc };
use uuid::Uuid;

/// Ordered history of turns for one chat session.
///
/// Insertion order is conversation order. There is no removal, editing or
/// size cap; the transcript lives exactly as long as its session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn start() -> Self {
        Self { turns: Vec::new() }
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// The full ordered sequence, as handed to the completion relay.
    pub fn snapshot(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }
}

/// Per-session context passed into every message-handling call.
#[derive(Clone, Debug)]
pub struct ChatSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    transcript: Transcript,
}

impl ChatSession {
    pub fn start() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            transcript: Transcript::start(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn append(&mut self, turn: Turn) {
        self.transcript.append(turn);
    }
}
