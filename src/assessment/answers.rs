// Per-question answer state with optimistic selection and rollback

use std::collections::HashMap;

use crate::models::{AnswerRecord, Question};

/// An answer the server has accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmed {
    pub choice_id: String,
    pub answer_id: String,
}

/// Local view of one question's answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerState {
    /// Selected locally, save in flight
    Unconfirmed {
        choice_id: String,
        previous: Option<Confirmed>,
    },
    /// Accepted by the server
    Confirmed(Confirmed),
    /// Save rejected; the last accepted answer is shown again
    Failed {
        rejected_choice_id: String,
        restored: Option<Confirmed>,
    },
}

impl AnswerState {
    /// Choice shown as selected
    pub fn selected_choice(&self) -> Option<&str> {
        match self {
            AnswerState::Unconfirmed { choice_id, .. } => Some(choice_id),
            AnswerState::Confirmed(confirmed) => Some(&confirmed.choice_id),
            AnswerState::Failed { restored, .. } => restored.as_ref().map(|c| c.choice_id.as_str()),
        }
    }

    /// Last answer the server accepted
    pub fn confirmed(&self) -> Option<&Confirmed> {
        match self {
            AnswerState::Unconfirmed { previous, .. } => previous.as_ref(),
            AnswerState::Confirmed(confirmed) => Some(confirmed),
            AnswerState::Failed { restored, .. } => restored.as_ref(),
        }
    }
}

/// Server call needed to save a selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerOp {
    Create,
    Update { answer_id: String },
}

/// Answers of one submission keyed by question id
#[derive(Debug, Clone, Default)]
pub struct AnswerBook {
    slots: HashMap<String, AnswerState>,
}

impl AnswerBook {
    /// Rehydrate answers submitted earlier in a resumed session
    pub fn from_questions(questions: &[Question]) -> Self {
        let slots = questions
            .iter()
            .filter_map(|q| {
                q.submitted.as_ref().map(|s| {
                    (
                        q.id.clone(),
                        AnswerState::Confirmed(Confirmed {
                            choice_id: s.choice_id.clone(),
                            answer_id: s.answer_id.clone(),
                        }),
                    )
                })
            })
            .collect();

        Self { slots }
    }

    pub fn state(&self, question_id: &str) -> Option<&AnswerState> {
        self.slots.get(question_id)
    }

    pub fn selected_choice(&self, question_id: &str) -> Option<&str> {
        self.slots.get(question_id).and_then(AnswerState::selected_choice)
    }

    /// Questions with a visible selection
    pub fn answered_count(&self) -> usize {
        self.slots
            .values()
            .filter(|s| s.selected_choice().is_some())
            .count()
    }

    /// Apply a selection locally and decide how to save it
    pub fn select(&mut self, question_id: &str, choice_id: &str) -> AnswerOp {
        let previous = self
            .slots
            .get(question_id)
            .and_then(AnswerState::confirmed)
            .cloned();

        let op = match &previous {
            Some(confirmed) => AnswerOp::Update {
                answer_id: confirmed.answer_id.clone(),
            },
            None => AnswerOp::Create,
        };

        self.slots.insert(
            question_id.to_string(),
            AnswerState::Unconfirmed {
                choice_id: choice_id.to_string(),
                previous,
            },
        );

        op
    }

    /// Record the server's acceptance of a save
    pub fn confirm(&mut self, question_id: &str, record: AnswerRecord) {
        let confirmed = Confirmed {
            choice_id: record.choice_id,
            answer_id: record.id,
        };

        if let Some(AnswerState::Unconfirmed { choice_id, previous }) =
            self.slots.get_mut(question_id)
        {
            if *choice_id != confirmed.choice_id {
                // A newer selection is in flight; keep it, remember the id
                *previous = Some(confirmed);
                return;
            }
        }

        self.slots
            .insert(question_id.to_string(), AnswerState::Confirmed(confirmed));
    }

    /// Roll back a rejected save
    ///
    /// Returns false when a newer selection already replaced it.
    pub fn reject(&mut self, question_id: &str, choice_id: &str) -> bool {
        let Some(slot) = self.slots.get_mut(question_id) else {
            return false;
        };

        match slot {
            AnswerState::Unconfirmed {
                choice_id: pending,
                previous,
            } if pending == choice_id => {
                *slot = AnswerState::Failed {
                    rejected_choice_id: choice_id.to_string(),
                    restored: previous.take(),
                };
                true
            }
            _ => false,
        }
    }
}
