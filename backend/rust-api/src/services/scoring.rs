//! Grading shared by evaluation attempts and practice exercises.

use std::collections::HashSet;

use crate::error::{LearningError, LearningResult};
use crate::models::attempt::AnswerPayload;
use crate::models::evaluation::{QuestionKind, QuestionOption};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grade {
    pub is_correct: bool,
    pub points_awarded: f64,
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Grades one answer. Choice questions are right when the selected option is
/// flagged correct. Match-pairs questions are right only when every submitted
/// pair matches its option's key; there is no partial credit.
pub fn grade(
    kind: QuestionKind,
    options: &[QuestionOption],
    points: f64,
    payload: &AnswerPayload,
) -> LearningResult<Grade> {
    let is_correct = match (kind, payload) {
        (QuestionKind::SingleChoice | QuestionKind::TrueFalse, AnswerPayload::Choice { option_id }) => {
            find_option(options, option_id)?.is_correct
        }
        (QuestionKind::MatchPairs, AnswerPayload::Pairs { pairs }) => {
            if pairs.is_empty() {
                return Err(LearningError::Validation(
                    "a match-pairs answer needs at least one pair".to_string(),
                ));
            }

            let mut submitted = HashSet::new();
            let mut all_match = true;
            for pair in pairs {
                let option = find_option(options, &pair.option_id)?;
                let matches = option.is_correct
                    && option.pair_key.as_deref() == Some(pair.pair_key.as_str());
                // Pairing the same option twice never counts.
                if !matches || !submitted.insert(option.id.as_str()) {
                    all_match = false;
                }
            }

            all_match
        }
        (QuestionKind::MatchPairs, AnswerPayload::Choice { .. }) => {
            return Err(LearningError::Validation(
                "match-pairs questions expect a list of pairs".to_string(),
            ))
        }
        (_, AnswerPayload::Pairs { .. }) => {
            return Err(LearningError::Validation(
                "choice questions expect a single option_id".to_string(),
            ))
        }
    };

    Ok(Grade {
        is_correct,
        points_awarded: if is_correct { points } else { 0.0 },
    })
}

fn find_option<'a>(options: &'a [QuestionOption], option_id: &str) -> LearningResult<&'a QuestionOption> {
    options
        .iter()
        .find(|option| option.id == option_id)
        .ok_or_else(|| {
            LearningError::Validation(format!("option {} does not belong to this question", option_id))
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScoreSummary {
    pub points_available: f64,
    pub points_earned: f64,
    pub score_percent: f64,
    pub correct_count: u32,
    pub incorrect_count: u32,
}

impl ScoreSummary {
    /// Sums `(question points, grade)` for the answered questions only.
    pub fn from_graded<I>(graded: I) -> Self
    where
        I: IntoIterator<Item = (f64, Grade)>,
    {
        let mut summary = ScoreSummary::default();
        for (points, grade) in graded {
            summary.points_available += points;
            summary.points_earned += grade.points_awarded;
            if grade.is_correct {
                summary.correct_count += 1;
            } else {
                summary.incorrect_count += 1;
            }
        }
        summary.score_percent = if summary.points_available > 0.0 {
            round2(summary.points_earned / summary.points_available * 100.0)
        } else {
            0.0
        };
        summary
    }

    pub fn passes(&self, passing_score_percent: f64) -> bool {
        self.score_percent >= passing_score_percent
    }
}

/// Advice for practice results, keyed on the share of answered exercises
/// that were right.
pub fn exercise_recommendation(percent_correct: f64, answered: u32) -> &'static str {
    if answered == 0 {
        "No exercises answered yet."
    } else if percent_correct >= 80.0 {
        "Excellent, the lesson concepts are mastered."
    } else if percent_correct >= 60.0 {
        "Good work. Revisit the incorrect exercises to improve."
    } else {
        "Review the lesson before moving on."
    }
}
