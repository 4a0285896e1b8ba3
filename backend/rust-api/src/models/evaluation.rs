use serde::{Deserialize, Serialize};

use super::catalog::LifecycleState;

/// Final quiz of a module, stored in the "evaluations" collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    #[serde(rename = "_id")]
    pub id: String,
    pub module_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Questions sampled per attempt; 0 means the whole pool
    pub question_count: u32,
    /// 0 disables the time limit
    pub time_limit_minutes: u32,
    pub passing_score_percent: f64,
    pub max_attempts: u32,
    #[serde(default)]
    pub state: LifecycleState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    SingleChoice,
    TrueFalse,
    MatchPairs,
}

impl QuestionKind {
    pub fn instructions(self) -> &'static str {
        match self {
            QuestionKind::SingleChoice => "Select the correct answer.",
            QuestionKind::TrueFalse => "State whether the sentence is true or false.",
            QuestionKind::MatchPairs => "Match every item with its counterpart.",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub order: u32,
    pub is_correct: bool,
    /// Counterpart key for match-pairs questions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair_key: Option<String>,
}

/// Question of an evaluation pool, stored in the "questions" collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "_id")]
    pub id: String,
    pub evaluation_id: String,
    pub prompt: String,
    pub kind: QuestionKind,
    pub points: f64,
    #[serde(default)]
    pub order: u32,
    pub options: Vec<QuestionOption>,
}

impl Question {
    pub fn option(&self, option_id: &str) -> Option<&QuestionOption> {
        self.options.iter().find(|option| option.id == option_id)
    }

    pub fn correct_options(&self) -> impl Iterator<Item = &QuestionOption> {
        self.options.iter().filter(|option| option.is_correct)
    }
}

/// Option as shown to a learner: no correctness flag, and the pair key only
/// once the answer is revealed.
#[derive(Debug, Clone, Serialize)]
pub struct OptionView {
    pub id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pair_key: Option<String>,
}

impl From<&QuestionOption> for OptionView {
    fn from(option: &QuestionOption) -> Self {
        OptionView {
            id: option.id.clone(),
            text: option.text.clone(),
            pair_key: None,
        }
    }
}

impl OptionView {
    pub fn revealed(option: &QuestionOption) -> Self {
        OptionView {
            pair_key: option.pair_key.clone(),
            ..OptionView::from(option)
        }
    }
}

/// Keys a match-pairs answer can use, sorted so their order gives nothing away.
pub fn match_keys(options: &[QuestionOption]) -> Vec<String> {
    let mut keys: Vec<String> = options.iter().filter_map(|o| o.pair_key.clone()).collect();
    keys.sort();
    keys.dedup();
    keys
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionView {
    pub id: String,
    pub prompt: String,
    pub kind: QuestionKind,
    pub points: f64,
    pub instructions: &'static str,
    pub options: Vec<OptionView>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub match_keys: Vec<String>,
}

impl QuestionView {
    /// Builds the learner view with options in `option_order`; options not
    /// listed there are appended in their stored order.
    pub fn ordered(question: &Question, option_order: &[String]) -> Self {
        let mut options: Vec<OptionView> = option_order
            .iter()
            .filter_map(|id| question.option(id))
            .map(OptionView::from)
            .collect();
        for option in &question.options {
            if !option_order.contains(&option.id) {
                options.push(option.into());
            }
        }

        QuestionView {
            id: question.id.clone(),
            prompt: question.prompt.clone(),
            kind: question.kind,
            points: question.points,
            instructions: question.kind.instructions(),
            options,
            match_keys: match_keys(&question.options),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationInfo {
    pub id: String,
    pub title: String,
    pub description: String,
    pub question_count: u32,
    pub time_limit_minutes: u32,
    pub passing_score_percent: f64,
    pub max_attempts: u32,
}

impl From<&Evaluation> for EvaluationInfo {
    fn from(evaluation: &Evaluation) -> Self {
        EvaluationInfo {
            id: evaluation.id.clone(),
            title: evaluation.title.clone(),
            description: evaluation.description.clone(),
            question_count: evaluation.question_count,
            time_limit_minutes: evaluation.time_limit_minutes,
            passing_score_percent: evaluation.passing_score_percent,
            max_attempts: evaluation.max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question() -> Question {
        Question {
            id: "q1".to_string(),
            evaluation_id: "e1".to_string(),
            prompt: "Which tag starts a paragraph?".to_string(),
            kind: QuestionKind::SingleChoice,
            points: 5.0,
            order: 1,
            options: vec![
                QuestionOption {
                    id: "o1".to_string(),
                    text: "<p>".to_string(),
                    order: 1,
                    is_correct: true,
                    pair_key: None,
                },
                QuestionOption {
                    id: "o2".to_string(),
                    text: "<br>".to_string(),
                    order: 2,
                    is_correct: false,
                    pair_key: None,
                },
                QuestionOption {
                    id: "o3".to_string(),
                    text: "<a>".to_string(),
                    order: 3,
                    is_correct: false,
                    pair_key: None,
                },
            ],
        }
    }

    #[test]
    fn view_follows_attempt_order_and_hides_correctness() {
        let order = vec!["o3".to_string(), "o1".to_string()];
        let view = QuestionView::ordered(&question(), &order);

        let ids: Vec<_> = view.options.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["o3", "o1", "o2"]);

        let json = serde_json::to_value(&view).unwrap();
        assert!(json["options"][0].get("is_correct").is_none());
        assert_eq!(json["kind"], "single_choice");
    }

    #[test]
    fn pair_keys_stay_hidden_until_revealed() {
        let mut q = question();
        q.kind = QuestionKind::MatchPairs;
        q.options[0].pair_key = Some("paragraph".to_string());
        q.options[1].pair_key = Some("line break".to_string());

        let view = QuestionView::ordered(&q, &[]);
        assert!(view.options.iter().all(|o| o.pair_key.is_none()));
        assert_eq!(view.match_keys, vec!["line break", "paragraph"]);

        let shown = OptionView::revealed(&q.options[0]);
        assert_eq!(shown.pair_key.as_deref(), Some("paragraph"));
    }
}
