//! Assignments, submissions and the all-or-nothing grading rule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub text: String,
    #[serde(default)]
    pub options: Vec<String>,
    pub answers: Vec<String>,
    pub marks: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub student_id: Uuid,
    pub student_name: String,
    pub answers: Vec<Option<Vec<String>>>,
    pub points: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: String,
    pub teacher_id: Uuid,
    pub title: String,
    pub questions: Vec<Question>,
    pub publish_date: DateTime<Utc>,
    pub deadline: String,
    pub school: String,
    pub grade: String,
    pub subject: String,
    pub submissions: Vec<Submission>,
}

impl Assignment {
    #[must_use]
    pub fn submission_of(&self, student_id: Uuid) -> Option<&Submission> {
        self.submissions
            .iter()
            .find(|submission| submission.student_id == student_id)
    }
}

/// Awarded and attempted marks, rendered as `"x/y"`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Score {
    pub awarded: u32,
    pub total: u32,
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.awarded, self.total)
    }
}

/// Grade a submission against the assignment questions.
///
/// Unanswered (`None`) questions count toward neither side of the score. An
/// answered question earns its marks only when the normalized, sorted answer
/// list equals the normalized, sorted correct list.
#[must_use]
pub fn grade(questions: &[Question], answers: &[Option<Vec<String>>]) -> Score {
    questions
        .iter()
        .zip(answers)
        .fold(Score::default(), |mut score, (question, answer)| {
            if let Some(answer) = answer {
                score.total = score.total.saturating_add(question.marks);
                if normalized(answer) == normalized(&question.answers) {
                    score.awarded = score.awarded.saturating_add(question.marks);
                }
            }
            score
        })
}

fn normalized(values: &[String]) -> Vec<String> {
    let mut values: Vec<String> = values
        .iter()
        .map(|value| value.trim().to_lowercase())
        .collect();
    values.sort();
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(answers: &[&str], marks: u32) -> Question {
        Question {
            text: "Capital of France?".to_string(),
            options: Vec::new(),
            answers: answers.iter().map(ToString::to_string).collect(),
            marks,
        }
    }

    fn answer(values: &[&str]) -> Option<Vec<String>> {
        Some(values.iter().map(ToString::to_string).collect())
    }

    #[test]
    fn grading_ignores_case_and_whitespace() {
        let score = grade(&[question(&["Paris"], 5)], &[answer(&["paris "])]);
        assert_eq!(score, Score { awarded: 5, total: 5 });
    }

    #[test]
    fn extra_answers_earn_nothing() {
        let score = grade(&[question(&["paris"], 5)], &[answer(&["paris", "extra"])]);
        assert_eq!(score, Score { awarded: 0, total: 5 });
    }

    #[test]
    fn multi_answer_questions_are_order_independent() {
        let score = grade(&[question(&["B", "a"], 4)], &[answer(&["A", " b"])]);
        assert_eq!(score.to_string(), "4/4");
    }

    #[test]
    fn unanswered_questions_are_not_counted() {
        let questions = [question(&["4"], 10), question(&["x"], 3)];
        let score = grade(&questions, &[answer(&["4"]), None]);
        assert_eq!(score.to_string(), "10/10");

        let score = grade(&questions, &[answer(&["4"])]);
        assert_eq!(score.to_string(), "10/10");
    }
}
