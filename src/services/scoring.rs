use std::cmp::Ordering;
use std::collections::HashMap;

use crate::db::models::{ExamSession, Question, ResultRow};

/// One candidate's raw scoring input: the stored terminal session reduced to
/// what ranking needs.
#[derive(Debug, Clone)]
pub(crate) struct ScoredCandidate {
    pub(crate) candidate: String,
    pub(crate) score: i32,
    pub(crate) elapsed_seconds: Option<i64>,
    pub(crate) disqualified: bool,
}

fn answer_matches(selected: &str, correct: &str) -> bool {
    selected.trim().eq_ignore_ascii_case(correct.trim())
}

/// Recomputes every score from the canonical answer key. Client-asserted
/// correctness is never trusted; unanswered or unknown question ids simply
/// do not count.
pub(crate) fn score_round(sessions: &[ExamSession], questions: &[Question]) -> Vec<ScoredCandidate> {
    let key: HashMap<&str, &str> =
        questions.iter().map(|q| (q.id.as_str(), q.correct_option.as_str())).collect();

    sessions
        .iter()
        .map(|session| {
            let score = session
                .answers
                .0
                .iter()
                .filter(|(id, selected)| {
                    key.get(id.as_str()).is_some_and(|correct| answer_matches(selected, correct))
                })
                .count() as i32;

            ScoredCandidate {
                candidate: session.candidate.clone(),
                score,
                elapsed_seconds: session.elapsed_seconds,
                disqualified: session.disqualified,
            }
        })
        .collect()
}

/// Deterministic total order: score descending, elapsed ascending with
/// missing times last, candidate token ascending. No ties survive.
fn ranking_order(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| match (a.elapsed_seconds, b.elapsed_seconds) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.candidate.cmp(&b.candidate))
}

/// Assigns ranks 1..N to the non-disqualified candidates. Disqualified
/// candidates keep their score for audit but get no rank and can never
/// qualify.
pub(crate) fn rank(round_no: i32, mut scored: Vec<ScoredCandidate>) -> Vec<ResultRow> {
    scored.sort_by(ranking_order);

    let mut next_rank = 0i32;
    scored
        .into_iter()
        .map(|entry| {
            let rank = if entry.disqualified {
                None
            } else {
                next_rank += 1;
                Some(next_rank)
            };
            ResultRow {
                candidate: entry.candidate,
                round_no,
                score: entry.score,
                elapsed_seconds: entry.elapsed_seconds,
                rank,
                qualified: false,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use sqlx::types::Json;
    use time::PrimitiveDateTime;

    use super::*;
    use crate::core::time::primitive_now_utc;
    use crate::db::models::AnswerSet;
    use crate::db::types::{SessionStatus, SubmissionKind};

    fn question(id: &str, correct: &str) -> Question {
        Question {
            round_no: 1,
            id: id.to_string(),
            text: format!("question {id}"),
            options: Json(vec!["one".into(), "two".into(), "three".into(), "four".into()]),
            correct_option: correct.to_string(),
        }
    }

    fn session(
        candidate: &str,
        answers: &[(&str, &str)],
        elapsed: Option<i64>,
        disqualified: bool,
    ) -> ExamSession {
        let started_at: PrimitiveDateTime = primitive_now_utc();
        ExamSession {
            candidate: candidate.to_string(),
            round_no: 1,
            status: SessionStatus::Submitted,
            started_at,
            submitted_at: Some(started_at),
            elapsed_seconds: elapsed,
            violations: 0,
            disqualified,
            submission_kind: Some(SubmissionKind::Manual),
            answers: Json(
                answers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<AnswerSet>(),
            ),
        }
    }

    #[test]
    fn scoring_is_case_insensitive_and_trims_whitespace() {
        let questions = vec![question("q1", "A"), question("q2", "b"), question("q3", "C")];
        let sessions =
            vec![session("tok", &[("q1", " a "), ("q2", "B"), ("q3", "d"), ("ghost", "A")], Some(10), false)];

        let scored = score_round(&sessions, &questions);
        assert_eq!(scored[0].score, 2);
    }

    #[test]
    fn ranking_is_deterministic_across_runs() {
        let scored = vec![
            ScoredCandidate { candidate: "c".into(), score: 5, elapsed_seconds: Some(100), disqualified: false },
            ScoredCandidate { candidate: "a".into(), score: 5, elapsed_seconds: Some(100), disqualified: false },
            ScoredCandidate { candidate: "b".into(), score: 7, elapsed_seconds: None, disqualified: false },
            ScoredCandidate { candidate: "d".into(), score: 5, elapsed_seconds: Some(50), disqualified: false },
            ScoredCandidate { candidate: "e".into(), score: 5, elapsed_seconds: None, disqualified: false },
        ];

        let first = rank(1, scored.clone());
        let second = rank(1, scored);
        assert_eq!(first, second);

        let order: Vec<(&str, Option<i32>)> =
            first.iter().map(|row| (row.candidate.as_str(), row.rank)).collect();
        // b wins on score; among the fives, faster elapsed wins, missing
        // elapsed sorts last, token breaks the remaining tie.
        assert_eq!(
            order,
            vec![
                ("b", Some(1)),
                ("d", Some(2)),
                ("a", Some(3)),
                ("c", Some(4)),
                ("e", Some(5)),
            ]
        );
    }

    #[test]
    fn disqualified_candidates_are_scored_but_never_ranked() {
        let scored = vec![
            ScoredCandidate { candidate: "a".into(), score: 10, elapsed_seconds: Some(5), disqualified: true },
            ScoredCandidate { candidate: "b".into(), score: 3, elapsed_seconds: Some(9), disqualified: false },
        ];

        let rows = rank(1, scored);
        let dq = rows.iter().find(|row| row.candidate == "a").unwrap();
        assert_eq!(dq.score, 10);
        assert_eq!(dq.rank, None);
        assert!(!dq.qualified);

        let ok = rows.iter().find(|row| row.candidate == "b").unwrap();
        assert_eq!(ok.rank, Some(1));
    }
}
