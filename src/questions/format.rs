use rand::seq::SliceRandom;

use crate::config::QuestionDurations;
use crate::models::{CorrectAnswer, FormattedQuestion, QuestionType};
use crate::questions::TriviaQuestion;

/// Turn a raw provider batch into the client payload plus the server-side
/// answer key.
///
/// Boolean questions always present `["True", "False"]` in that order;
/// multiple-choice questions get a uniformly random permutation of the
/// four decoded answers. HTML entities are decoded everywhere, and the
/// per-question timeout is derived from difficulty.
pub fn format_questions(
    questions: Vec<TriviaQuestion>,
    durations: &QuestionDurations,
) -> (Vec<FormattedQuestion>, Vec<CorrectAnswer>) {
    let mut formatted = Vec::with_capacity(questions.len());
    let mut correct_answers = Vec::with_capacity(questions.len());

    for question in questions {
        let correct = unescape(&question.correct_answer);

        let answers = match question.kind {
            QuestionType::Boolean => vec!["True".to_string(), "False".to_string()],
            QuestionType::Multiple => {
                let mut answers: Vec<String> = question
                    .incorrect_answers
                    .iter()
                    .map(|answer| unescape(answer))
                    .chain(std::iter::once(correct.clone()))
                    .collect();
                answers.shuffle(&mut rand::rng());
                answers
            }
        };

        formatted.push(FormattedQuestion {
            category: question.category,
            question: unescape(&question.question),
            answers,
            difficulty: question.difficulty,
            duration: durations.for_difficulty(question.difficulty),
            kind: question.kind,
        });
        correct_answers.push(CorrectAnswer {
            answer: correct,
            difficulty: question.difficulty,
        });
    }

    (formatted, correct_answers)
}

fn unescape(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}
