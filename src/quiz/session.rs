use rand::Rng;
use thiserror::Error;

use crate::quiz::score::{self, ScoreSummary};
use crate::quiz::shuffle::{self, DisplayQuestion, Permutation};
use crate::quiz::{AnswerLabel, Question};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("a quiz needs at least one question")]
    NoQuestions,
}

/// One user's pass through a quiz: navigation, answers, submission and the
/// shuffle toggle.
///
/// Answers are always stored under the option's original label, so scoring
/// and review keep working while options are displayed in shuffled order.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QuizSession {
    questions: Vec<Question>,
    current_index: usize,
    answers: Vec<Option<AnswerLabel>>,
    submitted: bool,
    score: Option<usize>,
    shuffled: bool,
    permutations: Vec<Permutation>,
}

impl QuizSession {
    pub fn new(questions: Vec<Question>) -> Result<Self, SessionError> {
        if questions.is_empty() {
            return Err(SessionError::NoQuestions);
        }
        let len = questions.len();
        Ok(Self {
            questions,
            current_index: 0,
            answers: vec![None; len],
            submitted: false,
            score: None,
            shuffled: false,
            permutations: vec![Permutation::identity(); len],
        })
    }

    /// Records `label` for the current question. Ignored after submission.
    pub fn select_answer(&mut self, label: AnswerLabel) -> bool {
        if self.submitted {
            return false;
        }
        self.answers[self.current_index] = Some(label);
        true
    }

    /// Records the option the user saw at display position `display`.
    pub fn select_displayed(&mut self, display: AnswerLabel) -> bool {
        let original = self.current_display().original_label(display);
        self.select_answer(original)
    }

    /// Moves to the next question, or submits when already on the last one.
    pub fn advance(&mut self) {
        if self.is_last() {
            self.submit();
        } else {
            self.current_index += 1;
        }
    }

    pub fn retreat(&mut self) {
        if self.current_index > 0 {
            self.current_index -= 1;
        }
    }

    /// Locks the answers and returns the score. Repeated calls keep the first score.
    pub fn submit(&mut self) -> usize {
        if let Some(score) = self.score {
            return score;
        }
        let score = score::score(&self.questions, &self.answers);
        self.submitted = true;
        self.score = Some(score);
        score
    }

    /// Starts over with the same questions and the same option order.
    pub fn reset(&mut self) {
        self.answers = vec![None; self.questions.len()];
        self.submitted = false;
        self.score = None;
        self.current_index = 0;
    }

    pub fn shuffle(&mut self) {
        self.shuffle_with(&mut rand::thread_rng());
    }

    pub fn shuffle_with<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.shuffled = true;
        self.permutations = shuffle::permutations_for(&self.questions, true, rng);
        self.reset();
    }

    pub fn unshuffle(&mut self) {
        self.shuffled = false;
        self.permutations = vec![Permutation::identity(); self.questions.len()];
        self.reset();
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_question(&self) -> &Question {
        &self.questions[self.current_index]
    }

    pub fn current_answer(&self) -> Option<AnswerLabel> {
        self.answers[self.current_index]
    }

    pub fn current_display(&self) -> DisplayQuestion<'_> {
        self.display_question(self.current_index)
    }

    pub fn display_question(&self, index: usize) -> DisplayQuestion<'_> {
        DisplayQuestion::new(&self.questions[index], self.permutations[index])
    }

    pub fn answers(&self) -> &[Option<AnswerLabel>] {
        &self.answers
    }

    pub fn is_last(&self) -> bool {
        self.current_index + 1 == self.questions.len()
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffled
    }

    pub fn score(&self) -> Option<usize> {
        self.score
    }

    pub fn summary(&self) -> Option<ScoreSummary> {
        self.score
            .map(|correct| ScoreSummary::new(correct, self.questions.len()))
    }

    /// Share of the quiz behind the current question, as the progress bar shows it.
    pub fn progress_percent(&self) -> f64 {
        self.current_index as f64 / self.questions.len() as f64 * 100.0
    }
}
