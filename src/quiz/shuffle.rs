use rand::seq::SliceRandom;
use rand::Rng;

use crate::quiz::{AnswerLabel, Question, OPTION_COUNT};

/// Maps a display position to the index of the option in the original question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Permutation([usize; OPTION_COUNT]);

impl Permutation {
    pub fn identity() -> Self {
        Self([0, 1, 2, 3])
    }

    /// Uniform permutation of the option indices.
    ///
    /// `SliceRandom::shuffle` is a Fisher–Yates shuffle: for `i` from the last
    /// index down to 1 it swaps `i` with a `j` drawn uniformly from `0..=i`,
    /// so every one of the 24 orderings is equally likely.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut order = Self::identity().0;
        order.shuffle(rng);
        Self(order)
    }

    pub fn original_index(&self, display_position: usize) -> usize {
        self.0[display_position]
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }
}

/// A question as it is shown to the user: options in display order, answers
/// still keyed by their original labels.
#[derive(Debug, Clone, Copy)]
pub struct DisplayQuestion<'a> {
    pub question: &'a Question,
    pub permutation: Permutation,
}

impl<'a> DisplayQuestion<'a> {
    pub fn new(question: &'a Question, permutation: Permutation) -> Self {
        Self {
            question,
            permutation,
        }
    }

    /// The original label of the option shown at `display`.
    pub fn original_label(&self, display: AnswerLabel) -> AnswerLabel {
        let index = self.permutation.original_index(display.index());
        // the permutation only holds indices below OPTION_COUNT
        AnswerLabel::from_index(index).unwrap_or(display)
    }

    /// `(display label, original label, option text)` in display order.
    pub fn options(&self) -> impl Iterator<Item = (AnswerLabel, AnswerLabel, &'a str)> + 'a {
        let this = *self;
        AnswerLabel::ALL.into_iter().map(move |display| {
            let original = this.original_label(display);
            (display, original, this.question.option(original))
        })
    }
}

/// One permutation per question: random when `shuffled`, identity otherwise.
pub fn permutations_for<R: Rng + ?Sized>(
    questions: &[Question],
    shuffled: bool,
    rng: &mut R,
) -> Vec<Permutation> {
    questions
        .iter()
        .map(|_| {
            if shuffled {
                Permutation::random(&mut *rng)
            } else {
                Permutation::identity()
            }
        })
        .collect()
}
