use crate::quiz::{AnswerLabel, Question};

/// Number of questions whose stored answer matches the canonical label.
pub fn score(questions: &[Question], answers: &[Option<AnswerLabel>]) -> usize {
    questions
        .iter()
        .zip(answers)
        .filter(|(question, answer)| **answer == Some(question.answer))
        .count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreSummary {
    pub correct: usize,
    pub total: usize,
}

impl ScoreSummary {
    pub fn new(correct: usize, total: usize) -> Self {
        Self { correct, total }
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.correct as f64 / self.total as f64 * 100.0
    }

    pub fn rounded_percent(&self) -> u32 {
        self.percent().round() as u32
    }

    pub fn message(&self) -> &'static str {
        let percent = self.percent();
        if self.total > 0 && self.correct == self.total {
            "Pontuação perfeita! Parabéns!"
        } else if percent >= 80.0 {
            "Excelente trabalho! Você foi muito bem!"
        } else if percent >= 60.0 {
            "Bom esforço! Você está no caminho certo."
        } else if percent >= 40.0 {
            "Não está mal, mas há espaço para melhorar."
        } else {
            "Continue praticando, você vai melhorar!"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::sample_question;

    #[test]
    fn counts_exact_matches_only() {
        let questions = vec![
            sample_question("1", AnswerLabel::A),
            sample_question("2", AnswerLabel::B),
        ];
        let answers = vec![Some(AnswerLabel::A), Some(AnswerLabel::C)];
        assert_eq!(score(&questions, &answers), 1);
    }

    #[test]
    fn unanswered_questions_score_nothing() {
        let questions = vec![
            sample_question("1", AnswerLabel::D),
            sample_question("2", AnswerLabel::D),
            sample_question("3", AnswerLabel::D),
        ];
        assert_eq!(score(&questions, &[None, None, None]), 0);
        assert_eq!(score(&questions, &[Some(AnswerLabel::D), None, Some(AnswerLabel::D)]), 2);
    }

    #[test]
    fn summary_rounds_and_picks_message() {
        let summary = ScoreSummary::new(2, 3);
        assert_eq!(summary.rounded_percent(), 67);
        assert_eq!(summary.message(), "Bom esforço! Você está no caminho certo.");

        assert_eq!(ScoreSummary::new(4, 4).message(), "Pontuação perfeita! Parabéns!");
        assert_eq!(
            ScoreSummary::new(4, 5).message(),
            "Excelente trabalho! Você foi muito bem!"
        );
        assert_eq!(
            ScoreSummary::new(2, 5).message(),
            "Não está mal, mas há espaço para melhorar."
        );
        assert_eq!(
            ScoreSummary::new(1, 4).message(),
            "Continue praticando, você vai melhorar!"
        );
    }
}
