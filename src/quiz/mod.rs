pub mod ai_helper;
pub mod render;
pub mod score;
pub mod session;
pub mod shuffle;
pub mod stream;
pub mod title;
pub mod upload;

use std::fmt;

/// Every generated question carries exactly this many options.
pub const OPTION_COUNT: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Question {
    pub question: String,
    pub options: [String; OPTION_COUNT],
    /// Label of the correct option in its original (unshuffled) position.
    pub answer: AnswerLabel,
}

impl Question {
    pub fn new(question: String, options: [String; OPTION_COUNT], answer: AnswerLabel) -> Self {
        Self {
            question,
            options,
            answer,
        }
    }

    /// Checks the parts of the schema serde can't express.
    pub fn validate(&self) -> Result<(), String> {
        if self.question.trim().is_empty() {
            return Err("question text is empty".to_string());
        }
        if let Some(label) = AnswerLabel::ALL
            .iter()
            .find(|label| self.options[label.index()].trim().is_empty())
        {
            return Err(format!("option {} is empty", label));
        }
        Ok(())
    }

    pub fn option(&self, label: AnswerLabel) -> &str {
        &self.options[label.index()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AnswerLabel {
    A,
    B,
    C,
    D,
}

impl AnswerLabel {
    pub const ALL: [AnswerLabel; OPTION_COUNT] =
        [AnswerLabel::A, AnswerLabel::B, AnswerLabel::C, AnswerLabel::D];

    pub fn index(self) -> usize {
        match self {
            AnswerLabel::A => 0,
            AnswerLabel::B => 1,
            AnswerLabel::C => 2,
            AnswerLabel::D => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "A" => Some(AnswerLabel::A),
            "B" => Some(AnswerLabel::B),
            "C" => Some(AnswerLabel::C),
            "D" => Some(AnswerLabel::D),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AnswerLabel::A => "A",
            AnswerLabel::B => "B",
            AnswerLabel::C => "C",
            AnswerLabel::D => "D",
        }
    }
}

impl fmt::Display for AnswerLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
pub(crate) fn sample_question(text: &str, answer: AnswerLabel) -> Question {
    Question::new(
        text.to_string(),
        [
            format!("{} opção A", text),
            format!("{} opção B", text),
            format!("{} opção C", text),
            format!("{} opção D", text),
        ],
        answer,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_deserializes_from_model_json() {
        let json = r#"{"question":"Qual a capital?","options":["Lima","Quito","Brasília","Bogotá"],"answer":"C"}"#;
        let question: Question = serde_json::from_str(json).unwrap();
        assert_eq!(question.answer, AnswerLabel::C);
        assert_eq!(question.option(AnswerLabel::C), "Brasília");
        assert!(question.validate().is_ok());
    }

    #[test]
    fn question_rejects_wrong_option_count_and_label() {
        let three = r#"{"question":"q","options":["a","b","c"],"answer":"A"}"#;
        assert!(serde_json::from_str::<Question>(three).is_err());

        let bad_label = r#"{"question":"q","options":["a","b","c","d"],"answer":"E"}"#;
        assert!(serde_json::from_str::<Question>(bad_label).is_err());

        let lowercase = r#"{"question":"q","options":["a","b","c","d"],"answer":"a"}"#;
        assert!(serde_json::from_str::<Question>(lowercase).is_err());
    }

    #[test]
    fn validate_flags_blank_text() {
        let mut question = sample_question("q", AnswerLabel::A);
        question.options[2] = "  ".to_string();
        assert_eq!(question.validate().unwrap_err(), "option C is empty");

        question.question = String::new();
        assert_eq!(question.validate().unwrap_err(), "question text is empty");
    }

    #[test]
    fn labels_map_to_indices() {
        for (i, label) in AnswerLabel::ALL.iter().enumerate() {
            assert_eq!(label.index(), i);
            assert_eq!(AnswerLabel::from_index(i), Some(*label));
            assert_eq!(AnswerLabel::parse(label.as_str()), Some(*label));
        }
        assert_eq!(AnswerLabel::from_index(4), None);
        assert_eq!(AnswerLabel::parse("E"), None);
    }
}
