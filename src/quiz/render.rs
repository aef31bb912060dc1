//! Chat texts for the quiz screens. Everything here returns Telegram HTML.

use teloxide::utils::html::escape;

use crate::quiz::score::ScoreSummary;
use crate::quiz::session::QuizSession;
use crate::quiz::stream::GenerationProgress;

const BAR_WIDTH: usize = 10;

fn progress_bar(percent: f64) -> String {
    let filled = ((percent / 100.0) * BAR_WIDTH as f64).round() as usize;
    let filled = filled.min(BAR_WIDTH);
    format!(
        "{}{} {}%",
        "▓".repeat(filled),
        "░".repeat(BAR_WIDTH - filled),
        percent.round() as u32
    )
}

pub fn loading_message(progress: &GenerationProgress) -> String {
    format!(
        "Progresso\n{}\n{}",
        progress_bar(progress.percent()),
        progress.status_line()
    )
}

/// The current question with its options in display order.
pub fn question_card(title: &str, session: &QuizSession) -> String {
    let display = session.current_display();
    let mut text = format!(
        "<b>{}</b>\n{}\n\nQuestão {} / {}\n\n<b>{}</b>\n",
        escape(title),
        progress_bar(session.progress_percent()),
        session.current_index() + 1,
        session.len(),
        escape(&display.question.question)
    );

    let mut selected = None;
    for (shown, original, option) in display.options() {
        text.push_str(&format!("\n{}) {}", shown, escape(option)));
        if session.current_answer() == Some(original) {
            selected = Some(shown);
        }
    }

    match selected {
        Some(shown) => text.push_str(&format!("\n\nSua resposta: <b>{}</b>", shown)),
        None => text.push_str("\n\nEscolha uma opção."),
    }
    text
}

pub fn score_report(summary: &ScoreSummary) -> String {
    format!(
        "<b>{}%</b>\n{} de {} corretas\n\n{}",
        summary.rounded_percent(),
        summary.correct,
        summary.total,
        summary.message()
    )
}

/// One block per question, in original order, with the user's answer next to the key.
pub fn review(session: &QuizSession) -> Vec<String> {
    session
        .questions()
        .iter()
        .zip(session.answers())
        .enumerate()
        .map(|(i, (question, answer))| {
            let mut block = format!(
                "<b>{}. {}</b>\n✅ {}) {}",
                i + 1,
                escape(&question.question),
                question.answer,
                escape(question.option(question.answer))
            );
            match answer {
                Some(label) if *label == question.answer => {}
                Some(label) => block.push_str(&format!(
                    "\n❌ Sua resposta: {}) {}",
                    label,
                    escape(question.option(*label))
                )),
                None => block.push_str("\n❌ Sem resposta"),
            }
            block
        })
        .collect()
}

/// Joins blocks into as few messages as fit under `limit` characters each.
/// A single oversized block still gets a message of its own.
pub fn pack_messages(blocks: Vec<String>, limit: usize) -> Vec<String> {
    let mut messages: Vec<String> = Vec::new();
    let mut current = String::new();
    for block in blocks {
        if !current.is_empty()
            && current.chars().count() + 2 + block.chars().count() > limit
        {
            messages.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(&block);
    }
    if !current.is_empty() {
        messages.push(current);
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::{sample_question, AnswerLabel, Question};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn session() -> QuizSession {
        QuizSession::new(vec![
            sample_question("Primeira <pergunta>", AnswerLabel::B),
            sample_question("Segunda", AnswerLabel::C),
        ])
        .unwrap()
    }

    #[test]
    fn progress_bar_rounds() {
        assert_eq!(progress_bar(0.0), "░░░░░░░░░░ 0%");
        assert_eq!(progress_bar(75.0), "▓▓▓▓▓▓▓▓░░ 75%");
        assert_eq!(progress_bar(100.0), "▓▓▓▓▓▓▓▓▓▓ 100%");
    }

    #[test]
    fn card_escapes_and_marks_selection() {
        let mut quiz = session();
        let card = question_card("Biologia - Quiz", &quiz);
        assert!(card.contains("Questão 1 / 2"));
        assert!(card.contains("Primeira &lt;pergunta&gt;"));
        assert!(card.contains("Escolha uma opção."));

        quiz.select_answer(AnswerLabel::C);
        let card = question_card("Biologia - Quiz", &quiz);
        assert!(card.contains("Sua resposta: <b>C</b>"));
    }

    #[test]
    fn shuffled_card_shows_display_label_of_the_answer() {
        let mut quiz = session();
        quiz.shuffle_with(&mut StdRng::seed_from_u64(21));
        let display = quiz.current_display();
        let shown = AnswerLabel::ALL
            .into_iter()
            .find(|label| display.original_label(*label) == AnswerLabel::B)
            .unwrap();

        quiz.select_displayed(shown);
        let card = question_card("Quiz", &quiz);
        assert!(card.contains(&format!("Sua resposta: <b>{}</b>", shown)));
        assert!(card.contains(&format!("{}) Primeira &lt;pergunta&gt; opção B", shown)));
    }

    #[test]
    fn review_lists_key_and_mistakes() {
        let mut quiz = session();
        quiz.select_answer(AnswerLabel::B);
        quiz.advance();
        quiz.advance();

        let text = review(&quiz).join("\n\n");
        assert!(text.contains(
            "<b>1. Primeira &lt;pergunta&gt;</b>\n✅ B) Primeira &lt;pergunta&gt; opção B"
        ));
        assert!(text.contains("<b>2. Segunda</b>\n✅ C) Segunda opção C\n❌ Sem resposta"));
    }

    #[test]
    fn review_shows_wrong_choice() {
        let question: Question = sample_question("q", AnswerLabel::A);
        let mut quiz = QuizSession::new(vec![question]).unwrap();
        quiz.select_answer(AnswerLabel::D);
        quiz.submit();
        assert_eq!(
            review(&quiz),
            vec!["<b>1. q</b>\n✅ A) q opção A\n❌ Sua resposta: D) q opção D"]
        );
    }

    #[test]
    fn pack_messages_respects_limit() {
        let blocks = vec!["a".repeat(4), "b".repeat(4), "c".repeat(4), "d".repeat(20)];
        assert_eq!(
            pack_messages(blocks, 10),
            vec![
                "aaaa\n\nbbbb".to_string(),
                "cccc".to_string(),
                "d".repeat(20),
            ]
        );
        assert!(pack_messages(Vec::new(), 10).is_empty());
    }

    #[test]
    fn loading_message_shows_percent() {
        let mut progress = GenerationProgress::new(4);
        progress.accept(sample_question("a", AnswerLabel::A));
        assert_eq!(
            loading_message(&progress),
            "Progresso\n▓▓▓░░░░░░░ 25%\nGerando questão 2 de 4"
        );
    }

    #[test]
    fn score_report_formats_summary() {
        assert_eq!(
            score_report(&ScoreSummary::new(3, 4)),
            "<b>75%</b>\n3 de 4 corretas\n\nBom esforço! Você está no caminho certo."
        );
    }
}
