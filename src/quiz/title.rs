const FALLBACK_TITLE: &str = "Quiz";
const MAX_TITLE_WORDS: usize = 3;

/// Builds a quiz title out of the uploaded file name, e.g.
/// `historia_do_brasil-resumo.pdf` becomes `Historia Do Brasil - Quiz`.
pub fn quiz_title(file_name: &str) -> String {
    let name = strip_pdf_extension(file_name.trim()).trim();

    if name.chars().count() < 3 || name.chars().all(|c| c.is_ascii_digit()) {
        return FALLBACK_TITLE.to_string();
    }

    let words = name
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|word| !word.is_empty())
        .take(MAX_TITLE_WORDS)
        .map(capitalize)
        .collect::<Vec<_>>();

    format!("{} - {}", words.join(" "), FALLBACK_TITLE)
}

fn strip_pdf_extension(name: &str) -> &str {
    let cut = name.len().saturating_sub(4);
    match name.get(cut..) {
        Some(extension) if extension.eq_ignore_ascii_case(".pdf") => &name[..cut],
        _ => name,
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}
