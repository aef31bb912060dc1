use std::ops::RangeInclusive;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

pub const PDF_MIME: &str = "application/pdf";
pub const MAX_FILE_BYTES: usize = 100 * 1024 * 1024;
pub const DEFAULT_QUESTION_COUNT: usize = 4;
pub const QUESTION_COUNT_RANGE: RangeInclusive<usize> = 4..=20;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("Nenhum arquivo fornecido")]
    NoFiles,
    #[error("Apenas arquivos PDF são permitidos (recebido: {0})")]
    UnsupportedType(String),
    #[error("Arquivo muito grande. Limite máximo: {limit_mb}MB. Arquivo: {size_mb}MB")]
    TooLarge { size_mb: usize, limit_mb: usize },
    #[error("O arquivo está vazio")]
    EmptyFile,
    #[error("Conteúdo base64 inválido: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("Número de questões inválido: {0} (use de 4 a 20)")]
    QuestionCount(usize),
    #[error("Não foi possível ler o PDF: {0}")]
    UnreadablePdf(String),
    #[error("O PDF não contém texto extraível")]
    NoText,
}

fn megabytes(bytes: usize) -> usize {
    (bytes as f64 / 1024.0 / 1024.0).round() as usize
}

fn default_question_count() -> usize {
    DEFAULT_QUESTION_COUNT
}

/// Body of the generation endpoints.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    #[serde(default)]
    pub files: Vec<UploadedFile>,
    #[serde(default = "default_question_count")]
    pub number_of_questions: usize,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub name: String,
    #[serde(default, alias = "type")]
    pub mime_type: String,
    /// Bare base64 or a `data:<mime>;base64,` URL.
    #[serde(alias = "data")]
    pub base64_data: String,
}

impl GenerationRequest {
    /// Validates the request and decodes its first file.
    pub fn into_upload(self) -> Result<(PdfUpload, usize), InputError> {
        let count = check_question_count(self.number_of_questions)?;
        let file = self.files.into_iter().next().ok_or(InputError::NoFiles)?;
        check_mime(Some(&file.mime_type))?;

        let payload = strip_data_url(&file.base64_data).trim();
        // reject before decoding anything that can't fit
        check_size(payload.len() / 4 * 3, MAX_FILE_BYTES)?;
        let bytes = STANDARD.decode(payload)?;

        let upload = PdfUpload::new(file.name, Some(&file.mime_type), bytes)?;
        Ok((upload, count))
    }
}

pub fn check_question_count(count: usize) -> Result<usize, InputError> {
    if QUESTION_COUNT_RANGE.contains(&count) {
        Ok(count)
    } else {
        Err(InputError::QuestionCount(count))
    }
}

/// Accepts `application/pdf`, ignoring case and parameters.
pub fn check_mime(mime: Option<&str>) -> Result<(), InputError> {
    let mime = mime.unwrap_or_default();
    let essence = mime.split(';').next().unwrap_or_default().trim();
    if essence.eq_ignore_ascii_case(PDF_MIME) {
        Ok(())
    } else {
        Err(InputError::UnsupportedType(if mime.is_empty() {
            "desconhecido".to_string()
        } else {
            mime.to_string()
        }))
    }
}

pub fn check_size(size: usize, limit: usize) -> Result<(), InputError> {
    if size > limit {
        return Err(InputError::TooLarge {
            size_mb: megabytes(size),
            limit_mb: megabytes(limit),
        });
    }
    Ok(())
}

fn strip_data_url(data: &str) -> &str {
    match data.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map_or(rest, |(_, payload)| payload),
        None => data,
    }
}

/// A PDF that passed the boundary checks.
#[derive(Debug, Clone)]
pub struct PdfUpload {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl PdfUpload {
    pub fn new(name: String, mime: Option<&str>, bytes: Vec<u8>) -> Result<Self, InputError> {
        Self::with_limit(name, mime, bytes, MAX_FILE_BYTES)
    }

    pub fn with_limit(
        name: String,
        mime: Option<&str>,
        bytes: Vec<u8>,
        limit: usize,
    ) -> Result<Self, InputError> {
        check_mime(mime)?;
        if bytes.is_empty() {
            return Err(InputError::EmptyFile);
        }
        check_size(bytes.len(), limit)?;
        Ok(Self { name, bytes })
    }

    /// Concatenated text of every page, in page order.
    pub fn extract_text(&self) -> Result<String, InputError> {
        let document = lopdf::Document::load_mem(&self.bytes)
            .map_err(|e| InputError::UnreadablePdf(e.to_string()))?;
        let pages = document.get_pages().keys().copied().collect::<Vec<u32>>();
        if pages.is_empty() {
            return Err(InputError::NoText);
        }

        let text = document
            .extract_text(&pages)
            .map_err(|e| InputError::UnreadablePdf(e.to_string()))?;
        if text.trim().is_empty() {
            return Err(InputError::NoText);
        }
        Ok(text)
    }
}

/// A one-page PDF whose only content is `text` in a standard font.
#[cfg(test)]
pub(crate) fn sample_pdf(text: &str) -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    let mut document = Document::with_version("1.5");
    let pages_id = document.new_object_id();
    let font_id = document.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = document.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![72.into(), 720.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = document.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = document.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    document.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    document.save_to(&mut bytes).unwrap();
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: &str) -> GenerationRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn empty_file_list_is_rejected() {
        let err = request(r#"{"files": [], "numberOfQuestions": 4}"#)
            .into_upload()
            .unwrap_err();
        assert!(matches!(err, InputError::NoFiles));

        let err = request(r#"{}"#).into_upload().unwrap_err();
        assert!(matches!(err, InputError::NoFiles));
    }

    #[test]
    fn only_pdf_is_accepted() {
        let err = request(
            r#"{"files": [{"name": "notas.txt", "mimeType": "text/plain", "base64Data": "aGVsbG8="}]}"#,
        )
        .into_upload()
        .unwrap_err();
        assert!(matches!(err, InputError::UnsupportedType(mime) if mime == "text/plain"));

        assert!(check_mime(Some("Application/PDF; charset=binary")).is_ok());
        assert!(matches!(
            check_mime(None),
            Err(InputError::UnsupportedType(mime)) if mime == "desconhecido"
        ));
    }

    #[test]
    fn decodes_data_urls_and_aliases() {
        let (upload, count) = request(
            r#"{"files": [{"name": "a.pdf", "type": "application/pdf", "data": "data:application/pdf;base64,JVBERi0xLjQ="}], "numberOfQuestions": 6}"#,
        )
        .into_upload()
        .unwrap();
        assert_eq!(upload.name, "a.pdf");
        assert_eq!(upload.bytes, b"%PDF-1.4");
        assert_eq!(count, 6);
    }

    #[test]
    fn question_count_defaults_and_range() {
        assert_eq!(request(r#"{"files": []}"#).number_of_questions, 4);
        assert!(matches!(
            check_question_count(3),
            Err(InputError::QuestionCount(3))
        ));
        assert!(matches!(
            check_question_count(21),
            Err(InputError::QuestionCount(21))
        ));
        assert_eq!(check_question_count(20).unwrap(), 20);
    }

    #[test]
    fn invalid_base64_is_an_input_error() {
        let err = request(
            r#"{"files": [{"name": "a.pdf", "mimeType": "application/pdf", "base64Data": "***"}]}"#,
        )
        .into_upload()
        .unwrap_err();
        assert!(matches!(err, InputError::InvalidBase64(_)));
    }

    #[test]
    fn oversized_and_empty_files_are_rejected() {
        let err = PdfUpload::with_limit(
            "big.pdf".to_string(),
            Some(PDF_MIME),
            vec![0; 3 * 1024 * 1024],
            2 * 1024 * 1024,
        )
        .unwrap_err();
        assert!(matches!(err, InputError::TooLarge { size_mb: 3, limit_mb: 2 }));
        assert_eq!(
            err.to_string(),
            "Arquivo muito grande. Limite máximo: 2MB. Arquivo: 3MB"
        );

        let err = PdfUpload::new("empty.pdf".to_string(), Some(PDF_MIME), Vec::new()).unwrap_err();
        assert!(matches!(err, InputError::EmptyFile));
    }

    #[test]
    fn garbage_bytes_are_not_a_readable_pdf() {
        let upload = PdfUpload::new(
            "broken.pdf".to_string(),
            Some(PDF_MIME),
            b"definitely not a pdf".to_vec(),
        )
        .unwrap();
        assert!(matches!(
            upload.extract_text(),
            Err(InputError::UnreadablePdf(_))
        ));
    }

    #[test]
    fn extracts_text_from_a_real_pdf() {
        let upload = PdfUpload::new(
            "aula.pdf".to_string(),
            Some(PDF_MIME),
            sample_pdf("Photosynthesis turns light into sugar"),
        )
        .unwrap();
        let text = upload.extract_text().unwrap();
        assert!(text.contains("Photosynthesis turns light into sugar"));
    }

    #[test]
    fn pdf_without_text_is_reported() {
        let upload =
            PdfUpload::new("vazio.pdf".to_string(), Some(PDF_MIME), sample_pdf(" ")).unwrap();
        assert!(matches!(upload.extract_text(), Err(InputError::NoText)));
    }
}
