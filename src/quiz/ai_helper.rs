use std::sync::Arc;
use std::time::Duration;

use chatgpt::client::ChatGPT;
use chatgpt::config::ChatGPTEngine;
use chatgpt::types::{CompletionResponse, ResponseChunk};
use futures::channel::mpsc;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use futures::{FutureExt, SinkExt};
use thiserror::Error;
use tokio::time::Instant;

use crate::quiz::stream::question_stream;
use crate::quiz::upload::{InputError, PdfUpload};
use crate::quiz::Question;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("Erro do modelo: {0}")]
    Upstream(String),
    #[error("Questão {index} inválida: {reason}")]
    InvalidQuestion { index: usize, reason: String },
    #[error("Resposta do modelo malformada: {0}")]
    Malformed(String),
    #[error("O modelo gerou apenas {received} de {requested} questões")]
    Incomplete { received: usize, requested: usize },
    #[error("Tempo limite de geração esgotado")]
    TimedOut,
}

impl From<chatgpt::err::Error> for GenerationError {
    fn from(error: chatgpt::err::Error) -> Self {
        GenerationError::Upstream(error.to_string())
    }
}

/// Pieces of model output in arrival order.
pub type DeltaStream = BoxStream<'static, Result<String, GenerationError>>;
pub type QuestionStream = BoxStream<'static, Result<Question, GenerationError>>;

/// The hosted model, seen as a text stream.
pub trait CompletionBackend: Send + Sync {
    fn stream_completion(&self, prompt: String) -> DeltaStream;

    fn complete(&self, prompt: String) -> BoxFuture<'static, Result<String, GenerationError>> {
        self.stream_completion(prompt)
            .try_fold(String::new(), |mut text, delta| async move {
                text.push_str(&delta);
                Ok(text)
            })
            .boxed()
    }
}

pub struct ChatGptBackend {
    chat_gpt: Arc<ChatGPT>,
}

impl ChatGptBackend {
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self, GenerationError> {
        let mut gpt = ChatGPT::new(api_key)?;

        gpt.config.engine = engine_for(model);
        gpt.config.timeout = timeout;

        Ok(Self {
            chat_gpt: Arc::new(gpt),
        })
    }
}

fn engine_for(model: &str) -> ChatGPTEngine {
    match model {
        "gpt-3.5-turbo" => ChatGPTEngine::Gpt35Turbo,
        "gpt-4" => ChatGPTEngine::Gpt4,
        // resolved once at startup
        other => ChatGPTEngine::Custom(Box::leak(other.to_string().into_boxed_str())),
    }
}

impl CompletionBackend for ChatGptBackend {
    fn stream_completion(&self, prompt: String) -> DeltaStream {
        let chat_gpt = Arc::clone(&self.chat_gpt);
        let (mut tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let chunks = match chat_gpt.send_message_streaming(prompt).await {
                Ok(chunks) => chunks,
                Err(e) => {
                    log::error!("Streaming completion failed to start: {}", e);
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
            };
            let mut chunks = Box::pin(chunks);
            while let Some(chunk) = chunks.next().await {
                if let ResponseChunk::Content { delta, .. } = chunk {
                    if tx.send(Ok(delta)).await.is_err() {
                        // nobody is listening anymore
                        log::debug!("Completion receiver dropped, stopping stream");
                        return;
                    }
                }
            }
        });

        rx.boxed()
    }

    fn complete(&self, prompt: String) -> BoxFuture<'static, Result<String, GenerationError>> {
        let chat_gpt = Arc::clone(&self.chat_gpt);
        async move {
            let response: CompletionResponse = chat_gpt.send_message(prompt).await?;
            let content = response.message().clone().content;

            log::debug!("Completion: {:?}", content);

            Ok(content)
        }
        .boxed()
    }
}

pub struct QuizGenerator {
    backend: Arc<dyn CompletionBackend>,
    timeout: Duration,
    max_document_chars: usize,
}

impl QuizGenerator {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        timeout: Duration,
        max_document_chars: usize,
    ) -> Self {
        Self {
            backend,
            timeout,
            max_document_chars,
        }
    }

    /// Extracts the document text and starts streaming `requested` questions.
    pub async fn generate(
        &self,
        upload: PdfUpload,
        requested: usize,
    ) -> Result<QuestionStream, GenerationError> {
        log::info!(
            "Generating {} questions from {} (~{}MB)",
            requested,
            upload.name,
            upload.bytes.len() / 1024 / 1024
        );
        let text = tokio::task::spawn_blocking(move || upload.extract_text())
            .await
            .map_err(|e| InputError::UnreadablePdf(e.to_string()))??;
        log::debug!("Extracted {} characters of text", text.chars().count());

        Ok(self.generate_from_text(&text, requested))
    }

    pub fn generate_from_text(&self, text: &str, requested: usize) -> QuestionStream {
        let prompt = quiz_prompt(text, requested, self.max_document_chars);
        let deadline = Instant::now() + self.timeout;
        question_stream(self.backend.stream_completion(prompt), requested, deadline)
    }

    /// Round trip with the model to verify the credentials.
    pub async fn check_api(&self) -> Result<String, GenerationError> {
        self.backend.complete("Say hello".to_string()).await
    }
}

fn quiz_prompt(document: &str, requested: usize, max_document_chars: usize) -> String {
    format!(
        "Você é um professor brasileiro. Seu trabalho é analisar um documento e criar um teste de múltipla escolha com {requested} questões baseado no conteúdo do documento.
IMPORTANTE: Todas as perguntas e opções devem estar escritas em português brasileiro, independente do idioma do documento original. Cada opção deve ter aproximadamente o mesmo tamanho. As questões devem ser claras e objetivas.
Responda apenas com um array JSON de exatamente {requested} objetos no formato:
[{{\"question\": \"texto da pergunta\", \"options\": [\"opção A\", \"opção B\", \"opção C\", \"opção D\"], \"answer\": \"A\"}}]
O campo \"answer\" é a letra (A, B, C ou D) da opção correta na ordem do array \"options\".

Documento:
\"\"\"
{document}
\"\"\"",
        requested = requested,
        document = truncate_chars(document.trim(), max_document_chars),
    )
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}
