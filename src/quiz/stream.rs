use std::collections::VecDeque;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::time::Instant;

use crate::quiz::ai_helper::{DeltaStream, GenerationError};
use crate::quiz::Question;

/// Cuts complete questions out of a JSON array that arrives in pieces.
///
/// Anything before the first `[` is skipped, so a model that wraps its answer
/// in prose or a code fence still parses. Each element is validated as soon
/// as its closing brace arrives; the first bad element poisons the stream.
/// Questions completed earlier in the same chunk are still handed out, and
/// the failure is kept for the caller to pick up with [`Self::take_failure`].
#[derive(Debug, Default)]
pub struct QuestionStreamParser {
    started: bool,
    closed: bool,
    depth: usize,
    in_string: bool,
    escaped: bool,
    element: String,
    parsed: usize,
    failure: Option<GenerationError>,
}

impl QuestionStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds the next piece of model output and returns the questions it completed.
    pub fn feed(&mut self, chunk: &str) -> Result<Vec<Question>, GenerationError> {
        if let Some(failure) = self.failure.take() {
            return Err(failure);
        }
        let mut completed = Vec::new();
        for c in chunk.chars() {
            if self.closed {
                break;
            }
            if !self.started {
                if c == '[' {
                    self.started = true;
                    self.depth = 1;
                }
                continue;
            }
            if self.depth == 1 {
                match c {
                    '{' => {
                        self.element.push(c);
                        self.depth = 2;
                    }
                    ']' => self.closed = true,
                    ',' => {}
                    c if c.is_whitespace() => {}
                    c => {
                        let failure = GenerationError::Malformed(format!(
                            "caractere inesperado '{}' entre as questões",
                            c
                        ));
                        return self.fail(completed, failure);
                    }
                }
                continue;
            }

            self.element.push(c);
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if c == '\\' {
                    self.escaped = true;
                } else if c == '"' {
                    self.in_string = false;
                }
                continue;
            }
            match c {
                '"' => self.in_string = true,
                '{' | '[' => self.depth += 1,
                '}' | ']' => {
                    self.depth -= 1;
                    if self.depth == 1 {
                        match self.take_question() {
                            Ok(question) => completed.push(question),
                            Err(failure) => return self.fail(completed, failure),
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(completed)
    }

    /// The error that stopped parsing after some questions of the same chunk
    /// were already returned.
    pub fn take_failure(&mut self) -> Option<GenerationError> {
        self.failure.take()
    }

    fn fail(
        &mut self,
        completed: Vec<Question>,
        failure: GenerationError,
    ) -> Result<Vec<Question>, GenerationError> {
        if completed.is_empty() {
            return Err(failure);
        }
        self.failure = Some(failure);
        Ok(completed)
    }

    /// Whether the closing `]` of the question array has been seen.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn take_question(&mut self) -> Result<Question, GenerationError> {
        let element = std::mem::take(&mut self.element);
        self.parsed += 1;
        let index = self.parsed;

        let question: Question =
            serde_json::from_str(&element).map_err(|e| GenerationError::InvalidQuestion {
                index,
                reason: e.to_string(),
            })?;
        question
            .validate()
            .map_err(|reason| GenerationError::InvalidQuestion { index, reason })?;
        Ok(question)
    }
}

/// Pulls deltas until it can hand out the next validated question.
struct QuestionProducer {
    deltas: DeltaStream,
    parser: QuestionStreamParser,
    pending: VecDeque<Question>,
    failure: Option<GenerationError>,
    emitted: usize,
    requested: usize,
    deadline: Instant,
    done: bool,
}

impl QuestionProducer {
    async fn next_question(&mut self) -> Option<Result<Question, GenerationError>> {
        if self.done {
            return None;
        }
        loop {
            if self.emitted == self.requested {
                self.done = true;
                return None;
            }
            if let Some(question) = self.pending.pop_front() {
                self.emitted += 1;
                return Some(Ok(question));
            }
            if let Some(failure) = self.failure.take() {
                self.done = true;
                return Some(Err(failure));
            }

            let next = tokio::time::timeout_at(self.deadline, self.deltas.next()).await;
            let failure = match next {
                Err(_) => GenerationError::TimedOut,
                Ok(None) => GenerationError::Incomplete {
                    received: self.emitted,
                    requested: self.requested,
                },
                Ok(Some(Err(e))) => e,
                Ok(Some(Ok(delta))) => match self.parser.feed(&delta) {
                    Ok(questions) => {
                        self.pending.extend(questions);
                        self.failure = self.parser.take_failure();
                        continue;
                    }
                    Err(e) => e,
                },
            };
            self.done = true;
            return Some(Err(failure));
        }
    }
}

/// Turns raw model output into a growing sequence of validated questions.
///
/// The stream ends after `requested` questions. Any failure is yielded once
/// as the last item; the upstream deltas are dropped together with the stream.
pub fn question_stream(
    deltas: DeltaStream,
    requested: usize,
    deadline: Instant,
) -> BoxStream<'static, Result<Question, GenerationError>> {
    let producer = QuestionProducer {
        deltas,
        parser: QuestionStreamParser::new(),
        pending: VecDeque::new(),
        failure: None,
        emitted: 0,
        requested,
        deadline,
        done: false,
    };
    stream::unfold(producer, |mut producer| async move {
        producer
            .next_question()
            .await
            .map(|item| (item, producer))
    })
    .boxed()
}

/// Collects streamed questions and only gives them up once all have arrived.
#[derive(Debug, Clone)]
pub struct GenerationProgress {
    requested: usize,
    questions: Vec<Question>,
}

impl GenerationProgress {
    pub fn new(requested: usize) -> Self {
        Self {
            requested,
            questions: Vec::with_capacity(requested),
        }
    }

    pub fn accept(&mut self, question: Question) {
        if !self.is_complete() {
            self.questions.push(question);
        }
    }

    pub fn received(&self) -> usize {
        self.questions.len()
    }

    pub fn requested(&self) -> usize {
        self.requested
    }

    pub fn percent(&self) -> f64 {
        if self.requested == 0 {
            return 0.0;
        }
        self.received() as f64 / self.requested as f64 * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.received() >= self.requested
    }

    pub fn status_line(&self) -> String {
        if self.received() == 0 {
            "Analisando conteúdo do PDF".to_string()
        } else {
            format!(
                "Gerando questão {} de {}",
                (self.received() + 1).min(self.requested),
                self.requested
            )
        }
    }

    pub fn finish(self) -> Result<Vec<Question>, GenerationError> {
        if self.is_complete() {
            Ok(self.questions)
        } else {
            Err(GenerationError::Incomplete {
                received: self.received(),
                requested: self.requested,
            })
        }
    }
}

/// Drains a question stream into a finished quiz or the first error.
pub async fn collect_questions(
    mut questions: BoxStream<'static, Result<Question, GenerationError>>,
    requested: usize,
) -> Result<Vec<Question>, GenerationError> {
    let mut progress = GenerationProgress::new(requested);
    while let Some(question) = questions.next().await {
        progress.accept(question?);
    }
    progress.finish()
}
