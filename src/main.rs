mod config;
mod quiz;
mod server;

use std::sync::Arc;

use config::Config;
use dotenv::dotenv;
use futures::StreamExt;
use quiz::{
    ai_helper::{ChatGptBackend, GenerationError, QuizGenerator},
    render,
    session::QuizSession,
    stream::GenerationProgress,
    title::quiz_title,
    upload::{
        check_mime, check_question_count, check_size, PdfUpload, MAX_FILE_BYTES,
        QUESTION_COUNT_RANGE,
    },
    AnswerLabel, Question,
};
use server::AppState;
use teloxide::{
    dispatching::dialogue::{
        serializer::Json, ErasedStorage, InMemStorage, SqliteStorage, Storage,
    },
    net::Download,
    prelude::*,
    types::{ChatAction, KeyboardButton, KeyboardMarkup, KeyboardRemove, MessageId, ParseMode},
};

type QuizDialogue = Dialogue<State, ErasedStorage<State>>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
pub enum State {
    #[default]
    Start,
    ReceiveQuestionCount,
    ReceiveDocument {
        number_of_questions: usize,
    },
    Generating {
        number_of_questions: usize,
        generation_id: u64,
    },
    Quiz {
        title: String,
        session: QuizSession,
    },
}

type DialogueStorage = Arc<ErasedStorage<State>>;

/// Held while checking and moving a dialogue out of `State::Generating`, so a
/// finished generation and a cancellation can't both win.
#[derive(Clone, Default)]
struct GenerationLock(Arc<tokio::sync::Mutex<()>>);

// Telegram refuses longer messages
const MESSAGE_LIMIT: usize = 4000;

#[tokio::main]
async fn main() {
    dotenv().ok();
    pretty_env_logger::init();

    if let Err(e) = run().await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> HandlerResult {
    let config = Config::from_env()?;
    log::info!("Starting PDF quiz bot...");

    let backend = ChatGptBackend::new(
        &config.chatgpt_api_key,
        &config.model,
        config.generation_timeout,
    )?;
    let generator = Arc::new(QuizGenerator::new(
        Arc::new(backend),
        config.generation_timeout,
        config.max_document_chars,
    ));

    let server = tokio::spawn(server::serve(
        config.http_addr,
        AppState {
            generator: generator.clone(),
            api_key_exists: true,
        },
    ));

    let Some(token) = config.telegram_token.clone() else {
        log::warn!("TELOXIDE_TOKEN is not set, serving the HTTP endpoint only");
        server.await??;
        return Ok(());
    };

    let storage = open_storage(&config).await?;
    let bot = Bot::new(token);

    Dispatcher::builder(
        bot,
        Update::filter_message()
            .enter_dialogue::<Message, ErasedStorage<State>, State>()
            .branch(
                dptree::filter(|msg: Message| msg.text().map(str::trim) == Some("/start"))
                    .endpoint(start),
            )
            .branch(dptree::case![State::Start].endpoint(start))
            .branch(dptree::case![State::ReceiveQuestionCount].endpoint(receive_question_count))
            .branch(
                dptree::case![State::ReceiveDocument {
                    number_of_questions
                }]
                .endpoint(receive_document),
            )
            .branch(
                dptree::case![State::Generating {
                    number_of_questions,
                    generation_id
                }]
                .endpoint(while_generating),
            )
            .branch(dptree::case![State::Quiz { title, session }].endpoint(quiz_step)),
    )
    .dependencies(dptree::deps![storage, generator, GenerationLock::default()])
    .enable_ctrlc_handler()
    .build()
    .dispatch()
    .await;

    server.abort();
    Ok(())
}

async fn open_storage(
    config: &Config,
) -> Result<DialogueStorage, Box<dyn std::error::Error + Send + Sync>> {
    match &config.dialogue_db {
        Some(path) => {
            log::info!("Establishing connection to the database {}", path);
            let storage = SqliteStorage::open(path, Json).await?.erase();
            log::info!("Connection established");
            Ok(storage)
        }
        None => Ok(InMemStorage::<State>::new().erase()),
    }
}

const GREETING_TEXT: &str = "Olá! Eu sou o Gerador de Quiz em PDF. \
    Envie um PDF (até 100MB) e eu crio um quiz interativo baseado no seu conteúdo.";
const CANCEL: &str = "Cancelar";
const PREVIOUS: &str = "⬅️ Anterior";
const NEXT: &str = "Próxima ➡️";
const SUBMIT: &str = "Enviar ✅";
const RETRY: &str = "🔄 Refazer Quiz";
const SHUFFLE: &str = "🔀 Embaralhar";
const ORIGINAL_ORDER: &str = "↩️ Ordem Original";
const NEW_QUIZ: &str = "🏠 Novo Quiz";

fn question_count_keyboard() -> KeyboardMarkup {
    let counts = QUESTION_COUNT_RANGE.collect::<Vec<_>>();
    KeyboardMarkup::new(
        counts
            .chunks(6)
            .map(|row| {
                row.iter()
                    .map(|count| KeyboardButton::new(count.to_string()))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>(),
    )
}

fn quiz_keyboard(session: &QuizSession) -> KeyboardMarkup {
    let answers = AnswerLabel::ALL
        .iter()
        .map(|label| KeyboardButton::new(label.as_str()))
        .collect::<Vec<_>>();
    let next = if session.is_last() { SUBMIT } else { NEXT };
    KeyboardMarkup::new(vec![
        answers,
        vec![KeyboardButton::new(PREVIOUS), KeyboardButton::new(next)],
    ])
}

fn results_keyboard(session: &QuizSession) -> KeyboardMarkup {
    let order = if session.is_shuffled() {
        ORIGINAL_ORDER
    } else {
        SHUFFLE
    };
    KeyboardMarkup::new(vec![
        vec![KeyboardButton::new(RETRY), KeyboardButton::new(order)],
        vec![KeyboardButton::new(NEW_QUIZ)],
    ])
}

async fn start(
    bot: Bot,
    dialogue: QuizDialogue,
    lock: GenerationLock,
    msg: Message,
) -> HandlerResult {
    bot.send_message(msg.chat.id, GREETING_TEXT).await?;
    ask_question_count(&bot, &dialogue, &lock, msg.chat.id).await
}

async fn ask_question_count(
    bot: &Bot,
    dialogue: &QuizDialogue,
    lock: &GenerationLock,
    chat_id: ChatId,
) -> HandlerResult {
    // may abandon a running generation
    {
        let _guard = lock.0.lock().await;
        dialogue.update(State::ReceiveQuestionCount).await?;
    }
    bot.send_message(chat_id, "Quantas questões o quiz deve ter?")
        .reply_markup(question_count_keyboard())
        .await?;
    Ok(())
}

async fn receive_question_count(bot: Bot, dialogue: QuizDialogue, msg: Message) -> HandlerResult {
    let count = msg
        .text()
        .and_then(|text| text.trim().parse::<usize>().ok())
        .and_then(|count| check_question_count(count).ok());

    let Some(number_of_questions) = count else {
        bot.send_message(msg.chat.id, "Por favor, escolha um número de 4 a 20")
            .reply_markup(question_count_keyboard())
            .await?;
        return Ok(());
    };

    bot.send_message(
        msg.chat.id,
        format!(
            "Perfeito, {} questões! Agora envie o PDF (até 100MB).",
            number_of_questions
        ),
    )
    .reply_markup(KeyboardRemove::new())
    .await?;
    dialogue
        .update(State::ReceiveDocument {
            number_of_questions,
        })
        .await?;
    Ok(())
}

async fn receive_document(
    bot: Bot,
    dialogue: QuizDialogue,
    number_of_questions: usize,
    msg: Message,
    generator: Arc<QuizGenerator>,
    lock: GenerationLock,
) -> HandlerResult {
    let Some(document) = msg.document() else {
        bot.send_message(msg.chat.id, "Por favor, envie um arquivo PDF.")
            .await?;
        return Ok(());
    };

    let name = document
        .file_name
        .clone()
        .unwrap_or_else(|| "documento.pdf".to_string());
    let mime = document
        .mime_type
        .as_ref()
        .map(|mime| mime.essence_str().to_string());
    log::info!(
        "Chat {} sent {} ({:?}, ~{}MB)",
        msg.chat.id,
        name,
        mime,
        document.file.size / 1024 / 1024
    );

    // the bot API reports type and size up front; no need to download a file we'd reject
    if let Err(e) = check_mime(mime.as_deref())
        .and_then(|_| check_size(document.file.size as usize, MAX_FILE_BYTES))
    {
        bot.send_message(msg.chat.id, e.to_string()).await?;
        return Ok(());
    }

    bot.send_message(
        msg.chat.id,
        "Processando arquivo... Isso pode levar alguns minutos para arquivos grandes.",
    )
    .await?;
    // Only cosmetic, so a failure here is fine
    let _ = bot
        .send_chat_action(msg.chat.id, ChatAction::Typing)
        .await;

    let file = bot.get_file(document.file.id.clone()).await?;
    let mut bytes = Vec::new();
    bot.download_file(&file.path, &mut bytes).await?;

    let upload = match PdfUpload::new(name, mime.as_deref(), bytes) {
        Ok(upload) => upload,
        Err(e) => {
            bot.send_message(msg.chat.id, e.to_string()).await?;
            return Ok(());
        }
    };

    let generation_id = rand::random::<u64>();
    dialogue
        .update(State::Generating {
            number_of_questions,
            generation_id,
        })
        .await?;

    let progress_message = bot
        .send_message(
            msg.chat.id,
            render::loading_message(&GenerationProgress::new(number_of_questions)),
        )
        .reply_markup(KeyboardMarkup::new(vec![vec![KeyboardButton::new(CANCEL)]]))
        .await?;

    tokio::spawn(run_generation(
        bot,
        dialogue,
        generator,
        lock,
        upload,
        number_of_questions,
        generation_id,
        progress_message.id,
    ));
    Ok(())
}

async fn is_current_generation(dialogue: &QuizDialogue, generation_id: u64) -> bool {
    matches!(
        dialogue.get().await,
        Ok(Some(State::Generating { generation_id: current, .. })) if current == generation_id
    )
}

/// Moves the dialogue to `next` only if it is still waiting for `generation_id`.
async fn commit_generation(
    dialogue: &QuizDialogue,
    lock: &GenerationLock,
    generation_id: u64,
    next: State,
) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    let _guard = lock.0.lock().await;
    if !is_current_generation(dialogue, generation_id).await {
        return Ok(false);
    }
    dialogue.update(next).await?;
    Ok(true)
}

async fn run_generation(
    bot: Bot,
    dialogue: QuizDialogue,
    generator: Arc<QuizGenerator>,
    lock: GenerationLock,
    upload: PdfUpload,
    number_of_questions: usize,
    generation_id: u64,
    progress_message: MessageId,
) {
    let chat_id = dialogue.chat_id();
    let title = quiz_title(&upload.name);

    let result = stream_questions(
        &bot,
        &dialogue,
        &generator,
        upload,
        number_of_questions,
        generation_id,
        progress_message,
    )
    .await;

    let commit = Commit {
        bot: &bot,
        dialogue: &dialogue,
        lock: &lock,
        generation_id,
    };
    let outcome = match result {
        Ok(Some(questions)) => start_quiz(commit, title, questions).await,
        Ok(None) => Ok(false),
        Err(e) => report_failure(commit, number_of_questions, e).await,
    };
    match outcome {
        Ok(true) => {}
        // the user cancelled or started over in the meantime
        Ok(false) => log::info!("Discarding generation {} for chat {}", generation_id, chat_id),
        Err(e) => log::error!("Failed to finish generation for chat {}: {}", chat_id, e),
    }
}

/// Feeds streamed questions into the progress message. `None` when the
/// generation was abandoned before it finished.
async fn stream_questions(
    bot: &Bot,
    dialogue: &QuizDialogue,
    generator: &QuizGenerator,
    upload: PdfUpload,
    number_of_questions: usize,
    generation_id: u64,
    progress_message: MessageId,
) -> Result<Option<Vec<Question>>, GenerationError> {
    let mut questions = generator.generate(upload, number_of_questions).await?;
    let mut progress = GenerationProgress::new(number_of_questions);

    while let Some(question) = questions.next().await {
        progress.accept(question?);
        if !is_current_generation(dialogue, generation_id).await {
            return Ok(None);
        }

        log::debug!(
            "Chat {}: {} of {} questions",
            dialogue.chat_id(),
            progress.received(),
            progress.requested()
        );
        if let Err(e) = bot
            .edit_message_text(
                dialogue.chat_id(),
                progress_message,
                render::loading_message(&progress),
            )
            .await
        {
            log::debug!("Could not update progress message: {}", e);
        }
    }

    progress.finish().map(Some)
}

/// What a finished generation needs to hand its result to the chat.
#[derive(Clone, Copy)]
struct Commit<'a> {
    bot: &'a Bot,
    dialogue: &'a QuizDialogue,
    lock: &'a GenerationLock,
    generation_id: u64,
}

impl Commit<'_> {
    async fn to(&self, next: State) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        commit_generation(self.dialogue, self.lock, self.generation_id, next).await
    }
}

/// `Ok(false)` when the generation was no longer wanted.
async fn start_quiz(
    commit: Commit<'_>,
    title: String,
    questions: Vec<Question>,
) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    let session = QuizSession::new(questions)?;
    let next = State::Quiz {
        title: title.clone(),
        session: session.clone(),
    };
    if !commit.to(next).await? {
        return Ok(false);
    }

    let chat_id = commit.dialogue.chat_id();
    commit
        .bot
        .send_message(chat_id, format!("Quiz pronto! {} questões.", session.len()))
        .await?;
    commit
        .bot
        .send_message(chat_id, render::question_card(&title, &session))
        .parse_mode(ParseMode::Html)
        .reply_markup(quiz_keyboard(&session))
        .await?;
    Ok(true)
}

async fn report_failure(
    commit: Commit<'_>,
    number_of_questions: usize,
    error: GenerationError,
) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    let chat_id = commit.dialogue.chat_id();
    log::error!("Quiz generation failed for chat {}: {}", chat_id, error);

    let next = State::ReceiveDocument {
        number_of_questions,
    };
    if !commit.to(next).await? {
        return Ok(false);
    }
    commit.bot.send_message(
        chat_id,
        format!(
            "Falha ao gerar quiz: {}\n\nEnvie o PDF novamente para tentar outra vez.",
            error
        ),
    )
    .reply_markup(KeyboardRemove::new())
    .await?;
    Ok(true)
}

async fn while_generating(
    bot: Bot,
    dialogue: QuizDialogue,
    lock: GenerationLock,
    (number_of_questions, generation_id): (usize, u64),
    msg: Message,
) -> HandlerResult {
    if msg.text() == Some(CANCEL) {
        let next = State::ReceiveDocument {
            number_of_questions,
        };
        if !commit_generation(&dialogue, &lock, generation_id, next).await? {
            // the quiz won the race and is already on screen
            return Ok(());
        }
        bot.send_message(msg.chat.id, "Geração cancelada. Envie outro PDF quando quiser.")
            .reply_markup(KeyboardRemove::new())
            .await?;
        return Ok(());
    }

    bot.send_message(
        msg.chat.id,
        "Ainda estou gerando o quiz... Aguarde ou toque em Cancelar.",
    )
    .await?;
    Ok(())
}

async fn quiz_step(
    bot: Bot,
    dialogue: QuizDialogue,
    lock: GenerationLock,
    (title, mut session): (String, QuizSession),
    msg: Message,
) -> HandlerResult {
    let text = msg.text().unwrap_or_default().trim();

    if !session.is_submitted() {
        match text {
            PREVIOUS => session.retreat(),
            NEXT | SUBMIT => {
                if session.current_answer().is_none() {
                    bot.send_message(msg.chat.id, "Selecione uma resposta antes de continuar.")
                        .await?;
                    return Ok(());
                }
                session.advance();
            }
            other => match AnswerLabel::parse(other) {
                Some(shown) => {
                    session.select_displayed(shown);
                }
                None => {
                    bot.send_message(msg.chat.id, "Use os botões abaixo para responder.")
                        .reply_markup(quiz_keyboard(&session))
                        .await?;
                    return Ok(());
                }
            },
        }
    } else {
        match text {
            RETRY => session.reset(),
            SHUFFLE => session.shuffle(),
            ORIGINAL_ORDER => session.unshuffle(),
            NEW_QUIZ => return ask_question_count(&bot, &dialogue, &lock, msg.chat.id).await,
            _ => {
                bot.send_message(msg.chat.id, "Escolha uma das opções abaixo.")
                    .reply_markup(results_keyboard(&session))
                    .await?;
                return Ok(());
            }
        }
    }

    match session.summary() {
        Some(summary) => {
            log::info!(
                "Chat {} scored {} of {}",
                msg.chat.id,
                summary.correct,
                summary.total
            );
            bot.send_message(msg.chat.id, render::score_report(&summary))
                .parse_mode(ParseMode::Html)
                .await?;
            let review = render::pack_messages(render::review(&session), MESSAGE_LIMIT);
            let last = review.len().saturating_sub(1);
            for (i, part) in review.into_iter().enumerate() {
                let request = bot.send_message(msg.chat.id, part).parse_mode(ParseMode::Html);
                if i == last {
                    request.reply_markup(results_keyboard(&session)).await?;
                } else {
                    request.await?;
                }
            }
        }
        None => {
            bot.send_message(msg.chat.id, render::question_card(&title, &session))
                .parse_mode(ParseMode::Html)
                .reply_markup(quiz_keyboard(&session))
                .await?;
        }
    }

    dialogue.update(State::Quiz { title, session }).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::{sample_question, AnswerLabel};

    fn dialogue() -> QuizDialogue {
        Dialogue::new(InMemStorage::<State>::new().erase(), ChatId(42))
    }

    fn generating(generation_id: u64) -> State {
        State::Generating {
            number_of_questions: 4,
            generation_id,
        }
    }

    fn quiz() -> State {
        let session = QuizSession::new(vec![sample_question("q", AnswerLabel::A)]).unwrap();
        State::Quiz {
            title: "Aula - Quiz".to_string(),
            session,
        }
    }

    #[tokio::test]
    async fn commit_replaces_the_matching_generation() {
        let dialogue = dialogue();
        dialogue.update(generating(7)).await.unwrap();

        let committed = commit_generation(&dialogue, &GenerationLock::default(), 7, quiz())
            .await
            .unwrap();
        assert!(committed);
        assert!(matches!(dialogue.get().await.unwrap(), Some(State::Quiz { .. })));
    }

    #[tokio::test]
    async fn stale_generation_is_discarded() {
        let dialogue = dialogue();
        let lock = GenerationLock::default();
        dialogue.update(generating(8)).await.unwrap();

        assert!(!commit_generation(&dialogue, &lock, 7, quiz()).await.unwrap());
        assert!(matches!(
            dialogue.get().await.unwrap(),
            Some(State::Generating { generation_id: 8, .. })
        ));
    }

    #[tokio::test]
    async fn cancellation_and_completion_cannot_both_commit() {
        let dialogue = dialogue();
        let lock = GenerationLock::default();
        dialogue.update(generating(7)).await.unwrap();

        let cancel = State::ReceiveDocument {
            number_of_questions: 4,
        };
        assert!(commit_generation(&dialogue, &lock, 7, cancel).await.unwrap());
        // the finished quiz arrives after the user cancelled
        assert!(!commit_generation(&dialogue, &lock, 7, quiz()).await.unwrap());
        assert!(matches!(
            dialogue.get().await.unwrap(),
            Some(State::ReceiveDocument { .. })
        ));
    }

    #[tokio::test]
    async fn concurrent_commits_have_a_single_winner() {
        let dialogue = dialogue();
        let lock = GenerationLock::default();
        dialogue.update(generating(7)).await.unwrap();

        let cancel = State::ReceiveDocument {
            number_of_questions: 4,
        };
        let (cancelled, finished) = tokio::join!(
            commit_generation(&dialogue, &lock, 7, cancel),
            commit_generation(&dialogue, &lock, 7, quiz()),
        );
        assert_ne!(cancelled.unwrap(), finished.unwrap());
    }
}
