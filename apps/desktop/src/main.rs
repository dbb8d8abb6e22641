mod render;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use client_core::{
    activity, load_settings, view, AuthService, AuthSession, ChatBackend, CheckInOutcome,
    ClientSettings, CoachDirectory, Conversation, ConversationEvent, DeliveryState, MessageDraft,
    RestBackend, SendReport,
};
use shared::domain::{DocumentKind, MessageId, MessageKind, ReviewStatus, Role, UserId};
use storage::{Storage, StoredDocument};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "focuscoach", about = "Coach/student chat client")]
struct Cli {
    /// Overrides the configured local database.
    #[arg(long, global = true)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    /// Checks the backend and local store and shows the active session.
    Status,
    /// Prints the conversation grouped by day.
    Chat {
        #[arg(long)]
        student: Option<String>,
        /// Keeps running and prints live updates.
        #[arg(long)]
        follow: bool,
    },
    Send {
        #[arg(long)]
        student: Option<String>,
        /// Sends as coach feedback instead of plain text.
        #[arg(long)]
        feedback: bool,
        text: String,
    },
    Photo {
        #[arg(long)]
        student: Option<String>,
        #[arg(long, value_enum, default_value_t = PhotoKind::Meal)]
        kind: PhotoKind,
        path: PathBuf,
    },
    Review {
        #[arg(long)]
        student: String,
        message_id: i64,
        /// ok, ajustar or pendente
        status: String,
    },
    DeleteMessage {
        #[arg(long)]
        student: Option<String>,
        message_id: i64,
    },
    Students,
    Summary {
        student: String,
    },
    CreateStudent {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
    DeleteStudent {
        student: String,
    },
    Checkin {
        #[arg(long)]
        note: Option<String>,
    },
    Meal {
        path: PathBuf,
    },
    Activity,
    Documents {
        #[command(subcommand)]
        action: Option<DocumentAction>,
    },
}

#[derive(Subcommand, Debug)]
enum DocumentAction {
    List,
    Add {
        #[arg(long, value_enum)]
        kind: DocumentKindArg,
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
    },
    Confirm {
        id: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PhotoKind {
    Meal,
    Body,
}

impl From<PhotoKind> for MessageKind {
    fn from(kind: PhotoKind) -> Self {
        match kind {
            PhotoKind::Meal => MessageKind::MealPhoto,
            PhotoKind::Body => MessageKind::BodyPhoto,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DocumentKindArg {
    Workout,
    MealPlan,
}

impl From<DocumentKindArg> for DocumentKind {
    fn from(kind: DocumentKindArg) -> Self {
        match kind {
            DocumentKindArg::Workout => DocumentKind::Workout,
            DocumentKindArg::MealPlan => DocumentKind::MealPlan,
        }
    }
}

struct App {
    settings: ClientSettings,
    storage: Storage,
    backend: Arc<RestBackend>,
    auth: AuthService,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings();
    if let Some(database_url) = cli.database_url {
        settings.database_url = client_core::config::normalize_database_url(&database_url);
    }

    let storage = Storage::new(&settings.database_url)
        .await
        .map_err(|error| {
            error!(
                database_url = %settings.database_url,
                %error,
                "failed to open local database"
            );
            error
        })?;
    let backend = Arc::new(RestBackend::new(&settings).context("failed to build backend client")?);
    let auth = AuthService::new(Arc::clone(&backend), storage.clone());
    let app = App {
        settings,
        storage,
        backend,
        auth,
    };

    app.run(cli.command).await
}

impl App {
    async fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Login { email, password } => {
                let session = self.auth.sign_in(&email, &password).await?;
                println!(
                    "signed in as {} ({})",
                    session.profile.name,
                    role_label(session.profile.role)
                );
            }
            Command::Logout => {
                self.auth.sign_out().await?;
                println!("signed out");
            }
            Command::Status => self.status().await?,
            Command::Chat { student, follow } => {
                let session = self.session().await?;
                let conversation = self.open(&session, student.as_deref()).await?;
                self.chat(&conversation, follow).await;
                conversation.close().await;
            }
            Command::Send {
                student,
                feedback,
                text,
            } => {
                let session = self.session().await?;
                if feedback && session.profile.role != Role::Coach {
                    bail!("only coaches send feedback");
                }
                let draft = if feedback {
                    MessageDraft::feedback(text)
                } else {
                    MessageDraft::text(text)
                };
                let conversation = self.open(&session, student.as_deref()).await?;
                let report = conversation.send(draft).await;
                conversation.close().await;
                print_report(&report?);
            }
            Command::Photo {
                student,
                kind,
                path,
            } => {
                let session = self.session().await?;
                let bytes = read_photo(&path).await?;
                let conversation = self.open(&session, student.as_deref()).await?;
                let report = conversation.send_photo(kind.into(), bytes).await;
                conversation.close().await;
                print_report(&report?);
            }
            Command::Review {
                student,
                message_id,
                status,
            } => {
                let session = self.session().await?;
                let status: ReviewStatus = status.parse().map_err(|err: String| anyhow!(err))?;
                let conversation = self.open(&session, Some(&student)).await?;
                let result = conversation
                    .update_review_status(MessageId(message_id), status)
                    .await;
                conversation.close().await;
                result?;
                println!("#{message_id} marked {}", status.as_str());
            }
            Command::DeleteMessage {
                student,
                message_id,
            } => {
                let session = self.session().await?;
                let conversation = self.open(&session, student.as_deref()).await?;
                let result = conversation.delete_message(MessageId(message_id)).await;
                conversation.close().await;
                result?;
                println!("#{message_id} deleted");
            }
            Command::Students => {
                let directory = self.directory().await?;
                render::print_profiles(&directory.list_students().await?);
            }
            Command::Summary { student } => {
                let directory = self.directory().await?;
                let summary = directory.student_summary(parse_user_id(&student)?).await?;
                render::print_summary(&summary);
            }
            Command::CreateStudent { name, email } => {
                let directory = self.directory().await?;
                let profile = directory.create_student(&name, &email).await?;
                println!("created {} ({})", profile.name, profile.id);
            }
            Command::DeleteStudent { student } => {
                let directory = self.directory().await?;
                let student_id = parse_user_id(&student)?;
                directory.delete_student(student_id).await?;
                println!("deleted {student_id}");
            }
            Command::Checkin { note } => {
                let session = self.session().await?;
                let conversation = self.open(&session, None).await?;
                let outcome = activity::check_in(&conversation, &self.storage, note).await;
                conversation.close().await;
                match outcome? {
                    CheckInOutcome::Recorded { record, report } => {
                        println!("{}", render::activity_line(&record));
                        print_report(&report);
                    }
                    CheckInOutcome::AlreadyCheckedIn => println!("already checked in today"),
                }
            }
            Command::Meal { path } => {
                let session = self.session().await?;
                let bytes = read_photo(&path).await?;
                let conversation = self.open(&session, None).await?;
                let logged = activity::log_meal(&conversation, &self.storage, bytes).await;
                conversation.close().await;
                let (record, report) = logged?;
                println!("{}", render::activity_line(&record));
                print_report(&report);
            }
            Command::Activity => {
                let student_id = self.student_session().await?;
                let today = Utc::now().date_naive();
                let trained = self.storage.has_trained_on(student_id, today).await?;
                let meals = self.storage.meals_on(student_id, today).await?;
                println!(
                    "today: training {}, {meals} meal(s)",
                    if trained { "done" } else { "pending" }
                );
                for record in self.storage.list_activities(student_id).await? {
                    println!("{}", render::activity_line(&record));
                }
            }
            Command::Documents { action } => self.documents(action).await?,
        }
        Ok(())
    }

    async fn status(&self) -> Result<()> {
        println!("backend:  {}", self.settings.backend_url);
        match self.backend.health_check().await {
            Ok(()) => println!("          reachable"),
            Err(err) => println!("          unreachable: {err}"),
        }
        self.storage
            .health_check()
            .await
            .context("local database check failed")?;
        println!("database: {} ok", self.settings.database_url);
        match self.auth.restore().await {
            Ok(Some(session)) => println!(
                "session:  {} <{}> {}",
                session.profile.name,
                session.profile.email,
                role_label(session.profile.role)
            ),
            Ok(None) => println!("session:  signed out"),
            Err(err) => println!("session:  {err}"),
        }
        Ok(())
    }

    async fn chat(&self, conversation: &Arc<Conversation>, follow: bool) {
        let mut events = conversation.subscribe_events();
        render::print_days(&view::group_by_day(&conversation.snapshot().await));
        if !follow {
            return;
        }

        println!("following {}; ctrl-c to stop", conversation.scope().key);
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                event = events.recv() => match event {
                    Ok(ConversationEvent::Updated) => {
                        if let Some(latest) = conversation.snapshot().await.last() {
                            println!("  {}", render::message_line(latest));
                        }
                    }
                    Ok(ConversationEvent::SendFailed { client_id, error }) => {
                        println!("send {client_id} failed: {error}");
                    }
                    Ok(ConversationEvent::Notice(notice)) => println!("! {notice}"),
                    Ok(ConversationEvent::RealtimeClosed) => {
                        println!("live updates closed");
                        break;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        info!(skipped, "event stream lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    async fn documents(&self, action: Option<DocumentAction>) -> Result<()> {
        let student_id = self.student_session().await?;
        match action.unwrap_or(DocumentAction::List) {
            DocumentAction::List => {
                let documents = self.storage.list_documents(student_id).await?;
                if documents.is_empty() {
                    println!("(no documents)");
                }
                for document in &documents {
                    println!("{}", render::document_line(document));
                }
            }
            DocumentAction::Add { kind, name, url } => {
                let document = StoredDocument {
                    id: Uuid::new_v4(),
                    student_id,
                    kind: kind.into(),
                    name,
                    url,
                    uploaded_at: Utc::now(),
                    confirmed_at: None,
                };
                self.storage.upsert_document(&document).await?;
                println!("{}", render::document_line(&document));
            }
            DocumentAction::Confirm { id } => {
                let id = Uuid::parse_str(id.trim()).context("invalid document id")?;
                if !self.storage.confirm_document(id, Utc::now()).await? {
                    bail!("no document {id}");
                }
                println!("{id} confirmed");
            }
        }
        Ok(())
    }

    async fn session(&self) -> Result<AuthSession> {
        self.auth
            .restore()
            .await?
            .ok_or_else(|| anyhow!("not signed in; run `focuscoach login` first"))
    }

    async fn student_session(&self) -> Result<UserId> {
        let session = self.session().await?;
        if session.profile.role != Role::Student {
            bail!("this command is for students");
        }
        Ok(session.profile.id)
    }

    async fn directory(&self) -> Result<CoachDirectory> {
        let session = self.session().await?;
        if session.profile.role != Role::Coach {
            bail!("the student directory is for coaches");
        }
        Ok(CoachDirectory::new(Arc::clone(&self.backend)))
    }

    async fn open(&self, session: &AuthSession, student: Option<&str>) -> Result<Arc<Conversation>> {
        let student_id = match (session.profile.role, student) {
            (Role::Student, _) => session.profile.id,
            (Role::Coach, Some(student)) => parse_user_id(student)?,
            (Role::Coach, None) => bail!("coaches must pick a conversation with --student"),
        };
        let backend: Arc<dyn ChatBackend> = self.backend.clone();
        Ok(Conversation::open(
            backend,
            session.profile.clone(),
            student_id,
            self.settings.request_timeout(),
        )
        .await)
    }
}

fn print_report(report: &SendReport) {
    match report.delivery_state {
        DeliveryState::Sent => println!("sent ({})", report.client_id),
        DeliveryState::Sending => println!("sending ({})", report.client_id),
        DeliveryState::Failed => println!("failed to send ({})", report.client_id),
    }
}

async fn read_photo(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

fn parse_user_id(raw: &str) -> Result<UserId> {
    Uuid::parse_str(raw.trim())
        .map(UserId)
        .with_context(|| format!("invalid user id: {raw}"))
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::Coach => "coach",
        Role::Student => "student",
    }
}
