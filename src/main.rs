use anyhow::{Context, Result};
use dialoguer::{Input, Password, Select};
use std::sync::Arc;
use std::time::Duration;

use classroom_client::api::{AssessmentService, AuthService, ClassService, UserService};
use classroom_client::assessment::{
    AssessmentSessionController, Countdown, QuestionView, SessionPhase, SessionStart,
    SubmitOutcome,
};
use classroom_client::auth::{SqliteStore, TokenManager};
use classroom_client::config::{Command, Config};
use classroom_client::http_client::{ClassroomHttpClient, NoStepUp};
use classroom_client::notify::{ChannelNotifier, LogNotifier, Notification, Notifier};
use classroom_client::prompt::{PasswordStepUp, TerminalConfirmation};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(api = %config.api_base_url, data_file = %config.data_file.display(), "Configuration loaded");

    let (notifier, mut notifications) = ChannelNotifier::new();
    let printer = tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            print_notification(&notification);
        }
    });

    let result = run(&config, Arc::new(notifier)).await;

    // Senders are gone once run returns; let the printer drain
    if tokio::time::timeout(Duration::from_millis(500), printer)
        .await
        .is_err()
    {
        tracing::debug!("Notification printer did not finish");
    }

    result
}

async fn run(config: &Config, notifier: Arc<dyn Notifier>) -> Result<()> {
    let store = Arc::new(SqliteStore::open(&config.data_file)?);
    let tokens = Arc::new(TokenManager::new(
        store,
        &config.api_base_url,
        config.token_refresh_threshold,
        config.http_request_timeout,
    )?);

    if tokens.load_tokens().await {
        tracing::debug!("Restored stored session");
    }

    // Password re-verification runs outside the pipeline it unblocks
    let verify_client = Arc::new(ClassroomHttpClient::new(
        &config.api_base_url,
        tokens.clone(),
        Arc::new(LogNotifier),
        Arc::new(NoStepUp),
        config.http_connect_timeout,
        config.http_request_timeout,
    )?);
    let step_up = PasswordStepUp::new(AuthService::new(verify_client));

    let client = Arc::new(ClassroomHttpClient::new(
        &config.api_base_url,
        tokens.clone(),
        notifier.clone(),
        Arc::new(step_up),
        config.http_connect_timeout,
        config.http_request_timeout,
    )?);

    match &config.command {
        Command::Login { email } => login(client, email.clone()).await,
        Command::Logout => {
            AuthService::new(client).logout().await;
            println!("Logged out");
            Ok(())
        }
        Command::Whoami => whoami(client).await,
        Command::Classes => classes(client).await,
        Command::Take { assessment, resume } => {
            take(client, notifier, assessment, resume.clone()).await
        }
    }
}

async fn login(client: Arc<ClassroomHttpClient>, email: Option<String>) -> Result<()> {
    let (email, password) = tokio::task::spawn_blocking(move || -> Result<(String, String)> {
        let email = match email {
            Some(email) => email,
            None => Input::new()
                .with_prompt("Email")
                .interact_text()
                .context("Failed to read email")?,
        };
        let password = Password::new()
            .with_prompt("Password")
            .interact()
            .context("Failed to read password")?;
        Ok((email, password))
    })
    .await
    .context("Login prompt failed")??;

    let claims = AuthService::new(client).login(&email, &password).await?;
    println!(
        "Logged in as {} ({})",
        email.trim(),
        claims.role_name.as_deref().unwrap_or("Guest")
    );
    Ok(())
}

async fn whoami(client: Arc<ClassroomHttpClient>) -> Result<()> {
    if !client.tokens().is_authenticated().await {
        anyhow::bail!("Not logged in, run `classroom login` first");
    }

    let user = UserService::new(client.clone()).me().await?;
    let role = client.tokens().role().await;
    println!("{} <{}>", user.display_name(), user.email);
    println!("Role: {}", user.role_name.as_deref().unwrap_or(role.name()));
    Ok(())
}

async fn classes(client: Arc<ClassroomHttpClient>) -> Result<()> {
    let classes = ClassService::new(client.clone()).list().await?;
    let assessments = AssessmentService::new(client);

    if classes.is_empty() {
        println!("No classes");
        return Ok(());
    }

    for class in classes {
        println!("{}  {} ({} students)", class.id, class.name, class.student_count);
        for assessment in assessments.list(&class.id).await? {
            println!(
                "    {}  {}  {} min  {:?}",
                assessment.id,
                assessment.title,
                assessment.duration / 60,
                assessment.submission_status
            );
        }
    }
    Ok(())
}

async fn take(
    client: Arc<ClassroomHttpClient>,
    notifier: Arc<dyn Notifier>,
    assessment_id: &str,
    resume: Option<String>,
) -> Result<()> {
    let service = AssessmentService::new(client);

    let start = match resume {
        Some(submission_id) => SessionStart::Resume { submission_id },
        None => {
            let assessment = service.get(assessment_id).await?;
            match SessionStart::for_assessment(&assessment) {
                Some(start) => start,
                None => {
                    println!("{} was already submitted", assessment.title);
                    return Ok(());
                }
            }
        }
    };

    let controller = Arc::new(AssessmentSessionController::new(
        assessment_id,
        Arc::new(service),
        notifier,
    ));
    controller.initialize(start).await?;
    let countdown = Countdown::start(&controller);

    'session: loop {
        let view = controller.snapshot().await;
        if view.phase != SessionPhase::Active {
            break;
        }

        for question in &view.questions {
            if controller.phase().await != SessionPhase::Active {
                break 'session;
            }
            let remaining = controller.remaining_seconds().await;
            if let Some(choice_id) = ask_question(question, remaining).await? {
                // Rollback and notification are handled by the controller
                if let Err(e) = controller.select_answer(&question.id, &choice_id).await {
                    tracing::debug!(question_id = %question.id, "Answer not saved: {}", e);
                }
            }
        }

        match controller.submit_manual(&TerminalConfirmation).await {
            Ok(SubmitOutcome::Declined) | Err(_) => continue,
            Ok(SubmitOutcome::Submitted) | Ok(SubmitOutcome::Skipped) => break,
        }
    }

    // An automatic submit may still be in flight
    if controller.phase().await.is_terminal() {
        drop(countdown);
    } else {
        countdown.finished().await;
    }

    match controller.phase().await {
        SessionPhase::Submitted | SessionPhase::TimeUp { submitted: true } => {
            println!("Submission recorded")
        }
        SessionPhase::TimeUp { submitted: false } => {
            println!("Time ran out and the submission could not be sent")
        }
        phase => tracing::warn!(phase = ?phase, "Session ended unexpectedly"),
    }
    Ok(())
}

/// Prompt for one question, `None` to leave it as is
async fn ask_question(question: &QuestionView, remaining: i64) -> Result<Option<String>> {
    let prompt = format!(
        "[{:02}:{:02} left] {}",
        remaining / 60,
        remaining % 60,
        question.text
    );
    let mut items: Vec<String> = question.choices.iter().map(|c| c.text.clone()).collect();
    items.push("(skip)".to_string());
    let default = question
        .selected_choice
        .as_deref()
        .and_then(|selected| question.choices.iter().position(|c| c.id == selected))
        .unwrap_or(items.len() - 1);

    let picked = tokio::task::spawn_blocking(move || {
        Select::new()
            .with_prompt(prompt)
            .items(&items)
            .default(default)
            .interact()
    })
    .await
    .context("Question prompt failed")?
    .context("Failed to read answer")?;

    let choice = question
        .choices
        .get(picked)
        .filter(|c| question.selected_choice.as_deref() != Some(c.id.as_str()))
        .map(|c| c.id.clone());
    Ok(choice)
}

fn print_notification(notification: &Notification) {
    match notification {
        Notification::Error(message) => eprintln!("error: {}", message),
        Notification::Success(message) => eprintln!("{}", message),
        Notification::Unauthorized => {
            eprintln!("Your session has expired, run `classroom login` again")
        }
        Notification::AnotherDeviceLogin => {
            eprintln!("You were logged in on another device, run `classroom login` again")
        }
    }
}
