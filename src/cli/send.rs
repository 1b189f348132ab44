//! Send command implementation

use anyhow::{bail, Result};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use super::short_id;
use crate::config::Config;
use crate::prompt::{Quote, QuotedMessage};
use crate::session::{ConversationSession, SessionEvent, TurnOutcome};
use crate::store::SqliteStore;

pub struct SendArgs {
    pub conversation: Option<String>,
    pub text: String,
    pub from: Option<String>,
    pub quote: Option<String>,
    pub excerpt: Option<String>,
}

pub async fn run(store: Arc<SqliteStore>, config: &Config, args: SendArgs) -> Result<()> {
    let row = super::resolve_conversation(&store, args.conversation.as_deref())?;
    let provider = Arc::new(config.completion_service()?);
    let session = ConversationSession::open(&row.id, store.clone(), provider, config.session_settings())?;
    store.set_last_active(Some(&row.id))?;

    let view = session.view();
    let ids = || view.all_messages.keys().map(String::as_str);
    let from = args
        .from
        .as_deref()
        .map(|q| super::resolve_message(ids(), q))
        .transpose()?;
    let quote = match (args.quote.as_deref(), args.excerpt) {
        (Some(q), excerpt) => {
            let id = super::resolve_message(ids(), q)?;
            let message = &view.all_messages[&id];
            Some(Quote {
                text: excerpt.unwrap_or_else(|| message.content.clone()),
                message: Some(QuotedMessage::from(message)),
            })
        }
        (None, Some(excerpt)) => Some(Quote {
            text: excerpt,
            message: None,
        }),
        (None, None) => None,
    };

    let mut events = session.subscribe();
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        loop {
            match events.recv().await {
                Ok(SessionEvent::Delta { text, .. }) => {
                    print!("{}", text);
                    stdout.flush().ok();
                }
                Ok(SessionEvent::Committed { .. } | SessionEvent::Failed { .. }) => break,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "output fell behind the stream");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let outcome = session
        .send_message(&args.text, from.as_deref(), quote.as_ref())
        .await;
    drop(session);
    printer.await.ok();
    println!();

    match outcome? {
        TurnOutcome::Busy => bail!("A turn is already in flight for this conversation"),
        TurnOutcome::Completed {
            assistant_message_id,
            usage,
            ..
        } => {
            let tokens = usage.map_or_else(|| "-".to_string(), |u| u.total_tokens.to_string());
            println!("\n[{}] tokens: {}", short_id(&assistant_message_id), tokens);
        }
        TurnOutcome::Failed { notice, error, .. } => {
            println!("{}", notice);
            eprintln!("error: {}", error);
        }
    }
    Ok(())
}
