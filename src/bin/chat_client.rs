//! Terminal front end for a running relay.

use chat_relay::cli::ClientArgs;
use chat_relay::models::chat::{ ChatMessage, Role };
use chat_relay::session::{ ChatSession, RelayClient, SubmitOutcome };
use clap::Parser;
use dotenv::dotenv;
use log::{ error, warn };
use std::error::Error;
use std::io::Write;
use tokio::io::{ AsyncBufReadExt, BufReader };

const HELP: &str = "Commands: /models, /model <id>, /new, /quit";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = ClientArgs::parse();

    let client = RelayClient::new(&args.relay_url)?;
    let mut session = ChatSession::new(args.model.clone(), args.system_message.clone());

    let mut chat_id = match (&args.chat_id, args.persist) {
        (Some(id), _) => {
            let history = client.get_chat_messages(id).await?;
            session.load(history.into_iter().map(ChatMessage::from).collect());
            for message in session.messages() {
                println!("{}: {}", message.role, message.content);
            }
            Some(id.clone())
        }
        (None, true) => Some(client.create_chat(None).await?.id),
        (None, false) => None,
    };

    println!("Model: {}. {}", session.selected_model(), HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        match line.trim() {
            "/quit" => break,
            "/new" => {
                session.reset();
                if chat_id.is_some() {
                    chat_id = Some(client.create_chat(None).await?.id);
                }
                println!("Started a new conversation.");
                continue;
            }
            "/models" => {
                match client.list_models().await {
                    Ok(listing) => {
                        for model in listing.models {
                            let marker = if model.id == session.selected_model() { "*" } else { " " };
                            println!("{} {} ({})", marker, model.id, model.label);
                        }
                    }
                    Err(e) => error!("Could not list models: {}", e),
                }
                continue;
            }
            cmd if cmd.starts_with("/model ") => {
                let id = cmd.trim_start_matches("/model ").trim();
                session.select_model(id);
                println!("Model: {}", id);
                continue;
            }
            cmd if cmd.starts_with('/') => {
                println!("{}", HELP);
                continue;
            }
            _ => {}
        }

        let outcome = client.submit(&mut session, &line, |delta| {
            print!("{}", delta);
            let _ = std::io::stdout().flush();
        }).await;

        match outcome {
            SubmitOutcome::Ignored => continue,
            SubmitOutcome::Completed => println!(),
            SubmitOutcome::Rejected | SubmitOutcome::Interrupted => {
                println!();
                eprintln!("error: {}", session.error().unwrap_or("request failed"));
            }
        }

        if let Some(id) = &chat_id {
            persist_exchange(&client, id, &session, outcome).await;
        }
    }

    Ok(())
}

/// Saves the user prompt and, when one was streamed, the assistant reply.
async fn persist_exchange(
    client: &RelayClient,
    chat_id: &str,
    session: &ChatSession,
    outcome: SubmitOutcome
) {
    let messages = session.messages();
    let tail = match outcome {
        SubmitOutcome::Rejected => &messages[messages.len().saturating_sub(1)..],
        _ => &messages[messages.len().saturating_sub(2)..],
    };

    for message in tail {
        if message.role == Role::Assistant && message.content.is_empty() {
            continue;
        }
        if let Err(e) = client.add_message(chat_id, message.role, &message.content).await {
            warn!("Could not persist message to chat {}: {}", chat_id, e);
        }
    }
}
