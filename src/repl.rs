use log::{ error, info };
use std::error::Error;
use std::sync::Arc;
use tokio::io::{ AsyncBufReadExt, BufReader };

use crate::agent::ChatAgent;
use crate::config::persona::Persona;
use crate::models::chat::{ ChatMessage, Conversation, Role };
use crate::session::SessionController;

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Send(String),
    NewChat,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

/// `/1`, `/2`, ... pick one of the persona's suggested prompts.
pub fn parse_command(line: &str, suggestions: &[String]) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(cmd) = line.strip_prefix('/') else {
        return Command::Send(line.to_string());
    };
    match cmd {
        "new" | "reset" => Command::NewChat,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => match other.parse::<usize>() {
            Ok(n) if (1..=suggestions.len()).contains(&n) => Command::Send(suggestions[n - 1].clone()),
            _ => Command::Unknown(line.to_string()),
        },
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Interrupt {
    StopReply,
    Quit,
}

/// Ctrl-C stops a pending reply; at the idle prompt it leaves the chat.
pub fn interrupt_action(conversation: &Conversation) -> Interrupt {
    if conversation.busy { Interrupt::StopReply } else { Interrupt::Quit }
}

pub fn render_message(message: &ChatMessage, persona_name: &str) -> String {
    let speaker = match message.role {
        Role::User => "You",
        Role::Model => persona_name,
    };
    format!("{}: {}", speaker, message.content)
}

fn print_welcome(persona: &Persona) {
    println!();
    println!("{}", persona.greeting.as_deref().unwrap_or("Hello! 👋"));
    if !persona.suggestions.is_empty() {
        println!("Try one of these:");
        for (i, suggestion) in persona.suggestions.iter().enumerate() {
            println!("  /{}  {}", i + 1, suggestion);
        }
    }
    print_help();
}

fn print_help() {
    println!("Commands: /new starts a new chat, /quit or Ctrl-C exits, Ctrl-C while waiting stops the reply.");
    println!();
}

/// Interactive terminal chat. Runs until stdin closes, `/quit`, or Ctrl-C at the prompt.
pub async fn run_repl(
    agent: Arc<ChatAgent>,
    persona: Arc<Persona>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let controller = SessionController::new(agent);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    print_welcome(&persona);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                if interrupt_action(&controller.snapshot().await) == Interrupt::Quit {
                    break;
                }
                continue;
            }
        };

        match parse_command(&line, &persona.suggestions) {
            Command::Empty => {}
            Command::Help => print_help(),
            Command::Quit => break,
            Command::Unknown(cmd) => println!("Unknown command: {}", cmd),
            Command::NewChat => {
                controller.reset().await;
                println!("-- new chat --");
                print_welcome(&persona);
            }
            Command::Send(text) => {
                let pending = match controller.begin_send(&text).await {
                    Ok(pending) => pending,
                    Err(e) => {
                        println!("{}", e);
                        continue;
                    }
                };
                println!("{} is typing...", persona.name);

                tokio::select! {
                    reply = controller.complete(pending) => {
                        if let Some(reply) = reply {
                            if reply.is_error() {
                                info!("Reply ended with status {:?}", reply.status);
                            }
                        }
                    }
                    signal = tokio::signal::ctrl_c() => {
                        if let Err(e) = signal {
                            error!("Failed to listen for Ctrl-C: {}", e);
                        }
                        if interrupt_action(&controller.snapshot().await) == Interrupt::StopReply {
                            controller.stop().await;
                        }
                    }
                }

                if let Some(last) = controller.snapshot().await.messages.last() {
                    println!("{}", render_message(last, &persona.name));
                    println!();
                }
            }
        }
    }

    info!("Chat session ended");
    Ok(())
}
