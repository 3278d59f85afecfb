use crate::client::HttpChatClient;
use crate::config::Config;
use crate::events::SendStatus;
use crate::session::{RandomThreadIds, Session, ThreadIdSource};
use crate::ui::conversation::{ConversationManager, ERROR_TEXT};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Wire a conversation manager to the configured endpoint
pub fn build_manager(config: &Config, thread_id: Option<&str>) -> Result<ConversationManager> {
    let client = HttpChatClient::new(config)?;
    let label = client.endpoint().to_string();
    let session = Session::with_random_ids(config.sender.clone(), thread_id.unwrap_or_default());

    Ok(ConversationManager::new(session, Arc::new(client), &config.ui).with_endpoint_label(label))
}

/// Launch the interactive widget
pub async fn start_chat(config: &Config, thread_id: Option<&str>) -> Result<()> {
    let manager = build_manager(config, thread_id)?;
    crate::ui::run(manager).await
}

/// Send one message and print the reply. Returns false when the exchange
/// failed.
pub async fn send_once(config: &Config, thread_id: Option<&str>, message: &str) -> Result<bool> {
    let mut manager = build_manager(config, thread_id)?;
    info!(thread_id = %manager.session().thread_id(), endpoint = %config.endpoint, "one-shot send");

    match manager.send(message).await {
        SendStatus::Resolved(reply) => {
            println!("{}", reply);
            eprintln!("🧵 {}", manager.session().thread_id());
            Ok(true)
        }
        SendStatus::Failed => {
            eprintln!("❌ {}", ERROR_TEXT);
            Ok(false)
        }
        SendStatus::Ignored | SendStatus::Discarded => Ok(true),
    }
}

/// Print a freshly generated thread id
pub fn print_thread_id() {
    println!("{}", RandomThreadIds.next_thread_id());
}

/// Print the effective configuration, optionally persisting it
pub fn show_config(config: &Config, save: bool) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("Failed to serialize config")?;
    println!("# {}", config.config_path().display());
    println!("{}", rendered);

    if save {
        config.save()?;
        println!("✅ Saved to {}", config.config_path().display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::is_generated_thread_id;
    use crate::ui::conversation::parse_slash_command;

    #[test]
    fn manager_reports_the_client_endpoint() {
        let mut config = Config::default();
        config.endpoint = "http://agent.test:9000/chat".into();
        config.sender = "ops@vendor.test".into();

        let mut manager = build_manager(&config, None).unwrap();
        assert!(is_generated_thread_id(manager.session().thread_id()));

        let info = parse_slash_command("/info").unwrap();
        manager.handle_slash_command(info);
        let text = &manager.history().last().unwrap().content;
        assert!(text.contains("Endpoint: http://agent.test:9000/chat"), "{text}");
        assert!(text.contains("Sender: ops@vendor.test"), "{text}");
    }

    #[test]
    fn explicit_thread_id_is_kept() {
        let manager = build_manager(&Config::default(), Some("thread_77")).unwrap();
        assert_eq!(manager.session().thread_id(), "thread_77");
    }
}
