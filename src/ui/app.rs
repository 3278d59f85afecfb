use crate::ui::conversation::{ConversationAction, ConversationManager};
use anyhow::{Context, Result};
use crossterm::{
    event::{
        DisableBracketedPaste, DisableFocusChange, EnableBracketedPaste, EnableFocusChange, Event, EventStream,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io::{self, Stdout};
use tracing::{debug, info};

type Tui = Terminal<CrosstermBackend<Stdout>>;

/// Take over the terminal and run the widget until the user quits
pub async fn run(mut manager: ConversationManager) -> Result<()> {
    let mut terminal = setup_terminal()?;

    // Install panic hook to restore terminal
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = restore_terminal_raw();
        original_hook(info);
    }));

    info!(thread_id = %manager.session().thread_id(), "chat widget started");
    let result = event_loop(&mut terminal, &mut manager).await;

    restore_terminal_raw()?;
    terminal.show_cursor()?;
    info!(pending = manager.pending_count(), "chat widget closed");

    result
}

fn setup_terminal() -> Result<Tui> {
    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableBracketedPaste, EnableFocusChange)
        .context("Failed to enter alternate screen")?;
    Terminal::new(CrosstermBackend::new(stdout)).context("Failed to create terminal")
}

fn restore_terminal_raw() -> io::Result<()> {
    disable_raw_mode()?;
    execute!(io::stdout(), DisableFocusChange, DisableBracketedPaste, LeaveAlternateScreen)
}

async fn event_loop(terminal: &mut Tui, manager: &mut ConversationManager) -> Result<()> {
    let mut events = EventStream::new();

    loop {
        terminal.draw(|frame| frame.render_widget(&*manager, frame.size()))?;

        tokio::select! {
            maybe_event = events.next() => match maybe_event {
                Some(Ok(Event::Key(key))) => {
                    if manager.handle_key(key) == ConversationAction::Exit {
                        break;
                    }
                }
                Some(Ok(Event::Paste(text))) => manager.handle_paste(&text),
                Some(Ok(Event::FocusGained)) => manager.set_focus(true),
                Some(Ok(Event::FocusLost)) => manager.set_focus(false),
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err).context("Terminal event stream failed"),
                None => break,
            },

            Some(outcome) = manager.next_outcome() => {
                let status = manager.apply_outcome(outcome);
                debug!(?status, "exchange finished");
            }
        }

        // pick up replies that landed while handling input, before redrawing
        let applied = manager.process_outcomes();
        if applied > 0 {
            debug!(applied, "exchanges finished");
        }
    }

    Ok(())
}
