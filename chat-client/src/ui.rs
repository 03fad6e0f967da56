//! Terminal UI helpers for the chat client.

use chat_session::{
    ConnectionError, ConnectionState, DeliveryState, Message, Origin, SessionPhase, Timeline,
};
use colored::Colorize;
use std::io::Write;

/// Print the startup banner
pub fn print_startup_banner() {
    println!();
    println!("{}", "╭──────────────────────────────────────╮".bright_blue());
    println!("{}", "│              Chat Client             │".bright_blue());
    println!("{}", "╰──────────────────────────────────────╯".bright_blue());
    println!();
}

pub fn print_session_info(identity: &str, backend_url: &str, reconnect: bool) {
    println!("  {} {}", "User:".dimmed(), identity.bright_white());
    println!("  {} {}", "Backend:".dimmed(), backend_url.bright_white());
    println!(
        "  {} {}",
        "Reconnect:".dimmed(),
        if reconnect {
            "on".bright_green()
        } else {
            "off".bright_yellow()
        }
    );
    println!();
    println!(
        "  Type a message and press Enter. Commands: {} {} {}",
        "/new".bright_cyan(),
        "/logout".bright_cyan(),
        "/quit".bright_cyan()
    );
    println!();
}

/// Print a status line without a trailing newline
pub fn print_status(message: &str) {
    print!("  {} {} ", "→".bright_blue(), message);
    let _ = std::io::stdout().flush();
}

pub fn print_done() {
    println!("{}", "done".bright_green());
}

pub fn print_failed() {
    println!("{}", "failed".bright_red());
}

pub fn print_signed_in(identity: &str) {
    println!("  {} Signed in as {}", "✓".bright_green(), identity.bright_cyan());
}

pub fn print_not_signed_in() {
    println!("  {} Not signed in.", "⚠".bright_yellow());
    println!(
        "  Use {}, {} or {} first.",
        "--login <name>".bright_cyan(),
        "--register".bright_cyan(),
        "--oauth".bright_cyan()
    );
}

pub fn print_logout_success(identity: &str) {
    println!("{} Logged out {}", "✓".bright_green(), identity);
}

pub fn print_no_cached_auth() {
    println!("No stored credential found");
}

/// Print the federated login instructions
pub fn print_federated_login(url: &str) {
    println!();
    println!("  To sign in with Google, open:");
    println!();
    println!("    {}", url.bright_green().bold());
    println!();
    println!(
        "  Then run again with {} and the URL you were redirected to.",
        "--callback <url>".bright_cyan()
    );
    println!();
}

pub fn print_phase(phase: SessionPhase) {
    match phase {
        SessionPhase::Hydrating => print_status("Loading conversation..."),
        SessionPhase::Live => print_done(),
        SessionPhase::Unauthenticated | SessionPhase::Terminated => {}
    }
}

pub fn print_connection(state: ConnectionState, reason: Option<&ConnectionError>) {
    match (state, reason) {
        (ConnectionState::Open, _) => println!("  {} Connected", "✓".bright_green()),
        (ConnectionState::Connecting, _) => println!("  {} Reconnecting...", "→".bright_blue()),
        (ConnectionState::Closed, Some(err)) => {
            println!("  {} Disconnected: {}", "⚠".bright_yellow(), err)
        }
        (ConnectionState::Closed, None) => println!("  {} Disconnected", "⚠".bright_yellow()),
        (ConnectionState::Errored, Some(err)) => {
            println!("  {} Could not connect: {}", "✗".bright_red(), err)
        }
        (ConnectionState::Errored, None) => println!("  {} Could not connect", "✗".bright_red()),
        (ConnectionState::Idle, _) => {}
    }
}

pub fn print_warning(message: &str) {
    println!("  {} {}", "⚠".bright_yellow(), message);
}

pub fn print_fresh_conversation() {
    println!();
    println!("{}", "──────── new conversation ────────".dimmed());
}

pub fn print_message(message: &Message) {
    let speaker = match message.origin {
        Origin::Local => "you ›".bright_cyan(),
        Origin::Remote => "bot ›".bright_green(),
    };
    match message.delivery {
        DeliveryState::Failed => println!(
            "{} {} {}",
            speaker,
            message.text,
            "(not sent)".bright_red()
        ),
        DeliveryState::Pending => println!("{} {} {}", speaker, message.text, "…".dimmed()),
        DeliveryState::Confirmed => println!("{} {}", speaker, message.text),
    }
}

/// Draws timeline entries incrementally
#[derive(Debug, Default)]
pub struct Renderer {
    last_drawn: Option<u64>,
}

impl Renderer {
    /// Print every entry not drawn yet.
    pub fn draw_new(&mut self, timeline: &Timeline) {
        for message in timeline.after(self.last_drawn) {
            print_message(message);
        }
        if let Some(position) = timeline.last_position() {
            self.last_drawn = Some(position);
        }
    }

    /// Forget what was drawn and print the timeline from the start.
    pub fn redraw(&mut self, timeline: &Timeline) {
        self.last_drawn = None;
        print_fresh_conversation();
        self.draw_new(timeline);
    }

    pub fn last_drawn(&self) -> Option<u64> {
        self.last_drawn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_session::MessageDraft;

    #[test]
    fn renderer_tracks_last_position() {
        let mut timeline = Timeline::new();
        let mut renderer = Renderer::default();
        renderer.draw_new(&timeline);
        assert_eq!(renderer.last_drawn(), None);

        timeline.append(MessageDraft::remote("hello"));
        timeline.append(MessageDraft::local("hi", DeliveryState::Confirmed));
        renderer.draw_new(&timeline);
        assert_eq!(renderer.last_drawn(), Some(1));

        timeline.restart(MessageDraft::remote("fresh"));
        renderer.redraw(&timeline);
        assert_eq!(renderer.last_drawn(), Some(2));
    }
}
