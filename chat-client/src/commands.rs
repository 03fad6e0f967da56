//! Sign-in flag handlers and interactive input.

use anyhow::{Context, Result};
use chat_auth::{credential_from_callback, AuthClient};
use chat_session::AuthStore;
use shared::RegisterRequest;
use tracing::info;

use crate::ui;

/// A line typed at the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Message(String),
    FreshConversation,
    Logout,
    Quit,
    Empty,
}

impl Input {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        match trimmed {
            "" => Input::Empty,
            "/new" => Input::FreshConversation,
            "/logout" => Input::Logout,
            "/quit" | "/exit" => Input::Quit,
            _ => Input::Message(trimmed.to_string()),
        }
    }
}

/// Handle the --logout flag
pub fn handle_logout(store: &AuthStore) -> Result<()> {
    match store.current() {
        Some(credential) => {
            store.clear();
            ui::print_logout_success(credential.identity());
        }
        None => ui::print_no_cached_auth(),
    }
    Ok(())
}

/// Handle the --oauth flag
pub fn handle_federated_start(auth: &AuthClient) -> Result<()> {
    ui::print_federated_login(&auth.begin_federated_login());
    Ok(())
}

/// Handle the --callback flag
pub fn handle_callback(store: &AuthStore, callback_url: &str) -> Result<()> {
    let credential =
        credential_from_callback(callback_url).context("Failed to complete federated login")?;
    ui::print_signed_in(credential.identity());
    store.set(credential);
    Ok(())
}

/// Handle the --login flag
pub async fn handle_login(
    store: &AuthStore,
    auth: &AuthClient,
    username: &str,
    password: &str,
) -> Result<()> {
    ui::print_status(&format!("Signing in as {}...", username));
    let credential = match auth.authenticate(username, password).await {
        Ok(credential) => credential,
        Err(e) => {
            ui::print_failed();
            return Err(e).context("Sign-in failed");
        }
    };
    ui::print_done();
    store.set(credential);
    Ok(())
}

/// Handle the --register flag
pub async fn handle_register(
    store: &AuthStore,
    auth: &AuthClient,
    profile: RegisterRequest,
) -> Result<()> {
    ui::print_status("Creating account...");
    let credential = match auth.register_account(&profile).await {
        Ok(credential) => credential,
        Err(e) => {
            ui::print_failed();
            return Err(e).context("Registration failed");
        }
    };
    ui::print_done();
    info!("Registered account {}", credential.identity());
    ui::print_signed_in(credential.identity());
    store.set(credential);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_and_messages() {
        assert_eq!(Input::parse("/new\n"), Input::FreshConversation);
        assert_eq!(Input::parse("  /logout "), Input::Logout);
        assert_eq!(Input::parse("/quit"), Input::Quit);
        assert_eq!(Input::parse("/exit"), Input::Quit);
        assert_eq!(Input::parse("   \n"), Input::Empty);
        assert_eq!(
            Input::parse("hello there\n"),
            Input::Message("hello there".to_string())
        );
        assert_eq!(
            Input::parse("/unknown"),
            Input::Message("/unknown".to_string())
        );
    }

    #[test]
    fn logout_flag_clears_store() {
        let store = AuthStore::ephemeral();
        store.set(shared::Credential::new("u1", "tok").unwrap());

        handle_logout(&store).unwrap();
        assert!(store.current().is_none());

        handle_logout(&store).unwrap();
    }

    #[test]
    fn callback_flag_sets_credential() {
        let store = AuthStore::ephemeral();
        handle_callback(&store, "http://localhost:3000/auth/callback?token=abc&user_id=u7").unwrap();
        assert_eq!(store.current().unwrap().identity(), "u7");

        assert!(handle_callback(&store, "http://localhost:3000/auth/callback?token=abc").is_err());
        assert_eq!(store.current().unwrap().identity(), "u7");
    }
}
