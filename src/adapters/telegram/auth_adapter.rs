//! Implements AuthPort using grammers Client.
//!
//! The handshake is a small state machine: a login token waits for the code,
//! a password token waits for the 2FA password. Only one step is ever pending.

use crate::domain::DomainError;
use crate::ports::{AuthPort, SignInResult};
use async_trait::async_trait;
use grammers_client::Client;
use grammers_client::client::{LoginToken, PasswordToken};
use tokio::sync::Mutex;

enum Pending {
    Code(LoginToken),
    Password(PasswordToken),
}

/// Auth adapter. Same session as the gateway via a client clone in main.
pub struct GrammersAuthAdapter {
    client: Client,
    pending: Mutex<Option<Pending>>,
}

impl GrammersAuthAdapter {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            pending: Mutex::new(None),
        }
    }
}

#[async_trait]
impl AuthPort for GrammersAuthAdapter {
    async fn is_authenticated(&self) -> Result<bool, DomainError> {
        self.client
            .is_authorized()
            .await
            .map_err(|e| DomainError::Auth(e.to_string()))
    }

    async fn request_login_code(&self, phone: &str, api_hash: &str) -> Result<(), DomainError> {
        let token = self
            .client
            .request_login_code(phone, api_hash)
            .await
            .map_err(|e| DomainError::Auth(format!("request_login_code: {}", e)))?;
        *self.pending.lock().await = Some(Pending::Code(token));
        Ok(())
    }

    async fn sign_in(&self, code: &str) -> Result<SignInResult, DomainError> {
        let mut pending = self.pending.lock().await;
        let Some(Pending::Code(token)) = pending.take() else {
            return Err(DomainError::Auth(
                "request_login_code must be called before sign_in".into(),
            ));
        };
        match self.client.sign_in(&token, code).await {
            Ok(_user) => Ok(SignInResult::Success),
            Err(grammers_client::SignInError::PasswordRequired(pt)) => {
                let hint = pt.hint().map(String::from);
                *pending = Some(Pending::Password(pt));
                Ok(SignInResult::PasswordRequired { hint })
            }
            Err(grammers_client::SignInError::InvalidCode) => Err(DomainError::Auth(
                "Invalid login code. Run again and enter the correct code.".into(),
            )),
            Err(grammers_client::SignInError::SignUpRequired) => Err(DomainError::Auth(
                "Sign-up required. Create an account with the official Telegram app first.".into(),
            )),
            Err(e) => Err(DomainError::Auth(format!("sign in: {}", e))),
        }
    }

    async fn check_password(&self, password: &[u8]) -> Result<(), DomainError> {
        let Some(Pending::Password(pt)) = self.pending.lock().await.take() else {
            return Err(DomainError::Auth(
                "sign_in must return PasswordRequired before check_password".into(),
            ));
        };
        self.client
            .check_password(pt, password)
            .await
            .map_err(|e| DomainError::Auth(format!("check_password: {}", e)))?;
        Ok(())
    }
}
