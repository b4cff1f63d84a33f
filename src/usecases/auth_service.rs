//! Login flow: phone -> code -> 2FA password when the account has one.

use crate::domain::DomainError;
use crate::ports::{AuthPort, PromptPort, SignInResult};
use std::sync::Arc;
use tracing::info;

pub struct AuthService {
    auth: Arc<dyn AuthPort>,
    prompt: Arc<dyn PromptPort>,
    api_hash: String,
    /// Configured phone number; prompted for when absent.
    phone: Option<String>,
}

impl AuthService {
    pub fn new(
        auth: Arc<dyn AuthPort>,
        prompt: Arc<dyn PromptPort>,
        api_hash: impl Into<String>,
        phone: Option<String>,
    ) -> Self {
        Self {
            auth,
            prompt,
            api_hash: api_hash.into(),
            phone,
        }
    }

    /// No-op when the session is already authorized.
    pub async fn run_auth_flow(&self) -> Result<(), DomainError> {
        if self.auth.is_authenticated().await? {
            info!("session already authorized");
            return Ok(());
        }

        let phone = match self.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            Some(phone) => phone.to_string(),
            None => self.ask_required("Phone number (international format):", false).await?,
        };
        self.auth.request_login_code(&phone, &self.api_hash).await?;
        info!("login code requested");

        let code = self.ask_required("Login code:", false).await?;
        match self.auth.sign_in(&code).await? {
            SignInResult::Success => {}
            SignInResult::PasswordRequired { hint } => {
                let question = match hint.as_deref().filter(|h| !h.is_empty()) {
                    Some(hint) => format!("2FA password (hint: {}):", hint),
                    None => "2FA password:".to_string(),
                };
                let password = self.prompt.ask(&question, true).await?;
                self.auth.check_password(password.as_bytes()).await?;
            }
        }
        info!("signed in");
        Ok(())
    }

    async fn ask_required(&self, question: &str, secret: bool) -> Result<String, DomainError> {
        let answer = self.prompt.ask(question, secret).await?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(DomainError::Auth(format!("no answer to '{}'", question)));
        }
        Ok(answer.to_string())
    }
}
