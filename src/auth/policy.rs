use std::collections::HashSet;

use crate::config::AuthConfig;

/// メール単位/ドメイン単位の許可リスト
#[derive(Debug, Clone, Default)]
pub struct AllowlistPolicy {
    domains: HashSet<String>,
    emails: HashSet<String>,
}

impl AllowlistPolicy {
    pub fn new<D, E>(domains: D, emails: E) -> Self
    where
        D: IntoIterator<Item = String>,
        E: IntoIterator<Item = String>,
    {
        Self {
            domains: domains.into_iter().map(|d| d.to_ascii_lowercase()).collect(),
            emails: emails.into_iter().map(|e| e.to_ascii_lowercase()).collect(),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            config.allowed_domains.iter().cloned(),
            config.allowed_emails.iter().cloned(),
        )
    }

    /// 明示的に許可されたメール、または許可ドメインに属するメールのみ通す
    pub fn is_email_authorized(&self, email: &str) -> bool {
        if email.is_empty() {
            return false;
        }
        let email = email.to_ascii_lowercase();
        if self.emails.contains(&email) {
            return true;
        }
        match email.rsplit_once('@') {
            Some((_, domain)) => self.domains.contains(domain),
            None => false,
        }
    }
}
