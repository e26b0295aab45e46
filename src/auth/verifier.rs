use async_trait::async_trait;
use tracing::{info, warn};

use super::error::AuthError;
use super::policy::AllowlistPolicy;

/// 認証済みユーザの識別情報（セッション生成時に一度だけ設定される）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;

    /// トークンの署名を検証するか（開発用の検証器は false）
    fn checks_signature(&self) -> bool {
        true
    }
}

/// 開発用の検証器: `<uid>:<email>[:<name>]` 形式のトークンを受け付ける
#[derive(Debug, Clone, Default)]
pub struct DevTokenVerifier;

#[async_trait]
impl TokenVerifier for DevTokenVerifier {
    fn checks_signature(&self) -> bool {
        false
    }

    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::invalid("empty token"));
        }

        let mut parts = token.splitn(3, ':');
        let uid = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthError::invalid("missing uid"))?;
        let email = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthError::invalid("missing email"))?;
        let name = parts.next().filter(|s| !s.is_empty());

        Ok(Identity {
            uid: uid.to_string(),
            email: Some(email.to_string()),
            name: name.map(str::to_string),
        })
    }
}

/// 内側の検証器で署名等を確認した後、許可リストでメールを絞り込む
#[derive(Debug, Clone)]
pub struct AllowlistVerifier<V> {
    inner: V,
    policy: AllowlistPolicy,
}

impl<V> AllowlistVerifier<V>
where
    V: TokenVerifier,
{
    pub fn new(inner: V, policy: AllowlistPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<V> TokenVerifier for AllowlistVerifier<V>
where
    V: TokenVerifier,
{
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let identity = self.inner.verify(token).await?;
        let email = identity.email.clone().unwrap_or_default();
        if !self.policy.is_email_authorized(&email) {
            warn!(email = %email, "unauthorized email attempted access");
            return Err(AuthError::NotAuthorized { email });
        }
        info!(email = %email, "authorized user authenticated");
        Ok(identity)
    }

    fn checks_signature(&self) -> bool {
        self.inner.checks_signature()
    }
}
