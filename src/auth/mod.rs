//! 認証ゲート
//!
//! 外部の認証基盤（トークン検証）を `TokenVerifier` として抽象化し、
//! 許可リストによる絞り込みを `AllowlistVerifier` で重ねます。
mod error;
mod policy;
mod verifier;

pub use error::AuthError;
pub use policy::AllowlistPolicy;
pub use verifier::{AllowlistVerifier, DevTokenVerifier, Identity, TokenVerifier};
