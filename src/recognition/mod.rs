//! 認識バックエンド境界
//!
//! - `RecognitionBackend` は設定フレーム→音声フレームを引き込み、イベント列を返す
//! - `GrpcRecognitionBackend` はプロセスで1つのチャネルを共有するgRPC実装
//! - `MockRecognitionBackend` はテスト用のスクリプト実装
//! - `server::LocalRecognitionService` は同じワイヤ契約のローカル開発用サーバ
mod backend;
mod error;
mod event;
pub mod grpc;
mod mock;
mod request;
pub mod server;

pub use backend::{RecognitionBackend, RequestStream, ResponseStream};
pub use error::BackendError;
pub use event::{FeatureSet, TranscriptEvent, WordTiming};
pub use grpc::GrpcRecognitionBackend;
pub use mock::{MockBehavior, MockRecognitionBackend};
pub use request::{StreamConfig, StreamRequest};
