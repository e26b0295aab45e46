//! 文字起こしセッション
//!
//! クライアント接続ごとに `TranscriptionSession` を1つ作り、
//! 音声を認識バックエンドへ中継して結果を送り返します。
mod context;
mod error;
mod ingest;
mod protocol;
mod relay;
mod sequencer;
mod state;
mod transcription;
mod worker;

pub use context::BridgeContext;
pub use error::SessionError;
pub use ingest::{AudioIngestQueue, IngestCounters, IngestError, IngestStats, Take};
pub use protocol::{
    decode_audio, default_session_id, timestamp_now, ControlMessage, InitMessage, OutboundMessage, ReadyConfig,
    ReadyFeatures, SpeechEventKind, WordEntry,
};
pub use relay::{RelaySender, ResponseRelay};
pub use sequencer::RequestSequencer;
pub use state::{InvalidTransition, SessionState};
pub use transcription::{SessionObserver, SessionOutcome, TranscriptionSession};
pub use worker::{RecognitionStreamWorker, WorkerHandle};
