use super::error::BackendError;
use super::event::TranscriptEvent;
use super::request::StreamRequest;

/// 送信側: 遅延評価・一度きりのリクエスト列
pub type RequestStream = Box<dyn Iterator<Item = StreamRequest> + Send>;

/// 受信側: バックエンドが発行した順のイベント列（ブロッキング）
pub type ResponseStream = Box<dyn Iterator<Item = Result<TranscriptEvent, BackendError>> + Send>;

/// 双方向ストリーミング認識バックエンド
///
/// `streaming_recognize` はブロッキングAPIです。非同期ランタイムのワーカースレッドからは
/// 呼ばず、専用スレッドから呼び出してください。
pub trait RecognitionBackend: Send + Sync {
    fn name(&self) -> &str;

    fn streaming_recognize(&self, requests: RequestStream) -> Result<ResponseStream, BackendError>;
}
