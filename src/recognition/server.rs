//! ローカル認識gRPCサーバ実装
//!
//! 実際の認識は行わず、受け取った音声チャンク数に応じた決定的な結果を返します。
//! クライアントからは `streaming_config` → 複数 `audio` → ストリーム終了 の順で
//! 送信されることを想定しています。
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, error, info, warn};

use super::grpc::proto::recognizer_server::{Recognizer, RecognizerServer};
use super::grpc::proto::streaming_recognize_request::Request as RecognizeRequest;
use super::grpc::proto::{StreamingRecognizeRequest, StreamingRecognizeResponse};
use super::grpc::to_response;
use super::mock::EchoScript;

pub fn into_server_service<T: Recognizer>(svc: T) -> RecognizerServer<T> {
    RecognizerServer::new(svc)
}

#[derive(Debug, Clone)]
pub struct LocalRecognitionService {
    final_every: usize,
}

impl Default for LocalRecognitionService {
    fn default() -> Self {
        Self { final_every: 10 }
    }
}

impl LocalRecognitionService {
    /// 何チャンクごとに最終結果を出すか
    pub fn with_final_every(final_every: usize) -> Self {
        Self { final_every }
    }
}

#[tonic::async_trait]
impl Recognizer for LocalRecognitionService {
    type StreamingRecognizeStream = ReceiverStream<Result<StreamingRecognizeResponse, Status>>;

    async fn streaming_recognize(
        &self,
        request: Request<Streaming<StreamingRecognizeRequest>>,
    ) -> Result<Response<Self::StreamingRecognizeStream>, Status> {
        let mut in_stream = request.into_inner();
        let (tx, rx) = mpsc::channel::<Result<StreamingRecognizeResponse, Status>>(32);
        let final_every = self.final_every;

        tokio::spawn(async move {
            let mut script = EchoScript::new(final_every);
            let mut configured = false;

            loop {
                match in_stream.message().await {
                    Ok(Some(StreamingRecognizeRequest { request, .. })) => match request {
                        Some(RecognizeRequest::StreamingConfig(cfg)) => {
                            configured = true;
                            info!(languages = ?cfg.language_codes, model = %cfg.model, "recognition config received");
                        }
                        Some(RecognizeRequest::Audio(bytes)) => {
                            if !configured {
                                let _ = tx
                                    .send(Err(Status::failed_precondition(
                                        "streaming_config must precede audio",
                                    )))
                                    .await;
                                return;
                            }
                            debug!(bytes = bytes.len(), "audio chunk received");
                            for event in script.on_audio() {
                                if let Some(response) = to_response(event) {
                                    if tx.send(Ok(response)).await.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                        None => warn!("empty recognize request ignored"),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "stream receive error");
                        let _ = tx.send(Err(Status::internal("receive error"))).await;
                        return;
                    }
                }
            }

            // 入力終了時に残りを確定させる
            for event in script.on_end() {
                if let Some(response) = to_response(event) {
                    let _ = tx.send(Ok(response)).await;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
