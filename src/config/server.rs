use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// WebSocket文字起こしエンドポイントのバインドアドレス（例: 0.0.0.0:8080）
    pub ws_bind_addr: String,
    /// WebSocketのパス（既定: /ws/transcribe）
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    /// ヘルスチェック/メトリクス用HTTPサーバのバインドアドレス
    pub http_bind_addr: String,
    /// ローカル認識サーバ（開発用）のバインドアドレス
    pub recognition_bind_addr: String,
}

fn default_ws_path() -> String {
    "/ws/transcribe".to_string()
}
