//! 設定管理
//!
//! 環境変数から設定を読み込む。Postgres 接続情報のみ必須で、
//! それ以外はすべてデフォルト値を持つ。

use std::env;
use std::time::Duration;

use anyhow::Context;

/// サービス全体の設定
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP 読み取り API のポート
    pub http_port: u16,
    pub database: DatabaseConfig,
    pub kafka: KafkaConfig,
    pub consumer: ConsumerTuning,
    pub cache: CacheConfig,
    pub health: HealthConfig,
    /// シャットダウン時の猶予
    pub shutdown_grace: Duration,
}

/// Postgres 接続設定
#[derive(Clone)]
pub struct DatabaseConfig {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: String,
    pub name: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// sqlx 用の接続 URL
    pub fn dsn(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode=disable",
            self.user, self.password, self.host, self.port, self.name
        )
    }
}

// パスワードをログに流さない
impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("user", &self.user)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("max_connections", &self.max_connections)
            .finish_non_exhaustive()
    }
}

/// Kafka 接続・購読設定（ブローカーへのパススルー込み）
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
    pub dlq_topic: String,
    pub auto_offset_reset: String,
    pub isolation_level: Option<String>,
    pub session_timeout_ms: Option<u64>,
    pub heartbeat_interval_ms: Option<u64>,
    pub max_poll_interval_ms: Option<u64>,
}

/// コンシューマの並列度・リトライ調整
#[derive(Debug, Clone, Copy)]
pub struct ConsumerTuning {
    /// ワーカータスク数
    pub worker_count: usize,
    /// ワーカーキュー容量（バックプレッシャー境界）
    pub job_buffer_size: usize,
    /// ConnectionFailed に対するリトライ回数
    pub max_retries: u32,
    /// 指数バックオフの基準値
    pub retry_backoff: Duration,
    /// ブローカー poll のタイムアウト
    pub poll_timeout: Duration,
}

/// キャッシュ容量設定
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub entry_amount_cap: usize,
    pub entry_size_cap: usize,
    pub preload_size: i64,
}

/// DB ヘルスチェック設定
#[derive(Debug, Clone, Copy)]
pub struct HealthConfig {
    pub check_interval: Duration,
    pub check_timeout: Duration,
}

impl Config {
    /// 環境変数から設定を読み込む
    ///
    /// `.env` ファイルがあれば先に読み込む（無くてもエラーにしない）。
    /// POSTGRES_{USER,PASSWORD,HOST,PORT,DB} は必須。
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let database = DatabaseConfig {
            user: required_env("POSTGRES_USER")?,
            password: required_env("POSTGRES_PASSWORD")?,
            host: required_env("POSTGRES_HOST")?,
            port: required_env("POSTGRES_PORT")?,
            name: required_env("POSTGRES_DB")?,
            max_connections: parse_env("DB_MAX_CONNECTIONS").unwrap_or(10),
        };

        let kafka = KafkaConfig {
            brokers: env::var("KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".into()),
            topic: env::var("KAFKA_TOPIC").unwrap_or_else(|_| "orders".into()),
            group_id: env::var("KAFKA_GROUP_ID").unwrap_or_else(|_| "orderflow".into()),
            dlq_topic: env::var("DLQ_TOPIC").unwrap_or_else(|_| "orders-dlq".into()),
            auto_offset_reset: env::var("KAFKA_AUTO_OFFSET_RESET")
                .unwrap_or_else(|_| "earliest".into()),
            isolation_level: env::var("KAFKA_ISOLATION_LEVEL").ok(),
            session_timeout_ms: parse_env("KAFKA_SESSION_TIMEOUT_MS"),
            heartbeat_interval_ms: parse_env("KAFKA_HEARTBEAT_INTERVAL_MS"),
            max_poll_interval_ms: parse_env("KAFKA_MAX_POLL_INTERVAL_MS"),
        };

        let consumer = ConsumerTuning {
            worker_count: parse_env::<usize>("WORKER_COUNT").unwrap_or(4).max(1),
            job_buffer_size: parse_env::<usize>("JOB_BUFFER_SIZE").unwrap_or(8).max(1),
            max_retries: parse_env("MAX_RETRIES").unwrap_or(3),
            retry_backoff: Duration::from_millis(parse_env("RETRY_BACKOFF_MS").unwrap_or(250)),
            poll_timeout: Duration::from_millis(parse_env("POLL_TIMEOUT_MS").unwrap_or(100)),
        };

        let cache = CacheConfig {
            entry_amount_cap: parse_env("CACHE_ENTRY_AMOUNT_CAP").unwrap_or(1000),
            entry_size_cap: parse_env("CACHE_ENTRY_SIZE_CAP").unwrap_or(10 * 1024),
            preload_size: parse_env("CACHE_PRELOAD_SIZE").unwrap_or(100),
        };

        let health = HealthConfig {
            check_interval: Duration::from_millis(
                parse_env("DB_CHECK_INTERVAL_MS").unwrap_or(5000),
            ),
            check_timeout: Duration::from_millis(parse_env("DB_CHECK_TIMEOUT_MS").unwrap_or(2000)),
        };

        Ok(Self {
            http_port: parse_env("HTTP_PORT").unwrap_or(8081),
            database,
            kafka,
            consumer,
            cache,
            health,
            shutdown_grace: Duration::from_millis(parse_env("SHUTDOWN_GRACE_MS").unwrap_or(10_000)),
        })
    }
}

fn required_env(key: &str) -> anyhow::Result<String> {
    let value = env::var(key).with_context(|| format!("missing required env var {key}"))?;
    let trimmed = value.trim();
    anyhow::ensure!(!trimmed.is_empty(), "missing required env var {key}");
    Ok(trimmed.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
