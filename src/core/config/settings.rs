use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_cors_origins, parse_environment, parse_i64,
    parse_store_backend, parse_u16, parse_u32, parse_u64,
};
use super::types::{
    AdminSettings, ApiSettings, AuditSettings, ConfigError, CorsSettings, DatabaseSettings,
    ExamSettings, RetrySettings, RuntimeSettings, ServerHost, ServerPort, ServerSettings, Settings,
    StoreSettings, TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = ServerHost::parse(env_or_default("EXAMROUNDS_HOST", "0.0.0.0"))?;
        let port = ServerPort::parse(env_or_default("EXAMROUNDS_PORT", "8000"))?;

        let environment = parse_environment(
            env_optional("EXAMROUNDS_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );

        let project_name = env_or_default("PROJECT_NAME", "Examrounds API");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "examrounds");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "examrounds_db");
        let database_url = env_optional("DATABASE_URL");

        let store_backend = parse_store_backend(env_optional("EXAMROUNDS_STORE"))?;

        let grace_seconds =
            parse_i64("SUBMIT_GRACE_SECONDS", env_or_default("SUBMIT_GRACE_SECONDS", "5"))?;
        let min_questions =
            parse_i64("MIN_QUESTIONS_PER_ROUND", env_or_default("MIN_QUESTIONS_PER_ROUND", "15"))?;
        let deadline_check_interval_seconds = parse_u64(
            "DEADLINE_CHECK_INTERVAL_SECONDS",
            env_or_default("DEADLINE_CHECK_INTERVAL_SECONDS", "2"),
        )?;

        let admin_api_key = env_or_default("ADMIN_API_KEY", "");

        let retry_attempts =
            parse_u32("STORE_RETRY_ATTEMPTS", env_or_default("STORE_RETRY_ATTEMPTS", "3"))?;
        let retry_base_delay_ms =
            parse_u64("STORE_RETRY_BASE_MS", env_or_default("STORE_RETRY_BASE_MS", "50"))?;

        let audit_queue_capacity =
            parse_u64("AUDIT_QUEUE_CAPACITY", env_or_default("AUDIT_QUEUE_CAPACITY", "1024"))?;

        let log_level = env_or_default("EXAMROUNDS_LOG_LEVEL", "info");
        let json = env_optional("EXAMROUNDS_LOG_JSON").map(|v| parse_bool(&v)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|v| parse_bool(&v)).unwrap_or(false);

        Ok(Self {
            server: ServerSettings { host, port },
            runtime: RuntimeSettings { environment },
            api: ApiSettings { project_name, version, api_v1_str },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
            },
            store: StoreSettings { backend: store_backend },
            exam: ExamSettings { grace_seconds, min_questions, deadline_check_interval_seconds },
            admin: AdminSettings { api_key: admin_api_key },
            retry: RetrySettings { attempts: retry_attempts, base_delay_ms: retry_base_delay_ms },
            audit: AuditSettings { queue_capacity: audit_queue_capacity as usize },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        })
    }
}
