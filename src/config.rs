use std::env;
use std::str::FromStr;

use crate::schema::Ident;

/// How row failures during a file import are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPolicy {
    /// Any failing row aborts the whole table creation
    Atomic,
    /// Failing rows are logged and skipped
    Lenient,
}

impl FromStr for LoadPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "atomic" => Ok(LoadPolicy::Atomic),
            "lenient" => Ok(LoadPolicy::Lenient),
            other => Err(format!("Invalid LOAD_POLICY: {}", other)),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    pub allowed_origins: Vec<String>,
    pub environment: String,
    pub token_secret: String,
    pub refresh_token_secret: String,
    pub password_pepper: String,
    pub bcrypt_cost: u32,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub max_upload_bytes: usize,
    pub select_row_limit: i64,
    pub insert_batch_size: usize,
    pub load_policy: LoadPolicy,
    pub statement_timeout_ms: u64,
    /// Role the gateway switches to before running user SQL
    pub gateway_role: Option<Ident>,
}

fn parse_var<T: FromStr>(name: &str, default: &str) -> Result<T, String> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| format!("Invalid {}", name))
}

fn required_var(name: &str, purpose: &str) -> Result<String, String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(format!("{} must be set {}", name, purpose)),
    }
}

fn optional_role(name: &str) -> Result<Option<Ident>, String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ident::role(value.trim())
            .map(Some)
            .map_err(|e| format!("Invalid {}: {}", name, e)),
        _ => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, String> {
        // Load .env file if it exists (development)
        dotenvy::dotenv().ok();

        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let server_port = parse_var("SERVER_PORT", "8080")?;

        let database_url = required_var("DATABASE_URL", "to reach PostgreSQL")?;
        let db_max_connections = parse_var("DB_MAX_CONNECTIONS", "10")?;

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let token_secret = required_var("TOKEN_SECRET", "for signing access tokens")?;
        let refresh_token_secret =
            required_var("REFRESH_TOKEN_SECRET", "for signing refresh tokens")?;
        let password_pepper = required_var("PASSWORD_PEPPER", "for password hashing")?;
        let bcrypt_cost: u32 = parse_var("BCRYPT_COST", "12")?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err("BCRYPT_COST must be between 4 and 31".to_string());
        }

        let access_token_ttl_secs = parse_var("ACCESS_TOKEN_TTL_SECS", "900")?;
        let refresh_token_ttl_secs = parse_var("REFRESH_TOKEN_TTL_SECS", "2592000")?;

        let max_upload_bytes = parse_var("MAX_UPLOAD_BYTES", "10485760")?;
        let select_row_limit = parse_var("SELECT_ROW_LIMIT", "100")?;
        let insert_batch_size: usize = parse_var("INSERT_BATCH_SIZE", "500")?;
        if insert_batch_size == 0 {
            return Err("INSERT_BATCH_SIZE must be at least 1".to_string());
        }

        let load_policy = env::var("LOAD_POLICY")
            .unwrap_or_else(|_| "atomic".to_string())
            .parse()?;

        let statement_timeout_ms = parse_var("STATEMENT_TIMEOUT_MS", "15000")?;
        let gateway_role = optional_role("GATEWAY_ROLE")?;

        Ok(Config {
            server_host,
            server_port,
            database_url,
            db_max_connections,
            allowed_origins,
            environment,
            token_secret,
            refresh_token_secret,
            password_pepper,
            bcrypt_cost,
            access_token_ttl_secs,
            refresh_token_ttl_secs,
            max_upload_bytes,
            select_row_limit,
            insert_batch_size,
            load_policy,
            statement_timeout_ms,
            gateway_role,
        })
    }

    /// Get server address as string
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}
