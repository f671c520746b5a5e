use std::{env, time::Duration};

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

/// Template form dispatched instead of step-by-step prompting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateFormConfig {
    pub template_name: String,
    pub template_id: String,
    pub locale: String,
}

#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub verify_token: String,
    pub app_secret: String,
    pub access_token: String,
    pub phone_number_id: String,
    pub api_base: String,
    pub timeout: Duration,
}

impl WhatsAppConfig {
    pub fn can_send(&self) -> bool {
        !self.access_token.is_empty() && !self.phone_number_id.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub storage: StorageBackend,
    pub whatsapp: WhatsAppConfig,
    pub template_form: Option<TemplateFormConfig>,
    pub escalation_threshold_minutes: i64,
}

fn env_text(key: &str) -> String {
    env::var(key)
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    let raw = env_text(key);
    if raw.is_empty() {
        return default;
    }
    match raw.parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable environment value");
            default
        }
    }
}

pub fn resolve_database_url() -> String {
    if let Ok(url) = env::var("DATABASE_URL") {
        if !url.trim().is_empty() {
            return url;
        }
    }
    let host = env::var("POSTGRES_HOST")
        .or_else(|_| env::var("PGHOST"))
        .unwrap_or_else(|_| "localhost".to_string());
    let port = env::var("POSTGRES_PORT")
        .or_else(|_| env::var("PGPORT"))
        .unwrap_or_else(|_| "5432".to_string());
    let user = env::var("POSTGRES_USER")
        .or_else(|_| env::var("PGUSER"))
        .unwrap_or_else(|_| "postgres".to_string());
    let password = env::var("POSTGRES_PASSWORD")
        .or_else(|_| env::var("PGPASSWORD"))
        .unwrap_or_else(|_| "postgres".to_string());
    let db = env::var("POSTGRES_DB")
        .or_else(|_| env::var("PGDATABASE"))
        .unwrap_or_else(|_| "ticket_desk".to_string());
    format!("postgres://{user}:{password}@{host}:{port}/{db}")
}

impl Config {
    pub fn from_env() -> Self {
        let storage = match env_text("STORAGE_BACKEND").to_ascii_lowercase().as_str() {
            "memory" => StorageBackend::Memory,
            _ => StorageBackend::Postgres,
        };

        let template_name = env_text("WHATSAPP_FORM_TEMPLATE_NAME");
        let template_form = if template_name.is_empty() {
            None
        } else {
            let locale = env_text("WHATSAPP_FORM_LOCALE");
            Some(TemplateFormConfig {
                template_name,
                template_id: env_text("WHATSAPP_FORM_TEMPLATE_ID"),
                locale: if locale.is_empty() {
                    "en".to_string()
                } else {
                    locale
                },
            })
        };

        let api_base = env_text("WHATSAPP_API_BASE");

        Self {
            port: env_parsed("PORT", 4000),
            database_url: resolve_database_url(),
            storage,
            whatsapp: WhatsAppConfig {
                verify_token: env_text("WHATSAPP_VERIFY_TOKEN"),
                app_secret: env_text("WHATSAPP_APP_SECRET"),
                access_token: env_text("WHATSAPP_ACCESS_TOKEN"),
                phone_number_id: env_text("WHATSAPP_PHONE_NUMBER_ID"),
                api_base: if api_base.is_empty() {
                    "https://graph.facebook.com/v21.0".to_string()
                } else {
                    api_base.trim_end_matches('/').to_string()
                },
                timeout: Duration::from_secs(env_parsed("OUTBOUND_TIMEOUT_SECS", 10)),
            },
            template_form,
            escalation_threshold_minutes: env_parsed("ESCALATION_THRESHOLD_MINUTES", 5),
        }
    }

    /// Settings for tests and the in-memory demo mode.
    pub fn for_memory(verify_token: &str) -> Self {
        Self {
            port: 0,
            database_url: String::new(),
            storage: StorageBackend::Memory,
            whatsapp: WhatsAppConfig {
                verify_token: verify_token.to_string(),
                app_secret: String::new(),
                access_token: String::new(),
                phone_number_id: String::new(),
                api_base: "https://graph.facebook.com/v21.0".to_string(),
                timeout: Duration::from_secs(10),
            },
            template_form: None,
            escalation_threshold_minutes: 5,
        }
    }
}
