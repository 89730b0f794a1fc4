use std::env;

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub upload_path: String,
    pub static_dir: String,
    pub jwt_secret: String,
    /// Levels of nesting rendered for a discussion thread, top-level replies included.
    pub reply_max_depth: usize,
    pub min_description_words: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./data/crowdhub.db?mode=rwc".to_string()),
            upload_path: env::var("UPLOAD_PATH").unwrap_or_else(|_| "./data/uploads".to_string()),
            static_dir: env::var("STATIC_DIR").unwrap_or_else(|_| "./static".to_string()),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| "development-secret-change-in-production".to_string()),
            reply_max_depth: env::var("REPLY_MAX_DEPTH")
                .ok()
                .and_then(|d| d.parse().ok())
                .filter(|d| *d > 0)
                .unwrap_or(16),
            min_description_words: env::var("MIN_DESCRIPTION_WORDS")
                .ok()
                .and_then(|w| w.parse().ok())
                .unwrap_or(50),
        }
    }
}
