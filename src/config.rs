use anyhow::{bail, Context, Result};

#[derive(Debug, Clone)]
pub enum Environment {
    Sandbox,
    Production,
}

impl Environment {
    pub fn base_url(&self) -> &'static str {
        match self {
            Environment::Sandbox => "https://sandbox.safaricom.co.ke",
            Environment::Production => "https://api.safaricom.co.ke",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub host: String,
    pub port: u16,

    // Daraja credentials
    pub consumer_key: String,
    pub consumer_secret: String,
    pub business_short_code: String,
    pub passkey: String,
    pub callback_url: String,

    // The number payments are made to; shown to the customer, never sent to the provider
    pub receiver_number: String,

    // Rate Limiting
    pub rate_limit_per_second: u64,
    pub rate_limit_burst: u32,

    // Status polling
    pub poll_interval_secs: u64,
    pub poll_max_attempts: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let environment = Self::parse_environment()?;

        let config = Self {
            environment: environment.clone(),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("Invalid PORT")?,

            consumer_key: std::env::var("MPESA_CONSUMER_KEY")
                .context("MPESA_CONSUMER_KEY required")?,
            consumer_secret: std::env::var("MPESA_CONSUMER_SECRET")
                .context("MPESA_CONSUMER_SECRET required")?,
            business_short_code: std::env::var("MPESA_BUSINESS_SHORT_CODE")
                .unwrap_or_else(|_| "174379".to_string()),
            passkey: std::env::var("MPESA_PASSKEY").context("MPESA_PASSKEY required")?,
            callback_url: std::env::var("MPESA_CALLBACK_URL")
                .context("MPESA_CALLBACK_URL required")?,

            receiver_number: "+254722683434".to_string(),

            rate_limit_per_second: std::env::var("RATE_LIMIT_PER_SECOND")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("Invalid RATE_LIMIT_PER_SECOND")?,
            rate_limit_burst: std::env::var("RATE_LIMIT_BURST")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("Invalid RATE_LIMIT_BURST")?,

            poll_interval_secs: std::env::var("MPESA_POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("Invalid MPESA_POLL_INTERVAL_SECS")?,
            poll_max_attempts: std::env::var("MPESA_POLL_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "12".to_string())
                .parse()
                .context("Invalid MPESA_POLL_MAX_ATTEMPTS")?,
        };

        config.validate()?;
        Ok(config)
    }

    fn parse_environment() -> Result<Environment> {
        let env = std::env::var("MPESA_ENVIRONMENT").unwrap_or_else(|_| "sandbox".to_string());

        match env.to_lowercase().as_str() {
            "sandbox" | "test" => Ok(Environment::Sandbox),
            "production" | "prod" => Ok(Environment::Production),
            _ => bail!("Unknown environment: {}", env),
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.callback_url.starts_with("http") {
            bail!("MPESA_CALLBACK_URL must be HTTP(S) URL");
        }

        if self.business_short_code.is_empty()
            || !self.business_short_code.chars().all(|c| c.is_ascii_digit())
        {
            bail!("MPESA_BUSINESS_SHORT_CODE must be numeric");
        }

        if self.poll_max_attempts == 0 {
            bail!("MPESA_POLL_MAX_ATTEMPTS must be at least 1");
        }

        tracing::info!(
            "Configuration validated for {:?} environment",
            self.environment
        );

        Ok(())
    }
}
