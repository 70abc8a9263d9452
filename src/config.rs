use std::time::Duration;

const PLACEHOLDER_ADMIN_KEY: &str = "CHANGE_ME_ADMIN_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn from_env_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Development
        }
    }
}

/// Billing constants. Every amount, period and description the license
/// state machine uses comes from here.
#[derive(Debug, Clone, PartialEq)]
pub struct BillingPolicy {
    /// Window granted on trial signup.
    pub trial_period: chrono::Duration,
    /// How far one successful charge extends the license.
    pub renewal_period: chrono::Duration,
    /// Charged on every automatic renewal, in minor currency units.
    pub renewal_amount_cents: i64,
    /// Charged when a payment method is first attached.
    pub initial_amount_cents: i64,
    pub currency: String,
    pub renewal_description: String,
    pub purchase_description: String,
    /// Hard deadline for a single gateway call. Exceeding it yields an
    /// indeterminate outcome, never a retry.
    pub charge_timeout: Duration,
}

impl Default for BillingPolicy {
    fn default() -> Self {
        Self {
            trial_period: chrono::Duration::days(30),
            renewal_period: chrono::Duration::days(365),
            renewal_amount_cents: 2500,
            initial_amount_cents: 2500,
            currency: "usd".to_string(),
            renewal_description: "annual license renewal".to_string(),
            purchase_description: "annual license".to_string(),
            charge_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub environment: Environment,
    /// Postgres URL, or `memory://` for an in-process store.
    pub database_url: String,
    pub admin_key: String,
    pub stripe_secret_key: String,
    pub stripe_public_key: String,
    pub stripe_api_base: String,
    pub slack_webhook_url: Option<String>,
    /// Comma-separated list of webhook URLs that receive license events.
    pub webhook_urls: Vec<String>,
    pub webhook_secret: Option<String>,
    /// Staff e-mail domain; sign-ups from it are not announced.
    pub internal_email_domain: Option<String>,
    pub billing: BillingPolicy,
}

impl Config {
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url.starts_with("memory://")
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn load_billing() -> BillingPolicy {
    let defaults = BillingPolicy::default();
    BillingPolicy {
        trial_period: chrono::Duration::days(env_parse("BROOME_TRIAL_DAYS", 30)),
        renewal_period: chrono::Duration::days(env_parse("BROOME_RENEWAL_DAYS", 365)),
        renewal_amount_cents: env_parse("BROOME_RENEWAL_AMOUNT_CENTS", defaults.renewal_amount_cents),
        initial_amount_cents: env_parse("BROOME_INITIAL_AMOUNT_CENTS", defaults.initial_amount_cents),
        currency: env_or("BROOME_CURRENCY", &defaults.currency),
        renewal_description: env_or("BROOME_RENEWAL_DESCRIPTION", &defaults.renewal_description),
        purchase_description: env_or("BROOME_PURCHASE_DESCRIPTION", &defaults.purchase_description),
        charge_timeout: Duration::from_secs(env_parse("BROOME_CHARGE_TIMEOUT_SECS", 30)),
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let environment = Environment::from_env_str(&env_or("ENV", "development"));
    let admin_key = env_or("BROOME_ADMIN_KEY", PLACEHOLDER_ADMIN_KEY);

    // Stripe test keys outside production, live keys in it.
    let (secret_var, public_var) = match environment {
        Environment::Production => ("STRIPE_LIVE_SECRET_KEY", "STRIPE_LIVE_PUBLIC_KEY"),
        Environment::Development => ("STRIPE_TEST_SECRET_KEY", "STRIPE_TEST_PUBLIC_KEY"),
    };
    let stripe_secret_key = env_or(secret_var, "");

    if environment == Environment::Production {
        if admin_key == PLACEHOLDER_ADMIN_KEY {
            anyhow::bail!("BROOME_ADMIN_KEY is still the insecure placeholder. Set a real key before running in production.");
        }
        if stripe_secret_key.is_empty() {
            anyhow::bail!("{} must be set in production", secret_var);
        }
    } else if admin_key == PLACEHOLDER_ADMIN_KEY {
        tracing::warn!("BROOME_ADMIN_KEY is not set, using insecure placeholder");
    }

    Ok(Config {
        port: env_parse("BROOME_PORT", 4000),
        environment,
        database_url: env_or("DATABASE_URL", "postgres://localhost/broome"),
        admin_key,
        stripe_secret_key,
        stripe_public_key: env_or(public_var, ""),
        stripe_api_base: env_or("STRIPE_API_BASE", crate::payment::stripe::DEFAULT_API_BASE),
        slack_webhook_url: std::env::var("BROOME_SLACK_WEBHOOK_URL").ok(),
        webhook_urls: parse_list(&env_or("BROOME_WEBHOOK_URLS", "")),
        webhook_secret: std::env::var("BROOME_WEBHOOK_SECRET").ok(),
        internal_email_domain: std::env::var("BROOME_INTERNAL_EMAIL_DOMAIN").ok(),
        billing: load_billing(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_trims_and_skips_empty() {
        assert!(parse_list("").is_empty());
        assert_eq!(
            parse_list("https://a.example/hook, https://b.example/hook ,"),
            vec!["https://a.example/hook", "https://b.example/hook"]
        );
    }

    #[test]
    fn test_default_policy_is_yearly() {
        let policy = BillingPolicy::default();
        assert_eq!(policy.trial_period, chrono::Duration::days(30));
        assert_eq!(policy.renewal_period, chrono::Duration::days(365));
        assert_eq!(policy.renewal_description, "annual license renewal");
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!(Environment::from_env_str("production"), Environment::Production);
        assert_eq!(Environment::from_env_str("PRODUCTION"), Environment::Production);
        assert_eq!(Environment::from_env_str("staging"), Environment::Development);
    }
}
