use chrono_tz::Tz;
use std::env;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required config variables {0}")]
    Missing(String),
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

const REQUIRED: [&str; 5] = [
    "JIRA_API_TOKEN",
    "JIRA_USERNAME",
    "JIRA_BASE_URL",
    "TOGGL_API_KEY",
    "TOGGL_WORKSPACE",
];

/// Ids of the Jira custom fields the instance uses for the extra issue metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JiraFieldIds {
    pub epic: String,
    pub impact: String,
    pub roadmap: String,
    pub drivers: String,
    pub clients: String,
    pub products: String,
    pub user_types: String,
    pub request_type: String,
}

impl Default for JiraFieldIds {
    fn default() -> Self {
        Self {
            epic: "customfield_10014".to_string(),
            impact: "customfield_10060".to_string(),
            roadmap: "customfield_10061".to_string(),
            drivers: "customfield_10062".to_string(),
            clients: "customfield_10063".to_string(),
            products: "customfield_10064".to_string(),
            user_types: "customfield_10065".to_string(),
            request_type: "customfield_10010".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct Settings {
    pub jira_api_token: String,
    pub jira_username: String,
    pub jira_base_url: String,
    pub jira_default_prefix: String,
    pub jira_fields: JiraFieldIds,
    pub toggl_api_key: String,
    pub toggl_workspace: i64,
    pub toggl_group: Option<i64>,
    pub db_storage: String,
    /// Zone whose calendar days bound report and sync ranges.
    pub timezone: Tz,
    pub log_level: String,
    pub simple_logging: bool,
    pub port: u16,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("jira_api_token", &"JIRA_API_TOKEN")
            .field("jira_username", &self.jira_username)
            .field("jira_base_url", &self.jira_base_url)
            .field("jira_default_prefix", &self.jira_default_prefix)
            .field("jira_fields", &self.jira_fields)
            .field("toggl_api_key", &"TOGGL_API_KEY")
            .field("toggl_workspace", &self.toggl_workspace)
            .field("toggl_group", &self.toggl_group)
            .field("db_storage", &self.db_storage)
            .field("timezone", &self.timezone)
            .field("log_level", &self.log_level)
            .field("simple_logging", &self.simple_logging)
            .field("port", &self.port)
            .finish()
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.is_empty());

        let missing = REQUIRED
            .iter()
            .filter(|name| get(**name).is_none())
            .copied()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing.join(", ")));
        }
        let required = |name: &str| get(name).unwrap_or_default();

        let defaults = JiraFieldIds::default();
        let field = |name: &str, default: String| get(name).unwrap_or(default);

        Ok(Self {
            jira_api_token: required("JIRA_API_TOKEN"),
            jira_username: required("JIRA_USERNAME"),
            jira_base_url: required("JIRA_BASE_URL").trim_end_matches('/').to_string(),
            jira_default_prefix: get("JIRA_DEFAULT_PREFIX").unwrap_or_else(|| "APP".to_string()),
            jira_fields: JiraFieldIds {
                epic: field("JIRA_FIELD_EPIC", defaults.epic),
                impact: field("JIRA_FIELD_IMPACT", defaults.impact),
                roadmap: field("JIRA_FIELD_ROADMAP", defaults.roadmap),
                drivers: field("JIRA_FIELD_DRIVERS", defaults.drivers),
                clients: field("JIRA_FIELD_CLIENTS", defaults.clients),
                products: field("JIRA_FIELD_PRODUCTS", defaults.products),
                user_types: field("JIRA_FIELD_USER_TYPES", defaults.user_types),
                request_type: field("JIRA_FIELD_REQUEST_TYPE", defaults.request_type),
            },
            toggl_api_key: required("TOGGL_API_KEY"),
            toggl_workspace: parse_number("TOGGL_WORKSPACE", &required("TOGGL_WORKSPACE"))?,
            toggl_group: get("TOGGL_GROUP")
                .map(|value| parse_number("TOGGL_GROUP", &value))
                .transpose()?,
            db_storage: get("DB_STORAGE").unwrap_or_else(|| "storage/jiggl.db".to_string()),
            timezone: get("TIMEZONE")
                .map(|value| {
                    value.parse::<Tz>().map_err(|_| ConfigError::Invalid {
                        name: "TIMEZONE",
                        value,
                    })
                })
                .transpose()?
                .unwrap_or(Tz::UTC),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            simple_logging: get("SIMPLE_LOGGING")
                .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
                .unwrap_or(false),
            port: get("PORT")
                .map(|value| {
                    value.parse::<u16>().map_err(|_| ConfigError::Invalid {
                        name: "PORT",
                        value,
                    })
                })
                .transpose()?
                .unwrap_or(8080),
        })
    }
}

fn parse_number(name: &'static str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| ConfigError::Invalid {
        name,
        value: value.to_string(),
    })
}
