//! User-agent classification.

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

use super::EnrichError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentInfo {
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device: Option<String>,
}

#[async_trait]
pub trait UserAgentParser: Send + Sync {
    async fn parse(&self, user_agent: &str) -> Result<AgentInfo, EnrichError>;
}

// First match wins, so more specific tokens come first.
static BROWSERS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (Regex::new(r"Edg(e|A|iOS)?/").unwrap(), "Edge"),
        (Regex::new(r"OPR/|Opera").unwrap(), "Opera"),
        (Regex::new(r"SamsungBrowser/").unwrap(), "Samsung Internet"),
        (Regex::new(r"YaBrowser/").unwrap(), "Yandex Browser"),
        (Regex::new(r"Firefox/|FxiOS/").unwrap(), "Firefox"),
        (Regex::new(r"Chrome/|CriOS/").unwrap(), "Chrome"),
        (Regex::new(r"Version/[\d.]+.*Safari/").unwrap(), "Safari"),
        (Regex::new(r"MSIE |Trident/").unwrap(), "Internet Explorer"),
        (Regex::new(r"(?i)curl/|wget/|python-requests").unwrap(), "HTTP client"),
    ]
});

static SYSTEMS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (Regex::new(r"Windows NT").unwrap(), "Windows"),
        (Regex::new(r"Android").unwrap(), "Android"),
        (Regex::new(r"iPhone|iPad|iPod").unwrap(), "iOS"),
        (Regex::new(r"Mac OS X|Macintosh").unwrap(), "macOS"),
        (Regex::new(r"CrOS").unwrap(), "ChromeOS"),
        (Regex::new(r"Linux").unwrap(), "Linux"),
    ]
});

static BOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)bot|crawler|spider|slurp|preview").unwrap());
static TABLET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"iPad|Tablet").unwrap());
static MOBILE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Mobi|iPhone|Android").unwrap());

fn first_match(table: &[(Regex, &'static str)], user_agent: &str) -> Option<String> {
    table
        .iter()
        .find(|(re, _)| re.is_match(user_agent))
        .map(|(_, name)| name.to_string())
}

/// Pattern-based classifier for browser family, OS family and device class.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexUserAgentParser;

#[async_trait]
impl UserAgentParser for RegexUserAgentParser {
    async fn parse(&self, user_agent: &str) -> Result<AgentInfo, EnrichError> {
        let user_agent = user_agent.trim();
        if user_agent.is_empty() {
            return Err(EnrichError::UnknownAgent);
        }

        let device = if BOT.is_match(user_agent) {
            "Bot"
        } else if TABLET.is_match(user_agent) {
            "Tablet"
        } else if MOBILE.is_match(user_agent) {
            "Mobile"
        } else {
            "Desktop"
        };

        Ok(AgentInfo {
            browser: first_match(&BROWSERS, user_agent),
            os: first_match(&SYSTEMS, user_agent),
            device: Some(device.to_string()),
        })
    }
}
