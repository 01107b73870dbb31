//! Page profile applied to every automated tab.
//!
//! Keeps the automated browser consistent with the plain HTTP client: same
//! user agent, same `accept-language`, a desktop viewport, and a document
//! script that hides the most obvious automation markers.

/// Script evaluated before any page script runs.
pub const STEALTH_SCRIPT: &str = r#"
(() => {
  Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
  window.chrome = { runtime: {} };
  Object.defineProperty(navigator, 'languages', { get: () => ['zh-CN', 'zh', 'en'] });
  Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
  const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
  if (originalQuery) {
    window.navigator.permissions.query = (parameters) =>
      parameters && parameters.name === 'notifications'
        ? Promise.resolve({ state: Notification.permission })
        : originalQuery(parameters);
  }
})();
"#;

/// Fixed identity presented by automated pages.
#[derive(Debug, Clone)]
pub struct PageProfile {
    pub user_agent: String,
    pub accept_language: String,
    pub viewport: (u32, u32),
    pub script: &'static str,
}

impl PageProfile {
    pub fn new(user_agent: impl Into<String>, accept_language: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            accept_language: accept_language.into(),
            viewport: (1280, 800),
            script: STEALTH_SCRIPT,
        }
    }

    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = (width, height);
        self
    }

    /// Value for the `--lang` launch flag, derived from `accept-language`.
    pub fn lang_flag(&self) -> String {
        let langs: Vec<&str> = self
            .accept_language
            .split(',')
            .map(|part| part.split(';').next().unwrap_or("").trim())
            .filter(|lang| !lang.is_empty())
            .collect();
        format!("--lang={}", langs.join(","))
    }
}
