//! Challenge detection module.
//!
//! Classifies upstream bodies as Cloudflare challenge pages. The heuristic is
//! a plain substring match: the body must carry the provider's brand token and
//! at least one challenge indicator. It is tied to the current wording of the
//! challenge page and will miss a reworded page.

use crate::challenges::core::UpstreamBody;

/// Challenge families recognised by the indicator table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeType {
    /// Error page carrying a Ray ID footer.
    ErrorPage,
    /// Legacy "checking your browser" interstitial.
    BrowserCheck,
    /// Managed challenge asking to verify a human.
    ManagedChallenge,
    /// Turnstile widget.
    Turnstile,
    /// Custom indicator supplied through [`ChallengeDetector::with_tokens`].
    Custom,
}

/// Indicator definition used to match bodies against known challenge wording.
#[derive(Debug, Clone)]
struct ChallengeIndicator {
    token: String,
    challenge_type: ChallengeType,
}

impl ChallengeIndicator {
    fn new(token: &str, challenge_type: ChallengeType) -> Self {
        Self {
            token: token.to_lowercase(),
            challenge_type,
        }
    }
}

const DEFAULT_BRAND: &str = "cloudflare";

const DEFAULT_INDICATORS: &[(&str, ChallengeType)] = &[
    ("ray id", ChallengeType::ErrorPage),
    ("checking your browser", ChallengeType::BrowserCheck),
    ("verify you are human", ChallengeType::ManagedChallenge),
    ("turnstile", ChallengeType::Turnstile),
];

/// Detection output returned to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeDetection {
    /// Type of the first indicator that matched.
    pub challenge_type: ChallengeType,
    pub matched_indicators: Vec<String>,
}

/// Stateless substring classifier.
#[derive(Debug, Clone)]
pub struct ChallengeDetector {
    brand: String,
    indicators: Vec<ChallengeIndicator>,
}

impl Default for ChallengeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ChallengeDetector {
    pub fn new() -> Self {
        Self {
            brand: DEFAULT_BRAND.to_string(),
            indicators: DEFAULT_INDICATORS
                .iter()
                .map(|(token, kind)| ChallengeIndicator::new(token, *kind))
                .collect(),
        }
    }

    /// Replace the brand token and indicators. Tokens are matched
    /// case-insensitively.
    pub fn with_tokens<I, S>(brand: &str, indicators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            brand: brand.to_lowercase(),
            indicators: indicators
                .into_iter()
                .map(|token| ChallengeIndicator::new(token.as_ref(), ChallengeType::Custom))
                .collect(),
        }
    }

    /// Detect a challenge in the provided body. Binary bodies never match.
    pub fn detect(&self, body: &UpstreamBody) -> Option<ChallengeDetection> {
        let text = body.as_text()?;
        let lower = text.to_lowercase();

        if !lower.contains(&self.brand) {
            return None;
        }

        let matched: Vec<&ChallengeIndicator> = self
            .indicators
            .iter()
            .filter(|indicator| lower.contains(&indicator.token))
            .collect();

        let first = matched.first()?;
        Some(ChallengeDetection {
            challenge_type: first.challenge_type,
            matched_indicators: matched.iter().map(|i| i.token.clone()).collect(),
        })
    }

    pub fn is_challenge(&self, body: &UpstreamBody) -> bool {
        self.detect(body).is_some()
    }
}

/// Reason an upstream response should trigger a credential refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeTrigger {
    /// Upstream answered `403`, regardless of body.
    Forbidden,
    /// Body was classified as a challenge page.
    ChallengePage(ChallengeDetection),
}

impl ChallengeTrigger {
    /// Combine the status check with the body classifier.
    pub fn evaluate(
        status: u16,
        body: &UpstreamBody,
        detector: &ChallengeDetector,
    ) -> Option<ChallengeTrigger> {
        if status == 403 {
            return Some(ChallengeTrigger::Forbidden);
        }
        detector.detect(body).map(ChallengeTrigger::ChallengePage)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChallengeTrigger::Forbidden => "status_403",
            ChallengeTrigger::ChallengePage(_) => "challenge_page",
        }
    }
}
