use parking_lot::Mutex;
use tracing::{debug, warn};

/// Locale token every accepted user agent must carry. Related content is
/// only laid out the expected way for English (US) pages.
pub const REQUIRED_LOCALE: &str = "en-US";

/// Used when no drawn agent carries the required locale.
pub const FALLBACK_USER_AGENT: &str =
    "Mozilla/5.0 (Windows; U; Windows NT 6.1; en-US) AppleWebKit/534.16 (KHTML, like Gecko) Chrome/10.0.648.133 Safari/534.16";

const BUILTIN_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows; U; Windows NT 6.1; en-US) AppleWebKit/534.16 (KHTML, like Gecko) Chrome/10.0.648.133 Safari/534.16",
    "Mozilla/5.0 (Windows; U; Windows NT 5.1; en-US; rv:1.9.2.13) Gecko/20101203 Firefox/3.6.13",
    "Mozilla/5.0 (Macintosh; U; Intel Mac OS X 10_6_6; en-US) AppleWebKit/533.19.4 (KHTML, like Gecko) Version/5.0.3 Safari/533.19.4",
    "Mozilla/5.0 (X11; U; Linux x86_64; en-US) AppleWebKit/534.16 (KHTML, like Gecko) Chrome/10.0.648.127 Safari/534.16",
    "Mozilla/5.0 (Windows; U; Windows NT 6.0; en-US; rv:1.9.1.9) Gecko/20100315 Firefox/3.5.9",
    "Mozilla/5.0 (Windows; U; Windows NT 6.1; de-DE) AppleWebKit/533.20.25 (KHTML, like Gecko) Version/5.0.4 Safari/533.20.27",
    "Mozilla/5.0 (X11; U; Linux i686; fr; rv:1.9.2.12) Gecko/20101027 Ubuntu/10.10 Firefox/3.6.12",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
];

/// Random browser user agents restricted to the `en-US` locale.
///
/// Draws are bounded: after `max_draws` misses the fixed
/// [`FALLBACK_USER_AGENT`] is returned.
#[derive(Debug)]
pub struct UserAgentPool {
    agents: Vec<String>,
    max_draws: u32,
    rng: Mutex<fastrand::Rng>,
}

impl UserAgentPool {
    pub fn new(max_draws: u32) -> Self {
        Self::with_agents(BUILTIN_AGENTS.iter().map(|ua| ua.to_string()).collect(), max_draws)
    }

    pub fn with_agents(agents: Vec<String>, max_draws: u32) -> Self {
        Self {
            agents,
            max_draws: max_draws.max(1),
            rng: Mutex::new(fastrand::Rng::new()),
        }
    }

    /// Deterministic pool for tests and reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(fastrand::Rng::with_seed(seed));
        self
    }

    /// Draws agents until one carries `en-US`, up to the draw limit.
    pub fn get(&self) -> String {
        if !self.agents.is_empty() {
            let mut rng = self.rng.lock();
            for _ in 0..self.max_draws {
                let ua = &self.agents[rng.usize(..self.agents.len())];
                if ua.contains(REQUIRED_LOCALE) {
                    debug!("Get UserAgent: {}", ua);
                    return ua.clone();
                }
            }
        }

        warn!(
            "⚠️ No {} user agent after {} draws, using fallback",
            REQUIRED_LOCALE, self.max_draws
        );
        FALLBACK_USER_AGENT.to_string()
    }
}

impl Default for UserAgentPool {
    fn default() -> Self {
        Self::new(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn always_returns_en_us_agent() {
        let pool = UserAgentPool::new(16).with_seed(7);
        for _ in 0..100 {
            assert!(pool.get().contains(REQUIRED_LOCALE));
        }
    }

    #[test]
    fn falls_back_when_no_agent_matches() {
        let pool = UserAgentPool::with_agents(vec!["Mozilla/5.0 (X11; fr)".to_string()], 3);
        assert_eq!(pool.get(), FALLBACK_USER_AGENT);

        let empty = UserAgentPool::with_agents(Vec::new(), 3);
        assert_eq!(empty.get(), FALLBACK_USER_AGENT);
    }
}
