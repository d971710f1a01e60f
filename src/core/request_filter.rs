use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use regex::Regex;

use crate::core::pipeline::RequestMeta;

/// Outcome of filtering one request.
#[derive(Debug, Clone)]
pub struct FilterResult {
    pub allowed: bool,
    pub blocked: bool,
    /// Accumulated risk; monotonically non-decreasing within one check
    pub risk_score: u32,
    pub reason: String,
    /// Suspicious but admitted; worth logging
    pub should_log: bool,
}

impl FilterResult {
    fn allow() -> Self {
        Self {
            allowed: true,
            blocked: false,
            risk_score: 0,
            reason: "Request allowed".to_string(),
            should_log: false,
        }
    }

    fn deny(&mut self, reason: String) {
        self.allowed = false;
        self.blocked = true;
        self.reason = reason;
    }
}

/// Scores request metadata against size, user-agent, URL-pattern, header and
/// frequency checks. Stateless apart from the per-key frequency history.
pub struct RequestFilter {
    max_request_size: u64,
    suspicious_headers: Vec<String>,
    blocked_user_agents: Vec<Regex>,
    malicious_patterns: Vec<Regex>,
    history: Mutex<HashMap<String, VecDeque<Instant>>>,
    history_window: Duration,
    max_requests_per_window: usize,
}

impl RequestFilter {
    pub fn new(
        max_request_size: u64,
        suspicious_headers: &[String],
        blocked_user_agents: &[String],
    ) -> Self {
        let blocked_user_agents = blocked_user_agents
            .iter()
            .filter_map(|ua| Regex::new(&format!("(?i){ua}")).ok())
            .collect();

        Self {
            max_request_size,
            suspicious_headers: suspicious_headers.iter().map(|h| h.to_lowercase()).collect(),
            blocked_user_agents,
            malicious_patterns: Self::malicious_patterns(),
            history: Mutex::new(HashMap::new()),
            history_window: Duration::from_secs(300),
            max_requests_per_window: 100,
        }
    }

    /// Built-in attack patterns matched against path+query and suspicious
    /// header values.
    fn malicious_patterns() -> Vec<Regex> {
        let patterns = [
            // SQL injection
            r"(?i)(union|select|insert|update|delete|drop|create|alter|exec|execute).*from",
            r"(?i)(or|and).*1\s*=\s*1",
            r"(?i)(or|and).*'1'\s*=\s*'1'",
            // XSS
            r"(?i)<script[^>]*>.*</script>",
            r"(?i)javascript:",
            r"(?i)on\w+\s*=",
            // Path traversal
            r"\.\./",
            r"\.\.\\",
            // Command injection
            r"(?i)(cmd|command|exec|system|shell)",
            // Suspicious file extensions
            r"\.(php|asp|jsp|cgi|sh|bat|exe|scr)",
            // Common attack tools
            r"(?i)(nmap|nikto|sqlmap|burp|w3af|nessus)",
        ];

        patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
    }

    /// Analyze one request. Checks run cheapest-first; a terminal hit stops
    /// the scan, otherwise risk accumulates and anything above 100 is denied.
    pub fn check(&self, meta: &RequestMeta, key: &str) -> FilterResult {
        let mut result = FilterResult::allow();

        if meta.content_length > self.max_request_size {
            result.risk_score += 50;
            result.deny("Request size exceeds limit".to_string());
            return result;
        }

        if self.is_blocked_user_agent(meta.user_agent().unwrap_or_default()) {
            result.risk_score += 30;
            result.deny("Blocked user agent".to_string());
            return result;
        }

        let suspicious = self.suspicious_header_hits(&meta.headers);
        if !suspicious.is_empty() {
            result.risk_score += suspicious.len() as u32 * 10;
            result.should_log = true;
            result.reason = format!("Suspicious headers: {}", suspicious.join(", "));
        }

        let target = format!("{}{}", meta.path, meta.query);
        if self.has_malicious_pattern(&target) {
            result.risk_score += 80;
            result.deny("Malicious pattern detected in URL".to_string());
            return result;
        }

        if self.is_high_frequency(key) {
            result.risk_score += 20;
            result.should_log = true;
            if result.risk_score > 50 {
                result.deny("High frequency requests detected".to_string());
                return result;
            }
        }

        if matches!(meta.method.as_str(), "TRACE" | "DEBUG" | "OPTIONS") {
            result.risk_score += 15;
            result.should_log = true;
        }

        if meta.user_agent().unwrap_or_default().is_empty() {
            result.risk_score += 10;
            result.should_log = true;
        }

        self.record(key);

        if result.risk_score > 100 {
            let reason = format!("High risk score: {}", result.risk_score);
            result.deny(reason);
        }

        result
    }

    fn is_blocked_user_agent(&self, user_agent: &str) -> bool {
        self.blocked_user_agents.iter().any(|re| re.is_match(user_agent))
    }

    fn has_malicious_pattern(&self, text: &str) -> bool {
        self.malicious_patterns.iter().any(|re| re.is_match(text))
    }

    /// Names of configured headers whose values match an attack pattern,
    /// plus a `header_manipulation` marker for duplicated single-value
    /// headers or NUL bytes.
    fn suspicious_header_hits(&self, headers: &HashMap<String, Vec<String>>) -> Vec<String> {
        let mut hits = Vec::new();

        for name in &self.suspicious_headers {
            if let Some(values) = headers.get(name) {
                if values.iter().any(|v| self.has_malicious_pattern(v)) {
                    hits.push(name.clone());
                }
            }
        }

        if Self::has_header_manipulation(headers) {
            hits.push("header_manipulation".to_string());
        }

        hits
    }

    fn has_header_manipulation(headers: &HashMap<String, Vec<String>>) -> bool {
        const SINGLE_VALUE: [&str; 3] = ["host", "content-type", "content-length"];
        for name in SINGLE_VALUE {
            if headers.get(name).is_some_and(|values| values.len() > 1) {
                return true;
            }
        }

        headers.values().flatten().any(|value| value.contains('\0'))
    }

    fn is_high_frequency(&self, key: &str) -> bool {
        let history = self.history.lock();
        history
            .get(key)
            .map(|ring| ring.iter().filter(|at| at.elapsed() < self.history_window).count())
            .is_some_and(|count| count > self.max_requests_per_window)
    }

    fn record(&self, key: &str) {
        let mut history = self.history.lock();
        let ring = history.entry(key.to_string()).or_default();
        while ring.front().is_some_and(|at| at.elapsed() >= self.history_window) {
            ring.pop_front();
        }
        ring.push_back(Instant::now());
    }

    /// Number of requests recorded for `key` within the history window.
    pub fn recent_count(&self, key: &str) -> usize {
        self.history
            .lock()
            .get(key)
            .map(|ring| ring.iter().filter(|at| at.elapsed() < self.history_window).count())
            .unwrap_or(0)
    }

    /// Prune expired history entries and drop empty rings. Called from the
    /// background sweeper.
    pub fn sweep(&self) {
        let mut history = self.history.lock();
        for ring in history.values_mut() {
            while ring.front().is_some_and(|at| at.elapsed() >= self.history_window) {
                ring.pop_front();
            }
        }
        history.retain(|_, ring| !ring.is_empty());
    }
}
