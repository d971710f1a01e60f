use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{Timelike, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Ring capacity for per-key interval and response-time samples.
const RING_CAPACITY: usize = 100;

/// Cap on distinct user agents and paths tracked per key.
const DISTINCT_CAPACITY: usize = 100;

/// Per-key behavior profile built up across requests.
#[derive(Debug)]
pub struct IpBehavior {
    pub request_count: u64,
    pub first_seen: Instant,
    pub last_seen: Instant,
    user_agents: HashMap<String, u32>,
    paths: HashMap<String, u32>,
    response_times: VecDeque<Duration>,
    intervals: VecDeque<Duration>,

    // Capability flags derived from requested URL suffixes. Real browsers
    // fetch these; most bots never do.
    has_javascript: bool,
    has_css: bool,
    has_images: bool,
    has_favicon: bool,
    has_robots_txt: bool,
    has_sitemap: bool,
}

impl IpBehavior {
    fn new(now: Instant) -> Self {
        Self {
            request_count: 0,
            first_seen: now,
            last_seen: now,
            user_agents: HashMap::new(),
            paths: HashMap::new(),
            response_times: VecDeque::with_capacity(RING_CAPACITY),
            intervals: VecDeque::with_capacity(RING_CAPACITY),
            has_javascript: false,
            has_css: false,
            has_images: false,
            has_favicon: false,
            has_robots_txt: false,
            has_sitemap: false,
        }
    }

    fn observe(&mut self, user_agent: &str, path: &str, response_time: Duration, now: Instant) {
        if self.request_count > 0 {
            push_ring(&mut self.intervals, now.saturating_duration_since(self.last_seen));
        }
        self.request_count += 1;
        self.last_seen = now;

        bump_bounded(&mut self.user_agents, user_agent);
        bump_bounded(&mut self.paths, path);
        push_ring(&mut self.response_times, response_time);

        if path.contains("/static/") || path.contains(".js") {
            self.has_javascript = true;
        }
        if path.contains(".css") {
            self.has_css = true;
        }
        if path.contains(".png") || path.contains(".jpg") || path.contains(".gif") {
            self.has_images = true;
        }
        if path.contains("favicon.ico") {
            self.has_favicon = true;
        }
        if path.contains("robots.txt") {
            self.has_robots_txt = true;
        }
        if path.contains("sitemap.xml") {
            self.has_sitemap = true;
        }
    }
}

fn push_ring<T>(ring: &mut VecDeque<T>, value: T) {
    if ring.len() == RING_CAPACITY {
        ring.pop_front();
    }
    ring.push_back(value);
}

fn bump_bounded(map: &mut HashMap<String, u32>, key: &str) {
    if let Some(count) = map.get_mut(key) {
        *count += 1;
    } else if map.len() < DISTINCT_CAPACITY {
        map.insert(key.to_string(), 1);
    }
}

fn average(samples: &VecDeque<Duration>) -> Duration {
    if samples.is_empty() {
        return Duration::ZERO;
    }
    let total: Duration = samples.iter().sum();
    total / samples.len() as u32
}

/// Counters aggregated across every key.
#[derive(Debug, Default)]
struct GlobalPatterns {
    total_requests: u64,
    user_agents: HashMap<String, u64>,
    paths: HashMap<String, u64>,
    /// Keyed by the first two IPv4 octets, a coarse stand-in for geography
    geographic_spread: HashMap<String, u64>,
    /// Keyed by the first three IPv4 octets
    network_spread: HashMap<String, u64>,
}

/// Per-/24 aggregate.
#[derive(Debug)]
struct NetworkStats {
    ip_count: u64,
    request_count: u64,
    first_seen: Instant,
}

/// Per-(minute, 10s-slot) burst accounting.
#[derive(Debug)]
struct BurstSlot {
    ip_count: u64,
    request_count: u64,
    started: Instant,
}

/// Result of analyzing one request.
#[derive(Debug, Clone, Serialize)]
pub struct BotnetAnalysis {
    pub key: String,
    pub is_botnet: bool,
    /// `min(1, risk/200 + 0.05·indicators)`
    pub confidence: f64,
    pub indicators: Vec<String>,
    pub risk_score: u32,
}

impl BotnetAnalysis {
    fn add(&mut self, indicator: &str, risk: u32) {
        self.indicators.push(indicator.to_string());
        self.risk_score += risk;
    }
}

/// Detects bot-like and coordinated traffic that passes per-request filters.
///
/// Scoring thresholds and weights are deliberately conservative and must not
/// be retuned casually; the management and alerting layers are calibrated
/// against them.
pub struct BotnetDetector {
    detection_threshold: f64,
    analysis_window: Duration,
    behaviors: RwLock<HashMap<String, IpBehavior>>,
    global: RwLock<GlobalPatterns>,
    networks: RwLock<HashMap<String, NetworkStats>>,
    bursts: RwLock<HashMap<(u32, u32), BurstSlot>>,
}

impl BotnetDetector {
    pub fn new(detection_threshold: f64, analysis_window: Duration) -> Self {
        Self {
            detection_threshold,
            analysis_window,
            behaviors: RwLock::new(HashMap::new()),
            global: RwLock::new(GlobalPatterns::default()),
            networks: RwLock::new(HashMap::new()),
            bursts: RwLock::new(HashMap::new()),
        }
    }

    /// Record one request and score the key for botnet likelihood.
    pub fn analyze(
        &self,
        key: &str,
        user_agent: &str,
        path: &str,
        response_time: Duration,
    ) -> BotnetAnalysis {
        let now = Instant::now();
        let mut analysis = BotnetAnalysis {
            key: key.to_string(),
            is_botnet: false,
            confidence: 0.0,
            indicators: Vec::new(),
            risk_score: 0,
        };

        self.observe_behavior(key, user_agent, path, response_time, now, &mut analysis);
        self.observe_global(key, user_agent, path, &mut analysis);
        self.observe_network(key, &mut analysis);
        self.observe_burst(&mut analysis);
        self.check_timing(now, &mut analysis);

        self.finalize(&mut analysis);
        analysis
    }

    fn observe_behavior(
        &self,
        key: &str,
        user_agent: &str,
        path: &str,
        response_time: Duration,
        now: Instant,
        analysis: &mut BotnetAnalysis,
    ) {
        let mut behaviors = self.behaviors.write();
        let behavior = behaviors.entry(key.to_string()).or_insert_with(|| IpBehavior::new(now));
        behavior.observe(user_agent, path, response_time, now);

        if behavior.request_count > 20 && !behavior.has_javascript {
            analysis.add("no_js", 20);
        }
        if behavior.request_count > 20 && !behavior.has_css {
            analysis.add("no_css", 15);
        }
        if behavior.request_count > 50 {
            analysis.add("high_frequency", 25);
        }
        if behavior.request_count > 20 && !behavior.has_images {
            analysis.add("no_images", 10);
        }
        if behavior.user_agents.len() == 1 && behavior.request_count > 20 {
            analysis.add("single_user_agent", 10);
        }
        if behavior.response_times.len() > 20
            && average(&behavior.response_times) < Duration::from_millis(5)
        {
            analysis.add("fast_responses", 15);
        }
        if behavior.intervals.len() > 20 && average(&behavior.intervals) < Duration::from_millis(50)
        {
            analysis.add("regular_intervals", 15);
        }
    }

    fn observe_global(&self, key: &str, user_agent: &str, path: &str, analysis: &mut BotnetAnalysis) {
        let mut global = self.global.write();
        global.total_requests += 1;
        *global.user_agents.entry(user_agent.to_string()).or_insert(0) += 1;
        *global.paths.entry(path.to_string()).or_insert(0) += 1;
        *global.geographic_spread.entry(geographic_bucket(key)).or_insert(0) += 1;
        *global.network_spread.entry(network_bucket(key)).or_insert(0) += 1;

        if global.geographic_spread.len() > 50 {
            analysis.add("geographic_spread", 25);
        }
        if global.network_spread.len() > 100 {
            analysis.add("network_spread", 30);
        }
    }

    fn observe_network(&self, key: &str, analysis: &mut BotnetAnalysis) {
        let now = Instant::now();
        let mut networks = self.networks.write();
        let stats = networks.entry(network_bucket(key)).or_insert_with(|| NetworkStats {
            ip_count: 0,
            request_count: 0,
            first_seen: now,
        });
        stats.ip_count += 1;
        stats.request_count += 1;

        if stats.ip_count > 100 {
            analysis.add("network_ip_count", 30);
        }
    }

    fn observe_burst(&self, analysis: &mut BotnetAnalysis) {
        let now = Utc::now();
        let slot = (now.minute(), now.second() / 10);

        let mut bursts = self.bursts.write();
        let burst = bursts.entry(slot).or_insert_with(|| BurstSlot {
            ip_count: 0,
            request_count: 0,
            started: Instant::now(),
        });
        burst.ip_count += 1;
        burst.request_count += 1;

        if burst.ip_count > 100 {
            analysis.add("coordinated_burst", 50);
        }
    }

    /// Wall-clock coupled heuristic: with more than 1000 keys active in the
    /// window, any request landing on a 10-second boundary is treated as
    /// coordinated. Deterministic over sustained traffic; do not retune
    /// without recalibrating the alerting thresholds.
    fn check_timing(&self, now: Instant, analysis: &mut BotnetAnalysis) {
        let window_start = now.checked_sub(self.analysis_window);
        let active = {
            let behaviors = self.behaviors.read();
            match window_start {
                Some(start) => behaviors.values().filter(|b| b.last_seen > start).count(),
                None => behaviors.len(),
            }
        };

        if active > 1000 && Utc::now().second() % 10 == 0 {
            analysis.add("coordinated_timing", 40);
        }
    }

    fn finalize(&self, analysis: &mut BotnetAnalysis) {
        let base = f64::from(analysis.risk_score) / 200.0;
        let indicator_bonus = analysis.indicators.len() as f64 * 0.05;
        analysis.confidence = (base + indicator_bonus).min(1.0);
        analysis.is_botnet = analysis.confidence >= self.detection_threshold;

        // Extreme risk always trips the detector, with a confidence floor.
        if analysis.risk_score >= 300 {
            analysis.is_botnet = true;
            if analysis.confidence < 0.8 {
                analysis.confidence = 0.8;
            }
        }
    }

    /// Number of keys currently profiled.
    pub fn tracked_keys(&self) -> usize {
        self.behaviors.read().len()
    }

    /// Drop profiles idle for ten analysis windows and burst slots older
    /// than two minutes. Called from the background sweeper.
    pub fn sweep(&self) {
        let idle_cutoff = self.analysis_window * 10;
        self.behaviors
            .write()
            .retain(|_, behavior| behavior.last_seen.elapsed() <= idle_cutoff);
        self.bursts
            .write()
            .retain(|_, slot| slot.started.elapsed() <= Duration::from_secs(120));
    }
}

/// First two IPv4 octets, a coarse ASN/country proxy without a GeoIP source.
fn geographic_bucket(key: &str) -> String {
    let parts: Vec<&str> = key.split('.').collect();
    if parts.len() >= 2 {
        format!("{}.{}", parts[0], parts[1])
    } else {
        "unknown".to_string()
    }
}

/// First three IPv4 octets.
fn network_bucket(key: &str) -> String {
    let parts: Vec<&str> = key.split('.').collect();
    if parts.len() >= 3 {
        format!("{}.{}.{}", parts[0], parts[1], parts[2])
    } else {
        "unknown".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> BotnetDetector {
        BotnetDetector::new(0.8, Duration::from_secs(60))
    }

    fn drive(
        detector: &BotnetDetector,
        key: &str,
        user_agent: &str,
        path: &str,
        count: usize,
    ) -> BotnetAnalysis {
        let mut last = None;
        for _ in 0..count {
            last = Some(detector.analyze(key, user_agent, path, Duration::from_millis(1)));
        }
        last.expect("at least one request")
    }

    #[test]
    fn quiet_browser_traffic_scores_low() {
        let d = detector();
        d.analyze("203.0.113.1", "Mozilla/5.0", "/app.js", Duration::from_millis(20));
        d.analyze("203.0.113.1", "Mozilla/5.0", "/style.css", Duration::from_millis(20));
        let analysis =
            d.analyze("203.0.113.1", "Mozilla/5.0", "/logo.png", Duration::from_millis(20));

        assert!(!analysis.is_botnet);
        assert_eq!(analysis.risk_score, 0);
        assert!(analysis.indicators.is_empty());
    }

    #[test]
    fn missing_asset_fetches_fire_after_twenty_requests() {
        let d = detector();
        let analysis = drive(&d, "203.0.113.2", "bot/1.0", "/api/data", 21);

        assert!(analysis.indicators.contains(&"no_js".to_string()));
        assert!(analysis.indicators.contains(&"no_css".to_string()));
        assert!(analysis.indicators.contains(&"no_images".to_string()));
        assert!(analysis.indicators.contains(&"single_user_agent".to_string()));
    }

    #[test]
    fn asset_fetches_suppress_capability_indicators() {
        let d = detector();
        d.analyze("203.0.113.3", "Mozilla/5.0", "/bundle.js", Duration::from_millis(10));
        d.analyze("203.0.113.3", "Mozilla/5.0", "/site.css", Duration::from_millis(10));
        d.analyze("203.0.113.3", "Mozilla/5.0", "/hero.jpg", Duration::from_millis(10));
        let analysis = drive(&d, "203.0.113.3", "Mozilla/5.0", "/page", 22);

        assert!(!analysis.indicators.contains(&"no_js".to_string()));
        assert!(!analysis.indicators.contains(&"no_css".to_string()));
        assert!(!analysis.indicators.contains(&"no_images".to_string()));
    }

    #[test]
    fn high_frequency_fires_past_fifty_requests() {
        let d = detector();
        let analysis = drive(&d, "203.0.113.4", "bot/1.0", "/", 51);
        assert!(analysis.indicators.contains(&"high_frequency".to_string()));
    }

    #[test]
    fn tight_loops_flag_interval_and_response_time() {
        let d = detector();
        let analysis = drive(&d, "203.0.113.5", "bot/1.0", "/", 25);

        // Sub-millisecond test pacing means both timing rings average low.
        assert!(analysis.indicators.contains(&"regular_intervals".to_string()));
        assert!(analysis.indicators.contains(&"fast_responses".to_string()));
    }

    #[test]
    fn network_ip_count_fires_past_one_hundred() {
        let d = detector();
        let mut analysis = None;
        for i in 0..101 {
            let key = format!("198.51.100.{}", i % 50);
            analysis = Some(d.analyze(&key, "bot/1.0", "/", Duration::from_millis(1)));
        }
        let analysis = analysis.expect("ran");
        assert!(analysis.indicators.contains(&"network_ip_count".to_string()));
    }

    #[test]
    fn burst_slot_fires_past_one_hundred_requests() {
        let d = detector();
        // 250 back-to-back requests straddle at most one slot boundary, so
        // at least one slot collects well over 100 of them.
        let fired = (0..250).any(|_| {
            d.analyze("203.0.113.6", "bot/1.0", "/", Duration::from_millis(1))
                .indicators
                .contains(&"coordinated_burst".to_string())
        });
        assert!(fired);
    }

    #[test]
    fn confidence_formula_is_exact() {
        let d = detector();
        // 22 bot requests with a single UA and tight pacing: indicators are
        // no_js(20) + no_css(15) + no_images(10) + single_user_agent(10) +
        // fast_responses(15) + regular_intervals(15) = risk 85, 6 indicators.
        let analysis = drive(&d, "203.0.113.7", "bot/1.0", "/api", 22);
        assert_eq!(analysis.risk_score, 85);
        assert_eq!(analysis.indicators.len(), 6);

        let expected = (85.0 / 200.0 + 6.0 * 0.05_f64).min(1.0);
        assert!((analysis.confidence - expected).abs() < 1e-9);
        assert!(!analysis.is_botnet, "0.725 stays under the 0.8 threshold");
    }

    #[test]
    fn extreme_risk_forces_detection() {
        let mut analysis = BotnetAnalysis {
            key: "k".to_string(),
            is_botnet: false,
            confidence: 0.0,
            indicators: Vec::new(),
            risk_score: 0,
        };
        analysis.add("a", 150);
        analysis.add("b", 150);

        let d = detector();
        d.finalize(&mut analysis);
        assert!(analysis.is_botnet);
        assert!(analysis.confidence >= 0.8);
    }

    #[test]
    fn lower_threshold_detects_sooner() {
        let d = BotnetDetector::new(0.5, Duration::from_secs(60));
        let analysis = drive(&d, "203.0.113.8", "bot/1.0", "/api", 22);
        assert!(analysis.is_botnet, "0.725 confidence crosses a 0.5 threshold");
    }

    #[test]
    fn sweep_drops_idle_profiles() {
        let d = BotnetDetector::new(0.8, Duration::from_millis(1));
        d.analyze("203.0.113.9", "ua", "/", Duration::from_millis(1));
        assert_eq!(d.tracked_keys(), 1);

        std::thread::sleep(Duration::from_millis(30));
        d.sweep();
        assert_eq!(d.tracked_keys(), 0);
    }

    #[test]
    fn buckets_parse_ipv4_prefixes() {
        assert_eq!(geographic_bucket("203.0.113.50"), "203.0");
        assert_eq!(network_bucket("203.0.113.50"), "203.0.113");
        assert_eq!(geographic_bucket("not-an-ip"), "unknown");
        assert_eq!(network_bucket("::1"), "unknown");
    }
}
