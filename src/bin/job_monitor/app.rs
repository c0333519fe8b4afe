use serde::Deserialize;

// ---------------------------------------------------------------------------
// API response types (mirror routes.rs shapes)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProgressResponse {
    pub status: String,
    pub progress: usize,
    pub total: usize,
    pub results: Vec<OpportunityResponse>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpportunityResponse {
    pub item_name: String,
    pub buy_price: i64,
    pub sell_price: i64,
    pub net_profit: i64,
    pub total_investment: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct HealthResponse {
    pub jobs_running: usize,
    pub rate_limit_detected: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LatencyResponse {
    pub p99_ms: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct AckResponse {
    message: String,
}

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connected,
    Error(String),
    Connecting,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub status: ConnectionStatus,
    pub job_id: String,
    pub job: ProgressResponse,
    pub health: HealthResponse,
    pub latency: LatencyResponse,
    /// Last message from a cancel request, shown in the header.
    pub notice: Option<String>,
    pub base_url: String,
}

impl AppState {
    pub fn new(base_url: String, job_id: String) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            job_id,
            job: ProgressResponse::default(),
            health: HealthResponse::default(),
            latency: LatencyResponse::default(),
            notice: None,
            base_url,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.job.status.as_str(), "done" | "cancelled")
    }

    /// Cancellation was requested but the current batch is still running.
    pub fn cancel_pending(&self) -> bool {
        self.job.cancelled && !self.is_finished()
    }

    /// Results ordered best first.
    pub fn sorted_results(&self) -> Vec<&OpportunityResponse> {
        let mut rows: Vec<_> = self.job.results.iter().collect();
        rows.sort_by(|a, b| b.net_profit.cmp(&a.net_profit));
        rows
    }

    pub async fn refresh(&mut self, client: &reqwest::Client) {
        let progress_url = format!("{}/trading-calc/progress", self.base_url);
        let health_url = format!("{}/health", self.base_url);
        let latency_url = format!("{}/stats/latency", self.base_url);

        let (progress_res, health_res, latency_res) = tokio::join!(
            client
                .get(&progress_url)
                .query(&[("job_id", self.job_id.as_str())])
                .send(),
            client.get(&health_url).send(),
            client.get(&latency_url).send(),
        );

        let resp = match progress_res {
            Ok(r) => r,
            Err(e) => {
                self.status = ConnectionStatus::Error(format!("{e}"));
                return;
            }
        };
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            self.status = ConnectionStatus::Error("job not found (expired?)".to_string());
            return;
        }

        match resp.json::<ProgressResponse>().await {
            Ok(job) => {
                self.job = job;
                self.status = ConnectionStatus::Connected;
            }
            Err(e) => {
                self.status = ConnectionStatus::Error(format!("parse error: {e}"));
                return;
            }
        }

        if let Ok(h) = health_res {
            if let Ok(health) = h.json::<HealthResponse>().await {
                self.health = health;
            }
        }
        if let Ok(l) = latency_res {
            if let Ok(latency) = l.json::<LatencyResponse>().await {
                self.latency = latency;
            }
        }
    }

    pub async fn cancel(&mut self, client: &reqwest::Client) {
        let url = format!("{}/cancel-analysis/{}", self.base_url, self.job_id);
        self.notice = match client.post(&url).send().await {
            Ok(resp) => match resp.json::<AckResponse>().await {
                Ok(ack) => Some(ack.message),
                Err(e) => Some(format!("cancel: {e}")),
            },
            Err(e) => Some(format!("cancel failed: {e}")),
        };
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

/// Progress as `done/total (pct%)`.
pub fn format_progress(progress: usize, total: usize) -> String {
    if total == 0 {
        return format!("{progress}/0");
    }
    let pct = progress as f64 * 100.0 / total as f64;
    format!("{progress}/{total} ({pct:.0}%)")
}

pub fn format_platinum(v: i64) -> String {
    format!("{v}p")
}

pub fn format_latency(ms: Option<f64>) -> String {
    match ms {
        Some(d) if d >= 1000.0 => format!("{:.1}s", d / 1000.0),
        Some(d) => format!("{:.0}ms", d),
        None => "—".to_string(),
    }
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_formatting() {
        assert_eq!(format_progress(0, 0), "0/0");
        assert_eq!(format_progress(3, 9), "3/9 (33%)");
        assert_eq!(format_progress(9, 9), "9/9 (100%)");
    }

    #[test]
    fn latency_formatting() {
        assert_eq!(format_latency(None), "—");
        assert_eq!(format_latency(Some(250.4)), "250ms");
        assert_eq!(format_latency(Some(1500.0)), "1.5s");
    }

    #[test]
    fn truncate_is_char_safe() {
        assert_eq!(truncate("Ash Prime Set", 20), "Ash Prime Set");
        assert_eq!(truncate("Équinoxe Prime Set", 6), "Équin…");
    }

    #[test]
    fn cancel_is_pending_only_while_running() {
        let mut app = AppState::new("http://localhost:8000".into(), "j".into());
        app.job.status = "running".into();
        assert!(!app.cancel_pending());
        app.job.cancelled = true;
        assert!(app.cancel_pending());
        app.job.status = "cancelled".into();
        assert!(!app.cancel_pending());
    }

    #[test]
    fn results_sort_best_first() {
        let job: ProgressResponse = serde_json::from_value(serde_json::json!({
            "status": "done",
            "progress": 2,
            "total": 2,
            "cancelled": false,
            "results": [
                { "itemName": "A", "buyPrice": 10, "sellPrice": 22, "netProfit": 11, "totalInvestment": 11, "itemId": "a" },
                { "itemName": "B", "buyPrice": 10, "sellPrice": 40, "netProfit": 29, "totalInvestment": 11, "itemId": "b" }
            ]
        }))
        .unwrap();
        let mut app = AppState::new("http://localhost:8000".into(), "j".into());
        app.job = job;
        assert!(app.is_finished());
        let names: Vec<_> = app.sorted_results().iter().map(|r| r.item_name.as_str()).collect();
        assert_eq!(names, ["B", "A"]);
    }
}
