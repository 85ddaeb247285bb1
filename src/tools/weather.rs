use std::collections::HashMap;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{Days, Local, NaiveDate, NaiveDateTime};
use serde_json::Value;
use tokio::sync::Mutex;

use super::Tool;

const WTTR_URL: &str = "https://wttr.in";

/// Current conditions and hourly forecast from wttr.in, cached per date.
pub struct WeatherTool {
    http: reqwest::Client,
    base_url: String,
    location: String,
    cache: Mutex<HashMap<NaiveDate, String>>,
}

impl WeatherTool {
    pub fn new(location: &str) -> Self {
        Self::with_base_url(location, WTTR_URL)
    }

    pub fn with_base_url(location: &str, base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            location: location.replace(',', "").replace(' ', "-"),
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn fetch(&self) -> Result<Value> {
        let url = format!("{}/{}?format=j1", self.base_url, self.location);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to reach {url}"))?;
        if !resp.status().is_success() {
            bail!("weather service returned {}", resp.status());
        }
        Ok(resp.json().await?)
    }
}

/// `today`/`now`, `tomorrow`, `yesterday` or `YYYY-MM-DD`.
pub fn parse_date(param: Option<&str>, today: NaiveDate) -> Result<NaiveDate> {
    let Some(raw) = param.map(str::trim).filter(|p| !p.is_empty()) else {
        return Ok(today);
    };
    match raw.to_lowercase().as_str() {
        "today" | "now" => Ok(today),
        "tomorrow" => today
            .checked_add_days(Days::new(1))
            .ok_or_else(|| anyhow!("date out of range")),
        "yesterday" => today
            .checked_sub_days(Days::new(1))
            .ok_or_else(|| anyhow!("date out of range")),
        other => NaiveDate::parse_from_str(other, "%Y-%m-%d")
            .map_err(|_| anyhow!("unrecognised date '{raw}', use today, tomorrow or YYYY-MM-DD")),
    }
}

fn text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Render the wttr.in `j1` document for one date.
pub fn format_report(data: &Value, date: NaiveDate, now: NaiveDateTime) -> String {
    let mut lines = vec![format!("Current time is {}", now.format("%Y-%m-%d %H:%M"))];

    let area = &data["nearest_area"][0];
    let names: Vec<String> = ["areaName", "country"]
        .iter()
        .filter_map(|k| area[*k].as_array())
        .flatten()
        .map(|v| text(&v["value"]))
        .collect();
    if !names.is_empty() {
        lines.push(format!("Location: {}", names.join(", ")));
        lines.push(String::new());
    }

    if date == now.date() {
        let cur = &data["current_condition"][0];
        lines.push("# Current Weather:".into());
        lines.push(format!("- Condition: {}", text(&cur["weatherDesc"][0]["value"])));
        lines.push(format!("- Temperature (°C): {}", text(&cur["temp_C"])));
        lines.push(format!("- Humidity: {}", text(&cur["humidity"])));
        lines.push(format!("- Cloud Cover (%): {}", text(&cur["cloudcover"])));
        lines.push(format!("- Wind Speed (km/h): {}", text(&cur["windspeedKmph"])));
    }

    lines.push("# Forecast:".into());
    let wanted = date.format("%Y-%m-%d").to_string();
    for day in data["weather"].as_array().into_iter().flatten() {
        if text(&day["date"]) != wanted {
            continue;
        }
        lines.push(format!("- {wanted}"));
        for hour in day["hourly"].as_array().into_iter().flatten() {
            let t = format!("{:0>4}", text(&hour["time"]));
            lines.push(format!(
                "-- {}:{}: {}, {}°C, {}% rain, {} km/h",
                &t[..2],
                &t[2..],
                text(&hour["weatherDesc"][0]["value"]),
                text(&hour["tempC"]),
                text(&hour["chanceofrain"]),
                text(&hour["windspeedKmph"]),
            ));
        }
    }
    lines.join("\n")
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &'static str {
        "weather"
    }

    fn description(&self) -> &'static str {
        "Current and upcoming weather for the user's location. \
         Optional argument `date`: 'now', 'today', 'tomorrow' or a date in format 'YYYY-MM-DD'."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "date": { "type": "string", "description": "today, tomorrow or YYYY-MM-DD" }
            }
        })
    }

    async fn run(&self, param: Option<&str>) -> Result<String> {
        let now = Local::now().naive_local();
        let date = parse_date(param, now.date())?;

        let mut cache = self.cache.lock().await;
        if let Some(hit) = cache.get(&date) {
            return Ok(hit.clone());
        }
        let data = self.fetch().await?;
        let report = format_report(&data, date, now);
        cache.insert(date, report.clone());
        Ok(report)
    }
}
