use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt::{Display, Formatter};
use std::time::Duration;

use crate::registry::Session;
use crate::series::GapFilledSeries;

const WIDTH: u32 = 1024;
const HEIGHT: u32 = 576;

const BLUE: &str = "0, 38, 255";
const RED: &str = "234, 15, 23";

/// Rendering failures reported by the chart collaborator.
#[derive(Debug, Clone)]
pub enum RenderError {
    Network(String),
    HttpStatus(u16),
    EmptyImage,
}

impl Display for RenderError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            RenderError::Network(msg) => write!(f, "network error: {}", msg),
            RenderError::HttpStatus(code) => write!(f, "chart service returned HTTP {}", code),
            RenderError::EmptyImage => write!(f, "chart service returned an empty image"),
        }
    }
}

impl std::error::Error for RenderError {}

/// The chart collaborator: turns a finalized session and its derived
/// series into a PNG, or fails with a rendering error.
#[async_trait]
pub trait ChartRenderer: Send + Sync {
    async fn render(
        &self,
        session: &Session,
        series: &GapFilledSeries,
    ) -> Result<Vec<u8>, RenderError>;
}

/// HTTP renderer against a QuickChart-compatible service.
pub struct QuickChartRenderer {
    client: reqwest::Client,
    base_url: String,
}

impl QuickChartRenderer {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("buswatch/0.1.0")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        QuickChartRenderer {
            client,
            base_url: base_url.to_string(),
        }
    }

    /// chart.js line-chart configuration for one session.
    ///
    /// Samples over the speed limit draw red, the rest blue; point
    /// fill encodes schedule adherence; the 30 km/h gridline is
    /// emphasized. Gap slots carry null values so the time axis stays
    /// evenly spaced.
    pub fn chart_config(session: &Session, series: &GapFilledSeries) -> Value {
        let limit = crate::config::SPEED_LIMIT_KPH;

        let values: Vec<Value> = series
            .values
            .iter()
            .map(|v| match v {
                Some(speed) => json!(speed),
                None => Value::Null,
            })
            .collect();
        let border_colors: Vec<String> = series
            .values
            .iter()
            .map(|v| match v {
                Some(speed) if *speed > limit => format!("rgba({}, 1)", RED),
                _ => format!("rgba({}, 1)", BLUE),
            })
            .collect();
        let background_colors: Vec<String> = series
            .values
            .iter()
            .map(|v| match v {
                Some(speed) if *speed > limit => format!("rgba({}, 0.2)", RED),
                _ => format!("rgba({}, 0.2)", BLUE),
            })
            .collect();

        json!({
            "type": "line",
            "data": {
                "labels": &series.labels,
                "datasets": [{
                    "label": format!("Bus {} speed (km/h)", session.line),
                    "data": values,
                    "borderColor": border_colors,
                    "backgroundColor": background_colors,
                    "pointBackgroundColor": &series.colors,
                    "borderWidth": 1,
                    "spanGaps": false
                }]
            },
            "options": {
                "scales": {
                    "y": { "beginAtZero": true }
                },
                // Emphasize the speed limit as a horizontal line.
                "annotation": {
                    "annotations": [{
                        "type": "line",
                        "mode": "horizontal",
                        "scaleID": "y-axis-0",
                        "value": limit,
                        "borderColor": "#ffcd56",
                        "borderWidth": 4
                    }]
                }
            }
        })
    }
}

#[async_trait]
impl ChartRenderer for QuickChartRenderer {
    async fn render(
        &self,
        session: &Session,
        series: &GapFilledSeries,
    ) -> Result<Vec<u8>, RenderError> {
        let body = json!({
            "width": WIDTH,
            "height": HEIGHT,
            "format": "png",
            "backgroundColor": "white",
            "chart": Self::chart_config(session, series),
        });

        let response = self
            .client
            .post(&self.base_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RenderError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RenderError::HttpStatus(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RenderError::Network(e.to_string()))?;
        if bytes.is_empty() {
            return Err(RenderError::EmptyImage);
        }
        Ok(bytes.to_vec())
    }
}
