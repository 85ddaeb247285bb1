use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;

use super::Tool;

pub struct TimeTool;

#[async_trait]
impl Tool for TimeTool {
    fn name(&self) -> &'static str {
        "time"
    }

    fn description(&self) -> &'static str {
        "Use this tool when you need to find the current time."
    }

    async fn run(&self, _param: Option<&str>) -> Result<String> {
        Ok(Local::now().format("%H:%M:%S").to_string())
    }
}

pub struct DateTool;

#[async_trait]
impl Tool for DateTool {
    fn name(&self) -> &'static str {
        "current_date"
    }

    fn description(&self) -> &'static str {
        "Use this tool when you need to find the current date."
    }

    async fn run(&self, _param: Option<&str>) -> Result<String> {
        Ok(Local::now().format("%Y-%m-%d").to_string())
    }
}

pub struct DateTimeTool;

#[async_trait]
impl Tool for DateTimeTool {
    fn name(&self) -> &'static str {
        "current_datetime"
    }

    fn description(&self) -> &'static str {
        "Use this tool when you need the current date and time. Responds in the format 'YYYY-MM-DD HH:MM:SS'."
    }

    async fn run(&self, _param: Option<&str>) -> Result<String> {
        Ok(format!("Current date and time is: {}", Local::now().format("%Y-%m-%d %H:%M:%S")))
    }
}
