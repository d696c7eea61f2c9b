//! REST 조회 명령.

use anyhow::{Context, Result};
use pairlink_exchange::RestClient;
use serde_json::Value;

/// 조회 대상.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryTarget {
    Ticker { pair: String },
    Balance,
    Pairs,
}

impl QueryTarget {
    fn describe(&self) -> String {
        match self {
            QueryTarget::Ticker { pair } => format!("ticker for {}", pair),
            QueryTarget::Balance => "balance".to_string(),
            QueryTarget::Pairs => "trading pairs".to_string(),
        }
    }
}

/// 조회를 실행하고 응답 JSON을 반환합니다.
pub async fn run_query(rest: &RestClient, target: &QueryTarget) -> Result<Value> {
    let response = match target {
        QueryTarget::Ticker { pair } => rest.get_ticker(pair).await,
        QueryTarget::Balance => rest.get_balance().await,
        QueryTarget::Pairs => rest.list_trading_pairs().await,
    };
    response.with_context(|| format!("failed to fetch {}", target.describe()))
}

/// 조회 결과를 보기 좋은 JSON으로 출력합니다.
pub async fn print_query(rest: &RestClient, target: &QueryTarget) -> Result<()> {
    let value = run_query(rest, target).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
