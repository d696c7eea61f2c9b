//! Pairlink 거래소 CLI.
//!
//! # 사용 예시
//!
//! ```bash
//! # BTC-USDT 호가창 실시간 출력 (Ctrl-C로 종료)
//! pairlink watch-orderbook BTC-USDT 0.1
//!
//! # 1분봉 캔들 스트림
//! pairlink watch-candles ETH-USDT 1m
//!
//! # REST 조회
//! pairlink ticker BTC-USDT
//! pairlink --api-key $KEY balance
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pairlink_core::{init_logging, AppConfig, LogConfig, Precision, Timeframe};
use pairlink_exchange::ExchangeClient;
use tracing::info;

use pairlink_cli::commands::query::{print_query, QueryTarget};
use pairlink_cli::commands::watch::{watch, WatchTarget};

#[derive(Parser)]
#[command(name = "pairlink")]
#[command(about = "Pairlink exchange CLI - REST 조회와 실시간 채널 감시", long_about = None)]
#[command(version)]
struct Cli {
    /// 설정 파일 경로
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// API 키 (설정 파일 값보다 우선)
    #[arg(long, env = "PAIRLINK_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 호가창 스트림 출력
    WatchOrderbook {
        /// 거래쌍 (예: BTC-USDT)
        pair: String,

        /// 가격 정밀도 (예: 0.1, 1E-1)
        precision: String,
    },

    /// 시세 스트림 출력
    WatchTicker {
        /// 거래쌍 (예: BTC-USDT)
        pair: String,
    },

    /// 캔들 스트림 출력
    WatchCandles {
        /// 거래쌍 (예: BTC-USDT)
        pair: String,

        /// 타임프레임 (1m, 5m, 15m, 30m, 1h, 3h, 6h, 12h, 1D, 7D, 14D, 1M)
        timeframe: Timeframe,
    },

    /// 거래쌍 시세 조회
    Ticker {
        /// 거래쌍 (예: BTC-USDT)
        pair: String,
    },

    /// 지갑 잔고 조회 (API 키 필요)
    Balance,

    /// 거래쌍 목록 조회
    Pairs,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let mut config = AppConfig::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config))?;
    if let Some(key) = cli.api_key {
        config.exchange.api_key = Some(key);
    }

    init_logging(LogConfig::from(&config.logging)).context("failed to initialize logging")?;

    let watch_target = match cli.command {
        Commands::WatchOrderbook { pair, precision } => WatchTarget::Orderbook {
            pair,
            precision: Precision::parse(&precision),
        },
        Commands::WatchTicker { pair } => WatchTarget::Ticker { pair },
        Commands::WatchCandles { pair, timeframe } => WatchTarget::Candles { pair, timeframe },
        Commands::Ticker { pair } => {
            return run_query(&config, QueryTarget::Ticker { pair }).await;
        }
        Commands::Balance => return run_query(&config, QueryTarget::Balance).await,
        Commands::Pairs => return run_query(&config, QueryTarget::Pairs).await,
    };

    let client = ExchangeClient::new(&config.exchange, &config.stream)
        .context("failed to create exchange client")?;
    let count = watch(&client, watch_target).await?;
    info!(count, "Done");
    Ok(())
}

async fn run_query(config: &AppConfig, target: QueryTarget) -> Result<()> {
    // 조회만 하므로 스트림은 띄우지 않음
    let exchange = config.exchange.clone().with_disable_ws(true);
    let client = ExchangeClient::new(&exchange, &config.stream)
        .context("failed to create exchange client")?;
    print_query(client.rest(), &target).await
}
