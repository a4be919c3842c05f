use std::io::Write;
use std::sync::Arc;
use stock_query_agent::{
    config::AgentConfig,
    controller::LoopController,
    session::{SessionStore, DEFAULT_SESSION_ID},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

const EXIT_TOKENS: &[&str] = &["退出", "quit", "exit"];

fn print_banner() {
    println!("{}", "=".repeat(60));
    println!("我可以帮您查询：");
    println!("股票基本信息（公司概况、上市信息等）");
    println!("历史价格数据");
    println!("实时报价");
    println!("财务指标");
    println!("eg：");
    println!("贵州茅台的基本信息");
    println!("查看平安银行的实时价格");
    println!("招商银行的历史行情");
    println!("万科的财务指标");
    println!("{}", "=".repeat(60));
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = match AgentConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("初始化失败：{}", e);
            return Err(Box::new(e) as Box<dyn std::error::Error>);
        }
    };

    let sessions = Arc::new(SessionStore::from_env());
    let controller = LoopController::from_config(&config, sessions);

    info!("Stock query agent starting");
    print_banner();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        println!("{}", "-".repeat(40));
        print!("请输入问题（输入'退出'结束）: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();

        if input.is_empty() {
            println!("请输入有效的问题");
            continue;
        }

        let lowered = input.to_lowercase();
        if EXIT_TOKENS.contains(&lowered.as_str()) {
            println!("再见！");
            break;
        }

        println!("正在处理请求...");
        let answer = controller.handle_turn(DEFAULT_SESSION_ID, input).await;

        println!("{}", "=".repeat(50));
        println!("回答:");
        println!("{}", answer);
        println!("{}", "=".repeat(50));
    }

    Ok(())
}
