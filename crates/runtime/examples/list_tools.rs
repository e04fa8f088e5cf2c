//! Start a tool host, list its tools and navigate once.
//!
//! Run with:
//! cargo run --example list_tools -- http://localhost:8931/mcp docker run -i --rm \
//!     -p 8931:8931 mcr.microsoft.com/playwright/mcp --port 8931 --host 0.0.0.0

use runtime::{
    LaunchSpec, McpConnector, ToolConnector, ToolInvocationRequest, ToolOutcome, ToolSession,
};
use serde_json::{Map, json};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let (Some(url), Some(command)) = (args.next(), args.next()) else {
        eprintln!("usage: list_tools <url> <command> [args...]");
        std::process::exit(2);
    };

    let launch = LaunchSpec::new(command, url).with_args(args);
    println!("Starting: {}", launch.display_command());

    let mut session = McpConnector::new(launch).connect().await?;
    let tools = match session.discover_tools().await {
        Ok(tools) => tools,
        Err(e) => {
            session.close().await;
            return Err(e.into());
        }
    };

    println!("\nDiscovered {} tools:", tools.len());
    for tool in &tools {
        println!("  - {}", tool.name);
    }

    if tools.iter().any(|t| t.name == "browser_navigate") {
        println!("\nCalling browser_navigate...");
        let mut arguments = Map::new();
        arguments.insert("url".into(), json!("https://example.com"));
        let request = ToolInvocationRequest::new("call_0", "browser_navigate", arguments);

        match session.invoke(&request).await.outcome {
            ToolOutcome::Success { payload } => {
                let text = payload.as_str().map_or_else(|| payload.to_string(), str::to_string);
                println!("{}", runtime::tools::preview(&text));
            }
            ToolOutcome::Failure { error } => println!("Error: {error}"),
        }
    }

    session.close().await;
    println!("\nDone!");
    Ok(())
}
