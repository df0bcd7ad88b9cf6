use std::env;
use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{sleep, Duration};

use tripcrew::client_wrapper::ClientWrapper;
use tripcrew::clients::openai::OpenAIClient;
use tripcrew::config::{CrewConfig, SelectorKind};
use tripcrew::console;
use tripcrew::role::{Capability, LlmCapability};
use tripcrew::scheduler::CancelToken;
use tripcrew::{SessionDriver, SessionError};

// Run from the root folder of the repo as follows:
// OPENAI_API_KEY=your-open-ai-key-here cargo run --bin travel_planner
//
// Optional: TRIPCREW_MODEL=gpt-4.1-mini, TRIPCREW_CONFIG=path/to/crew.json,
// TRIPCREW_SELECTOR=llm (declared, priority or llm), RUST_LOG=tripcrew=info

const DEFAULT_MODEL: &str = "gpt-4o-mini";

fn build_crew(api_key: &str) -> Result<SessionDriver, Box<dyn Error + Send + Sync>> {
    let default_model = env::var("TRIPCREW_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
    let mut config = match env::var("TRIPCREW_CONFIG") {
        Ok(path) => CrewConfig::from_json_file(path)?,
        Err(_) => tripcrew::travel::travel_config(),
    };
    if let Ok(selector) = env::var("TRIPCREW_SELECTOR") {
        config.selector = Some(selector.parse::<SelectorKind>()?);
    }

    let selector_client: Arc<dyn ClientWrapper> = Arc::new(OpenAIClient::new_with_model_string(
        api_key,
        default_model.as_str(),
    ));
    let driver = config.build_with_selector_client(
        |role| -> Arc<dyn Capability> {
            let model = role.model.as_deref().unwrap_or(default_model.as_str());
            let client: Arc<dyn ClientWrapper> =
                Arc::new(OpenAIClient::new_with_model_string(api_key, model));
            Arc::new(LlmCapability::new(client))
        },
        Some(selector_client),
    )?;
    log::info!("travel planner using the {} selector", driver.selector_name());
    Ok(driver)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tripcrew::init_logger();

    let api_key = env::var("OPENAI_API_KEY")
        .map_err(|_| "Please set the OPENAI_API_KEY environment variable!")?;
    let crew = build_crew(&api_key)?;

    println!("{}", console::WELCOME_BANNER);

    // One listener for the whole run: Ctrl-C cancels the session in flight, or exits at the prompt.
    let (active_tx, active_rx) = watch::channel::<Option<CancelToken>>(None);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            let idle = console::interrupt(active_rx.borrow().as_ref());
            if idle {
                println!("\n{}", console::GOODBYE);
                std::process::exit(0);
            }
        }
    });

    loop {
        print!("\n{}", console::PROMPT);
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            // stdin closed
            println!("\n{}", console::GOODBYE);
            break;
        }

        if console::is_exit_command(&line) {
            println!("{}", console::GOODBYE);
            break;
        }
        let request = line.trim();
        if request.is_empty() {
            continue;
        }

        println!("{}", console::PLANNING_NOTICE);
        let (tx, rx) = watch::channel(true);
        let dots = tokio::spawn(display_waiting_dots(rx, 3));

        let cancel = CancelToken::new();
        active_tx.send_replace(Some(cancel.clone()));
        let outcome = crew.run_with_cancel(request, cancel).await;
        active_tx.send_replace(None);
        let _ = tx.send(false);
        let _ = dots.await;

        match outcome {
            Ok(result) => println!("{}", console::format_report(&result.report)),
            Err(SessionError::Cancelled { .. }) => println!("\nPlanning cancelled."),
            Err(e) => {
                println!("An error occurred while planning your trip: {}", e);
                println!("{}", console::RETRY_HINT);
            }
        }
    }
    Ok(())
}

async fn display_waiting_dots(rx: watch::Receiver<bool>, num_dots: usize) {
    let mut loading = true;
    while loading {
        for _ in 0..num_dots {
            if !*rx.borrow() {
                break;
            }
            print!(".");
            let _ = io::stdout().flush();
            sleep(Duration::from_millis(500)).await;
        }
        print!("\r{}\r", " ".repeat(num_dots));
        let _ = io::stdout().flush();
        loading = *rx.borrow();
    }
}
