// Lab Monitor CLI
// Operator tool: inspects a running monitor server and validates the
// session/signaling flows end to end

use clap::{Parser, Subcommand};
use colored::*;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::io::{self, Write};
use tokio::time::{sleep, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Parser)]
#[command(name = "lab-monitor-cli")]
#[command(about = "Lab Monitor Server CLI", long_about = None)]
struct Cli {
    /// Server address (default: 127.0.0.1:5000)
    #[arg(short, long, default_value = "127.0.0.1:5000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// Get client-facing server configuration
    Config,

    /// Test WebSocket connection
    Connect,

    /// List active sessions
    Sessions {
        /// Filter by lab id
        #[arg(short, long)]
        lab: Option<String>,
    },

    /// Open a session for a student on a computer
    Login {
        #[arg(long)]
        student_name: String,

        #[arg(long)]
        student_id: String,

        #[arg(long)]
        computer_name: String,

        #[arg(long, default_value = "LAB-01")]
        lab_id: String,

        #[arg(long, default_value = "1")]
        system_number: String,
    },

    /// Close a session by id
    Logout {
        #[arg(short, long)]
        session_id: String,
    },

    /// Subscribe to the broadcast feed and print events as they arrive
    Watch,

    /// Run automated validation scenarios
    Validate {
        /// Run all validation tests
        #[arg(short, long)]
        all: bool,

        /// Test specific scenario
        #[arg(long)]
        scenario: Option<String>,
    },

    /// Interactive mode - send custom signaling messages
    Interactive,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => {
            check_health(&cli.server).await;
        }
        Commands::Config => {
            check_config(&cli.server).await;
        }
        Commands::Connect => {
            test_connection(&cli.server).await;
        }
        Commands::Sessions { lab } => {
            list_sessions(&cli.server, lab.as_deref()).await;
        }
        Commands::Login {
            student_name,
            student_id,
            computer_name,
            lab_id,
            system_number,
        } => {
            login(
                &cli.server,
                student_name,
                student_id,
                computer_name,
                lab_id,
                system_number,
            )
            .await;
        }
        Commands::Logout { session_id } => {
            logout(&cli.server, session_id).await;
        }
        Commands::Watch => {
            watch(&cli.server).await;
        }
        Commands::Validate { all, scenario } => {
            if *all {
                run_all_validations(&cli.server).await;
            } else if let Some(s) = scenario {
                run_scenario(&cli.server, s).await;
            } else {
                println!("{}", "Use --all or --scenario <name>".yellow());
                list_scenarios();
            }
        }
        Commands::Interactive => {
            interactive_mode(&cli.server).await;
        }
    }
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    let url = format!("http://{}/api/health", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                println!("{} Health check passed", "✓".green());

                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                    println!("  Timestamp: {}", body["timestamp"]);
                }
            } else {
                println!("{} Health check failed: {}", "✗".red(), status);
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
        }
    }
}

async fn check_config(server: &str) {
    println!("{}", "Fetching server configuration...".cyan());

    let url = format!("http://{}/api/config", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            if resp.status().is_success() {
                println!("{} Config endpoint accessible", "✓".green());

                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    println!("\nConfiguration:");
                    println!("{}", serde_json::to_string_pretty(&body).unwrap());
                }
            } else {
                println!("{} Config fetch failed: {}", "✗".red(), resp.status());
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

async fn test_connection(server: &str) {
    println!("{}", "Testing WebSocket connection...".cyan());

    let url = format!("ws://{}/ws", server);

    match connect_async(&url).await {
        Ok((ws_stream, _)) => {
            println!("{} WebSocket connection established", "✓".green());
            println!("  URL: {}", url);
            drop(ws_stream);
            println!("{} Connection closed cleanly", "✓".green());
        }
        Err(e) => {
            println!("{} WebSocket connection failed: {}", "✗".red(), e);
        }
    }
}

async fn list_sessions(server: &str, lab: Option<&str>) {
    let url = match lab {
        Some(lab) => format!("http://{}/api/active-sessions?lab={}", server, lab),
        None => format!("http://{}/api/active-sessions", server),
    };
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            if !resp.status().is_success() {
                println!("{} Request failed: {}", "✗".red(), resp.status());
                return;
            }

            match resp.json::<serde_json::Value>().await {
                Ok(body) => {
                    let sessions = body["sessions"].as_array().cloned().unwrap_or_default();
                    if sessions.is_empty() {
                        println!("{}", "No active sessions".yellow());
                        return;
                    }

                    println!("{} active session(s):\n", sessions.len().to_string().green());
                    for session in sessions {
                        println!(
                            "  {} {} on {} ({})",
                            session["_id"].as_str().unwrap_or("?").bold(),
                            session["studentName"].as_str().unwrap_or("?").cyan(),
                            session["computerName"].as_str().unwrap_or("?"),
                            session["labId"].as_str().unwrap_or("?"),
                        );
                    }
                }
                Err(e) => println!("{} Failed to parse response: {}", "✗".red(), e),
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

async fn login(
    server: &str,
    student_name: &str,
    student_id: &str,
    computer_name: &str,
    lab_id: &str,
    system_number: &str,
) {
    println!("{}", "Opening session...".cyan());

    let url = format!("http://{}/api/student-login", server);
    let client = reqwest::Client::new();

    let payload = json!({
        "studentName": student_name,
        "studentId": student_id,
        "computerName": computer_name,
        "labId": lab_id,
        "systemNumber": system_number,
    });

    match client.post(&url).json(&payload).send().await {
        Ok(resp) => {
            if let Ok(body) = resp.json::<serde_json::Value>().await {
                if body["success"].as_bool().unwrap_or(false) {
                    println!("{} Session opened", "✓".green());
                    println!(
                        "  {} {}",
                        "Session ID:".bold(),
                        body["sessionId"].as_str().unwrap_or("?").green().bold()
                    );
                } else {
                    println!("{} Login failed: {}", "✗".red(), body["error"]);
                }
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

async fn logout(server: &str, session_id: &str) {
    println!("{}", "Closing session...".cyan());

    let url = format!("http://{}/api/student-logout", server);
    let client = reqwest::Client::new();

    match client
        .post(&url)
        .json(&json!({ "sessionId": session_id }))
        .send()
        .await
    {
        Ok(resp) => {
            let status = resp.status();
            if let Ok(body) = resp.json::<serde_json::Value>().await {
                if body["success"].as_bool().unwrap_or(false) {
                    println!("{} Session closed", "✓".green());
                    println!(
                        "  Duration: {}s",
                        body["session"]["duration"].as_u64().unwrap_or(0)
                    );
                } else {
                    println!("{} Logout failed ({}): {}", "✗".red(), status, body["error"]);
                }
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

async fn watch(server: &str) {
    println!("{}", "Watching broadcast feed...".cyan());
    println!("Press {} to stop.\n", "Ctrl+C".bold());

    let url = format!("ws://{}/ws", server);

    match connect_async(&url).await {
        Ok((ws_stream, _)) => {
            let (_, mut read) = ws_stream.split();

            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        println!("{} {}", "◀".green(), text.bright_white());
                    }
                    Ok(Message::Close(_)) => {
                        println!("{} Server closed the connection", "✗".yellow());
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        println!("{} Connection error: {}", "✗".red(), e);
                        break;
                    }
                }
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

fn list_scenarios() {
    println!("\n{}", "Available Validation Scenarios:".bold());
    println!("  {} - Basic WebSocket connection test", "connection".cyan());
    println!("  {} - Login, list, logout over HTTP", "session-flow".cyan());
    println!(
        "  {} - Second login on the same computer completes the first",
        "takeover".cyan()
    );
    println!(
        "  {} - Login broadcast reaches a connected observer",
        "login-broadcast".cyan()
    );
    println!(
        "  {} - Logout with an unknown session id is a structured 404",
        "invalid-logout".cyan()
    );
    println!("\nExample: lab-monitor-cli validate --scenario session-flow");
}

async fn run_scenario(server: &str, scenario: &str) {
    println!("\n{} {}", "Running scenario:".bold(), scenario.cyan());
    println!("{}", "─".repeat(60));

    let result = match scenario {
        "connection" => validate_connection(server).await,
        "session-flow" => validate_session_flow(server).await,
        "takeover" => validate_takeover(server).await,
        "login-broadcast" => validate_login_broadcast(server).await,
        "invalid-logout" => validate_invalid_logout(server).await,
        _ => {
            println!("{} Unknown scenario: {}", "✗".red(), scenario);
            list_scenarios();
            return;
        }
    };

    if result {
        println!("\n{} Scenario passed", "✓".green().bold());
    } else {
        println!("\n{} Scenario failed", "✗".red().bold());
    }
}

async fn run_all_validations(server: &str) {
    println!("\n{}", "Running All Validation Tests".bold().green());
    println!("{}\n", "═".repeat(60).green());

    let scenarios = vec![
        "connection",
        "session-flow",
        "takeover",
        "login-broadcast",
        "invalid-logout",
    ];

    let mut passed = 0;
    let mut failed = 0;

    for scenario in scenarios {
        println!("\n{} Testing: {}", "▶".cyan(), scenario.bold());
        println!("{}", "─".repeat(60));

        let result = match scenario {
            "connection" => validate_connection(server).await,
            "session-flow" => validate_session_flow(server).await,
            "takeover" => validate_takeover(server).await,
            "login-broadcast" => validate_login_broadcast(server).await,
            "invalid-logout" => validate_invalid_logout(server).await,
            _ => false,
        };

        if result {
            passed += 1;
        } else {
            failed += 1;
        }

        sleep(Duration::from_millis(500)).await;
    }

    println!("\n{}", "═".repeat(60).green());
    println!("{}", "Validation Summary".bold());
    println!("{}", "═".repeat(60).green());
    println!("  {} Passed: {}", "✓".green(), passed.to_string().green());
    println!("  {} Failed: {}", "✗".red(), failed.to_string().red());
    println!("  Total: {}", passed + failed);

    if failed == 0 {
        println!("\n{}", "All validations passed!".green().bold());
    } else {
        println!("\n{}", "Some validations failed. Check output above.".yellow());
    }
}

async fn validate_connection(server: &str) -> bool {
    let url = format!("ws://{}/ws", server);

    match connect_async(&url).await {
        Ok((ws_stream, _)) => {
            println!("{} WebSocket connection successful", "✓".green());
            drop(ws_stream);
            true
        }
        Err(e) => {
            println!("{} Connection failed: {}", "✗".red(), e);
            false
        }
    }
}

async fn open_session(server: &str, student_name: &str, computer_name: &str) -> Option<String> {
    let client = reqwest::Client::new();
    let url = format!("http://{}/api/student-login", server);

    let payload = json!({
        "studentName": student_name,
        "studentId": "CLI-0001",
        "computerName": computer_name,
        "labId": "LAB-CLI",
        "systemNumber": "1",
    });

    let resp = client.post(&url).json(&payload).send().await.ok()?;
    let body = resp.json::<serde_json::Value>().await.ok()?;
    body["sessionId"].as_str().map(String::from)
}

async fn validate_session_flow(server: &str) -> bool {
    println!("  Step 1: Opening session...");

    let session_id = match open_session(server, "Validator Student", "CLI-PC01").await {
        Some(id) => {
            println!("  {} Session opened: {}", "✓".green(), id);
            id
        }
        None => {
            println!("{} Failed to open session", "✗".red());
            return false;
        }
    };

    println!("  Step 2: Verifying session is listed as active...");
    let client = reqwest::Client::new();
    let url = format!("http://{}/api/active-sessions?lab=lab-cli", server);

    let listed = match client.get(&url).send().await {
        Ok(resp) => resp
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|body| {
                body["sessions"].as_array().map(|sessions| {
                    sessions
                        .iter()
                        .any(|s| s["_id"].as_str() == Some(session_id.as_str()))
                })
            })
            .unwrap_or(false),
        Err(_) => false,
    };

    if listed {
        println!("  {} Session visible in active list", "✓".green());
    } else {
        println!("{} Session missing from active list", "✗".red());
        return false;
    }

    println!("  Step 3: Closing session...");
    let url = format!("http://{}/api/student-logout", server);
    match client
        .post(&url)
        .json(&json!({ "sessionId": session_id }))
        .send()
        .await
    {
        Ok(resp) => {
            if resp.status().is_success() {
                println!("  {} Session closed", "✓".green());
                true
            } else {
                println!("{} Logout failed: {}", "✗".red(), resp.status());
                false
            }
        }
        Err(e) => {
            println!("{} Logout request failed: {}", "✗".red(), e);
            false
        }
    }
}

async fn validate_takeover(server: &str) -> bool {
    println!("  Opening two sessions on the same computer...");

    let first = match open_session(server, "First Student", "CLI-PC02").await {
        Some(id) => id,
        None => {
            println!("{} Failed to open first session", "✗".red());
            return false;
        }
    };
    let second = match open_session(server, "Second Student", "CLI-PC02").await {
        Some(id) => id,
        None => {
            println!("{} Failed to open second session", "✗".red());
            return false;
        }
    };

    let client = reqwest::Client::new();
    let url = format!("http://{}/api/active-sessions", server);

    let result = match client.get(&url).send().await {
        Ok(resp) => match resp.json::<serde_json::Value>().await {
            Ok(body) => {
                let on_computer: Vec<String> = body["sessions"]
                    .as_array()
                    .map(|sessions| {
                        sessions
                            .iter()
                            .filter(|s| s["computerName"].as_str() == Some("CLI-PC02"))
                            .filter_map(|s| s["_id"].as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default();

                if on_computer == vec![second.clone()] {
                    println!(
                        "  {} Only the second session is active on the computer",
                        "✓".green()
                    );
                    true
                } else {
                    println!(
                        "{} Expected only {} active, found {:?}",
                        "✗".red(),
                        second,
                        on_computer
                    );
                    false
                }
            }
            Err(_) => false,
        },
        Err(e) => {
            println!("{} Request failed: {}", "✗".red(), e);
            false
        }
    };

    // Clean up whichever session is still open
    let url = format!("http://{}/api/student-logout", server);
    let _ = client.post(&url).json(&json!({ "sessionId": second })).send().await;
    let _ = client.post(&url).json(&json!({ "sessionId": first })).send().await;

    result
}

async fn validate_login_broadcast(server: &str) -> bool {
    println!("  Step 1: Connecting observer...");

    let url = format!("ws://{}/ws", server);
    let (ws_stream, _) = match connect_async(&url).await {
        Ok(conn) => conn,
        Err(e) => {
            println!("{} Observer connection failed: {}", "✗".red(), e);
            return false;
        }
    };
    let (_, mut read) = ws_stream.split();

    println!("  Step 2: Opening session over HTTP...");
    let session_id = match open_session(server, "Broadcast Student", "CLI-PC03").await {
        Some(id) => id,
        None => {
            println!("{} Failed to open session", "✗".red());
            return false;
        }
    };

    println!("  Step 3: Waiting for student-login broadcast...");
    let mut seen = false;
    let deadline = sleep(Duration::from_secs(3));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(event) = serde_json::from_str::<serde_json::Value>(&text) {
                            if event["type"] == "student-login"
                                && event["sessionId"].as_str() == Some(session_id.as_str())
                            {
                                println!("  {} Received login broadcast", "✓".green());
                                seen = true;
                                break;
                            }
                        }
                    }
                    Some(Ok(_)) => continue,
                    _ => break,
                }
            }
            _ = &mut deadline => {
                println!("{} Timeout waiting for broadcast", "✗".red());
                break;
            }
        }
    }

    // Clean up
    let client = reqwest::Client::new();
    let url = format!("http://{}/api/student-logout", server);
    let _ = client
        .post(&url)
        .json(&json!({ "sessionId": session_id }))
        .send()
        .await;

    seen
}

async fn validate_invalid_logout(server: &str) -> bool {
    println!("  Closing a session that never existed...");

    let client = reqwest::Client::new();
    let url = format!("http://{}/api/student-logout", server);

    match client
        .post(&url)
        .json(&json!({ "sessionId": "SESSION_0_DOES_NOT_EXIST" }))
        .send()
        .await
    {
        Ok(resp) => {
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                println!("  {} Got structured 404", "✓".green());
                true
            } else {
                println!("{} Expected 404, got {}", "✗".red(), resp.status());
                false
            }
        }
        Err(e) => {
            println!("{} Request failed: {}", "✗".red(), e);
            false
        }
    }
}

async fn interactive_mode(server: &str) {
    println!("\n{}", "Interactive Mode".bold().green());
    println!("{}", "═".repeat(60).green());
    println!("Type {} for help, {} to quit\n", "help".cyan(), "quit".cyan());

    let url = format!("ws://{}/ws", server);

    match connect_async(&url).await {
        Ok((ws_stream, _)) => {
            println!("{} Connected to server", "✓".green());

            let (mut write, mut read) = ws_stream.split();

            // Spawn task to receive messages
            let receive_task = tokio::spawn(async move {
                while let Some(Ok(msg)) = read.next().await {
                    if let Message::Text(text) = msg {
                        println!("\n{} {}", "◀".green(), text.bright_white());
                    }
                }
            });

            // Main input loop
            loop {
                print!("{} ", "►".cyan());
                io::stdout().flush().unwrap();

                let mut input = String::new();
                if io::stdin().read_line(&mut input).is_err() {
                    break;
                }

                let input = input.trim();

                if input.is_empty() {
                    continue;
                }

                if input == "quit" || input == "exit" {
                    println!("Goodbye!");
                    break;
                }

                if input == "help" {
                    print_interactive_help();
                    continue;
                }

                // Try to parse as JSON and send
                if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(input) {
                    if write.send(Message::Text(parsed.to_string())).await.is_ok() {
                        println!("{} Message sent", "✓".green());
                    } else {
                        println!("{} Failed to send message", "✗".red());
                        break;
                    }
                } else {
                    println!("{} Invalid JSON. Type 'help' for examples.", "✗".yellow());
                }
            }

            receive_task.abort();
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

fn print_interactive_help() {
    println!("\n{}", "Interactive Mode Commands".bold());
    println!("{}", "─".repeat(60));
    println!("Send JSON signaling messages directly to the server.\n");

    println!("{}", "Example Messages:".bold());
    println!("\n{}:", "Register Kiosk".cyan());
    println!(r#"  {{"type":"register-kiosk","sessionId":"SESSION_1_1"}}"#);

    println!("\n{}:", "Admin Offer".cyan());
    println!(
        r#"  {{"type":"admin-offer","sessionId":"SESSION_1_1","offer":{{"type":"offer","sdp":"v=0..."}}}}"#
    );

    println!("\n{}:", "ICE Candidate".cyan());
    println!(
        r#"  {{"type":"webrtc-ice-candidate","sessionId":"SESSION_1_1","candidate":{{"candidate":"candidate:..."}}}}"#
    );

    println!("\n{}: quit, exit", "Commands".bold());
    println!();
}
