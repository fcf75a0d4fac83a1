use anyhow::Result;
use colored::*;
use std::time::{Duration, Instant};

use crate::output::{print_event, TestResult};
use crate::sse_client::Connection;

const WAIT: Duration = Duration::from_secs(5);

/// A fresh subscription's first two frames: `cmd.onConnect` carrying its id
/// and heartbeat contract, then its own `cmd.onJoin` broadcast.
pub async fn test_connection(base_url: &str, channel: &str) -> Result<TestResult> {
    let start = Instant::now();

    println!("\n{}", "=== TEST: Connection ===".bright_cyan().bold());

    let mut conn =
        Connection::establish(base_url, channel, "Subscriber 1".to_string()).await?;

    let connect = conn.wait_for_selector("cmd.onConnect", WAIT).await?;
    print_event(&conn.label, &connect);

    let subscription_id = connect.payload["id"].as_str().unwrap_or_default();
    let heartbeat_url = connect.payload["heartbeatUrl"].as_str().unwrap_or_default();
    if subscription_id.is_empty() || heartbeat_url.is_empty() {
        return Ok(TestResult {
            scenario: "connection".to_string(),
            passed: false,
            message: Some("onConnect payload is missing id or heartbeatUrl".to_string()),
            duration: start.elapsed(),
        });
    }

    println!("{} Waiting for our own join broadcast...", "→".blue());
    let join = conn.wait_for_selector("cmd.onJoin", WAIT).await?;
    print_event(&conn.label, &join);

    if join.payload["userId"] == connect.payload["userId"] {
        println!("{} Join broadcast carries our own identity", "✓".green());
        Ok(TestResult {
            scenario: "connection".to_string(),
            passed: true,
            message: None,
            duration: start.elapsed(),
        })
    } else {
        Ok(TestResult {
            scenario: "connection".to_string(),
            passed: false,
            message: Some(format!(
                "Expected userId={}, got userId={}",
                connect.payload["userId"], join.payload["userId"]
            )),
            duration: start.elapsed(),
        })
    }
}

/// A second subscriber joining is broadcast to the channel; a silently
/// dropped subscriber is broadcast as leaving once the broker next writes
/// to it.
pub async fn test_join_leave(base_url: &str, channel: &str) -> Result<TestResult> {
    let start = Instant::now();

    println!("\n{}", "=== TEST: Join / Leave ===".bright_cyan().bold());

    let mut watcher =
        Connection::establish(base_url, channel, "Subscriber 1".to_string()).await?;
    watcher.wait_for_selector("cmd.onConnect", WAIT).await?;
    watcher.wait_for_selector("cmd.onJoin", WAIT).await?;

    println!("{} Connecting a second subscriber...", "→".blue());
    let mut joiner =
        Connection::establish(base_url, channel, "Subscriber 2".to_string()).await?;
    let joiner_connect = joiner.wait_for_selector("cmd.onConnect", WAIT).await?;
    let joiner_user = joiner_connect.payload["userId"].clone();

    let join = watcher.wait_for_selector("cmd.onJoin", WAIT).await?;
    print_event(&watcher.label, &join);
    if join.payload["userId"] != joiner_user {
        return Ok(TestResult {
            scenario: "join_leave".to_string(),
            passed: false,
            message: Some(format!(
                "Join broadcast for {} but expected {}",
                join.payload["userId"], joiner_user
            )),
            duration: start.elapsed(),
        });
    }

    println!("{} Dropping the second subscriber mid-stream...", "→".blue());
    joiner.disconnect();

    // the broker only notices the dead stream on its next write; a third
    // subscriber's join broadcast provides that write
    println!("{} Connecting a third subscriber to trigger cleanup...", "→".blue());
    let mut trigger =
        Connection::establish(base_url, channel, "Subscriber 3".to_string()).await?;
    trigger.wait_for_selector("cmd.onConnect", WAIT).await?;

    // earlier scenarios may leave their own dead subscribers behind, whose
    // leave broadcasts surface now; skip past those
    let deadline = Instant::now() + WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(TestResult {
                scenario: "join_leave".to_string(),
                passed: false,
                message: Some(format!("No leave broadcast for {}", joiner_user)),
                duration: start.elapsed(),
            });
        }

        let leave = watcher.wait_for_selector("cmd.onLeave", remaining).await?;
        print_event(&watcher.label, &leave);

        if leave.payload["userId"] == joiner_user {
            println!("{} Leave broadcast carries the dropped identity", "✓".green());
            return Ok(TestResult {
                scenario: "join_leave".to_string(),
                passed: true,
                message: None,
                duration: start.elapsed(),
            });
        }
    }
}

/// Heartbeat pings answer empty 200s and keep the subscription live: after
/// pinging for a while we must still receive channel broadcasts.
pub async fn test_heartbeat(
    base_url: &str,
    channel: &str,
    http: &reqwest::Client,
) -> Result<TestResult> {
    let start = Instant::now();

    println!("\n{}", "=== TEST: Heartbeat ===".bright_cyan().bold());

    let mut conn =
        Connection::establish(base_url, channel, "Subscriber 1".to_string()).await?;
    let connect = conn.wait_for_selector("cmd.onConnect", WAIT).await?;
    conn.wait_for_selector("cmd.onJoin", WAIT).await?;
    let subscription_id = connect.payload["id"].as_str().unwrap_or_default().to_string();
    let heartbeat_url = connect.payload["heartbeatUrl"]
        .as_str()
        .unwrap_or_default()
        .to_string();

    for round in 1..=3 {
        let url = format!("{}{}?from={}", base_url, heartbeat_url, subscription_id);
        let response = http.get(&url).send().await?;
        if !response.status().is_success() {
            return Ok(TestResult {
                scenario: "heartbeat".to_string(),
                passed: false,
                message: Some(format!("Ping {} answered {}", round, response.status())),
                duration: start.elapsed(),
            });
        }
        println!("{} Ping {} accepted", "✓".green(), round);
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    // still subscribed? a fresh join on the channel must reach us
    let mut trigger =
        Connection::establish(base_url, channel, "Subscriber 2".to_string()).await?;
    let trigger_connect = trigger.wait_for_selector("cmd.onConnect", WAIT).await?;

    let join = conn.wait_for_selector("cmd.onJoin", WAIT).await?;
    print_event(&conn.label, &join);

    if join.payload["userId"] == trigger_connect.payload["userId"] {
        println!("{} Subscription still live after heartbeats", "✓".green());
        Ok(TestResult {
            scenario: "heartbeat".to_string(),
            passed: true,
            message: None,
            duration: start.elapsed(),
        })
    } else {
        Ok(TestResult {
            scenario: "heartbeat".to_string(),
            passed: false,
            message: Some("Did not receive the expected join broadcast".to_string()),
            duration: start.elapsed(),
        })
    }
}
