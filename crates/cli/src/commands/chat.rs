//! `chorus chat` — Interactive or single-message chat mode.

use std::future::Future;
use std::io::Write;
use std::pin::Pin;

use chorus_config::HostConfig;
use chorus_orchestrator::{TurnHost, TurnReply};

use crate::input::spawn_stdin_reader;

fn print_reply(reply: &TurnReply) {
    for notice in &reply.notices {
        println!("  [notice] {notice}");
    }
    let speaker = if reply.terminal { "Host" } else { "Assistant" };
    for line in reply.text.lines() {
        println!("  {speaker} > {line}");
    }
    println!();
}

/// Drive `work` to completion unless `interrupt` resolves first.
///
/// `interrupt` is polled in place, so one listener installed before the loop
/// catches a signal that lands while a turn is running.
async fn unless_interrupted<W, I>(work: W, interrupt: Pin<&mut I>) -> Option<W::Output>
where
    W: Future,
    I: Future,
{
    tokio::select! {
        output = work => Some(output),
        _ = interrupt => None,
    }
}

pub async fn run(config: HostConfig, message: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    if config.api_key.is_none() && config.providers.values().all(|p| p.api_key.is_none()) {
        eprintln!();
        eprintln!("  WARNING: No API key configured. Remote providers will reject calls.");
        eprintln!("  Set CHORUS_API_KEY, OPENROUTER_API_KEY or OPENAI_API_KEY,");
        eprintln!("  or add api_key to {}", HostConfig::config_dir().join("config.toml").display());
        eprintln!();
    }

    let provider = config.primary.provider.clone();
    let model = config.primary.model.clone();
    let consultants = config.consultants.len();

    let mut host = TurnHost::from_config(config);
    let descriptors = host.discover_descriptors();
    let active = host.boot(descriptors).await;

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    if let Some(msg) = message {
        // Single message mode
        match unless_interrupted(host.submit(&msg), interrupt.as_mut()).await {
            Some(replies) => replies.iter().for_each(print_reply),
            None => eprintln!("  Interrupted, turn dropped"),
        }
        host.shutdown().await;
        return Ok(());
    }

    println!();
    println!("  Chorus — Interactive Mode");
    println!();
    println!("  Primary:      {provider} ({model})");
    println!("  Consultants:  {consultants}");
    println!("  Actions:      {active} active (type /actions to list)");
    println!();
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut lines = spawn_stdin_reader();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let line = match unless_interrupted(lines.recv(), interrupt.as_mut()).await {
            Some(Some(line)) => line,
            Some(None) => break,
            None => {
                println!();
                break;
            }
        };

        println!();
        let Some(replies) = unless_interrupted(host.submit(&line), interrupt.as_mut()).await else {
            println!("  Interrupted, turn dropped");
            break;
        };
        for reply in &replies {
            if reply.input != line {
                println!("  (queued) {}", reply.input);
            }
            print_reply(reply);
        }
    }

    host.shutdown().await;
    println!("  Goodbye!");
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn finished_work_wins_over_quiet_interrupt() {
        let (_tx, rx) = oneshot::channel::<()>();
        tokio::pin!(rx);
        assert_eq!(unless_interrupted(async { 7 }, rx.as_mut()).await, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_during_work_drops_it() {
        let (tx, rx) = oneshot::channel::<()>();
        tokio::pin!(rx);

        // First turn completes while no signal is pending.
        let first = unless_interrupted(tokio::time::sleep(Duration::from_millis(10)), rx.as_mut()).await;
        assert!(first.is_some());

        // The same listener catches a signal raised mid-turn.
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let _ = tx.send(());
        });
        let hung = unless_interrupted(tokio::time::sleep(Duration::from_secs(360)), rx.as_mut()).await;
        assert!(hung.is_none());
    }
}
