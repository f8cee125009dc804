//! Counter editor demo
//!
//! Builds a bridge with the start kit, custom CSS and the counter extension,
//! boots an in-process fake sandbox, and prints the word and character counts
//! as the document changes.

use editor_bridge_host::tracing_support::init_subscriber;
use editor_bridge_host::{kit, BridgeConfig, EditorBridge, MessageChannel};
use editor_bridge_sdk::prelude::*;
use std::sync::{Arc, Mutex};

const CUSTOM_FONT: &str = "* { font-family: 'Rubik', sans-serif; }";

fn plain_text(html: &str) -> String {
    let mut text = String::new();
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                text.push(' ');
            }
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn counts(html: &str) -> (usize, usize) {
    let text = plain_text(html);
    (text.split_whitespace().count(), text.chars().count())
}

fn snapshot(html: &str, focused: bool) -> Value {
    let (words, characters) = counts(html);
    json!({
        "isReady": true,
        "isFocused": focused,
        "contentChanged": true,
        "wordCount": words,
        "characterCount": characters,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let config = BridgeConfig::from_env()
        .initial_content("<p>This is a basic example!</p>")
        .autofocus(true);
    let bridge = EditorBridge::builder()
        .config(config)
        .extension(kit::core_with_css(CUSTOM_FONT))
        .extensions(kit::start_kit())
        .extension(kit::counter())
        .build()?;

    let bundle = bridge.boot_bundle().clone();
    tracing::info!(fingerprint = %bundle.fingerprint, "Boot bundle composed");

    // Fake sandbox: boots from the bundle, then serves the core commands.
    let (channel, sandbox) = MessageChannel::in_memory();
    bridge.attach(channel)?;

    let doc = Arc::new(Mutex::new(
        bundle.config["initialContent"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
    ));
    let focused = bundle.config["autofocus"].as_bool().unwrap_or(false);
    let peer = SandboxPeer::new(sandbox.outbound, sandbox.inbound, bridge.config().codec)
        .manual_ready();
    let emitter = peer.emitter();

    let set_content = {
        let doc = doc.clone();
        let emitter = emitter.clone();
        move |payload: Value| {
            let doc = doc.clone();
            let emitter = emitter.clone();
            async move {
                let html = payload.as_str().unwrap_or_default().to_string();
                emitter.state(snapshot(&html, true))?;
                *doc.lock().unwrap_or_else(|e| e.into_inner()) = html;
                Ok::<_, anyhow::Error>(Value::Null)
            }
        }
    };
    let get_text = {
        let doc = doc.clone();
        move |_: Value| {
            let html = doc.lock().unwrap_or_else(|e| e.into_inner()).clone();
            async move { Ok::<_, anyhow::Error>(json!(plain_text(&html))) }
        }
    };
    let focus = {
        let doc = doc.clone();
        let emitter = emitter.clone();
        move |_: Value| {
            let html = doc.lock().unwrap_or_else(|e| e.into_inner()).clone();
            let emitter = emitter.clone();
            async move {
                emitter.state(snapshot(&html, true))?;
                Ok::<_, anyhow::Error>(Value::Null)
            }
        }
    };

    let sandbox_task = tokio::spawn(
        peer.handle("setContent", set_content)
            .handle("getText", get_text)
            .handle("focus", focus)
            .run(),
    );
    {
        let html = doc.lock().unwrap_or_else(|e| e.into_inner()).clone();
        emitter.state(snapshot(&html, focused))?;
        emitter.ready()?;
    }

    // Print the counters whenever the mirror changes.
    let mut state = bridge.subscribe_state();
    let printer = tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = state.borrow_and_update().clone();
            if let Some(snapshot) = current.snapshot() {
                println!(
                    "words: {:>3}  characters: {:>4}  focused: {}",
                    snapshot.get_as::<u64>("wordCount").unwrap_or(0),
                    snapshot.get_as::<u64>("characterCount").unwrap_or(0),
                    snapshot.is_focused(),
                );
            }
        }
    });

    bridge.focus().await?;
    bridge
        .set_content("<p>Counting words as the document grows</p>")
        .await?;
    bridge
        .set_content("<h1>Counter</h1><p>Counting words as the document keeps growing</p>")
        .await?;
    println!("text: {}", bridge.get_text().await?);

    if let Some(help) = bridge.describe_command("toggleHeading") {
        println!("\n{}", help);
    }

    bridge.destroy();
    printer.await?;
    sandbox_task.await??;
    Ok(())
}
