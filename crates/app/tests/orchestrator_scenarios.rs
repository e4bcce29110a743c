//! End-to-end conversation scenarios driven through the event dispatcher,
//! with a scripted LLM service on a real local WebSocket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use viva_app::config::{LlmConfig, OrchConfig, VadSource};
use viva_app::gateway::CommandSender;
use viva_app::handlers::dispatch;
use viva_app::state::AppState;
use viva_foundation::clock::TestClock;
use viva_protocol::{
    CommandEnvelope, GatewayEnvelope, GatewayEvent, LlmClientMessage, LlmServerFrame,
    LlmServerMessage, OrchestratorCommand, StartRequest,
};
use viva_telemetry::OrchestratorMetrics;
use viva_vad::VadConfig;

struct StubLlm {
    addr: SocketAddr,
    started_rx: mpsc::Receiver<StartRequest>,
    reply_tx: mpsc::Sender<LlmServerFrame>,
}

/// One-connection scripted LLM service: surfaces Start requests to the
/// test and relays whatever frames the test scripts back.
async fn spawn_stub_llm() -> StubLlm {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    spawn_stub_llm_on(listener)
}

fn spawn_stub_llm_on(listener: TcpListener) -> StubLlm {
    let addr = listener.local_addr().unwrap();
    let (started_tx, started_rx) = mpsc::channel::<StartRequest>(8);
    let (reply_tx, mut reply_rx) = mpsc::channel::<LlmServerFrame>(8);

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        let (mut sink, mut stream) = ws.split();
        loop {
            tokio::select! {
                msg = stream.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Ok(LlmClientMessage::Start(start)) =
                                serde_json::from_str::<LlmClientMessage>(&text)
                            {
                                let _ = started_tx.send(start).await;
                            }
                        }
                        Some(Ok(_)) => {}
                        _ => break,
                    }
                }
                frame = reply_rx.recv() => {
                    let Some(frame) = frame else { break };
                    let text = serde_json::to_string(&frame).unwrap();
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    StubLlm {
        addr,
        started_rx,
        reply_tx,
    }
}

fn test_config(llm_url: String) -> OrchConfig {
    OrchConfig {
        listen_addr: "127.0.0.1:0".into(),
        probe_addr: "127.0.0.1:0".into(),
        vad_source: VadSource::Feature,
        guard_ms: 1000,
        min_rms: 1200,
        vad: VadConfig {
            min_start: 2,
            hangover: 20,
            min_rms: 1200.0,
        },
        session_idle: Duration::from_secs(900),
        llm: LlmConfig {
            url: llm_url,
            deployment: "test-deployment".into(),
            api_version: "2024-02-15-preview".into(),
            system_prompt: "Keep replies short.".into(),
        },
    }
}

fn event(session_id: &str, event: GatewayEvent) -> GatewayEnvelope {
    GatewayEnvelope {
        session_id: session_id.into(),
        event,
    }
}

fn sentence(request_id: &str, text: &str) -> LlmServerFrame {
    LlmServerFrame {
        request_id: request_id.into(),
        msg: LlmServerMessage::Sentence { text: text.into() },
    }
}

async fn recv_command(rx: &mut mpsc::Receiver<CommandEnvelope>) -> OrchestratorCommand {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for outbound command")
        .expect("command channel closed")
        .command
}

#[tokio::test]
async fn test_happy_path_sentence_becomes_tts() {
    let mut stub = spawn_stub_llm().await;
    let clock = Arc::new(TestClock::new());
    let state = AppState::new(test_config(format!("ws://{}", stub.addr)), clock.clone());
    let (out, mut rx) = CommandSender::channel(64);
    let conn = CancellationToken::new();

    dispatch(&state, &out, &conn, event("s1", GatewayEvent::SessionOpen { room_url: "R".into() }));
    dispatch(
        &state,
        &out,
        &conn,
        event("s1", GatewayEvent::Tts { kind: "started".into(), first_audio_ms: 0 }),
    );
    dispatch(
        &state,
        &out,
        &conn,
        event("s1", GatewayEvent::Tts { kind: "first_audio".into(), first_audio_ms: 250 }),
    );
    for _ in 0..50 {
        dispatch(&state, &out, &conn, event("s1", GatewayEvent::Feature { rms: 200.0 }));
    }
    dispatch(
        &state,
        &out,
        &conn,
        event(
            "s1",
            GatewayEvent::TranscriptFinal {
                utterance_id: "u1".into(),
                text: "Hello.".into(),
            },
        ),
    );

    let start = timeout(Duration::from_secs(2), stub.started_rx.recv())
        .await
        .expect("llm never saw a Start request")
        .unwrap();
    assert_eq!(start.session_id, "s1");
    assert!(start.stream);
    assert_eq!(start.deployment, "test-deployment");
    assert_eq!(start.messages.first().unwrap().role, "system");
    assert_eq!(start.messages.last().unwrap().content, "Hello.");

    stub.reply_tx
        .send(sentence(&start.request_id, "Hi there."))
        .await
        .unwrap();

    assert!(matches!(
        recv_command(&mut rx).await,
        OrchestratorCommand::ArmBargeIn { guard_ms: 1000, min_rms: 1200 }
    ));
    assert!(matches!(
        recv_command(&mut rx).await,
        OrchestratorCommand::StartMicToStt
    ));
    match recv_command(&mut rx).await {
        OrchestratorCommand::StartTts { text } => assert_eq!(text, "Hi there."),
        other => panic!("expected StartTts, got {:?}", other),
    }

    // Quiet frames below threshold never stop TTS.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err(), "no further commands expected");

    assert_eq!(state.metrics.transitions.get("idle", "listening"), 1);
    assert_eq!(state.metrics.transitions.get("listening", "speaking"), 1);
    assert_eq!(state.metrics.transitions.get("speaking", "processing"), 1);
    assert_eq!(state.metrics.llm_first_sentence.count(), 1);
}

#[tokio::test]
async fn test_empty_sentence_produces_no_tts() {
    let mut stub = spawn_stub_llm().await;
    let clock = Arc::new(TestClock::new());
    let state = AppState::new(test_config(format!("ws://{}", stub.addr)), clock.clone());
    let (out, mut rx) = CommandSender::channel(64);
    let conn = CancellationToken::new();

    dispatch(&state, &out, &conn, event("s1", GatewayEvent::SessionOpen { room_url: "R".into() }));
    dispatch(
        &state,
        &out,
        &conn,
        event(
            "s1",
            GatewayEvent::TranscriptFinal {
                utterance_id: "u1".into(),
                text: "Hello.".into(),
            },
        ),
    );

    let start = timeout(Duration::from_secs(2), stub.started_rx.recv())
        .await
        .unwrap()
        .unwrap();

    stub.reply_tx.send(sentence(&start.request_id, "")).await.unwrap();
    stub.reply_tx
        .send(sentence(&start.request_id, "But this speaks."))
        .await
        .unwrap();

    let _arm = recv_command(&mut rx).await;
    let _mic = recv_command(&mut rx).await;
    match recv_command(&mut rx).await {
        OrchestratorCommand::StartTts { text } => assert_eq!(text, "But this speaks."),
        other => panic!("expected StartTts, got {:?}", other),
    }
}

#[tokio::test]
async fn test_barge_in_cancels_stream_and_drops_late_sentence() {
    let mut stub = spawn_stub_llm().await;
    let clock = Arc::new(TestClock::new());
    let state = AppState::new(test_config(format!("ws://{}", stub.addr)), clock.clone());
    let (out, mut rx) = CommandSender::channel(64);
    let conn = CancellationToken::new();

    dispatch(&state, &out, &conn, event("s1", GatewayEvent::SessionOpen { room_url: "R".into() }));
    dispatch(
        &state,
        &out,
        &conn,
        event(
            "s1",
            GatewayEvent::TranscriptFinal {
                utterance_id: "u1".into(),
                text: "Tell me everything.".into(),
            },
        ),
    );

    let start = timeout(Duration::from_secs(2), stub.started_rx.recv())
        .await
        .unwrap()
        .unwrap();

    stub.reply_tx
        .send(sentence(&start.request_id, "First sentence."))
        .await
        .unwrap();

    let _arm = recv_command(&mut rx).await;
    let _mic = recv_command(&mut rx).await;
    assert!(matches!(
        recv_command(&mut rx).await,
        OrchestratorCommand::StartTts { .. }
    ));

    // Gateway starts speaking the reply, audio reaches the speaker.
    dispatch(
        &state,
        &out,
        &conn,
        event("s1", GatewayEvent::Tts { kind: "started".into(), first_audio_ms: 0 }),
    );
    dispatch(
        &state,
        &out,
        &conn,
        event("s1", GatewayEvent::Tts { kind: "first_audio".into(), first_audio_ms: 180 }),
    );

    // Well past guard expiry the candidate interrupts.
    clock.advance(Duration::from_secs(3));
    dispatch(&state, &out, &conn, event("s1", GatewayEvent::Feature { rms: 2000.0 }));
    dispatch(&state, &out, &conn, event("s1", GatewayEvent::Feature { rms: 2000.0 }));

    assert!(matches!(
        recv_command(&mut rx).await,
        OrchestratorCommand::StopTts { .. }
    ));

    // A sentence already in flight when the cancel fired must not speak.
    stub.reply_tx
        .send(sentence(&start.request_id, "Second sentence."))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        rx.try_recv().is_err(),
        "no StartTts may follow a cancelled stream"
    );

    // Cleanup detached the session's LLM state.
    let detached = state
        .registry
        .with_existing("s1", |sess| !sess.llm_active && sess.llm_cancel.is_none())
        .unwrap();
    assert!(detached);
}

#[tokio::test]
async fn test_dead_llm_reconnects_and_turn_still_speaks() {
    // Reserve a port, then leave it closed so the first dial dies.
    let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = reserved.local_addr().unwrap();
    drop(reserved);

    let clock = Arc::new(TestClock::new());
    let state = AppState::new(test_config(format!("ws://{}", addr)), clock.clone());
    let (out, mut rx) = CommandSender::channel(64);
    let conn = CancellationToken::new();

    dispatch(&state, &out, &conn, event("s1", GatewayEvent::SessionOpen { room_url: "R".into() }));
    dispatch(
        &state,
        &out,
        &conn,
        event(
            "s1",
            GatewayEvent::TranscriptFinal {
                utterance_id: "u1".into(),
                text: "Hello.".into(),
            },
        ),
    );

    // Give the conductor time to hit the closed port and enter its
    // reconnect backoff, then bring the service up inside that window.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let listener = TcpListener::bind(addr).await.unwrap();
    let mut stub = spawn_stub_llm_on(listener);

    // The retried open reaches the now-live service.
    let start = timeout(Duration::from_secs(2), stub.started_rx.recv())
        .await
        .expect("retry never reached the llm service")
        .unwrap();
    assert_eq!(start.session_id, "s1");

    stub.reply_tx
        .send(sentence(&start.request_id, "Hi there."))
        .await
        .unwrap();

    let _arm = recv_command(&mut rx).await;
    let _mic = recv_command(&mut rx).await;
    match recv_command(&mut rx).await {
        OrchestratorCommand::StartTts { text } => assert_eq!(text, "Hi there."),
        other => panic!("expected StartTts, got {:?}", other),
    }

    assert_eq!(OrchestratorMetrics::get(&state.metrics.llm_reconnects), 1);
}

#[tokio::test]
async fn test_reconnect_backoff_window_and_counter() {
    // Dead endpoint: the initial dial fails and no reconnect is counted.
    let clock = Arc::new(TestClock::new());
    let dead = AppState::new(test_config("ws://127.0.0.1:1".into()), clock.clone());
    assert!(dead.pool.get().await.is_err());
    assert!(dead.pool.reconnect(1).await.is_err());
    assert_eq!(OrchestratorMetrics::get(&dead.metrics.llm_reconnects), 0);

    // Live endpoint: reconnect sleeps the attempt-1 backoff then succeeds.
    let stub = spawn_stub_llm().await;
    let state = AppState::new(test_config(format!("ws://{}", stub.addr)), clock.clone());

    let begun = Instant::now();
    state.pool.reconnect(1).await.expect("reconnect should succeed");
    let elapsed = begun.elapsed();

    assert!(
        elapsed >= Duration::from_millis(200),
        "backoff shorter than the attempt-1 floor: {:?}",
        elapsed
    );
    assert!(
        elapsed < Duration::from_millis(600),
        "backoff beyond the attempt-1 ceiling plus dial slack: {:?}",
        elapsed
    );
    assert_eq!(OrchestratorMetrics::get(&state.metrics.llm_reconnects), 1);
}
