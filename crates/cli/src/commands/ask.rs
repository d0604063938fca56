//! `answerflow ask`: ask a question and stream the answer.
//!
//! There is no network transport in the CLI; the exchange is replayed from a
//! recorded NDJSON file, one transport event per line.

use answerflow_config::AppConfig;
use answerflow_core::request::{AnswerRequest, Language};
use answerflow_pipeline::{Answer, PendingAnswer, Pipeline};
use answerflow_stream::{Phase, ScriptedTransport, StreamingSession};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;

#[derive(clap::Args)]
pub struct AskArgs {
    /// The question to ask
    #[arg(short, long)]
    question: String,

    /// Organization the question is asked on behalf of
    #[arg(short, long)]
    org: String,

    /// Assessment the question belongs to (enables caching with --control)
    #[arg(short, long, requires = "control")]
    assessment: Option<String>,

    /// Control the question belongs to
    #[arg(short, long, requires = "assessment")]
    control: Option<String>,

    /// Extra context for the answering service
    #[arg(long)]
    context: Option<String>,

    /// Answer language: "en" or "hr"
    #[arg(short, long)]
    language: Option<Language>,

    /// Recorded exchange to replay (NDJSON transport events)
    #[arg(short, long)]
    events: PathBuf,

    /// Pause between replayed events, in milliseconds
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,

    /// Cancel the answer if it takes longer than this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Ignore a cached answer and generate a new one
    #[arg(long)]
    regenerate: bool,

    /// Print every session event as a JSON line on stderr
    #[arg(long)]
    show_events: bool,
}

pub async fn run(args: AskArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let script = std::fs::read_to_string(&args.events)
        .map_err(|e| format!("Failed to read {}: {e}", args.events.display()))?;
    let mut transport =
        ScriptedTransport::from_ndjson(&script)?.with_buffer(config.stream.transport_buffer);
    if args.delay_ms > 0 {
        transport = transport.with_delay(Duration::from_millis(args.delay_ms));
    }

    let pipeline = Pipeline::from_config(&config, Arc::new(transport)).await;
    if args.show_events {
        let events = pipeline.consumer().events().stream();
        tokio::spawn(async move {
            tokio::pin!(events);
            while let Some(event) = events.next().await {
                if let Ok(line) = serde_json::to_string(&*event) {
                    eprintln!("{line}");
                }
            }
        });
    }

    let mut request = AnswerRequest::new(args.question, args.org)
        .with_language(args.language.unwrap_or(config.default_language));
    if let (Some(assessment), Some(control)) = (args.assessment, args.control) {
        request = request.for_control(assessment, control);
    }
    if let Some(context) = args.context {
        request = request.with_context(context);
    }

    let pending = if args.regenerate {
        pipeline.generate(request)
    } else {
        match pipeline.ask(request).await {
            Answer::Cached(answer) => {
                println!("{}", answer.content);
                eprintln!(
                    "\n  (cached {})",
                    answer.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
                );
                return Ok(());
            }
            Answer::Live(pending) => pending,
        }
    };

    let deadline = args.timeout.map(Duration::from_secs);
    let session = stream_to_stdout(&pipeline, pending, deadline).await?;
    report(&session)
}

/// Print text as it arrives until the session settles. Ctrl-C and the
/// deadline both cancel the session.
async fn stream_to_stdout(
    pipeline: &Pipeline,
    pending: PendingAnswer,
    deadline: Option<Duration>,
) -> Result<StreamingSession, Box<dyn std::error::Error>> {
    let request_id = pending.handle().request_id().clone();
    let mut updates = pending.handle().updates();
    let mut printed = 0;
    let timer = tokio::time::sleep(deadline.unwrap_or(Duration::MAX));
    tokio::pin!(timer);

    loop {
        tokio::select! {
            update = updates.next() => {
                let Some(session) = update else { break };
                let text = &session.accumulated_text;
                if text.len() > printed {
                    print!("{}", &text[printed..]);
                    std::io::stdout().flush()?;
                    printed = text.len();
                }
                if session.phase.is_terminal() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                pipeline.consumer().cancel_session(&request_id);
            }
            _ = &mut timer, if deadline.is_some() => {
                eprintln!("\n  Timed out");
                pipeline.consumer().cancel_session(&request_id);
            }
        }
    }

    Ok(pending.settled().await?)
}

fn report(session: &StreamingSession) -> Result<(), Box<dyn std::error::Error>> {
    println!();
    match session.phase {
        Phase::Completed => {
            if let Some(final_text) = &session.final_text
                && *final_text != session.accumulated_text
            {
                println!("\n{final_text}");
            }
            eprintln!(
                "\n  {} fragments in {} ms",
                session.fragment_count,
                session.duration_ms().unwrap_or_default()
            );
            Ok(())
        }
        Phase::Cancelled => {
            eprintln!("  Cancelled");
            Ok(())
        }
        _ => Err(session
            .error
            .clone()
            .unwrap_or_else(|| "answer failed".into())
            .into()),
    }
}
