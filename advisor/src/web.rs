use crate::pipeline::{Pipeline, Progress, ProgressObserver};
use crate::{Error, Result};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{
        Html,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use pulldown_cmark::{Options, Parser, html};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt, wrappers::UnboundedReceiverStream};
use tokio_util::sync::CancellationToken;

const INDEX_HTML: &str = include_str!("static/index.html");

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/health", get(health))
        .route("/api/report", get(report_events))
        .with_state(AppState { pipeline })
}

pub async fn serve(pipeline: Arc<Pipeline>, host: &str, port: u16) -> Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    tracing::info!("Serving investment advisor UI on http://{}", listener.local_addr()?);

    axum::serve(listener, router(pipeline)).await?;
    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
struct ReportParams {
    query: Option<String>,
}

struct ChannelObserver(mpsc::UnboundedSender<Event>);

impl ProgressObserver for ChannelObserver {
    fn on_progress(&self, progress: &Progress) {
        let data = serde_json::json!({
            "fraction": progress.fraction,
            "description": progress.description,
        });
        let _ = self
            .0
            .send(Event::default().event("progress").data(data.to_string()));
    }
}

async fn report_events(
    State(state): State<AppState>,
    Query(params): Query<ReportParams>,
) -> std::result::Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>, StatusCode>
{
    let query = match params.query {
        Some(q) if !q.trim().is_empty() => q,
        _ => return Err(StatusCode::BAD_REQUEST),
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    tokio::spawn(run_report(state.pipeline, query, tx, cancel.clone()));

    // dropping the stream (client went away) cancels the run
    let guard = cancel.drop_guard();
    let stream = UnboundedReceiverStream::new(rx).map(move |event| {
        let _guard = &guard;
        Ok::<_, Infallible>(event)
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn run_report(
    pipeline: Arc<Pipeline>,
    query: String,
    tx: mpsc::UnboundedSender<Event>,
    cancel: CancellationToken,
) {
    let observer = ChannelObserver(tx.clone());

    let event = match pipeline.run(&query, &observer, &cancel).await {
        Ok(report) => {
            let data = serde_json::json!({
                "markdown": report.content,
                "html": render_markdown(&report.content),
            });
            Event::default().event("report").data(data.to_string())
        }
        Err(Error::Cancelled) => {
            tracing::info!(query = %query, "report cancelled by client");
            return;
        }
        Err(e) => {
            tracing::error!(query = %query, error = %e, "report failed");
            let data = serde_json::json!({"message": e.to_string()});
            Event::default().event("failure").data(data.to_string())
        }
    };

    let _ = tx.send(event);
}

/// Markdown to HTML, with raw HTML from the model rendered as text.
fn render_markdown(markdown: &str) -> String {
    let parser = Parser::new_ext(markdown, Options::ENABLE_TABLES).map(|event| match event {
        pulldown_cmark::Event::Html(raw) | pulldown_cmark::Event::InlineHtml(raw) => {
            pulldown_cmark::Event::Text(raw)
        }
        event => event,
    });

    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}
