use axum::response::{Html, IntoResponse, Response};
use maud::{DOCTYPE, Markup, html};
use std::collections::BTreeSet;
use tracing::error;

use crate::AppState;
use crate::error::RouterError;

/// Link to a bot with the shared token embedded
pub fn bot_href(bot_name: &str, token: &str) -> String {
    format!(
        "/{}/?token={}",
        urlencoding::encode(bot_name),
        urlencoding::encode(token)
    )
}

pub fn bot_listing(names: &BTreeSet<String>, token: &str) -> Markup {
    html! {
        (DOCTYPE)
        html {
            head {
                title { "Bot Router" }
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
            }
            body {
                h3 { "Bot Router" }
                @if names.is_empty() {
                    p { "No sessions in the directory" }
                } @else {
                    ul {
                        @for name in names {
                            li { a href=(bot_href(name, token)) { (name) } }
                        }
                    }
                }
            }
        }
    }
}

/// Every bot in the directory, live or not
pub async fn index_page(state: &AppState) -> Response {
    match state.directory.snapshot().await {
        Ok(records) => {
            let names: BTreeSet<String> = records.into_iter().map(|r| r.bot_name).collect();
            Html(bot_listing(&names, state.auth.token()).into_string()).into_response()
        }
        Err(e) => {
            error!("Failed to list sessions: {}", e);
            state.metrics.directory_error();
            RouterError::from(e).into_response()
        }
    }
}
