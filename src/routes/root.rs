use axum::{response::IntoResponse, response::Json};
use serde::Serialize;

const WELCOME_MESSAGE: &str = "Welcome to the Image Classification API!";

#[derive(Serialize)]
pub struct Welcome {
    message: &'static str,
}

pub async fn welcome() -> impl IntoResponse {
    Json(Welcome {
        message: WELCOME_MESSAGE,
    })
}
